use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "graphport", version, about = "Delegate subgraphs to ONNXIFI backends")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the backends an ONNXIFI library exposes
    Backends {
        /// Path to the ONNXIFI shared library
        #[arg(long)]
        library: PathBuf,

        /// Log level (RUST_LOG)
        #[arg(long, default_value = "info")]
        log: String,
    },
    /// Run an operator manifest through replica workers
    Run {
        /// Path to the ONNXIFI shared library
        #[arg(long)]
        library: PathBuf,

        /// Operator manifest (JSON)
        #[arg(long)]
        manifest: PathBuf,

        /// Operator instances sharing one backend graph
        #[arg(long, default_value_t = 2)]
        replicas: u32,

        /// Jobs submitted round-robin across replicas
        #[arg(long, default_value_t = 4)]
        iterations: u32,

        /// Log level (RUST_LOG)
        #[arg(long, default_value = "info")]
        log: String,
    },
}
