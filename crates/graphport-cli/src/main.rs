mod cli;
mod manifest;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use graphport_core::OnnxifiLibrary;
use graphport_runtime::{BackendGraphCache, OnnxifiOp, RunJob, Worker};
use tokio::sync::{mpsc, oneshot};
use tracing_subscriber::EnvFilter;

use manifest::{preview, Manifest};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Backends { library, log } => {
            init_tracing(&log);
            list_backends(&library)
        }
        Command::Run {
            library,
            manifest,
            replicas,
            iterations,
            log,
        } => {
            init_tracing(&log);
            run(&library, &manifest, replicas, iterations).await
        }
    }
}

fn init_tracing(log: &str) {
    std::env::set_var("RUST_LOG", log);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

fn list_backends(path: &Path) -> Result<()> {
    let library = OnnxifiLibrary::load(path)?;
    let count = library.backend_count()?;
    let ids = library.backend_ids(count)?;

    for (index, id) in ids.iter().enumerate() {
        let name = library
            .backend_name(*id)
            .unwrap_or_else(|err| format!("<{err}>"));
        let capabilities = library.backend_capabilities(*id).unwrap_or_default();
        println!(
            "{index}: {name} (capabilities {:#x}, thread-safe: {})",
            capabilities.bits, capabilities.thread_safe
        );
    }
    for id in ids {
        library.release_backend_id(id)?;
    }
    tracing::info!(library = library.origin(), backends = count, "backend listing finished");
    Ok(())
}

async fn run(library: &Path, manifest: &Path, replicas: u32, iterations: u32) -> Result<()> {
    anyhow::ensure!(replicas > 0, "--replicas must be at least 1");
    let manifest = Manifest::load(manifest)?;
    let library = Arc::new(OnnxifiLibrary::load(library)?);
    let cache = Arc::new(BackendGraphCache::new());

    // ---- Replicas: one operator + tensor store per worker, one shared backend graph
    let mut senders = Vec::new();
    let mut handles = Vec::new();
    for id in 0..replicas {
        let workspace = manifest.workspace()?;
        let op = OnnxifiOp::new(&manifest.op, &workspace, library.clone(), cache.clone())
            .with_context(|| format!("constructing replica {id}"))?;
        let (tx, inbox) = mpsc::channel(16);
        senders.push(tx);
        let worker = Worker {
            id,
            inbox,
            op,
            workspace,
        };
        handles.push(tokio::spawn(async move {
            if let Err(e) = worker.run().await {
                tracing::error!(error = ?e, "worker exited");
            }
        }));
    }
    tracing::info!(
        replicas,
        shared = cache.len() == 1,
        "replicas ready"
    );

    for iteration in 0..iterations {
        let tx = &senders[iteration as usize % senders.len()];
        let (resp_tx, resp_rx) = oneshot::channel();
        tx.send(RunJob {
            inputs: manifest.job_inputs()?,
            resp_tx,
        })
        .await
        .context("worker inbox closed")?;

        let outputs = resp_rx
            .await
            .context("worker dropped the job")?
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("iteration {iteration}"))?;
        for (name, tensor) in &outputs {
            tracing::info!(
                iteration,
                output = %name,
                shape = ?tensor.shape().dims(),
                values = %preview(tensor, 8),
                "job finished"
            );
        }
    }

    drop(senders);
    for handle in handles {
        handle.await?;
    }
    Ok(())
}
