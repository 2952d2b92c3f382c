pub mod binder;
pub mod builder;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod graph;
pub mod op;
pub mod store;
pub mod worker;

pub use binder::*;
pub use builder::*;
pub use cache::*;
pub use config::*;
pub use dispatch::*;
pub use error::*;
pub use graph::*;
pub use op::*;
pub use store::*;
pub use worker::*;
