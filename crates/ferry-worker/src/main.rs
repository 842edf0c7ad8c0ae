#![forbid(unsafe_code)]
#![warn(
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Binary entrypoint that loads configuration and runs the package worker.

use ferry_worker::{WorkerResult, run_worker};

/// Boots the worker and blocks until shutdown.
#[tokio::main]
async fn main() -> WorkerResult<()> {
    run_worker().await
}
