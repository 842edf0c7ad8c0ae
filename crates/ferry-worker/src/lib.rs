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

//! Package worker: bids on expectations, moves and scans media packages, and
//! maintains package containers.
//!
//! Layout: `worker.rs` (protocol dispatch), `expectations/` (one handler per
//! expectation type), `lookup.rs` (accessor resolution), `registry.rs`
//! (dependencies and triggers), `lifecycle.rs` (background work), `probe.rs`
//! (media tool), `cost.rs` (bids), `bootstrap.rs` (process wiring).

pub mod bootstrap;
pub mod cost;
pub mod error;
mod expectations;
mod lifecycle;
pub mod lookup;
pub mod probe;
pub mod registry;
pub mod worker;

pub use bootstrap::{ENV_CONFIG_PATH, WorkerRuntime, build_worker, run_worker, spawn_event_metrics};
pub use cost::{ASSUMED_SIZE_MIB, CostModel};
pub use error::{WorkerError, WorkerResult};
pub use lookup::{LookupMode, ResolvedAccessor, lookup_accessor};
pub use probe::{MediaProbe, ProbeError, ProbeResult, parse_probe_output};
pub use registry::ExpectationRegistry;
pub use worker::PackageWorker;
