//! Cell-based neighbor locator for molecular dynamics.
//!
//! Particles are binned into a grid of cells no smaller than the cutoff plus
//! a drift margin, so neighbor lists stay valid until some particle has moved
//! further than the drift bound. Periodic, free and domain-decomposed axes can
//! be mixed freely.

pub mod adjacency;
pub mod atoms;
pub mod cell;
pub mod config;
pub mod error;
pub mod grid;
pub mod locator;
pub mod search;
pub mod translation;

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

pub use atoms::{Atoms, ParticleAccessor};
pub use cell::Cell;
pub use config::LocatorConfig;
pub use error::{LocatorError, Result};
pub use locator::NeighborCellLocator;
pub use search::{NeighborItem, NeighborResult, brute_force_full_neighbors};
pub use translation::TranslationTable;

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber. `RUST_LOG` takes precedence over
/// `level`, which defaults to `info`. Does nothing if a subscriber is already set.
pub fn init_logging(level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or("info")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .with_thread_ids(true)
        .try_init();
}
