//! Tile-stratified sampling pipeline for mangrove classification.
//!
//! Stages, in data-flow order:
//! 1. [`partition`]: clip the global reference samples into per-project subsets.
//! 2. [`split`]: split each project subset by reference class.
//! 3. [`balance`]: balance the three classes per project, clip them per tile
//!    and submit feature extraction.
//! 4. [`assemble`]: merge the extracted tile tables into a training table.
//! 5. [`models`]: submit ensemble training, then per-tile classification.
//!
//! [`driver`] runs each stage over the selected projects; [`ledger`] makes
//! every submitting stage safe to re-run.

pub mod assemble;
pub mod balance;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compression;
pub mod config;
pub mod driver;
pub mod error;
pub mod geometry;
pub mod ledger;
pub mod models;
pub mod naming;
pub mod partition;
pub mod remote;
pub mod sampling;
pub mod split;
pub mod table;
pub mod tiles;
pub mod vector;

pub use config::PipelineConfig;
pub use driver::RunSummary;
pub use error::{PipelineError, Result};
pub use ledger::{FsMarkerStore, MarkerStore};
pub use remote::{RemoteClient, SpoolClient};
pub use tiles::{ProjectSelection, TileIndex};
