//! # packsync-sync
//!
//! Desired-state fetch, cache pruning, per-pack reconciliation and the
//! serialized install queue.
//!
//! Call [`pipeline::run`] with a [`DesiredStateSource`] to bring the cache
//! root in line with the remote pack listing. Packs whose manifest changed are
//! handed to an [`InstallQueue`], which runs installs one at a time and keeps
//! the [`MaintenanceFlag`] raised until it drains.

pub mod diff;
pub mod error;
pub mod fetch;
pub mod inventory;
pub mod manifest;
pub mod pipeline;
pub mod prune;
pub mod queue;
pub mod reconcile;
pub mod writer;

pub use error::{FetchError, InstallError, SyncError};
pub use fetch::{DesiredStateSource, FileSource, HttpSource, StaticSource};
pub use pipeline::{PackFailure, SyncOptions, SyncReport};
pub use queue::{CommandInstaller, InstallQueue, InstallTicket, Installer, MaintenanceFlag};
pub use reconcile::{PackChanged, ReconcileOutcome};
pub use writer::WriteResult;
