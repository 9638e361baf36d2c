//! packsync core library: domain types, config layering, errors.
//!
//! - [`types`]: pack / unit / manifest types and desired-state validation
//! - [`config`]: layered [`PackSyncConfig`] loading
//! - [`error`]: [`CoreError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::PackSyncConfig;
pub use error::CoreError;
pub use types::{
    DesiredState, OrderedMap, PackName, PackSpec, PersistedManifest, UnitDefinition, UnitEntry,
    UnitIndex, UnitKey,
};
