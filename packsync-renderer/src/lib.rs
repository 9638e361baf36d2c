//! # packsync-renderer
//!
//! Generates the three kinds of file a pack directory holds:
//!
//! | File           | Source                                               |
//! |----------------|------------------------------------------------------|
//! | `<unit>.js`    | [`Renderer::render_unit`] over a [`UnitDefinition`]  |
//! | `package.json` | [`manifest::canonical`] over a `PersistedManifest`   |
//! | `index.js`     | [`Renderer::render_index`]                           |
//!
//! Rendering is pure: nothing here touches the pack directory.
//!
//! [`UnitDefinition`]: packsync_core::UnitDefinition

pub mod engine;
pub mod error;
pub mod manifest;
pub mod unit;

pub use engine::{unit_file_name, Renderer, TemplateEngine, INDEX_FILE, MANIFEST_FILE, UNIT_EXTENSION};
pub use error::RenderError;
