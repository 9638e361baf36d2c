//! Tera rendering engine: [`TemplateEngine`] and [`Renderer`].
//!
//! # Templates
//!
//! | Name            | Output          | Context                              |
//! |-----------------|-----------------|--------------------------------------|
//! | `unit.js.tera`  | `<unit>.js`     | `fields: [{key, value}]`             |
//! | `index.js.tera` | `index.js`      | `loader_module`, `manifest_file`     |
//!
//! Both are embedded at compile time; a user template directory may override
//! either by providing a file with the same name.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tera::{Context, Tera};

use packsync_core::UnitDefinition;

use crate::error::RenderError;
use crate::unit;

/// Manifest file name inside a pack directory.
pub const MANIFEST_FILE: &str = "package.json";
/// Loader stub file name inside a pack directory.
pub const INDEX_FILE: &str = "index.js";
/// Extension of generated unit files.
pub const UNIT_EXTENSION: &str = "js";

const UNIT_TEMPLATE: &str = "unit.js.tera";
const INDEX_TEMPLATE: &str = "index.js.tera";

// ---------------------------------------------------------------------------
// Embedded templates: baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    (UNIT_TEMPLATE, include_str!("templates/unit.js.tera")),
    (INDEX_TEMPLATE, include_str!("templates/index.js.tera")),
];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io {
        path: path.into(),
        source,
    }
}

fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

fn load_user_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut templates = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("tera") || !path.is_file() {
            continue;
        }
        let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        templates.push((normalize_template_name(rel), contents));
    }
    Ok(templates)
}

fn build_tera(user_template_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = HashMap::new();
    for (name, content) in TPLS {
        templates.insert((*name).to_string(), (*content).to_string());
    }
    if let Some(dir) = user_template_dir {
        for (name, content) in load_user_templates(dir)? {
            templates.insert(name, content);
        }
    }

    let mut tera = Tera::default();
    tera.autoescape_on(vec![]);
    tera.add_raw_templates(templates.into_iter().collect::<Vec<_>>())?;
    Ok(tera)
}

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

/// Tera-based engine with embedded defaults plus optional user overrides.
#[derive(Debug)]
pub struct TemplateEngine {
    tera: Tera,
}

impl TemplateEngine {
    /// Load embedded templates plus any `.tera` overrides in `user_template_dir`.
    pub fn new(user_template_dir: Option<&Path>) -> Result<Self, RenderError> {
        Ok(TemplateEngine {
            tera: build_tera(user_template_dir)?,
        })
    }

    fn render(&self, name: &str, ctx: &Context) -> Result<String, RenderError> {
        let mut rendered = self.tera.render(name, ctx)?.replace("\r\n", "\n");
        if !rendered.ends_with('\n') {
            rendered.push('\n');
        }
        Ok(rendered)
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Renders unit modules and the pack loader stub. Create once and share.
#[derive(Debug)]
pub struct Renderer {
    engine: TemplateEngine,
    loader_module: String,
}

impl Renderer {
    /// Renderer with embedded templates and the given runtime loader module.
    pub fn new(loader_module: impl Into<String>) -> Result<Self, RenderError> {
        Self::with_templates(loader_module, None)
    }

    /// Renderer whose templates may be overridden from `template_dir`.
    pub fn with_templates(
        loader_module: impl Into<String>,
        template_dir: Option<&Path>,
    ) -> Result<Self, RenderError> {
        Ok(Renderer {
            engine: TemplateEngine::new(template_dir)?,
            loader_module: loader_module.into(),
        })
    }

    /// Source text of the module for one unit.
    pub fn render_unit(&self, definition: &UnitDefinition) -> Result<String, RenderError> {
        let mut ctx = Context::new();
        ctx.insert("fields", &unit::fields(definition)?);
        self.engine.render(UNIT_TEMPLATE, &ctx)
    }

    /// Source text of the pack's `index.js`.
    pub fn render_index(&self) -> Result<String, RenderError> {
        let mut ctx = Context::new();
        ctx.insert("loader_module", &self.loader_module);
        ctx.insert("manifest_file", MANIFEST_FILE);
        self.engine.render(INDEX_TEMPLATE, &ctx)
    }
}

/// File name of the module generated for `unit`.
pub fn unit_file_name(unit: &str) -> String {
    format!("{unit}.{UNIT_EXTENSION}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
