use std::fs;

use packsync_core::UnitDefinition;
use packsync_renderer::{RenderError, Renderer};
use serde_json::{json, Value};
use tempfile::TempDir;

fn def(value: Value) -> UnitDefinition {
    match value {
        Value::Object(map) => UnitDefinition(map),
        other => panic!("expected object, got {other}"),
    }
}

#[test]
fn user_index_template_overrides_embedded_default() {
    let templates = TempDir::new().expect("templates");
    fs::write(
        templates.path().join("index.js.tera"),
        "export default loadPack('{{ loader_module }}', './{{ manifest_file }}');\n",
    )
    .expect("write override");

    let renderer =
        Renderer::with_templates("machine", Some(templates.path())).expect("renderer");
    let index = renderer.render_index().expect("render index");
    assert_eq!(index, "export default loadPack('machine', './package.json');\n");

    // The unit template was not overridden and still renders the default wrapper.
    let unit = renderer
        .render_unit(&def(json!({ "name": "u1" })))
        .expect("render unit");
    assert!(unit.starts_with("module.exports = {"));
}

#[test]
fn non_tera_files_in_template_dir_are_ignored() {
    let templates = TempDir::new().expect("templates");
    fs::write(templates.path().join("README.md"), "{{ broken").expect("write");

    let renderer = Renderer::with_templates("machine", Some(templates.path()));
    assert!(renderer.is_ok(), "non-template files must not be parsed");
}

#[test]
fn broken_override_is_reported_as_tera_error() {
    let templates = TempDir::new().expect("templates");
    fs::write(templates.path().join("unit.js.tera"), "{% for x in %}").expect("write");

    let err = Renderer::with_templates("machine", Some(templates.path())).unwrap_err();
    assert!(matches!(err, RenderError::Tera(_)), "got: {err}");
}

#[test]
fn missing_template_dir_falls_back_to_embedded() {
    let root = TempDir::new().expect("root");
    let renderer = Renderer::with_templates("machine", Some(&root.path().join("absent")))
        .expect("renderer");
    assert!(renderer.render_index().expect("index").contains("require('machine')"));
}
