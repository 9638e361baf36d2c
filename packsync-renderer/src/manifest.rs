//! Canonical manifest text.
//!
//! Change detection compares manifests as text after the same pretty-printing,
//! not structurally. Key order is significant: a reordered dependency map
//! counts as a change.

use serde::Serialize;
use serde_json::Value;

use packsync_core::PersistedManifest;

use crate::error::RenderError;

/// Two-space pretty-printed JSON of `manifest`.
pub fn canonical(manifest: &PersistedManifest) -> Result<String, RenderError> {
    canonical_of(manifest)
}

/// Two-space pretty-printed JSON of an already-parsed manifest document.
pub fn canonical_value(value: &Value) -> Result<String, RenderError> {
    canonical_of(value)
}

fn canonical_of<T: Serialize + ?Sized>(value: &T) -> Result<String, RenderError> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// File contents for `manifest`: canonical text plus a trailing newline.
pub fn file_contents(manifest: &PersistedManifest) -> Result<String, RenderError> {
    let mut text = canonical(manifest)?;
    text.push('\n');
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_manifest_canonical_form() {
        let text = canonical(&PersistedManifest::default()).unwrap();
        assert_eq!(
            text,
            "{\n  \"dependencies\": {},\n  \"machinepack\": {\n    \"machines\": [],\n    \"machineVersions\": {}\n  }\n}"
        );
    }

    #[test]
    fn reparsed_file_has_identical_canonical_text() {
        let mut manifest = PersistedManifest::default();
        manifest
            .dependencies
            .insert("request".into(), json!("0.2.8"));
        manifest.record("u1", "1.0");

        let written = file_contents(&manifest).unwrap();
        let reparsed: Value = serde_json::from_str(&written).unwrap();
        assert_eq!(canonical_value(&reparsed).unwrap(), canonical(&manifest).unwrap());
    }

    #[test]
    fn dependency_order_is_significant() {
        let mut a = PersistedManifest::default();
        a.dependencies.insert("x".into(), json!("1"));
        a.dependencies.insert("y".into(), json!("2"));
        let mut b = PersistedManifest::default();
        b.dependencies.insert("y".into(), json!("2"));
        b.dependencies.insert("x".into(), json!("1"));
        assert_ne!(canonical(&a).unwrap(), canonical(&b).unwrap());
    }
}
