//! Field formatting for generated unit modules.
//!
//! A unit becomes `module.exports = { key: value, ... };` where:
//! - `fn` is emitted as raw code text,
//! - `name` is emitted under the key `identity`,
//! - everything else is a JSON literal, pretty-printed and re-indented so
//!   nested lines sit two spaces deeper than their key.

use serde::Serialize;
use serde_json::Value;

use packsync_core::UnitDefinition;

use crate::error::RenderError;

/// Key holding the unit's executable body.
pub const CODE_FIELD: &str = "fn";
/// Input key renamed on output.
pub const NAME_FIELD: &str = "name";
/// Output key for [`NAME_FIELD`].
pub const IDENTITY_FIELD: &str = "identity";

/// One `key: value` line of a unit module, ready for the template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitField {
    pub key: String,
    pub value: String,
}

/// Convert a definition into template fields, in definition order.
pub fn fields(definition: &UnitDefinition) -> Result<Vec<UnitField>, RenderError> {
    let mut out = Vec::with_capacity(definition.0.len());
    for (key, value) in &definition.0 {
        let output_key = if key == NAME_FIELD { IDENTITY_FIELD } else { key };
        let text = if key == CODE_FIELD {
            code_text(value)?
        } else {
            json_literal(value)?
        };
        out.push(UnitField {
            key: object_key(output_key)?,
            value: text,
        });
    }
    Ok(out)
}

fn code_text(value: &Value) -> Result<String, RenderError> {
    match value {
        Value::String(code) if !code.trim().is_empty() => Ok(code.trim().to_owned()),
        Value::String(_) => Ok("null".to_owned()),
        other => json_literal(other),
    }
}

fn json_literal(value: &Value) -> Result<String, RenderError> {
    let pretty = serde_json::to_string_pretty(value)?;
    Ok(pretty.replace('\n', "\n  "))
}

/// Bare identifier when the key is one, quoted string otherwise.
fn object_key(key: &str) -> Result<String, RenderError> {
    if is_identifier(key) {
        Ok(key.to_owned())
    } else {
        Ok(serde_json::to_string(key)?)
    }
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
