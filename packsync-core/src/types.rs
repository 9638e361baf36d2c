//! Domain types for packs, units and the persisted manifest.
//!
//! Every mapping that reaches disk keeps document order: `serde_json` is built
//! with `preserve_order`, so [`OrderedMap`] iterates in insertion order and a
//! manifest re-serializes byte-for-byte the way it was written.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{invalid, CoreError};

/// Insertion-ordered JSON object.
pub type OrderedMap = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed pack name; also the name of the pack's cache directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackName(pub String);

impl fmt::Display for PackName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for PackName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PackName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A `"name:version"` unit key, split at the first colon.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitKey {
    pub name: String,
    pub version: String,
}

impl UnitKey {
    /// Split `raw` into base name and version. Returns `None` without a colon.
    pub fn parse(raw: &str) -> Option<Self> {
        let (name, version) = raw.split_once(':')?;
        Some(Self {
            name: name.to_owned(),
            version: version.to_owned(),
        })
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// Opaque unit definition; fields are kept in document order and handed to
/// code generation untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitDefinition(pub OrderedMap);

// ---------------------------------------------------------------------------
// Desired state
// ---------------------------------------------------------------------------

/// One versioned unit of a pack.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitEntry {
    pub key: UnitKey,
    pub definition: UnitDefinition,
}

/// Desired contents of a single pack.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PackSpec {
    /// Units in document order.
    pub units: Vec<UnitEntry>,
    /// Dependency name → version range, in document order.
    pub dependencies: OrderedMap,
}

impl PackSpec {
    /// Base names of every unit in this spec.
    pub fn unit_names(&self) -> HashSet<&str> {
        self.units.iter().map(|u| u.key.name.as_str()).collect()
    }
}

/// Validated desired state: pack name → spec.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DesiredState {
    pub packs: BTreeMap<PackName, PackSpec>,
}

impl DesiredState {
    /// Validate a raw pack-listing document.
    ///
    /// Shape: `{ "<pack>": { "machines": { "<unit>:<version>": {..} },
    /// "dependencies": { "<name>": "<range>" } } }`. Both inner keys are
    /// optional. Pack and unit names must be safe single path components, unit
    /// keys must carry a version, and a unit name may appear only once per pack.
    pub fn from_value(document: Value) -> Result<Self, CoreError> {
        let Value::Object(packs) = document else {
            return Err(invalid("top level must be an object of packs"));
        };

        let mut state = DesiredState::default();
        for (raw_pack, body) in packs {
            validate_component("pack", &raw_pack)?;
            let Value::Object(mut body) = body else {
                return Err(invalid(format!("pack '{raw_pack}' must be an object")));
            };

            let units = match body.remove("machines") {
                None | Some(Value::Null) => OrderedMap::new(),
                Some(Value::Object(map)) => map,
                Some(_) => {
                    return Err(invalid(format!(
                        "pack '{raw_pack}': `machines` must be an object"
                    )))
                }
            };
            let dependencies = match body.remove("dependencies") {
                None | Some(Value::Null) => OrderedMap::new(),
                Some(Value::Object(map)) => map,
                Some(_) => {
                    return Err(invalid(format!(
                        "pack '{raw_pack}': `dependencies` must be an object"
                    )))
                }
            };

            let mut seen = HashSet::new();
            let mut entries = Vec::with_capacity(units.len());
            for (raw_key, definition) in units {
                let key = UnitKey::parse(&raw_key).ok_or_else(|| {
                    invalid(format!(
                        "pack '{raw_pack}': unit key '{raw_key}' has no `:version` suffix"
                    ))
                })?;
                validate_unit_name(&key.name)?;
                if !seen.insert(key.name.clone()) {
                    return Err(invalid(format!(
                        "pack '{raw_pack}': unit '{}' is listed more than once",
                        key.name
                    )));
                }
                let Value::Object(fields) = definition else {
                    return Err(invalid(format!(
                        "pack '{raw_pack}': unit '{raw_key}' must be an object"
                    )));
                };
                entries.push(UnitEntry {
                    key,
                    definition: UnitDefinition(fields),
                });
            }

            state.packs.insert(
                PackName(raw_pack),
                PackSpec {
                    units: entries,
                    dependencies,
                },
            );
        }
        Ok(state)
    }

    /// Names of every desired pack.
    pub fn pack_names(&self) -> HashSet<&str> {
        self.packs.keys().map(|p| p.0.as_str()).collect()
    }
}

/// Reject names that are not a single, ordinary path component.
pub fn validate_component(kind: &str, name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(invalid(format!("{kind} name must not be empty")));
    }
    if name == "." || name == ".." {
        return Err(invalid(format!("{kind} name '{name}' is reserved")));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(invalid(format!(
            "{kind} name '{name}' must not contain path separators"
        )));
    }
    Ok(())
}

/// Unit names whose `<name>.js` file is generated by the pack itself.
/// Compared case-insensitively so case-folding filesystems cannot collide.
pub const RESERVED_UNIT_NAMES: &[&str] = &["index"];

/// [`validate_component`] plus the names a unit file may not take.
pub fn validate_unit_name(name: &str) -> Result<(), CoreError> {
    validate_component("unit", name)?;
    if RESERVED_UNIT_NAMES
        .iter()
        .any(|reserved| name.eq_ignore_ascii_case(reserved))
    {
        return Err(invalid(format!(
            "unit name '{name}' is reserved for the pack loader"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Persisted manifest
// ---------------------------------------------------------------------------

/// The `machinepack` section of a pack manifest.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitIndex {
    /// Unit names in desired-state order.
    #[serde(default)]
    pub machines: Vec<String>,
    /// Unit name → version string.
    #[serde(default)]
    pub machine_versions: OrderedMap,
}

/// On-disk record of which unit versions are materialized for a pack.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PersistedManifest {
    #[serde(default)]
    pub dependencies: OrderedMap,
    #[serde(rename = "machinepack", default)]
    pub units: UnitIndex,
}

impl PersistedManifest {
    /// Persisted version of `unit`, if any. Non-string entries read as absent.
    pub fn version_of(&self, unit: &str) -> Option<&str> {
        self.units.machine_versions.get(unit).and_then(Value::as_str)
    }

    /// Unit names recorded in `machineVersions`.
    pub fn unit_names(&self) -> impl Iterator<Item = &str> {
        self.units.machine_versions.keys().map(String::as_str)
    }

    /// Record `unit` at `version`, keeping `machines` and `machineVersions` set-equal.
    pub fn record(&mut self, unit: &str, version: &str) {
        if !self.units.machine_versions.contains_key(unit) {
            self.units.machines.push(unit.to_owned());
        }
        self.units
            .machine_versions
            .insert(unit.to_owned(), Value::String(version.to_owned()));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
