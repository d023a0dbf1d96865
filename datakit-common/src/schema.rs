//! Data-only measurement metadata.
//!
//! Inputs that wrap a known exporter describe their measurements with
//! [`MeasurementSchema`] tables loaded from TOML or JSON5 files instead of
//! code. The point builder consults the registry to decide whether a field is
//! emitted as an integer.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::config::load_config;
use crate::error::{Error, Result};

/// Declared type of a field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Float,
    Int,
    String,
}

/// Metadata for one field of a measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desc: String,
}

/// Metadata for one tag of a measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desc: String,
}

/// Field and tag metadata for one measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSchema {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub tags: Vec<TagSpec>,
}

impl MeasurementSchema {
    /// Find a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Schema {
                measurement: self.name.clone(),
                message: "measurement name is empty".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(Error::Schema {
                    measurement: self.name.clone(),
                    message: format!("duplicate field '{}'", field.name),
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default, rename = "measurement")]
    measurements: Vec<MeasurementSchema>,
}

/// Lookup table of measurement schemas keyed by measurement name.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, MeasurementSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema. A later schema with the same name replaces the earlier one.
    pub fn insert(&mut self, schema: MeasurementSchema) -> Result<()> {
        schema.validate()?;
        self.schemas.insert(schema.name.clone(), schema);
        Ok(())
    }

    /// Load every `[[measurement]]` entry of a TOML or JSON5 file.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let file: SchemaFile = load_config(path)?;
        let count = file.measurements.len();
        for schema in file.measurements {
            self.insert(schema)?;
        }
        Ok(count)
    }

    pub fn get(&self, measurement: &str) -> Option<&MeasurementSchema> {
        self.schemas.get(measurement)
    }

    /// Declared kind of a field, if the measurement and field are known.
    pub fn field_kind(&self, measurement: &str, field: &str) -> Option<FieldKind> {
        self.get(measurement)
            .and_then(|s| s.field(field))
            .map(|f| f.kind)
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn etcd_network() -> MeasurementSchema {
        MeasurementSchema {
            name: "etcd_network".to_string(),
            fields: vec![
                FieldSpec {
                    name: "peer_sent_bytes_total".to_string(),
                    kind: FieldKind::Int,
                    unit: Some("B".to_string()),
                    desc: "Total bytes sent to peers".to_string(),
                },
                FieldSpec {
                    name: "peer_round_trip_time_seconds".to_string(),
                    kind: FieldKind::Float,
                    unit: None,
                    desc: String::new(),
                },
            ],
            tags: vec![TagSpec {
                name: "To".to_string(),
                desc: "Peer id".to_string(),
            }],
        }
    }

    #[test]
    fn test_field_kind_lookup() {
        let mut registry = SchemaRegistry::new();
        registry.insert(etcd_network()).unwrap();

        assert_eq!(
            registry.field_kind("etcd_network", "peer_sent_bytes_total"),
            Some(FieldKind::Int)
        );
        assert_eq!(
            registry.field_kind("etcd_network", "peer_round_trip_time_seconds"),
            Some(FieldKind::Float)
        );
        assert_eq!(registry.field_kind("etcd_network", "missing"), None);
        assert_eq!(registry.field_kind("unknown", "peer_sent_bytes_total"), None);
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut schema = etcd_network();
        schema.fields.push(schema.fields[0].clone());

        let mut registry = SchemaRegistry::new();
        assert!(matches!(
            registry.insert(schema),
            Err(Error::Schema { .. })
        ));
    }

    #[test]
    fn test_load_toml_tables() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[[measurement]]
name = "coredns_cache"

[[measurement.fields]]
name = "hits_total"
kind = "int"
desc = "The count of cache hits."

[[measurement.tags]]
name = "server"
"#
        )
        .unwrap();

        let mut registry = SchemaRegistry::new();
        assert_eq!(registry.load_file(file.path()).unwrap(), 1);
        assert_eq!(registry.len(), 1);

        let schema = registry.get("coredns_cache").unwrap();
        assert_eq!(schema.tags[0].name, "server");
        assert_eq!(
            registry.field_kind("coredns_cache", "hits_total"),
            Some(FieldKind::Int)
        );
    }
}
