//! Groups classified samples into points.

use std::sync::Arc;

use indexmap::IndexMap;

use datakit_common::{FieldKind, FieldValue, Point, SchemaRegistry};

use crate::tags::Tags;

/// Collects fields into one point per `(measurement, tag set)`.
///
/// Points keep the order in which their first field arrived. Fields
/// declared `int` by a schema are truncated to integers; all others keep
/// their float value.
#[derive(Debug, Default)]
pub struct PointBuilder {
    schemas: Option<Arc<SchemaRegistry>>,
    groups: IndexMap<(String, Tags), Point>,
}

impl PointBuilder {
    pub fn new(schemas: Option<Arc<SchemaRegistry>>) -> Self {
        Self {
            schemas,
            groups: IndexMap::new(),
        }
    }

    /// Add one field. Non-finite values are skipped and `false` is returned.
    pub fn add(
        &mut self,
        measurement: String,
        tags: Tags,
        field: String,
        value: f64,
        timestamp: i64,
    ) -> bool {
        if !value.is_finite() {
            return false;
        }

        let value = match self
            .schemas
            .as_ref()
            .and_then(|s| s.field_kind(&measurement, &field))
        {
            Some(FieldKind::Int) => FieldValue::Int(value as i64),
            _ => FieldValue::Float(value),
        };

        let point = self
            .groups
            .entry((measurement, tags))
            .or_insert_with_key(|(measurement, tags)| Point {
                measurement: measurement.clone(),
                tags: tags.clone(),
                fields: Default::default(),
                timestamp,
            });
        point.fields.insert(field, value);
        true
    }

    /// Number of points currently held.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Drain the points built so far.
    pub fn take(&mut self) -> Vec<Point> {
        self.groups.drain(..).map(|(_, point)| point).collect()
    }

    /// Drain the points matching `pred`, keeping the others in order.
    pub fn take_if(&mut self, mut pred: impl FnMut(&Point) -> bool) -> Vec<Point> {
        let groups = std::mem::take(&mut self.groups);
        let mut taken = Vec::new();
        for (key, point) in groups {
            if pred(&point) {
                taken.push(point);
            } else {
                self.groups.insert(key, point);
            }
        }
        taken
    }

    pub fn finish(mut self) -> Vec<Point> {
        self.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datakit_common::{FieldSpec, MeasurementSchema};

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_groups_by_measurement_and_tags() {
        let mut builder = PointBuilder::new(None);

        builder.add("etcd".into(), tags(&[("a", "1"), ("b", "2")]), "x".into(), 1.0, 10);
        builder.add("etcd".into(), tags(&[("b", "2"), ("a", "1")]), "y".into(), 2.0, 20);
        builder.add("etcd".into(), tags(&[("a", "other")]), "x".into(), 3.0, 30);
        builder.add("go".into(), tags(&[("a", "1"), ("b", "2")]), "x".into(), 4.0, 40);

        let points = builder.finish();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].fields.len(), 2);
        assert_eq!(points[0].timestamp, 10);
        assert_eq!(points[1].tag("a"), Some("other"));
        assert_eq!(points[2].measurement, "go");
    }

    #[test]
    fn test_skips_non_finite() {
        let mut builder = PointBuilder::new(None);

        assert!(!builder.add("m".into(), Tags::new(), "nan".into(), f64::NAN, 0));
        assert!(!builder.add("m".into(), Tags::new(), "inf".into(), f64::INFINITY, 0));
        assert!(builder.is_empty());
    }

    #[test]
    fn test_schema_int_fields() {
        let mut registry = SchemaRegistry::new();
        registry
            .insert(MeasurementSchema {
                name: "tomcat".to_string(),
                fields: vec![FieldSpec {
                    name: "threads".to_string(),
                    kind: FieldKind::Int,
                    unit: None,
                    desc: String::new(),
                }],
                tags: Vec::new(),
            })
            .unwrap();

        let mut builder = PointBuilder::new(Some(Arc::new(registry)));
        builder.add("tomcat".into(), Tags::new(), "threads".into(), 12.9, 0);
        builder.add("tomcat".into(), Tags::new(), "load".into(), 0.5, 0);

        let points = builder.finish();
        assert_eq!(points[0].field("threads"), Some(&FieldValue::Int(12)));
        assert_eq!(points[0].field("load"), Some(&FieldValue::Float(0.5)));
    }

    #[test]
    fn test_take_resets() {
        let mut builder = PointBuilder::new(None);
        builder.add("m".into(), Tags::new(), "f".into(), 1.0, 0);

        assert_eq!(builder.take().len(), 1);
        assert_eq!(builder.len(), 0);
    }
}
