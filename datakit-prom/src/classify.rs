//! Metric classification: filtering and measurement routing.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::PromInputConfig;
use crate::error::{PromError, Result};
use crate::parser::Sample;

/// Measurement used when routing yields an empty name.
const FALLBACK_MEASUREMENT: &str = "prom";

/// Maps metrics starting with `prefix` to the measurement `name`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementRule {
    #[serde(default)]
    pub prefix: String,
    /// Defaults to the prefix without its trailing `_`.
    #[serde(default)]
    pub name: String,
}

/// Decides whether a sample is kept and which measurement/field it feeds.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<MeasurementRule>,
    measurement_name: String,
    measurement_prefix: String,
    metric_types: Vec<String>,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl Classifier {
    pub fn from_config(config: &PromInputConfig) -> Result<Self> {
        Ok(Self {
            rules: config.measurements.clone(),
            measurement_name: config.measurement_name.clone(),
            measurement_prefix: config.measurement_prefix.clone(),
            metric_types: config
                .metric_types
                .iter()
                .map(|t| t.trim().to_ascii_lowercase())
                .collect(),
            include: compile_all(&config.metric_name_filter, "metric_name_filter")?,
            exclude: compile_all(&config.metric_name_filter_ignore, "metric_name_filter_ignore")?,
        })
    }

    /// Type whitelist, then name filters.
    pub fn accepts(&self, sample: &Sample) -> bool {
        self.accepts_type(sample) && self.accepts_name(&sample.name)
    }

    fn accepts_type(&self, sample: &Sample) -> bool {
        self.metric_types.is_empty()
            || self
                .metric_types
                .iter()
                .any(|t| t == sample.metric_type.as_str())
    }

    /// The ignore list wins over the whitelist.
    pub fn accepts_name(&self, name: &str) -> bool {
        if self.exclude.iter().any(|re| re.is_match(name)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|re| re.is_match(name))
    }

    /// Compute `(measurement, field)` for a metric name.
    pub fn route(&self, name: &str) -> (String, String) {
        let (measurement, field) = self.split(name);
        let measurement = if measurement.is_empty() {
            FALLBACK_MEASUREMENT
        } else {
            measurement
        };
        (
            format!("{}{}", self.measurement_prefix, measurement),
            field.to_string(),
        )
    }

    fn split<'a>(&'a self, name: &'a str) -> (&'a str, &'a str) {
        if let Some(rule) = self
            .rules
            .iter()
            .find(|r| !r.prefix.is_empty() && name.starts_with(&r.prefix))
        {
            let measurement = if rule.name.is_empty() {
                rule.prefix.trim_end_matches('_')
            } else {
                rule.name.as_str()
            };
            let field = &name[rule.prefix.len()..];
            return (measurement, if field.is_empty() { name } else { field });
        }

        if !self.measurement_name.is_empty() {
            return (&self.measurement_name, name);
        }

        default_split(name)
    }
}

/// Split on the first `_`; names without a usable split map to themselves.
pub fn default_split(name: &str) -> (&str, &str) {
    match name.split_once('_') {
        Some((measurement, field)) if !measurement.is_empty() && !field.is_empty() => {
            (measurement, field)
        }
        _ => (name, name),
    }
}

fn compile_all(patterns: &[String], option: &str) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p)
                .map_err(|e| PromError::config(format!("invalid {} '{}': {}", option, p, e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::MetricType;

    fn classifier(config: PromInputConfig) -> Classifier {
        Classifier::from_config(&config).unwrap()
    }

    fn sample(name: &str, metric_type: MetricType) -> Sample {
        Sample {
            name: name.to_string(),
            labels: Vec::new(),
            value: 1.0,
            timestamp: None,
            metric_type,
        }
    }

    #[test]
    fn test_prefix_rule() {
        let c = classifier(PromInputConfig {
            measurements: vec![MeasurementRule {
                prefix: "etcd_network_".to_string(),
                name: "etcd_network".to_string(),
            }],
            ..Default::default()
        });

        assert_eq!(
            c.route("etcd_network_peer_sent_bytes_total"),
            (
                "etcd_network".to_string(),
                "peer_sent_bytes_total".to_string()
            )
        );
        // Unmatched names fall through to the default split.
        assert_eq!(
            c.route("etcd_server_has_leader"),
            ("etcd".to_string(), "server_has_leader".to_string())
        );
    }

    #[test]
    fn test_rule_without_name_uses_prefix() {
        let c = classifier(PromInputConfig {
            measurements: vec![
                MeasurementRule {
                    prefix: String::new(),
                    name: "never".to_string(),
                },
                MeasurementRule {
                    prefix: "coredns_cache_".to_string(),
                    name: String::new(),
                },
            ],
            ..Default::default()
        });

        assert_eq!(
            c.route("coredns_cache_hits_total"),
            ("coredns_cache".to_string(), "hits_total".to_string())
        );
    }

    #[test]
    fn test_empty_measurement_falls_back_to_prom() {
        let c = classifier(PromInputConfig {
            source: "etcd".to_string(),
            measurements: vec![MeasurementRule {
                prefix: "__".to_string(),
                name: String::new(),
            }],
            ..Default::default()
        });

        assert_eq!(
            c.route("__hidden_total"),
            ("prom".to_string(), "hidden_total".to_string())
        );
    }

    #[test]
    fn test_default_split() {
        let c = classifier(PromInputConfig::default());

        assert_eq!(
            c.route("promhttp_metric_handler_errors_total"),
            (
                "promhttp".to_string(),
                "metric_handler_errors_total".to_string()
            )
        );
        assert_eq!(c.route("up"), ("up".to_string(), "up".to_string()));
        assert_eq!(
            c.route("_private_metric"),
            ("_private_metric".to_string(), "_private_metric".to_string())
        );
        assert_eq!(c.route("trailing_"), ("trailing_".to_string(), "trailing_".to_string()));
    }

    #[test]
    fn test_measurement_name_and_prefix() {
        let c = classifier(PromInputConfig {
            measurement_name: "flink".to_string(),
            measurement_prefix: "dk_".to_string(),
            ..Default::default()
        });

        assert_eq!(
            c.route("jobmanager_numRunningJobs"),
            (
                "dk_flink".to_string(),
                "jobmanager_numRunningJobs".to_string()
            )
        );
    }

    #[test]
    fn test_metric_type_whitelist() {
        let c = classifier(PromInputConfig {
            metric_types: vec!["Counter".to_string(), "gauge".to_string()],
            ..Default::default()
        });

        assert!(c.accepts(&sample("a_total", MetricType::Counter)));
        assert!(c.accepts(&sample("b", MetricType::Gauge)));
        assert!(!c.accepts(&sample("c_bucket", MetricType::Histogram)));
        assert!(!c.accepts(&sample("d", MetricType::Untyped)));
    }

    #[test]
    fn test_ignore_filter_wins() {
        let c = classifier(PromInputConfig {
            metric_name_filter: vec!["^go_".to_string(), "^process_".to_string()],
            metric_name_filter_ignore: vec!["gc".to_string()],
            ..Default::default()
        });

        assert!(c.accepts_name("go_goroutines"));
        assert!(c.accepts_name("process_open_fds"));
        assert!(!c.accepts_name("go_gc_duration_seconds"));
        assert!(!c.accepts_name("http_requests_total"));
    }

    #[test]
    fn test_invalid_regex_is_config_error() {
        let err = Classifier::from_config(&PromInputConfig {
            metric_name_filter: vec!["(".to_string()],
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, PromError::Config(_)));
    }
}
