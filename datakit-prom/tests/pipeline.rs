//! Behaviour of the parse/classify/enrich/build pipeline on whole bodies.

use std::collections::{BTreeMap, HashMap};

use datakit_common::FieldValue;
use datakit_prom::{MeasurementRule, PromInputConfig, ScrapePipeline, TagsRenameConfig, UrlTagSet};

const HANDLER_ERRORS: &str = r#"
# HELP promhttp_metric_handler_errors_total Total number of internal errors encountered by the promhttp metric handler.
# TYPE promhttp_metric_handler_errors_total counter
promhttp_metric_handler_errors_total{cause="encoding",ignore_me="some"} 0
"#;

fn target() -> UrlTagSet {
    UrlTagSet {
        base: BTreeMap::from([("host".to_string(), "node-1".to_string())]),
        instance: Some("host:1234".to_string()),
    }
}

fn pipeline(config: PromInputConfig) -> ScrapePipeline {
    ScrapePipeline::from_config(&config, None).unwrap()
}

#[test]
fn test_prefix_rule_precedence() {
    let pipeline = pipeline(PromInputConfig {
        measurements: vec![MeasurementRule {
            prefix: "etcd_network_".to_string(),
            name: "etcd_network".to_string(),
        }],
        measurement_name: "ignored_when_rule_matches".to_string(),
        ..Default::default()
    });

    let result = pipeline.process("etcd_network_peer_sent_bytes_total{To=\"a\"} 12\n", &target(), 0);

    assert_eq!(result.points.len(), 1);
    assert_eq!(result.points[0].measurement, "etcd_network");
    assert_eq!(
        result.points[0].field("peer_sent_bytes_total"),
        Some(&FieldValue::Float(12.0))
    );
}

#[test]
fn test_default_split_heuristic() {
    let result = pipeline(PromInputConfig::default()).process(HANDLER_ERRORS, &target(), 0);

    assert_eq!(result.points.len(), 1);
    assert_eq!(result.points[0].measurement, "promhttp");
    assert!(result.points[0].field("metric_handler_errors_total").is_some());
}

#[test]
fn test_instance_tag_default() {
    let body = "a_x 1\nb_y{instance=\"server-reported\"} 2\n";
    let result = pipeline(PromInputConfig::default()).process(body, &target(), 0);

    assert_eq!(result.points.len(), 2);
    assert!(
        result
            .points
            .iter()
            .all(|p| p.tag("instance") == Some("host:1234"))
    );
}

#[test]
fn test_tags_ignore() {
    let result = pipeline(PromInputConfig {
        tags_ignore: vec!["ignore_me".to_string()],
        ..Default::default()
    })
    .process(HANDLER_ERRORS, &target(), 0);

    let point = &result.points[0];
    assert_eq!(point.tag("cause"), Some("encoding"));
    assert_eq!(point.tag("ignore_me"), None);
}

#[test]
fn test_tags_rename() {
    let result = pipeline(PromInputConfig {
        tags_rename: TagsRenameConfig {
            overwrite_exist_tags: false,
            mapping: HashMap::from([("cause".to_string(), "__cause".to_string())]),
        },
        ..Default::default()
    })
    .process(HANDLER_ERRORS, &target(), 0);

    let point = &result.points[0];
    assert_eq!(point.tag("__cause"), Some("encoding"));
    assert_eq!(point.tag("cause"), None);
}

#[test]
fn test_ignore_tag_kv_match() {
    let body = r#"
# TYPE promhttp_metric_handler_errors_total counter
promhttp_metric_handler_errors_total{cause="encoding-1"} 1
promhttp_metric_handler_errors_total{cause="encoding-2"} 2
promhttp_metric_handler_errors_total{cause="encoding-3"} 3
"#;
    let result = pipeline(PromInputConfig {
        ignore_tag_kv_match: HashMap::from([(
            "cause".to_string(),
            vec!["encoding-1".to_string(), "encoding-2".to_string()],
        )]),
        ..Default::default()
    })
    .process(body, &target(), 0);

    assert_eq!(result.points.len(), 1);
    assert_eq!(result.points[0].tag("cause"), Some("encoding-3"));
}

#[test]
fn test_malformed_line_resilience() {
    let body = "go_goroutines{bad 3\ngo_threads 7\n";
    let result = pipeline(PromInputConfig::default()).process(body, &target(), 0);

    assert_eq!(result.parse_errors, 1);
    assert_eq!(result.points.len(), 1);
    assert_eq!(
        result.points[0].field("threads"),
        Some(&FieldValue::Float(7.0))
    );
}

#[test]
fn test_filter_idempotence() {
    let body = r#"
go_goroutines 42
go_gc_duration_seconds_sum 0.1
process_open_fds 9
http_requests_total 3
"#;
    let config = PromInputConfig {
        metric_name_filter: vec!["^go_".to_string(), "^process_".to_string()],
        metric_name_filter_ignore: vec!["gc".to_string()],
        measurement_name: "all".to_string(),
        ..Default::default()
    };
    let pipeline = pipeline(config);

    let once = pipeline.process(body, &target(), 0);
    let fields: Vec<String> = once.points[0].fields.keys().cloned().collect();
    assert_eq!(fields, vec!["go_goroutines", "process_open_fds"]);

    // Re-render the survivors and filter again.
    let survivors: String = once.points[0]
        .fields
        .iter()
        .map(|(name, value)| format!("{} {}\n", name, value))
        .collect();
    let twice = pipeline.process(&survivors, &target(), 0);
    assert_eq!(twice.points, once.points);
}

#[test]
fn test_tag_priority() {
    let mut target = target();
    target.base.insert("env".to_string(), "static".to_string());

    let result = pipeline(PromInputConfig::default()).process(
        "app_requests{env=\"label\",host=\"exporter\",instance=\"x\"} 1\n",
        &target,
        0,
    );

    let point = &result.points[0];
    assert_eq!(point.tag("env"), Some("label"));
    assert_eq!(point.tag("host"), Some("exporter"));
    assert_eq!(point.tag("instance"), Some("host:1234"));
}

#[test]
fn test_histogram_series_keep_bucket_tags() {
    let body = r#"
# TYPE rpc_duration_seconds histogram
rpc_duration_seconds_bucket{le="0.1"} 10
rpc_duration_seconds_bucket{le="+Inf"} 12
rpc_duration_seconds_sum 1.5
rpc_duration_seconds_count 12
"#;
    let result = pipeline(PromInputConfig {
        metric_types: vec!["histogram".to_string()],
        ..Default::default()
    })
    .process(body, &target(), 0);

    assert_eq!(result.points.len(), 3);
    assert_eq!(result.points[0].tag("le"), Some("0.1"));
    assert_eq!(result.points[1].tag("le"), Some("+Inf"));

    let totals = &result.points[2];
    assert!(totals.field("duration_seconds_sum").is_some());
    assert!(totals.field("duration_seconds_count").is_some());
}

#[test]
fn test_info_promotion_by_shared_labels() {
    let body = r#"
# TYPE etcd_server info
etcd_server_info{member="m1",version="3.5.9"} 1
etcd_server_info{member="m2",version="3.4.0"} 1
etcd_server_has_leader{member="m1"} 1
etcd_server_has_leader{member="m2"} 0
"#;
    let result = pipeline(PromInputConfig::default()).process(body, &target(), 0);

    assert_eq!(result.points.len(), 2);
    assert_eq!(result.points[0].tag("version"), Some("3.5.9"));
    assert_eq!(result.points[1].tag("version"), Some("3.4.0"));
    assert!(result.points.iter().all(|p| p.field("server_info").is_none()));
}

#[test]
fn test_conflicting_info_labels_are_not_promoted() {
    let body = r#"# TYPE app_build info
app_build_info{job="a",version="1"} 1
app_build_info{job="b",version="2"} 1
go_goroutines 5
app_requests{job="b"} 9
"#;
    let result = pipeline(PromInputConfig::default()).process(body, &target(), 0);

    let go = result.points.iter().find(|p| p.measurement == "go").unwrap();
    assert_eq!(go.tag("job"), None);
    assert_eq!(go.tag("version"), None);

    let app = result.points.iter().find(|p| p.measurement == "app").unwrap();
    assert_eq!(app.tag("job"), Some("b"));
    assert_eq!(app.tag("version"), Some("2"));
}

#[test]
fn test_honor_timestamps() {
    let body = "app_hits 1 1700000000000\n";

    let honored = pipeline(PromInputConfig::default()).process(body, &target(), 42);
    assert_eq!(honored.points[0].timestamp, 1_700_000_000_000_000_000);

    let ignored = pipeline(PromInputConfig {
        honor_timestamps: false,
        ..Default::default()
    })
    .process(body, &target(), 42);
    assert_eq!(ignored.points[0].timestamp, 42);
}
