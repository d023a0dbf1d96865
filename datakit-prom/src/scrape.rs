//! The per-target pipeline: parse, classify, enrich, build.

use std::sync::Arc;

use datakit_common::{FieldValue, Point, SchemaRegistry};

use crate::builder::PointBuilder;
use crate::classify::Classifier;
use crate::config::PromInputConfig;
use crate::error::Result;
use crate::parser::{ExpositionParser, MetricType, Sample, parse_text};
use crate::tags::{InfoIndex, TagEnricher, Tags, UrlTagSet};

/// Measurement and field name of the per-target connectivity gauge.
pub const UP_MEASUREMENT: &str = "up";

/// Points built from one exposition body.
#[derive(Debug, Default)]
pub struct ScrapeResult {
    pub points: Vec<Point>,
    /// Malformed lines skipped.
    pub parse_errors: usize,
}

/// Stateless parse/classify/enrich/build pipeline shared by every target
/// of an input.
#[derive(Debug, Clone)]
pub struct ScrapePipeline {
    honor_timestamps: bool,
    disable_info_tag: bool,
    classifier: Classifier,
    enricher: TagEnricher,
    schemas: Option<Arc<SchemaRegistry>>,
}

impl ScrapePipeline {
    pub fn from_config(
        config: &PromInputConfig,
        schemas: Option<Arc<SchemaRegistry>>,
    ) -> Result<Self> {
        Ok(Self {
            honor_timestamps: config.honor_timestamps,
            disable_info_tag: config.disable_info_tag,
            classifier: Classifier::from_config(config)?,
            enricher: TagEnricher::from_config(config)?,
            schemas,
        })
    }

    pub fn enricher(&self) -> &TagEnricher {
        &self.enricher
    }

    /// Process a whole body. Info labels are collected first so they apply
    /// to every matching series regardless of position.
    pub fn process(&self, text: &str, target: &UrlTagSet, scrape_start: i64) -> ScrapeResult {
        let mut samples = Vec::new();
        let mut parse_errors = 0;
        for item in parse_text(text, self.honor_timestamps) {
            match item {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping malformed line");
                    parse_errors += 1;
                }
            }
        }

        let mut info = InfoIndex::default();
        if !self.disable_info_tag {
            for sample in samples.iter().filter(|s| s.metric_type == MetricType::Info) {
                info.add(&sample.labels);
            }
        }

        let mut builder = PointBuilder::new(self.schemas.clone());
        for sample in &samples {
            self.apply(&mut builder, sample, &info, target, scrape_start);
        }

        ScrapeResult {
            points: builder.finish(),
            parse_errors,
        }
    }

    /// Start an incremental scrape. Info labels only apply to series
    /// parsed after the info sample.
    ///
    /// Groups are flushed once the body has moved past their measurement,
    /// so a measurement whose families are not contiguous in the body can
    /// be emitted more than once. `up` groups are held until the end.
    pub fn stream<'a>(&'a self, target: &'a UrlTagSet, scrape_start: i64) -> StreamScrape<'a> {
        StreamScrape {
            pipeline: self,
            target,
            scrape_start,
            parser: ExpositionParser::new(self.honor_timestamps),
            info: InfoIndex::default(),
            builder: PointBuilder::new(self.schemas.clone()),
            open: None,
            held: 0,
            parse_errors: 0,
        }
    }

    /// The `up` gauge of a target.
    pub fn up_point(&self, target: &UrlTagSet, up: bool, timestamp: i64) -> Point {
        Point {
            measurement: UP_MEASUREMENT.to_string(),
            tags: self.enricher.target_tags(target),
            fields: [(UP_MEASUREMENT.to_string(), FieldValue::Float(up_value(up)))].into(),
            timestamp,
        }
    }

    /// Add the `up` gauge to `points`, merging into an identically tagged
    /// `up` point when the body already produced one.
    pub fn attach_up(&self, points: &mut Vec<Point>, target: &UrlTagSet, up: bool, timestamp: i64) {
        let up_point = self.up_point(target, up, timestamp);
        match points
            .iter_mut()
            .find(|p| p.measurement == up_point.measurement && p.tags == up_point.tags)
        {
            Some(existing) => {
                existing
                    .fields
                    .insert(UP_MEASUREMENT.to_string(), FieldValue::Float(up_value(up)));
            }
            None => points.push(up_point),
        }
    }

    /// Add a sample to `builder`; returns the measurement it went to.
    fn apply(
        &self,
        builder: &mut PointBuilder,
        sample: &Sample,
        info: &InfoIndex,
        target: &UrlTagSet,
        scrape_start: i64,
    ) -> Option<String> {
        if sample.metric_type == MetricType::Info && !self.disable_info_tag {
            return None;
        }
        if !self.classifier.accepts(sample) {
            return None;
        }

        let promoted = if info.is_empty() {
            Tags::new()
        } else {
            info.matching(&sample.labels)
        };
        let tags = self.enricher.enrich(&sample.labels, &promoted, target)?;

        let (measurement, field) = self.classifier.route(&sample.name);
        builder
            .add(
                measurement.clone(),
                tags,
                field,
                sample.value,
                sample.timestamp.unwrap_or(scrape_start),
            )
            .then_some(measurement)
    }
}

fn up_value(up: bool) -> f64 {
    if up { 1.0 } else { 0.0 }
}

/// Incremental scrape of one target.
pub struct StreamScrape<'a> {
    pipeline: &'a ScrapePipeline,
    target: &'a UrlTagSet,
    scrape_start: i64,
    parser: ExpositionParser,
    info: InfoIndex,
    builder: PointBuilder,
    /// Measurement of the last sample built; its groups may still grow.
    open: Option<String>,
    /// Groups left in the builder by the last `take`.
    held: usize,
    parse_errors: usize,
}

impl StreamScrape<'_> {
    pub fn push_line(&mut self, line: &str) {
        match self.parser.parse_line(line) {
            Some(Ok(sample)) => {
                if sample.metric_type == MetricType::Info && !self.pipeline.disable_info_tag {
                    self.info.add(&sample.labels);
                    return;
                }
                if let Some(measurement) = self.pipeline.apply(
                    &mut self.builder,
                    &sample,
                    &self.info,
                    self.target,
                    self.scrape_start,
                ) {
                    self.open = Some(measurement);
                }
            }
            Some(Err(e)) => {
                tracing::debug!(error = %e, "Skipping malformed line");
                self.parse_errors += 1;
            }
            None => {}
        }
    }

    /// Groups built since the last `take`.
    pub fn pending(&self) -> usize {
        self.builder.len().saturating_sub(self.held)
    }

    /// Drain the groups that can no longer grow: everything except the open
    /// measurement and `up`.
    pub fn take(&mut self) -> Vec<Point> {
        let open = self.open.as_deref();
        let points = self.builder.take_if(|p| {
            p.measurement != UP_MEASUREMENT && Some(p.measurement.as_str()) != open
        });
        self.held = self.builder.len();
        points
    }

    pub fn parse_errors(&self) -> usize {
        self.parse_errors
    }

    pub fn finish(self) -> ScrapeResult {
        ScrapeResult {
            points: self.builder.finish(),
            parse_errors: self.parse_errors,
        }
    }
}

/// Splits a chunked body into complete lines.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    /// Append a chunk and return the lines it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let Some(last) = self.buf.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let rest = self.buf.split_off(last + 1);
        let complete = std::mem::replace(&mut self.buf, rest);
        String::from_utf8_lossy(&complete)
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// The trailing line without a newline, if any.
    pub fn finish(self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.buf).into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> UrlTagSet {
        UrlTagSet {
            base: [("host".to_string(), "node-1".to_string())].into(),
            instance: Some("localhost:9100".to_string()),
        }
    }

    const BODY: &str = r#"# TYPE node_build info
node_build_info{version="1.7.0"} 1
# TYPE node_load1 gauge
node_load1 0.42
# TYPE node_cpu_seconds_total counter
node_cpu_seconds_total{cpu="0",mode="idle"} 100
node_cpu_seconds_total{cpu="0",mode="user"} 7
"#;

    #[test]
    fn test_process_promotes_info() {
        let pipeline = ScrapePipeline::from_config(&PromInputConfig::default(), None).unwrap();
        let result = pipeline.process(BODY, &target(), 1);

        assert_eq!(result.parse_errors, 0);
        assert_eq!(result.points.len(), 3);
        assert!(result.points.iter().all(|p| p.tag("version") == Some("1.7.0")));
        assert!(result.points.iter().all(|p| p.measurement == "node"));
        assert!(result.points.iter().all(|p| p.timestamp == 1));
        assert!(result.points.iter().all(|p| p.field("build_info").is_none()));
    }

    #[test]
    fn test_disabled_info_is_a_field() {
        let pipeline = ScrapePipeline::from_config(
            &PromInputConfig {
                disable_info_tag: true,
                ..Default::default()
            },
            None,
        )
        .unwrap();
        let result = pipeline.process(BODY, &target(), 1);

        let tagged: Vec<_> = result
            .points
            .iter()
            .filter(|p| p.tag("version").is_some())
            .collect();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].field("build_info"), Some(&FieldValue::Float(1.0)));
    }

    #[test]
    fn test_stream_matches_process_for_leading_info() {
        let pipeline = ScrapePipeline::from_config(&PromInputConfig::default(), None).unwrap();
        let target = target();
        let mut stream = pipeline.stream(&target, 1);
        for line in BODY.lines() {
            stream.push_line(line);
        }

        assert_eq!(stream.pending(), 3);
        let result = stream.finish();
        assert_eq!(result.points, pipeline.process(BODY, &target, 1).points);
    }

    #[test]
    fn test_attach_up_merges() {
        let pipeline = ScrapePipeline::from_config(&PromInputConfig::default(), None).unwrap();
        let target = target();

        let mut points = Vec::new();
        pipeline.attach_up(&mut points, &target, false, 5);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].field("up"), Some(&FieldValue::Float(0.0)));
        assert_eq!(points[0].tag("instance"), Some("localhost:9100"));

        let result = pipeline.process("up 1\n", &target, 5);
        let mut points = result.points;
        pipeline.attach_up(&mut points, &target, true, 5);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].field("up"), Some(&FieldValue::Float(1.0)));
    }

    #[test]
    fn test_stream_take_keeps_open_measurement() {
        let pipeline = ScrapePipeline::from_config(&PromInputConfig::default(), None).unwrap();
        let target = target();
        let mut stream = pipeline.stream(&target, 1);

        stream.push_line(r#"node_a{x="1"} 1"#);
        assert_eq!(stream.pending(), 1);
        assert!(stream.take().is_empty());
        assert_eq!(stream.pending(), 0);

        stream.push_line(r#"node_b{x="1"} 2"#);
        assert!(stream.take().is_empty());

        stream.push_line("go_goroutines 5");
        let flushed = stream.take();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].field("a"), Some(&FieldValue::Float(1.0)));
        assert_eq!(flushed[0].field("b"), Some(&FieldValue::Float(2.0)));

        let rest = stream.finish().points;
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].measurement, "go");
    }

    #[test]
    fn test_stream_holds_up_until_finish() {
        let pipeline = ScrapePipeline::from_config(&PromInputConfig::default(), None).unwrap();
        let target = target();
        let mut stream = pipeline.stream(&target, 1);

        let mut points = Vec::new();
        for line in ["up 1", "node_load1 0.5", "go_goroutines 5"] {
            stream.push_line(line);
            points.extend(stream.take());
        }
        assert!(points.iter().all(|p| p.measurement != UP_MEASUREMENT));

        points.extend(stream.finish().points);
        pipeline.attach_up(&mut points, &target, true, 1);
        let ups: Vec<_> = points
            .iter()
            .filter(|p| p.measurement == UP_MEASUREMENT)
            .collect();
        assert_eq!(ups.len(), 1);
        assert_eq!(ups[0].field("up"), Some(&FieldValue::Float(1.0)));
    }

    #[test]
    fn test_line_splitter() {
        let mut splitter = LineSplitter::default();

        assert!(splitter.push(b"node_lo").is_empty());
        assert_eq!(splitter.push(b"ad1 0.4\nup 1\nnode_"), vec!["node_load1 0.4", "up 1"]);
        assert_eq!(splitter.push(b"x 2\r\n"), vec!["node_x 2"]);
        assert_eq!(splitter.finish(), None);

        let mut splitter = LineSplitter::default();
        splitter.push(b"tail 1");
        assert_eq!(splitter.finish().as_deref(), Some("tail 1"));
    }
}
