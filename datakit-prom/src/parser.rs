//! Prometheus text exposition parser.
//!
//! Parsing is line oriented and best effort: a malformed line yields a
//! [`ParseError`] for that line only and the next line is parsed as usual.
//! Histogram and summary series are returned as ordinary samples.
//!
//! Directives, names and timestamps are handled here; label sets and values
//! are decoded by `prometheus_parse`.

use std::collections::HashMap;

use prometheus_parse::Value;
use thiserror::Error;

/// Suffixes stripped when looking up the declared type of a series.
const TYPE_SUFFIXES: &[&str] = &[
    "_bucket", "_count", "_sum", "_created", "_total", "_info", "_gcount", "_gsum",
];

/// Declared metric family type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Summary,
    #[default]
    Untyped,
    Info,
}

impl MetricType {
    /// Parse a `# TYPE` token, case-insensitively. Unknown types are untyped.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "counter" => MetricType::Counter,
            "gauge" | "stateset" => MetricType::Gauge,
            "histogram" | "gaugehistogram" => MetricType::Histogram,
            "summary" => MetricType::Summary,
            "info" => MetricType::Info,
            _ => MetricType::Untyped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Histogram => "histogram",
            MetricType::Summary => "summary",
            MetricType::Untyped => "untyped",
            MetricType::Info => "info",
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One exposition line.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    /// Labels sorted by key; keys are unique.
    pub labels: Vec<(String, String)>,
    pub value: f64,
    /// Embedded timestamp in nanoseconds, when present and honored.
    pub timestamp: Option<i64>,
    pub metric_type: MetricType,
}

impl Sample {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A malformed exposition line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {reason}: {text:?}")]
pub struct ParseError {
    /// 1-based line number.
    pub line: usize,
    pub text: String,
    pub reason: String,
}

/// Incremental exposition parser.
///
/// Feed lines in order; `# TYPE` directives seen so far determine the type
/// of later samples.
#[derive(Debug, Default)]
pub struct ExpositionParser {
    honor_timestamps: bool,
    types: HashMap<String, MetricType>,
    line: usize,
    eof: bool,
}

impl ExpositionParser {
    pub fn new(honor_timestamps: bool) -> Self {
        Self {
            honor_timestamps,
            ..Default::default()
        }
    }

    /// Parse the next line. Returns `None` for blank lines, comments and
    /// directives.
    pub fn parse_line(&mut self, raw: &str) -> Option<Result<Sample, ParseError>> {
        self.line += 1;
        if self.eof {
            return None;
        }

        let line = raw.trim();
        if line.is_empty() {
            return None;
        }

        if let Some(comment) = line.strip_prefix('#') {
            self.directive(comment);
            return None;
        }

        Some(self.sample(line).map_err(|reason| ParseError {
            line: self.line,
            text: raw.to_string(),
            reason,
        }))
    }

    /// Number of lines seen so far.
    pub fn lines(&self) -> usize {
        self.line
    }

    fn directive(&mut self, comment: &str) {
        let mut tokens = comment.split_whitespace();
        match tokens.next() {
            Some("TYPE") => {
                if let (Some(name), Some(kind)) = (tokens.next(), tokens.next()) {
                    self.types.insert(name.to_string(), MetricType::parse(kind));
                }
            }
            Some("EOF") => self.eof = true,
            _ => {}
        }
    }

    fn sample(&self, line: &str) -> Result<Sample, String> {
        let name_end = line
            .find(|c: char| !is_name_char(c))
            .unwrap_or(line.len());
        let name = &line[..name_end];
        if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err("invalid metric name".to_string());
        }

        let rest = line[name_end..].trim_start();
        let (label_block, rest) = if rest.starts_with('{') {
            let close = rest
                .find('}')
                .ok_or_else(|| "unterminated label set".to_string())?;
            let block = &rest[..=close];
            let block = if block[1..close].trim().is_empty() { "" } else { block };
            (block, &rest[close + 1..])
        } else {
            ("", rest)
        };

        // Exemplars start after the first `#` outside the label block.
        let rest = rest.split('#').next().unwrap_or_default();

        let mut tokens = rest.split_whitespace();
        let value = tokens
            .next()
            .ok_or_else(|| "missing value".to_string())?;
        let timestamp = tokens.next().map(parse_timestamp).transpose()?;
        if tokens.next().is_some() {
            return Err("unexpected trailing data".to_string());
        }

        let (labels, value) = decode_series(label_block, value)?;

        Ok(Sample {
            name: name.to_string(),
            labels,
            value,
            timestamp: timestamp.filter(|_| self.honor_timestamps),
            metric_type: self.type_of(name),
        })
    }

    fn type_of(&self, name: &str) -> MetricType {
        if let Some(kind) = self.types.get(name) {
            return *kind;
        }
        TYPE_SUFFIXES
            .iter()
            .filter_map(|suffix| name.strip_suffix(suffix))
            .find_map(|family| self.types.get(family).copied())
            .unwrap_or_default()
    }
}

/// Parse a whole exposition body lazily.
pub fn parse_text(
    text: &str,
    honor_timestamps: bool,
) -> impl Iterator<Item = Result<Sample, ParseError>> + '_ {
    let mut parser = ExpositionParser::new(honor_timestamps);
    text.lines().filter_map(move |line| parser.parse_line(line))
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

/// Name the series is handed to `prometheus_parse` under. Its sample
/// grammar only accepts word characters in names, so the real name (which
/// may contain `:`) is kept aside.
const SERIES_PLACEHOLDER: &str = "series";

/// Decode a label block and value with `prometheus_parse`.
fn decode_series(label_block: &str, value: &str) -> Result<(Vec<(String, String)>, f64), String> {
    let line = format!("{}{} {}", SERIES_PLACEHOLDER, label_block, value);
    let scrape = prometheus_parse::Scrape::parse(std::iter::once(Ok::<_, std::io::Error>(line)))
        .map_err(|e| e.to_string())?;
    let sample = scrape
        .samples
        .into_iter()
        .next()
        .ok_or_else(|| format!("invalid value {:?}", value))?;

    let value = match sample.value {
        Value::Counter(v) | Value::Gauge(v) | Value::Untyped(v) => v,
        Value::Histogram(_) | Value::Summary(_) => {
            return Err("unexpected aggregated sample".to_string());
        }
    };

    let mut labels: Vec<(String, String)> = sample
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), unescape(v)))
        .collect();
    labels.sort();
    Ok((labels, value))
}

/// Undo exposition escapes in a label value.
fn unescape(raw: &str) -> String {
    if !raw.contains('\\') {
        return raw.to_string();
    }
    let mut value = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            value.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => value.push('\n'),
            Some('\\') => value.push('\\'),
            Some('"') => value.push('"'),
            Some(other) => {
                value.push('\\');
                value.push(other);
            }
            None => value.push('\\'),
        }
    }
    value
}

/// Integer timestamps are milliseconds; fractional ones are seconds.
fn parse_timestamp(s: &str) -> Result<i64, String> {
    if let Ok(ms) = s.parse::<i64>() {
        return Ok(ms.saturating_mul(1_000_000));
    }
    match s.parse::<f64>() {
        Ok(secs) if secs.is_finite() => Ok((secs * 1e9) as i64),
        _ => Err(format!("invalid timestamp {:?}", s)),
    }
}
