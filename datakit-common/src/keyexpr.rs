use crate::point::Category;

/// Default key expression prefix for all Datakit feeds.
pub const KEY_PREFIX: &str = "datakit";

/// Builder for constructing Datakit key expressions.
///
/// Key expressions follow the pattern:
/// `<prefix>/<category>/<feed>/<measurement>`
///
/// A feed name may itself contain `/` (e.g. `prom/etcd`).
#[derive(Debug, Clone)]
pub struct KeyExprBuilder {
    prefix: String,
}

impl Default for KeyExprBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyExprBuilder {
    pub fn new() -> Self {
        Self::with_prefix(KEY_PREFIX)
    }

    /// Create a builder with a custom prefix.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build a key expression for one measurement of a feed.
    ///
    /// # Example
    /// ```
    /// use datakit_common::keyexpr::KeyExprBuilder;
    /// use datakit_common::point::Category;
    ///
    /// let builder = KeyExprBuilder::new();
    /// let key = builder.build(Category::Metric, "prom/etcd", "etcd_network");
    /// assert_eq!(key, "datakit/metric/prom/etcd/etcd_network");
    /// ```
    pub fn build(&self, category: Category, feed: &str, measurement: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.prefix,
            category.as_str(),
            sanitize(feed),
            sanitize(measurement)
        )
    }

    /// Build a wildcard key expression for everything fed under a category.
    ///
    /// # Example
    /// ```
    /// use datakit_common::keyexpr::KeyExprBuilder;
    /// use datakit_common::point::Category;
    ///
    /// let builder = KeyExprBuilder::new();
    /// assert_eq!(builder.category_wildcard(Category::Logging), "datakit/logging/**");
    /// ```
    pub fn category_wildcard(&self, category: Category) -> String {
        format!("{}/{}/**", self.prefix, category.as_str())
    }

    /// Key for agent status messages.
    pub fn status_key(&self) -> String {
        format!("{}/@/status", self.prefix)
    }

    /// Key for health snapshots.
    pub fn health_key(&self) -> String {
        format!("{}/@/health", self.prefix)
    }

    /// Key for last-error reports.
    pub fn errors_key(&self) -> String {
        format!("{}/@/errors", self.prefix)
    }
}

/// Replace characters that carry meaning in Zenoh key expressions.
fn sanitize(chunk: &str) -> String {
    let trimmed = chunk.trim_matches('/');
    if trimmed.is_empty() {
        return "_".to_string();
    }
    trimmed
        .chars()
        .map(|c| match c {
            '*' | '$' | '?' | '#' | ' ' => '_',
            other => other,
        })
        .collect()
}

/// Parse a key expression into category, feed and measurement.
///
/// Returns `None` if the key expression doesn't match the expected pattern.
pub fn parse_key_expr(key: &str) -> Option<ParsedKeyExpr<'_>> {
    let parts: Vec<&str> = key.split('/').collect();

    if parts.len() < 4 || parts[0] != KEY_PREFIX {
        return None;
    }

    let category = match parts[1] {
        "metric" => Category::Metric,
        "logging" => Category::Logging,
        _ => return None,
    };

    let measurement = parts[parts.len() - 1];
    let feed = parts[2..parts.len() - 1].join("/");

    Some(ParsedKeyExpr {
        category,
        feed,
        measurement,
    })
}

/// Parsed components of a Datakit key expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKeyExpr<'a> {
    pub category: Category,
    pub feed: String,
    pub measurement: &'a str,
}
