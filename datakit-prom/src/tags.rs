//! Tag enrichment.
//!
//! Final tags are merged in increasing priority: target tags (global,
//! static, host override), info-promoted labels, sample labels (renamed),
//! then the `instance` tag. Ignored keys and value matches are applied
//! before `instance` is set.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

use regex::Regex;

use crate::config::PromInputConfig;
use crate::error::{PromError, Result};

pub type Tags = BTreeMap<String, String>;

/// Tags computed once per scrape target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlTagSet {
    /// Global and static tags, plus the target host when applicable.
    pub base: Tags,
    /// `host:port` of the target, unless disabled.
    pub instance: Option<String>,
}

/// Turns sample labels into point tags.
#[derive(Debug, Clone)]
pub struct TagEnricher {
    ignore: Vec<String>,
    rename: HashMap<String, String>,
    overwrite: bool,
    kv_match: Vec<(String, Vec<Regex>)>,
}

impl TagEnricher {
    pub fn from_config(config: &PromInputConfig) -> Result<Self> {
        let mut kv_match = Vec::with_capacity(config.ignore_tag_kv_match.len());
        for (key, patterns) in &config.ignore_tag_kv_match {
            let regexes = patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| {
                        PromError::config(format!(
                            "invalid ignore_tag_kv_match pattern '{}' for '{}': {}",
                            p, key, e
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            kv_match.push((key.clone(), regexes));
        }

        Ok(Self {
            ignore: config.tags_ignore.clone(),
            rename: config.tags_rename.mapping.clone(),
            overwrite: config.tags_rename.overwrite_exist_tags,
            kv_match,
        })
    }

    /// Build the tag set of one sample, or `None` if a value match drops it.
    pub fn enrich(
        &self,
        labels: &[(String, String)],
        promoted: &Tags,
        target: &UrlTagSet,
    ) -> Option<Tags> {
        let mut own = promoted.clone();
        for (key, value) in labels {
            own.insert(key.clone(), value.clone());
        }
        self.rename(&mut own, &target.base);

        let mut tags = target.base.clone();
        tags.append(&mut own);

        for key in &self.ignore {
            tags.remove(key);
        }

        if self.dropped(&tags) {
            return None;
        }

        if let Some(instance) = &target.instance {
            // An info-promoted instance survives when overwriting is allowed.
            let keep_promoted = self.overwrite
                && promoted.contains_key("instance")
                && !labels.iter().any(|(k, _)| k == "instance");
            if !keep_promoted {
                tags.insert("instance".to_string(), instance.clone());
            }
        }

        Some(tags)
    }

    /// Tags for points describing the target itself, such as `up`.
    pub fn target_tags(&self, target: &UrlTagSet) -> Tags {
        let mut tags = target.base.clone();
        for key in &self.ignore {
            tags.remove(key);
        }
        if let Some(instance) = &target.instance {
            tags.insert("instance".to_string(), instance.clone());
        }
        tags
    }

    fn rename(&self, own: &mut Tags, base: &Tags) {
        for (old, new) in &self.rename {
            if !own.contains_key(old) {
                continue;
            }
            if !self.overwrite && (own.contains_key(new) || base.contains_key(new)) {
                continue;
            }
            if let Some(value) = own.remove(old) {
                own.insert(new.clone(), value);
            }
        }
    }

    fn dropped(&self, tags: &Tags) -> bool {
        self.kv_match.iter().any(|(key, regexes)| {
            tags.get(key)
                .is_some_and(|value| regexes.iter().any(|re| re.is_match(value)))
        })
    }
}

/// Label sets of `info` samples seen in a scrape.
#[derive(Debug, Clone, Default)]
pub struct InfoIndex {
    entries: Vec<Tags>,
}

impl InfoIndex {
    pub fn add(&mut self, labels: &[(String, String)]) {
        self.entries
            .push(labels.iter().cloned().collect::<Tags>());
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels promoted onto a series.
    ///
    /// An info sample applies when every label key it shares with the
    /// series has the same value. Samples sharing at least one key take
    /// precedence over samples sharing none. Keys the series already
    /// carries are not promoted, and a key offered with different values at
    /// the same precedence is ambiguous and left out.
    pub fn matching(&self, labels: &[(String, String)]) -> Tags {
        let mut anchored = Candidates::default();
        let mut unanchored = Candidates::default();

        for info in &self.entries {
            let mut shared = 0;
            let applies = labels.iter().all(|(k, v)| match info.get(k) {
                Some(iv) => {
                    shared += 1;
                    iv == v
                }
                None => true,
            });
            if !applies {
                continue;
            }

            let slot = if shared > 0 {
                &mut anchored
            } else {
                &mut unanchored
            };
            for (key, value) in info {
                if !labels.iter().any(|(k, _)| k == key) {
                    slot.offer(key, value);
                }
            }
        }

        let mut promoted = unanchored.resolve();
        promoted.retain(|key, _| !anchored.0.contains_key(key));
        promoted.extend(anchored.resolve());
        promoted
    }
}

/// Values offered for each key; `None` once two disagree.
#[derive(Default)]
struct Candidates(BTreeMap<String, Option<String>>);

impl Candidates {
    fn offer(&mut self, key: &str, value: &str) {
        match self.0.get_mut(key) {
            None => {
                self.0.insert(key.to_string(), Some(value.to_string()));
            }
            Some(existing) => {
                if existing.as_deref() != Some(value) {
                    *existing = None;
                }
            }
        }
    }

    fn resolve(self) -> Tags {
        self.0
            .into_iter()
            .filter_map(|(key, value)| Some((key, value?)))
            .collect()
    }
}

/// Whether a target host refers to this machine.
pub fn is_loopback(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}
