//! Ordered, per-version classification rule tables
//!
//! A [`RuleTable`] is an immutable list of [`EventMatch`] rules for one
//! cluster minor version. Matching is first-hit in declaration order, so
//! rules with a specific message pattern must precede catch-alls sharing
//! the same reason.

use std::collections::HashMap;

use regex::Regex;

use crate::error::{EngineError, Result};
use crate::models::{EventSourceKind, NormalizedEvent};

/// Builds the human-readable detail for a matched event
pub type DetailFn = fn(&NormalizedEvent) -> String;

/// Uncompiled rule declaration
#[derive(Clone, Copy)]
pub struct RuleSpec {
    pub source: EventSourceKind,
    pub reason: &'static str,
    pub pattern: &'static str,
    pub summary: &'static str,
    pub detail: DetailFn,
    pub primary: bool,
}

/// Compiled classification rule
#[derive(Clone)]
pub struct EventMatch {
    pub source: EventSourceKind,
    pub reason: String,
    pub message: Regex,
    pub summary: String,
    pub detail: DetailFn,
    pub primary: bool,
}

impl std::fmt::Debug for EventMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventMatch")
            .field("source", &self.source)
            .field("reason", &self.reason)
            .field("message", &self.message.as_str())
            .field("summary", &self.summary)
            .field("primary", &self.primary)
            .finish()
    }
}

impl EventMatch {
    pub fn matches(&self, event: &NormalizedEvent) -> bool {
        self.source == event.source
            && self.reason == event.reason
            && self.message.is_match(&event.message)
    }
}

/// Result of classifying one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub summary: String,
    pub detail: String,
    pub primary: bool,
}

/// Immutable ordered rule list for a single cluster version
#[derive(Debug, Clone)]
pub struct RuleTable {
    version: String,
    rules: Vec<EventMatch>,
}

impl RuleTable {
    /// Compile a rule table. Fails on the first invalid pattern.
    pub fn new(version: impl Into<String>, specs: &[RuleSpec]) -> Result<Self> {
        let version = version.into();
        let rules = specs
            .iter()
            .map(|spec| {
                let message = Regex::new(spec.pattern).map_err(|source| EngineError::InvalidRule {
                    version: version.clone(),
                    reason: spec.reason.to_string(),
                    source,
                })?;
                Ok(EventMatch {
                    source: spec.source,
                    reason: spec.reason.to_string(),
                    message,
                    summary: spec.summary.to_string(),
                    detail: spec.detail,
                    primary: spec.primary,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { version, rules })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[EventMatch] {
        &self.rules
    }

    /// First matching rule wins
    pub fn classify(&self, event: &NormalizedEvent) -> Option<Classification> {
        self.rules
            .iter()
            .find(|rule| rule.matches(event))
            .map(|rule| Classification {
                summary: rule.summary.clone(),
                detail: (rule.detail)(event),
                primary: rule.primary,
            })
    }
}

/// Rule tables keyed by cluster minor version (`"1.28"`)
#[derive(Debug, Clone, Default)]
pub struct RuleBook {
    tables: HashMap<String, RuleTable>,
}

impl RuleBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table, replacing any previous table for the same version
    pub fn insert(&mut self, table: RuleTable) {
        self.tables.insert(table.version.clone(), table);
    }

    pub fn table(&self, version: &str) -> Option<&RuleTable> {
        normalize_version(version).and_then(|v| self.tables.get(&v))
    }

    pub fn versions(&self) -> Vec<&str> {
        let mut versions: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        versions.sort_unstable();
        versions
    }

    /// Classify against the table for `version`; unknown versions never match
    pub fn classify(&self, version: &str, event: &NormalizedEvent) -> Option<Classification> {
        self.table(version)?.classify(event)
    }
}

/// Reduce a server version string to `major.minor`
///
/// Accepts `1.28`, `v1.28.3`, `v1.28.3-eks-1` and GKE-style `1.28+`.
pub fn normalize_version(version: &str) -> Option<String> {
    let trimmed = version.trim().trim_start_matches('v');
    let mut parts = trimmed.split('.');
    let major = leading_digits(parts.next()?)?;
    let minor = leading_digits(parts.next()?)?;
    Some(format!("{major}.{minor}"))
}

fn leading_digits(part: &str) -> Option<&str> {
    let end = part
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(part.len());
    if end == 0 {
        None
    } else {
        Some(&part[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SeverityBucket;
    use chrono::Utc;

    fn plain_detail(event: &NormalizedEvent) -> String {
        event.message.clone()
    }

    fn event(source: EventSourceKind, reason: &str, message: &str) -> NormalizedEvent {
        NormalizedEvent {
            pod_name: "api-0".to_string(),
            pod_namespace: "default".to_string(),
            source,
            reason: reason.to_string(),
            message: message.to_string(),
            exit_code: None,
            severity: SeverityBucket::Critical,
            timestamp: Utc::now(),
            owner: None,
            chart_name: None,
            release_name: None,
        }
    }

    const SPECS: &[RuleSpec] = &[
        RuleSpec {
            source: EventSourceKind::Event,
            reason: "Unhealthy",
            pattern: "^Liveness",
            summary: "liveness",
            detail: plain_detail,
            primary: true,
        },
        RuleSpec {
            source: EventSourceKind::Event,
            reason: "Unhealthy",
            pattern: ".*",
            summary: "catch-all",
            detail: plain_detail,
            primary: false,
        },
    ];

    #[test]
    fn test_first_match_wins() {
        let table = RuleTable::new("1.28", SPECS).unwrap();

        let hit = table
            .classify(&event(EventSourceKind::Event, "Unhealthy", "Liveness probe failed"))
            .unwrap();
        assert_eq!(hit.summary, "liveness");
        assert!(hit.primary);

        let fallback = table
            .classify(&event(EventSourceKind::Event, "Unhealthy", "Readiness probe failed"))
            .unwrap();
        assert_eq!(fallback.summary, "catch-all");
        assert!(!fallback.primary);
    }

    #[test]
    fn test_source_and_reason_must_match() {
        let table = RuleTable::new("1.28", SPECS).unwrap();

        assert!(table
            .classify(&event(EventSourceKind::Pod, "Unhealthy", "Liveness probe failed"))
            .is_none());
        assert!(table
            .classify(&event(EventSourceKind::Event, "unhealthy", "Liveness probe failed"))
            .is_none());
    }

    #[test]
    fn test_invalid_pattern_fails_construction() {
        let bad = [RuleSpec {
            pattern: "(unclosed",
            ..SPECS[0]
        }];

        let err = RuleTable::new("1.28", &bad).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRule { .. }));
    }

    #[test]
    fn test_missing_version_never_matches() {
        let mut book = RuleBook::new();
        book.insert(RuleTable::new("1.28", SPECS).unwrap());

        let e = event(EventSourceKind::Event, "Unhealthy", "Liveness probe failed");
        assert!(book.classify("v1.28.4", &e).is_some());
        assert!(book.classify("1.19", &e).is_none());
        assert!(book.classify("garbage", &e).is_none());
    }

    #[test]
    fn test_normalize_version() {
        assert_eq!(normalize_version("1.28").as_deref(), Some("1.28"));
        assert_eq!(normalize_version("v1.29.3").as_deref(), Some("1.29"));
        assert_eq!(normalize_version("v1.27.9-eks-5e0fdde").as_deref(), Some("1.27"));
        assert_eq!(normalize_version("1.30+").as_deref(), Some("1.30"));
        assert_eq!(normalize_version("latest"), None);
        assert_eq!(normalize_version("1"), None);
    }
}
