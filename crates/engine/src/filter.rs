//! Title filters.
//!
//! A subscription's filters are compiled once per task run. A filter that
//! fails to compile is dropped from the active set; the rest of the
//! subscription keeps working.

use regex::{Regex, RegexBuilder};

use noticat_common::types::{FilterKind, SubscriptionFilter};

/// A filter ready for matching.
#[derive(Debug, Clone)]
pub enum CompiledFilter {
    /// Substring match. `needle` is already lower-cased when `ignore_case` is set.
    Keyword { needle: String, ignore_case: bool },
    /// Unanchored regex search; case-insensitivity lives in the compiled pattern.
    Regex(Regex),
}

impl CompiledFilter {
    pub fn compile(filter: &SubscriptionFilter) -> Result<Self, regex::Error> {
        match filter.kind {
            FilterKind::Keyword => Ok(Self::keyword(&filter.pattern, filter.ignore_case)),
            FilterKind::Regex => Self::regex(&filter.pattern, filter.ignore_case),
        }
    }

    pub fn keyword(pattern: &str, ignore_case: bool) -> Self {
        let needle = if ignore_case {
            pattern.to_lowercase()
        } else {
            pattern.to_string()
        };
        Self::Keyword {
            needle,
            ignore_case,
        }
    }

    pub fn regex(pattern: &str, ignore_case: bool) -> Result<Self, regex::Error> {
        let re = RegexBuilder::new(pattern)
            .case_insensitive(ignore_case)
            .build()?;
        Ok(Self::Regex(re))
    }

    pub fn matches(&self, title: &str) -> bool {
        match self {
            Self::Keyword {
                needle,
                ignore_case: true,
            } => title.to_lowercase().contains(needle.as_str()),
            Self::Keyword { needle, .. } => title.contains(needle.as_str()),
            Self::Regex(re) => re.is_match(title),
        }
    }
}

/// The active filters of one subscription, combined with logical OR.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    filters: Vec<CompiledFilter>,
}

impl FilterSet {
    /// Compile every filter, silently dropping the ones that fail.
    pub fn compile(filters: &[SubscriptionFilter]) -> Self {
        let filters = filters
            .iter()
            .filter_map(|f| match CompiledFilter::compile(f) {
                Ok(compiled) => Some(compiled),
                Err(e) => {
                    tracing::debug!(
                        filter_id = %f.id,
                        pattern = %f.pattern,
                        error = %e,
                        "Dropping filter that does not compile"
                    );
                    None
                }
            })
            .collect();
        Self { filters }
    }

    /// An empty set matches everything; otherwise the first matching filter wins.
    pub fn matches(&self, title: &str) -> bool {
        self.filters.is_empty() || self.filters.iter().any(|f| f.matches(title))
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl From<Vec<CompiledFilter>> for FilterSet {
    fn from(filters: Vec<CompiledFilter>) -> Self {
        Self { filters }
    }
}
