//! Endpoint classification
//!
//! Maps a logical endpoint label (usually a request path such as
//! `/users/42/stores`) to an [`EndpointTier`]: the priority it is queued with
//! and how many times a throttled call may be retried.
//!
//! # Matching
//!
//! Every configured key except `"default"` is treated as a substring pattern.
//! When several keys match, the longest key wins; keys of equal length are
//! ordered lexicographically and the smallest wins. When nothing matches the
//! `"default"` tier is returned.
//!
//! ```rust
//! use pacer::classifier::EndpointTable;
//!
//! let table = EndpointTable::default();
//! assert_eq!(table.classify("/users/42").priority, 8);
//! assert_eq!(table.classify("/analytics/daily").priority, 3);
//! assert_eq!(table.classify("/unknown"), table.default_tier());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key of the fallback tier that every table carries.
pub const DEFAULT_KEY: &str = "default";

/// Priority and retry budget assigned to a class of endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointTier {
    /// Higher values are dispatched first.
    pub priority: i32,
    /// Retries allowed after the first throttled attempt.
    pub max_retries: u32,
}

impl EndpointTier {
    /// Tier used when a table is built without an explicit `"default"` entry.
    pub const FALLBACK: EndpointTier = EndpointTier {
        priority: 5,
        max_retries: 2,
    };

    pub const fn new(priority: i32, max_retries: u32) -> Self {
        Self {
            priority,
            max_retries,
        }
    }
}

/// Built-in tiers for the CRM API surface.
const BUILTIN_TIERS: &[(&str, EndpointTier)] = &[
    ("/auth", EndpointTier::new(10, 1)),
    ("/users", EndpointTier::new(8, 2)),
    ("/stores", EndpointTier::new(7, 3)),
    ("/leads", EndpointTier::new(6, 3)),
    ("/calendar", EndpointTier::new(5, 3)),
    ("/integrations", EndpointTier::new(4, 2)),
    ("/analytics", EndpointTier::new(3, 2)),
    (DEFAULT_KEY, EndpointTier::FALLBACK),
];

/// Substring-keyed endpoint tiers.
///
/// A table always contains a `"default"` entry. Tables deserialized without
/// one get [`EndpointTier::FALLBACK`] inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, EndpointTier>", into = "BTreeMap<String, EndpointTier>")]
pub struct EndpointTable {
    tiers: BTreeMap<String, EndpointTier>,
}

impl Default for EndpointTable {
    fn default() -> Self {
        BUILTIN_TIERS
            .iter()
            .map(|(key, tier)| (key.to_string(), *tier))
            .collect::<BTreeMap<_, _>>()
            .into()
    }
}

impl From<BTreeMap<String, EndpointTier>> for EndpointTable {
    fn from(mut tiers: BTreeMap<String, EndpointTier>) -> Self {
        tiers
            .entry(DEFAULT_KEY.to_string())
            .or_insert(EndpointTier::FALLBACK);
        Self { tiers }
    }
}

impl From<EndpointTable> for BTreeMap<String, EndpointTier> {
    fn from(table: EndpointTable) -> Self {
        table.tiers
    }
}

impl EndpointTable {
    /// A table holding only the fallback tier.
    pub fn with_default(tier: EndpointTier) -> Self {
        let mut tiers = BTreeMap::new();
        tiers.insert(DEFAULT_KEY.to_string(), tier);
        Self { tiers }
    }

    /// Resolve the tier for an endpoint label.
    pub fn classify(&self, endpoint: &str) -> EndpointTier {
        self.matching_key(endpoint)
            .and_then(|key| self.get(key))
            .unwrap_or_else(|| self.default_tier())
    }

    /// The key that decides `endpoint`'s tier, or `None` for the fallback.
    pub fn matching_key(&self, endpoint: &str) -> Option<&str> {
        self.tiers
            .keys()
            .filter(|key| {
                !key.is_empty() && key.as_str() != DEFAULT_KEY && endpoint.contains(key.as_str())
            })
            .max_by(|a, b| a.len().cmp(&b.len()).then_with(|| b.cmp(a)))
            .map(String::as_str)
    }

    /// The fallback tier.
    pub fn default_tier(&self) -> EndpointTier {
        self.tiers
            .get(DEFAULT_KEY)
            .copied()
            .unwrap_or(EndpointTier::FALLBACK)
    }

    /// Insert or replace a single tier.
    pub fn insert(&mut self, key: impl Into<String>, tier: EndpointTier) {
        self.tiers.insert(key.into(), tier);
    }

    /// Overwrite the tiers named in `other`; every other key is kept.
    pub fn merge<I, K>(&mut self, other: I)
    where
        I: IntoIterator<Item = (K, EndpointTier)>,
        K: Into<String>,
    {
        for (key, tier) in other {
            self.tiers.insert(key.into(), tier);
        }
    }

    pub fn get(&self, key: &str) -> Option<EndpointTier> {
        self.tiers.get(key).copied()
    }

    /// Number of entries, including `"default"`.
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// Whether the table has no entries. Every constructor inserts the
    /// fallback tier, so a table built through this API is never empty.
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, EndpointTier)> {
        self.tiers.iter().map(|(key, tier)| (key.as_str(), *tier))
    }
}
