//! Duplicate detection against already-stored creators: exact match on any
//! platform identifier first, case-insensitive name match as a weaker
//! fallback.

use async_trait::async_trait;
use creatorpulse_common::{PlatformIdentifiers, UnifiedCreator};
use serde::Serialize;

/// Read access to stored creators, narrowed to what dedup needs.
#[async_trait]
pub trait CreatorLookup: Send + Sync {
    /// Find a record sharing any of the given identifiers.
    async fn find_by_identifiers(
        &self,
        ids: &PlatformIdentifiers,
    ) -> anyhow::Result<Option<UnifiedCreator>>;

    /// Case-insensitive exact name lookup.
    async fn find_by_name(&self, name: &str) -> anyhow::Result<Option<UnifiedCreator>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    Exact,
    Fuzzy,
}

#[derive(Debug, Clone)]
pub struct DuplicateMatch {
    pub existing: UnifiedCreator,
    /// Exact: matched identifiers / identifiers present on the candidate.
    /// Fuzzy name matches sit at 0.5.
    pub confidence: f64,
    pub strategy: MatchStrategy,
}

/// Look for a stored duplicate of `candidate`.
pub async fn detect_duplicate<L: CreatorLookup + ?Sized>(
    lookup: &L,
    candidate: &UnifiedCreator,
) -> anyhow::Result<Option<DuplicateMatch>> {
    let present = candidate.platform_identifiers.present();
    if !present.is_empty() {
        if let Some(existing) = lookup
            .find_by_identifiers(&candidate.platform_identifiers)
            .await?
        {
            let matched = existing
                .platform_identifiers
                .matching(&candidate.platform_identifiers);
            let confidence = matched as f64 / present.len() as f64;
            return Ok(Some(DuplicateMatch {
                existing,
                confidence,
                strategy: MatchStrategy::Exact,
            }));
        }
    }

    if let Some(existing) = lookup.find_by_name(&candidate.name).await? {
        return Ok(Some(DuplicateMatch {
            existing,
            confidence: 0.5,
            strategy: MatchStrategy::Fuzzy,
        }));
    }

    Ok(None)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// In-memory lookup for pipeline tests.
    pub struct MemoryLookup {
        pub creators: Mutex<Vec<UnifiedCreator>>,
    }

    impl MemoryLookup {
        pub fn new(creators: Vec<UnifiedCreator>) -> Self {
            Self {
                creators: Mutex::new(creators),
            }
        }
    }

    #[async_trait]
    impl CreatorLookup for MemoryLookup {
        async fn find_by_identifiers(
            &self,
            ids: &PlatformIdentifiers,
        ) -> anyhow::Result<Option<UnifiedCreator>> {
            Ok(self
                .creators
                .lock()
                .expect("lookup lock poisoned")
                .iter()
                .find(|c| c.platform_identifiers.matching(ids) > 0)
                .cloned())
        }

        async fn find_by_name(&self, name: &str) -> anyhow::Result<Option<UnifiedCreator>> {
            let lowered = name.to_lowercase();
            Ok(self
                .creators
                .lock()
                .expect("lookup lock poisoned")
                .iter()
                .find(|c| c.name.to_lowercase() == lowered)
                .cloned())
        }
    }
}
