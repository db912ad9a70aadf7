//! Creator record storage. Upserts key on platform identifiers so replayed
//! webhook deliveries and overlapping scrapes land on the same record.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use creatorpulse_common::{PlatformIdentifiers, UnifiedCreator};
use creatorpulse_pipeline::CreatorLookup;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[async_trait]
pub trait CreatorStore: Send + Sync {
    /// Insert or replace, keyed by any matching platform identifier.
    async fn upsert(&self, creator: &UnifiedCreator) -> anyhow::Result<UpsertOutcome>;

    async fn find_by_identifiers(
        &self,
        ids: &PlatformIdentifiers,
    ) -> anyhow::Result<Option<UnifiedCreator>>;

    async fn find_by_name(&self, name: &str) -> anyhow::Result<Option<UnifiedCreator>>;

    /// Record the sync state of the run that produced (or failed to
    /// produce) creator data.
    async fn set_sync_state(&self, run_id: &str, state: &str) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct MemoryCreatorStore {
    creators: Mutex<Vec<UnifiedCreator>>,
    sync_states: Mutex<HashMap<String, String>>,
}

impl MemoryCreatorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sync_state(&self, run_id: &str) -> Option<String> {
        self.sync_states
            .lock()
            .expect("creator store lock poisoned")
            .get(run_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.creators.lock().expect("creator store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<UnifiedCreator> {
        self.creators
            .lock()
            .expect("creator store lock poisoned")
            .clone()
    }
}

#[async_trait]
impl CreatorStore for MemoryCreatorStore {
    async fn upsert(&self, creator: &UnifiedCreator) -> anyhow::Result<UpsertOutcome> {
        let mut creators = self.creators.lock().expect("creator store lock poisoned");
        if let Some(existing) = creators
            .iter_mut()
            .find(|c| c.platform_identifiers.matching(&creator.platform_identifiers) > 0)
        {
            *existing = creator.clone();
            Ok(UpsertOutcome::Updated)
        } else {
            creators.push(creator.clone());
            Ok(UpsertOutcome::Created)
        }
    }

    async fn find_by_identifiers(
        &self,
        ids: &PlatformIdentifiers,
    ) -> anyhow::Result<Option<UnifiedCreator>> {
        Ok(self
            .creators
            .lock()
            .expect("creator store lock poisoned")
            .iter()
            .find(|c| c.platform_identifiers.matching(ids) > 0)
            .cloned())
    }

    async fn find_by_name(&self, name: &str) -> anyhow::Result<Option<UnifiedCreator>> {
        let lowered = name.to_lowercase();
        Ok(self
            .creators
            .lock()
            .expect("creator store lock poisoned")
            .iter()
            .find(|c| c.name.to_lowercase() == lowered)
            .cloned())
    }

    async fn set_sync_state(&self, run_id: &str, state: &str) -> anyhow::Result<()> {
        self.sync_states
            .lock()
            .expect("creator store lock poisoned")
            .insert(run_id.to_string(), state.to_string());
        Ok(())
    }
}

#[async_trait]
impl CreatorLookup for MemoryCreatorStore {
    async fn find_by_identifiers(
        &self,
        ids: &PlatformIdentifiers,
    ) -> anyhow::Result<Option<UnifiedCreator>> {
        CreatorStore::find_by_identifiers(self, ids).await
    }

    async fn find_by_name(&self, name: &str) -> anyhow::Result<Option<UnifiedCreator>> {
        CreatorStore::find_by_name(self, name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn creator(name: &str, instagram: &str) -> UnifiedCreator {
        let mut c = UnifiedCreator::named(name, Utc::now());
        c.platform_identifiers = PlatformIdentifiers {
            instagram_username: Some(instagram.to_string()),
            ..Default::default()
        };
        c
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_identifier() {
        let store = MemoryCreatorStore::new();
        let first = creator("Alice", "alice");
        assert_eq!(store.upsert(&first).await.unwrap(), UpsertOutcome::Created);

        let mut second = creator("Alice Updated", "alice");
        second.total_reach = 99;
        assert_eq!(store.upsert(&second).await.unwrap(), UpsertOutcome::Updated);

        assert_eq!(store.len(), 1);
        let found = CreatorStore::find_by_identifiers(&store, &second.platform_identifiers)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.total_reach, 99);
    }

    #[tokio::test]
    async fn name_lookup_is_case_insensitive() {
        let store = MemoryCreatorStore::new();
        store.upsert(&creator("Alice Cooks", "alice")).await.unwrap();
        let found = CreatorStore::find_by_name(&store, "ALICE COOKS")
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn sync_state_recorded_per_run() {
        let store = MemoryCreatorStore::new();
        store.set_sync_state("run-1", "failed").await.unwrap();
        assert_eq!(store.sync_state("run-1").as_deref(), Some("failed"));
        assert_eq!(store.sync_state("run-2"), None);
    }
}
