//! Candidate persistence: the store trait, the run-scoped seen-set and
//! the deduplicating writer.

pub mod scylla;

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::NormalizedPlace;

pub use self::scylla::ScyllaCandidateStore;

/// Persistence sink for candidate rows.
///
/// `upsert_candidate` is insert-if-absent: it returns true iff a new
/// row was created and must never overwrite an existing row. That
/// conflict-ignoring insert is the only concurrency guard between
/// chunked instances writing the same external id.
#[async_trait]
pub trait CandidateStore: Send + Sync {
    async fn upsert_candidate(&self, place: &NormalizedPlace) -> Result<bool>;
}

#[async_trait]
impl<S: CandidateStore + ?Sized> CandidateStore for std::sync::Arc<S> {
    async fn upsert_candidate(&self, place: &NormalizedPlace) -> Result<bool> {
        (**self).upsert_candidate(place).await
    }
}

/// Outcome of offering one place to the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// New row created
    Inserted,
    /// Already written earlier in this run, store not touched
    SeenThisRun,
    /// Row already existed in the directory
    AlreadyStored,
}

/// Deduplicating writer in front of a [`CandidateStore`].
///
/// The seen-set lives for the whole run and spans every cell and
/// category, so overlap from the grid or from subdivision never causes
/// duplicate store traffic. It is not persisted; cross-run dedupe is
/// the store's insert-if-absent.
pub struct CandidateWriter<S> {
    store: S,
    seen: HashSet<String>,
    inserted: usize,
    duplicates: usize,
}

impl<S: CandidateStore> CandidateWriter<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            seen: HashSet::new(),
            inserted: 0,
            duplicates: 0,
        }
    }

    pub async fn write(&mut self, place: &NormalizedPlace) -> Result<WriteOutcome> {
        if !self.seen.insert(place.id.clone()) {
            self.duplicates += 1;
            return Ok(WriteOutcome::SeenThisRun);
        }

        if self.store.upsert_candidate(place).await? {
            self.inserted += 1;
            Ok(WriteOutcome::Inserted)
        } else {
            self.duplicates += 1;
            Ok(WriteOutcome::AlreadyStored)
        }
    }

    /// (inserted, duplicates) so far
    pub fn stats(&self) -> (usize, usize) {
        (self.inserted, self.duplicates)
    }
}

#[cfg(test)]
pub mod testutil {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory store for tests; also counts upsert calls.
    #[derive(Default)]
    pub struct MemoryStore {
        pub rows: Mutex<HashMap<String, NormalizedPlace>>,
        pub calls: Mutex<usize>,
    }

    #[async_trait]
    impl CandidateStore for MemoryStore {
        async fn upsert_candidate(&self, place: &NormalizedPlace) -> Result<bool> {
            *self.calls.lock().unwrap() += 1;
            let mut rows = self.rows.lock().unwrap();
            if rows.contains_key(&place.id) {
                return Ok(false);
            }
            rows.insert(place.id.clone(), place.clone());
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::MemoryStore;
    use super::*;
    use crate::models::PlaceState;
    use chrono::Utc;

    fn place(id: &str) -> NormalizedPlace {
        let now = Utc::now();
        NormalizedPlace {
            id: id.to_string(),
            name: "Test".to_string(),
            address: None,
            lat: 51.9,
            lng: 4.4,
            category: "bakery".to_string(),
            source: "overpass".to_string(),
            state: PlaceState::Candidate,
            confidence_score: None,
            first_seen_at: now,
            last_seen_at: now,
        }
    }

    #[tokio::test]
    async fn test_duplicate_in_run_skips_store() {
        let mut writer = CandidateWriter::new(MemoryStore::default());

        assert_eq!(
            writer.write(&place("node/1")).await.unwrap(),
            WriteOutcome::Inserted
        );
        assert_eq!(
            writer.write(&place("node/1")).await.unwrap(),
            WriteOutcome::SeenThisRun
        );

        assert_eq!(*writer.store.calls.lock().unwrap(), 1);
        assert_eq!(writer.stats(), (1, 1));
    }

    #[tokio::test]
    async fn test_existing_row_reported_not_overwritten() {
        let store = MemoryStore::default();
        let mut original = place("node/2");
        original.name = "Original".to_string();
        store.upsert_candidate(&original).await.unwrap();

        let mut writer = CandidateWriter::new(store);
        let mut rediscovered = place("node/2");
        rediscovered.name = "Rediscovered".to_string();

        assert_eq!(
            writer.write(&rediscovered).await.unwrap(),
            WriteOutcome::AlreadyStored
        );
        assert_eq!(
            writer.store.rows.lock().unwrap()["node/2"].name,
            "Original"
        );
    }
}
