//! In-Memory Round Store
//!
//! Rounds and the active pointer behind one `RwLock`, so each conditional
//! write is checked and applied under a single write guard. Contents can be
//! written to and restored from a bincode snapshot file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use async_trait::async_trait;
use serde::{Serialize, Deserialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::game::events::RoundEvent;
use crate::game::state::{Round, RoundId};
use crate::store::{RoundStore, StoreError};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreSnapshot {
    rounds: BTreeMap<RoundId, Round>,
    active: Option<RoundId>,
    latest_number: u64,
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<StoreSnapshot>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `Unavailable` (fault injection).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("store marked unavailable".into()))
        } else {
            Ok(())
        }
    }

    /// Number of stored rounds.
    pub async fn round_count(&self) -> usize {
        self.inner.read().await.rounds.len()
    }

    /// Serialize all rounds and the pointer.
    pub async fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        let inner = self.inner.read().await;
        bincode::serialize(&*inner).map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    /// Rebuild a store from `to_bytes` output.
    pub fn from_bytes(data: &[u8]) -> Result<Self, StoreError> {
        let snapshot: StoreSnapshot =
            bincode::deserialize(data).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self {
            inner: RwLock::new(snapshot),
            unavailable: AtomicBool::new(false),
        })
    }

    /// Write a snapshot file.
    ///
    /// Goes through a sibling temp file and a rename, so a crash mid-write
    /// leaves the previous snapshot intact.
    pub async fn save_snapshot(&self, path: &Path) -> Result<(), StoreError> {
        let bytes = self.to_bytes().await?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| StoreError::Unavailable(format!("write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("rename {}: {}", path.display(), e)))?;
        debug!("Saved store snapshot to {}", path.display());
        Ok(())
    }

    /// Load a snapshot file.
    pub async fn load_snapshot(path: &Path) -> Result<Self, StoreError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("read {}: {}", path.display(), e)))?;
        Self::from_bytes(&bytes)
    }

    /// Save a snapshot after every committed change until the feed closes.
    ///
    /// Every event is a commit, so the file never trails the store by more
    /// than the change being written. Lagging only coalesces saves.
    pub async fn persist_changes(
        self: Arc<Self>,
        mut changes: broadcast::Receiver<RoundEvent>,
        path: PathBuf,
    ) {
        loop {
            match changes.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
            if let Err(e) = self.save_snapshot(&path).await {
                warn!("Snapshot save failed: {}", e);
            }
        }
        if let Err(e) = self.save_snapshot(&path).await {
            warn!("Final snapshot save failed: {}", e);
        }
    }
}

#[async_trait]
impl RoundStore for MemoryStore {
    async fn get(&self, id: RoundId) -> Result<Option<Round>, StoreError> {
        self.check_available()?;
        Ok(self.inner.read().await.rounds.get(&id).cloned())
    }

    async fn active_round_id(&self) -> Result<Option<RoundId>, StoreError> {
        self.check_available()?;
        Ok(self.inner.read().await.active)
    }

    async fn latest_round_number(&self) -> Result<u64, StoreError> {
        self.check_available()?;
        Ok(self.inner.read().await.latest_number)
    }

    async fn insert_active(
        &self,
        mut round: Round,
        expected_active: Option<RoundId>,
    ) -> Result<Round, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.write().await;

        if inner.active != expected_active {
            return Err(StoreError::Conflict("active round pointer changed".into()));
        }
        if inner.rounds.contains_key(&round.id()) {
            return Err(StoreError::Conflict(format!("round {} already exists", round.id())));
        }
        if round.number() <= inner.latest_number {
            return Err(StoreError::Conflict(format!("round number {} already used", round.number())));
        }

        round.set_version(1);
        inner.latest_number = round.number();
        inner.active = Some(round.id());
        inner.rounds.insert(round.id(), round.clone());
        Ok(round)
    }

    async fn update(&self, mut round: Round, expected_version: u64) -> Result<Round, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.write().await;

        let stored = inner
            .rounds
            .get_mut(&round.id())
            .ok_or(StoreError::NotFound(round.id()))?;

        if stored.version() != expected_version {
            return Err(StoreError::Conflict(format!(
                "round {} is at version {}, expected {}",
                round.id(),
                stored.version(),
                expected_version
            )));
        }

        round.set_version(expected_version + 1);
        *stored = round.clone();
        Ok(round)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    use crate::core::geo::GeoPosition;
    use crate::game::state::Zone;

    fn round(number: u64) -> Round {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let zone = Zone::new(GeoPosition::new(0.0, 0.0), 100.0);
        Round::new(RoundId::new_v4(), number, zone, 0, now)
    }

    #[tokio::test]
    async fn test_insert_active_sets_pointer() {
        let store = MemoryStore::new();
        let stored = store.insert_active(round(1), None).await.unwrap();

        assert_eq!(stored.version(), 1);
        assert_eq!(store.active_round_id().await.unwrap(), Some(stored.id()));
        assert_eq!(store.latest_round_number().await.unwrap(), 1);
        assert_eq!(store.get(stored.id()).await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn test_insert_active_rejects_stale_pointer() {
        let store = MemoryStore::new();
        store.insert_active(round(1), None).await.unwrap();

        let err = store.insert_active(round(2), None).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.round_count().await, 1);
    }

    #[tokio::test]
    async fn test_insert_active_rejects_reused_number() {
        let store = MemoryStore::new();
        let first = store.insert_active(round(1), None).await.unwrap();

        let err = store.insert_active(round(1), Some(first.id())).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_is_conditional() {
        let store = MemoryStore::new();
        let stored = store.insert_active(round(1), None).await.unwrap();

        let updated = store.update(stored.clone(), 1).await.unwrap();
        assert_eq!(updated.version(), 2);

        // Second writer still holding version 1 loses
        let err = store.update(stored, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_unknown_round() {
        let store = MemoryStore::new();
        let r = round(1);
        let id = r.id();
        assert_eq!(store.update(r, 0).await.unwrap_err(), StoreError::NotFound(id));
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(store.active_round_id().await, Err(StoreError::Unavailable(_))));

        store.set_unavailable(false);
        assert!(store.active_round_id().await.is_ok());
    }

    #[tokio::test]
    async fn test_snapshot_restore() {
        let store = MemoryStore::new();
        let mut stored = store.insert_active(round(1), None).await.unwrap();
        let now = stored.created_at();
        stored.begin_playing(now).unwrap();
        stored.record_submission("p1".into(), GeoPosition::new(12.5, -40.25), now).unwrap();
        let stored = store.update(stored, 1).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rounds.bin");
        store.save_snapshot(&path).await.unwrap();

        let restored = MemoryStore::load_snapshot(&path).await.unwrap();
        assert_eq!(restored.active_round_id().await.unwrap(), Some(stored.id()));
        assert_eq!(restored.latest_round_number().await.unwrap(), 1);
        assert_eq!(restored.get(stored.id()).await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn test_snapshot_overwrite_leaves_no_temp_file() {
        let store = MemoryStore::new();
        store.insert_active(round(1), None).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rounds.bin");
        store.save_snapshot(&path).await.unwrap();
        store.insert_active(round(2), store.active_round_id().await.unwrap()).await.unwrap();
        store.save_snapshot(&path).await.unwrap();

        assert!(!path.with_extension("tmp").exists());
        let restored = MemoryStore::load_snapshot(&path).await.unwrap();
        assert_eq!(restored.round_count().await, 2);
    }

    #[tokio::test]
    async fn test_changes_persisted_without_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = broadcast::channel(8);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rounds.bin");
        let task = tokio::spawn(store.clone().persist_changes(rx, path.clone()));

        let stored = store.insert_active(round(1), None).await.unwrap();
        tx.send(RoundEvent::round_started(&stored, stored.created_at())).unwrap();

        // Saved while the feed is still open
        let mut restored = None;
        for _ in 0..100 {
            if let Ok(loaded) = MemoryStore::load_snapshot(&path).await {
                restored = Some(loaded);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let restored = restored.expect("snapshot written after first change");
        assert_eq!(restored.active_round_id().await.unwrap(), Some(stored.id()));

        let second = store.insert_active(round(2), Some(stored.id())).await.unwrap();
        drop(tx);
        task.await.unwrap();

        let restored = MemoryStore::load_snapshot(&path).await.unwrap();
        assert_eq!(restored.round_count().await, 2);
        assert_eq!(restored.active_round_id().await.unwrap(), Some(second.id()));
    }
}
