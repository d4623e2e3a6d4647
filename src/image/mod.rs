//! Partitioned image: versioned multi-slot persistence of the locally stored
//! partitions.
//!
//! An image is made of `S` slots. Each save writes every local partition
//! into the slot after the current one and only then persists that slot's
//! signature record carrying a bumped version, so a crash at any point leaves
//! the previous slot as the highest fully recorded version.

mod signature;
mod slot;

use std::path::Path;
use std::sync::Arc;

use crate::tasks::{Task, TaskExecutor};
use crate::utils::KeeperError;

pub use signature::{
    compute_signature, select_current_slot, ImageSignature, PartitionId,
};
pub use slot::{FileImageSlot, ImageStorage, LocalStore, MemStore};

use async_trait::async_trait;

use futures::future::try_join_all;

use bytes::Bytes;

use tokio::sync::{Mutex, MutexGuard};

/// Configuration parameters struct.
#[derive(Debug, Clone)]
pub struct ImageConfig {
    /// Root directory holding one sub-directory per slot.
    pub image_dir: String,

    /// Number of slots to rotate among.
    pub num_slots: usize,

    /// Total number of partitions across all servers.
    pub total_partitions: u32,

    /// Number of servers partitions are spread over.
    pub server_count: u32,

    /// ID of this server.
    pub server_id: u32,
}

#[allow(clippy::derivable_impls)]
impl Default for ImageConfig {
    fn default() -> Self {
        ImageConfig {
            image_dir: "/tmp/partkeeper.image".into(),
            num_slots: 2,
            total_partitions: 16,
            server_count: 1,
            server_id: 0,
        }
    }
}

impl ImageConfig {
    /// Parses config from an optional TOML string and validates it.
    pub fn parse(config_str: Option<&str>) -> Result<Self, KeeperError> {
        let config = parsed_config!(config_str => ImageConfig;
                                    image_dir, num_slots, total_partitions,
                                    server_count, server_id)?;
        if config.num_slots < 2 {
            return logged_err!("invalid config.num_slots '{}'", config.num_slots);
        }
        if config.server_count == 0 {
            return logged_err!(
                "invalid config.server_count '{}'",
                config.server_count
            );
        }
        if config.server_id >= config.server_count {
            return logged_err!(
                "invalid config.server_id '{}' for server_count {}",
                config.server_id,
                config.server_count
            );
        }
        Ok(config)
    }

    /// Partitions stored on this server.
    pub fn local_partitions(&self) -> Vec<PartitionId> {
        (0..self.total_partitions)
            .filter(|p| p % self.server_count == self.server_id)
            .collect()
    }
}

/// Mutable state of an image, guarded by one async mutex so that loads and
/// saves never interleave.
#[derive(Debug, Default)]
struct ImageState {
    /// Signature records of all slots, loaded lazily once.
    signatures: Option<Vec<ImageSignature>>,

    /// Index of the current slot, if calculated.
    current: Option<usize>,
}

/// Partitioned image over a set of slots.
pub struct PartitionedImage {
    /// Partitions stored on this server.
    local_partitions: Vec<PartitionId>,

    /// Slot storage backends; index is the slot number.
    slots: Vec<Arc<dyn ImageStorage>>,

    /// Owner of the live partition data.
    store: Arc<dyn LocalStore>,

    /// Signature cache and current slot pointer.
    state: Mutex<ImageState>,
}

impl PartitionedImage {
    /// Creates an image over given slot backends.
    pub fn new_with_slots(
        local_partitions: Vec<PartitionId>,
        slots: Vec<Arc<dyn ImageStorage>>,
        store: Arc<dyn LocalStore>,
    ) -> Result<Self, KeeperError> {
        if slots.len() < 2 {
            return logged_err!("invalid number of image slots {}", slots.len());
        }

        Ok(PartitionedImage {
            local_partitions,
            slots,
            store,
            state: Mutex::new(ImageState::default()),
        })
    }

    /// Creates an image with file-backed slots `<image_dir>/slot-<i>`.
    pub async fn new_file_backed(
        config_str: Option<&str>,
        store: Arc<dyn LocalStore>,
    ) -> Result<Self, KeeperError> {
        let config = ImageConfig::parse(config_str)?;

        let mut slots: Vec<Arc<dyn ImageStorage>> =
            Vec::with_capacity(config.num_slots);
        for i in 0..config.num_slots {
            let dir = Path::new(&config.image_dir).join(format!("slot-{}", i));
            slots.push(Arc::new(FileImageSlot::new_and_setup(&dir).await?));
        }

        Self::new_with_slots(config.local_partitions(), slots, store)
    }

    #[inline]
    pub fn local_partitions(&self) -> &[PartitionId] {
        &self.local_partitions
    }

    #[inline]
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// Opaque storage handle of given slot.
    pub fn slot_handle(&self, slot: usize) -> Option<String> {
        self.slots.get(slot).map(|s| s.handle())
    }

    /// Current slot as of the last calculation, without touching storage.
    pub async fn current_slot(&self) -> Option<usize> {
        self.state.lock().await.current
    }

    /// Versions of all slots, loading signature records if not cached yet.
    pub async fn slot_versions(&self) -> Result<Vec<Option<u64>>, KeeperError> {
        let mut state = self.state.lock().await;
        Ok(self
            .cached_signatures(&mut state)
            .await?
            .iter()
            .map(|rec| rec.version)
            .collect())
    }

    /// Calculates the current slot: the one holding the highest version,
    /// ties going to the highest slot index.
    pub async fn calculate_current_slot(&self) -> Result<usize, KeeperError> {
        let mut state = self.state.lock().await;
        self.calculate_current_locked(&mut state).await
    }

    /// Restores all local partitions from the current slot. Returns `false`
    /// (after logging a fatal error) if anything fails to verify or restore,
    /// in which case nothing has been restored.
    pub async fn load_local_storage(&self) -> bool {
        let mut state = self.state.lock().await;
        match self.load_locked(&mut state).await {
            Ok(Some((slot, version))) => {
                pf_info!(
                    "loaded {} partitions from slot {} version {}",
                    self.local_partitions.len(),
                    slot,
                    version
                );
                true
            }
            Ok(None) => true,
            Err(e) => {
                pf_fatal!("failed to load local storage: {}", e);
                false
            }
        }
    }

    /// Saves all local partitions into the next slot as a new version.
    /// Returns `false` (after logging) on failure, in which case the
    /// previous slot stays current.
    pub async fn save_local_storage(&self) -> bool {
        let mut state = self.state.lock().await;
        match self.save_locked(&mut state).await {
            Ok((slot, version)) => {
                pf_info!(
                    "saved {} partitions to slot {} version {}",
                    self.local_partitions.len(),
                    slot,
                    version
                );
                true
            }
            Err(e) => {
                pf_error!("failed to save local storage: {}", e);
                false
            }
        }
    }

    /// Returns the cached signature records, loading them from all slots
    /// concurrently on first use.
    async fn cached_signatures<'s>(
        &self,
        state: &'s mut ImageState,
    ) -> Result<&'s Vec<ImageSignature>, KeeperError> {
        if state.signatures.is_none() {
            let records = try_join_all(
                self.slots.iter().map(|slot| slot.load_signature_record()),
            )
            .await?;
            pf_debug!(
                "loaded signature records of {} slots: {:?}",
                records.len(),
                records.iter().map(|rec| rec.version).collect::<Vec<_>>()
            );
            state.signatures = Some(records);
        }

        match state.signatures.as_ref() {
            Some(records) => Ok(records),
            None => logged_err!("signature records not loaded"),
        }
    }

    async fn calculate_current_locked(
        &self,
        state: &mut ImageState,
    ) -> Result<usize, KeeperError> {
        let versions: Vec<Option<u64>> = self
            .cached_signatures(state)
            .await?
            .iter()
            .map(|rec| rec.version)
            .collect();
        let current = match select_current_slot(&versions) {
            Some(current) => current,
            None => return logged_err!("no image slots to select from"),
        };
        state.current = Some(current);
        Ok(current)
    }

    /// Verifies every local partition of the current slot, then restores
    /// them all. Returns the slot and version loaded, or `None` if the image
    /// has never been written.
    async fn load_locked(
        &self,
        state: &mut ImageState,
    ) -> Result<Option<(usize, u64)>, KeeperError> {
        let current = self.calculate_current_locked(state).await?;
        let record = &self.cached_signatures(state).await?[current];
        let version = match record.version {
            Some(version) => version,
            None => {
                pf_warn!("image is empty, nothing to load");
                return Ok(None);
            }
        };

        let payloads = self.verified_payloads(current, record).await?;
        // all verified; only now touch the live store
        self.restore_payloads(payloads).await?;

        Ok(Some((current, version)))
    }

    /// Reads every local partition from given slot and checks it against
    /// `record`. Fails on the first missing entry or mismatch.
    async fn verified_payloads(
        &self,
        slot_idx: usize,
        record: &ImageSignature,
    ) -> Result<Vec<(PartitionId, Bytes)>, KeeperError> {
        let slot = &self.slots[slot_idx];
        try_join_all(self.local_partitions.iter().map(|&partition| async move {
            let data = slot.load_partition(partition).await?;
            let expected = match record.signature_of(partition) {
                Some(sig) => sig,
                None => {
                    return Err(KeeperError::msg(format!(
                        "partition {} missing from slot {} record",
                        partition, slot_idx
                    )))
                }
            };
            if compute_signature(&data) != expected {
                return Err(KeeperError::msg(format!(
                    "partition {} signature mismatch in slot {}",
                    partition, slot_idx
                )));
            }
            Ok::<_, KeeperError>((partition, data))
        }))
        .await
    }

    async fn restore_payloads(
        &self,
        payloads: Vec<(PartitionId, Bytes)>,
    ) -> Result<(), KeeperError> {
        try_join_all(
            payloads
                .into_iter()
                .map(|(partition, data)| self.store.restore_partition(partition, data)),
        )
        .await?;
        Ok(())
    }

    /// Saves all local partitions into the next slot and keeps the image
    /// locked on that slot until the returned lease is dropped, so the slot
    /// can be shipped elsewhere while no other save or load runs.
    pub async fn save_and_hold(&self) -> Result<SlotLease<'_>, KeeperError> {
        let mut state = self.state.lock().await;
        let (slot, version) = self.save_locked(&mut state).await?;
        pf_info!("saved slot {} version {} for shipping", slot, version);
        Ok(SlotLease {
            image: self,
            state,
            slot,
        })
    }

    /// Locks the image on the slot after the current one, to be filled from
    /// elsewhere and then installed through `SlotLease::install`. The current
    /// slot stays untouched until then.
    pub async fn hold_next_slot(&self) -> Result<SlotLease<'_>, KeeperError> {
        let mut state = self.state.lock().await;
        let current = self.calculate_current_locked(&mut state).await?;
        Ok(SlotLease {
            image: self,
            state,
            slot: (current + 1) % self.slots.len(),
        })
    }

    /// Writes all local partitions into the slot after the current one and
    /// records the new version. Returns the slot and version saved.
    async fn save_locked(
        &self,
        state: &mut ImageState,
    ) -> Result<(usize, u64), KeeperError> {
        let current = self.calculate_current_locked(state).await?;
        let prev_version = self.cached_signatures(state).await?[current].version;
        let next = (current + 1) % self.slots.len();

        let slot = &self.slots[next];
        let store = &self.store;
        let signatures =
            try_join_all(self.local_partitions.iter().map(|&partition| async move {
                let data = store.dump_partition(partition).await?;
                let sig = slot.save_partition(partition, data).await?;
                Ok::<_, KeeperError>((partition, sig))
            }))
            .await?;

        let record =
            ImageSignature::next_of(prev_version, signatures.into_iter().collect());
        slot.save_signature_record(&record).await?;

        // record is durable; the new slot becomes current
        let version = record.version.unwrap_or_default();
        if let Some(records) = state.signatures.as_mut() {
            records[next] = record;
        }
        state.current = Some(next);
        Ok((next, version))
    }
}

/// Exclusive hold on one slot of an image. No load or save of the same image
/// runs while a lease is alive.
pub struct SlotLease<'a> {
    image: &'a PartitionedImage,
    state: MutexGuard<'a, ImageState>,
    slot: usize,
}

impl<'a> SlotLease<'a> {
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    #[inline]
    pub fn handle(&self) -> String {
        self.storage().handle()
    }

    #[inline]
    pub fn storage(&self) -> &dyn ImageStorage {
        self.image.slots[self.slot].as_ref()
    }

    /// Makes the held slot current after it has been filled externally. Every
    /// local partition is verified against the slot's record first; the
    /// record is then rewritten with a version above all others, and only
    /// after that are the partitions restored into the local store. On a
    /// failed verification the slot is marked empty and the previous current
    /// slot stays.
    pub async fn install(mut self) -> Result<u64, KeeperError> {
        let image = self.image;
        let slot = self.slot;
        let storage = &image.slots[slot];

        let filled = storage.load_signature_record().await?;
        let verified = if filled.version.is_none() {
            Err(KeeperError::msg(format!(
                "slot {} holds no record to install",
                slot
            )))
        } else {
            image.verified_payloads(slot, &filled).await
        };
        let payloads = match verified {
            Ok(payloads) => payloads,
            Err(e) => {
                pf_error!("install of slot {} rejected: {}", slot, e);
                let empty = ImageSignature::empty();
                storage.save_signature_record(&empty).await?;
                if let Some(records) = self.state.signatures.as_mut() {
                    records[slot] = empty;
                }
                return Err(e);
            }
        };

        let top = image
            .cached_signatures(&mut self.state)
            .await?
            .iter()
            .filter_map(|rec| rec.version)
            .max();
        let record = ImageSignature::next_of(top, filled.signatures);
        storage.save_signature_record(&record).await?;

        let version = record.version.unwrap_or_default();
        if let Some(records) = self.state.signatures.as_mut() {
            records[slot] = record;
        }
        self.state.current = Some(slot);

        image.restore_payloads(payloads).await?;
        pf_info!("installed slot {} as version {}", slot, version);
        Ok(version)
    }
}

/// Task executor running persisted-save tasks against an image. Combine it
/// with replication executors through a `TaskRouter` to share one queue.
pub struct PersistedSaveExecutor {
    image: Arc<PartitionedImage>,
}

impl PersistedSaveExecutor {
    pub fn new(image: Arc<PartitionedImage>) -> Self {
        PersistedSaveExecutor { image }
    }
}

#[async_trait]
impl TaskExecutor for PersistedSaveExecutor {
    async fn execute(&self, task: &Task) -> Result<(), KeeperError> {
        match task {
            Task::PersistedSave => {
                if self.image.save_local_storage().await {
                    Ok(())
                } else {
                    logged_err!("persisted save failed")
                }
            }
            _ => logged_err!("unsupported task {}", task),
        }
    }
}

#[cfg(test)]
pub(crate) mod image_tests {
    use super::*;
    use crate::tasks::{LocalTaskQueue, TaskQueue, TaskRouter, TaskTag};

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::fs;

    /// In-memory slot with fault injection on the signature record write.
    #[derive(Default)]
    pub(crate) struct MemSlot {
        name: String,
        partitions: Mutex<HashMap<PartitionId, Bytes>>,
        record: Mutex<ImageSignature>,
        fail_record: AtomicBool,
    }

    impl MemSlot {
        pub(crate) fn new(name: &str) -> Arc<Self> {
            Arc::new(MemSlot {
                name: name.into(),
                ..Default::default()
            })
        }

        pub(crate) fn fail_record_writes(&self, fail: bool) {
            self.fail_record.store(fail, Ordering::SeqCst);
        }

        pub(crate) async fn tamper(&self, partition: PartitionId, data: &'static [u8]) {
            self.partitions
                .lock()
                .await
                .insert(partition, Bytes::from_static(data));
        }

        pub(crate) async fn set_record(&self, record: ImageSignature) {
            *self.record.lock().await = record;
        }

        pub(crate) async fn record(&self) -> ImageSignature {
            self.record.lock().await.clone()
        }
    }

    #[async_trait]
    impl ImageStorage for MemSlot {
        async fn load_partition(
            &self,
            partition: PartitionId,
        ) -> Result<Bytes, KeeperError> {
            match self.partitions.lock().await.get(&partition) {
                Some(data) => Ok(data.clone()),
                None => Err(KeeperError::msg(format!(
                    "partition {} not in {}",
                    partition, self.name
                ))),
            }
        }

        async fn save_partition(
            &self,
            partition: PartitionId,
            data: Bytes,
        ) -> Result<String, KeeperError> {
            let sig = compute_signature(&data);
            self.partitions.lock().await.insert(partition, data);
            Ok(sig)
        }

        async fn load_signature_record(
            &self,
        ) -> Result<ImageSignature, KeeperError> {
            Ok(self.record().await)
        }

        async fn save_signature_record(
            &self,
            record: &ImageSignature,
        ) -> Result<(), KeeperError> {
            if self.fail_record.load(Ordering::SeqCst) {
                return Err(KeeperError::msg("injected record write failure"));
            }
            self.set_record(record.clone()).await;
            Ok(())
        }

        fn handle(&self) -> String {
            self.name.clone()
        }
    }

    pub(crate) fn mem_slots(n: usize) -> Vec<Arc<MemSlot>> {
        (0..n).map(|i| MemSlot::new(&format!("mem-{}", i))).collect()
    }

    pub(crate) fn as_storages(slots: &[Arc<MemSlot>]) -> Vec<Arc<dyn ImageStorage>> {
        slots
            .iter()
            .map(|s| s.clone() as Arc<dyn ImageStorage>)
            .collect()
    }

    pub(crate) async fn filled_store(
        partitions: &[PartitionId],
        tag: &str,
    ) -> Arc<MemStore> {
        let store = Arc::new(MemStore::new());
        for &p in partitions {
            store
                .put(p, Bytes::from(format!("{}-partition-{}", tag, p)))
                .await;
        }
        store
    }

    async fn scratch_dir(name: &str) -> Result<String, KeeperError> {
        let dir = format!("/tmp/partkeeper-test-image-{}", name);
        if fs::try_exists(&dir).await? {
            fs::remove_dir_all(&dir).await?;
        }
        Ok(dir)
    }

    #[test]
    fn config_validation() -> Result<(), KeeperError> {
        let config = ImageConfig::parse(None)?;
        assert_eq!(config.num_slots, 2);
        assert_eq!(config.local_partitions(), (0..16).collect::<Vec<_>>());

        let config = ImageConfig::parse(Some(
            "total_partitions = 8\nserver_count = 3\nserver_id = 1",
        ))?;
        assert_eq!(config.local_partitions(), vec![1, 4, 7]);

        assert!(ImageConfig::parse(Some("num_slots = 1")).is_err());
        assert!(ImageConfig::parse(Some("server_count = 0")).is_err());
        assert!(ImageConfig::parse(Some("server_count = 2\nserver_id = 2")).is_err());
        assert!(ImageConfig::parse(Some("slots = 3")).is_err());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn file_backed_round_trip() -> Result<(), KeeperError> {
        let dir = scratch_dir("round-trip").await?;
        let config = format!(
            "image_dir = '{}'\nnum_slots = 3\ntotal_partitions = 6\nserver_count = 2",
            dir
        );
        let locals = ImageConfig::parse(Some(&config))?.local_partitions();
        assert_eq!(locals, vec![0, 2, 4]);

        let store = filled_store(&locals, "v1").await;
        let image = PartitionedImage::new_file_backed(Some(&config), store).await?;
        assert!(image.save_local_storage().await);
        assert_eq!(image.current_slot().await, Some(0));
        assert_eq!(image.slot_versions().await?, vec![Some(1), None, None]);

        // a fresh process sees the same image
        let restored = Arc::new(MemStore::new());
        let image =
            PartitionedImage::new_file_backed(Some(&config), restored.clone())
                .await?;
        assert!(image.load_local_storage().await);
        for &p in &locals {
            assert_eq!(
                restored.get(p).await,
                Some(Bytes::from(format!("v1-partition-{}", p)))
            );
        }
        assert_eq!(restored.get(1).await, None);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn save_rotates_slots() -> Result<(), KeeperError> {
        let slots = mem_slots(3);
        let store = filled_store(&[0, 1], "x").await;
        let image =
            PartitionedImage::new_with_slots(vec![0, 1], as_storages(&slots), store)?;

        // all empty: the highest index is current, so saving starts at 0
        assert_eq!(image.calculate_current_slot().await?, 2);
        for expected in [0, 1, 2, 0] {
            assert!(image.save_local_storage().await);
            assert_eq!(image.current_slot().await, Some(expected));
        }
        assert_eq!(
            image.slot_versions().await?,
            vec![Some(4), Some(2), Some(3)]
        );
        assert_eq!(slots[0].record().await.version, Some(4));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn save_after_version_five() -> Result<(), KeeperError> {
        let slots = mem_slots(2);
        let store = filled_store(&[0], "old").await;
        slots[0]
            .set_record(ImageSignature::next_of(Some(4), Default::default()))
            .await;
        let image =
            PartitionedImage::new_with_slots(vec![0], as_storages(&slots), store)?;

        assert_eq!(image.calculate_current_slot().await?, 0);
        assert!(image.save_local_storage().await);
        assert_eq!(image.current_slot().await, Some(1));
        assert_eq!(slots[1].record().await.version, Some(6));
        assert_eq!(slots[0].record().await.version, Some(5));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn current_slot_ties() -> Result<(), KeeperError> {
        let slots = mem_slots(4);
        for (slot, version) in [(0, 3), (2, 3), (3, 1)] {
            slots[slot]
                .set_record(ImageSignature::next_of(
                    Some(version - 1),
                    Default::default(),
                ))
                .await;
        }
        let image = PartitionedImage::new_with_slots(
            vec![],
            as_storages(&slots),
            Arc::new(MemStore::new()),
        )?;
        assert_eq!(image.calculate_current_slot().await?, 2);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn crash_before_record_keeps_old() -> Result<(), KeeperError> {
        let slots = mem_slots(2);
        let locals = vec![0, 1, 2];
        let store = filled_store(&locals, "old").await;
        let image = PartitionedImage::new_with_slots(
            locals.clone(),
            as_storages(&slots),
            store.clone(),
        )?;
        assert!(image.save_local_storage().await);
        assert_eq!(image.current_slot().await, Some(0));

        // partitions reach slot 1 but its record write fails
        for &p in &locals {
            store.put(p, Bytes::from_static(b"new")).await;
        }
        slots[1].fail_record_writes(true);
        assert!(!image.save_local_storage().await);
        assert_eq!(image.current_slot().await, Some(0));
        assert_eq!(slots[1].load_partition(0).await?, Bytes::from_static(b"new"));

        // restart: old version is still the one loaded
        let restored = Arc::new(MemStore::new());
        let image = PartitionedImage::new_with_slots(
            locals.clone(),
            as_storages(&slots),
            restored.clone(),
        )?;
        assert!(image.load_local_storage().await);
        assert_eq!(image.current_slot().await, Some(0));
        for &p in &locals {
            assert_eq!(
                restored.get(p).await,
                Some(Bytes::from(format!("old-partition-{}", p)))
            );
        }
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn mismatch_fails_whole_load() -> Result<(), KeeperError> {
        let slots = mem_slots(2);
        let locals = vec![0, 1, 2, 3];
        let image = PartitionedImage::new_with_slots(
            locals.clone(),
            as_storages(&slots),
            filled_store(&locals, "saved").await,
        )?;
        assert!(image.save_local_storage().await);
        slots[0].tamper(3, b"corrupted").await;

        let live = filled_store(&locals, "live").await;
        let image = PartitionedImage::new_with_slots(
            locals.clone(),
            as_storages(&slots),
            live.clone(),
        )?;
        assert!(!image.load_local_storage().await);
        for &p in &locals {
            assert_eq!(
                live.get(p).await,
                Some(Bytes::from(format!("live-partition-{}", p)))
            );
        }
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_record_entry_fails_load() -> Result<(), KeeperError> {
        let slots = mem_slots(2);
        slots[1].tamper(0, b"data").await;
        slots[1]
            .set_record(ImageSignature::next_of(None, Default::default()))
            .await;
        let image = PartitionedImage::new_with_slots(
            vec![0],
            as_storages(&slots),
            Arc::new(MemStore::new()),
        )?;
        assert!(!image.load_local_storage().await);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_image_loads_nothing() -> Result<(), KeeperError> {
        let slots = mem_slots(2);
        let live = filled_store(&[0], "live").await;
        let image =
            PartitionedImage::new_with_slots(vec![0], as_storages(&slots), live.clone())?;
        assert!(image.load_local_storage().await);
        assert_eq!(image.current_slot().await, Some(1));
        assert_eq!(live.get(0).await, Some(Bytes::from_static(b"live-partition-0")));
        assert!(PartitionedImage::new_with_slots(
            vec![0],
            as_storages(&mem_slots(1)),
            live
        )
        .is_err());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn persisted_save_task() -> Result<(), KeeperError> {
        let slots = mem_slots(2);
        let image = Arc::new(PartitionedImage::new_with_slots(
            vec![0],
            as_storages(&slots),
            filled_store(&[0], "t").await,
        )?);
        let queue = LocalTaskQueue::new(Arc::new(TaskRouter::new().route(
            TaskTag::PersistedSave,
            Arc::new(PersistedSaveExecutor::new(image.clone())),
        )));

        queue.post_task(Task::PersistedSave).await?;
        queue.wait(TaskTag::PersistedSave).await?;
        assert_eq!(queue.stats(TaskTag::PersistedSave).await.succeeded, 1);
        assert_eq!(slots[0].record().await.version, Some(1));

        slots[1].fail_record_writes(true);
        queue.post_task(Task::PersistedSave).await?;
        queue.wait(TaskTag::PersistedSave).await?;
        assert_eq!(queue.stats(TaskTag::PersistedSave).await.failed, 1);
        assert_eq!(image.current_slot().await, Some(0));
        Ok(())
    }
}
