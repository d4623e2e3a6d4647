//! Image slot storage backends and the local partition store interface.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::image::{compute_signature, ImageSignature, PartitionId};
use crate::utils::KeeperError;

use async_trait::async_trait;

use bytes::Bytes;

use rmp_serde::decode::from_slice as decode_from_slice;
use rmp_serde::encode::to_vec as encode_to_vec;

use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Storage backend of one image slot.
#[async_trait]
pub trait ImageStorage: Send + Sync {
    /// Reads back the bytes of a saved partition.
    async fn load_partition(
        &self,
        partition: PartitionId,
    ) -> Result<Bytes, KeeperError>;

    /// Writes a partition's bytes, returning the signature of exactly what
    /// was written.
    async fn save_partition(
        &self,
        partition: PartitionId,
        data: Bytes,
    ) -> Result<String, KeeperError>;

    /// Reads the slot's signature record; an empty record if none exists.
    async fn load_signature_record(&self) -> Result<ImageSignature, KeeperError>;

    /// Durably writes the slot's signature record. A reader sees either the
    /// old record or the new one, never a torn one.
    async fn save_signature_record(
        &self,
        record: &ImageSignature,
    ) -> Result<(), KeeperError>;

    /// Opaque handle of the slot location, e.g. for uploading a backup.
    fn handle(&self) -> String;
}

/// Owner of the live data of locally stored partitions.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Serializes a partition's current content.
    async fn dump_partition(
        &self,
        partition: PartitionId,
    ) -> Result<Bytes, KeeperError>;

    /// Replaces a partition's content with given bytes.
    async fn restore_partition(
        &self,
        partition: PartitionId,
        data: Bytes,
    ) -> Result<(), KeeperError>;
}

/// File name of the signature record inside a slot directory.
const RECORD_FILE: &str = "signature.rec";

/// Image slot backed by a local directory: one file per partition plus a
/// signature record file.
#[derive(Debug, Clone)]
pub struct FileImageSlot {
    /// Slot directory.
    dir: PathBuf,
}

impl FileImageSlot {
    /// Creates a slot over given directory, creating it if missing.
    pub async fn new_and_setup(dir: &Path) -> Result<Self, KeeperError> {
        if !fs::try_exists(dir).await? {
            fs::create_dir_all(dir).await?;
            pf_info!("created image slot dir '{}'", dir.display());
        }
        Ok(FileImageSlot {
            dir: dir.to_path_buf(),
        })
    }

    #[inline]
    fn partition_path(&self, partition: PartitionId) -> PathBuf {
        self.dir.join(format!("partition-{}.img", partition))
    }

    /// Writes given bytes to a file and syncs them.
    async fn write_synced(path: &Path, data: &[u8]) -> Result<(), KeeperError> {
        let mut file = File::create(path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl ImageStorage for FileImageSlot {
    async fn load_partition(
        &self,
        partition: PartitionId,
    ) -> Result<Bytes, KeeperError> {
        let data = fs::read(self.partition_path(partition)).await?;
        Ok(Bytes::from(data))
    }

    async fn save_partition(
        &self,
        partition: PartitionId,
        data: Bytes,
    ) -> Result<String, KeeperError> {
        Self::write_synced(&self.partition_path(partition), &data).await?;
        Ok(compute_signature(&data))
    }

    async fn load_signature_record(&self) -> Result<ImageSignature, KeeperError> {
        let path = self.dir.join(RECORD_FILE);
        if !fs::try_exists(&path).await? {
            return Ok(ImageSignature::empty());
        }
        let buf = fs::read(&path).await?;
        Ok(decode_from_slice(&buf)?)
    }

    async fn save_signature_record(
        &self,
        record: &ImageSignature,
    ) -> Result<(), KeeperError> {
        // write aside, then atomically rename over the old record
        let tmp_path = self.dir.join(format!("{}.tmp", RECORD_FILE));
        Self::write_synced(&tmp_path, &encode_to_vec(record)?).await?;
        fs::rename(&tmp_path, self.dir.join(RECORD_FILE)).await?;
        File::open(&self.dir).await?.sync_all().await?;
        Ok(())
    }

    fn handle(&self) -> String {
        self.dir.display().to_string()
    }
}

/// Simple in-memory partition store.
#[derive(Debug, Default)]
pub struct MemStore {
    partitions: Mutex<HashMap<PartitionId, Bytes>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current content of a partition, if any.
    pub async fn get(&self, partition: PartitionId) -> Option<Bytes> {
        self.partitions.lock().await.get(&partition).cloned()
    }

    /// Overwrites the content of a partition.
    pub async fn put(&self, partition: PartitionId, data: Bytes) {
        self.partitions.lock().await.insert(partition, data);
    }
}

#[async_trait]
impl LocalStore for MemStore {
    async fn dump_partition(
        &self,
        partition: PartitionId,
    ) -> Result<Bytes, KeeperError> {
        // a partition never written to dumps as empty
        Ok(self.get(partition).await.unwrap_or_default())
    }

    async fn restore_partition(
        &self,
        partition: PartitionId,
        data: Bytes,
    ) -> Result<(), KeeperError> {
        self.put(partition, data).await;
        Ok(())
    }
}

#[cfg(test)]
mod slot_tests {
    use super::*;

    async fn fresh_slot(name: &str) -> Result<FileImageSlot, KeeperError> {
        let dir = PathBuf::from(format!("/tmp/partkeeper-test-{}", name));
        if fs::try_exists(&dir).await? {
            fs::remove_dir_all(&dir).await?;
        }
        FileImageSlot::new_and_setup(&dir).await
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn partition_save_load() -> Result<(), KeeperError> {
        let slot = fresh_slot("slot-0").await?;
        let data = Bytes::from_static(b"some partition bytes");
        let sig = slot.save_partition(3, data.clone()).await?;
        assert_eq!(sig, compute_signature(&data));
        assert_eq!(slot.load_partition(3).await?, data);
        assert!(slot.load_partition(4).await.is_err());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn record_save_load() -> Result<(), KeeperError> {
        let slot = fresh_slot("slot-1").await?;
        assert_eq!(slot.load_signature_record().await?, ImageSignature::empty());

        let record = ImageSignature::next_of(
            Some(4),
            [(1, "x".to_string()), (5, "y".to_string())]
                .into_iter()
                .collect(),
        );
        slot.save_signature_record(&record).await?;
        assert_eq!(slot.load_signature_record().await?, record);

        // reopening the same directory sees the same record
        let reopened = FileImageSlot::new_and_setup(Path::new(&slot.handle())).await?;
        assert_eq!(reopened.load_signature_record().await?.version, Some(5));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn mem_store_dump_restore() -> Result<(), KeeperError> {
        let store = MemStore::new();
        assert_eq!(store.dump_partition(0).await?, Bytes::new());
        store.restore_partition(0, Bytes::from_static(b"abc")).await?;
        assert_eq!(store.dump_partition(0).await?, Bytes::from_static(b"abc"));
        Ok(())
    }
}
