//! Backup/restore adapter over the partitioned image, and the single-shot
//! completion signal a restore reports back through.

use std::fmt;
use std::sync::Arc;

use crate::image::{ImageStorage, PartitionedImage};
use crate::utils::KeeperError;

use async_trait::async_trait;

use futures::future;

use tokio::sync::{oneshot, watch};

/// Terminal state of a restore as seen by its trigger.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum RestoreOutcome {
    Completed,
    Failed(KeeperError),
    Cancelled,
}

impl fmt::Display for RestoreOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RestoreOutcome::Completed => write!(f, "completed"),
            RestoreOutcome::Failed(e) => write!(f, "failed: {}", e),
            RestoreOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Handling side of a restore signal. Consumed on completion, so it resolves
/// the waiter at most once; dropping it unresolved cancels the restore.
#[derive(Debug)]
pub struct RestoreCompleter {
    tx_done: oneshot::Sender<Result<(), KeeperError>>,
}

impl RestoreCompleter {
    pub fn complete(self, result: Result<(), KeeperError>) {
        if self.tx_done.send(result).is_err() {
            pf_debug!("restore waiter gone before completion");
        }
    }
}

/// Triggering side of a restore signal.
#[derive(Debug)]
pub struct RestoreWaiter {
    rx_done: oneshot::Receiver<Result<(), KeeperError>>,
    rx_cancel: Option<watch::Receiver<bool>>,
}

impl RestoreWaiter {
    /// Waits for the restore to reach a terminal state. A completion that
    /// races with cancellation wins.
    pub async fn wait(self) -> RestoreOutcome {
        let RestoreWaiter {
            mut rx_done,
            rx_cancel,
        } = self;

        let cancelled = async move {
            match rx_cancel {
                Some(mut rx_cancel) => {
                    if rx_cancel.wait_for(|&cancel| cancel).await.is_err() {
                        // cancel sender gone: can no longer be cancelled
                        future::pending::<()>().await;
                    }
                }
                None => future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            done = &mut rx_done => match done {
                Ok(Ok(())) => RestoreOutcome::Completed,
                Ok(Err(e)) => RestoreOutcome::Failed(e),
                Err(_) => RestoreOutcome::Cancelled,
            },
            _ = cancelled => RestoreOutcome::Cancelled,
        }
    }
}

/// Creates a linked completer/waiter pair, optionally cancellable through
/// a watch channel that turns `true`.
pub fn restore_signal(
    rx_cancel: Option<watch::Receiver<bool>>,
) -> (RestoreCompleter, RestoreWaiter) {
    let (tx_done, rx_done) = oneshot::channel();
    (
        RestoreCompleter { tx_done },
        RestoreWaiter { rx_done, rx_cancel },
    )
}

/// Restore request coming from the hosting platform.
#[derive(Debug)]
pub struct RestoreEvent {
    /// Opaque platform context.
    pub context: String,

    /// Where the outcome is reported.
    pub completer: RestoreCompleter,
}

/// Uploads a saved image slot somewhere off this node.
#[async_trait]
pub trait BackupUploader: Send + Sync {
    async fn upload(&self, handle: &str) -> Result<(), KeeperError>;
}

/// Fetches a previously uploaded backup into a slot of the local image.
/// Must write the partitions and the signature record of the backup.
#[async_trait]
pub trait BackupDownloader: Send + Sync {
    async fn download(&self, target: &dyn ImageStorage) -> Result<(), KeeperError>;
}

/// Platform-facing backup/restore hooks.
#[async_trait]
pub trait BackupAdapter: Send + Sync {
    /// Takes a fresh backup and hands it to `uploader`.
    async fn backup(&self, uploader: &dyn BackupUploader) -> Result<(), KeeperError>;

    /// Fetches a backup through `downloader` and restores it, resolving the
    /// event's completer.
    async fn restore(&self, downloader: &dyn BackupDownloader, event: RestoreEvent);
}

/// Backup adapter saving to and loading from a partitioned image.
pub struct ImageBackupAdapter {
    image: Arc<PartitionedImage>,
}

impl ImageBackupAdapter {
    pub fn new(image: Arc<PartitionedImage>) -> Self {
        ImageBackupAdapter { image }
    }

    async fn download_and_install(
        &self,
        downloader: &dyn BackupDownloader,
    ) -> Result<u64, KeeperError> {
        let lease = self.image.hold_next_slot().await?;
        pf_info!("downloading backup into '{}'", lease.handle());
        downloader.download(lease.storage()).await?;
        lease.install().await
    }
}

#[async_trait]
impl BackupAdapter for ImageBackupAdapter {
    async fn backup(&self, uploader: &dyn BackupUploader) -> Result<(), KeeperError> {
        // slot stays held until the upload is over
        let lease = match self.image.save_and_hold().await {
            Ok(lease) => lease,
            Err(e) => return logged_err!("backup aborted: image save failed: {}", e),
        };
        let handle = lease.handle();
        pf_info!("uploading backup from '{}'", handle);
        uploader.upload(&handle).await
    }

    async fn restore(&self, downloader: &dyn BackupDownloader, event: RestoreEvent) {
        pf_info!("restoring backup for '{}'", event.context);
        let result = match self.download_and_install(downloader).await {
            Ok(version) => {
                pf_info!("restore for '{}' at version {}", event.context, version);
                Ok(())
            }
            Err(e) => Err(KeeperError::msg(format!(
                "restore for '{}' failed: {}",
                event.context, e
            ))),
        };
        event.completer.complete(result);
    }
}
