use crate::core::model::{MediaSelection, TimeRange};
use async_trait::async_trait;
use std::path::PathBuf;
use url::Url;
use uuid::Uuid;

pub mod http;

pub type HandleId = Uuid;

/// Parameters for one transfer pass: the initial pass carries no selection,
/// follow-up passes fetch one secondary track each.
#[derive(Debug, Clone)]
pub struct TransferSpec {
    pub source: Url,
    /// Identity carried on the handle so restoration can rebuild the asset.
    pub identity_tag: String,
    /// Minimum acceptable variant bitrate; start small, fetch tracks after.
    pub quality_floor_bps: u64,
    pub selection: Option<MediaSelection>,
}

#[derive(Debug, Clone)]
pub struct ActiveTransfer {
    pub handle: HandleId,
    pub identity_tag: String,
    pub source: Url,
}

/// Terminal outcome delivered with a `Completed` callback.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransferError {
    #[error("transfer cancelled")]
    Cancelled,

    #[error("transfer failed: {0}")]
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unsupported source scheme: {0}")]
    UnsupportedScheme(String),

    #[error("failed to create transfer: {0}")]
    CreationFailed(String),
}

/// Asynchronous task-level callbacks. For any handle, `DestinationResolved`
/// is delivered before `Completed`; `Completed` fires exactly once.
#[derive(Debug, Clone)]
pub enum SessionCallback {
    DestinationResolved {
        handle: HandleId,
        path: PathBuf,
    },
    Progress {
        handle: HandleId,
        loaded: Vec<TimeRange>,
        expected: TimeRange,
    },
    Completed {
        handle: HandleId,
        error: Option<TransferError>,
    },
}

/// The platform capability performing the actual byte transfer of a
/// streaming asset.
#[async_trait]
pub trait DownloadSession: Send + Sync {
    /// Transfers the session still knows about, used for state restoration.
    async fn active_transfers(&self) -> Vec<ActiveTransfer>;

    async fn start_transfer(&self, spec: &TransferSpec) -> Result<HandleId, SessionError>;

    /// Requests cancellation; completion arrives later through the callbacks.
    async fn cancel(&self, handle: HandleId);
}
