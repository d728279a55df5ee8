use crate::core::events::{EventBus, EventKind, EventSubscriber, PersistenceEvent};
use crate::core::model::{Asset, DownloadState};
use crate::core::probe::FsProbe;
use crate::core::selection::{MediaSelectionResolver, TrackInventory};
use crate::core::store::{Locator, LocatorStore};
use crate::session::{DownloadSession, HandleId, SessionCallback, TransferError, TransferSpec};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use url::Url;

/// The initial pass asks for a low-bitrate variant; secondary tracks are
/// fetched in follow-up passes once the main video has landed.
pub const DEFAULT_QUALITY_FLOOR_BPS: u64 = 265_000;

struct ManagerState {
    /// Active transfer handle to the asset it is downloading.
    active: HashMap<HandleId, Asset>,
    /// Handle to the destination the transfer negotiated; known before
    /// completion, consumed when persisting the locator.
    pending_destinations: HashMap<HandleId, PathBuf>,
    selections: MediaSelectionResolver,
    restored: bool,
    available: bool,
}

/// Orchestrates the download lifecycle of streaming assets: state derivation,
/// in-flight tracking, restoration, locator persistence, and event fan-out.
/// All mutations serialize on one internal lock; adapter callbacks are
/// drained by a single task (`run_callbacks`).
#[derive(Clone)]
pub struct AssetPersistenceManager {
    session: Arc<dyn DownloadSession>,
    store: LocatorStore,
    probe: Arc<dyn FsProbe>,
    inventory: Arc<dyn TrackInventory>,
    bus: EventBus,
    state: Arc<Mutex<ManagerState>>,
    quality_floor_bps: u64,
}

impl AssetPersistenceManager {
    pub fn new(
        session: Arc<dyn DownloadSession>,
        store: LocatorStore,
        probe: Arc<dyn FsProbe>,
        inventory: Arc<dyn TrackInventory>,
    ) -> Self {
        Self {
            session,
            store,
            probe,
            inventory,
            bus: EventBus::new(256),
            state: Arc::new(Mutex::new(ManagerState {
                active: HashMap::new(),
                pending_destinations: HashMap::new(),
                selections: MediaSelectionResolver::new(),
                restored: false,
                available: false,
            })),
            quality_floor_bps: DEFAULT_QUALITY_FLOOR_BPS,
        }
    }

    pub fn with_quality_floor(mut self, bps: u64) -> Self {
        self.quality_floor_bps = bps;
        self
    }

    pub fn subscribe(&self) -> EventSubscriber {
        self.bus.subscribe()
    }

    pub fn subscribe_to(&self, kinds: Vec<EventKind>) -> EventSubscriber {
        self.bus.subscribe_to(kinds)
    }

    /// Drains session callbacks in arrival order on a single task.
    pub fn run_callbacks(
        &self,
        mut rx: mpsc::Receiver<SessionCallback>,
    ) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(callback) = rx.recv().await {
                manager.handle_callback(callback).await;
            }
        })
    }

    /// Rebuilds the in-flight map from the transfers the session still knows
    /// about, then marks the manager available. Idempotent; only the first
    /// call has effect and emits `ManagerRestored`.
    pub async fn restore(&self) {
        let mut state = self.state.lock().await;
        if state.restored {
            return;
        }
        state.restored = true;

        for transfer in self.session.active_transfers().await {
            state
                .active
                .entry(transfer.handle)
                .or_insert_with(|| Asset::new(transfer.identity_tag, transfer.source));
        }

        state.available = true;
        self.bus.publish(PersistenceEvent::ManagerRestored);
        info!("manager restoration complete");
    }

    /// False until `restore` completes; download requests before that are
    /// provisional.
    pub async fn is_available(&self) -> bool {
        self.state.lock().await.available
    }

    /// Always returns a usable asset: the in-flight one, else one rebuilt
    /// from a valid locator record, else a fresh one for `source`.
    pub async fn asset_for(&self, id: &str, source: &Url) -> Asset {
        {
            let state = self.state.lock().await;
            if let Some(asset) = inflight_asset(&state, id) {
                return asset;
            }
        }
        if let Some(asset) = self.local_asset(id).await {
            return asset;
        }
        Asset::new(id, source.clone())
    }

    /// Asset backed by a locator record, pointing at the copy on disk. A
    /// record that fails to resolve or resolves stale is purged here.
    async fn local_asset(&self, id: &str) -> Option<Asset> {
        let locator = match self.store.get(id).await {
            Ok(Some(locator)) => locator,
            Ok(None) => return None,
            Err(e) => {
                warn!(asset_id = id, error = %e, "locator lookup failed");
                return None;
            }
        };

        match self.probe.resolve(&locator) {
            Ok(resolved) if !resolved.is_stale => match Url::from_file_path(&resolved.path) {
                Ok(local) => Some(Asset::new(id, local)),
                Err(()) => {
                    warn!(
                        asset_id = id,
                        path = %resolved.path.display(),
                        "locator path is not absolute, cannot address the local copy"
                    );
                    None
                }
            },
            Ok(_) => {
                warn!(asset_id = id, "locator is stale, dropping record");
                self.purge_locator(id).await;
                None
            }
            Err(e) => {
                warn!(asset_id = id, error = %e, "locator resolution failed, dropping record");
                self.purge_locator(id).await;
                None
            }
        }
    }

    async fn purge_locator(&self, id: &str) {
        if let Err(e) = self.store.remove(id).await {
            warn!(asset_id = id, error = %e, "failed to remove locator record");
        }
    }

    /// Pure 3-rule derivation; never mutates anything. A locator whose file
    /// has gone missing is reported as not-downloaded but left in the store;
    /// purging is reserved for the deletion and failed-resolution paths.
    pub async fn download_state(&self, asset: &Asset) -> DownloadState {
        let in_flight = {
            let state = self.state.lock().await;
            inflight_asset(&state, &asset.id).is_some()
        };
        let locator = self.store.get(&asset.id).await.ok().flatten();
        derive_state(in_flight, locator.as_ref(), self.probe.as_ref())
    }

    /// Starts the initial transfer pass and reports `Downloading` before any
    /// byte has moved. A session that cannot construct the transfer is
    /// logged and otherwise ignored: no handle, no event.
    pub async fn download_stream(&self, asset: &Asset) {
        let spec = TransferSpec {
            source: asset.source.clone(),
            identity_tag: asset.id.clone(),
            quality_floor_bps: self.quality_floor_bps,
            selection: None,
        };

        let mut state = self.state.lock().await;
        match self.session.start_transfer(&spec).await {
            Ok(handle) => {
                state.active.insert(handle, asset.clone());
                self.emit_state(&asset.id, DownloadState::Downloading, None, None);
            }
            Err(e) => {
                warn!(asset_id = %asset.id, error = %e, "could not create transfer");
            }
        }
    }

    /// Requests cancellation of the transfer tracking an equal asset. No-op
    /// when none matches; cleanup and the terminal event arrive through the
    /// completion path.
    pub async fn cancel_download(&self, asset: &Asset) {
        let handle = {
            let state = self.state.lock().await;
            state
                .active
                .iter()
                .find(|(_, tracked)| *tracked == asset)
                .map(|(handle, _)| *handle)
        };

        match handle {
            Some(handle) => self.session.cancel(handle).await,
            None => debug!(asset_id = %asset.id, "no in-flight transfer to cancel"),
        }
    }

    /// Removes the downloaded resource and its locator record, then reports
    /// `NotDownloaded`. Logged no-op when removal fails or nothing is stored.
    pub async fn delete_asset(&self, asset: &Asset) {
        let _state = self.state.lock().await;

        let locator = match self.store.get(&asset.id).await {
            Ok(Some(locator)) => locator,
            Ok(None) => {
                debug!(asset_id = %asset.id, "nothing to delete");
                return;
            }
            Err(e) => {
                warn!(asset_id = %asset.id, error = %e, "locator lookup failed");
                return;
            }
        };

        match self.probe.resolve(&locator) {
            Ok(resolved) => {
                if let Err(e) = self.probe.remove(&resolved.path) {
                    warn!(
                        asset_id = %asset.id,
                        path = %resolved.path.display(),
                        error = %e,
                        "failed to remove downloaded resource"
                    );
                    return;
                }
            }
            Err(e) => {
                debug!(asset_id = %asset.id, error = %e, "locator did not resolve, dropping record");
            }
        }

        if let Err(e) = self.store.remove(&asset.id).await {
            warn!(asset_id = %asset.id, error = %e, "failed to remove locator record");
            return;
        }

        self.emit_state(&asset.id, DownloadState::NotDownloaded, None, None);
    }

    pub(crate) async fn handle_callback(&self, callback: SessionCallback) {
        match callback {
            SessionCallback::DestinationResolved { handle, path } => {
                let mut state = self.state.lock().await;
                state.pending_destinations.insert(handle, path);
            }
            SessionCallback::Progress {
                handle,
                loaded,
                expected,
            } => {
                let state = self.state.lock().await;
                let Some(asset) = state.active.get(&handle) else {
                    return;
                };
                // Deliberately unclamped: overlapping ranges for tracks that
                // are already partially cached can push this past 1.0.
                let percent: f64 = loaded
                    .iter()
                    .map(|range| range.duration / expected.duration)
                    .sum();
                self.bus.publish(PersistenceEvent::DownloadProgress {
                    asset_id: asset.id.clone(),
                    percent,
                });
            }
            SessionCallback::Completed { handle, error } => {
                self.finish_transfer(handle, error).await;
            }
        }
    }

    /// Terminal transition for a transfer handle, driven exactly once per
    /// handle. Both in-flight entries go first so a concurrent state query
    /// never observes a handle inconsistent with the event, then exactly one
    /// state-changed event is emitted.
    async fn finish_transfer(&self, handle: HandleId, error: Option<TransferError>) {
        let mut state = self.state.lock().await;
        let Some(asset) = state.active.remove(&handle) else {
            return;
        };
        let destination = state.pending_destinations.remove(&handle);

        match error {
            Some(TransferError::Cancelled) => {
                self.cleanup_cancelled(&asset, destination.as_deref()).await;
                info!(asset_id = %asset.id, "download cancelled");
                self.emit_state(&asset.id, DownloadState::NotDownloaded, None, None);
            }
            Some(error) => {
                warn!(asset_id = %asset.id, error = %error, "download failed");
                self.emit_state(
                    &asset.id,
                    DownloadState::NotDownloaded,
                    None,
                    Some(error.to_string()),
                );
            }
            None => {
                let Some(destination) = destination else {
                    // The session guarantees destination-resolved first.
                    warn!(asset_id = %asset.id, "transfer completed without a resolved destination");
                    return;
                };

                let locator = match self.probe.locator_for(&destination) {
                    Ok(locator) => locator,
                    Err(e) => {
                        warn!(asset_id = %asset.id, error = %e, "could not build locator for download");
                        self.emit_state(
                            &asset.id,
                            DownloadState::NotDownloaded,
                            None,
                            Some(e.to_string()),
                        );
                        return;
                    }
                };

                if let Err(e) = self.store.set(&asset.id, &locator).await {
                    // The downloaded bytes stay orphaned on disk; without a
                    // record they are as good as absent.
                    warn!(asset_id = %asset.id, error = %e, "failed to persist locator");
                    self.emit_state(
                        &asset.id,
                        DownloadState::NotDownloaded,
                        None,
                        Some(e.to_string()),
                    );
                    return;
                }

                match state
                    .selections
                    .next_selection(&asset.source, self.inventory.as_ref())
                {
                    Some(selection) => {
                        let label = selection.option.name.clone();
                        let spec = TransferSpec {
                            source: asset.source.clone(),
                            identity_tag: asset.id.clone(),
                            quality_floor_bps: self.quality_floor_bps,
                            selection: Some(selection),
                        };
                        match self.session.start_transfer(&spec).await {
                            Ok(next) => {
                                state.active.insert(next, asset.clone());
                                self.emit_state(
                                    &asset.id,
                                    DownloadState::Downloading,
                                    Some(label),
                                    None,
                                );
                            }
                            Err(e) => {
                                warn!(asset_id = %asset.id, error = %e, "could not start media selection pass");
                                self.emit_state(&asset.id, DownloadState::Downloaded, None, None);
                            }
                        }
                    }
                    None => {
                        self.emit_state(&asset.id, DownloadState::Downloaded, None, None);
                    }
                }
            }
        }
    }

    /// Cancellation cleanup: drop any persisted copy plus the partially
    /// placed destination. Failures are logged; the terminal state still
    /// reflects the intended outcome.
    async fn cleanup_cancelled(&self, asset: &Asset, partial: Option<&Path>) {
        match self.store.get(&asset.id).await {
            Ok(Some(locator)) => {
                if let Ok(resolved) = self.probe.resolve(&locator) {
                    if let Err(e) = self.probe.remove(&resolved.path) {
                        warn!(asset_id = %asset.id, error = %e, "failed to remove contents on disk");
                    }
                }
                self.purge_locator(&asset.id).await;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(asset_id = %asset.id, error = %e, "locator lookup failed during cleanup");
            }
        }

        if let Some(partial) = partial {
            if self.probe.exists(partial) {
                if let Err(e) = self.probe.remove(partial) {
                    warn!(
                        asset_id = %asset.id,
                        path = %partial.display(),
                        error = %e,
                        "failed to remove partial download"
                    );
                }
            }
        }
    }

    fn emit_state(
        &self,
        asset_id: &str,
        state: DownloadState,
        selection_label: Option<String>,
        error: Option<String>,
    ) {
        self.bus.publish(PersistenceEvent::DownloadStateChanged {
            asset_id: asset_id.to_string(),
            state,
            selection_label,
            error,
        });
    }
}

fn inflight_asset(state: &ManagerState, id: &str) -> Option<Asset> {
    state.active.values().find(|asset| asset.id == id).cloned()
}

/// 3-rule state derivation: an active transfer wins over a persisted locator,
/// which only counts when it resolves fresh and the resource is still on
/// disk. Transient overlap during a re-download lands on `Downloading`.
pub(crate) fn derive_state(
    in_flight: bool,
    locator: Option<&Locator>,
    probe: &dyn FsProbe,
) -> DownloadState {
    if in_flight {
        return DownloadState::Downloading;
    }
    if let Some(locator) = locator {
        if let Ok(resolved) = probe.resolve(locator) {
            if !resolved.is_stale && probe.exists(&resolved.path) {
                return DownloadState::Downloaded;
            }
        }
    }
    DownloadState::NotDownloaded
}
