use crate::core::model::{MediaSelection, MediaType, TrackGroup, TrackKind, TrackOption};
use std::collections::HashMap;
use url::Url;

/// What the underlying media stack knows about a source: its remote selection
/// groups and which options the local cache already holds.
pub trait TrackInventory: Send + Sync {
    fn track_groups(&self, source: &Url) -> Vec<TrackGroup>;
    fn cached_options(&self, source: &Url, kind: TrackKind) -> Vec<TrackOption>;
}

/// Inventory for flat sources without alternate tracks (plain media files
/// fetched over HTTP).
pub struct NoSecondaryTracks;

impl TrackInventory for NoSecondaryTracks {
    fn track_groups(&self, _source: &Url) -> Vec<TrackGroup> {
        Vec::new()
    }

    fn cached_options(&self, _source: &Url, _kind: TrackKind) -> Vec<TrackOption> {
        Vec::new()
    }
}

/// Computes the remaining secondary tracks per source. The pending list is
/// scanned and reversed once, then consumed by popping the tail, so repeated
/// picks stay O(1) instead of re-scanning a growing cache on every call.
#[derive(Default)]
pub struct MediaSelectionResolver {
    pending: HashMap<Url, Vec<MediaSelection>>,
}

impl MediaSelectionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next (group, option) pair still needing a download pass, or `None`
    /// once the source is exhausted.
    pub fn next_selection(
        &mut self,
        source: &Url,
        inventory: &dyn TrackInventory,
    ) -> Option<MediaSelection> {
        let pending = self
            .pending
            .entry(source.clone())
            .or_insert_with(|| build_pending(source, inventory));
        pending.pop()
    }
}

fn build_pending(source: &Url, inventory: &dyn TrackInventory) -> Vec<MediaSelection> {
    let mut pending = Vec::new();

    for group in inventory.track_groups(source) {
        let cached = inventory.cached_options(source, group.kind);
        if cached.len() >= group.options.len() {
            continue;
        }
        for option in &group.options {
            if cached.contains(option) || option.media_type == MediaType::ClosedCaptions {
                continue;
            }
            pending.push(MediaSelection {
                group: group.kind,
                option: option.clone(),
            });
        }
    }

    pending.reverse();
    pending
}
