use url::Url;

/// A downloadable streaming-media asset. Immutable once constructed; the
/// manager derives everything else (state, progress, local copies) on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Stable key, derived from the catalog id or the source URL.
    pub id: String,
    /// Where the bytes come from. For locally cached assets this is a
    /// `file://` URL pointing at the package on disk.
    pub source: Url,
}

impl Asset {
    pub fn new(id: impl Into<String>, source: Url) -> Self {
        Self {
            id: id.into(),
            source,
        }
    }
}

/// Derived download state of an asset. Never stored anywhere; always computed
/// from the in-flight map, the locator store, and the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    NotDownloaded,
    Downloading,
    Downloaded,
}

/// A loaded (or expected) span of the requested media, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub duration: f64,
}

impl TimeRange {
    pub fn new(start: f64, duration: f64) -> Self {
        Self { start, duration }
    }
}

/// Characteristic of a media selection group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audible,
    Legible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Audio,
    Subtitles,
    /// Burned-in captions are never fetched as a separate pass.
    ClosedCaptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackOption {
    pub name: String,
    pub media_type: MediaType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackGroup {
    pub kind: TrackKind,
    pub options: Vec<TrackOption>,
}

/// A (group, option) pair still needing its own download pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSelection {
    pub group: TrackKind,
    pub option: TrackOption,
}
