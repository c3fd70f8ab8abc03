//! Revocable handles for processed media
//!
//! Processed videos are parked in a [`MediaRegistry`] and referenced by a
//! [`PlaybackHandle`]. A handle has a single owner; revoking it (explicitly
//! or on drop) removes the media from the registry.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tracing::debug;

use super::types::AnnotatedVideo;

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    peak: AtomicUsize,
    entries: Mutex<HashMap<u64, AnnotatedVideo>>,
}

/// Store of live decoded-media entries
#[derive(Clone, Default)]
pub struct MediaRegistry {
    inner: Arc<RegistryInner>,
}

impl MediaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a video and hand back the only handle to it
    pub fn create(&self, video: AnnotatedVideo) -> PlaybackHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let len = video.len();
        let live = {
            let mut entries = self.entries();
            entries.insert(id, video);
            entries.len()
        };
        self.inner.peak.fetch_max(live, Ordering::Relaxed);
        debug!(id, len, live, "Playback handle created");
        PlaybackHandle {
            id,
            registry: self.clone(),
        }
    }

    /// Number of handles that have not been revoked
    pub fn live_count(&self) -> usize {
        self.entries().len()
    }

    /// Most handles that were ever live at the same time
    pub fn peak_live_count(&self) -> usize {
        self.inner.peak.load(Ordering::Relaxed)
    }

    pub fn contains(&self, url: &str) -> bool {
        parse_url(url).is_some_and(|id| self.entries().contains_key(&id))
    }

    fn revoke(&self, id: u64) {
        if self.entries().remove(&id).is_some() {
            debug!(id, "Playback handle revoked");
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<u64, AnnotatedVideo>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn parse_url(url: &str) -> Option<u64> {
    url.strip_prefix("media://")?.parse().ok()
}

/// Owned reference to a processed video; revoked on drop
pub struct PlaybackHandle {
    id: u64,
    registry: MediaRegistry,
}

impl PlaybackHandle {
    pub fn url(&self) -> String {
        format!("media://{}", self.id)
    }

    pub fn content_type(&self) -> Option<String> {
        self.registry
            .entries()
            .get(&self.id)
            .map(|v| v.content_type.clone())
    }

    /// Media bytes for playback
    pub fn data(&self) -> Option<Bytes> {
        self.registry.entries().get(&self.id).map(|v| v.data.clone())
    }

    /// Write the media to disk for download
    pub async fn save_to(&self, path: &Path) -> std::io::Result<()> {
        let data = self.data().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "playback handle revoked")
        })?;
        tokio::fs::write(path, &data).await
    }

    pub fn revoke(self) {
        // Drop does the work
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        self.registry.revoke(self.id);
    }
}

impl fmt::Debug for PlaybackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackHandle").field("id", &self.id).finish()
    }
}

/// Holds at most one live handle for a screen
#[derive(Debug, Default)]
pub struct PlaybackSlot {
    current: Option<PlaybackHandle>,
}

impl PlaybackSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Revoke the held handle, then take ownership of `handle`
    pub fn replace(&mut self, handle: PlaybackHandle) -> &PlaybackHandle {
        if let Some(previous) = self.current.take() {
            previous.revoke();
        }
        self.current.insert(handle)
    }

    pub fn current(&self) -> Option<&PlaybackHandle> {
        self.current.as_ref()
    }

    pub fn clear(&mut self) {
        if let Some(previous) = self.current.take() {
            previous.revoke();
        }
    }
}
