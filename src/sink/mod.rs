//! Event sink: bounded recent history, thumbnail persistence and the feed.
//!
//! `append` is called from the executor loop; `render_feed` and the HTTP
//! server read a snapshot taken under the same lock, so a rendered document
//! never observes a half-applied append.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::{FeedServer, ServerHandle};
use crate::frame::{Frame, FrameDimensions};
use crate::processor::ProcessingResult;

mod feed;
mod history;
mod thumbnail;

pub use feed::{render_rss, FeedSettings, DEFAULT_MAX_ITEMS, IMAGES_ROUTE};
pub use history::EventHistory;
pub use thumbnail::{thumbnail_name, ThumbnailStore, THUMBNAIL_QUALITY, THUMBNAIL_WIDTH};

/// One published frame event.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameEvent {
    pub frame_id: u64,
    /// Unix seconds.
    pub timestamp: f64,
    pub dimensions: FrameDimensions,
    /// Mean grayscale intensity, 0..=255.
    pub brightness: f64,
    /// `None` on the first frame (no prior frame to compare against).
    pub motion_detected: Option<bool>,
    pub results: Vec<ProcessingResult>,
    /// Set by the sink once the thumbnail is on disk.
    pub image_url: Option<String>,
}

struct SinkState {
    history: EventHistory,
    last_modified: DateTime<Utc>,
}

pub struct EventSink {
    settings: FeedSettings,
    thumbnails: ThumbnailStore,
    state: Mutex<SinkState>,
}

impl EventSink {
    pub fn new(settings: FeedSettings) -> Self {
        let thumbnails = ThumbnailStore::new(settings.images_dir.clone());
        let state = SinkState {
            history: EventHistory::new(settings.max_items),
            last_modified: Utc::now(),
        };
        Self {
            settings,
            thumbnails,
            state: Mutex::new(state),
        }
    }

    pub fn settings(&self) -> &FeedSettings {
        &self.settings
    }

    pub fn thumbnails(&self) -> &ThumbnailStore {
        &self.thumbnails
    }

    /// Persist the thumbnail (if any), then store the event.
    ///
    /// A failed image save is logged and the event is stored without an
    /// image URL. Returns the URL of the stored thumbnail.
    pub fn append(&self, mut event: FrameEvent, image: Option<&Frame>) -> Result<Option<String>> {
        event.image_url = None;
        let mut saved_name = None;
        if let Some(frame) = image {
            let name = thumbnail_name(event.timestamp, event.frame_id);
            match self.thumbnails.save(frame, &name) {
                Ok(_) => {
                    event.image_url = Some(self.settings.image_url(&name));
                    saved_name = Some(name);
                }
                Err(err) => log::warn!("frame={} {}", event.frame_id, err),
            }
        }

        let evicted = {
            let mut state = self.lock()?;
            let evicted = state.history.push(event);
            state.last_modified = Utc::now();
            evicted
        };

        if let Some(old) = evicted {
            if let Some(name) = old.image_url.as_deref().and_then(file_name_of) {
                // The same frame may be appended twice; keep the live file.
                if saved_name.as_deref() != Some(name) {
                    self.thumbnails.remove(name);
                }
            }
        }
        Ok(saved_name.map(|name| self.settings.image_url(&name)))
    }

    /// Current history, oldest first.
    pub fn snapshot(&self) -> Result<Vec<FrameEvent>> {
        Ok(self.lock()?.history.iter().cloned().collect())
    }

    /// RSS document for the current history, newest first.
    pub fn render_feed(&self) -> Result<Vec<u8>> {
        let (events, last_modified) = {
            let state = self.lock()?;
            let events: Vec<FrameEvent> = state.history.iter().rev().cloned().collect();
            (events, state.last_modified)
        };
        render_rss(&self.settings, &events, last_modified)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.history.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn last_modified(&self) -> Result<DateTime<Utc>> {
        Ok(self.lock()?.last_modified)
    }

    /// Start the HTTP server for this sink on `settings().bind_addr`.
    pub fn serve(self: &Arc<Self>) -> Result<ServerHandle> {
        FeedServer::new(self.settings.bind_addr.clone(), Arc::clone(self)).spawn()
    }

    fn lock(&self) -> Result<MutexGuard<'_, SinkState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("event sink lock poisoned"))
    }
}

fn file_name_of(url: &str) -> Option<&str> {
    url.rsplit('/').next().filter(|name| !name.is_empty())
}
