//! Music player state and intents.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use weckpi_state::StateStore;

use crate::error::AppResult;
use crate::schema::{number, read};

/// Action skipping to the next queue item.
pub const NEXT_SONG: &str = "music.nextSong";
/// Action returning to the previous queue item.
pub const PREVIOUS_SONG: &str = "music.previousSong";
/// Action stopping playback.
pub const STOP: &str = "music.stop";

const QUEUE: &str = "music.queue";
const QUEUE_POSITION: &str = "music.queuePosition";
const POSITION: &str = "music.position";
const IS_PLAYING: &str = "music.isPlaying";
const SHUFFLE: &str = "music.shuffle";
const REPEAT: &str = "music.repeat";
const VOLUME: &str = "music.volume";

fn default_image() -> String {
    "/song.svg".to_string()
}

/// One entry of the play queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Track title.
    pub title: String,
    /// Performing artist.
    pub artist: String,
    /// Album name.
    pub album: String,
    /// Cover image URL.
    #[serde(default = "default_image")]
    pub image: String,
    /// Track length in seconds.
    pub duration: f64,
}

/// Read accessors and intents for the `music` subtree.
#[derive(Debug, Clone, Copy)]
pub struct Music<'a> {
    store: &'a StateStore,
}

impl<'a> Music<'a> {
    /// Creates a view over `store`.
    pub fn new(store: &'a StateStore) -> Self {
        Self { store }
    }

    /// The play queue.
    pub fn queue(&self) -> AppResult<Vec<QueueItem>> {
        read(self.store, QUEUE)
    }

    /// Index of the current item in the queue.
    pub fn queue_position(&self) -> AppResult<usize> {
        read(self.store, QUEUE_POSITION)
    }

    /// Playback position in the current item, in seconds.
    pub fn position(&self) -> AppResult<f64> {
        read(self.store, POSITION)
    }

    /// Whether playback is running.
    pub fn is_playing(&self) -> AppResult<bool> {
        read(self.store, IS_PLAYING)
    }

    /// Whether shuffle is enabled.
    pub fn shuffle(&self) -> AppResult<bool> {
        read(self.store, SHUFFLE)
    }

    /// Whether repeat is enabled.
    pub fn repeat(&self) -> AppResult<bool> {
        read(self.store, REPEAT)
    }

    /// Playback volume, 0 to 100.
    pub fn volume(&self) -> AppResult<f64> {
        read(self.store, VOLUME)
    }

    /// The queue item at the current position, if the position is in range.
    pub fn current_item(&self) -> AppResult<Option<QueueItem>> {
        let position = self.queue_position()?;
        Ok(self.queue()?.into_iter().nth(position))
    }

    /// Flips play/pause. Returns the new value.
    pub fn toggle_is_playing(&self) -> AppResult<bool> {
        self.toggle(IS_PLAYING)
    }

    /// Flips shuffle. Returns the new value.
    pub fn toggle_shuffle(&self) -> AppResult<bool> {
        self.toggle(SHUFFLE)
    }

    /// Flips repeat. Returns the new value.
    pub fn toggle_repeat(&self) -> AppResult<bool> {
        self.toggle(REPEAT)
    }

    /// Jumps to a queue index.
    pub fn set_queue_position(&self, index: usize) -> AppResult<()> {
        Ok(self.store.set_str(QUEUE_POSITION, Value::from(index))?)
    }

    /// Seeks within the current item.
    pub fn set_position(&self, seconds: f64) -> AppResult<()> {
        Ok(self.store.set_str(POSITION, number(seconds)?)?)
    }

    /// Changes the volume.
    pub fn set_volume(&self, volume: f64) -> AppResult<()> {
        Ok(self.store.set_str(VOLUME, number(volume)?)?)
    }

    fn toggle(&self, path: &str) -> AppResult<bool> {
        let next = !read::<bool>(self.store, path)?;
        self.store.set_str(path, Value::Bool(next))?;
        Ok(next)
    }
}
