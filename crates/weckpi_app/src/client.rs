//! Client facade tying the WeckPi state tree to a sync session.

use std::sync::Arc;
use tracing::debug;
use weckpi_state::StateStore;
use weckpi_sync_engine::{EventStream, SyncConfig, SyncSession, SyncTransport};

use crate::alarm::Alarm;
use crate::error::AppResult;
use crate::music::{Music, NEXT_SONG, PREVIOUS_SONG, STOP};
use crate::schema::{app_schema, read};

/// A WeckPi client: the application state plus the session keeping it in
/// sync with the core.
pub struct WeckPiClient<T: SyncTransport + 'static> {
    session: SyncSession<T>,
}

impl<T: SyncTransport + 'static> WeckPiClient<T> {
    /// Creates a disconnected client talking through `transport`.
    pub fn new(config: SyncConfig, transport: Arc<T>) -> AppResult<Self> {
        let store = Arc::new(StateStore::new(app_schema()?));
        Ok(Self {
            session: SyncSession::new(config, transport, store),
        })
    }

    /// The underlying sync session.
    pub fn session(&self) -> &SyncSession<T> {
        &self.session
    }

    /// The application state.
    pub fn store(&self) -> &StateStore {
        self.session.store()
    }

    /// Music accessors and intents.
    pub fn music(&self) -> Music<'_> {
        Music::new(self.store())
    }

    /// Alarm accessors and intents.
    pub fn alarm(&self) -> Alarm<'_> {
        Alarm::new(self.store())
    }

    /// Whether the core reports itself as initialized.
    pub fn initialized(&self) -> AppResult<bool> {
        read(self.store(), "initialized")
    }

    /// Asks the core to skip to the next song.
    pub fn next_song(&self) -> bool {
        self.action(NEXT_SONG)
    }

    /// Asks the core to go back to the previous song.
    pub fn previous_song(&self) -> bool {
        self.action(PREVIOUS_SONG)
    }

    /// Asks the core to stop playback.
    pub fn stop(&self) -> bool {
        self.action(STOP)
    }

    /// Opens the connection to the core.
    pub async fn connect(&self) -> AppResult<()> {
        Ok(self.session.connect().await?)
    }

    /// Processes transport events until the stream ends.
    pub async fn run(&self, events: EventStream) -> AppResult<()> {
        Ok(self.session.run(events).await?)
    }

    /// Disconnects from the core.
    pub async fn close(&self) -> AppResult<()> {
        Ok(self.session.close().await?)
    }

    fn action(&self, name: &str) -> bool {
        let sent = self.session.send_action(name);
        if !sent {
            debug!(action = name, "action not sent");
        }
        sent
    }
}
