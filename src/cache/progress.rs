//! Progress events pushed to observers while a build runs.

use serde::Serialize;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// One event on an instance's observer channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BuildEvent {
    Progress {
        /// Fraction complete in `0.0..=1.0`.
        progress: f32,
        current: usize,
        total: usize,
        status: String,
    },
    LoadingComplete {
        movies: usize,
    },
    Error {
        message: String,
    },
}

impl BuildEvent {
    pub fn progress(current: usize, total: usize, status: impl Into<String>) -> Self {
        let progress = if total == 0 {
            0.0
        } else {
            (current as f32 / total as f32).clamp(0.0, 1.0)
        };
        BuildEvent::Progress {
            progress,
            current,
            total,
            status: status.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BuildEvent::Progress { .. })
    }
}

/// Fan-out sender for [`BuildEvent`]s. Sending without subscribers is a no-op.
#[derive(Debug, Clone)]
pub struct ProgressChannel {
    tx: broadcast::Sender<BuildEvent>,
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressChannel {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BuildEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: BuildEvent) {
        let _ = self.tx.send(event);
    }
}
