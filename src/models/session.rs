use crate::models::chat::ChatHistory;
use crate::models::metrics::MetricsHistory;
use crate::rag::stream::Snapshot;
use uuid::Uuid;

/// In-memory chat state of one connected browser.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub history: ChatHistory,
    pub metrics: MetricsHistory,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            history: ChatHistory::new(),
            metrics: MetricsHistory::new(),
        }
    }

    /// Takes over the history and metrics carried by the latest snapshot.
    pub fn adopt(&mut self, snapshot: &Snapshot) {
        self.history = snapshot.chat_history.clone();
        self.metrics = snapshot.metrics.clone();
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.metrics.clear();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
