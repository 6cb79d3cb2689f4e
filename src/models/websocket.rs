use crate::models::chat::ChatSettings;
use crate::rag::stream::Snapshot;
use serde::{ Serialize, Deserialize };

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "chat")] Chat {
        content: String,
        settings: ChatSettings,
    },
    #[serde(rename = "clear")]
    Clear,
}

#[derive(Serialize, Debug)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "snapshot")] Snapshot(Snapshot),
    #[serde(rename = "done")] Done {
        timestamp: i64,
    },
    #[serde(rename = "cleared")]
    Cleared,
    #[serde(rename = "error")] Error {
        message: String,
    },
    #[serde(rename = "processing")]
    Processing,
}
