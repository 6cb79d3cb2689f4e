pub mod chain_server;

use async_trait::async_trait;
use futures::{ Future, Stream };
use serde::{ Deserialize, Serialize };
use std::error::Error as StdError;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{ BackendKind, InferenceMode, ModelSelection, ResolvedBackend };
use crate::models::chat::Document;
use self::chain_server::ChainServerClient;

pub type FragmentStream = Pin<
    Box<dyn Stream<Item = Result<String, Box<dyn StdError + Send + Sync>>> + Send>
>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub max_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.999,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            max_tokens: 250,
        }
    }
}

/// Generation request as sent to the chain server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictRequest {
    pub question: String,
    pub inference_mode: String,
    pub backend_kind: BackendKind,
    pub local_model_id: String,
    pub cloud_model_id: String,
    pub nim_model_ip: String,
    pub nim_model_port: String,
    pub nim_model_id: String,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub stream: bool,
    pub max_tokens: u32,
}

impl PredictRequest {
    pub fn new(
        question: &str,
        mode: InferenceMode,
        backend: &ResolvedBackend,
        models: &ModelSelection,
        sampling: &SamplingParams
    ) -> Self {
        let nim_model_id = match backend.kind {
            BackendKind::LocalContainer | BackendKind::RemoteContainer => backend.model_id.clone(),
            _ => models.nim_model_id.clone(),
        };
        Self {
            question: question.to_string(),
            inference_mode: mode.config_token().to_string(),
            backend_kind: backend.kind,
            local_model_id: models.local_model_id.clone(),
            cloud_model_id: backend.cloud_model_id.clone(),
            nim_model_ip: backend.host.clone(),
            nim_model_port: backend.port.clone(),
            nim_model_id,
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            frequency_penalty: sampling.frequency_penalty,
            presence_penalty: sampling.presence_penalty,
            stream: true,
            max_tokens: sampling.max_tokens,
        }
    }
}

/// Retrieval, generation and ingestion as offered by the RAG backend.
#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn search(
        &self,
        question: &str
    ) -> Result<Vec<Document>, Box<dyn StdError + Send + Sync>>;

    /// The first fragment is the time-to-first-token in milliseconds; the rest is answer text.
    async fn predict(
        &self,
        request: PredictRequest
    ) -> Result<FragmentStream, Box<dyn StdError + Send + Sync>>;

    /// Pushes one document into the vector database.
    async fn upload(&self, file: &Path) -> Result<(), Box<dyn StdError + Send + Sync>>;
}

pub fn create_streaming_response<F, Fut>(response_fn: F) -> FragmentStream
    where
        F: FnOnce(mpsc::Sender<Result<String, Box<dyn StdError + Send + Sync>>>) -> Fut +
            Send +
            'static,
        Fut: Future<Output = ()> + Send + 'static
{
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        response_fn(tx).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

pub fn new_client(
    base_url: &str,
    max_docs: usize
) -> Result<Arc<dyn BackendClient>, Box<dyn StdError + Send + Sync>> {
    let client = ChainServerClient::new(base_url, max_docs)?;
    Ok(Arc::new(client))
}
