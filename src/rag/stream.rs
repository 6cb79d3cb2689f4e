use futures::{ Stream, StreamExt };
use log::{ debug, error, info };
use serde::Serialize;
use std::error::Error as StdError;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::metrics::{ completion_metrics, parse_ttft };
use crate::config::catalog::CloudCatalog;
use crate::llm::chat::{ BackendClient, PredictRequest };
use crate::llm::{ resolve_backend, InferenceMode };
use crate::models::chat::{ ChatHistory, ChatSettings, Document };
use crate::models::metrics::{ MetricsHistory, MetricsRecord };

pub const ERROR_PREFIX: &str = "*** ERR: Unable to process query. ***\n\nMessage: ";
pub const EMPTY_HOST_MESSAGE: &str = "Hostname/IP field cannot be empty. ";

/// UI state after one step of a streamed answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Contents of the input box; always cleared once a question is submitted.
    pub input: String,
    pub chat_history: ChatHistory,
    pub documents: Option<Vec<Document>>,
    pub metrics: MetricsHistory,
}

pub type SnapshotStream = Pin<Box<dyn Stream<Item = Snapshot> + Send>>;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("{0}")]
    Backend(Box<dyn StdError + Send + Sync>),
    #[error("Response stream ended before reporting time to first token")]
    MissingTtft,
    #[error("Invalid time to first token value: '{0}'")]
    InvalidTtft(String),
    #[error("Snapshot consumer went away")]
    Closed,
}

impl From<Box<dyn StdError + Send + Sync>> for StreamError {
    fn from(err: Box<dyn StdError + Send + Sync>) -> Self {
        StreamError::Backend(err)
    }
}

struct Request {
    client: Arc<dyn BackendClient>,
    catalog: Arc<CloudCatalog>,
    settings: ChatSettings,
    question: String,
}

/// Answer text and documents gathered so far, kept for error reporting.
#[derive(Default)]
struct Progress {
    documents: Vec<Document>,
    answer: String,
    chunks: usize,
    metrics_index: Option<usize>,
}

/// Streams the answer to `question` as a sequence of UI snapshots.
///
/// The history and metrics are taken by value; the last snapshot carries their
/// updated versions and replaces the caller's copies. The producer waits for each
/// snapshot to be consumed before continuing and stops when the stream is dropped.
pub fn stream_predict(
    client: Arc<dyn BackendClient>,
    catalog: Arc<CloudCatalog>,
    settings: ChatSettings,
    question: String,
    metrics: MetricsHistory,
    history: ChatHistory
) -> SnapshotStream {
    let (tx, rx) = mpsc::channel(1);
    let request = Request { client, catalog, settings, question };

    tokio::spawn(async move {
        produce(tx, request, metrics, history).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

fn missing_host(settings: &ChatSettings) -> bool {
    settings.inference_mode == InferenceMode::Microservice &&
        settings.models.nim_model_ip.trim().is_empty() &&
        !settings.models.is_local_nim
}

async fn emit(tx: &mpsc::Sender<Snapshot>, snapshot: Snapshot) -> Result<(), StreamError> {
    tx.send(snapshot).await.map_err(|_| StreamError::Closed)
}

async fn produce(
    tx: mpsc::Sender<Snapshot>,
    request: Request,
    mut metrics: MetricsHistory,
    history: ChatHistory
) {
    if missing_host(&request.settings) {
        info!("Rejecting question: remote microservice selected without a host");
        let chat_history = history.with_turn(
            &request.question,
            &format!("{}{}", ERROR_PREFIX, EMPTY_HOST_MESSAGE),
            &[],
            None
        );
        let _ = emit(&tx, Snapshot {
            input: String::new(),
            chat_history,
            documents: None,
            metrics,
        }).await;
        return;
    }

    let mut progress = Progress::default();
    match generate(&tx, &request, &mut metrics, &history, &mut progress).await {
        Ok(()) => {}
        Err(StreamError::Closed) => {
            debug!("Snapshot stream dropped by consumer, stopping generation");
        }
        Err(e) => {
            error!(
                "Unable to process query after {} chunk(s): {}",
                progress.chunks,
                e
            );
            let mut chat_history = history;
            if progress.chunks > 0 {
                chat_history.push(
                    &request.question,
                    &progress.answer,
                    progress.documents,
                    progress.metrics_index
                );
            }
            chat_history.push(
                &request.question,
                &format!("{}{}", ERROR_PREFIX, e),
                Vec::new(),
                None
            );
            let _ = emit(&tx, Snapshot {
                input: String::new(),
                chat_history,
                documents: None,
                metrics,
            }).await;
        }
    }
}

async fn generate(
    tx: &mpsc::Sender<Snapshot>,
    request: &Request,
    metrics: &mut MetricsHistory,
    history: &ChatHistory,
    progress: &mut Progress
) -> Result<(), StreamError> {
    let settings = &request.settings;
    let question = request.question.as_str();

    let e2e_start = Instant::now();
    progress.documents = request.client.search(question).await?;
    let retrieval_ms = e2e_start.elapsed().as_millis() as u64;
    debug!("Retrieved {} documents in {}ms", progress.documents.len(), retrieval_ms);

    let backend = resolve_backend(settings.inference_mode, &settings.models, &request.catalog);
    info!(
        "Answering with {} ({:?}, model: {})",
        settings.inference_mode,
        backend.kind,
        backend.model_id
    );
    let predict = PredictRequest::new(
        question,
        settings.inference_mode,
        &backend,
        &settings.models,
        &settings.sampling
    );
    let mut fragments = request.client.predict(predict).await?;

    let first = match fragments.next().await {
        Some(fragment) => fragment?,
        None => {
            return Err(StreamError::MissingTtft);
        }
    };
    let first_token_at = Instant::now();
    let ttft_ms = parse_ttft(&first).ok_or_else(|| StreamError::InvalidTtft(first.clone()))?;
    let index = metrics.insert_initial(MetricsRecord {
        inference_mode: settings.inference_mode,
        model: backend.model_id.clone(),
        retrieval_ms,
        ttft_ms,
        completion: None,
    });
    progress.metrics_index = Some(index);
    emit(tx, Snapshot {
        input: String::new(),
        chat_history: history.clone(),
        documents: Some(progress.documents.clone()),
        metrics: metrics.clone(),
    }).await?;

    while let Some(fragment) = fragments.next().await {
        progress.answer.push_str(&fragment?);
        progress.chunks += 1;
        emit(tx, Snapshot {
            input: String::new(),
            chat_history: history.with_turn(
                question,
                &progress.answer,
                &progress.documents,
                Some(index)
            ),
            documents: Some(progress.documents.clone()),
            metrics: metrics.clone(),
        }).await?;
    }

    let now = Instant::now();
    let done = completion_metrics(
        &progress.answer,
        now.duration_since(first_token_at),
        now.duration_since(e2e_start)
    );
    info!(
        "Turn {} complete: {} chunks, ~{} tokens in {}ms",
        index,
        progress.chunks,
        done.tokens,
        done.e2e_ms
    );
    metrics.complete(index, done);

    emit(tx, Snapshot {
        input: String::new(),
        chat_history: history.with_turn(
            question,
            &progress.answer,
            &progress.documents,
            Some(index)
        ),
        documents: Some(progress.documents.clone()),
        metrics: metrics.clone(),
    }).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelSelection;
    use crate::llm::chat::{ FragmentStream, SamplingParams };
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{ AtomicUsize, Ordering };

    struct CountingClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BackendClient for CountingClient {
        async fn search(
            &self,
            _question: &str
        ) -> Result<Vec<Document>, Box<dyn StdError + Send + Sync>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn predict(
            &self,
            _request: PredictRequest
        ) -> Result<FragmentStream, Box<dyn StdError + Send + Sync>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Box::pin(futures::stream::iter(vec![Ok("5".to_string())])))
        }

        async fn upload(&self, _file: &Path) -> Result<(), Box<dyn StdError + Send + Sync>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn microservice_settings(ip: &str, is_local_nim: bool) -> ChatSettings {
        ChatSettings {
            inference_mode: InferenceMode::Microservice,
            models: ModelSelection {
                nim_model_ip: ip.to_string(),
                nim_local_model_id: "nvcr.io/nim/meta/llama3-8b-instruct:latest".to_string(),
                is_local_nim,
                ..ModelSelection::default()
            },
            sampling: SamplingParams::default(),
        }
    }

    #[test]
    fn host_check_only_applies_to_remote_microservice() {
        assert!(missing_host(&microservice_settings("", false)));
        assert!(missing_host(&microservice_settings("   ", false)));
        assert!(!missing_host(&microservice_settings("", true)));
        assert!(!missing_host(&microservice_settings("10.0.0.2", false)));

        let mut cloud = microservice_settings("", false);
        cloud.inference_mode = InferenceMode::CloudEndpoint;
        assert!(!missing_host(&cloud));
    }

    #[tokio::test]
    async fn local_container_passes_validation_without_host() {
        let client = Arc::new(CountingClient { calls: AtomicUsize::new(0) });
        let snapshots: Vec<Snapshot> = stream_predict(
            client.clone(),
            Arc::new(CloudCatalog::default()),
            microservice_settings("", true),
            "hi".to_string(),
            MetricsHistory::new(),
            ChatHistory::new()
        ).collect().await;

        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        assert_eq!(snapshots.len(), 2);
        let record = snapshots[1].metrics.get(0).unwrap();
        assert_eq!(record.model, "meta/llama3-8b-instruct");
        assert!(record.is_complete());
    }

    #[tokio::test]
    async fn snapshot_serializes_history_and_metrics_map() {
        let client = Arc::new(CountingClient { calls: AtomicUsize::new(0) });
        let snapshots: Vec<Snapshot> = stream_predict(
            client,
            Arc::new(CloudCatalog::default()),
            microservice_settings("", true),
            "hi".to_string(),
            MetricsHistory::new(),
            ChatHistory::new()
        ).collect().await;

        let json = serde_json::to_value(&snapshots[0]).unwrap();
        assert_eq!(json["input"], "");
        assert!(json["chat_history"].as_array().unwrap().is_empty());
        assert_eq!(json["metrics"]["0"]["Time to First Token (TTFT)"], "5ms");
    }
}
