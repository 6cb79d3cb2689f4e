use async_trait::async_trait;
use futures::StreamExt;
use log::{ debug, info };
use reqwest::multipart::{ Form, Part };
use reqwest::Client as HttpClient;
use serde::Serialize;
use std::error::Error as StdError;
use std::path::Path;
use std::time::Instant;

use super::{ create_streaming_response, BackendClient, FragmentStream, PredictRequest };
use crate::llm::BackendKind;
use crate::models::chat::Document;

#[derive(Debug, Clone)]
pub struct ChainServerClient {
    http: HttpClient,
    base_url: String,
    max_docs: usize,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    top_k: usize,
}

impl ChainServerClient {
    pub fn new(base_url: &str, max_docs: usize) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err("Chain server URL cannot be empty".into());
        }
        let http = HttpClient::builder()
            .build()
            .map_err(|e| Box::new(e) as Box<dyn StdError + Send + Sync>)?;

        Ok(Self { http, base_url, max_docs })
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }
}

/// Takes the longest valid UTF-8 prefix out of `pending`, leaving a split
/// multi-byte sequence behind for the next chunk.
fn drain_utf8(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(text) => {
            let text = text.to_string();
            pending.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let rest = pending.split_off(valid);
            let text = String::from_utf8_lossy(pending).into_owned();
            *pending = rest;
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            text
        }
    }
}

#[async_trait]
impl BackendClient for ChainServerClient {
    async fn search(
        &self,
        question: &str
    ) -> Result<Vec<Document>, Box<dyn StdError + Send + Sync>> {
        let req = SearchRequest { query: question, top_k: self.max_docs };
        let resp = self.http
            .post(self.url("/documentSearch"))
            .json(&req)
            .send().await?
            .error_for_status()?;
        let documents = resp.json::<Vec<Document>>().await?;
        debug!("Retrieved {} documents", documents.len());
        Ok(documents)
    }

    async fn predict(
        &self,
        request: PredictRequest
    ) -> Result<FragmentStream, Box<dyn StdError + Send + Sync>> {
        let url = self.url("/generate");
        let client = self.http.clone();
        info!(
            "Generating with backend {:?} (model: {})",
            request.backend_kind,
            match request.backend_kind {
                BackendKind::Cloud => &request.cloud_model_id,
                BackendKind::LocalServer => &request.local_model_id,
                _ => &request.nim_model_id,
            }
        );

        Ok(
            create_streaming_response(move |tx| async move {
                let started = Instant::now();
                let response = match client.post(&url).json(&request).send().await {
                    Ok(resp) => resp,
                    Err(e) => {
                        let _ = tx.send(Err(Box::new(e) as _)).await;
                        return;
                    }
                };
                if let Err(e) = response.error_for_status_ref() {
                    let _ = tx.send(Err(Box::new(e) as _)).await;
                    return;
                }

                let mut body = response.bytes_stream();
                let mut pending: Vec<u8> = Vec::new();
                let mut ttft_sent = false;

                while let Some(chunk) = body.next().await {
                    match chunk {
                        Ok(buf) => {
                            if !ttft_sent {
                                let ttft = started.elapsed().as_millis().to_string();
                                if tx.send(Ok(ttft)).await.is_err() {
                                    return;
                                }
                                ttft_sent = true;
                            }
                            pending.extend_from_slice(&buf);
                            let text = drain_utf8(&mut pending);
                            if !text.is_empty() && tx.send(Ok(text)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(Box::new(e) as _)).await;
                            return;
                        }
                    }
                }

                if !ttft_sent {
                    let ttft = started.elapsed().as_millis().to_string();
                    let _ = tx.send(Ok(ttft)).await;
                }
                if !pending.is_empty() {
                    let _ = tx.send(Ok(String::from_utf8_lossy(&pending).into_owned())).await;
                }
            })
        )
    }

    async fn upload(&self, path: &Path) -> Result<(), Box<dyn StdError + Send + Sync>> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| format!("Invalid file name: {}", path.display()))?
            .to_string();
        let bytes = tokio::fs::read(path).await
            .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name.clone()));

        self.http
            .post(self.url("/uploadDocument"))
            .multipart(form)
            .send().await?
            .error_for_status()?;
        info!("Uploaded '{}' to the vector database", file_name);
        Ok(())
    }
}
