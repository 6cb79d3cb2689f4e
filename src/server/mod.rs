pub mod api;
pub mod websocket;

use crate::cli::Args;
use crate::config::catalog::CloudCatalog;
use crate::lifecycle::panel::PanelState;
use crate::lifecycle::Lifecycle;
use crate::llm::chat::{ BackendClient, SamplingParams };
use log::{ info, warn };
use std::error::Error;
use std::sync::Arc;
use tokio::sync::Mutex;
use url::form_urlencoded;

/// Everything the WebSocket and HTTP servers share.
#[derive(Clone)]
pub struct Shared {
    pub client: Arc<dyn BackendClient>,
    pub catalog: Arc<CloudCatalog>,
    pub lifecycle: Arc<Lifecycle>,
    pub panel: Arc<Mutex<PanelState>>,
    /// Held for the whole of a lifecycle action so actions run one at a time.
    pub actions: Arc<Mutex<()>>,
    pub sampling: SamplingParams,
}

impl Shared {
    pub fn new(
        client: Arc<dyn BackendClient>,
        catalog: Arc<CloudCatalog>,
        lifecycle: Arc<Lifecycle>,
        panel: PanelState,
        sampling: SamplingParams
    ) -> Self {
        Self {
            client,
            catalog,
            lifecycle,
            panel: Arc::new(Mutex::new(panel)),
            actions: Arc::new(Mutex::new(())),
            sampling,
        }
    }

    /// Copy of the current panel. Actions work on a copy so the panel stays readable while scripts run.
    pub async fn panel_snapshot(&self) -> PanelState {
        self.panel.lock().await.clone()
    }

    pub async fn commit_panel(&self, panel: PanelState) {
        *self.panel.lock().await = panel;
    }
}

/// Key from the `X-API-Key` header, falling back to the `api_key` query parameter.
pub(crate) fn provided_api_key(header: Option<&str>, query: Option<&str>) -> Option<String> {
    header.map(str::to_owned).or_else(|| {
        form_urlencoded
            ::parse(query.unwrap_or("").as_bytes())
            .find(|(k, _)| k == "api_key")
            .map(|(_, v)| v.into_owned())
    })
}

pub struct Server {
    addr: String,
    api_key: Option<String>,
    shared: Shared,
    args: Args,
}

impl Server {
    pub fn new(addr: String, shared: Shared, api_key: Option<String>, args: Args) -> Self {
        let api_key = api_key.filter(|k| !k.trim().is_empty());

        if api_key.is_some() {
            info!("Server configured with API Key authentication.");
        } else {
            warn!("Server configured WITHOUT API Key authentication. Connections are open.");
        }

        Self { addr, api_key, shared, args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        api::start_http_server(
            self.args.http_port,
            self.shared.clone(),
            self.api_key.clone(),
            &self.args
        ).await?;
        websocket::start_ws_server(&self.addr, self.shared.clone(), self.api_key.clone()).await
    }
}
