use super::{ provided_api_key, Shared };
use crate::cli::Args;
use crate::lifecycle::actions::Action;
use crate::lifecycle::panel::{ Notice, PanelState };
use crate::lifecycle::LifecycleError;
use crate::llm::chat::SamplingParams;
use crate::llm::InferenceMode;
use std::error::Error;
use std::net::SocketAddr;
use std::path::{ Path as FsPath, PathBuf };
use axum::{
    routing::{ get, post },
    Router,
    Json,
    extract::{ DefaultBodyLimit, Multipart, Path, Request, State },
    middleware::{ self, Next },
    response::{ Html, IntoResponse, Response },
    http::StatusCode,
};
use serde::{ Deserialize, Serialize };
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, error, warn };

const INDEX_HTML: &str = include_str!("../../static/index.html");

/// Request body cap for document uploads.
const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    shared: Shared,
    upload_dir: PathBuf,
    ws_port: u16,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct ActionResponse {
    panel: PanelState,
    notices: Vec<Notice>,
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
}

#[derive(Serialize)]
struct ConfigResponse {
    ws_port: u16,
    sampling: SamplingParams,
    cloud_models: Vec<String>,
    inference_modes: Vec<&'static str>,
}

#[derive(Deserialize)]
pub struct ModeRequest {
    pub mode: InferenceMode,
}

#[derive(Deserialize)]
pub struct ImageRequest {
    pub image: String,
}

fn failure(code: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorResponse { success: false, message: message.into() };
    (code, Json(body)).into_response()
}

/// Port part of a `host:port` listen address.
fn ws_port(addr: &str) -> Option<u16> {
    addr.rsplit(':').next()?.parse().ok()
}

pub async fn start_http_server(
    http_port: u16,
    shared: Shared,
    api_key: Option<String>,
    args: &Args
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = format!("0.0.0.0:{}", http_port).parse::<SocketAddr>()?;
    let ws_port = ws_port(&args.server_addr).ok_or_else(||
        format!("Invalid server address: '{}'", args.server_addr)
    )?;
    info!("Starting HTTP API server on: http://{}", addr);

    let app = router(AppState {
        shared,
        upload_dir: PathBuf::from(&args.upload_dir),
        ws_port,
        api_key,
    });

    tokio::spawn(async move {
        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                    error!("HTTP server error: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
            }
        }
    });

    info!("HTTP server started");
    Ok(())
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/api/config", get(config_handler))
        .route("/api/panel", get(panel_handler))
        .route("/api/inference-mode", post(mode_handler))
        .route("/api/nim-image", post(image_handler))
        .route("/api/actions/{action}", post(action_handler))
        .route(
            "/api/documents",
            post(upload_handler).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .layer(cors)
        .with_state(state)
}

/// Rejects requests without the configured key. Open when no key is set.
async fn require_api_key(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(required) = state.api_key.as_deref() else {
        return next.run(req).await;
    };
    let header = req.headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok());
    if provided_api_key(header, req.uri().query()).as_deref() == Some(required) {
        next.run(req).await
    } else {
        warn!("{} {}: bad or missing API key", req.method(), req.uri().path());
        failure(StatusCode::UNAUTHORIZED, "Unauthorized")
    }
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn config_handler(State(state): State<AppState>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        ws_port: state.ws_port,
        sampling: state.shared.sampling.clone(),
        cloud_models: state.shared.catalog.labels().map(str::to_owned).collect(),
        inference_modes: [
            InferenceMode::CloudEndpoint,
            InferenceMode::LocalSystem,
            InferenceMode::Microservice,
        ]
            .iter()
            .map(|m| m.label())
            .collect(),
    })
}

async fn panel_handler(State(state): State<AppState>) -> Json<PanelState> {
    Json(state.shared.panel_snapshot().await)
}

async fn mode_handler(State(state): State<AppState>, Json(req): Json<ModeRequest>) -> Response {
    let _serial = state.shared.actions.lock().await;
    let mut panel = state.shared.panel_snapshot().await;
    state.shared.lifecycle.set_inference_mode(&mut panel, req.mode);
    state.shared.commit_panel(panel.clone()).await;
    Json(ActionResponse { panel, notices: Vec::new() }).into_response()
}

async fn image_handler(State(state): State<AppState>, Json(req): Json<ImageRequest>) -> Response {
    let _serial = state.shared.actions.lock().await;
    let mut panel = state.shared.panel_snapshot().await;
    state.shared.lifecycle.select_nim_image(&mut panel, &req.image);
    state.shared.commit_panel(panel.clone()).await;
    Json(ActionResponse { panel, notices: Vec::new() }).into_response()
}

async fn action_handler(State(state): State<AppState>, Path(action): Path<String>) -> Response {
    let action = match action.parse::<Action>() {
        Ok(action) => action,
        Err(e) => {
            warn!("{}", e);
            return failure(StatusCode::NOT_FOUND, e.to_string());
        }
    };

    let _serial = state.shared.actions.lock().await;
    let mut panel = state.shared.panel_snapshot().await;
    let notices = state.shared.lifecycle.dispatch(&mut panel, action).await;
    state.shared.commit_panel(panel.clone()).await;
    Json(ActionResponse { panel, notices }).into_response()
}

/// Writes one multipart field into the upload directory under its bare file name.
async fn stage_file(dir: &FsPath, name: &str, bytes: &[u8]) -> Result<PathBuf, LifecycleError> {
    let file_name = FsPath::new(name)
        .file_name()
        .ok_or(LifecycleError::MissingFileName)?
        .to_owned();
    let staging = |source| LifecycleError::Staging { name: name.to_string(), source };

    tokio::fs::create_dir_all(dir).await.map_err(staging)?;
    let path = dir.join(file_name);
    tokio::fs::write(&path, bytes).await.map_err(staging)?;
    Ok(path)
}

/// Stages every file field of the request into `dir`.
async fn stage_fields(dir: &FsPath, multipart: &mut Multipart) -> Result<Vec<PathBuf>, Response> {
    let mut staged = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => {
                return Ok(staged);
            }
            Err(e) => {
                return Err(failure(StatusCode::BAD_REQUEST, e.to_string()));
            }
        };
        let name = match field.file_name() {
            Some(name) => name.to_string(),
            None => {
                continue;
            }
        };
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                return Err(failure(StatusCode::BAD_REQUEST, e.to_string()));
            }
        };
        match stage_file(dir, &name, &bytes).await {
            Ok(path) => staged.push(path),
            Err(e) => {
                error!("{}", e);
                return Err(failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
            }
        }
    }
}

async fn discard_staged(dir: &FsPath) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove staged uploads in {}: {}", dir.display(), e),
    }
}

async fn upload_handler(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    // one directory per request: same-named files from concurrent uploads must not collide
    let dir = state.upload_dir.join(uuid::Uuid::new_v4().to_string());
    let staged = match stage_fields(&dir, &mut multipart).await {
        Ok(staged) => staged,
        Err(resp) => {
            discard_staged(&dir).await;
            return resp;
        }
    };
    info!("Staged {} document(s) for upload", staged.len());

    let _serial = state.shared.actions.lock().await;
    let mut panel = state.shared.panel_snapshot().await;
    let notices = state.shared.lifecycle.upload_documents(&mut panel, staged).await;
    state.shared.commit_panel(panel.clone()).await;
    discard_staged(&dir).await;
    Json(ActionResponse { panel, notices }).into_response()
}
