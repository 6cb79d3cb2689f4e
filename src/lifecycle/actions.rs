use log::{ info, warn };
use std::path::{ Path, PathBuf };
use std::str::FromStr;

use super::panel::*;
use super::{ scripts, Lifecycle, LifecycleError };
use crate::llm::{ is_valid_nim_image, nim_extract_model, InferenceMode, Quantization };

const UNGATED_MODELS: &[&str] = &["nvidia/Llama3-ChatQA-1.5-8B", "microsoft/Phi-3-mini-128k-instruct"];
const UPLOAD_EXTENSIONS: &[&str] = &["pdf", "html", "doc", "docx", "txt", "odt", "rtf", "tex"];

const SERVER_NOT_READY: &str =
    "[NOT READY] Start the Local Inference Server OR Select a Different Inference Mode.";
const NIM_NOT_READY: &str =
    "[NOT READY] Start the Local Microservice OR Select a Different Inference Mode.";
const MODEL_NOT_READY: &str = "[NOT READY] Select a model OR Select a Different Inference Mode.";
const STOP_NIM_BANNER: &str = "<br />Stop the local microservice before using a remote microservice.";

const GATED_WARNING: &str =
    "You are accessing a gated model and HUGGING_FACE_HUB_TOKEN is not detected!";
const SERVER_START_WARNING: &str =
    "ERR: You may have timed out or are facing memory issues. In AI Workbench, check Output > Chat for details.";
const EMPTY_IMAGE_WARNING: &str =
    "NIM container field cannot be empty. Specify a NIM container to run";
const INVALID_IMAGE_WARNING: &str =
    "User input is not a valid NIM container image format. Double check the spelling and try again.";
const PREFLIGHT_WARNING: &str =
    "You may have improper configurations set for this mode. Check the Output > Chat in the AI Workbench UI for details.";
const PREFETCH_WARNING: &str =
    "Ran into an error pulling the NIM container. Is your NGC_CLI_API_KEY correct? Check the Output > Chat in the AI Workbench UI for details.";
const NIM_START_WARNING: &str =
    "Ran into an issue starting up the NIM Container. Double check the spelling, and see Troubleshooting for details. ";
const NIM_STOP_WARNING: &str =
    "Ran into an issue stopping the NIM Container, try again. The service may still be running. ";
const CLEAR_WARNING: &str = "Your files may still be present in the database. Try again.";
const DB_BUSY_WARNING: &str =
    "Hang Tight! The Vector DB may be temporarily busy. Give it a moment, and then try again. ";
const VDB_WARMING_INFO: &str =
    "Inferencing is ready, but the Vector DB may still be spinning up. This can take a few moments to complete. ";
const RAG_START_WARNING: &str =
    "Something went wrong. Check the Output in AI Workbench, or try again. ";

/// Which of a start/stop button pair was clicked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Start,
    Stop,
}

/// Button clicks that carry no payload besides the panel itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    StartRag,
    DownloadModel,
    StartServer,
    StopServer,
    PrefetchNim,
    StartNim,
    StopNim,
    ClearDatabase,
    SelectRemoteNim,
    SelectLocalNim,
}

impl FromStr for Action {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start-rag" => Ok(Action::StartRag),
            "download-model" => Ok(Action::DownloadModel),
            "start-server" => Ok(Action::StartServer),
            "stop-server" => Ok(Action::StopServer),
            "prefetch-nim" => Ok(Action::PrefetchNim),
            "start-nim" => Ok(Action::StartNim),
            "stop-nim" => Ok(Action::StopNim),
            "clear-database" => Ok(Action::ClearDatabase),
            "select-remote-nim" => Ok(Action::SelectRemoteNim),
            "select-local-nim" => Ok(Action::SelectLocalNim),
            other => Err(LifecycleError::UnknownAction(other.to_string())),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn known_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| UPLOAD_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Listed document types, or anything whose contents are non-empty UTF-8 text.
async fn accepted_upload(path: &Path) -> bool {
    if known_extension(path) {
        return true;
    }
    match tokio::fs::read(path).await {
        Ok(bytes) => !bytes.is_empty() && std::str::from_utf8(&bytes).is_ok(),
        Err(_) => false,
    }
}

impl Lifecycle {
    pub async fn dispatch(&self, panel: &mut PanelState, action: Action) -> Vec<Notice> {
        info!("Lifecycle action {:?}", action);
        match action {
            Action::StartRag => self.start_rag(panel).await,
            Action::DownloadModel => self.download_model(panel).await,
            Action::StartServer => self.toggle_local_server(panel, Toggle::Start).await,
            Action::StopServer => self.toggle_local_server(panel, Toggle::Stop).await,
            Action::PrefetchNim => self.prefetch_nim(panel).await,
            Action::StartNim => self.toggle_local_nim(panel, Toggle::Start).await,
            Action::StopNim => self.toggle_local_nim(panel, Toggle::Stop).await,
            Action::ClearDatabase => self.clear_database(panel).await,
            Action::SelectRemoteNim => {
                self.select_remote_microservice(panel);
                Vec::new()
            }
            Action::SelectLocalNim => {
                self.select_local_microservice(panel);
                Vec::new()
            }
        }
    }

    fn is_gated(&self, model: &str) -> bool {
        !model.is_empty() && !UNGATED_MODELS.contains(&model) && !self.hf_token_present
    }

    pub fn set_inference_mode(&self, panel: &mut PanelState, mode: InferenceMode) {
        info!("Inference mode set to {}", mode);
        panel.inference_mode = mode;
    }

    /// Downloads the local model weights.
    pub async fn download_model(&self, panel: &mut PanelState) -> Vec<Notice> {
        if panel.inference_mode == InferenceMode::CloudEndpoint {
            return Vec::new();
        }
        if self.is_gated(&panel.local_model_id) {
            warn!("Refusing to download gated model {} without a token", panel.local_model_id);
            return vec![Notice::warning(GATED_WARNING)];
        }
        if panel.download_model.is(MODEL_DOWNLOADED) {
            return Vec::new();
        }

        let model = panel.local_model_id.clone();
        let rc = self.exec(scripts::DOWNLOAD_LOCAL, &[&model]).await;
        if rc == 0 {
            panel.download_model.set(MODEL_DOWNLOADED, Variant::Primary, false);
            panel.start_local_server.interactive = panel.start_local_server.is(START_SERVER);
            panel.stop_local_server.interactive = panel.stop_local_server.is(STOP_SERVER);
        } else {
            panel.download_model.set("Error, Try Again", Variant::Stop, true);
            panel.start_local_server.interactive = false;
            panel.stop_local_server.interactive = false;
        }
        Vec::new()
    }

    /// Starts or stops the local inference server, depending on the clicked button's label.
    pub async fn toggle_local_server(&self, panel: &mut PanelState, clicked: Toggle) -> Vec<Notice> {
        let label = match clicked {
            Toggle::Start => panel.start_local_server.label.clone(),
            Toggle::Stop => panel.stop_local_server.label.clone(),
        };
        if panel.inference_mode == InferenceMode::CloudEndpoint {
            return Vec::new();
        }
        if label != STOP_SERVER && self.is_gated(&panel.local_model_id) {
            warn!("Refusing to serve gated model {} without a token", panel.local_model_id);
            return vec![Notice::warning(GATED_WARNING)];
        }

        let mut notices = Vec::new();
        let (submit_ready, download_interactive) = match label.as_str() {
            START_SERVER => {
                self.exec(scripts::RAG_CONSOLIDATED, &[]).await;
                let model = panel.local_model_id.clone();
                let quant = panel.local_model_quantize
                    .parse::<Quantization>()
                    .unwrap_or(Quantization::FourBit);
                let rc = self.exec(scripts::START_LOCAL, &[&model, quant.config_token()]).await;
                if rc == 0 {
                    panel.start_local_server.set("Server Started", Variant::Primary, false);
                    panel.stop_local_server.set(STOP_SERVER, Variant::Secondary, true);
                    (true, false)
                } else {
                    notices.push(Notice::warning(SERVER_START_WARNING));
                    panel.start_local_server.set(INTERNAL_ERROR, Variant::Stop, false);
                    panel.stop_local_server.set(STOP_SERVER, Variant::Secondary, true);
                    (false, false)
                }
            }
            STOP_SERVER => {
                let rc = self.exec(scripts::STOP_LOCAL, &[]).await;
                if rc == 0 {
                    panel.start_local_server.set(START_SERVER, Variant::Secondary, true);
                    panel.stop_local_server.set("Server Stopped", Variant::Primary, false);
                    (false, !panel.download_model.is(MODEL_DOWNLOADED))
                } else {
                    panel.start_local_server.set(START_SERVER, Variant::Secondary, true);
                    panel.stop_local_server.set(INTERNAL_ERROR, Variant::Stop, false);
                    (true, false)
                }
            }
            _ => {
                return notices;
            }
        };

        panel.set_input_ready(submit_ready, SERVER_NOT_READY);
        panel.download_model.interactive = download_interactive;
        notices
    }

    /// Resets the microservice buttons after the container image was edited.
    pub fn select_nim_image(&self, panel: &mut PanelState, image: &str) {
        panel.nim_local_model_id = image.trim().to_string();
        let started = panel.start_local_nim.is(MICROSERVICE_STARTED);
        panel.prefetch_nim.set(PREFETCH_NIM, Variant::Secondary, !started);
        panel.start_local_nim.interactive = panel.start_local_nim.is(START_MICROSERVICE);
        panel.stop_local_nim.interactive = started;
    }

    /// Pulls the microservice container image ahead of starting it.
    pub async fn prefetch_nim(&self, panel: &mut PanelState) -> Vec<Notice> {
        if !panel.prefetch_nim.is(PREFETCH_NIM) {
            return Vec::new();
        }
        let image = panel.nim_local_model_id.clone();

        let rejection = if image.is_empty() {
            Some(EMPTY_IMAGE_WARNING)
        } else if !is_valid_nim_image(&image) {
            Some(INVALID_IMAGE_WARNING)
        } else if self.exec(scripts::NIM_PREFLIGHT, &[&image]).await != 0 {
            Some(PREFLIGHT_WARNING)
        } else if self.exec(scripts::NIM_PREFETCH, &[&image]).await != 0 {
            Some(PREFETCH_WARNING)
        } else {
            None
        };

        match rejection {
            Some(message) => {
                warn!("Prefetch of '{}' failed: {}", image, message);
                panel.prefetch_nim.set(PREFETCH_NIM, Variant::Secondary, true);
                panel.start_local_nim.interactive = false;
                panel.stop_local_nim.interactive = false;
                vec![Notice::warning(message)]
            }
            None => {
                panel.prefetch_nim.set("Container Pulled", Variant::Primary, false);
                panel.start_local_nim.interactive = panel.start_local_nim.is(START_MICROSERVICE);
                panel.stop_local_nim.interactive = panel.stop_local_nim.is(STOP_MICROSERVICE);
                Vec::new()
            }
        }
    }

    /// Starts or stops the local microservice container, depending on the clicked button's label.
    pub async fn toggle_local_nim(&self, panel: &mut PanelState, clicked: Toggle) -> Vec<Notice> {
        let label = match clicked {
            Toggle::Start => panel.start_local_nim.label.clone(),
            Toggle::Stop => panel.stop_local_nim.label.clone(),
        };
        let image = panel.nim_local_model_id.clone();
        let prefetch_untouched = panel.prefetch_nim.is(PREFETCH_NIM);
        let mut notices = Vec::new();

        // (start, stop, editable, banner, submittable, ready, prefetch interactive)
        let outcome = match label.as_str() {
            START_MICROSERVICE => {
                if !is_valid_nim_image(&image) {
                    notices.push(Notice::warning(INVALID_IMAGE_WARNING));
                    (
                        Control::new(START_MICROSERVICE, Variant::Secondary, false),
                        Control::new(STOP_MICROSERVICE, Variant::Secondary, true),
                        true, "", false, false, true,
                    )
                } else if self.exec(scripts::NIM_PREFLIGHT, &[&image]).await != 0 {
                    notices.push(Notice::warning(PREFLIGHT_WARNING));
                    (
                        Control::new(INTERNAL_ERROR, Variant::Stop, false),
                        Control::new(STOP_MICROSERVICE, Variant::Secondary, true),
                        true, "", false, false, true,
                    )
                } else {
                    let model = nim_extract_model(&image);
                    if self.exec(scripts::NIM_START, &[&image, &model]).await == 0 {
                        (
                            Control::new(MICROSERVICE_STARTED, Variant::Primary, false),
                            Control::new(STOP_MICROSERVICE, Variant::Secondary, true),
                            false, STOP_NIM_BANNER, true, true, false,
                        )
                    } else {
                        notices.push(Notice::warning(NIM_START_WARNING));
                        (
                            Control::new(INTERNAL_ERROR, Variant::Stop, false),
                            Control::new(STOP_MICROSERVICE, Variant::Secondary, true),
                            true, "", false, false, prefetch_untouched,
                        )
                    }
                }
            }
            STOP_MICROSERVICE => {
                if self.exec(scripts::NIM_STOP, &[]).await == 0 {
                    (
                        Control::new(START_MICROSERVICE, Variant::Secondary, true),
                        Control::new("Microservice Stopped", Variant::Primary, false),
                        true, REMOTE_BANNER, false, false, prefetch_untouched,
                    )
                } else {
                    notices.push(Notice::warning(NIM_STOP_WARNING));
                    (
                        Control::new(START_MICROSERVICE, Variant::Secondary, true),
                        Control::new(INTERNAL_ERROR, Variant::Stop, false),
                        true, "", true, true, false,
                    )
                }
            }
            _ => {
                return notices;
            }
        };

        let (start, stop, editable, banner, submittable, ready, prefetch) = outcome;
        panel.start_local_nim = start;
        panel.stop_local_nim = stop;
        panel.nim_image_editable = editable;
        panel.remote_nim_msg = banner.to_string();
        panel.nim_tab_submittable = submittable;
        panel.set_input_ready(ready, NIM_NOT_READY);
        panel.prefetch_nim.interactive = prefetch;
        notices
    }

    /// Removes every document from the vector database.
    pub async fn clear_database(&self, panel: &mut PanelState) -> Vec<Notice> {
        if !panel.clear_docs.is(CLEAR_DATABASE) {
            panel.clear_docs.set(CLEAR_DATABASE, Variant::Secondary, true);
            return Vec::new();
        }

        if self.exec(scripts::CLEAR_DATABASE, &[]).await == 0 {
            info!("Vector database cleared ({} tracked documents)", panel.docs.len());
            panel.clear_docs.set(CLEAR_DATABASE, Variant::Secondary, true);
            panel.mark_all_docs(DocStatus::Deleted);
            Vec::new()
        } else {
            panel.clear_docs.set("Error Clearing Vector Database", Variant::Stop, true);
            panel.mark_all_docs(DocStatus::Unknown);
            vec![Notice::warning(CLEAR_WARNING)]
        }
    }

    /// Pushes staged files into the vector database once it reports healthy.
    pub async fn upload_documents(&self, panel: &mut PanelState, files: Vec<PathBuf>) -> Vec<Notice> {
        let mut notices = Vec::new();
        let mut accepted = Vec::with_capacity(files.len());
        for path in files {
            if accepted_upload(&path).await {
                accepted.push(path);
            } else {
                warn!("Rejecting upload of unsupported file {}", path.display());
                notices.push(Notice::warning(format!("Unsupported file type: {}", file_name(&path))));
            }
        }
        if accepted.is_empty() {
            return notices;
        }

        if self.exec(scripts::CHECK_DATABASE, &[]).await == 0 {
            for path in &accepted {
                let name = file_name(path);
                match self.client.upload(path).await {
                    Ok(()) => {
                        panel.docs.insert(name, DocStatus::Uploaded);
                    }
                    Err(e) => {
                        warn!("Upload of {} failed: {}", path.display(), e);
                        notices.push(Notice::warning(format!("Failed to upload {}: {}", name, e)));
                        panel.docs.insert(name, DocStatus::Failed);
                    }
                }
            }
        } else {
            notices.push(Notice::warning(DB_BUSY_WARNING));
            for path in &accepted {
                panel.docs.insert(file_name(path), DocStatus::Failed);
            }
        }
        panel.clear_docs.interactive = true;
        notices
    }

    /// Brings up the RAG backend, then downloads and serves the local model when in local mode.
    pub async fn start_rag(&self, panel: &mut PanelState) -> Vec<Notice> {
        let mut notices = Vec::new();
        let local = panel.inference_mode == InferenceMode::LocalSystem;
        let rc = self.exec(scripts::RAG_CONSOLIDATED, &[]).await;

        match rc {
            2 => {
                notices.push(Notice::info(VDB_WARMING_INFO));
                panel.setup_tab = Tab { visible: false, interactive: false };
                panel.upload_tab = Tab { visible: true, interactive: true };
                panel.submit.label = (if local { SUBMIT_NOT_READY } else { SUBMIT }).to_string();
                panel.submit.interactive = !local;
            }
            0 => {
                panel.setup_tab = Tab { visible: false, interactive: false };
                panel.upload_tab = Tab { visible: true, interactive: true };
                panel.submit.label = SUBMIT_NOT_READY.to_string();
                panel.submit.interactive = false;
            }
            _ => {
                notices.push(Notice::warning(RAG_START_WARNING));
                panel.setup_tab = Tab { visible: true, interactive: false };
                panel.upload_tab = Tab { visible: true, interactive: false };
                panel.submit.label = SUBMIT_NOT_READY.to_string();
                panel.submit.interactive = false;
            }
        }
        panel.placeholder = (
            if rc != 1 && local { MODEL_NOT_READY } else { READY_PLACEHOLDER }
        ).to_string();

        notices.extend(self.download_model(panel).await);
        notices.extend(self.toggle_local_server(panel, Toggle::Start).await);
        notices
    }

    pub fn select_remote_microservice(&self, panel: &mut PanelState) {
        panel.nim_tab_submittable = true;
        panel.is_local_nim = false;
        panel.set_input_ready(true, READY_PLACEHOLDER);
    }

    pub fn select_local_microservice(&self, panel: &mut PanelState) {
        let started = panel.start_local_nim.is(MICROSERVICE_STARTED);
        panel.nim_tab_submittable = started;
        panel.is_local_nim = true;
        panel.set_input_ready(started, NIM_NOT_READY);
    }
}
