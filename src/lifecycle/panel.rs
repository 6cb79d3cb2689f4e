use crate::llm::InferenceMode;
use serde::{ Deserialize, Serialize };
use std::collections::BTreeMap;

pub const READY_PLACEHOLDER: &str = "Enter text and press SUBMIT";
pub const INITIAL_PLACEHOLDER: &str = "Enter your text and press SUBMIT";
pub const SUBMIT: &str = "Submit";
pub const SUBMIT_NOT_READY: &str = "[NOT READY] Submit";

pub const LOAD_MODEL: &str = "Load Model";
pub const MODEL_DOWNLOADED: &str = "Model Downloaded";
pub const START_SERVER: &str = "Start Server";
pub const STOP_SERVER: &str = "Stop Server";
pub const PREFETCH_NIM: &str = "Prefetch NIM";
pub const START_MICROSERVICE: &str = "Start Microservice";
pub const STOP_MICROSERVICE: &str = "Stop Microservice";
pub const MICROSERVICE_STARTED: &str = "Microservice Started";
pub const CLEAR_DATABASE: &str = "Clear Database";
pub const INTERNAL_ERROR: &str = "Internal Server Error, Try Again";

pub const REMOTE_BANNER: &str = "<br />Enter the details below. Then start chatting!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Primary,
    Secondary,
    Stop,
}

/// A button as the browser should render it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    pub label: String,
    pub variant: Variant,
    pub interactive: bool,
}

impl Control {
    pub fn new(label: &str, variant: Variant, interactive: bool) -> Self {
        Self {
            label: label.to_string(),
            variant,
            interactive,
        }
    }

    pub fn set(&mut self, label: &str, variant: Variant, interactive: bool) {
        *self = Self::new(label, variant, interactive);
    }

    pub fn is(&self, label: &str) -> bool {
        self.label == label
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    pub visible: bool,
    pub interactive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocStatus {
    #[serde(rename = "Uploaded Successfully")]
    Uploaded,
    #[serde(rename = "Failed to Upload")]
    Failed,
    #[serde(rename = "Deleted")]
    Deleted,
    #[serde(rename = "Unknown")]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
}

/// Banner shown to the user after an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn warning(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Warning, message: message.into() }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Info, message: message.into() }
    }
}

/// State of every control the lifecycle actions drive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelState {
    pub inference_mode: InferenceMode,
    pub local_model_id: String,
    pub local_model_quantize: String,
    pub nim_local_model_id: String,

    pub download_model: Control,
    pub start_local_server: Control,
    pub stop_local_server: Control,

    pub prefetch_nim: Control,
    pub start_local_nim: Control,
    pub stop_local_nim: Control,
    pub nim_image_editable: bool,
    pub remote_nim_msg: String,
    /// Whether the selected microservice tab can take questions right now.
    pub nim_tab_submittable: bool,
    pub is_local_nim: bool,

    pub setup_tab: Tab,
    pub upload_tab: Tab,
    pub clear_docs: Control,
    pub docs: BTreeMap<String, DocStatus>,

    pub submit: Control,
    pub placeholder: String,
}

impl PanelState {
    pub fn new(local_model_id: &str, local_model_quantize: &str, model_store_present: bool) -> Self {
        Self {
            inference_mode: InferenceMode::LocalSystem,
            local_model_id: local_model_id.to_string(),
            local_model_quantize: local_model_quantize.to_string(),
            nim_local_model_id: String::new(),

            download_model: Control::new(LOAD_MODEL, Variant::Secondary, true),
            start_local_server: Control::new(START_SERVER, Variant::Secondary, false),
            stop_local_server: Control::new(STOP_SERVER, Variant::Secondary, false),

            prefetch_nim: Control::new(PREFETCH_NIM, Variant::Secondary, true),
            start_local_nim: Control::new(START_MICROSERVICE, Variant::Secondary, model_store_present),
            stop_local_nim: Control::new(STOP_MICROSERVICE, Variant::Secondary, false),
            nim_image_editable: true,
            remote_nim_msg: REMOTE_BANNER.to_string(),
            nim_tab_submittable: true,
            is_local_nim: false,

            setup_tab: Tab { visible: true, interactive: false },
            upload_tab: Tab { visible: true, interactive: false },
            clear_docs: Control::new(CLEAR_DATABASE, Variant::Secondary, false),
            docs: BTreeMap::new(),

            submit: Control::new(SUBMIT_NOT_READY, Variant::Secondary, false),
            placeholder: INITIAL_PLACEHOLDER.to_string(),
        }
    }

    /// Enables or disables question submission, showing `not_ready` as the hint when disabled.
    pub fn set_input_ready(&mut self, ready: bool, not_ready: &str) {
        if ready {
            self.submit.label = SUBMIT.to_string();
            self.placeholder = READY_PLACEHOLDER.to_string();
        } else {
            self.submit.label = SUBMIT_NOT_READY.to_string();
            self.placeholder = not_ready.to_string();
        }
        self.submit.interactive = ready;
    }

    pub fn mark_all_docs(&mut self, status: DocStatus) {
        for value in self.docs.values_mut() {
            *value = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_panel_is_not_ready() {
        let panel = PanelState::new("nvidia/Llama3-ChatQA-1.5-8B", "4-Bit", false);
        assert_eq!(panel.submit, Control::new(SUBMIT_NOT_READY, Variant::Secondary, false));
        assert!(!panel.start_local_nim.interactive);
        assert!(panel.download_model.interactive);
        assert_eq!(panel.placeholder, INITIAL_PLACEHOLDER);
    }

    #[test]
    fn doc_status_uses_display_strings() {
        let mut panel = PanelState::new("m", "4-Bit", true);
        panel.docs.insert("report.pdf".to_string(), DocStatus::Uploaded);
        let json = serde_json::to_value(&panel.docs).unwrap();
        assert_eq!(json["report.pdf"], "Uploaded Successfully");

        panel.mark_all_docs(DocStatus::Deleted);
        assert_eq!(panel.docs["report.pdf"], DocStatus::Deleted);
    }
}
