pub mod chat;

use crate::config::catalog::CloudCatalog;
use serde::{ Deserialize, Serialize };
use std::fmt;
use std::str::FromStr;

pub const LOCAL_NIM_HOST: &str = "local_nim";
pub const DEFAULT_NIM_PORT: &str = "8000";
pub const DEFAULT_NIM_MODEL: &str = "meta/llama3-8b-instruct";
const NIM_IMAGE_PREFIX: &str = "nvcr.io/nim/";

/// Inference mode as presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum InferenceMode {
    #[serde(rename = "Cloud Endpoint")]
    CloudEndpoint,
    #[serde(rename = "Local System")]
    LocalSystem,
    #[serde(rename = "Self-Hosted Microservice")]
    Microservice,
}

impl InferenceMode {
    pub fn label(&self) -> &'static str {
        match self {
            InferenceMode::CloudEndpoint => "Cloud Endpoint",
            InferenceMode::LocalSystem => "Local System",
            InferenceMode::Microservice => "Self-Hosted Microservice",
        }
    }

    /// Config token understood by the chain server.
    pub fn config_token(&self) -> &'static str {
        match self {
            InferenceMode::CloudEndpoint => "cloud",
            InferenceMode::LocalSystem => "local",
            InferenceMode::Microservice => "microservice",
        }
    }
}

impl fmt::Display for InferenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseLabelError {
    message: String,
}

impl fmt::Display for ParseLabelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseLabelError {}

/// Backend that actually serves a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    Cloud,
    LocalServer,
    LocalContainer,
    RemoteContainer,
}

/// Quantization level of the local inference server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantization {
    FourBit,
    EightBit,
    None,
}

impl Quantization {
    pub fn config_token(&self) -> &'static str {
        match self {
            Quantization::FourBit => "bitsandbytes-nf4",
            Quantization::EightBit => "bitsandbytes",
            Quantization::None => "none",
        }
    }
}

impl FromStr for Quantization {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "4-bit" => Ok(Quantization::FourBit),
            "8-bit" => Ok(Quantization::EightBit),
            "none" => Ok(Quantization::None),
            _ =>
                Err(ParseLabelError {
                    message: format!("Invalid quantization: '{}'", s),
                }),
        }
    }
}

/// Model identifiers entered or selected across the settings panel.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelSelection {
    /// Display label picked from the cloud catalog.
    pub cloud_model: String,
    pub local_model_id: String,
    /// Container image reference for the local microservice.
    pub nim_local_model_id: String,
    pub nim_model_ip: String,
    pub nim_model_port: String,
    pub nim_model_id: String,
    pub is_local_nim: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBackend {
    pub kind: BackendKind,
    pub model_id: String,
    pub cloud_model_id: String,
    pub host: String,
    pub port: String,
}

pub fn resolve_backend(
    mode: InferenceMode,
    models: &ModelSelection,
    catalog: &CloudCatalog
) -> ResolvedBackend {
    let cloud_model_id = catalog.endpoint_for(&models.cloud_model);
    let microservice_model = if models.is_local_nim {
        nim_extract_model(&models.nim_local_model_id)
    } else if models.nim_model_id.trim().is_empty() {
        DEFAULT_NIM_MODEL.to_string()
    } else {
        models.nim_model_id.trim().to_string()
    };
    let (host, port) = if models.is_local_nim {
        (LOCAL_NIM_HOST.to_string(), DEFAULT_NIM_PORT.to_string())
    } else {
        let port = match models.nim_model_port.trim() {
            "" => DEFAULT_NIM_PORT.to_string(),
            p => p.to_string(),
        };
        (models.nim_model_ip.trim().to_string(), port)
    };

    let (kind, model_id) = match mode {
        InferenceMode::CloudEndpoint => (BackendKind::Cloud, cloud_model_id.clone()),
        InferenceMode::LocalSystem => (BackendKind::LocalServer, models.local_model_id.clone()),
        InferenceMode::Microservice if models.is_local_nim => {
            (BackendKind::LocalContainer, microservice_model)
        }
        InferenceMode::Microservice => (BackendKind::RemoteContainer, microservice_model),
    };

    ResolvedBackend {
        kind,
        model_id,
        cloud_model_id,
        host,
        port,
    }
}

/// Model name served by a microservice container image,
/// e.g. `nvcr.io/nim/meta/llama3-8b-instruct:latest` -> `meta/llama3-8b-instruct`.
pub fn nim_extract_model(image: &str) -> String {
    let image = image.trim();
    let name = image.strip_prefix(NIM_IMAGE_PREFIX).unwrap_or(image);
    let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    match name[last_slash..].find(':') {
        Some(colon) => name[..last_slash + colon].to_string(),
        None => name.to_string(),
    }
}

/// Glob check equivalent to `nvcr.io/nim/?*/?*`, where `*` may span `/`.
pub fn is_valid_nim_image(image: &str) -> bool {
    let Some(rest) = image.strip_prefix(NIM_IMAGE_PREFIX) else {
        return false;
    };
    rest.char_indices()
        .filter(|(_, c)| *c == '/')
        .any(|(i, _)| i > 0 && i + 1 < rest.len())
}
