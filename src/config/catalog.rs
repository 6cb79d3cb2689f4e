use log::info;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use thiserror::Error;

const BUILTIN_ENDPOINTS: &[(&str, &str)] = &[
    ("Llama3 ChatQA-1.5 8B", "nvidia/llama3-chatqa-1.5-8b"),
    ("Llama3 ChatQA-1.5 70B", "nvidia/llama3-chatqa-1.5-70b"),
    ("Llama3 8B Instruct", "meta/llama3-8b-instruct"),
    ("Llama3 70B Instruct", "meta/llama3-70b-instruct"),
    ("Mistral 7B Instruct v0.2", "mistralai/mistral-7b-instruct-v0.2"),
    ("Mixtral 8x7B Instruct", "mistralai/mixtral-8x7b-instruct-v0.1"),
    ("Phi-3 Mini 128k Instruct", "microsoft/phi-3-mini-128k-instruct"),
];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Cloud catalog file IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cloud catalog JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Cloud catalog '{0}' has no entries")]
    Empty(String),
}

#[derive(Deserialize)]
struct CatalogFile {
    endpoints: BTreeMap<String, String>,
}

/// Maps the cloud model labels shown to users onto endpoint ids.
#[derive(Debug, Clone)]
pub struct CloudCatalog {
    endpoints: BTreeMap<String, String>,
}

impl Default for CloudCatalog {
    fn default() -> Self {
        Self {
            endpoints: BUILTIN_ENDPOINTS.iter()
                .map(|(label, id)| (label.to_string(), id.to_string()))
                .collect(),
        }
    }
}

impl CloudCatalog {
    /// Endpoint id for a label. Labels outside the catalog are taken to be endpoint ids already.
    pub fn endpoint_for(&self, label: &str) -> String {
        self.endpoints
            .get(label.trim())
            .cloned()
            .unwrap_or_else(|| label.trim().to_string())
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

pub fn load_catalog(path: &str) -> Result<Arc<CloudCatalog>, CatalogError> {
    let file_content = fs::read_to_string(path)?;
    let parsed: CatalogFile = serde_json::from_str(&file_content)?;
    let catalog = CloudCatalog { endpoints: parsed.endpoints };
    if catalog.is_empty() {
        return Err(CatalogError::Empty(path.to_string()));
    }
    info!("Loaded {} cloud endpoints from '{}'", catalog.len(), path);
    Ok(Arc::new(catalog))
}

pub fn catalog_or_default(path: Option<&str>) -> Result<Arc<CloudCatalog>, CatalogError> {
    match path {
        Some(p) if !p.trim().is_empty() => load_catalog(p),
        _ => {
            info!("Using built-in cloud catalog");
            Ok(Arc::new(CloudCatalog::default()))
        }
    }
}
