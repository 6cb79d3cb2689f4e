use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Chain Server Args ---
    /// Base URL of the RAG chain server that performs retrieval and generation.
    #[arg(long, env = "CHAIN_SERVER_URL", default_value = "http://localhost:8000")]
    pub chain_server_url: String,

    /// Number of documents requested from the retriever for every question.
    #[arg(long, env = "RAG_MAX_DOCS", default_value = "5")]
    pub max_docs: usize,

    // --- Lifecycle Script Args ---
    /// Directory containing the lifecycle shell scripts (download-local.sh, start-local.sh, ...).
    #[arg(long, env = "SCRIPTS_DIR", default_value = "/project/code/scripts")]
    pub scripts_dir: String,

    /// Shell used to run the lifecycle scripts.
    #[arg(long, env = "SCRIPT_SHELL", default_value = "/bin/bash")]
    pub shell: String,

    /// Directory that holds locally cached microservice model weights.
    /// The local microservice can only be started when this directory exists.
    #[arg(long, env = "MODEL_STORE_DIR", default_value = "/mnt/host-home/model-store")]
    pub model_store_dir: String,

    /// Directory where uploaded documents are staged before being pushed to the vector database.
    #[arg(long, env = "UPLOAD_DIR", default_value = "/tmp/rag-chatui-uploads")]
    pub upload_dir: String,

    /// Hugging Face token; required to download gated models.
    #[arg(long, env = "HUGGING_FACE_HUB_TOKEN", hide_env_values = true)]
    pub hf_token: Option<String>,

    // --- Model Args ---
    /// Optional JSON file mapping cloud model labels to endpoint ids. Built-in catalog is used otherwise.
    #[arg(long, env = "CLOUD_CATALOG_PATH")]
    pub cloud_catalog_path: Option<String>,

    /// Model downloaded and served by the local inference server.
    #[arg(long, env = "LOCAL_MODEL_ID", default_value = "nvidia/Llama3-ChatQA-1.5-8B")]
    pub local_model_id: String,

    /// Quantization level for the local inference server (4-Bit, 8-Bit, None).
    #[arg(long, env = "LOCAL_MODEL_QUANTIZE", default_value = "4-Bit")]
    pub local_model_quantize: String,

    // --- Sampling Defaults ---
    /// Default maximum number of tokens in a response.
    #[arg(long, env = "DEFAULT_MAX_TOKENS", default_value = "250")]
    pub max_tokens: u32,

    /// Default sampling temperature.
    #[arg(long, env = "DEFAULT_TEMPERATURE", default_value = "0.7")]
    pub temperature: f32,

    /// Default nucleus sampling probability.
    #[arg(long, env = "DEFAULT_TOP_P", default_value = "0.999")]
    pub top_p: f32,

    /// Default frequency penalty.
    #[arg(long, env = "DEFAULT_FREQUENCY_PENALTY", default_value = "0.0", allow_hyphen_values = true)]
    pub frequency_penalty: f32,

    /// Default presence penalty.
    #[arg(long, env = "DEFAULT_PRESENCE_PENALTY", default_value = "0.0", allow_hyphen_values = true)]
    pub presence_penalty: f32,

    // --- Server Args ---
    /// Host address and port for the chat WebSocket server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "0.0.0.0:4000")]
    pub server_addr: String,

    /// Port for the HTTP server that serves the page and the lifecycle API.
    #[arg(long, env = "HTTP_PORT", default_value = "4001")]
    pub http_port: u16,

    /// Optional API Key required by the WebSocket server and the HTTP API. If set, clients must provide this key.
    #[arg(long, env = "SERVER_API_KEY")]
    pub server_api_key: Option<String>,
}
