pub mod cli;
pub mod config;
pub mod lifecycle;
pub mod llm;
pub mod models;
pub mod rag;
pub mod server;

use cli::Args;
use config::catalog::catalog_or_default;
use lifecycle::panel::PanelState;
use lifecycle::Lifecycle;
use llm::chat::{ new_client, SamplingParams };
use log::{ info, warn };
use server::{ Server, Shared };
use std::error::Error;
use std::path::Path;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("HTTP Port: {}", args.http_port);
    info!("Chain Server URL: {}", args.chain_server_url);
    info!("Max Retrieved Documents: {}", args.max_docs);
    info!("Scripts Directory: {}", args.scripts_dir);
    info!("Script Shell: {}", args.shell);
    info!("Upload Directory: {}", args.upload_dir);
    info!("Model Store Directory: {}", args.model_store_dir);
    info!("Local Model: {} ({})", args.local_model_id, args.local_model_quantize);
    info!("Cloud Catalog: {}", args.cloud_catalog_path.as_deref().unwrap_or("built-in"));
    info!("Hugging Face Token: {}", if args.hf_token.is_some() { "set" } else { "not set" });
    info!("-------------------------");

    let catalog = catalog_or_default(args.cloud_catalog_path.as_deref())?;
    info!("Loaded {} cloud model endpoints", catalog.len());

    let client = new_client(&args.chain_server_url, args.max_docs)?;
    let lifecycle = Arc::new(Lifecycle::from_args(&args, client.clone()));

    let model_store_present = Path::new(&args.model_store_dir).is_dir();
    if !model_store_present {
        warn!(
            "Model store '{}' not found. The local microservice cannot be started.",
            args.model_store_dir
        );
    }
    let panel = PanelState::new(
        &args.local_model_id,
        &args.local_model_quantize,
        model_store_present
    );

    let sampling = SamplingParams {
        temperature: args.temperature,
        top_p: args.top_p,
        frequency_penalty: args.frequency_penalty,
        presence_penalty: args.presence_penalty,
        max_tokens: args.max_tokens,
    };

    let shared = Shared::new(client, catalog, lifecycle, panel, sampling);
    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, shared, args.server_api_key.clone(), args.clone());
    server.run().await?;

    Ok(())
}
