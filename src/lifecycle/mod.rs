pub mod actions;
pub mod panel;

use crate::cli::Args;
use crate::llm::chat::BackendClient;
use async_trait::async_trait;
use log::{ error, info };
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Unknown action '{0}'")]
    UnknownAction(String),
    #[error("Failed to stage upload '{name}': {source}")]
    Staging {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("Upload is missing a file name")]
    MissingFileName,
}

/// Runs an external program to completion and reports its exit code.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> io::Result<i32>;
}

/// Spawns real child processes. Waits with no timeout.
#[derive(Debug, Default, Clone)]
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, program: &str, args: &[String]) -> io::Result<i32> {
        let status = Command::new(program).args(args).status().await?;
        // killed by a signal
        Ok(status.code().unwrap_or(-1))
    }
}

pub mod scripts {
    pub const DOWNLOAD_LOCAL: &str = "download-local.sh";
    pub const RAG_CONSOLIDATED: &str = "rag-consolidated.sh";
    pub const START_LOCAL: &str = "start-local.sh";
    pub const STOP_LOCAL: &str = "stop-local.sh";
    pub const NIM_PREFLIGHT: &str = "local-nim-configs/preflight.sh";
    pub const NIM_PREFETCH: &str = "local-nim-configs/prefetch-nim.sh";
    pub const NIM_START: &str = "local-nim-configs/start-local-nim.sh";
    pub const NIM_STOP: &str = "local-nim-configs/stop-local-nim.sh";
    pub const CHECK_DATABASE: &str = "check-database.sh";
    pub const CLEAR_DATABASE: &str = "clear-database.sh";
}

/// Executes lifecycle scripts and maps their outcome onto the control panel.
pub struct Lifecycle {
    runner: Arc<dyn CommandRunner>,
    client: Arc<dyn BackendClient>,
    shell: String,
    scripts_dir: PathBuf,
    hf_token_present: bool,
}

impl Lifecycle {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        client: Arc<dyn BackendClient>,
        shell: impl Into<String>,
        scripts_dir: impl Into<PathBuf>,
        hf_token_present: bool
    ) -> Self {
        Self {
            runner,
            client,
            shell: shell.into(),
            scripts_dir: scripts_dir.into(),
            hf_token_present,
        }
    }

    pub fn from_args(args: &Args, client: Arc<dyn BackendClient>) -> Self {
        let hf_token_present = args.hf_token
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false);
        Self::new(
            Arc::new(ShellRunner),
            client,
            args.shell.clone(),
            PathBuf::from(&args.scripts_dir),
            hf_token_present
        )
    }

    /// Runs `script` with `args`. Failure to spawn counts as exit code -1.
    async fn exec(&self, script: &str, args: &[&str]) -> i32 {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(self.scripts_dir.join(script).display().to_string());
        argv.extend(args.iter().map(|a| a.to_string()));

        info!("Running {} {}", self.shell, argv.join(" "));
        match self.runner.run(&self.shell, &argv).await {
            Ok(code) => {
                if code != 0 {
                    error!("{} exited with code {}", script, code);
                }
                code
            }
            Err(e) => {
                error!("Failed to run {}: {}", script, e);
                -1
            }
        }
    }
}
