use async_trait::async_trait;
use pretty_assertions::assert_eq;
use rag_chatui::lifecycle::actions::{ Action, Toggle };
use rag_chatui::lifecycle::panel::*;
use rag_chatui::lifecycle::{ CommandRunner, Lifecycle };
use rag_chatui::llm::chat::{ BackendClient, FragmentStream, PredictRequest };
use rag_chatui::llm::InferenceMode;
use rag_chatui::models::chat::Document;
use std::collections::HashMap;
use std::error::Error;
use std::io;
use std::path::{ Path, PathBuf };
use std::sync::{ Arc, Mutex };

type BoxError = Box<dyn Error + Send + Sync>;

const IMAGE: &str = "nvcr.io/nim/meta/llama3-8b-instruct:latest";

/// Records every command line and answers with a configured exit code per script.
#[derive(Default)]
struct RecordingRunner {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    codes: Mutex<HashMap<&'static str, i32>>,
    spawn_fails: bool,
}

impl RecordingRunner {
    fn with_codes(codes: &[(&'static str, i32)]) -> Arc<Self> {
        Arc::new(Self {
            codes: Mutex::new(codes.iter().cloned().collect()),
            ..Self::default()
        })
    }

    /// Script paths relative to the scripts directory, in call order.
    fn scripts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, args)| args[0].trim_start_matches("/scripts/").to_string())
            .collect()
    }

    fn args_of(&self, script: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(_, args)| args[0].ends_with(script))
            .map(|(_, args)| args[1..].to_vec())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, program: &str, args: &[String]) -> io::Result<i32> {
        self.calls.lock().unwrap().push((program.to_string(), args.to_vec()));
        if self.spawn_fails {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such shell"));
        }
        let codes = self.codes.lock().unwrap();
        let code = codes
            .iter()
            .find(|(script, _)| args[0].ends_with(*script))
            .map(|(_, code)| *code)
            .unwrap_or(0);
        Ok(code)
    }
}

/// Only document upload is exercised by the lifecycle. Uploads of `fail_on` are refused.
struct UploadClient {
    fail_on: Option<&'static str>,
}

#[async_trait]
impl BackendClient for UploadClient {
    async fn search(&self, _question: &str) -> Result<Vec<Document>, BoxError> {
        Ok(Vec::new())
    }

    async fn predict(&self, _request: PredictRequest) -> Result<FragmentStream, BoxError> {
        Err("not used".into())
    }

    async fn upload(&self, file: &Path) -> Result<(), BoxError> {
        match self.fail_on {
            Some(name) if file.ends_with(name) => Err("chain server returned 500".into()),
            _ => Ok(()),
        }
    }
}

fn lifecycle(runner: Arc<RecordingRunner>, hf_token: bool) -> Lifecycle {
    Lifecycle::new(runner, Arc::new(UploadClient { fail_on: None }), "/bin/bash", "/scripts", hf_token)
}

fn panel() -> PanelState {
    PanelState::new("nvidia/Llama3-ChatQA-1.5-8B", "4-Bit", true)
}

fn nim_panel(image: &str) -> PanelState {
    let mut panel = panel();
    panel.inference_mode = InferenceMode::Microservice;
    panel.nim_local_model_id = image.to_string();
    panel
}

fn messages(notices: &[Notice]) -> Vec<&str> {
    notices.iter().map(|n| n.message.as_str()).collect()
}

#[tokio::test]
async fn prefetch_rejects_bad_images_without_spawning() {
    for image in ["", "nvcr.io/nim/llama3", "docker.io/meta/llama3:latest", "nvcr.io/nim//x"] {
        let runner = RecordingRunner::with_codes(&[]);
        let lc = lifecycle(runner.clone(), false);
        let mut panel = nim_panel(image);

        let notices = lc.prefetch_nim(&mut panel).await;

        assert!(runner.scripts().is_empty(), "spawned for '{}'", image);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Warning);
        assert_eq!(panel.prefetch_nim, Control::new(PREFETCH_NIM, Variant::Secondary, true));
        assert!(!panel.start_local_nim.interactive);
        assert!(!panel.stop_local_nim.interactive);
    }
}

#[tokio::test]
async fn prefetch_runs_preflight_then_pull() {
    let runner = RecordingRunner::with_codes(&[]);
    let lc = lifecycle(runner.clone(), false);
    let mut panel = nim_panel(IMAGE);

    let notices = lc.prefetch_nim(&mut panel).await;

    assert!(notices.is_empty());
    assert_eq!(
        runner.scripts(),
        vec!["local-nim-configs/preflight.sh", "local-nim-configs/prefetch-nim.sh"]
    );
    assert_eq!(runner.args_of("prefetch-nim.sh"), vec![IMAGE.to_string()]);
    assert_eq!(panel.prefetch_nim, Control::new("Container Pulled", Variant::Primary, false));
    assert!(panel.start_local_nim.interactive);
    assert!(panel.stop_local_nim.interactive);
}

#[tokio::test]
async fn prefetch_pull_failure_mentions_api_key() {
    let runner = RecordingRunner::with_codes(&[("prefetch-nim.sh", 1)]);
    let lc = lifecycle(runner.clone(), false);
    let mut panel = nim_panel(IMAGE);

    let notices = lc.prefetch_nim(&mut panel).await;

    assert!(messages(&notices)[0].contains("NGC_CLI_API_KEY"));
    assert!(panel.prefetch_nim.interactive);
}

#[tokio::test]
async fn starting_microservice_locks_the_image_and_enables_input() {
    let runner = RecordingRunner::with_codes(&[]);
    let lc = lifecycle(runner.clone(), false);
    let mut panel = nim_panel(IMAGE);

    let notices = lc.toggle_local_nim(&mut panel, Toggle::Start).await;

    assert!(notices.is_empty());
    assert_eq!(
        runner.args_of("start-local-nim.sh"),
        vec![IMAGE.to_string(), "meta/llama3-8b-instruct".to_string()]
    );
    assert_eq!(panel.start_local_nim, Control::new(MICROSERVICE_STARTED, Variant::Primary, false));
    assert_eq!(panel.stop_local_nim, Control::new(STOP_MICROSERVICE, Variant::Secondary, true));
    assert!(!panel.nim_image_editable);
    assert!(panel.remote_nim_msg.contains("Stop the local microservice"));
    assert!(panel.nim_tab_submittable);
    assert_eq!(panel.submit, Control::new(SUBMIT, Variant::Secondary, true));
    assert_eq!(panel.placeholder, READY_PLACEHOLDER);
    assert!(!panel.prefetch_nim.interactive);
}

#[tokio::test]
async fn starting_microservice_with_invalid_image_spawns_nothing() {
    let runner = RecordingRunner::with_codes(&[]);
    let lc = lifecycle(runner.clone(), false);
    let mut panel = nim_panel("meta/llama3-8b-instruct");

    let notices = lc.toggle_local_nim(&mut panel, Toggle::Start).await;

    assert!(runner.scripts().is_empty());
    assert!(messages(&notices)[0].contains("not a valid NIM container image"));
    assert_eq!(panel.start_local_nim, Control::new(START_MICROSERVICE, Variant::Secondary, false));
    assert!(panel.nim_image_editable);
    assert_eq!(panel.remote_nim_msg, "");
    assert!(!panel.submit.interactive);
    assert!(panel.placeholder.contains("Start the Local Microservice"));
}

#[tokio::test]
async fn microservice_start_failure_after_preflight() {
    let runner = RecordingRunner::with_codes(&[("start-local-nim.sh", 3)]);
    let lc = lifecycle(runner.clone(), false);
    let mut panel = nim_panel(IMAGE);

    let notices = lc.toggle_local_nim(&mut panel, Toggle::Start).await;

    assert!(messages(&notices)[0].starts_with("Ran into an issue starting up the NIM Container"));
    assert_eq!(panel.start_local_nim, Control::new(INTERNAL_ERROR, Variant::Stop, false));
    assert!(panel.prefetch_nim.interactive);
    assert!(!panel.nim_tab_submittable);
}

#[tokio::test]
async fn stopping_microservice_restores_remote_banner() {
    let runner = RecordingRunner::with_codes(&[]);
    let lc = lifecycle(runner.clone(), false);
    let mut panel = nim_panel(IMAGE);
    lc.toggle_local_nim(&mut panel, Toggle::Start).await;

    let notices = lc.toggle_local_nim(&mut panel, Toggle::Stop).await;

    assert!(notices.is_empty());
    assert_eq!(runner.scripts().last().unwrap(), "local-nim-configs/stop-local-nim.sh");
    assert_eq!(panel.start_local_nim, Control::new(START_MICROSERVICE, Variant::Secondary, true));
    assert_eq!(panel.stop_local_nim, Control::new("Microservice Stopped", Variant::Primary, false));
    assert_eq!(panel.remote_nim_msg, REMOTE_BANNER);
    assert!(panel.nim_image_editable);
    assert!(!panel.submit.interactive);
}

#[tokio::test]
async fn failed_microservice_stop_leaves_input_usable() {
    let runner = RecordingRunner::with_codes(&[("stop-local-nim.sh", 1)]);
    let lc = lifecycle(runner.clone(), false);
    let mut panel = nim_panel(IMAGE);

    let notices = lc.toggle_local_nim(&mut panel, Toggle::Stop).await;

    assert!(messages(&notices)[0].contains("service may still be running"));
    assert_eq!(panel.stop_local_nim, Control::new(INTERNAL_ERROR, Variant::Stop, false));
    assert!(panel.nim_tab_submittable);
    assert!(panel.submit.interactive);
    assert!(!panel.prefetch_nim.interactive);
}

#[tokio::test]
async fn clearing_twice_marks_every_document_deleted() {
    let runner = RecordingRunner::with_codes(&[]);
    let lc = lifecycle(runner.clone(), false);
    let mut panel = panel();
    panel.docs.insert("a.pdf".to_string(), DocStatus::Uploaded);
    panel.docs.insert("b.txt".to_string(), DocStatus::Failed);

    lc.clear_database(&mut panel).await;
    lc.clear_database(&mut panel).await;

    assert_eq!(runner.scripts(), vec!["clear-database.sh", "clear-database.sh"]);
    assert!(panel.docs.values().all(|s| *s == DocStatus::Deleted));
    assert_eq!(panel.clear_docs, Control::new(CLEAR_DATABASE, Variant::Secondary, true));
}

#[tokio::test]
async fn failed_clear_marks_documents_unknown() {
    let runner = RecordingRunner::with_codes(&[("clear-database.sh", 1)]);
    let lc = lifecycle(runner.clone(), false);
    let mut panel = panel();
    panel.docs.insert("a.pdf".to_string(), DocStatus::Uploaded);

    let notices = lc.clear_database(&mut panel).await;

    assert_eq!(messages(&notices), vec!["Your files may still be present in the database. Try again."]);
    assert_eq!(panel.docs["a.pdf"], DocStatus::Unknown);
    assert_eq!(panel.clear_docs, Control::new("Error Clearing Vector Database", Variant::Stop, true));

    // clicking the error label only resets the button
    let notices = lc.clear_database(&mut panel).await;
    assert!(notices.is_empty());
    assert_eq!(runner.scripts().len(), 1);
    assert_eq!(panel.clear_docs.label, CLEAR_DATABASE);
    assert_eq!(panel.docs["a.pdf"], DocStatus::Unknown);
}

#[tokio::test]
async fn gated_model_download_needs_a_token() {
    let runner = RecordingRunner::with_codes(&[]);
    let lc = lifecycle(runner.clone(), false);
    let mut panel = panel();
    panel.local_model_id = "meta-llama/Meta-Llama-3-8B-Instruct".to_string();

    let notices = lc.download_model(&mut panel).await;

    assert!(runner.scripts().is_empty());
    assert!(messages(&notices)[0].contains("HUGGING_FACE_HUB_TOKEN"));
    assert_eq!(panel.download_model.label, LOAD_MODEL);

    let lc = lifecycle(runner.clone(), true);
    assert!(lc.download_model(&mut panel).await.is_empty());
    assert_eq!(runner.args_of("download-local.sh"), vec!["meta-llama/Meta-Llama-3-8B-Instruct"]);
}

#[tokio::test]
async fn download_outcomes() {
    let runner = RecordingRunner::with_codes(&[]);
    let lc = lifecycle(runner.clone(), false);
    let mut panel = panel();

    lc.download_model(&mut panel).await;
    assert_eq!(panel.download_model, Control::new(MODEL_DOWNLOADED, Variant::Primary, false));
    assert!(panel.start_local_server.interactive);
    assert!(panel.stop_local_server.interactive);

    // already downloaded: nothing runs
    lc.download_model(&mut panel).await;
    assert_eq!(runner.scripts().len(), 1);

    let runner = RecordingRunner::with_codes(&[("download-local.sh", 1)]);
    let lc = lifecycle(runner, false);
    let mut panel = self::panel();
    lc.download_model(&mut panel).await;
    assert_eq!(panel.download_model, Control::new("Error, Try Again", Variant::Stop, true));
    assert!(!panel.start_local_server.interactive);
    assert!(!panel.stop_local_server.interactive);
}

#[tokio::test]
async fn cloud_mode_ignores_local_model_controls() {
    let runner = RecordingRunner::with_codes(&[]);
    let lc = lifecycle(runner.clone(), false);
    let mut panel = panel();
    lc.set_inference_mode(&mut panel, InferenceMode::CloudEndpoint);
    let before = panel.clone();

    lc.download_model(&mut panel).await;
    lc.toggle_local_server(&mut panel, Toggle::Start).await;

    assert!(runner.scripts().is_empty());
    assert_eq!(panel, before);
}

#[tokio::test]
async fn starting_local_server_passes_model_and_quantization() {
    let runner = RecordingRunner::with_codes(&[]);
    let lc = lifecycle(runner.clone(), false);
    let mut panel = panel();
    panel.local_model_quantize = "8-Bit".to_string();

    let notices = lc.toggle_local_server(&mut panel, Toggle::Start).await;

    assert!(notices.is_empty());
    assert_eq!(runner.scripts(), vec!["rag-consolidated.sh", "start-local.sh"]);
    assert_eq!(
        runner.args_of("start-local.sh"),
        vec!["nvidia/Llama3-ChatQA-1.5-8B", "bitsandbytes"]
    );
    assert_eq!(panel.start_local_server, Control::new("Server Started", Variant::Primary, false));
    assert_eq!(panel.stop_local_server, Control::new(STOP_SERVER, Variant::Secondary, true));
    assert_eq!(panel.submit, Control::new(SUBMIT, Variant::Secondary, true));
    assert!(!panel.download_model.interactive);
}

#[tokio::test]
async fn local_server_start_failure_warns_about_memory() {
    let runner = RecordingRunner::with_codes(&[("rag-consolidated.sh", 1), ("start-local.sh", 137)]);
    let lc = lifecycle(runner.clone(), false);
    let mut panel = panel();

    let notices = lc.toggle_local_server(&mut panel, Toggle::Start).await;

    assert!(messages(&notices)[0].contains("memory issues"));
    assert_eq!(panel.start_local_server, Control::new(INTERNAL_ERROR, Variant::Stop, false));
    assert!(!panel.submit.interactive);
    assert!(panel.placeholder.contains("Start the Local Inference Server"));
}

#[tokio::test]
async fn stopping_local_server() {
    let runner = RecordingRunner::with_codes(&[]);
    let lc = lifecycle(runner.clone(), false);
    let mut panel = panel();

    lc.toggle_local_server(&mut panel, Toggle::Stop).await;
    assert_eq!(runner.scripts(), vec!["stop-local.sh"]);
    assert_eq!(panel.start_local_server, Control::new(START_SERVER, Variant::Secondary, true));
    assert_eq!(panel.stop_local_server, Control::new("Server Stopped", Variant::Primary, false));
    assert!(!panel.submit.interactive);
    // model was never downloaded
    assert!(panel.download_model.interactive);

    // the stop control now reads "Server Stopped", which is not a known action
    lc.toggle_local_server(&mut panel, Toggle::Stop).await;
    assert_eq!(runner.scripts().len(), 1);

    let runner = RecordingRunner::with_codes(&[("stop-local.sh", 1)]);
    let lc = lifecycle(runner, false);
    let mut panel = self::panel();
    lc.toggle_local_server(&mut panel, Toggle::Stop).await;
    assert_eq!(panel.stop_local_server, Control::new(INTERNAL_ERROR, Variant::Stop, false));
    assert!(panel.submit.interactive);
    assert!(!panel.download_model.interactive);
}

#[tokio::test]
async fn spawn_failure_counts_as_failed_exit() {
    let runner = Arc::new(RecordingRunner { spawn_fails: true, ..RecordingRunner::default() });
    let lc = lifecycle(runner.clone(), false);
    let mut panel = panel();

    lc.download_model(&mut panel).await;

    assert_eq!(runner.calls.lock().unwrap()[0].0, "/bin/bash");
    assert_eq!(panel.download_model.label, "Error, Try Again");
}

#[tokio::test]
async fn start_rag_with_warming_storage_in_cloud_mode() {
    let runner = RecordingRunner::with_codes(&[("rag-consolidated.sh", 2)]);
    let lc = lifecycle(runner.clone(), false);
    let mut panel = panel();
    lc.set_inference_mode(&mut panel, InferenceMode::CloudEndpoint);

    let notices = lc.dispatch(&mut panel, Action::StartRag).await;

    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Info);
    assert!(notices[0].message.contains("Vector DB may still be spinning up"));
    assert_eq!(panel.setup_tab, Tab { visible: false, interactive: false });
    assert_eq!(panel.upload_tab, Tab { visible: true, interactive: true });
    assert_eq!(panel.submit.label, SUBMIT);
    assert!(panel.submit.interactive);
    assert_eq!(panel.placeholder, READY_PLACEHOLDER);
    // cloud mode skips the chained download and server start
    assert_eq!(runner.scripts(), vec!["rag-consolidated.sh"]);
}

#[tokio::test]
async fn start_rag_in_local_mode_chains_download_and_server() {
    let runner = RecordingRunner::with_codes(&[]);
    let lc = lifecycle(runner.clone(), false);
    let mut panel = panel();

    let notices = lc.start_rag(&mut panel).await;

    assert!(notices.is_empty());
    assert_eq!(
        runner.scripts(),
        vec!["rag-consolidated.sh", "download-local.sh", "rag-consolidated.sh", "start-local.sh"]
    );
    assert_eq!(panel.download_model.label, MODEL_DOWNLOADED);
    assert_eq!(panel.start_local_server.label, "Server Started");
    assert_eq!(panel.submit, Control::new(SUBMIT, Variant::Secondary, true));
}

#[tokio::test]
async fn start_rag_failure_keeps_setup_visible() {
    let runner = RecordingRunner::with_codes(&[("rag-consolidated.sh", 1)]);
    let lc = lifecycle(runner.clone(), false);
    let mut panel = panel();
    lc.set_inference_mode(&mut panel, InferenceMode::CloudEndpoint);

    let notices = lc.start_rag(&mut panel).await;

    assert!(messages(&notices)[0].starts_with("Something went wrong"));
    assert_eq!(panel.setup_tab, Tab { visible: true, interactive: false });
    assert!(!panel.upload_tab.interactive);
    assert_eq!(panel.submit.label, SUBMIT_NOT_READY);
}

#[tokio::test]
async fn upload_waits_for_healthy_database() {
    let runner = RecordingRunner::with_codes(&[]);
    let lc = lifecycle(runner.clone(), false);
    let mut panel = panel();

    let notices = lc.upload_documents(&mut panel, vec![PathBuf::from("/tmp/report.pdf")]).await;

    assert!(notices.is_empty());
    assert_eq!(runner.scripts(), vec!["check-database.sh"]);
    assert_eq!(panel.docs["report.pdf"], DocStatus::Uploaded);
    assert!(panel.clear_docs.interactive);

    let runner = RecordingRunner::with_codes(&[("check-database.sh", 1)]);
    let lc = lifecycle(runner, false);
    let mut panel = self::panel();
    let notices = lc.upload_documents(&mut panel, vec![PathBuf::from("/tmp/report.pdf")]).await;

    assert!(messages(&notices)[0].starts_with("Hang Tight!"));
    assert_eq!(panel.docs["report.pdf"], DocStatus::Failed);
    assert!(panel.clear_docs.interactive);
}

#[tokio::test]
async fn upload_rejects_unsupported_files_before_checking_database() {
    let runner = RecordingRunner::with_codes(&[]);
    let lc = lifecycle(runner.clone(), false);
    let mut panel = panel();

    let notices = lc.upload_documents(&mut panel, vec![PathBuf::from("/nonexistent/archive.zip")]).await;

    assert!(runner.scripts().is_empty());
    assert_eq!(messages(&notices), vec!["Unsupported file type: archive.zip"]);
    assert!(panel.docs.is_empty());
}

#[tokio::test]
async fn failing_upload_marks_files_failed() {
    let runner = RecordingRunner::with_codes(&[]);
    let client = Arc::new(UploadClient { fail_on: Some("notes.docx") });
    let lc = Lifecycle::new(runner, client, "/bin/bash", "/scripts", false);
    let mut panel = panel();

    let notices = lc.upload_documents(&mut panel, vec![PathBuf::from("/tmp/notes.docx")]).await;

    assert!(messages(&notices)[0].contains("chain server returned 500"));
    assert_eq!(panel.docs["notes.docx"], DocStatus::Failed);
}

#[tokio::test]
async fn one_failed_upload_leaves_the_others_uploaded() {
    let runner = RecordingRunner::with_codes(&[]);
    let client = Arc::new(UploadClient { fail_on: Some("notes.docx") });
    let lc = Lifecycle::new(runner, client, "/bin/bash", "/scripts", false);
    let mut panel = panel();

    let files = vec![
        PathBuf::from("/tmp/report.pdf"),
        PathBuf::from("/tmp/notes.docx"),
        PathBuf::from("/tmp/summary.txt")
    ];
    let notices = lc.upload_documents(&mut panel, files).await;

    assert_eq!(notices.len(), 1);
    assert!(messages(&notices)[0].starts_with("Failed to upload notes.docx"));
    assert_eq!(panel.docs["report.pdf"], DocStatus::Uploaded);
    assert_eq!(panel.docs["notes.docx"], DocStatus::Failed);
    assert_eq!(panel.docs["summary.txt"], DocStatus::Uploaded);
}

#[tokio::test]
async fn microservice_locality_selection() {
    let runner = RecordingRunner::with_codes(&[]);
    let lc = lifecycle(runner, false);
    let mut panel = nim_panel(IMAGE);

    lc.dispatch(&mut panel, Action::SelectLocalNim).await;
    assert!(panel.is_local_nim);
    assert!(!panel.nim_tab_submittable);
    assert!(!panel.submit.interactive);
    assert!(panel.placeholder.contains("Start the Local Microservice"));

    lc.dispatch(&mut panel, Action::SelectRemoteNim).await;
    assert!(!panel.is_local_nim);
    assert!(panel.nim_tab_submittable);
    assert_eq!(panel.submit, Control::new(SUBMIT, Variant::Secondary, true));

    lc.dispatch(&mut panel, Action::StartNim).await;
    lc.dispatch(&mut panel, Action::SelectLocalNim).await;
    assert!(panel.nim_tab_submittable);
    assert!(panel.submit.interactive);
}

#[tokio::test]
async fn editing_the_image_resets_prefetch() {
    let runner = RecordingRunner::with_codes(&[]);
    let lc = lifecycle(runner, false);
    let mut panel = nim_panel(IMAGE);
    lc.prefetch_nim(&mut panel).await;
    assert_eq!(panel.prefetch_nim.label, "Container Pulled");

    lc.select_nim_image(&mut panel, " nvcr.io/nim/mistralai/mistral-7b-instruct-v03:latest ");

    assert_eq!(panel.nim_local_model_id, "nvcr.io/nim/mistralai/mistral-7b-instruct-v03:latest");
    assert_eq!(panel.prefetch_nim, Control::new(PREFETCH_NIM, Variant::Secondary, true));
    assert!(panel.start_local_nim.interactive);
    assert!(!panel.stop_local_nim.interactive);
}
