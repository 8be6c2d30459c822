//! CLI tests: run the `ragchat` binary against a temp config and database.

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use common::{completion, OllamaTopics};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn setup_test_env(providers: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("cats.md"),
        "# Cats\n\nCats purr when they are content.\n\nA cat sleeps for most of the day.",
    )
    .unwrap();
    fs::write(
        files_dir.join("dogs.txt"),
        "Dogs bark at strangers.\n\nA dog needs a walk every morning.",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/ragchat.sqlite"

[chunking]
chunk_size = 80
overlap = 10

[retrieval]
top_k = 3

{providers}
"#,
        root = root.display(),
        providers = providers,
    );

    let config_path = config_dir.join("ragchat.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn mock_providers(server: &MockServer) -> String {
    format!(
        r#"[embedding]
provider = "ollama"
model = "topic"
dims = 3
url = "{uri}"
base_delay_ms = 1

[chat]
provider = "openai"
model = "test-chat"
url = "{uri}"
base_delay_ms = 1
"#,
        uri = server.uri()
    )
}

fn run_ragchat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_ragchat"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("OPENAI_API_KEY")
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("failed to run ragchat: {}", e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

/// Run the binary off the async runtime so mock servers keep responding.
async fn run_async(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let config_path = config_path.to_path_buf();
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    tokio::task::spawn_blocking(move || {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_ragchat(&config_path, &args)
    })
    .await
    .unwrap()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config) = setup_test_env("");
    let (stdout, _, ok) = run_ragchat(&config, &["init"]);
    assert!(ok);
    assert!(stdout.contains("Database initialized"));
    assert!(tmp.path().join("data/ragchat.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config) = setup_test_env("");
    assert!(run_ragchat(&config, &["init"]).2);
    assert!(run_ragchat(&config, &["init"]).2);
}

#[test]
fn test_documents_empty() {
    let (_tmp, config) = setup_test_env("");
    run_ragchat(&config, &["init"]);
    let (stdout, _, ok) = run_ragchat(&config, &["documents"]);
    assert!(ok);
    assert!(stdout.contains("No documents."));
}

#[test]
fn test_delete_unknown_document() {
    let (_tmp, config) = setup_test_env("");
    let (_, stderr, ok) = run_ragchat(&config, &["delete", "does-not-exist"]);
    assert!(!ok);
    assert!(stderr.contains("error[not_found]"), "stderr: {}", stderr);
}

#[test]
fn test_ingest_errors_when_embeddings_disabled() {
    let (tmp, config) = setup_test_env("");
    let file = tmp.path().join("files/cats.md");
    let (stdout, stderr, ok) = run_ragchat(&config, &["ingest", file.to_str().unwrap()]);
    assert!(!ok);
    assert!(stdout.contains("error[config_error]"), "stdout: {}", stdout);
    assert!(stderr.contains("1 of 1 file(s) failed"), "stderr: {}", stderr);
}

#[test]
fn test_ask_errors_when_embeddings_disabled() {
    let (_tmp, config) = setup_test_env("");
    let (_, stderr, ok) = run_ragchat(&config, &["ask", "anything?"]);
    assert!(!ok);
    assert!(stderr.contains("error[config_error]"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_config_rejected() {
    let (_tmp, config) = setup_test_env("");
    let content = fs::read_to_string(&config)
        .unwrap()
        .replace("overlap = 10", "overlap = 80");
    fs::write(&config, content).unwrap();
    let (_, stderr, ok) = run_ragchat(&config, &["documents"]);
    assert!(!ok);
    assert!(stderr.contains("overlap"), "stderr: {}", stderr);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ingest_ask_delete_flow() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(OllamaTopics)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion("Cats purr when content.")),
        )
        .mount(&server)
        .await;

    let (tmp, config) = setup_test_env(&mock_providers(&server));
    let cats = tmp.path().join("files/cats.md");
    let dogs = tmp.path().join("files/dogs.txt");
    let missing = tmp.path().join("files/missing.md");

    assert!(run_async(&config, &["init"]).await.2);

    // One bad path fails the command but the other files are still stored.
    let (stdout, _, ok) = run_async(
        &config,
        &[
            "ingest",
            cats.to_str().unwrap(),
            missing.to_str().unwrap(),
            dogs.to_str().unwrap(),
        ],
    )
    .await;
    assert!(!ok);
    assert_eq!(stdout.matches("ok    ").count(), 2, "stdout: {}", stdout);
    assert!(stdout.contains("fail  "));

    let (stdout, _, ok) = run_async(&config, &["documents"]).await;
    assert!(ok);
    assert!(stdout.contains("cats.md"));
    assert!(stdout.contains("dogs.txt"));

    let (stdout, stderr, ok) = run_async(&config, &["ask", "why do cats purr?"]).await;
    assert!(ok, "stderr: {}", stderr);
    assert!(stdout.contains("Cats purr when content."));
    assert!(stdout.contains("Sources:"));
    assert!(stdout.contains("cats.md"));

    // Re-ingesting a path replaces the earlier version.
    let (stdout, _, ok) = run_async(&config, &["ingest", cats.to_str().unwrap()]).await;
    assert!(ok);
    assert!(stdout.contains("replaced"));

    let (stdout, _, _) = run_async(&config, &["documents"]).await;
    let cats_line = stdout
        .lines()
        .find(|l| l.contains("cats.md"))
        .expect("cats.md listed");
    assert_eq!(stdout.matches("cats.md").count(), 1);
    let id = cats_line.split_whitespace().next().unwrap().to_string();

    let (stdout, _, ok) = run_async(&config, &["delete", &id]).await;
    assert!(ok);
    assert!(stdout.contains(&format!("Deleted {}", id)));

    let (stdout, _, _) = run_async(&config, &["documents"]).await;
    assert!(!stdout.contains("cats.md"));
}
