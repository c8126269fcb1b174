mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, NamedTempFile};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, Layer, Registry};

fn write_config(target_dir: &Path, endpoint: &str, incremental_mode: bool) -> NamedTempFile {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    let body = serde_json::json!({
        "bucket": "x",
        "path_prefix": "in/",
        "target_dir": target_dir,
        "incremental_mode": incremental_mode,
        "storage_endpoint": endpoint,
    });
    write(config.path(), serde_json::to_vec(&body).unwrap()).expect("Writing temp config failed");
    config
}

fn tap() -> Command {
    let mut cmd = Command::cargo_bin("tap-cloud-storage").expect("Binary exists");
    cmd.env_remove("GOOGLE_OAUTH_ACCESS_TOKEN")
        .env_remove("STORAGE_EMULATOR_HOST")
        .env("RUST_LOG", "info");
    cmd
}

/// Serves `in/`, `in/a.csv` and `in/sub/b.csv` with fixed timestamps.
async fn fake_bucket() -> common::FakeGcs {
    common::start(|target| {
        if target.starts_with("/storage/v1/b/x/o?") {
            (
                200,
                common::listing(
                    &[
                        ("in/", "2024-01-01T00:00:00Z"),
                        ("in/a.csv", "2024-01-01T00:00:00Z"),
                        ("in/sub/b.csv", "2024-01-02T08:00:00.500Z"),
                    ],
                    None,
                ),
            )
        } else if target.starts_with("/storage/v1/b/x/o/in%2Fa.csv?") {
            (200, b"a,1\n".to_vec())
        } else if target.starts_with("/storage/v1/b/x/o/in%2Fsub%2Fb.csv?") {
            (200, b"b,2\n".to_vec())
        } else {
            (404, b"{}".to_vec())
        }
    })
    .await
}

async fn run_tap(cmd: Command) -> assert_cmd::assert::Assert {
    let mut cmd = cmd;
    tokio::task::spawn_blocking(move || cmd.assert())
        .await
        .expect("tap process join")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn incremental_runs_download_once_and_write_state() {
    let server = fake_bucket().await;
    let out = tempdir().unwrap();
    let state_dir = tempdir().unwrap();
    let state_path = state_dir.path().join("state.json");
    let config = write_config(out.path(), &server.endpoint(), true);

    let mut first = tap();
    first.arg("--config").arg(config.path()).arg("--state").arg(&state_path);
    run_tap(first)
        .await
        .success()
        .stdout(predicate::str::contains("2 downloaded"));

    assert_eq!(std::fs::read_to_string(out.path().join("a.csv")).unwrap(), "a,1\n");
    assert_eq!(std::fs::read_to_string(out.path().join("b.csv")).unwrap(), "b,2\n");
    assert_eq!(server.media_downloads().len(), 2);

    let state: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&state_path).unwrap()).unwrap();
    assert_eq!(
        state,
        serde_json::json!({
            "bookmarks": {
                "in/a.csv": {
                    "replication_key_value": "2024-01-01T00:00:00+00:00",
                    "replication_key": "updated"
                },
                "in/sub/b.csv": {
                    "replication_key_value": "2024-01-02T08:00:00.500000+00:00",
                    "replication_key": "updated"
                }
            }
        })
    );

    let mut second = tap();
    second.arg("-c").arg(config.path()).arg("-s").arg(&state_path);
    run_tap(second)
        .await
        .success()
        .stdout(predicate::str::contains("0 downloaded, 2 unchanged"));
    assert_eq!(server.media_downloads().len(), 2, "second run must not download");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_mode_downloads_everything_and_leaves_state_alone() {
    let server = fake_bucket().await;
    let out = tempdir().unwrap();
    let state_dir = tempdir().unwrap();
    let state_path = state_dir.path().join("state.json");
    let config = write_config(out.path(), &server.endpoint(), false);

    for _ in 0..2 {
        let mut cmd = tap();
        cmd.arg("--config").arg(config.path()).arg("--state").arg(&state_path);
        run_tap(cmd).await.success();
    }

    assert_eq!(server.media_downloads().len(), 4);
    assert!(!state_path.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn storage_failure_exits_non_zero_without_state() {
    let server = common::start(|_| (401, b"{\"error\": \"unauthenticated\"}".to_vec())).await;
    let out = tempdir().unwrap();
    let state_dir = tempdir().unwrap();
    let state_path = state_dir.path().join("state.json");
    let config = write_config(out.path(), &server.endpoint(), true);

    let mut cmd = tap();
    cmd.arg("--config").arg(config.path()).arg("--state").arg(&state_path);
    run_tap(cmd)
        .await
        .failure()
        .stderr(predicate::str::contains("401"));
    assert!(!state_path.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn service_account_config_authenticates_storage_requests() {
    let server = common::start(|target| {
        if target == "/token" {
            (200, br#"{"access_token": "sa-token", "expires_in": 3600}"#.to_vec())
        } else if target.starts_with("/storage/v1/b/x/o?") {
            (200, common::listing(&[("in/a.csv", "2024-01-01T00:00:00Z")], None))
        } else {
            (200, b"a,1\n".to_vec())
        }
    })
    .await;
    let out = tempdir().unwrap();
    let config = NamedTempFile::new().unwrap();
    let body = serde_json::json!({
        "type": "service_account",
        "project_id": "example",
        "client_email": "tap@example.iam.gserviceaccount.com",
        "private_key": common::SERVICE_ACCOUNT_KEY,
        "token_uri": format!("{}/token", server.endpoint()),
        "bucket": "x",
        "path_prefix": "in/",
        "target_dir": out.path(),
        "storage_endpoint": server.endpoint(),
    });
    write(config.path(), serde_json::to_vec(&body).unwrap()).unwrap();

    let mut cmd = tap();
    cmd.arg("--config").arg(config.path());
    run_tap(cmd).await.success();

    assert_eq!(std::fs::read_to_string(out.path().join("a.csv")).unwrap(), "a,1\n");
    let requests = server.requests.lock().unwrap();
    assert!(requests[0].starts_with("POST /token "), "got {:?}", requests[0]);
    assert_eq!(requests.len(), 3);
    for request in &requests[1..] {
        assert!(request.to_lowercase().contains("authorization: bearer sa-token"));
    }
}

#[test]
fn missing_config_file_fails() {
    tap()
        .arg("--config")
        .arg("does-not-exist.json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

#[test]
fn incremental_mode_requires_state_path() {
    let out = tempdir().unwrap();
    let config = write_config(out.path(), "http://127.0.0.1:9", true);
    tap()
        .arg("--config")
        .arg(config.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("--state"));
}

#[test]
fn config_is_required() {
    tap().assert().failure().stderr(predicate::str::contains("--config"));
}

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{:?}", event));
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use tap_cloud_storage::cli::{run, Cli};

    let cli = Cli {
        config: std::path::PathBuf::from("dummy.json"),
        state: None,
    };

    let result = run(cli).await;
    assert!(result.is_err(), "dummy config must not load");

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
    assert!(
        event_msgs.iter().any(|msg| msg.contains("Failed to read config file")),
        "Expected the config read failure to be logged, got: {:?}",
        event_msgs
    );
}
