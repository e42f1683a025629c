/// Collector HTTP protocol tests
///
/// A small axum server stands in for the remote collector:
/// - User and session provisioning requests
/// - Upload query parameters, auth header and JSON body
/// - Retry exhaustion against a collector that always fails
/// - A full run shipping over HTTP

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use uplog::capture::{CommandSpec, Echo};
use uplog::config::types::{CollectorConfig, UploadConfig};
use uplog::config::{AgentPaths, Config};
use uplog::pipeline::{RunContext, SessionRunner};
use uplog::record::LogRecord;
use uplog::storage::{DuckDbSessionStore, SessionStore};
use uplog::upload::{
    BatchUploader, CircuitBreaker, Collector, CollectorClient, SessionProvisioner, UploadError,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct ReceivedUpload {
        query: HashMap<String, String>,
        authorization: Option<String>,
        body: Vec<Value>,
    }

    #[derive(Default)]
    struct MockCollector {
        uploads: Mutex<Vec<ReceivedUpload>>,
        upload_attempts: AtomicUsize,
        user_creates: AtomicUsize,
        session_headers: Mutex<Vec<(Option<String>, Option<String>)>>,
        fail_uploads: bool,
    }

    fn header(headers: &HeaderMap, name: &str) -> Option<String> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    }

    async fn create_user(State(state): State<Arc<MockCollector>>) -> Json<Value> {
        state.user_creates.fetch_add(1, Ordering::SeqCst);
        Json(json!({ "user_id": "user-42" }))
    }

    async fn create_session(
        State(state): State<Arc<MockCollector>>,
        headers: HeaderMap,
    ) -> Json<Value> {
        state
            .session_headers
            .lock()
            .unwrap()
            .push((header(&headers, "authorization"), header(&headers, "user-id")));
        Json(json!({ "session_id": "remote-session-1" }))
    }

    async fn upload(
        State(state): State<Arc<MockCollector>>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
        Json(body): Json<Vec<Value>>,
    ) -> (StatusCode, String) {
        state.upload_attempts.fetch_add(1, Ordering::SeqCst);
        if state.fail_uploads {
            return (StatusCode::INTERNAL_SERVER_ERROR, "collector down".to_string());
        }
        state.uploads.lock().unwrap().push(ReceivedUpload {
            query,
            authorization: header(&headers, "authorization"),
            body,
        });
        (StatusCode::CREATED, String::new())
    }

    async fn spawn_collector(state: Arc<MockCollector>) -> String {
        let app = Router::new()
            .route("/user/create", post(create_user))
            .route("/session/create", post(create_session))
            .route("/session/upload", post(upload))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn collector_config(url: String, api_key: Option<&str>, user_id: Option<&str>) -> CollectorConfig {
        CollectorConfig {
            url,
            api_key: api_key.map(str::to_string),
            user_id: user_id.map(str::to_string),
            timeout: Duration::from_secs(5),
            provision_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_provisioning_registers_user_first() {
        let state = Arc::new(MockCollector::default());
        let url = spawn_collector(state.clone()).await;
        let client = CollectorClient::new(&collector_config(url, Some("secret"), None)).unwrap();

        let session_id = client.create_session().await.unwrap();

        assert_eq!(session_id, "remote-session-1");
        assert_eq!(state.user_creates.load(Ordering::SeqCst), 1);
        assert_eq!(
            *state.session_headers.lock().unwrap(),
            vec![(Some("Bearer secret".to_string()), Some("user-42".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_provisioning_reuses_configured_user() {
        let state = Arc::new(MockCollector::default());
        let url = spawn_collector(state.clone()).await;
        let client = CollectorClient::new(&collector_config(url, None, Some("known-user"))).unwrap();

        client.create_session().await.unwrap();

        assert_eq!(state.user_creates.load(Ordering::SeqCst), 0);
        assert_eq!(
            *state.session_headers.lock().unwrap(),
            vec![(None, Some("known-user".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_upload_request_shape() {
        let state = Arc::new(MockCollector::default());
        let url = spawn_collector(state.clone()).await;
        let client = CollectorClient::new(&collector_config(url, Some("secret"), None)).unwrap();

        let timestamp = chrono::DateTime::parse_from_rfc3339("2025-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let records = vec![LogRecord::at("Warning: retrying", timestamp)];
        client.upload_batch("s-1", Some("nightly"), &records).await.unwrap();

        let uploads = state.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        let upload = &uploads[0];
        assert_eq!(upload.query.get("session_id").map(String::as_str), Some("s-1"));
        assert_eq!(upload.query.get("tag").map(String::as_str), Some("nightly"));
        assert_eq!(upload.authorization.as_deref(), Some("Bearer secret"));
        assert_eq!(
            upload.body,
            vec![json!({
                "message": "Warning: retrying",
                "timestamp": "2025-01-01T10:00:00Z",
                "level": "WARN"
            })]
        );
    }

    #[tokio::test]
    async fn test_always_failing_collector_opens_circuit() {
        let state = Arc::new(MockCollector {
            fail_uploads: true,
            ..Default::default()
        });
        let url = spawn_collector(state.clone()).await;
        let client = Arc::new(CollectorClient::new(&collector_config(url, None, None)).unwrap());

        let ctx = Arc::new(RunContext::new(
            "s-fail",
            None,
            &AgentPaths::new("/tmp/uplog-http-test"),
            Arc::new(Config::default()),
        ));
        let upload_config = UploadConfig {
            max_retries: 3,
            retry_delay: Duration::from_millis(10),
            ..Default::default()
        };
        let circuit = CircuitBreaker::new();
        let uploader = BatchUploader::new(client, circuit.clone(), ctx, &upload_config);

        let err = uploader
            .upload(&[LogRecord::capture("lost")])
            .await
            .unwrap_err();

        assert_eq!(state.upload_attempts.load(Ordering::SeqCst), 3);
        assert!(circuit.is_open());
        assert!(matches!(err, UploadError::RetriesExhausted { attempts: 3, .. }));
        let text = err.to_string();
        assert!(text.contains("500"), "{}", text);
        assert!(text.contains("collector down"), "{}", text);

        uploader.upload(&[LogRecord::capture("later")]).await.unwrap_err();
        assert_eq!(state.upload_attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_ships_over_http() {
        let state = Arc::new(MockCollector::default());
        let url = spawn_collector(state.clone()).await;

        let dir = TempDir::new().unwrap();
        let paths = AgentPaths::new(dir.path());
        let store = Arc::new(DuckDbSessionStore::in_memory().unwrap());
        store.init_schema().await.unwrap();

        let mut config = Config::default();
        config.collector = collector_config(url, None, None);
        config.upload.batch_size = 2;
        let client = Arc::new(CollectorClient::new(&config.collector).unwrap());
        let runner = SessionRunner::new(Arc::new(config), paths, store.clone(), client.clone(), client)
            .with_echo(Echo::Silent);

        let command = CommandSpec::new("sh", ["-c", "echo one; echo two; echo three"]);
        let outcome = runner
            .run(&command, Some("e2e".to_string()), std::future::pending::<()>())
            .await
            .unwrap();

        assert_eq!(outcome.session_id, "remote-session-1");
        assert!(outcome.uploaded);

        let uploads = state.uploads.lock().unwrap().clone();
        let sizes: Vec<usize> = uploads.iter().map(|u| u.body.len()).collect();
        assert_eq!(sizes, vec![2, 1]);
        assert!(uploads
            .iter()
            .all(|u| u.query.get("session_id").map(String::as_str) == Some("remote-session-1")));
        assert!(uploads
            .iter()
            .all(|u| u.query.get("tag").map(String::as_str) == Some("e2e")));

        let session = store.get_session("remote-session-1").await.unwrap().unwrap();
        assert!(session.is_uploaded);
        assert_eq!(session.line_count, 3);
    }
}
