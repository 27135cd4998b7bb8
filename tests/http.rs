use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

const CSRF_TOKEN: &str = "token-123";
const LOCKED_TASK: &str = "week4-backup";

#[derive(Debug, Deserialize)]
struct ToggleResponse {
    success: bool,
    checked: bool,
    error: Option<String>,
    percentage: Option<f64>,
}

struct TestServer {
    base_url: String,
    child: Child,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

static TEST_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));
static SERVER: Lazy<Mutex<Option<Arc<TestServer>>>> = Lazy::new(|| Mutex::new(None));

#[cfg(unix)]
mod cleanup {
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Once;

    static REGISTER: Once = Once::new();
    static PID: AtomicI32 = AtomicI32::new(0);

    pub fn register(pid: u32) {
        REGISTER.call_once(|| {
            PID.store(pid as i32, Ordering::SeqCst);
            unsafe {
                libc::atexit(on_exit);
            }
        });
    }

    extern "C" fn on_exit() {
        let pid = PID.load(Ordering::SeqCst);
        if pid > 0 {
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
        }
    }
}

/// Completed tasks keyed by `(category, task id)`.
type Completed = Arc<std::sync::Mutex<BTreeMap<(String, String), bool>>>;

fn snapshot(completed: &BTreeMap<(String, String), bool>) -> Value {
    let mut categories: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
    for ((category, task), done) in completed {
        categories
            .entry(category.clone())
            .or_default()
            .insert(task.clone(), json!({ "completed": done, "subtasks": {} }));
    }
    let count = completed.values().filter(|done| **done).count();
    json!({
        "completedTaskCount": count,
        "progressPercentage": count * 2,
        "categories": categories,
    })
}

async fn csrf_token() -> Json<Value> {
    Json(json!({ "token": CSRF_TOKEN }))
}

async fn get_progress(State(completed): State<Completed>) -> Json<Value> {
    let completed = completed.lock().unwrap();
    Json(json!({ "success": true, "data": snapshot(&completed) }))
}

async fn post_progress(
    State(completed): State<Completed>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if headers.get("x-csrf-token").and_then(|v| v.to_str().ok()) != Some(CSRF_TOKEN) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "success": false, "error": "Invalid CSRF token" })),
        );
    }
    let category = body["category"].as_str().unwrap_or_default().to_string();
    let task = body["taskId"].as_str().unwrap_or_default().to_string();
    if task == LOCKED_TASK {
        return (
            StatusCode::OK,
            Json(json!({ "success": false, "error": "locked" })),
        );
    }
    let checked = body["checked"].as_bool().unwrap_or(false);
    let mut completed = completed.lock().unwrap();
    completed.insert((category, task), checked);
    (
        StatusCode::OK,
        Json(json!({ "success": true, "data": snapshot(&completed) })),
    )
}

fn asset(body: &'static str) -> impl Fn() -> std::future::Ready<&'static str> + Clone {
    move || std::future::ready(body)
}

/// The remote backend, on its own thread so it outlives any single test runtime.
fn spawn_backend() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind backend port");
    listener.set_nonblocking(true).unwrap();
    let port = listener.local_addr().unwrap().port();

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Runtime::new().expect("backend runtime");
        runtime.block_on(async move {
            let app = Router::new()
                .route("/", get(asset("<html>shell</html>")))
                .route("/index.html", get(asset("<html>shell</html>")))
                .route("/static/app.js", get(asset("console.log('app')")))
                .route("/static/styles.css", get(asset("body {}")))
                .route("/offline.html", get(asset("<html>offline</html>")))
                .route("/static/img/default-avatar.png", get(asset("png")))
                .route("/api/csrf-token", get(csrf_token))
                .route("/api/progress", get(get_progress).post(post_progress))
                .with_state(Completed::default());
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });

    format!("http://127.0.0.1:{port}")
}

fn pick_free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind random port");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn unique_data_path() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!("lab_progress_http_{}_{}", std::process::id(), nanos));
    path.to_string_lossy().to_string()
}

async fn wait_until_ready(base_url: &str) {
    let client = Client::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(resp) = client.get(format!("{base_url}/local/dashboard")).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        if Instant::now() > deadline {
            panic!("server did not become ready");
        }
        sleep(Duration::from_millis(100)).await;
    }
}

async fn spawn_server() -> TestServer {
    let backend_url = spawn_backend();
    let port = pick_free_port();
    let child = Command::new(env!("CARGO_BIN_EXE_lab_progress"))
        .env("PORT", port.to_string())
        .env("BACKEND_URL", backend_url)
        .env("APP_DATA_PATH", unique_data_path())
        .env("RUST_LOG", "info")
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("failed to spawn server");

    #[cfg(unix)]
    cleanup::register(child.id());

    let base_url = format!("http://127.0.0.1:{port}");
    wait_until_ready(&base_url).await;

    TestServer { base_url, child }
}

async fn shared_server() -> Arc<TestServer> {
    let mut guard = SERVER.lock().await;
    if let Some(server) = guard.as_ref() {
        return Arc::clone(server);
    }
    let server = Arc::new(spawn_server().await);
    *guard = Some(Arc::clone(&server));
    server
}

async fn toggle(client: &Client, base_url: &str, task: &str, checked: bool) -> ToggleResponse {
    client
        .post(format!("{base_url}/local/toggle"))
        .json(&json!({
            "category": task.split('-').next().unwrap(),
            "task_id": task,
            "checked": checked,
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn http_toggle_is_confirmed_and_projected() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let client = Client::new();

    let response = toggle(&client, &server.base_url, "week1-install-server2012", true).await;
    assert!(response.success);
    assert!(response.checked);
    assert!(response.percentage.unwrap_or(0.0) > 0.0);

    // The projector runs on its own task; give it a moment.
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let view: Value = client
            .get(format!("{}/local/dashboard", server.base_url))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let checked = view["categories"][0]["tasks"][0]["checked"].as_bool();
        if checked == Some(true) {
            assert!(view["overall"]["completed_count"].as_u64().unwrap() >= 1);
            break;
        }
        if Instant::now() > deadline {
            panic!("dashboard never showed the toggle: {view}");
        }
        sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn http_rejected_toggle_reports_reverted_state() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let client = Client::new();

    let response = toggle(&client, &server.base_url, LOCKED_TASK, true).await;
    assert!(!response.success);
    assert!(!response.checked);
    assert_eq!(response.error.as_deref(), Some("locked"));
}

#[tokio::test]
async fn http_dashboard_page_renders() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;

    let html = Client::new()
        .get(format!("{}/", server.base_url))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(html.contains("Lab Progress"));
    assert!(html.contains("week1-install-server2012"));
}

#[tokio::test]
async fn http_assets_are_served_through_the_cache() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;

    let response = Client::new()
        .get(format!("{}/static/app.js", server.base_url))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    assert_eq!(response.text().await.unwrap(), "console.log('app')");

    let token: Value = Client::new()
        .get(format!("{}/api/csrf-token", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(token["token"], CSRF_TOKEN);
}
