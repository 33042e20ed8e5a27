//! HTMX web UI module.

use askama::Template;
use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use pulse_panel_core::{CoordinatorHandle, Error, Metric, PanelView};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

/// Shared state for web handlers.
pub struct WebState {
    handle: CoordinatorHandle,
    views: watch::Receiver<Option<PanelView>>,
    hostname: String,
    platform: String,
}

impl WebState {
    /// Creates the web state.
    pub fn new(
        handle: CoordinatorHandle,
        views: watch::Receiver<Option<PanelView>>,
        hostname: String,
        platform: String,
    ) -> Self {
        Self {
            handle,
            views,
            hostname,
            platform,
        }
    }

    /// Returns the latest view, forcing a tick if none has been published yet.
    async fn current_view(&self) -> Result<PanelView, Error> {
        let latest = self.views.borrow().clone();
        match latest {
            Some(view) => Ok(view),
            None => self.handle.refresh().await,
        }
    }
}

/// Main index page template.
#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    hostname: String,
    platform: String,
}

/// One metric line in the panel.
struct MetricRow {
    label: &'static str,
    value: String,
    stale: bool,
}

/// Panel partial template.
#[derive(Template)]
#[template(path = "partials/panel.html")]
struct PanelTemplate {
    rows: Vec<MetricRow>,
    speed_test_line: String,
    running: bool,
    notice: String,
    updated: String,
}

impl PanelTemplate {
    fn from_view(view: &PanelView, notice: &str) -> Self {
        let rows = Metric::ALL
            .iter()
            .map(|metric| MetricRow {
                label: metric.label(),
                value: view.snapshot.display_value(*metric),
                stale: view.degraded.contains(metric),
            })
            .collect();
        Self {
            rows,
            speed_test_line: view.speed_test_line(),
            running: view.probe.is_running(),
            notice: notice.to_string(),
            updated: view
                .published_at
                .with_timezone(&chrono::Local)
                .format("%H:%M:%S")
                .to_string(),
        }
    }
}

/// Renders a template, answering 500 if rendering fails.
fn render(template: impl Template) -> Response {
    match template.render() {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            warn!("Template render failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Render error: {}", e)).into_response()
        }
    }
}

fn unavailable(e: Error) -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
}

/// Creates the web router with all routes.
pub fn create_router(state: Arc<WebState>) -> Router {
    // Read-only JSON may be fetched from other origins; actions may not.
    let api = Router::new().route("/api/view", get(api_view)).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET]),
    );

    Router::new()
        // Main page
        .route("/", get(index))
        // Partials for HTMX
        .route("/panel", get(panel))
        .route("/speedtest", post(speedtest))
        .route("/refresh", post(refresh))
        // JSON
        .merge(api)
        .with_state(state)
}

/// GET / - Main page
async fn index(State(state): State<Arc<WebState>>) -> Response {
    render(IndexTemplate {
        hostname: state.hostname.clone(),
        platform: state.platform.clone(),
    })
}

/// GET /panel - Metrics and speed test partial
async fn panel(State(state): State<Arc<WebState>>) -> Response {
    match state.current_view().await {
        Ok(view) => render(PanelTemplate::from_view(&view, "")),
        Err(e) => unavailable(e),
    }
}

/// POST /speedtest - Start a speed test
async fn speedtest(State(state): State<Arc<WebState>>) -> Response {
    let (status, notice) = match state.handle.start_probe().await {
        Ok(()) => (StatusCode::OK, ""),
        Err(Error::ProbeAlreadyRunning) => {
            debug!("Web: speed test already running");
            (StatusCode::CONFLICT, "A speed test is already running.")
        }
        Err(e) => return unavailable(e),
    };
    // Show the mailbox state on the latest frame; the next tick catches up the rest.
    match state.current_view().await {
        Ok(mut view) => {
            view.probe = state.handle.probe_state();
            let mut response = render(PanelTemplate::from_view(&view, notice));
            *response.status_mut() = status;
            response
        }
        Err(e) => unavailable(e),
    }
}

/// POST /refresh - Force an immediate tick
async fn refresh(State(state): State<Arc<WebState>>) -> Response {
    match state.handle.refresh().await {
        Ok(view) => render(PanelTemplate::from_view(&view, "")),
        Err(e) => unavailable(e),
    }
}

/// GET /api/view - Latest view as JSON
async fn api_view(State(state): State<Arc<WebState>>) -> Response {
    let view = match state.current_view().await {
        Ok(view) => view,
        Err(e) => return unavailable(e),
    };
    match serde_json::to_string(&view) {
        Ok(json) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/json"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            json,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use pulse_panel_core::{
        Coordinator, MetricReadings, MetricSnapshot, Probe, Publisher, Sampler, SpeedTestResult,
    };
    use std::sync::mpsc as std_mpsc;
    use std::sync::Mutex;
    use std::time::Duration;
    use tower::ServiceExt;

    struct FixedSampler;

    impl Sampler for FixedSampler {
        fn sample(&mut self) -> MetricReadings {
            let mut readings = MetricReadings::from(MetricSnapshot {
                cpu_percent: 12.5,
                memory_percent: 40.0,
                disk_percent: 64.0,
                network_sent_bytes: 1024 * 1024,
                network_recv_bytes: 2 * 1024 * 1024,
                process_count: 211,
                uptime_seconds: 7_260.0,
            });
            readings.disk_percent = Err(Error::unavailable(Metric::Disk, "gone"));
            readings
        }
    }

    /// Blocks until the test releases it.
    struct GatedProbe {
        gate: Mutex<std_mpsc::Receiver<()>>,
    }

    impl Probe for GatedProbe {
        fn measure(&self) -> pulse_panel_core::Result<SpeedTestResult> {
            let gate = self.gate.lock().unwrap();
            let _ = gate.recv();
            Ok(SpeedTestResult::new(55.2, 12.1))
        }
    }

    fn app() -> (Router, std_mpsc::Sender<()>) {
        let (gate_tx, gate_rx) = std_mpsc::channel();
        let (views_tx, views_rx) = watch::channel(None);
        let publisher: Arc<dyn Publisher> = Arc::new(views_tx);
        let coordinator = Coordinator::new(
            FixedSampler,
            Arc::new(GatedProbe {
                gate: Mutex::new(gate_rx),
            }),
            publisher,
        );
        let (handle, _task) = coordinator.spawn(Duration::from_secs(3600));
        let state = WebState::new(
            handle,
            views_rx,
            "testhost".to_string(),
            "Linux 6.8.0 x86_64".to_string(),
        );
        (create_router(Arc::new(state)), gate_tx)
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_index_names_host() {
        let (app, _gate) = app();
        let response = app.oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("testhost"));
        assert!(html.contains("Linux 6.8.0 x86_64"));
    }

    #[tokio::test]
    async fn test_panel_renders_metrics() {
        let (app, _gate) = app();
        let response = app.oneshot(get("/panel")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("CPU Usage"));
        assert!(html.contains("12.5%"));
        assert!(html.contains("2.00 MB"));
        assert!(html.contains("2h 1m"));
        assert!(html.contains("No speed test yet"));
    }

    #[tokio::test]
    async fn test_api_view_is_json() {
        let (app, _gate) = app();
        let response = app.oneshot(get("/api/view")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let view: PanelView = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(view.sequence, 1);
        assert_eq!(view.snapshot.process_count, 211);
        assert_eq!(view.degraded, vec![Metric::Disk]);
    }

    #[tokio::test]
    async fn test_api_view_allows_cross_origin_reads() {
        let (app, _gate) = app();
        let request = Request::builder()
            .uri("/api/view")
            .header(header::ORIGIN, "http://dashboard.local")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }

    #[tokio::test]
    async fn test_second_speedtest_conflicts() {
        let (app, gate) = app();
        let first = app.clone().oneshot(post("/speedtest")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert!(body_text(first).await.contains("Speed test running..."));

        let second = app.oneshot(post("/speedtest")).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert!(body_text(second).await.contains("already running"));
        gate.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_speedtest_does_not_publish_a_tick() {
        let (app, gate) = app();
        let before = app.clone().oneshot(get("/api/view")).await.unwrap();
        let before: PanelView = serde_json::from_str(&body_text(before).await).unwrap();
        assert_eq!(before.probe, pulse_panel_core::ProbeState::Idle);

        let started = app.clone().oneshot(post("/speedtest")).await.unwrap();
        assert_eq!(started.status(), StatusCode::OK);
        assert!(body_text(started).await.contains("Speed test running..."));

        let after = app.oneshot(get("/api/view")).await.unwrap();
        let after: PanelView = serde_json::from_str(&body_text(after).await).unwrap();
        assert_eq!(after.sequence, before.sequence);
        assert_eq!(after.probe, pulse_panel_core::ProbeState::Idle);
        gate.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_refresh_advances_sequence() {
        let (app, _gate) = app();
        let first = app.clone().oneshot(get("/api/view")).await.unwrap();
        let first: PanelView = serde_json::from_str(&body_text(first).await).unwrap();

        let refreshed = app.clone().oneshot(post("/refresh")).await.unwrap();
        assert_eq!(refreshed.status(), StatusCode::OK);

        let latest = app.oneshot(get("/api/view")).await.unwrap();
        let latest: PanelView = serde_json::from_str(&body_text(latest).await).unwrap();
        assert_eq!(latest.sequence, first.sequence + 1);
        assert_eq!(latest.snapshot, first.snapshot);
    }
}
