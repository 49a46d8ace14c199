//! # HTTP Request Metrics
//!
//! Records `http_requests_total{method,path,status}` and
//! `http_request_duration_seconds{method,path}`. The path label is the
//! matched route template (`/licenses/{tool}/status`), so tool names and
//! lease IDs never become label values.

use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;

/// Label for requests that matched no route.
const UNMATCHED: &str = "unmatched";

fn route_label(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED.to_string())
}

pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = route_label(&request);
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method,
        "path" => path
    )
    .record(start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::middleware::from_fn;
    use axum::routing::get;
    use axum::Router;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    #[test]
    fn unmatched_request_gets_fallback_label() {
        let request = Request::builder().uri("/nowhere").body(Body::empty()).unwrap();
        assert_eq!(route_label(&request), "unmatched");
    }

    #[tokio::test]
    async fn records_route_template_not_raw_path() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let app = Router::new()
            .route("/licenses/{tool}/status", get(|| async { "ok" }))
            .layer(from_fn(metrics_middleware));

        let request = Request::builder()
            .uri("/licenses/cad_tool/status")
            .body(Body::empty())
            .unwrap();
        // The local recorder is thread-scoped; the current-thread runtime
        // keeps the whole request on this thread.
        let _guard = metrics::set_default_local_recorder(&recorder);
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), 200);

        let text = handle.render();
        assert!(text.contains("path=\"/licenses/{tool}/status\""), "{text}");
        assert!(!text.contains("cad_tool"), "{text}");
    }
}
