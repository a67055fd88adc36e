//! The web interface: a single page, some JSON endpoints, and a
//! Server-Sent Events stream for grading.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use tokio::net::TcpListener;

use crate::{controller::Controller, prelude::*};

mod handlers;

/// State shared by all our handlers.
#[derive(Clone)]
pub struct AppState {
    controller: Arc<Controller>,
}

/// Build our router. Request bodies larger than `body_limit` are rejected
/// before we read them.
pub fn router(controller: Controller, body_limit: usize) -> Router {
    let state = AppState {
        controller: Arc::new(controller),
    };
    Router::new()
        .route("/", get(handlers::index))
        .route("/api/health", get(handlers::health))
        .route("/api/topics", get(handlers::topics))
        .route("/api/ocr", post(handlers::ocr))
        .route("/api/grade", post(handlers::grade))
        .route("/api/grade/image", post(handlers::grade_image))
        .route(
            "/api/history",
            get(handlers::list_history).post(handlers::save_history),
        )
        .route("/api/history/:id", delete(handlers::delete_history))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Serve `router` on `addr` until we get Ctrl-C.
#[instrument(level = "debug", skip(router))]
pub async fn serve(addr: SocketAddr, router: Router) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("could not listen on {addr}"))?;
    let local_addr = listener.local_addr().context("no local address")?;
    info!("Listening on http://{local_addr}/");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;
    info!("Server stopped");
    Ok(())
}

/// Wait for Ctrl-C.
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Could not listen for Ctrl-C: {err}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::{handlers::USER_ID_HEADER, *};
    use crate::{
        grading::client::tests::{CANNED_RESPONSE, replay_client},
        history::memory::MemoryStore,
        normalize::{NormalizeOpts, tests::png_bytes},
        ocr::{TextExtractor, tests::FixedOcrEngine},
        record::GradingRecord,
    };

    /// Start a server with canned services, returning its base URL.
    async fn spawn_app(ocr_text: Option<&str>) -> String {
        let (grader, _driver) = replay_client(CANNED_RESPONSE);
        let extractor = TextExtractor::new(
            Arc::new(FixedOcrEngine::new(ocr_text)),
            NormalizeOpts::default(),
        );
        let controller = Controller::new(extractor, grader, Arc::new(MemoryStore::default()));
        let app = router(controller, 1024 * 1024);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn serves_page_health_and_topics() {
        let base = spawn_app(None).await;
        let client = reqwest::Client::new();

        let page = client.get(&base).send().await.unwrap();
        assert_eq!(page.status(), StatusCode::OK);
        assert!(page.text().await.unwrap().contains("<html"));

        let health = client
            .get(format!("{base}/api/health"))
            .send()
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);

        let topics: Value = client
            .get(format!("{base}/api/topics"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(
            topics
                .as_array()
                .unwrap()
                .iter()
                .any(|t| t["id"] == "proportionality")
        );
    }

    #[tokio::test]
    async fn empty_answer_is_a_json_validation_error() {
        let base = spawn_app(None).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/api/grade"))
            .json(&json!({"question": "Discuss.", "answer": " "}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["kind"], "validation");
        assert_eq!(body["message"], "Please enter an answer.");
    }

    /// Check for a JSON validation error.
    async fn assert_validation_error(resp: reqwest::Response) {
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["kind"], "validation", "{body}");
        assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
    }

    #[tokio::test]
    async fn malformed_requests_are_json_validation_errors() {
        let base = spawn_app(None).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/api/grade"))
            .json(&json!({"question": "Q"}))
            .send()
            .await
            .unwrap();
        assert_validation_error(resp).await;

        let resp = client
            .post(format!("{base}/api/history"))
            .header(USER_ID_HEADER, "user-1")
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_validation_error(resp).await;

        let resp = client
            .post(format!("{base}/api/grade/image"))
            .body(png_bytes(64, 64))
            .send()
            .await
            .unwrap();
        assert_validation_error(resp).await;

        let resp = client
            .get(format!("{base}/api/history?limit=lots"))
            .header(USER_ID_HEADER, "user-1")
            .send()
            .await
            .unwrap();
        assert_validation_error(resp).await;

        let resp = client
            .delete(format!("{base}/api/history/not-a-uuid"))
            .header(USER_ID_HEADER, "user-1")
            .send()
            .await
            .unwrap();
        assert_validation_error(resp).await;
    }

    #[tokio::test]
    async fn grade_streams_events_then_history_round_trips() {
        let base = spawn_app(None).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/api/grade"))
            .header(USER_ID_HEADER, "user-1")
            .json(&json!({
                "question": "Discuss.",
                "answer": "The policy addresses X.",
                "save": true,
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers()[reqwest::header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/event-stream"));
        let body = resp.text().await.unwrap();
        assert!(body.contains(r#""type":"chunk""#), "{body}");
        assert!(body.contains(r#""type":"graded""#), "{body}");
        assert!(body.contains(r#""type":"saved""#), "{body}");
        assert!(body.contains("<svg"), "{body}");

        // Anonymous users have no history.
        let resp = client
            .get(format!("{base}/api/history"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let records: Vec<GradingRecord> = client
            .get(format!("{base}/api/history"))
            .header(USER_ID_HEADER, "user-1")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].scores.language, 17);

        let url = format!("{base}/api/history/{}", records[0].id);
        let resp = client
            .delete(&url)
            .header(USER_ID_HEADER, "user-1")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let resp = client
            .delete(&url)
            .header(USER_ID_HEADER, "user-1")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn save_history_checks_scores() {
        let base = spawn_app(None).await;
        let client = reqwest::Client::new();
        let grade = crate::grading::parse_grade(CANNED_RESPONSE, 20).unwrap();

        let resp = client
            .post(format!("{base}/api/history"))
            .header(USER_ID_HEADER, "user-1")
            .json(&json!({"question": "Q?", "answer": "A.", "grade": grade}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let mut bad = serde_json::to_value(&grade).unwrap();
        bad["scores"]["relevance"] = json!(25);
        let resp = client
            .post(format!("{base}/api/history"))
            .header(USER_ID_HEADER, "user-1")
            .json(&json!({"question": "Q?", "answer": "A.", "grade": bad}))
            .send()
            .await
            .unwrap();
        assert_validation_error(resp).await;

        let mut rescaled = serde_json::to_value(&grade).unwrap();
        rescaled["max_score"] = json!(1_000_000);
        rescaled["feedback"] = json!("");
        let resp = client
            .post(format!("{base}/api/history"))
            .header(USER_ID_HEADER, "user-1")
            .json(&json!({"question": "", "answer": "", "grade": rescaled}))
            .send()
            .await
            .unwrap();
        assert_validation_error(resp).await;

        let resp = client
            .post(format!("{base}/api/history"))
            .header(USER_ID_HEADER, "user-1")
            .json(&json!({"question": "Q?", "answer": " ", "grade": grade}))
            .send()
            .await
            .unwrap();
        assert_validation_error(resp).await;

        let records: Vec<GradingRecord> = client
            .get(format!("{base}/api/history"))
            .header(USER_ID_HEADER, "user-1")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn ocr_endpoint_reports_text_and_errors() {
        let base = spawn_app(Some("The policy addresses X.")).await;
        let client = reqwest::Client::new();

        let body: Value = client
            .post(format!("{base}/api/ocr"))
            .body(png_bytes(64, 64))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["text"], "The policy addresses X.");

        let resp = client
            .post(format!("{base}/api/ocr"))
            .body("not an image")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn image_without_text_reports_error_event() {
        let base = spawn_app(None).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/api/ocr"))
            .body(png_bytes(64, 64))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = client
            .post(format!("{base}/api/grade/image"))
            .query(&[("question", "Discuss.")])
            .body(png_bytes(64, 64))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.text().await.unwrap();
        assert!(
            body.lines()
                .any(|line| line.starts_with("event:") && line.trim_end().ends_with("error")),
            "{body}"
        );
        assert!(body.contains(r#""kind":"no_text_detected""#), "{body}");
        assert!(!body.contains(r#""type":"graded""#), "{body}");
    }
}
