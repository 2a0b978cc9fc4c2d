use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use catalog_cache::{CategoryTable, HttpPageInvalidator, InvalidationNotifier, NotificationOutcome};
use catalog_core::PageInvalidator;

#[derive(Default)]
struct Recorded {
    requests: Mutex<Vec<(Option<String>, Value)>>,
    fail_first: AtomicUsize,
}

async fn revalidate(
    State(recorded): State<Arc<Recorded>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    recorded.requests.lock().push((auth, body));

    let remaining = recorded.fail_first.load(Ordering::SeqCst);
    if remaining > 0 {
        recorded.fail_first.store(remaining - 1, Ordering::SeqCst);
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn spawn_endpoint(fail_first: usize) -> (String, Arc<Recorded>) {
    let recorded = Arc::new(Recorded::default());
    recorded.fail_first.store(fail_first, Ordering::SeqCst);

    let app = Router::new()
        .route("/api/revalidate", post(revalidate))
        .with_state(recorded.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/api/revalidate", addr), recorded)
}

fn invalidator(endpoint: String) -> HttpPageInvalidator {
    HttpPageInvalidator::new(
        endpoint,
        "hook-secret".to_string().into(),
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn test_posts_comma_joined_paths_with_bearer_secret() {
    let (endpoint, recorded) = spawn_endpoint(0).await;
    let paths = vec!["/games/g".to_string(), "/games".to_string()];

    invalidator(endpoint).invalidate(&paths).await.unwrap();

    let requests = recorded.requests.lock();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0.as_deref(), Some("Bearer hook-secret"));
    assert_eq!(requests[0].1["paths"], Value::from("/games/g,/games"));
}

#[tokio::test]
async fn test_non_success_status_is_an_error() {
    let (endpoint, _recorded) = spawn_endpoint(1).await;
    let err = invalidator(endpoint)
        .invalidate(&["/games".to_string()])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn test_notifier_retries_against_real_endpoint() {
    let (endpoint, recorded) = spawn_endpoint(2).await;
    let notifier = InvalidationNotifier::new(
        Arc::new(invalidator(endpoint)),
        CategoryTable::default(),
        3,
    );

    let outcome = notifier.notify(&["/staff/s".to_string()]).await;
    assert_eq!(outcome, NotificationOutcome::Delivered { attempts: 3 });
    assert_eq!(recorded.requests.lock().len(), 3);
}
