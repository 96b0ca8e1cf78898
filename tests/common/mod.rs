#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// One request observed by the test receiver.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub body: Vec<u8>,
    pub headers: HeaderMap,
}

pub struct Receiver {
    pub url: String,
    hits: Arc<AtomicUsize>,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl Receiver {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub async fn captured(&self) -> Vec<CapturedRequest> {
        self.captured.lock().await.clone()
    }
}

#[derive(Clone)]
struct ReceiverState {
    hits: Arc<AtomicUsize>,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    /// Respond 500 to this many requests before returning 200.
    fail_first: usize,
    /// Delay before answering, for timeout tests.
    delay_ms: u64,
}

async fn hook(
    State(state): State<ReceiverState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if state.delay_ms > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(state.delay_ms)).await;
    }

    let hit = state.hits.fetch_add(1, Ordering::SeqCst);
    state.captured.lock().await.push(CapturedRequest {
        body: body.to_vec(),
        headers,
    });

    if hit < state.fail_first {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

/// Spawn a webhook receiver on an ephemeral port.
pub async fn spawn_receiver(fail_first: usize) -> Receiver {
    spawn_receiver_with_delay(fail_first, 0).await
}

pub async fn spawn_receiver_with_delay(fail_first: usize, delay_ms: u64) -> Receiver {
    let hits = Arc::new(AtomicUsize::new(0));
    let captured = Arc::new(Mutex::new(Vec::new()));

    let state = ReceiverState {
        hits: hits.clone(),
        captured: captured.clone(),
        fail_first,
        delay_ms,
    };

    let app = Router::new().route("/hook", post(hook)).with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind receiver");
    let addr = listener.local_addr().expect("receiver addr");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("receiver serve");
    });

    Receiver {
        url: format!("http://{}/hook", addr),
        hits,
        captured,
    }
}
