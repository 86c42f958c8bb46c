//! Response handling.
//!
//! # Responsibilities
//! - Let middleware answer a request directly ([`ResponseWriter`])
//! - Publish a one-shot "response finished" signal the pipeline observes
//! - Build the default not-found, error and HTTPS redirect responses
//!
//! # Design Decisions
//! - Finishing is idempotent: the first response written wins
//! - The signal is a `watch` channel so late subscribers still see it

use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use tokio::sync::watch;

struct Slot {
    response: Mutex<Option<Response>>,
    finished: watch::Sender<bool>,
}

/// Handle through which middleware may end a request.
///
/// Cloning yields another handle to the same response.
#[derive(Clone)]
pub struct ResponseWriter {
    slot: Arc<Slot>,
}

impl ResponseWriter {
    pub fn new() -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            slot: Arc::new(Slot {
                response: Mutex::new(None),
                finished,
            }),
        }
    }

    /// Write the response and mark the request finished.
    ///
    /// Returns `false` when a response was already written.
    pub fn end(&self, response: impl IntoResponse) -> bool {
        let mut slot = self.slot.response.lock().expect("response slot poisoned");
        if *self.slot.finished.borrow() {
            return false;
        }
        *slot = Some(response.into_response());
        self.slot.finished.send_replace(true);
        true
    }

    pub fn is_finished(&self) -> bool {
        *self.slot.finished.borrow()
    }

    /// Resolves once the response has been finished.
    pub async fn finished(&self) {
        let mut rx = self.slot.finished.subscribe();
        // the sender lives in `self`, so the channel cannot close under us
        let _ = rx.wait_for(|finished| *finished).await;
    }

    /// Take the written response, if any.
    pub fn take(&self) -> Option<Response> {
        self.slot.response.lock().expect("response slot poisoned").take()
    }
}

impl Default for ResponseWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResponseWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseWriter")
            .field("finished", &self.is_finished())
            .finish()
    }
}

pub fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

pub fn internal_server_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

/// 302 to the HTTPS version of `host` + `original_url`.
pub fn redirect_to_https(host: &str, redirect_port: Option<u16>, original_url: &str) -> Response {
    let hostname = host.split(':').next().unwrap_or(host);
    let authority = match redirect_port {
        Some(port) => format!("{}:{}", hostname, port),
        None => hostname.to_string(),
    };
    let location = format!("https://{}{}", authority, original_url);

    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, location)
        .body(Body::empty())
        .unwrap_or_else(|_| internal_server_error())
}
