// src/ingest/http.rs
//! Shared HTTP plumbing for adapters: client construction and mapping of
//! transport/status failures onto `FetchError`.

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};

use crate::ingest::types::FetchError;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Client used by all board adapters. Per-request timeouts are set at call sites.
pub fn build_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(5))
        .build()
        .context("building job-board http client")
}

/// `None` for success statuses.
pub fn classify_status(status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Some(FetchError::RateLimited(status.to_string()));
    }
    if status.is_server_error() {
        return Some(FetchError::Unavailable(status.to_string()));
    }
    Some(FetchError::Unknown(format!("unexpected status {status}")))
}

pub fn classify_transport(err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::Timeout;
    }
    if let Some(status) = err.status() {
        if let Some(e) = classify_status(status) {
            return e;
        }
    }
    // Refused / reset connections and truncated bodies are transient.
    if err.is_connect() || err.is_request() || err.is_body() {
        return FetchError::Unavailable(err.to_string());
    }
    FetchError::Unknown(err.to_string())
}

/// Time left until `deadline`, or `Timeout` if it already passed.
pub fn remaining(deadline: Instant) -> Result<Duration, FetchError> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        Err(FetchError::Timeout)
    } else {
        Ok(left)
    }
}
