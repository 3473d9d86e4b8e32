//! Session API trait and error types.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

use crate::model::{SessionCreated, SessionSnapshot, SessionStage, StreamEvent};

/// Errors that can occur during client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The server answered with a non-success status before any event was streamed.
    #[error("Request failed ({status}): {detail}")]
    RequestFailed {
        status: reqwest::StatusCode,
        detail: String,
    },

    /// The server sent an `error` event mid-stream.
    #[error("{0}")]
    Stream(String),

    #[error("No stream event received within {0:?}")]
    Timeout(Duration),

    #[error("Invalid stage: current={current}, expected={expected}")]
    InvalidStage {
        current: SessionStage,
        expected: SessionStage,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// A lazy, ordered stream of events from one streaming call.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ClientError>> + Send>>;

/// Calls of the practice session API.
///
/// [`crate::session::SessionClient`] implements this over HTTP. The flow
/// controller only depends on the trait, so tests can script the server.
///
/// Streaming methods resolve once the response status has been checked; a
/// non-success status fails with [`ClientError::RequestFailed`] and no stream
/// is returned.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// `POST /api/sessions/`
    async fn create_session(&self) -> Result<SessionCreated, ClientError>;

    /// `GET /api/sessions/{id}`
    async fn get_session(&self, session_id: &str) -> Result<SessionSnapshot, ClientError>;

    /// `POST /api/sessions/{id}/issue`
    async fn submit_issue(
        &self,
        session_id: &str,
        content: &str,
    ) -> Result<SessionSnapshot, ClientError>;

    /// `POST /api/sessions/{id}/stage2/mood`
    async fn save_mood_rating(
        &self,
        session_id: &str,
        value: u8,
    ) -> Result<SessionSnapshot, ClientError>;

    /// `POST /api/sessions/{id}/stage3/complete`
    async fn complete_stage3(&self, session_id: &str) -> Result<SessionSnapshot, ClientError>;

    /// `POST /api/sessions/{id}/stage2/chat`, streamed.
    async fn stream_stage2_chat(
        &self,
        session_id: &str,
        content: &str,
    ) -> Result<EventStream, ClientError>;

    /// `POST /api/sessions/{id}/stage2/complete`, streamed.
    async fn stream_complete_stage2(&self, session_id: &str) -> Result<EventStream, ClientError>;

    /// `POST /api/sessions/{id}/stage3/chat`, streamed.
    async fn stream_stage3_chat(
        &self,
        session_id: &str,
        content: &str,
    ) -> Result<EventStream, ClientError>;
}
