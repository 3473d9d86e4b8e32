//! HTTP client for the practice session API.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::client::{ClientError, EventStream, SessionApi};
use crate::http::{add_extra_headers, build_http_client, ensure_success};
use crate::model::{ContentRequest, MoodRequest, SessionCreated, SessionSnapshot};
use crate::options::ClientOptions;
use crate::sse::SSEResponseExt;

/// Session API client over HTTP.
#[derive(Debug, Clone)]
pub struct SessionClient {
    http: reqwest::Client,
    options: ClientOptions,
}

impl SessionClient {
    pub fn new(options: ClientOptions) -> Result<Self, ClientError> {
        let http = build_http_client(&options)?;
        Ok(Self { http, options })
    }

    /// Client for the host named by `PRACTICE_API_URL`.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientOptions::from_env())
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let url = self.options.endpoint(path);
        debug!(%url, "POST");
        add_extra_headers(self.http.post(url), &self.options.extra_headers)
    }

    fn with_timeout(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(timeout) = self.options.timeout {
            request = request.timeout(timeout);
        }
        request
    }

    async fn send_json<T, B>(&self, request: RequestBuilder, body: Option<&B>) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut request = self.with_timeout(request);
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, "application/json").json(body);
        }

        let response = ensure_success(request.send().await?).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn open_stream<B>(&self, path: &str, body: Option<&B>) -> Result<EventStream, ClientError>
    where
        B: Serialize + ?Sized,
    {
        let mut request = self.post(path).header(ACCEPT, "text/event-stream");
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, "application/json").json(body);
        }

        let response = ensure_success(request.send().await?).await?;
        debug!(status = %response.status(), "stream opened");
        Ok(Box::pin(response.sse_events()))
    }
}

#[async_trait]
impl SessionApi for SessionClient {
    async fn create_session(&self) -> Result<SessionCreated, ClientError> {
        let created: SessionCreated = self
            .send_json(self.post("/api/sessions/"), None::<&()>)
            .await?;
        info!(session_id = %created.id, "session created");
        Ok(created)
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionSnapshot, ClientError> {
        let url = self.options.endpoint(&format!("/api/sessions/{}", session_id));
        let request = add_extra_headers(self.http.get(url), &self.options.extra_headers);
        self.send_json(request, None::<&()>).await
    }

    async fn submit_issue(
        &self,
        session_id: &str,
        content: &str,
    ) -> Result<SessionSnapshot, ClientError> {
        let body = ContentRequest::new(content)?;
        let path = format!("/api/sessions/{}/issue", session_id);
        self.send_json(self.post(&path), Some(&body)).await
    }

    async fn save_mood_rating(
        &self,
        session_id: &str,
        value: u8,
    ) -> Result<SessionSnapshot, ClientError> {
        let body = MoodRequest::new(value)?;
        let path = format!("/api/sessions/{}/stage2/mood", session_id);
        self.send_json(self.post(&path), Some(&body)).await
    }

    async fn complete_stage3(&self, session_id: &str) -> Result<SessionSnapshot, ClientError> {
        let path = format!("/api/sessions/{}/stage3/complete", session_id);
        self.send_json(self.post(&path), None::<&()>).await
    }

    async fn stream_stage2_chat(
        &self,
        session_id: &str,
        content: &str,
    ) -> Result<EventStream, ClientError> {
        let body = ContentRequest::new(content)?;
        let path = format!("/api/sessions/{}/stage2/chat", session_id);
        self.open_stream(&path, Some(&body)).await
    }

    async fn stream_complete_stage2(&self, session_id: &str) -> Result<EventStream, ClientError> {
        let path = format!("/api/sessions/{}/stage2/complete", session_id);
        self.open_stream(&path, None::<&()>).await
    }

    async fn stream_stage3_chat(
        &self,
        session_id: &str,
        content: &str,
    ) -> Result<EventStream, ClientError> {
        let body = ContentRequest::new(content)?;
        let path = format!("/api/sessions/{}/stage3/chat", session_id);
        self.open_stream(&path, Some(&body)).await
    }
}
