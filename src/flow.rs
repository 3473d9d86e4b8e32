//! Four-stage practice flow on top of the session API.
//!
//! 1. **Input** - the user describes what is bothering them.
//! 2. **Conversation** - the AI comforts the user; each reply is rated.
//! 3. **Role swap** - the AI shares the same trouble and the user comforts it.
//! 4. **Review** - the role-swap conversation comes back annotated.
//!
//! Streamed replies are shown through an empty AI placeholder that is
//! updated in place while tokens arrive. The placeholder is committed when
//! the stream finishes and removed when it fails or is dropped.

use itertools::Itertools;
use tracing::{info, warn};

use crate::client::{ClientError, EventStream, SessionApi};
use crate::model::{
    Annotation, ChatMessage, ContentRequest, MoodRating, Role, SessionSnapshot, SessionStage,
};
use crate::options::StreamOptions;
use crate::stream::consume;

/// Fewest messages a stage needs before it can be completed.
const MIN_STAGE_MESSAGES: usize = 2;

/// An AI message pushed ahead of its streamed content.
///
/// Dropping it uncommitted removes it from the list again.
struct Placeholder<'a> {
    messages: &'a mut Vec<ChatMessage>,
    committed: bool,
}

impl<'a> Placeholder<'a> {
    fn push(messages: &'a mut Vec<ChatMessage>) -> Self {
        messages.push(ChatMessage::ai(String::new()));
        Self {
            messages,
            committed: false,
        }
    }

    fn update(&mut self, text: &str) {
        if let Some(last) = self.messages.last_mut() {
            last.content.clear();
            last.content.push_str(text);
        }
    }

    fn messages(&self) -> &[ChatMessage] {
        self.messages.as_slice()
    }

    fn commit(mut self, text: &str) {
        self.update(text);
        self.committed = true;
    }
}

impl Drop for Placeholder<'_> {
    fn drop(&mut self) {
        if !self.committed && matches!(self.messages.last(), Some(m) if m.role == Role::Ai) {
            self.messages.pop();
        }
    }
}

/// Stream a reply into `messages` through a placeholder.
async fn stream_into<F>(
    messages: &mut Vec<ChatMessage>,
    events: EventStream,
    options: &StreamOptions,
    on_update: &mut F,
) -> Result<String, ClientError>
where
    F: FnMut(&[ChatMessage]),
{
    let mut placeholder = Placeholder::push(messages);
    on_update(placeholder.messages());

    let result = consume(events, options, |text| {
        placeholder.update(text);
        on_update(placeholder.messages());
    })
    .await;

    match result {
        Ok(text) => {
            placeholder.commit(&text);
            Ok(text)
        }
        Err(e) => {
            drop(placeholder);
            warn!(error = %e, "reply stream failed, placeholder retracted");
            on_update(messages.as_slice());
            Err(e)
        }
    }
}

/// Client-side state of one practice session.
///
/// Every operation takes `&mut self`, so at most one call is in flight.
pub struct PracticeFlow<A: SessionApi> {
    api: A,
    stream_options: StreamOptions,
    session_id: Option<String>,
    stage: SessionStage,
    user_issue: Option<String>,
    stage2_messages: Vec<ChatMessage>,
    stage3_messages: Vec<ChatMessage>,
    mood_ratings: Vec<MoodRating>,
    annotations: Vec<Annotation>,
    awaiting_rating: bool,
}

impl<A: SessionApi> PracticeFlow<A> {
    pub fn new(api: A) -> Self {
        Self::with_stream_options(api, StreamOptions::default())
    }

    pub fn with_stream_options(api: A, stream_options: StreamOptions) -> Self {
        Self {
            api,
            stream_options,
            session_id: None,
            stage: SessionStage::Input,
            user_issue: None,
            stage2_messages: Vec::new(),
            stage3_messages: Vec::new(),
            mood_ratings: Vec::new(),
            annotations: Vec::new(),
            awaiting_rating: false,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn stage(&self) -> SessionStage {
        self.stage
    }

    pub fn user_issue(&self) -> Option<&str> {
        self.user_issue.as_deref()
    }

    pub fn stage2_messages(&self) -> &[ChatMessage] {
        &self.stage2_messages
    }

    pub fn stage3_messages(&self) -> &[ChatMessage] {
        &self.stage3_messages
    }

    pub fn mood_ratings(&self) -> &[MoodRating] {
        &self.mood_ratings
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Whether the last stage 2 reply still needs a mood rating.
    pub fn awaiting_rating(&self) -> bool {
        self.awaiting_rating
    }

    /// Annotation of the stage 3 message at `index`, once reviewed.
    pub fn annotation_for(&self, index: usize) -> Option<&str> {
        self.annotations
            .iter()
            .find(|annotation| annotation.message_index == index)
            .map(|annotation| annotation.content.as_str())
    }

    /// Open a new session on the server.
    pub async fn start(&mut self) -> Result<(), ClientError> {
        let created = self.api.create_session().await?;
        self.reset();
        self.session_id = Some(created.id);
        self.stage = created.stage;
        Ok(())
    }

    /// Continue an existing session from its server snapshot.
    pub async fn resume(&mut self, session_id: &str) -> Result<(), ClientError> {
        let snapshot = self.api.get_session(session_id).await?;
        self.reset();
        self.apply_snapshot(snapshot);
        Ok(())
    }

    /// Drop all local state; the next [`Self::submit_issue`] opens a new session.
    pub fn restart(&mut self) {
        self.reset();
        info!("practice restarted");
    }

    /// Stage 1: submit the user's issue, moving to the conversation.
    ///
    /// Opens a session first if none is active.
    pub async fn submit_issue(&mut self, content: &str) -> Result<(), ClientError> {
        self.expect_stage(SessionStage::Input)?;
        let body = ContentRequest::new(content)?;
        if self.session_id.is_none() {
            self.start().await?;
        }

        let session_id = self.require_session()?;
        let snapshot = self.api.submit_issue(&session_id, &body.content).await?;
        self.apply_snapshot(snapshot);
        info!(stage = %self.stage, "issue submitted");
        Ok(())
    }

    /// Stage 2: send a message and stream the AI's comforting reply.
    ///
    /// `on_update` sees the stage 2 messages each time the reply grows.
    pub async fn send_stage2<F>(&mut self, content: &str, mut on_update: F) -> Result<String, ClientError>
    where
        F: FnMut(&[ChatMessage]),
    {
        self.expect_stage(SessionStage::Conversation)?;
        if self.awaiting_rating {
            return Err(ClientError::Validation(
                "rate the last reply before sending another message".to_string(),
            ));
        }
        let body = ContentRequest::new(content)?;
        let session_id = self.require_session()?;

        let events = self.api.stream_stage2_chat(&session_id, &body.content).await?;
        self.stage2_messages.push(ChatMessage::user(body.content));
        let result = stream_into(
            &mut self.stage2_messages,
            events,
            &self.stream_options,
            &mut on_update,
        )
        .await;

        match result {
            Ok(reply) => {
                self.awaiting_rating = true;
                Ok(reply)
            }
            Err(e) => {
                self.resync(&session_id).await;
                on_update(self.stage2_messages.as_slice());
                Err(e)
            }
        }
    }

    /// Stage 2: rate how the user feels after the last reply (0 to 100).
    pub async fn rate_mood(&mut self, value: u8) -> Result<(), ClientError> {
        self.expect_stage(SessionStage::Conversation)?;
        if !self.awaiting_rating {
            return Err(ClientError::Validation("no reply to rate yet".to_string()));
        }
        let session_id = self.require_session()?;

        let snapshot = self.api.save_mood_rating(&session_id, value).await?;
        self.mood_ratings = snapshot.mood_ratings;
        self.awaiting_rating = false;
        Ok(())
    }

    /// Finish stage 2 and stream the AI's opening message of the role swap.
    ///
    /// The local stage moves to the role swap once the opening message has
    /// streamed. When the stream fails, stage and messages are reloaded from
    /// the server, which may or may not have switched before failing.
    pub async fn complete_stage2<F>(&mut self, mut on_update: F) -> Result<String, ClientError>
    where
        F: FnMut(&[ChatMessage]),
    {
        self.expect_stage(SessionStage::Conversation)?;
        self.expect_messages(self.stage2_messages.len())?;
        let session_id = self.require_session()?;

        let events = self.api.stream_complete_stage2(&session_id).await?;
        let result = stream_into(
            &mut self.stage3_messages,
            events,
            &self.stream_options,
            &mut on_update,
        )
        .await;

        match result {
            Ok(opening) => {
                self.stage = SessionStage::RoleSwap;
                self.awaiting_rating = false;
                info!(stage = %self.stage, "role swap started");
                Ok(opening)
            }
            Err(e) => {
                self.resync(&session_id).await;
                on_update(self.stage3_messages.as_slice());
                Err(e)
            }
        }
    }

    /// Stage 3: comfort the AI and stream its answer.
    pub async fn send_stage3<F>(&mut self, content: &str, mut on_update: F) -> Result<String, ClientError>
    where
        F: FnMut(&[ChatMessage]),
    {
        self.expect_stage(SessionStage::RoleSwap)?;
        let body = ContentRequest::new(content)?;
        let session_id = self.require_session()?;

        let events = self.api.stream_stage3_chat(&session_id, &body.content).await?;
        self.stage3_messages.push(ChatMessage::user(body.content));
        let result = stream_into(
            &mut self.stage3_messages,
            events,
            &self.stream_options,
            &mut on_update,
        )
        .await;

        if result.is_err() {
            self.resync(&session_id).await;
            on_update(self.stage3_messages.as_slice());
        }
        result
    }

    /// Finish stage 3 and fetch the review annotations.
    pub async fn complete_stage3(&mut self) -> Result<(), ClientError> {
        self.expect_stage(SessionStage::RoleSwap)?;
        self.expect_messages(self.stage3_messages.len())?;
        let session_id = self.require_session()?;

        let snapshot = self.api.complete_stage3(&session_id).await?;
        self.stage = snapshot.stage;
        self.annotations = snapshot
            .annotations
            .into_iter()
            .sorted_by_key(|annotation| annotation.message_index)
            .collect();
        info!(annotations = self.annotations.len(), "review ready");
        Ok(())
    }

    fn reset(&mut self) {
        self.session_id = None;
        self.stage = SessionStage::Input;
        self.user_issue = None;
        self.stage2_messages.clear();
        self.stage3_messages.clear();
        self.mood_ratings.clear();
        self.annotations.clear();
        self.awaiting_rating = false;
    }

    /// Reload the session after a failed reply stream.
    ///
    /// Errors reported inside the stream leave the server state unknown: the
    /// user's message may or may not be stored. If the reload itself fails,
    /// local state is kept as it is.
    async fn resync(&mut self, session_id: &str) {
        match self.api.get_session(session_id).await {
            Ok(snapshot) => {
                self.apply_snapshot(snapshot);
                info!(stage = %self.stage, "session reloaded after stream failure");
            }
            Err(e) => warn!(error = %e, "could not reload session after stream failure"),
        }
    }

    fn apply_snapshot(&mut self, snapshot: SessionSnapshot) {
        self.session_id = Some(snapshot.id);
        self.stage = snapshot.stage;
        self.user_issue = snapshot.user_issue;
        self.stage2_messages = snapshot.stage2_messages.into_iter().map(Into::into).collect();
        self.stage3_messages = snapshot.stage3_messages.into_iter().map(Into::into).collect();
        self.mood_ratings = snapshot.mood_ratings;
        self.annotations = snapshot
            .annotations
            .into_iter()
            .sorted_by_key(|annotation| annotation.message_index)
            .collect();
        // A reply without a rating after it still needs one.
        let last_ai = self.stage2_messages.iter().rposition(|m| m.role == Role::Ai);
        self.awaiting_rating = self.stage == SessionStage::Conversation
            && last_ai.is_some_and(|index| {
                !self
                    .mood_ratings
                    .iter()
                    .any(|rating| rating.after_message_index == index as i64)
            });
    }

    fn expect_stage(&self, expected: SessionStage) -> Result<(), ClientError> {
        if self.stage == expected {
            Ok(())
        } else {
            Err(ClientError::InvalidStage {
                current: self.stage,
                expected,
            })
        }
    }

    fn expect_messages(&self, count: usize) -> Result<(), ClientError> {
        if count < MIN_STAGE_MESSAGES {
            return Err(ClientError::Validation(format!(
                "at least {} messages required before this action",
                MIN_STAGE_MESSAGES
            )));
        }
        Ok(())
    }

    fn require_session(&self) -> Result<String, ClientError> {
        self.session_id
            .clone()
            .ok_or_else(|| ClientError::Validation("no active session".to_string()))
    }
}
