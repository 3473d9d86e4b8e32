//! # empathy-practice - client for a guided emotional-support exercise
//!
//! The exercise runs in four stages: the user shares an issue, the AI
//! comforts them, the roles swap and the user comforts the AI, and finally
//! the role-swap conversation comes back annotated. Chat replies are streamed
//! by the server as Server-Sent Events.
//!
//! ## Layers
//!
//! - [`sse`]: reassembles SSE frames from body chunks and decodes them into
//!   [`StreamEvent`]s, exposed as a lazy `Stream` per call
//! - [`stream`]: accumulates `token` events into the reply text, calling back
//!   per token or coalesced to rendering frames
//! - [`session`]: typed HTTP client for the session API ([`SessionApi`])
//! - [`flow`]: the four-stage controller keeping per-stage message lists
//!
//! ## Example
//! ```no_run
//! use empathy_practice::flow::PracticeFlow;
//! use empathy_practice::session::SessionClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads PRACTICE_API_URL, defaulting to http://localhost:8000
//!     let client = SessionClient::from_env()?;
//!     let mut flow = PracticeFlow::new(client);
//!
//!     flow.submit_issue("My proposal got rejected at work today").await?;
//!
//!     let reply = flow
//!         .send_stage2("I don't know what to do now", |messages| {
//!             if let Some(last) = messages.last() {
//!                 println!("{}", last.content);
//!             }
//!         })
//!         .await?;
//!     println!("AI: {}", reply);
//!
//!     flow.rate_mood(60).await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod flow;
pub mod http;
pub mod model;
pub mod options;
pub mod session;
pub mod sse;
pub mod stream;

// Re-exports for convenience
pub use client::{ClientError, EventStream, SessionApi};
pub use flow::PracticeFlow;
pub use model::{ChatMessage, EventKind, Role, SessionStage, StreamEvent};
pub use session::SessionClient;
pub use stream::consume;
