//! Consumption of an event stream into accumulated message text.

use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::client::ClientError;
use crate::model::{EventKind, StreamEvent};
use crate::options::{StreamOptions, UpdateMode};

/// Holds the latest of a burst of updates until it is taken.
///
/// Pushing replaces any value that has not been taken yet, so N rapid
/// updates collapse into one carrying the newest value.
///
/// # Example
/// ```
/// use empathy_practice::stream::Coalescer;
///
/// let mut pending = Coalescer::new();
/// pending.push("a");
/// pending.push("ab");
/// assert_eq!(pending.take(), Some("ab"));
/// assert_eq!(pending.take(), None);
/// ```
#[derive(Debug)]
pub struct Coalescer<T> {
    latest: Option<T>,
}

impl<T> Coalescer<T> {
    pub fn new() -> Self {
        Self { latest: None }
    }

    pub fn push(&mut self, value: T) {
        self.latest = Some(value);
    }

    pub fn take(&mut self) -> Option<T> {
        self.latest.take()
    }

    /// Drop the pending value without delivering it.
    pub fn cancel(&mut self) {
        self.latest = None;
    }

    pub fn is_pending(&self) -> bool {
        self.latest.is_some()
    }
}

impl<T> Default for Coalescer<T> {
    fn default() -> Self {
        Self::new()
    }
}

enum Progress {
    Appended,
    Ignored,
    Finished,
}

fn apply(text: &mut String, event: StreamEvent) -> Result<Progress, ClientError> {
    match &event.kind {
        EventKind::Token => match event.content() {
            Some("") => Ok(Progress::Ignored),
            Some(content) => {
                text.push_str(content);
                Ok(Progress::Appended)
            }
            None => {
                warn!(payload = ?event.payload, "token event without content");
                Ok(Progress::Ignored)
            }
        },
        EventKind::Error => {
            let detail = event.detail().unwrap_or("unknown stream error");
            warn!(detail, "stream reported an error");
            Err(ClientError::Stream(detail.to_string()))
        }
        EventKind::Done => {
            debug!(message_index = ?event.message_index(), chars = text.chars().count(), "stream done");
            Ok(Progress::Finished)
        }
        kind => {
            trace!(%kind, "ignoring event");
            Ok(Progress::Ignored)
        }
    }
}

async fn next_event<S>(
    events: &mut S,
    idle_timeout: Option<Duration>,
) -> Result<Option<StreamEvent>, ClientError>
where
    S: Stream<Item = Result<StreamEvent, ClientError>> + Unpin,
{
    let next = match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, events.next())
            .await
            .map_err(|_| ClientError::Timeout(limit))?,
        None => events.next().await,
    };
    next.transpose()
}

/// Drive an event stream to completion and return the accumulated text.
///
/// Every `token` event's `content` is appended in arrival order and
/// `on_update` receives the text so far, either after each token or
/// coalesced per frame as configured in `options`. Coalesced updates are
/// flushed before a successful return, so the last call always carries the
/// complete text.
///
/// An `error` event stops consumption at once with [`ClientError::Stream`];
/// a pending coalesced update is discarded, never delivered. A `done` event or
/// the end of the stream finishes normally.
///
/// Dropping the returned future drops the stream and any pending update; no
/// callback runs afterwards.
///
/// # Example
/// ```
/// use empathy_practice::options::StreamOptions;
/// use empathy_practice::sse::{chunks_of, event_stream};
/// use empathy_practice::stream::consume;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), empathy_practice::ClientError> {
/// let body = chunks_of(vec![
///     "event: token\ndata: {\"content\":\"I'm \"}\n\n",
///     "event: token\ndata: {\"content\":\"here.\"}\n\nevent: done\ndata: {}\n\n",
/// ]);
///
/// let mut seen = Vec::new();
/// let text = consume(event_stream(body), &StreamOptions::default(), |text| {
///     seen.push(text.to_string())
/// })
/// .await?;
///
/// assert_eq!(text, "I'm here.");
/// assert_eq!(seen, vec!["I'm ", "I'm here."]);
/// # Ok(())
/// # }
/// ```
pub async fn consume<S, F>(
    events: S,
    options: &StreamOptions,
    mut on_update: F,
) -> Result<String, ClientError>
where
    S: Stream<Item = Result<StreamEvent, ClientError>>,
    F: FnMut(&str),
{
    let mut events = Box::pin(events);
    let mut text = String::new();

    match options.update {
        UpdateMode::EveryToken => {
            while let Some(event) = next_event(&mut events, options.idle_timeout).await? {
                match apply(&mut text, event)? {
                    Progress::Appended => on_update(&text),
                    Progress::Ignored => {}
                    Progress::Finished => break,
                }
            }
        }
        UpdateMode::Coalesced { frame } => {
            let mut pending = Coalescer::<String>::new();
            let mut ticker = tokio::time::interval(frame);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    _ = ticker.tick(), if pending.is_pending() => {
                        if let Some(latest) = pending.take() {
                            on_update(&latest);
                        }
                    }
                    next = next_event(&mut events, options.idle_timeout) => {
                        let progress = match next {
                            Ok(Some(event)) => apply(&mut text, event),
                            Ok(None) => Ok(Progress::Finished),
                            Err(e) => Err(e),
                        };
                        match progress {
                            Ok(Progress::Appended) => pending.push(text.clone()),
                            Ok(Progress::Ignored) => {}
                            Ok(Progress::Finished) => break,
                            Err(e) => {
                                pending.cancel();
                                return Err(e);
                            }
                        }
                    }
                }
            }

            if let Some(latest) = pending.take() {
                on_update(&latest);
            }
        }
    }

    Ok(text)
}
