use std::fmt::{Display, Formatter};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub mod driver;
pub mod queue;
pub mod scheduler;
pub mod session;
pub mod titles;

/// Opaque pointer back to where a request came from; replies go there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplyTo(pub u64);

impl Display for ReplyTo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Portion of a stream to play. `end` is measured from the start of the media.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Clip {
    pub start: Option<Duration>,
    pub end: Option<Duration>,
}

impl Clip {
    /// How long the clip runs once started, if it is bounded at all.
    pub fn length(&self) -> Option<Duration> {
        let end = self.end?;
        Some(end.saturating_sub(self.start.unwrap_or_default()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: Url,
    pub reply_to: ReplyTo,
    pub requester: String,
    pub title_hint: Option<String>,
    pub clip: Clip,
}

impl Request {
    pub fn new(url: Url, reply_to: ReplyTo, requester: impl Into<String>) -> Self {
        Self {
            url,
            reply_to,
            requester: requester.into(),
            title_hint: None,
            clip: Clip::default(),
        }
    }

    pub fn with_title_hint(mut self, title: Option<String>) -> Self {
        self.title_hint = title.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn with_clip(mut self, clip: Clip) -> Self {
        self.clip = clip;
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full ({0} slots)")]
    Full(usize),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("voice transport unavailable: {0}")]
    Unavailable(anyhow::Error),
    #[error("playback control failed: {0}")]
    Control(anyhow::Error),
    #[error("failed to send reply: {0}")]
    Reply(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("media at {url} could not be resolved: {source}")]
    Unresolvable { url: String, source: anyhow::Error },
}
