use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use url::Url;
use crate::command::clip::parse_clip;
use crate::playback::Clip;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Skip,
    Die,
    Pause,
    Resume,
    List,
    Help,
}

impl Verb {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "skip" => Some(Verb::Skip),
            "die" | "sudoku" => Some(Verb::Die),
            "pause" => Some(Verb::Pause),
            "resume" => Some(Verb::Resume),
            "list" | "queue" => Some(Verb::List),
            "help" => Some(Verb::Help),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Verb::Skip => "skip",
            Verb::Die => "die",
            Verb::Pause => "pause",
            Verb::Resume => "resume",
            Verb::List => "list",
            Verb::Help => "help",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Verb(Verb),
    Play { url: Url, clip: Clip },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid url '{0}'")]
    InvalidUrl(String),
}

static SCHEME_REGEX: LazyLock<Regex> = LazyLock::new(|| {Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://").unwrap() });

/// Matches `!<trigger> ...` or `/<trigger> ...`.
#[derive(Debug, Clone)]
pub struct Trigger {
    word: String,
    regex: Regex,
}

impl Trigger {
    pub fn new(word: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!(r"^(?:!|/){} (.+)$", regex::escape(word)))?;
        Ok(Self { word: word.to_owned(), regex })
    }

    pub fn word(&self) -> &str {
        &self.word
    }

    /// `None` when the text is not addressed to us at all.
    pub fn parse(&self, text: &str) -> Option<Result<Command, ParseError>> {
        let body = self.regex.captures(text)?.get(1)?.as_str();
        let mut tokens = body.split_whitespace();
        let first = tokens.next()?;

        if let Some(verb) = Verb::from_token(first) {
            return Some(Ok(Command::Verb(verb)));
        }

        let rest = tokens.collect::<Vec<_>>().join(" ");
        Some(parse_url(first).map(|url| Command::Play { url, clip: parse_clip(&rest) }))
    }
}

/// Path as typed, before the url crate normalises an empty path to `/`.
fn raw_path(candidate: &str) -> &str {
    let rest = SCHEME_REGEX.find(candidate).map_or(candidate, |m| &candidate[m.end()..]);
    let after_authority = rest.find(['/', '?', '#']).map_or("", |i| &rest[i..]);
    let end = after_authority.find(['?', '#']).unwrap_or(after_authority.len());
    &after_authority[..end]
}

/// Accepts a link with a host and a path, assuming https when no scheme is given.
pub fn parse_url(candidate: &str) -> Result<Url, ParseError> {
    let invalid = || ParseError::InvalidUrl(candidate.to_owned());

    let with_scheme = if SCHEME_REGEX.is_match(candidate) {
        candidate.to_owned()
    } else if let Some(rest) = candidate.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        format!("https://{candidate}")
    };

    let url = Url::parse(&with_scheme).map_err(|_| invalid())?;
    let path = raw_path(&with_scheme);

    let has_host = url.host_str().is_some_and(|h| !h.is_empty());
    let has_path = !path.is_empty();

    if has_host && has_path {
        Ok(url)
    } else {
        Err(invalid())
    }
}
