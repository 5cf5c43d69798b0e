use fluent::FluentArgs;
use crate::localization::{Error, Locales};
use include_dir::{include_dir, Dir};

const LOCALES: Dir = include_dir!("$CARGO_MANIFEST_DIR/locales/replies");

/// Every fixed message the bot can send to chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply<'a> {
    Unauthorized,
    SyntaxError,
    QueueFull,
    VoiceUnavailable,
    Unresolvable,
    QueueEmpty,
    UnknownTitle,
    SlotsRemaining(usize),
    Help { trigger: &'a str },
}

impl Reply<'_> {
    fn id(&self) -> &'static str {
        match self {
            Reply::Unauthorized => "unauthorized",
            Reply::SyntaxError => "syntax-error",
            Reply::QueueFull => "queue-full",
            Reply::VoiceUnavailable => "voice-unavailable",
            Reply::Unresolvable => "unresolvable",
            Reply::QueueEmpty => "queue-empty",
            Reply::UnknownTitle => "unknown-title",
            Reply::SlotsRemaining(_) => "slots-remaining",
            Reply::Help { .. } => "help",
        }
    }

    fn args(&self) -> Option<FluentArgs<'_>> {
        match self {
            Reply::SlotsRemaining(count) => {
                let mut args = FluentArgs::new();
                args.set("count", *count);
                Some(args)
            }
            Reply::Help { trigger } => {
                let mut args = FluentArgs::new();
                args.set("trigger", *trigger);
                Some(args)
            }
            _ => None,
        }
    }
}

/// Fixed replies rendered in the configured locale.
pub struct Replies {
    locales: Locales,
    locale: String,
}

impl Replies {
    pub fn new(locales: Locales, locale: impl Into<String>) -> Self {
        Self { locales, locale: locale.into() }
    }

    /// Bundled locales with English as the last resort.
    pub fn load(locale: &str) -> Result<Self, Error> {
        Ok(Self::new(Locales::from_dir(&LOCALES, "en")?, locale))
    }

    pub fn text(&self, reply: Reply<'_>) -> String {
        let args = reply.args();
        self.locales.resolve(&self.locale, reply.id(), args.as_ref())
            .unwrap_or_else(|err| {
                tracing::error!("Missing reply text: {}", err);
                reply.id().to_owned()
            })
    }
}
