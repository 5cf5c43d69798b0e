use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use crate::command::{Command, Trigger, Verb};
use crate::localization::replies::{Replies, Reply};
use crate::playback::driver::Transport;
use crate::playback::scheduler::SchedulerHandle;
use crate::playback::session::format_duration;
use crate::playback::titles::TitleLookup;
use crate::playback::{QueueError, ReplyTo, Request};
use crate::supervisor::{SubmitError, SupervisorHandle};

/// Who sent a message, as far as authorization is concerned.
#[derive(Debug, Clone, Default)]
pub struct Author {
    pub id: u64,
    pub name: String,
    pub roles: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct Incoming {
    pub text: String,
    pub author: Author,
    /// `None` for private messages.
    pub guild: Option<u64>,
    pub reply_to: ReplyTo,
    /// Title of the link preview attached to the message, if any.
    pub embed_title: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthPolicy {
    pub admin: u64,
    pub op_role: String,
}

impl AuthPolicy {
    pub fn allows(&self, author: &Author) -> bool {
        author.id == self.admin || author.roles.contains(&self.op_role)
    }
}

/// What the dispatcher decided to do with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ignored,
    Unauthorized(Verb),
    SyntaxError,
    Submitted(Action),
    Dropped(SubmitError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Enqueue,
    Run(Verb),
}

/// Shared pieces every dispatched job needs; cheap to clone into a task.
#[derive(Clone)]
struct Services {
    scheduler: SchedulerHandle,
    transport: Arc<dyn Transport>,
    replies: Arc<Replies>,
    titles: Arc<TitleLookup>,
    trigger: String,
}

impl Services {
    async fn reply(&self, reply_to: ReplyTo, reply: Reply<'_>) -> anyhow::Result<()> {
        let text = self.replies.text(reply);
        self.transport.send_reply(reply_to, &text).await?;
        Ok(())
    }

    async fn enqueue(&self, request: Request) -> anyhow::Result<()> {
        if let Err(err) = self.scheduler.ensure_connected().await {
            tracing::warn!("Not queueing {}: {}", request.url, err);
            return self.reply(request.reply_to, Reply::VoiceUnavailable).await;
        }

        let reply_to = request.reply_to;
        let url = request.url.to_string();
        match self.scheduler.enqueue(request) {
            Ok(()) => {
                tracing::debug!("Queued {}", url);
                Ok(())
            }
            Err(QueueError::Full(capacity)) => {
                tracing::info!("Queue full ({} slots), rejecting {}", capacity, url);
                self.reply(reply_to, Reply::QueueFull).await
            }
        }
    }

    async fn run(&self, verb: Verb, reply_to: ReplyTo) -> anyhow::Result<()> {
        match verb {
            Verb::Pause => {
                self.scheduler.pause().await?;
            }
            Verb::Resume => {
                self.scheduler.resume().await?;
            }
            Verb::Skip => {
                self.scheduler.skip().await?;
            }
            Verb::Die => {
                self.scheduler.stop_and_clear().await?;
            }
            Verb::List => {
                let listing = self.listing().await;
                self.transport.send_reply(reply_to, &listing).await?;
            }
            Verb::Help => {
                self.reply(reply_to, Reply::Help { trigger: &self.trigger }).await?;
            }
        }
        Ok(())
    }

    /// Current session, then one line per pending request, then free slots.
    async fn listing(&self) -> String {
        let mut text = String::new();

        if let Some(now) = self.scheduler.now_playing().await {
            let _ = write!(text, "**{}**: {} ({}", now.status, now.title, format_duration(now.elapsed));
            if let Some(duration) = now.duration {
                let _ = write!(text, " / {}", format_duration(duration));
            }
            text.push_str(")\n\n");
        }

        for request in self.scheduler.pending() {
            let title = match self.titles.title(&request).await {
                Some(title) => title,
                None => self.replies.text(Reply::UnknownTitle),
            };
            let _ = writeln!(text, "{}", title);
        }

        if text.trim().is_empty() {
            text = self.replies.text(Reply::QueueEmpty);
            text.push('\n');
        }

        if let Some(remaining) = self.scheduler.remaining_slots() {
            text.push_str(&self.replies.text(Reply::SlotsRemaining(remaining)));
        }

        text.trim().to_owned()
    }
}

/// Turns chat messages into queue or playback operations. All real work is
/// handed to the supervisor so the message loop never waits on it.
pub struct CommandDispatcher {
    trigger: Trigger,
    server: u64,
    auth: AuthPolicy,
    supervisor: SupervisorHandle,
    services: Services,
}

impl CommandDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trigger: Trigger,
        server: u64,
        auth: AuthPolicy,
        scheduler: SchedulerHandle,
        supervisor: SupervisorHandle,
        transport: Arc<dyn Transport>,
        replies: Arc<Replies>,
        titles: Arc<TitleLookup>,
    ) -> Self {
        let services = Services {
            scheduler,
            transport,
            replies,
            titles,
            trigger: trigger.word().to_owned(),
        };

        Self { trigger, server, auth, supervisor, services }
    }

    pub fn dispatch(&self, message: Incoming) -> Outcome {
        if message.guild != Some(self.server) {
            tracing::debug!("Ignoring message from {:?}", message.guild);
            return Outcome::Ignored;
        }

        let command = match self.trigger.parse(&message.text) {
            None => return Outcome::Ignored,
            Some(Ok(command)) => command,
            Some(Err(err)) => {
                tracing::info!("Syntax error from {}: {}", message.author.name, err);
                self.submit("reply syntax-error", message.reply_to, Reply::SyntaxError);
                return Outcome::SyntaxError;
            }
        };

        match command {
            Command::Verb(verb) => {
                if !self.auth.allows(&message.author) {
                    tracing::info!("Unauthorized command '{}' from {} ({})", verb.name(), message.author.name, message.author.id);
                    self.submit("reply unauthorized", message.reply_to, Reply::Unauthorized);
                    return Outcome::Unauthorized(verb);
                }

                tracing::info!("Running command '{}' for {}", verb.name(), message.author.name);
                let services = self.services.clone();
                let reply_to = message.reply_to;
                self.outcome(
                    Action::Run(verb),
                    self.supervisor.submit(verb.name(), async move { services.run(verb, reply_to).await }),
                )
            }
            Command::Play { url, clip } => {
                tracing::debug!("Request for {} from {}", url, message.author.name);
                let request = Request::new(url, message.reply_to, message.author.name)
                    .with_title_hint(message.embed_title)
                    .with_clip(clip);

                let services = self.services.clone();
                self.outcome(
                    Action::Enqueue,
                    self.supervisor.submit("enqueue", async move { services.enqueue(request).await }),
                )
            }
        }
    }

    fn outcome(&self, action: Action, submitted: Result<(), SubmitError>) -> Outcome {
        match submitted {
            Ok(()) => Outcome::Submitted(action),
            Err(err) => {
                tracing::warn!("Dropping {:?}: {}", action, err);
                Outcome::Dropped(err)
            }
        }
    }

    fn submit(&self, name: &'static str, reply_to: ReplyTo, reply: Reply<'static>) {
        let services = self.services.clone();
        if let Err(err) = self.supervisor.submit(name, async move { services.reply(reply_to, reply).await }) {
            tracing::warn!("Dropping {}: {}", name, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use tokio::time::sleep;
    use super::*;
    use crate::playback::scheduler::{Scheduler, SchedulerConfig, SchedulerState};
    use crate::playback::test_utils::MockTransport;
    use crate::supervisor::TaskSupervisor;

    const SERVER: u64 = 10;
    const ADMIN: u64 = 42;

    struct TestContext {
        transport: Arc<MockTransport>,
        scheduler: SchedulerHandle,
        dispatcher: CommandDispatcher,
    }

    impl TestContext {
        fn new(capacity: usize) -> Self {
            let transport = Arc::new(MockTransport::new());
            let replies = Arc::new(Replies::load("en").unwrap());

            let (scheduler, handle) = Scheduler::new(transport.clone(), replies.clone(), capacity, SchedulerConfig::default());
            tokio::spawn(scheduler.run());

            let (supervisor, supervisor_handle) = TaskSupervisor::new(16, 4);
            tokio::spawn(supervisor.run());

            let titles = Arc::new(TitleLookup::new(transport.clone(), Some(16)));
            let dispatcher = CommandDispatcher::new(
                Trigger::new("yt").unwrap(),
                SERVER,
                AuthPolicy { admin: ADMIN, op_role: "dj".into() },
                handle.clone(),
                supervisor_handle,
                transport.clone(),
                replies,
                titles,
            );

            Self { transport, scheduler: handle, dispatcher }
        }

        fn send(&self, author: Author, text: &str) -> Outcome {
            self.dispatcher.dispatch(Incoming {
                text: text.to_owned(),
                author,
                guild: Some(SERVER),
                reply_to: ReplyTo(7),
                embed_title: None,
            })
        }

        fn admin(&self, text: &str) -> Outcome {
            self.send(Author { id: ADMIN, name: "admin".into(), roles: HashSet::new() }, text)
        }

        fn user(&self, text: &str) -> Outcome {
            self.send(Author { id: 1, name: "user".into(), roles: HashSet::new() }, text)
        }

        async fn settle(&self) {
            sleep(Duration::from_secs(2)).await;
        }

        async fn last_reply(&self) -> Option<String> {
            self.transport.replies().await.last().map(|(_, text)| text.clone())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ignores_other_servers_private_messages_and_chatter() {
        let ctx = TestContext::new(2);

        let mut message = Incoming {
            text: "!yt skip".into(),
            author: Author { id: ADMIN, ..Default::default() },
            guild: Some(SERVER + 1),
            reply_to: ReplyTo(7),
            embed_title: None,
        };
        assert_eq!(ctx.dispatcher.dispatch(message.clone()), Outcome::Ignored);

        message.guild = None;
        assert_eq!(ctx.dispatcher.dispatch(message), Outcome::Ignored);

        assert_eq!(ctx.admin("just talking"), Outcome::Ignored);
        ctx.settle().await;
        assert!(ctx.transport.replies().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn verbs_require_admin_or_op_role() {
        let ctx = TestContext::new(2);

        assert_eq!(ctx.user("!yt skip"), Outcome::Unauthorized(Verb::Skip));
        ctx.settle().await;
        assert_eq!(ctx.last_reply().await.as_deref(), Some("you're not allowed to do that."));

        let op = Author { id: 2, name: "op".into(), roles: HashSet::from(["dj".to_owned()]) };
        assert_eq!(ctx.send(op, "!yt skip"), Outcome::Submitted(Action::Run(Verb::Skip)));
        assert_eq!(ctx.admin("!yt skip"), Outcome::Submitted(Action::Run(Verb::Skip)));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_url_gets_syntax_reply() {
        let ctx = TestContext::new(2);

        assert_eq!(ctx.user("!yt nonsense"), Outcome::SyntaxError);
        ctx.settle().await;
        assert_eq!(ctx.last_reply().await.as_deref(), Some("format your commands right."));
        assert!(ctx.scheduler.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_without_session_touches_nothing() {
        let ctx = TestContext::new(2);

        assert_eq!(ctx.admin("!yt pause"), Outcome::Submitted(Action::Run(Verb::Pause)));
        ctx.settle().await;

        assert!(ctx.transport.replies().await.is_empty());
        assert!(ctx.transport.started_titles().await.is_empty());
        assert_eq!(ctx.transport.connects.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_and_dead_voice_are_reported() {
        let ctx = TestContext::new(1);
        // keep the scheduler busy so the queue fills up
        assert_eq!(ctx.user("!yt https://example.com/first"), Outcome::Submitted(Action::Enqueue));
        ctx.settle().await;
        assert_eq!(ctx.scheduler.state(), SchedulerState::Playing);

        ctx.user("!yt https://example.com/second");
        ctx.settle().await;
        assert_eq!(ctx.scheduler.pending().len(), 1);

        ctx.user("!yt https://example.com/third");
        ctx.settle().await;
        assert_eq!(ctx.last_reply().await.as_deref(), Some("wait for the other videos, the queue is full."));
        assert_eq!(ctx.scheduler.pending().len(), 1);

        ctx.admin("!yt die");
        ctx.settle().await;
        ctx.transport.disconnect().await.unwrap();
        ctx.transport.refuse_connections(true);

        ctx.user("!yt https://example.com/fourth");
        ctx.settle().await;
        assert_eq!(ctx.last_reply().await.as_deref(), Some("voice isn't working right now."));
        assert!(ctx.scheduler.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn list_reports_session_queue_and_slots() {
        let ctx = TestContext::new(3);
        ctx.transport.set_duration("https://example.com/A", Duration::from_secs(200));

        ctx.user("!yt https://example.com/A");
        ctx.settle().await;
        ctx.user("!yt https://example.com/B");
        ctx.send(
            Author { id: 3, name: "linker".into(), roles: HashSet::new() },
            "!yt https://example.com/C",
        );
        ctx.transport.break_url("https://example.com/D");
        ctx.user("!yt https://example.com/D");
        ctx.settle().await;

        ctx.admin("!yt list");
        ctx.settle().await;

        let listing = ctx.last_reply().await.unwrap();
        let lines: Vec<&str> = listing.lines().collect();
        assert!(lines[0].starts_with("**playing**: A ("), "{listing}");
        assert!(lines[0].ends_with(" / 3:20)"), "{listing}");
        assert_eq!(&lines[2..], ["B", "C", "(Unknown)", "0 slots remaining in the queue."]);
    }

    #[tokio::test(start_paused = true)]
    async fn list_after_die_is_empty() {
        let ctx = TestContext::new(2);
        ctx.user("!yt https://example.com/A");
        ctx.settle().await;
        ctx.user("!yt https://example.com/B");
        ctx.settle().await;

        ctx.admin("!yt die");
        ctx.settle().await;
        ctx.admin("!yt list");
        ctx.settle().await;

        assert_eq!(
            ctx.last_reply().await.as_deref(),
            Some("Queue empty\n2 slots remaining in the queue.")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn embed_title_is_used_in_listing() {
        let ctx = TestContext::new(0);
        ctx.user("!yt https://example.com/A");
        ctx.settle().await;

        ctx.dispatcher.dispatch(Incoming {
            text: "!yt https://example.com/B".into(),
            author: Author { id: 1, name: "user".into(), roles: HashSet::new() },
            guild: Some(SERVER),
            reply_to: ReplyTo(7),
            embed_title: Some("Preview title".into()),
        });
        ctx.settle().await;

        ctx.admin("!yt list");
        ctx.settle().await;
        let listing = ctx.last_reply().await.unwrap();
        assert!(listing.ends_with("Preview title"), "{listing}");
    }

    #[tokio::test(start_paused = true)]
    async fn help_mentions_trigger() {
        let ctx = TestContext::new(0);
        ctx.admin("!yt help");
        ctx.settle().await;
        assert!(ctx.last_reply().await.unwrap().starts_with("Usage: !yt <url>"));
    }
}
