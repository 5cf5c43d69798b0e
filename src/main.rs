use anyhow::Context;
use clap::Parser;
use jukebox_rs::cli::{Cli, Commands};
use jukebox_rs::command::dispatcher::{AuthPolicy, CommandDispatcher};
use jukebox_rs::command::Trigger;
use jukebox_rs::config::{load_config, AppConfig};
use jukebox_rs::handler::{self, event_handler};
use jukebox_rs::localization::replies::Replies;
use jukebox_rs::playback::driver::{SongbirdTransport, Transport};
use jukebox_rs::playback::scheduler::Scheduler;
use jukebox_rs::playback::titles::TitleLookup;
use jukebox_rs::supervisor::TaskSupervisor;
use poise::serenity_prelude as serenity;
use poise::serenity_prelude::{GatewayIntents, GuildId, Http};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const RESTART_DELAY: Duration = Duration::from_secs(5);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => check(&config),
        Commands::Run { config } => run(&config).await,
    }
}

fn load(path: &str) -> anyhow::Result<AppConfig> {
    let config = load_config(path)
        .with_context(|| format!("Failed to load {}", path))?;

    config.verify()?;

    Ok(config)
}

fn check(path: &str) -> anyhow::Result<()> {
    let config = load(path)?;
    Replies::load(&config.bot.locale).context("Failed to load reply texts")?;

    println!("{} is valid", path);
    println!("  trigger:       !{} / /{}", config.bot.trigger, config.bot.trigger);
    println!("  server:        {}", config.bot.server);
    println!("  voice channel: {}", config.bot.voice_channel);
    println!("  locale:        {}", config.bot.locale);
    match config.queue.capacity {
        0 => println!("  queue:         unbounded"),
        n => println!("  queue:         {} slots", n),
    }
    match config.cache.capacity() {
        Some(capacity) => println!("  title cache:   {} entries", capacity),
        None => println!("  title cache:   disabled"),
    }

    Ok(())
}

async fn run(path: &str) -> anyhow::Result<()> {
    info!("Starting jukebox");

    let config = load(path)?;

    info!("Loaded config");

    let replies = Arc::new(Replies::load(&config.bot.locale).context("Failed to load reply texts")?);

    let http = Arc::new(Http::new(&config.bot.token));
    let songbird = Songbird::serenity();

    let transport: Arc<dyn Transport> = Arc::new(SongbirdTransport::new(
        songbird.clone(),
        http,
        GuildId::new(config.bot.server),
        config.bot.voice_channel.clone(),
    ));

    let (scheduler, scheduler_handle) = Scheduler::new(
        transport.clone(),
        replies.clone(),
        config.queue.capacity,
        config.queue.scheduler(),
    );
    let scheduler_task = tokio::spawn(scheduler.run());

    let (supervisor, supervisor_handle) = TaskSupervisor::new(config.supervisor.capacity, config.supervisor.concurrency);
    let supervisor_task = tokio::spawn(supervisor.run());

    let dispatcher = Arc::new(CommandDispatcher::new(
        Trigger::new(&config.bot.trigger).context("Invalid trigger")?,
        config.bot.server,
        AuthPolicy { admin: config.auth.admin, op_role: config.auth.op_role.clone() },
        scheduler_handle.clone(),
        supervisor_handle,
        transport.clone(),
        replies,
        Arc::new(TitleLookup::new(transport, config.cache.capacity())),
    ));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = run_client(&config.bot.token, songbird.clone(), dispatcher.clone()) => {
                match result {
                    Ok(()) => warn!("Chat client exited, restarting in {:?}", RESTART_DELAY),
                    Err(err) => error!("Chat client failed: {:#}, restarting in {:?}", err, RESTART_DELAY),
                }

                tokio::select! {
                    _ = sleep(RESTART_DELAY) => {}
                    _ = &mut ctrl_c => break,
                }
            }
            _ = &mut ctrl_c => break,
        }
    }

    info!("Shutting down");

    scheduler_handle.shutdown();
    // last sender gone closes the supervisor backlog
    drop(dispatcher);

    if timeout(SHUTDOWN_GRACE, scheduler_task).await.is_err() {
        warn!("Scheduler did not stop within {:?}", SHUTDOWN_GRACE);
    }
    if timeout(SHUTDOWN_GRACE, supervisor_task).await.is_err() {
        warn!("Pending tasks did not finish within {:?}", SHUTDOWN_GRACE);
    }

    Ok(())
}

async fn run_client(token: &str, songbird: Arc<Songbird>, dispatcher: Arc<CommandDispatcher>) -> anyhow::Result<()> {
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |_ctx, _ready, _framework| {
            Box::pin(async move {
                Ok(handler::Data { dispatcher })
            })
        })
        .build();

    let intents = GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT;
    let mut client = serenity::ClientBuilder::new(token, intents)
        .register_songbird_with(songbird)
        .framework(framework).await?;

    client.start().await?;

    Ok(())
}
