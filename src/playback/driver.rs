use crate::playback::{ReplyTo, ResolveError, TransportError};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use poise::serenity_prelude::{ChannelId, ChannelType, GuildId, Http};
use songbird::input::{Compose, Input, YoutubeDl};
use songbird::tracks::{PlayMode, TrackHandle};
use songbird::{Call, Songbird};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    pub title: String,
    pub duration: Option<Duration>,
}

pub struct ResolvedMedia {
    pub info: MediaInfo,
    pub handle: Box<dyn PlaybackHandle>,
}

/// A resolved stream that has not necessarily started yet.
#[async_trait]
pub trait PlaybackHandle: Send + Sync {
    async fn start(&self, from: Option<Duration>) -> Result<(), TransportError>;

    async fn pause(&self) -> Result<(), TransportError>;

    async fn resume(&self) -> Result<(), TransportError>;

    async fn stop(&self) -> Result<(), TransportError>;

    async fn is_done(&self) -> bool;
}

/// Everything the playback core needs from the outside world: the voice
/// connection, media resolution and the chat channel for replies.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn is_connected(&self) -> bool;

    /// Joins the configured voice destination. Calling it while connected is a no-op.
    async fn connect(&self) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Metadata only; used for listing pending requests.
    async fn describe(&self, url: &Url) -> Result<MediaInfo, ResolveError>;

    async fn resolve(&self, url: &Url) -> Result<ResolvedMedia, ResolveError>;

    async fn send_reply(&self, reply_to: ReplyTo, text: &str) -> Result<(), TransportError>;
}

/// Connects the core to Discord: songbird for voice, yt-dlp for media and the
/// serenity HTTP client for replies.
pub struct SongbirdTransport {
    songbird: Arc<Songbird>,
    http: Arc<Http>,
    http_client: reqwest::Client,
    guild_id: GuildId,
    voice_channel: String,
    voice_channel_id: Mutex<Option<ChannelId>>,
}

impl SongbirdTransport {
    pub fn new(songbird: Arc<Songbird>, http: Arc<Http>, guild_id: GuildId, voice_channel: String) -> Self {
        Self {
            songbird,
            http,
            http_client: reqwest::Client::new(),
            guild_id,
            voice_channel,
            voice_channel_id: Mutex::new(None),
        }
    }

    async fn voice_channel_id(&self) -> anyhow::Result<ChannelId> {
        let mut cached = self.voice_channel_id.lock().await;
        if let Some(id) = *cached {
            return Ok(id);
        }

        let channels = self.guild_id.channels(&self.http).await
            .context("failed to list guild channels")?;

        let id = channels.values()
            .find(|c| c.kind == ChannelType::Voice && c.name == self.voice_channel)
            .map(|c| c.id)
            .ok_or_else(|| anyhow!("no voice channel named '{}'", self.voice_channel))?;

        tracing::debug!("Resolved voice channel '{}' to {}", self.voice_channel, id);
        *cached = Some(id);
        Ok(id)
    }

    fn call(&self) -> Result<Arc<Mutex<Call>>, TransportError> {
        self.songbird.get(self.guild_id)
            .ok_or_else(|| TransportError::Unavailable(anyhow!("not connected to voice")))
    }

    fn youtube_dl(&self, url: &Url) -> YoutubeDl {
        YoutubeDl::new(self.http_client.clone(), url.to_string())
    }
}

fn unresolvable(url: &Url, source: impl Into<anyhow::Error>) -> ResolveError {
    ResolveError::Unresolvable { url: url.to_string(), source: source.into() }
}

#[async_trait]
impl Transport for SongbirdTransport {
    async fn is_connected(&self) -> bool {
        match self.songbird.get(self.guild_id) {
            Some(call) => call.lock().await.current_connection().is_some(),
            None => false,
        }
    }

    async fn connect(&self) -> Result<(), TransportError> {
        if self.is_connected().await {
            return Ok(());
        }

        let channel_id = self.voice_channel_id().await
            .map_err(TransportError::Unavailable)?;

        self.songbird.join(self.guild_id, channel_id).await
            .map_err(|e| TransportError::Unavailable(e.into()))?;

        tracing::info!("Joined voice channel {} in guild {}", channel_id, self.guild_id);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.songbird.get(self.guild_id).is_none() {
            return Ok(());
        }

        self.songbird.remove(self.guild_id).await
            .map_err(|e| TransportError::Unavailable(e.into()))?;

        tracing::info!("Left voice in guild {}", self.guild_id);
        Ok(())
    }

    async fn describe(&self, url: &Url) -> Result<MediaInfo, ResolveError> {
        let mut source = self.youtube_dl(url);
        let metadata = source.aux_metadata().await
            .map_err(|e| unresolvable(url, anyhow!("{e}")))?;

        Ok(MediaInfo {
            title: metadata.title.unwrap_or_else(|| url.to_string()),
            duration: metadata.duration,
        })
    }

    async fn resolve(&self, url: &Url) -> Result<ResolvedMedia, ResolveError> {
        let mut source = self.youtube_dl(url);
        let metadata = source.aux_metadata().await
            .map_err(|e| unresolvable(url, anyhow!("{e}")))?;

        let call = self.call().map_err(|e| unresolvable(url, e))?;

        Ok(ResolvedMedia {
            info: MediaInfo {
                title: metadata.title.unwrap_or_else(|| url.to_string()),
                duration: metadata.duration,
            },
            handle: Box::new(SongbirdTrack {
                call,
                input: Mutex::new(Some(source.into())),
                track: Mutex::new(None),
            }),
        })
    }

    async fn send_reply(&self, reply_to: ReplyTo, text: &str) -> Result<(), TransportError> {
        ChannelId::new(reply_to.0).say(&self.http, text).await
            .map_err(|e| TransportError::Reply(e.into()))?;
        Ok(())
    }
}

struct SongbirdTrack {
    call: Arc<Mutex<Call>>,
    input: Mutex<Option<Input>>,
    track: Mutex<Option<TrackHandle>>,
}

impl SongbirdTrack {
    async fn with_track<F>(&self, action: F) -> Result<(), TransportError>
    where
        F: FnOnce(&TrackHandle) -> songbird::tracks::TrackResult<()>,
    {
        let track = self.track.lock().await;
        let track = track.as_ref()
            .ok_or_else(|| TransportError::Control(anyhow!("track was never started")))?;
        action(track).map_err(|e| TransportError::Control(e.into()))
    }
}

#[async_trait]
impl PlaybackHandle for SongbirdTrack {
    async fn start(&self, from: Option<Duration>) -> Result<(), TransportError> {
        let input = self.input.lock().await.take()
            .ok_or_else(|| TransportError::Control(anyhow!("track already started")))?;

        let handle = self.call.lock().await.play_input(input);
        *self.track.lock().await = Some(handle.clone());

        if let Some(position) = from {
            let reached = handle.seek_async(position).await
                .map_err(|e| TransportError::Control(anyhow!("failed to seek to {:?}: {}", position, e)))?;
            tracing::debug!("Started at {:?}", reached);
        }

        Ok(())
    }

    async fn pause(&self) -> Result<(), TransportError> {
        self.with_track(|t| t.pause()).await
    }

    async fn resume(&self) -> Result<(), TransportError> {
        self.with_track(|t| t.play()).await
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.with_track(|t| t.stop()).await
    }

    async fn is_done(&self) -> bool {
        let track = self.track.lock().await.clone();
        let Some(track) = track else {
            return false;
        };

        match track.get_info().await {
            Ok(state) => matches!(state.playing, PlayMode::End | PlayMode::Stop | PlayMode::Errored(_)),
            // the driver drops finished tracks, after which the handle is finalised
            Err(_) => true,
        }
    }
}
