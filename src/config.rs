use std::time::Duration;
use anyhow::anyhow;
use config::{Config, Environment};
use serde::Deserialize;
use crate::playback::scheduler::SchedulerConfig;

/// `JUKEBOX_<SECTION>__<KEY>`, e.g. `JUKEBOX_BOT__VOICE_CHANNEL`. Keys keep
/// their own underscores.
fn environment() -> Environment {
    Environment::with_prefix("JUKEBOX")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

pub fn load_config(path: &str) -> anyhow::Result<AppConfig> {
    let config = Config::builder()
        .add_source(config::File::with_name(path))
        .add_source(environment())
        .build()?;

    config.try_deserialize()
        .map_err(|e| anyhow!(e))
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bot: BotConfig,

    pub auth: AuthConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

impl AppConfig {
    pub fn verify(&self) -> anyhow::Result<()> {
        if self.bot.token.is_empty() {
            return Err(anyhow!("bot token is empty"))
        }

        if self.bot.trigger.trim().is_empty() || self.bot.trigger.contains(char::is_whitespace) {
            return Err(anyhow!("trigger must be a single word, got '{}'", self.bot.trigger))
        }

        if self.bot.voice_channel.is_empty() {
            return Err(anyhow!("voice channel name is empty"))
        }

        if self.queue.poll_interval_ms == 0 {
            return Err(anyhow!("poll interval must be positive"))
        }

        if self.queue.connect_attempts == 0 {
            return Err(anyhow!("at least one connection attempt is required"))
        }

        if let CacheConfig::InMemory(InMemoryCacheConfig { capacity: 0 }) = self.cache {
            return Err(anyhow!("in-memory cache needs a positive capacity; use type = \"disabled\" instead"))
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub token: String,
    #[serde(default = "default_trigger")]
    pub trigger: String,
    pub server: u64,
    pub voice_channel: String,
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_trigger() -> String { String::from("yt") }

fn default_locale() -> String { String::from("en") }

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub admin: u64,
    pub op_role: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// 0 means unbounded.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default)]
    pub leave_when_idle: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            poll_interval_ms: default_poll_interval(),
            connect_attempts: default_connect_attempts(),
            leave_when_idle: false,
        }
    }
}

impl QueueConfig {
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            connect_attempts: self.connect_attempts,
            leave_when_idle: self.leave_when_idle,
        }
    }
}

fn default_capacity() -> usize { 5 }

fn default_poll_interval() -> u64 { 500 }

fn default_connect_attempts() -> u32 { 3 }

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "type")]
pub enum CacheConfig {
    #[default]
    #[serde(rename = "disabled")]
    Disabled,
    #[serde(rename = "in_memory")]
    InMemory(InMemoryCacheConfig),
}

impl CacheConfig {
    pub fn capacity(&self) -> Option<u64> {
        match self {
            CacheConfig::Disabled => None,
            CacheConfig::InMemory(config) => Some(config.capacity),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InMemoryCacheConfig {
    pub capacity: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_backlog")]
    pub capacity: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self { capacity: default_backlog(), concurrency: default_concurrency() }
    }
}

fn default_backlog() -> usize { 32 }

fn default_concurrency() -> usize { 4 }

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use config::FileFormat;
    use super::*;

    fn parse(toml: &str) -> AppConfig {
        Config::builder()
            .add_source(config::File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    const MINIMAL: &str = r#"
        [bot]
        token = "abc"
        server = 10
        voice_channel = "music"

        [auth]
        admin = 42
        op_role = "dj"
    "#;

    #[test]
    fn defaults_fill_optional_sections() {
        let config = parse(MINIMAL);
        config.verify().unwrap();

        assert_eq!(config.bot.trigger, "yt");
        assert_eq!(config.bot.locale, "en");
        assert_eq!(config.queue.capacity, 5);
        assert_eq!(config.queue.scheduler().poll_interval, Duration::from_millis(500));
        assert_eq!(config.cache.capacity(), None);
        assert_eq!(config.supervisor.concurrency, 4);
    }

    #[test]
    fn cache_section_is_tagged() {
        let config = parse(&format!("{MINIMAL}\n[cache]\ntype = \"in_memory\"\ncapacity = 100\n"));
        assert_eq!(config.cache.capacity(), Some(100));
    }

    #[test]
    fn environment_overrides_keys_with_underscores() {
        let vars = HashMap::from([
            (String::from("JUKEBOX_BOT__VOICE_CHANNEL"), String::from("lounge")),
            (String::from("JUKEBOX_AUTH__OP_ROLE"), String::from("mods")),
            (String::from("JUKEBOX_QUEUE__POLL_INTERVAL_MS"), String::from("250")),
        ]);

        let config: AppConfig = Config::builder()
            .add_source(config::File::from_str(MINIMAL, FileFormat::Toml))
            .add_source(environment().source(Some(vars)))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.bot.voice_channel, "lounge");
        assert_eq!(config.auth.op_role, "mods");
        assert_eq!(config.queue.poll_interval_ms, 250);
        assert_eq!(config.bot.token, "abc");
    }

    #[test]
    fn verify_rejects_bad_values() {
        let mut config = parse(MINIMAL);
        config.bot.trigger = String::from("two words");
        assert!(config.verify().is_err());

        let mut config = parse(MINIMAL);
        config.queue.connect_attempts = 0;
        assert!(config.verify().is_err());

        let mut config = parse(MINIMAL);
        config.bot.token.clear();
        assert!(config.verify().is_err());
    }
}
