use std::fmt::{Display, Formatter};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Playing,
    Paused,
    Finished,
}

impl Display for PlaybackStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackStatus::Playing => write!(f, "playing"),
            PlaybackStatus::Paused => write!(f, "paused"),
            PlaybackStatus::Finished => write!(f, "finished"),
        }
    }
}

/// State of the item currently on air.
///
/// Elapsed time only advances while `Playing`: pausing folds the running
/// segment into `accumulated` and clears `segment_started_at`.
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    title: String,
    duration: Option<Duration>,
    requester: String,
    status: PlaybackStatus,
    accumulated: Duration,
    segment_started_at: Option<Instant>,
}

impl PlaybackSession {
    pub fn start(title: String, duration: Option<Duration>, requester: String, now: Instant) -> Self {
        Self {
            title,
            duration,
            requester,
            status: PlaybackStatus::Playing,
            accumulated: Duration::ZERO,
            segment_started_at: Some(now),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn requester(&self) -> &str {
        &self.requester
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.status == PlaybackStatus::Paused
    }

    pub fn accumulated(&self) -> Duration {
        self.accumulated
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        match (self.status, self.segment_started_at) {
            (PlaybackStatus::Playing, Some(started)) => {
                self.accumulated + now.saturating_duration_since(started)
            }
            _ => self.accumulated,
        }
    }

    /// Returns false when there was nothing to pause.
    pub fn pause(&mut self, now: Instant) -> bool {
        if !self.is_playing() {
            return false;
        }

        if let Some(started) = self.segment_started_at.take() {
            self.accumulated += now.saturating_duration_since(started);
        }
        self.status = PlaybackStatus::Paused;
        true
    }

    /// Returns false when the session was not paused.
    pub fn resume(&mut self, now: Instant) -> bool {
        if !self.is_paused() {
            return false;
        }

        self.segment_started_at = Some(now);
        self.status = PlaybackStatus::Playing;
        true
    }

    pub fn finish(&mut self, now: Instant) {
        self.accumulated = self.elapsed(now);
        self.segment_started_at = None;
        self.status = PlaybackStatus::Finished;
    }
}

/// `m:ss`, or `h:mm:ss` past the hour.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total / 60) % 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(now: Instant) -> PlaybackSession {
        PlaybackSession::start("song".into(), Some(Duration::from_secs(180)), "someone".into(), now)
    }

    #[test]
    fn elapsed_runs_while_playing() {
        let t0 = Instant::now();
        let s = session(t0);

        assert_eq!(s.status(), PlaybackStatus::Playing);
        assert_eq!(s.elapsed(t0 + Duration::from_secs(7)), Duration::from_secs(7));
    }

    #[test]
    fn pause_freezes_the_clock() {
        let t0 = Instant::now();
        let mut s = session(t0);

        assert!(s.pause(t0 + Duration::from_secs(10)));
        assert_eq!(s.accumulated(), Duration::from_secs(10));
        assert_eq!(s.elapsed(t0 + Duration::from_secs(100)), Duration::from_secs(10));

        assert!(s.resume(t0 + Duration::from_secs(100)));
        assert_eq!(s.accumulated(), Duration::from_secs(10));
        assert_eq!(s.elapsed(t0 + Duration::from_secs(105)), Duration::from_secs(15));
    }

    #[test]
    fn double_pause_does_not_double_count() {
        let t0 = Instant::now();
        let mut s = session(t0);

        assert!(s.pause(t0 + Duration::from_secs(4)));
        assert!(!s.pause(t0 + Duration::from_secs(9)));
        assert_eq!(s.accumulated(), Duration::from_secs(4));
        assert!(s.is_paused());
    }

    #[test]
    fn resume_while_playing_is_noop() {
        let t0 = Instant::now();
        let mut s = session(t0);

        assert!(!s.resume(t0 + Duration::from_secs(3)));
        assert_eq!(s.elapsed(t0 + Duration::from_secs(5)), Duration::from_secs(5));
    }

    #[test]
    fn finish_keeps_final_elapsed() {
        let t0 = Instant::now();
        let mut s = session(t0);
        s.finish(t0 + Duration::from_secs(30));

        assert_eq!(s.status(), PlaybackStatus::Finished);
        assert_eq!(s.elapsed(t0 + Duration::from_secs(90)), Duration::from_secs(30));
        assert!(!s.resume(t0 + Duration::from_secs(90)));
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(Duration::from_secs(5)), "0:05");
        assert_eq!(format_duration(Duration::from_secs(185)), "3:05");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1:02:03");
    }
}
