use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use crate::playback::Clip;

static START_REGEX: LazyLock<Regex> = LazyLock::new(|| {Regex::new(r"(?i)\b(?:start|begin(?:ning)?)\s*=?\s*(?P<t>\d[\dhms]*)").unwrap() });
static DUR_REGEX: LazyLock<Regex> = LazyLock::new(|| {Regex::new(r"(?i)\bdur(?:ation)?\s*=?\s*(?P<t>\d[\dhms]*)").unwrap() });
static END_REGEX: LazyLock<Regex> = LazyLock::new(|| {Regex::new(r"(?i)\b(?:end|term(?:inate|ination)?)\s*=?\s*(?P<t>\d[\dhms]*)").unwrap() });
static TIME_REGEX: LazyLock<Regex> = LazyLock::new(|| {Regex::new(r"^(?:(?P<h>\d+)h)?(?:(?P<m>\d+)m)?(?:(?P<s>\d+)s?)?$").unwrap() });

/// `1h2m3s`, `2m`, `90s` or a bare `90`.
pub fn parse_time(s: &str) -> Option<Duration> {
    if s.is_empty() {
        return None;
    }

    let captures = TIME_REGEX.captures(s)?;
    let field = |name: &str| -> u64 {
        captures.name(name).and_then(|m| m.as_str().parse().ok()).unwrap_or(0)
    };

    Some(Duration::from_secs(field("h") * 3600 + field("m") * 60 + field("s")))
}

fn find(regex: &Regex, s: &str) -> Option<Duration> {
    regex.captures(s)
        .and_then(|c| c.name("t"))
        .and_then(|t| parse_time(t.as_str()))
}

/// Reads `start`, `dur` and `end` options from the text following a URL.
/// Without an explicit end, `dur` counts from the start (or from zero).
pub fn parse_clip(s: &str) -> Clip {
    let start = find(&START_REGEX, s);
    let dur = find(&DUR_REGEX, s);
    let end = find(&END_REGEX, s)
        .or_else(|| dur.map(|d| start.unwrap_or_default() + d));

    Clip { start, end }
}
