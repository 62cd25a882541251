use std::sync::LazyLock;

use chrono::Duration;
use regex::Regex;

const RECLAIM_CONFIG: &str = "RECLAIM_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "./reclaim.json";

pub fn get_config_path() -> String {
    std::env::var(RECLAIM_CONFIG).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

const RECLAIM_DISCORD_URL: &str = "RECLAIM_DISCORD_URL";

pub fn get_discord_url() -> Option<String> {
    std::env::var(RECLAIM_DISCORD_URL)
        .ok()
        .filter(|url| !url.is_empty())
}

const RECLAIM_API_TOKEN: &str = "RECLAIM_API_TOKEN";

pub fn get_api_token() -> Option<String> {
    std::env::var(RECLAIM_API_TOKEN)
        .ok()
        .filter(|token| !token.is_empty())
}

static DURATION_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([+-]?)(\d+)([dhms])").expect("valid duration regex"));

/// Parse a duration like `10d`, `14d-4h` or `1h30m`.
///
/// Components are summed with their sign; the total must be positive and the
/// whole input must be made of components.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = Duration::zero();
    let mut consumed = 0;

    for caps in DURATION_PART.captures_iter(&compact) {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or_default();
        if whole.start != consumed {
            return Err(format!("unexpected input in duration '{input}'"));
        }
        consumed = whole.end;

        let amount: i64 = caps[2]
            .parse()
            .map_err(|_| format!("duration component too large in '{input}'"))?;
        let part = match &caps[3] {
            "d" => Duration::try_days(amount),
            "h" => Duration::try_hours(amount),
            "m" => Duration::try_minutes(amount),
            _ => Duration::try_seconds(amount),
        }
        .ok_or_else(|| format!("duration component out of range in '{input}'"))?;

        total = if &caps[1] == "-" {
            total.checked_sub(&part)
        } else {
            total.checked_add(&part)
        }
        .ok_or_else(|| format!("duration '{input}' out of range"))?;
    }

    if consumed != compact.len() {
        return Err(format!("unexpected input in duration '{input}'"));
    }

    if total <= Duration::zero() {
        return Err(format!("duration '{input}' must be positive"));
    }

    Ok(total)
}

/// Render a duration as `12d 3h 5m` (seconds are dropped above one minute).
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if parts.is_empty() {
        return format!("{total}s");
    }
    parts.join(" ")
}
