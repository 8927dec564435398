use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::FixedOffset;

use crate::projections::Zone;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_path: PathBuf,
    pub bind_addr: SocketAddr,
    pub rolling_window: usize,
    pub default_periods: usize,
    pub zone: Zone,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Ok(Self {
            log_path: std::env::var("ANALYTICS_LOG_PATH")
                .unwrap_or_else(|_| "data/activity.log".into())
                .into(),
            bind_addr: std::env::var("ANALYTICS_BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:8080".into())
                .parse()
                .context("ANALYTICS_BIND_ADDR must be host:port")?,
            rolling_window: std::env::var("ANALYTICS_ROLLING_WINDOW")
                .unwrap_or_else(|_| "20".into())
                .parse()
                .context("ANALYTICS_ROLLING_WINDOW must be usize")?,
            default_periods: std::env::var("ANALYTICS_DEFAULT_PERIODS")
                .unwrap_or_else(|_| "7".into())
                .parse()
                .context("ANALYTICS_DEFAULT_PERIODS must be usize")?,
            zone: match std::env::var("ANALYTICS_UTC_OFFSET") {
                Ok(raw) if !raw.trim().is_empty() => Zone::Fixed(
                    parse_offset(&raw).context("ANALYTICS_UTC_OFFSET must look like +02:00")?,
                ),
                _ => Zone::Local,
            },
        })
    }
}

/// `Z`, `+HH:MM`, `-HH:MM` or `+HHMM`
pub fn parse_offset(raw: &str) -> Result<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).context("zero offset");
    }

    let (sign, rest) = if let Some(rest) = raw.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = raw.strip_prefix('-') {
        (-1, rest)
    } else {
        bail!("offset {raw:?} must start with + or -");
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        bail!("offset {raw:?} must have four digits");
    }
    let hours: i32 = digits[..2].parse()?;
    let minutes: i32 = digits[2..].parse()?;
    if minutes >= 60 {
        bail!("offset {raw:?} has more than 59 minutes");
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .with_context(|| format!("offset {raw:?} out of range"))
}
