use std::{
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use crate::{classifier::KeywordSet, errors::Error, pacing::PacingConfig, Result};

/// Credentials and session location for the MTProto gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthConfig {
    pub api_id: i32,
    pub api_hash: String,
    pub phone_number: String,
    pub session_id: String,
    pub gateway_url: String,
    pub session_file: PathBuf,
}

/// Titles of the agent's own sink channels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelNames {
    pub heap: String,
    pub keywords: String,
}

impl ChannelNames {
    /// The agent never triages its own output channels.
    pub fn is_own_channel(&self, title: &str) -> bool {
        title == self.heap || title == self.keywords
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportConfig {
    pub dir: PathBuf,
    pub name: String,
}

/// Typed configuration, loaded once at startup and shared by every job.
#[derive(Clone, Debug)]
pub struct Config {
    pub auth: AuthConfig,
    pub channels: ChannelNames,

    // Triage
    pub keywords: Vec<String>,
    pub keywords_are_patterns: bool,
    /// Exclusive upper bound on the unread count of a candidate dialog.
    pub max_unread: u32,
    pub pacing: PacingConfig,

    // Digest
    pub report: ReportConfig,
    pub digest_enabled: bool,
    pub digest_cron: String,
    pub digest_page_size: u32,
}

impl Config {
    /// Load from the process environment, after applying `.env` if present.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key-value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let api_id = parse_num::<i32>(&get, "TG_API_ID")?
            .ok_or_else(|| required("TG_API_ID"))?;
        let api_hash = get("TG_API_HASH").ok_or_else(|| required("TG_API_HASH"))?;
        let phone_number = get("TG_PHONE_NUMBER").ok_or_else(|| required("TG_PHONE_NUMBER"))?;
        let session_id = get("TG_SESSION_ID").unwrap_or_else(|| "session".to_string());
        let gateway_url =
            get("TG_GATEWAY_URL").unwrap_or_else(|| "http://127.0.0.1:8765".to_string());
        let session_file = PathBuf::from(
            get("SESSION_FILE").unwrap_or_else(|| "./tgt-session.json".to_string()),
        );

        let heap = get("HEAP_CHANNEL_NAME").ok_or_else(|| required("HEAP_CHANNEL_NAME"))?;
        let keywords_channel =
            get("KEYWORDS_CHANNEL_NAME").ok_or_else(|| required("KEYWORDS_CHANNEL_NAME"))?;
        if heap == keywords_channel {
            return Err(Error::Config(
                "HEAP_CHANNEL_NAME and KEYWORDS_CHANNEL_NAME must differ".to_string(),
            ));
        }

        let keywords = parse_csv(get("KEYWORDS"));
        let keywords_are_patterns = parse_bool(&get, "KEYWORDS_ARE_PATTERNS")?.unwrap_or(false);
        let max_unread = parse_num::<u32>(&get, "MAX_UNREAD")?.unwrap_or(50);

        let defaults = PacingConfig::default();
        let ms = |key: &str, default: Duration| -> Result<Duration> {
            Ok(parse_num::<u64>(&get, key)?
                .map(Duration::from_millis)
                .unwrap_or(default))
        };
        let pacing = PacingConfig {
            poll_interval: ms("POLL_INTERVAL_MS", defaults.poll_interval)?,
            error_backoff: ms("ERROR_BACKOFF_MS", defaults.error_backoff)?,
            forward_delay: ms("FORWARD_DELAY_MS", defaults.forward_delay)?,
            settle_delay: ms("SETTLE_DELAY_MS", defaults.settle_delay)?,
            page_delay: ms("PAGE_DELAY_MS", defaults.page_delay)?,
            min_request_interval: ms("MIN_REQUEST_INTERVAL_MS", defaults.min_request_interval)?,
        };

        let report = ReportConfig {
            dir: PathBuf::from(get("REPORT_DIR").unwrap_or_else(|| ".".to_string())),
            name: get("REPORT_NAME").unwrap_or_else(|| "digest".to_string()),
        };
        let digest_enabled = parse_bool(&get, "DIGEST_ENABLED")?.unwrap_or(true);
        let digest_cron = get("DIGEST_CRON").unwrap_or_else(|| "0 3 * * *".to_string());
        let digest_page_size = parse_num::<u32>(&get, "DIGEST_PAGE_SIZE")?.unwrap_or(100);
        if digest_page_size == 0 {
            return Err(Error::Config("DIGEST_PAGE_SIZE must be > 0".to_string()));
        }

        Ok(Self {
            auth: AuthConfig {
                api_id,
                api_hash,
                phone_number,
                session_id,
                gateway_url,
                session_file,
            },
            channels: ChannelNames {
                heap,
                keywords: keywords_channel,
            },
            keywords,
            keywords_are_patterns,
            max_unread,
            pacing,
            report,
            digest_enabled,
            digest_cron,
            digest_page_size,
        })
    }

    /// Compile the configured keyword list.
    pub fn keyword_set(&self) -> Result<KeywordSet> {
        if self.keywords_are_patterns {
            KeywordSet::patterns(&self.keywords)
        } else {
            KeywordSet::literal(&self.keywords)
        }
    }
}

fn required(key: &str) -> Error {
    Error::Config(format!("{key} environment variable is required"))
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, strip_quotes(v.trim()));
    }
}

fn strip_quotes(s: &str) -> &str {
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        return &s[1..s.len() - 1];
    }
    s
}

fn parse_num<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key} is not a valid number: {raw}"))),
    }
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<bool>> {
    let Some(raw) = get(key) else {
        return Ok(None);
    };
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(Error::Config(format!("{key} is not a valid boolean: {raw}"))),
    }
}

fn parse_csv(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
