use std::{
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use chrono::NaiveTime;

use crate::{domain::ChatId, errors::Error, Result};

/// How attachments of one announcement are sent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AttachmentMode {
    /// Media groups of up to 10 documents.
    #[default]
    Grouped,
    /// One document message per attachment.
    Individual,
}

impl FromStr for AttachmentMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "grouped" | "group" | "media_group" => Ok(Self::Grouped),
            "individual" | "single" => Ok(Self::Individual),
            other => Err(Error::Config(format!(
                "ATTACHMENT_MODE must be `grouped` or `individual`, got `{other}`"
            ))),
        }
    }
}

/// Portal-side settings: URLs, credentials and the markup knobs of the site.
#[derive(Clone, Debug)]
pub struct PortalConfig {
    pub login_url: String,
    pub listing_url: String,
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Value of the `op` field posted with the login form.
    pub login_submit: String,
    /// Text that only appears in the page once logged in.
    pub login_sentinel: String,
    /// chrono format of the date prefix of listing timestamps.
    pub date_format: String,
    /// Sign-off marker after which a line break is inserted in bodies.
    pub signoff_marker: String,
    pub request_timeout: Duration,
}

/// Typed configuration for the relay.
#[derive(Clone, Debug)]
pub struct Config {
    pub portal: PortalConfig,

    // Telegram
    pub telegram_bot_token: String,
    pub telegram_chat_id: ChatId,
    pub telegram_message_limit: usize,
    pub send_delay: Duration,
    pub attachment_mode: AttachmentMode,

    // Poll loop
    pub poll_interval: Duration,
    pub daily_reset_at: Option<NaiveTime>,

    // Storage
    pub seen_store_path: PathBuf,
    pub scratch_dir: PathBuf,
}

impl Config {
    /// Load from the process environment, after merging `.env` from the working directory.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);
        let required = |key: &str| {
            get(key).ok_or_else(|| {
                Error::Config(format!("{key} environment variable is required"))
            })
        };

        let portal = PortalConfig {
            login_url: required("PORTAL_LOGIN_URL")?,
            listing_url: required("PORTAL_LISTING_URL")?,
            base_url: required("PORTAL_BASE_URL")?,
            username: required("PORTAL_USERNAME")?,
            password: required("PORTAL_PASSWORD")?,
            login_submit: get("PORTAL_LOGIN_SUBMIT").unwrap_or_else(|| "Entrar".to_string()),
            login_sentinel: get("PORTAL_LOGIN_SENTINEL").unwrap_or_else(|| "Sair".to_string()),
            date_format: get("PORTAL_DATE_FORMAT").unwrap_or_else(|| "%d/%m/%Y".to_string()),
            // Leading space is significant, so read this one untrimmed.
            signoff_marker: lookup("PORTAL_SIGNOFF_MARKER")
                .unwrap_or_else(|| " - CEL BM".to_string()),
            request_timeout: Duration::from_secs(
                parse_opt::<u64>(&get, "PORTAL_TIMEOUT_SECS")?.unwrap_or(30),
            ),
        };

        let telegram_bot_token = required("TELEGRAM_BOT_TOKEN")?;
        let telegram_chat_id = required("TELEGRAM_CHAT_ID")?
            .trim()
            .parse::<i64>()
            .map(ChatId)
            .map_err(|_| Error::Config("TELEGRAM_CHAT_ID must be a numeric chat id".to_string()))?;
        let telegram_message_limit =
            parse_opt::<usize>(&get, "TELEGRAM_MESSAGE_LIMIT")?.unwrap_or(4096);
        let send_delay =
            Duration::from_millis(parse_opt::<u64>(&get, "SEND_DELAY_MS")?.unwrap_or(1000));
        let attachment_mode = get("ATTACHMENT_MODE")
            .map(|s| s.parse::<AttachmentMode>())
            .transpose()?
            .unwrap_or_default();

        let poll_interval = Duration::from_secs(
            parse_opt::<u64>(&get, "POLL_INTERVAL_SECS")?
                .unwrap_or(60)
                .max(1),
        );
        let daily_reset_at = get("DAILY_RESET_AT")
            .map(|s| {
                NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|_| {
                    Error::Config(format!("DAILY_RESET_AT must be HH:MM, got `{s}`"))
                })
            })
            .transpose()?;

        let seen_store_path = get("SEEN_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data/seen.json"));
        let scratch_dir = get("SCRATCH_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join("announcement-relay"));

        Ok(Self {
            portal,
            telegram_bot_token,
            telegram_chat_id,
            telegram_message_limit,
            send_delay,
            attachment_mode,
            poll_interval,
            daily_reset_at,
            seen_store_path,
            scratch_dir,
        })
    }
}

fn parse_opt<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    get(key)
        .map(|s| {
            s.trim()
                .parse::<T>()
                .map_err(|_| Error::Config(format!("{key} has an invalid value: `{s}`")))
        })
        .transpose()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim().trim_start_matches("export ").trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
