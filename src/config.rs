//! Run configuration.
//!
//! Values are layered, lowest priority first:
//! 1. built-in defaults ([`SyncConfig::default`])
//! 2. the config file (`./articlesync.toml` unless a path is given)
//! 3. environment variables ([`ENV_COOKIE`], [`ENV_USER_ID`], [`ENV_DATA_DIR`])
//! 4. command-line flags, applied by the binary
//!
//! The config file uses a small `key = value` subset of TOML: double-quoted
//! strings, integers, floats, booleans and `#` comments.
//!
//! ```toml
//! user_id = "123456"
//! data_dir = "data/articles"
//! request_delay_secs = 3
//! skip_comments = false
//! ```

use std::fmt;
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::api::{DEFAULT_BASE_URL, DEFAULT_REQUEST_TIMEOUT};
use crate::pacing::{AdaptiveDelay, MAX_RETRIES, RetryPolicy};
use crate::sync::{
    DEFAULT_BATCH_PAUSE, DEFAULT_BATCH_PAUSE_EVERY, DEFAULT_CAUGHT_UP_PAGES, DEFAULT_PAGE_SIZE,
    SyncOptions, TerminationPolicy,
};

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "articlesync.toml";

/// Environment variable holding the account cookie header.
pub const ENV_COOKIE: &str = "ARTICLESYNC_COOKIE";

/// Environment variable holding the author's user id.
pub const ENV_USER_ID: &str = "ARTICLESYNC_USER_ID";

/// Environment variable holding the data directory.
pub const ENV_DATA_DIR: &str = "ARTICLESYNC_DATA_DIR";

/// Default data directory.
pub const DEFAULT_DATA_DIR: &str = "data/articles";

/// Default base request delay.
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_secs(3);

/// Default pacing floor.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(3);

/// Default pacing ceiling.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(120);

/// The inter-request pacing starts at this multiple of the request delay.
const PACING_BASE_FACTOR: u32 = 3;

/// Values read from a config file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileConfig {
    pub user_id: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub cookie: Option<String>,
    pub base_url: Option<String>,
    pub request_delay_secs: Option<f64>,
    pub min_delay_secs: Option<f64>,
    pub max_delay_secs: Option<f64>,
    pub request_timeout_secs: Option<u64>,
    pub page_size: Option<u32>,
    pub max_pages: Option<u32>,
    pub caught_up_pages: Option<u32>,
    pub skip_comments: Option<bool>,
    pub batch_pause_every: Option<u32>,
    pub batch_pause_min_secs: Option<u64>,
    pub batch_pause_max_secs: Option<u64>,
    pub max_retries: Option<u32>,
}

impl FileConfig {
    /// Validates values against their allowed ranges.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first out-of-range key.
    pub fn validate(&self) -> Result<()> {
        validate_secs("request_delay_secs", self.request_delay_secs, 0.0, 600.0)?;
        validate_secs("min_delay_secs", self.min_delay_secs, 0.0, 600.0)?;
        validate_secs("max_delay_secs", self.max_delay_secs, 0.0, 3600.0)?;
        validate_range("request_timeout_secs", self.request_timeout_secs, 1..=3600)?;
        validate_range("page_size", self.page_size, 1..=100)?;
        validate_range("max_retries", self.max_retries, 1..=20)?;
        validate_range("batch_pause_min_secs", self.batch_pause_min_secs, 0..=3600)?;
        validate_range("batch_pause_max_secs", self.batch_pause_max_secs, 0..=3600)?;
        if let Some(user_id) = &self.user_id
            && user_id.parse::<u64>().is_err()
        {
            bail!("Invalid config value for `user_id`: '{user_id}'. Expected a numeric id");
        }
        Ok(())
    }
}

fn validate_range<T>(field: &str, value: Option<T>, range: RangeInclusive<T>) -> Result<()>
where
    T: PartialOrd + fmt::Display,
{
    let Some(value) = value else {
        return Ok(());
    };
    if !range.contains(&value) {
        bail!(
            "Invalid config value for `{field}`: {value}. Expected range: {}..={}",
            range.start(),
            range.end()
        );
    }
    Ok(())
}

fn validate_secs(field: &str, value: Option<f64>, min: f64, max: f64) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !value.is_finite() || value < min || value > max {
        bail!("Invalid config value for `{field}`: {value}. Expected range: {min}..={max}");
    }
    Ok(())
}

/// Fully resolved settings for one invocation.
#[derive(Clone, PartialEq)]
pub struct SyncConfig {
    /// Author whose articles are synced.
    pub user_id: Option<String>,
    pub data_dir: PathBuf,
    /// Account cookie header; required for upstream commands.
    pub cookie: Option<String>,
    pub base_url: String,
    /// Base of both the retry backoff and (times three) the pacing delay.
    pub request_delay: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub request_timeout: Duration,
    pub page_size: u32,
    /// `None` means no page limit.
    pub max_pages: Option<u32>,
    pub caught_up_pages: u32,
    pub skip_comments: bool,
    pub batch_pause_every: u32,
    pub batch_pause: RangeInclusive<Duration>,
    /// Upstream calls per logical request.
    pub max_retries: u32,
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("user_id", &self.user_id)
            .field("data_dir", &self.data_dir)
            .field("cookie", &self.cookie.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("request_delay", &self.request_delay)
            .field("min_delay", &self.min_delay)
            .field("max_delay", &self.max_delay)
            .field("request_timeout", &self.request_timeout)
            .field("page_size", &self.page_size)
            .field("max_pages", &self.max_pages)
            .field("caught_up_pages", &self.caught_up_pages)
            .field("skip_comments", &self.skip_comments)
            .field("batch_pause_every", &self.batch_pause_every)
            .field("batch_pause", &self.batch_pause)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            cookie: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            request_delay: DEFAULT_REQUEST_DELAY,
            min_delay: DEFAULT_MIN_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: None,
            caught_up_pages: DEFAULT_CAUGHT_UP_PAGES,
            skip_comments: false,
            batch_pause_every: DEFAULT_BATCH_PAUSE_EVERY,
            batch_pause: DEFAULT_BATCH_PAUSE,
            max_retries: MAX_RETRIES,
        }
    }
}

impl SyncConfig {
    /// Loads defaults, then the config file, then the process environment.
    ///
    /// With `path = None`, `./articlesync.toml` is used if it exists. An
    /// explicit path must exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        match path {
            Some(path) => config.apply_file(&load_file_config(path)?),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    config.apply_file(&load_file_config(default_path)?);
                }
            }
        }

        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overlays values present in `file`.
    pub fn apply_file(&mut self, file: &FileConfig) {
        if let Some(user_id) = &file.user_id {
            self.user_id = Some(user_id.clone());
        }
        if let Some(data_dir) = &file.data_dir {
            self.data_dir.clone_from(data_dir);
        }
        if let Some(cookie) = &file.cookie {
            self.cookie = Some(cookie.clone());
        }
        if let Some(base_url) = &file.base_url {
            self.base_url.clone_from(base_url);
        }
        if let Some(secs) = file.request_delay_secs {
            self.request_delay = Duration::from_secs_f64(secs);
        }
        if let Some(secs) = file.min_delay_secs {
            self.min_delay = Duration::from_secs_f64(secs);
        }
        if let Some(secs) = file.max_delay_secs {
            self.max_delay = Duration::from_secs_f64(secs);
        }
        if let Some(secs) = file.request_timeout_secs {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(page_size) = file.page_size {
            self.page_size = page_size;
        }
        if let Some(max_pages) = file.max_pages {
            self.max_pages = (max_pages > 0).then_some(max_pages);
        }
        if let Some(pages) = file.caught_up_pages {
            self.caught_up_pages = pages;
        }
        if let Some(skip) = file.skip_comments {
            self.skip_comments = skip;
        }
        if let Some(every) = file.batch_pause_every {
            self.batch_pause_every = every;
        }
        let pause_min = file
            .batch_pause_min_secs
            .map_or(*self.batch_pause.start(), Duration::from_secs);
        let pause_max = file
            .batch_pause_max_secs
            .map_or(*self.batch_pause.end(), Duration::from_secs);
        self.batch_pause = pause_min..=pause_max;
        if let Some(max_retries) = file.max_retries {
            self.max_retries = max_retries;
        }
    }

    /// Overlays environment values; empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(cookie) = non_empty(ENV_COOKIE) {
            self.cookie = Some(cookie.trim().to_string());
        }
        if let Some(user_id) = non_empty(ENV_USER_ID) {
            self.user_id = Some(user_id.trim().to_string());
        }
        if let Some(data_dir) = non_empty(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(data_dir);
        }
    }

    /// Checks relationships between values.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first inconsistency.
    pub fn validate(&self) -> Result<()> {
        if self.min_delay > self.max_delay {
            bail!(
                "min delay ({:?}) exceeds max delay ({:?})",
                self.min_delay,
                self.max_delay
            );
        }
        if self.batch_pause.start() > self.batch_pause.end() {
            bail!(
                "batch pause minimum ({:?}) exceeds maximum ({:?})",
                self.batch_pause.start(),
                self.batch_pause.end()
            );
        }
        if self.page_size == 0 {
            bail!("page size must be at least 1");
        }
        if self.max_retries == 0 {
            bail!("max retries must be at least 1");
        }
        if let Some(user_id) = &self.user_id
            && user_id.parse::<u64>().is_err()
        {
            bail!("user id '{user_id}' is not numeric");
        }
        Ok(())
    }

    /// Returns the cookie or a usage error.
    ///
    /// # Errors
    ///
    /// Returns an error when no cookie was configured.
    pub fn require_cookie(&self) -> Result<&str> {
        match self.cookie.as_deref() {
            Some(cookie) if !cookie.trim().is_empty() => Ok(cookie),
            _ => bail!("no cookie configured; set {ENV_COOKIE}, `cookie` in the config file, or --cookie"),
        }
    }

    /// Returns the user id or a usage error.
    ///
    /// # Errors
    ///
    /// Returns an error when no user id was configured.
    pub fn require_user_id(&self) -> Result<&str> {
        self.user_id.as_deref().with_context(|| {
            format!("no user id configured; set {ENV_USER_ID}, `user_id` in the config file, or --user-id")
        })
    }

    /// Builds the run's pacing controller.
    #[must_use]
    pub fn pacing(&self) -> AdaptiveDelay {
        AdaptiveDelay::new(
            self.request_delay.saturating_mul(PACING_BASE_FACTOR),
            self.min_delay,
            self.max_delay,
        )
    }

    /// Builds the retry policy for upstream calls.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.request_delay)
    }

    /// Builds the orchestrator options.
    #[must_use]
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            page_size: self.page_size,
            batch_pause_every: self.batch_pause_every,
            batch_pause: self.batch_pause.clone(),
            termination: TerminationPolicy::new(self.max_pages, self.caught_up_pages),
        }
    }
}

/// Reads and parses a config file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is invalid.
pub fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

/// Parses config file contents.
///
/// # Errors
///
/// Returns an error for syntax errors, unknown keys, bad values or values
/// outside their allowed range.
pub fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "user_id" => cfg.user_id = Some(parse_string_literal(value).with_context(context)?),
            "data_dir" => {
                cfg.data_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(context)?,
                ));
            }
            "cookie" => cfg.cookie = Some(parse_string_literal(value).with_context(context)?),
            "base_url" => cfg.base_url = Some(parse_string_literal(value).with_context(context)?),
            "request_delay_secs" => {
                cfg.request_delay_secs = Some(parse_seconds(value).with_context(context)?);
            }
            "min_delay_secs" => {
                cfg.min_delay_secs = Some(parse_seconds(value).with_context(context)?);
            }
            "max_delay_secs" => {
                cfg.max_delay_secs = Some(parse_seconds(value).with_context(context)?);
            }
            "request_timeout_secs" => {
                cfg.request_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "page_size" => cfg.page_size = Some(parse_integer_u32(value).with_context(context)?),
            "max_pages" => cfg.max_pages = Some(parse_integer_u32(value).with_context(context)?),
            "caught_up_pages" => {
                cfg.caught_up_pages = Some(parse_integer_u32(value).with_context(context)?);
            }
            "skip_comments" => cfg.skip_comments = Some(parse_boolean(value).with_context(context)?),
            "batch_pause_every" => {
                cfg.batch_pause_every = Some(parse_integer_u32(value).with_context(context)?);
            }
            "batch_pause_min_secs" => {
                cfg.batch_pause_min_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "batch_pause_max_secs" => {
                cfg.batch_pause_max_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "max_retries" => {
                cfg.max_retries = Some(parse_integer_u32(value).with_context(context)?);
            }
            unknown => bail!("Unknown configuration key: '{unknown}' on line {line_no}"),
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_integer_u32(raw_value: &str) -> Result<u32> {
    let value = parse_integer_u64(raw_value)?;
    u32::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u32"))
}

/// Accepts integers and floats; rejects negatives and non-finite values.
fn parse_seconds(raw_value: &str) -> Result<f64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected number of seconds");
    }
    let value = token.parse::<f64>()?;
    if !value.is_finite() || value < 0.0 {
        bail!("Expected non-negative number of seconds");
    }
    Ok(value)
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}
