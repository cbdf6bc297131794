//! healthyd configuration parser.
//!
//! Accepts JSON or TOML with camelCase keys:
//!
//! ```json
//! {
//!   "httpChecks": [
//!     { "url": "http://localhost:8080/healthz", "expectedStatusCode": 200,
//!       "timeout": "2s", "period": "30s", "flex": "5s", "retries": 2 }
//!   ],
//!   "reportFailuresCount": 3,
//!   "firstRetryDelay": "3s",
//!   "twilio": { "accountId": "AC...", "authToken": "...", "from": "+1...", "to": "+1..." }
//! }
//! ```
//!
//! Durations are either whole seconds or unit-suffixed text such as
//! `"750ms"`, `"1.5s"` or `"1m30s"`. A check without a `timeout` uses the
//! probe's default request timeout.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use healthy::{FailureOptions, HttpCheck, ProbeError, TaskRef, with_retries};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("expected configuration on stdin")]
    EmptyInput,

    #[error("cannot parse JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("no checks configured")]
    NoChecks,

    #[error("check {0} has a zero period")]
    ZeroPeriod(String),

    #[error("reportFailuresCount must be at least 1")]
    ZeroReportCount,

    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Configuration file syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    /// Guess the format from a file extension, defaulting to JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthyConfig {
    #[serde(default)]
    pub http_checks: Vec<HttpCheckConfig>,
    pub report_failures_count: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub first_retry_delay: Option<Duration>,
    #[serde(alias = "twillio")]
    pub twilio: Option<TwilioConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpCheckConfig {
    pub url: String,
    #[serde(default = "default_status_code")]
    pub expected_status_code: u16,
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub timeout: Option<Duration>,
    #[serde(deserialize_with = "deserialize_duration")]
    pub period: Duration,
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub flex: Option<Duration>,
    /// Attempts per execution; more than one wraps the check in a retry.
    pub retries: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwilioConfig {
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub auth_token: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
}

impl TwilioConfig {
    /// SMS notifications are only enabled when every field is set.
    pub fn is_complete(&self) -> bool {
        !self.account_id.is_empty()
            && !self.auth_token.is_empty()
            && !self.from.is_empty()
            && !self.to.is_empty()
    }
}

fn default_status_code() -> u16 {
    200
}

impl HealthyConfig {
    /// Load from `path`, or from stdin when no path is given.
    pub fn load(path: Option<&Path>, format: Option<ConfigFormat>) -> Result<Self, ConfigError> {
        let (content, guessed) = match path {
            Some(path) => (std::fs::read_to_string(path)?, ConfigFormat::from_path(path)),
            None => {
                let mut content = String::new();
                std::io::stdin().read_to_string(&mut content)?;
                if content.trim().is_empty() {
                    return Err(ConfigError::EmptyInput);
                }
                (content, ConfigFormat::Json)
            }
        };
        Self::parse(&content, format.unwrap_or(guessed))
    }

    /// Parse and validate a configuration document.
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let config: HealthyConfig = match format {
            ConfigFormat::Json => serde_json::from_str(content)?,
            ConfigFormat::Toml => toml::from_str(content)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.http_checks.is_empty() {
            return Err(ConfigError::NoChecks);
        }
        if self.report_failures_count == Some(0) {
            return Err(ConfigError::ZeroReportCount);
        }
        if let Some(check) = self.http_checks.iter().find(|c| c.period.is_zero()) {
            return Err(ConfigError::ZeroPeriod(check.url.clone()));
        }
        Ok(())
    }

    /// Checker-wide failure options, falling back to the defaults.
    pub fn failure_options(&self) -> FailureOptions {
        let defaults = FailureOptions::default();
        FailureOptions::new(
            self.report_failures_count
                .unwrap_or(defaults.report_failures_count()),
            self.first_retry_delay
                .unwrap_or(defaults.first_retry_delay()),
        )
    }

    /// Twilio settings, if complete.
    pub fn twilio(&self) -> Option<&TwilioConfig> {
        self.twilio.as_ref().filter(|t| t.is_complete())
    }
}

impl HttpCheckConfig {
    pub fn flex(&self) -> Duration {
        self.flex.unwrap_or_default()
    }

    /// Build the check task described by this entry.
    pub fn build(&self) -> Result<TaskRef, ConfigError> {
        let mut check = HttpCheck::new(&self.url, self.expected_status_code)?;
        if let Some(timeout) = self.timeout {
            check = check.with_timeout(timeout);
        }
        let task: TaskRef = std::sync::Arc::new(check);
        Ok(match self.retries {
            Some(attempts) if attempts > 1 => with_retries(task, attempts),
            _ => task,
        })
    }
}

/// Durations are written as a number of seconds or as text accepted by
/// [`parse_duration`].
#[derive(Deserialize)]
#[serde(untagged)]
enum DurationValue {
    Seconds(u64),
    Text(String),
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match DurationValue::deserialize(deserializer)? {
        DurationValue::Seconds(secs) => Ok(Duration::from_secs(secs)),
        DurationValue::Text(text) => parse_duration(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {text:?}"))),
    }
}

fn deserialize_opt_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_duration(deserializer).map(Some)
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Parse a duration string.
///
/// Accepts a bare number of seconds (`"10"`) or a sequence of decimal
/// numbers with unit suffixes, like `"500ms"`, `"1.5s"` or `"1h30m"`.
/// Units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. Values that do
/// not fit a [`Duration`] are rejected.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if s.is_empty() {
        return None;
    }

    let mut rest = s;
    let mut total: u128 = 0;
    while !rest.is_empty() {
        let split = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(split);
        let split = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(split);

        total = total.checked_add(scaled(number, unit_nanos(unit)?)?)?;
        rest = tail;
    }

    let secs = u64::try_from(total / NANOS_PER_SEC).ok()?;
    let nanos = u32::try_from(total % NANOS_PER_SEC).ok()?;
    Some(Duration::new(secs, nanos))
}

fn unit_nanos(unit: &str) -> Option<u128> {
    Some(match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => 1_000,
        "ms" => 1_000_000,
        "s" => NANOS_PER_SEC,
        "m" => 60 * NANOS_PER_SEC,
        "h" => 3_600 * NANOS_PER_SEC,
        _ => return None,
    })
}

/// `number` (like `"12"`, `"1.5"` or `".5"`) times `scale` nanoseconds.
fn scaled(number: &str, scale: u128) -> Option<u128> {
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let whole = if whole.is_empty() {
        0
    } else {
        whole.parse::<u128>().ok()?
    };
    let mut nanos = whole.checked_mul(scale)?;

    // Digits past nanosecond precision of the largest unit are dropped.
    let fraction = &fraction[..fraction.len().min(18)];
    if !fraction.is_empty() {
        let digits = fraction.parse::<u128>().ok()?;
        let denominator = 10u128.pow(fraction.len() as u32);
        nanos = nanos.checked_add(digits * scale / denominator)?;
    }
    Some(nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "httpChecks": [
            {
                "url": "http://localhost:8080/healthz",
                "expectedStatusCode": 204,
                "timeout": "2s",
                "period": "30s",
                "flex": "500ms",
                "retries": 2
            },
            { "url": "http://localhost:9090/", "period": 60 }
        ],
        "reportFailuresCount": 2,
        "firstRetryDelay": "1m",
        "twillio": {
            "accountId": "AC123",
            "authToken": "secret",
            "from": "+15550001",
            "to": "+15550002"
        }
    }"#;

    #[test]
    fn parse_json() {
        let config = HealthyConfig::parse(JSON, ConfigFormat::Json).unwrap();
        assert_eq!(config.http_checks.len(), 2);

        let first = &config.http_checks[0];
        assert_eq!(first.expected_status_code, 204);
        assert_eq!(first.timeout, Some(Duration::from_secs(2)));
        assert_eq!(first.period, Duration::from_secs(30));
        assert_eq!(first.flex(), Duration::from_millis(500));
        assert_eq!(first.retries, Some(2));

        let second = &config.http_checks[1];
        assert_eq!(second.expected_status_code, 200);
        assert_eq!(second.period, Duration::from_secs(60));
        assert_eq!(second.flex(), Duration::ZERO);
        assert_eq!(second.timeout, None);

        let options = config.failure_options();
        assert_eq!(options.report_failures_count(), 2);
        assert_eq!(options.first_retry_delay(), Duration::from_secs(60));

        let twilio = config.twilio().unwrap();
        assert_eq!(twilio.account_id, "AC123");
    }

    #[test]
    fn parse_toml() {
        let toml_str = r#"
reportFailuresCount = 4

[[httpChecks]]
url = "http://localhost:8080/healthz"
period = "10s"
"#;
        let config = HealthyConfig::parse(toml_str, ConfigFormat::Toml).unwrap();
        assert_eq!(config.http_checks[0].period, Duration::from_secs(10));
        assert_eq!(config.failure_options().report_failures_count(), 4);
        assert_eq!(
            config.failure_options().first_retry_delay(),
            FailureOptions::default().first_retry_delay()
        );
        assert!(config.twilio().is_none());
    }

    #[test]
    fn incomplete_twilio_is_disabled() {
        let json = r#"{
            "httpChecks": [{ "url": "http://localhost/", "period": "5s" }],
            "twilio": { "accountId": "AC123", "authToken": "secret" }
        }"#;
        let config = HealthyConfig::parse(json, ConfigFormat::Json).unwrap();
        assert!(config.twilio.is_some());
        assert!(config.twilio().is_none());
    }

    #[test]
    fn rejects_empty_checks() {
        let err = HealthyConfig::parse(r#"{ "httpChecks": [] }"#, ConfigFormat::Json).unwrap_err();
        assert!(matches!(err, ConfigError::NoChecks));
    }

    #[test]
    fn rejects_zero_period() {
        let json = r#"{ "httpChecks": [{ "url": "http://localhost/", "period": "0s" }] }"#;
        let err = HealthyConfig::parse(json, ConfigFormat::Json).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroPeriod(url) if url == "http://localhost/"));
    }

    #[test]
    fn rejects_zero_report_count() {
        let json = r#"{
            "httpChecks": [{ "url": "http://localhost/", "period": "5s" }],
            "reportFailuresCount": 0
        }"#;
        let err = HealthyConfig::parse(json, ConfigFormat::Json).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroReportCount));
    }

    #[test]
    fn rejects_bad_duration() {
        let json = r#"{ "httpChecks": [{ "url": "http://localhost/", "period": "soon" }] }"#;
        let err = HealthyConfig::parse(json, ConfigFormat::Json).unwrap_err();
        assert!(err.to_string().contains("invalid duration"));
    }

    #[test]
    fn build_wraps_retries() {
        let config = HealthyConfig::parse(JSON, ConfigFormat::Json).unwrap();
        let task = config.http_checks[0].build().unwrap();
        assert_eq!(task.name(), "HTTP check for localhost:8080");
    }

    #[test]
    fn build_rejects_https() {
        let json = r#"{ "httpChecks": [{ "url": "https://example.com/", "period": "5s" }] }"#;
        let config = HealthyConfig::parse(json, ConfigFormat::Json).unwrap();
        assert!(matches!(
            config.http_checks[0].build(),
            Err(ConfigError::Probe(ProbeError::UnsupportedScheme(_)))
        ));
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("healthy.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("healthy.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("healthy")), ConfigFormat::Json);
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("250us"), Some(Duration::from_micros(250)));
        assert_eq!(parse_duration("fast"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn parse_duration_compound_and_fractional() {
        assert_eq!(parse_duration("1m30s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("1.5s"), Some(Duration::from_millis(1_500)));
        assert_eq!(parse_duration(".5s"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2h45m"), Some(Duration::from_secs(9_900)));
        assert_eq!(parse_duration("1h0.5m"), Some(Duration::from_secs(3_630)));
        assert_eq!(parse_duration("1m30"), None);
        assert_eq!(parse_duration("-5s"), None);
        assert_eq!(parse_duration("1..5s"), None);
        assert_eq!(parse_duration("5 s"), None);
    }

    #[test]
    fn parse_duration_rejects_overflow() {
        assert_eq!(parse_duration("9999999999999999999m"), None);
        assert_eq!(parse_duration("9999999999999999999h"), None);
        assert_eq!(parse_duration("18446744073709551615s"), Some(Duration::from_secs(u64::MAX)));
        assert_eq!(parse_duration("18446744073709551616s"), None);
    }

    #[test]
    fn overflowing_period_is_a_config_error() {
        let json = r#"{ "httpChecks": [{ "url": "http://localhost/", "period": "9999999999999999999m" }] }"#;
        let err = HealthyConfig::parse(json, ConfigFormat::Json).unwrap_err();
        assert!(err.to_string().contains("invalid duration"));
    }
}
