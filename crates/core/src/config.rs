//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and passed into services;
//! nothing in core reads environment variables during request handling, which
//! keeps behaviour consistent across multi-threaded runtimes and test
//! harnesses.

use std::time::Duration;

use crate::breaker::BreakerConfig;
use crate::error::{RegistrationError, RegistrationResult};

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    auth_base_url: String,
    history_base_url: String,
    breaker: BreakerConfig,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// Base URLs must be non-empty; a trailing slash is stripped so clients
    /// can join paths without double separators.
    pub fn new(
        auth_base_url: impl Into<String>,
        history_base_url: impl Into<String>,
        breaker: BreakerConfig,
    ) -> RegistrationResult<Self> {
        let auth_base_url = normalize_base_url(auth_base_url.into(), "auth service base URL")?;
        let history_base_url =
            normalize_base_url(history_base_url.into(), "history service base URL")?;

        Ok(Self {
            auth_base_url,
            history_base_url,
            breaker,
        })
    }

    pub fn auth_base_url(&self) -> &str {
        &self.auth_base_url
    }

    pub fn history_base_url(&self) -> &str {
        &self.history_base_url
    }

    pub fn breaker(&self) -> &BreakerConfig {
        &self.breaker
    }
}

fn normalize_base_url(url: String, what: &str) -> RegistrationResult<String> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(RegistrationError::Internal(format!("{what} is not set")));
    }
    Ok(trimmed.trim_end_matches('/').to_owned())
}

/// Builds a [`BreakerConfig`] from optional env-provided values.
///
/// `None` or empty values fall back to the defaults; malformed values are
/// rejected so a typo in deployment config fails at startup, not at runtime.
pub fn breaker_config_from_env_values(
    window_size: Option<String>,
    failure_rate_threshold: Option<String>,
    cooldown_secs: Option<String>,
    call_timeout_ms: Option<String>,
) -> RegistrationResult<BreakerConfig> {
    let defaults = BreakerConfig::default();

    fn parse<T: std::str::FromStr>(
        value: Option<String>,
        name: &str,
        default: T,
    ) -> RegistrationResult<T> {
        match value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
            None => Ok(default),
            Some(v) => v
                .parse()
                .map_err(|_| RegistrationError::Internal(format!("invalid value for {name}: {v}"))),
        }
    }

    let window_size = parse(window_size, "breaker window size", defaults.window_size)?;
    let failure_rate_threshold = parse(
        failure_rate_threshold,
        "breaker failure-rate threshold",
        defaults.failure_rate_threshold,
    )?;
    if !(0.0..=1.0).contains(&failure_rate_threshold) {
        return Err(RegistrationError::Internal(
            "breaker failure-rate threshold must be between 0 and 1".into(),
        ));
    }
    let cooldown =
        parse(cooldown_secs, "breaker cooldown", defaults.cooldown.as_secs()).map(Duration::from_secs)?;
    let call_timeout = parse(
        call_timeout_ms,
        "breaker call timeout",
        defaults.call_timeout.as_millis() as u64,
    )
    .map(Duration::from_millis)?;

    Ok(BreakerConfig {
        window_size,
        min_calls: defaults.min_calls,
        failure_rate_threshold,
        cooldown,
        call_timeout,
    })
}
