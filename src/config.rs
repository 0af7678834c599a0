//! Configuration management for QuizCast Server

use std::env;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use thiserror::Error;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub entitlement: EntitlementConfig,
    pub billing: BillingConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret for the manual upgrade endpoint; `None` disables it
    pub admin_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct EntitlementConfig {
    /// Free metered actions per calendar day
    pub daily_allowance: u32,
    /// Lifetime stamped on unlimited access when a checkout completes
    pub checkout_grant_hours: i64,
    /// Upper bound on any single store call
    pub store_timeout_ms: u64,
}

/// Longest accepted checkout grant: one leap year
pub const MAX_CHECKOUT_GRANT_HOURS: i64 = 24 * 366;

impl EntitlementConfig {
    /// Checkout grant lifetime, rejected unless within 1..=MAX_CHECKOUT_GRANT_HOURS
    pub fn checkout_grant(&self) -> Result<ChronoDuration, ConfigError> {
        let invalid = || ConfigError::Invalid {
            name: "CHECKOUT_GRANT_HOURS",
            value: self.checkout_grant_hours.to_string(),
        };

        if !(1..=MAX_CHECKOUT_GRANT_HOURS).contains(&self.checkout_grant_hours) {
            return Err(invalid());
        }
        ChronoDuration::try_hours(self.checkout_grant_hours).ok_or_else(invalid)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub webhook_secret: String,
    pub signature_tolerance_secs: i64,
    pub api_key: String,
    pub api_base: String,
    pub monthly_price_id: String,
    pub yearly_price_id: String,
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub lookup_url: String,
    pub api_key: String,
}

const DEFAULT_AUTH_LOOKUP_URL: &str = "https://identitytoolkit.googleapis.com/v1/accounts:lookup";

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_or("SERVER_PORT", 3000)?,
                admin_token: env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:./quizcast.db".to_string()),
            },
            entitlement: EntitlementConfig {
                daily_allowance: parse_or("DAILY_FREE_CREDITS", 2)?,
                checkout_grant_hours: parse_required("CHECKOUT_GRANT_HOURS")?,
                store_timeout_ms: parse_or("STORE_TIMEOUT_MS", 2000)?,
            },
            billing: BillingConfig {
                webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
                signature_tolerance_secs: parse_or("STRIPE_SIGNATURE_TOLERANCE_SECS", 300)?,
                api_key: required("STRIPE_SECRET_KEY")?,
                api_base: env::var("STRIPE_API_BASE")
                    .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
                monthly_price_id: required("STRIPE_MONTHLY_PRICE_ID")?,
                yearly_price_id: required("STRIPE_YEARLY_PRICE_ID")?,
                public_base_url: env::var("PUBLIC_BASE_URL")
                    .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            },
            auth: AuthConfig {
                lookup_url: env::var("AUTH_LOOKUP_URL")
                    .unwrap_or_else(|_| DEFAULT_AUTH_LOOKUP_URL.to_string()),
                api_key: required("AUTH_API_KEY")?,
            },
        };

        config.entitlement.checkout_grant()?;

        Ok(config)
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn parse_required<T: std::str::FromStr>(name: &'static str) -> Result<T, ConfigError> {
    let value = required(name)?;
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value })
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entitlement_durations() {
        let config = EntitlementConfig {
            daily_allowance: 3,
            checkout_grant_hours: 48,
            store_timeout_ms: 250,
        };

        assert_eq!(config.checkout_grant().unwrap(), ChronoDuration::hours(48));
        assert_eq!(config.store_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_checkout_grant_out_of_range() {
        for hours in [0, -24, MAX_CHECKOUT_GRANT_HOURS + 1, i64::MAX, i64::MIN] {
            let config = EntitlementConfig {
                daily_allowance: 2,
                checkout_grant_hours: hours,
                store_timeout_ms: 250,
            };
            assert!(
                matches!(
                    config.checkout_grant(),
                    Err(ConfigError::Invalid { name: "CHECKOUT_GRANT_HOURS", .. })
                ),
                "{} hours accepted",
                hours
            );
        }
    }

    #[test]
    fn test_checkout_grant_upper_bound_accepted() {
        let config = EntitlementConfig {
            daily_allowance: 2,
            checkout_grant_hours: MAX_CHECKOUT_GRANT_HOURS,
            store_timeout_ms: 250,
        };
        assert_eq!(config.checkout_grant().unwrap(), ChronoDuration::days(366));
    }

    #[test]
    fn test_parse_or_rejects_garbage() {
        env::set_var("QUIZCAST_TEST_BAD_PORT", "not-a-port");
        let result: Result<u16, _> = parse_or("QUIZCAST_TEST_BAD_PORT", 3000);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
        env::remove_var("QUIZCAST_TEST_BAD_PORT");
    }

    #[test]
    fn test_required_treats_blank_as_missing() {
        env::set_var("QUIZCAST_TEST_BLANK", "   ");
        assert!(matches!(
            required("QUIZCAST_TEST_BLANK"),
            Err(ConfigError::Missing("QUIZCAST_TEST_BLANK"))
        ));
        env::remove_var("QUIZCAST_TEST_BLANK");
    }
}
