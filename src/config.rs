use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::geolocation::{PermissionPolicy, WatchOptions};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub kafka_bootstrap_servers: String,
    pub kafka_topic: String,
    pub kafka_group_id: String,
    pub kafka_auto_offset_reset: String,
    pub kafka_sasl_mechanism: String,
    pub kafka_username: String,
    pub kafka_password: String,
    pub kafka_security_protocol: String,
    pub kafka_max_retries: u32,
    pub kafka_circuit_breaker_cooldown: u64,
    pub database_url: String,
    pub log_level: String,
    pub tracking: TrackingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackingConfig {
    pub min_interval_ms: u64,
    pub min_distance_m: f64,
    pub fix_max_age_secs: u64,
    pub fix_timeout_secs: u64,
    pub permitted_devices: String,
}

impl TrackingConfig {
    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            min_interval: Duration::from_millis(self.min_interval_ms),
            min_distance_m: self.min_distance_m,
        }
    }

    pub fn permission_policy(&self) -> PermissionPolicy {
        PermissionPolicy::parse(&self.permitted_devices)
    }

    pub fn fix_max_age(&self) -> Duration {
        Duration::from_secs(self.fix_max_age_secs)
    }

    pub fn fix_timeout(&self) -> Duration {
        Duration::from_secs(self.fix_timeout_secs)
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let kafka_bootstrap_servers = env_or("KAFKA_BOOTSTRAP_SERVERS", "localhost:9092");
        let kafka_topic = env_or("KAFKA_TOPIC", "fleet-tracking");
        let kafka_group_id = env_or("KAFKA_GROUP_ID", "fleet-trip-tracker");
        let kafka_auto_offset_reset = env_or("KAFKA_AUTO_OFFSET_RESET", "latest");
        let kafka_sasl_mechanism = env_or("KAFKA_SASL_MECHANISM", "SCRAM-SHA-256");
        let kafka_username = env::var("KAFKA_USERNAME").unwrap_or_default();
        let kafka_password = env::var("KAFKA_PASSWORD").unwrap_or_default();
        let kafka_security_protocol = env_or("KAFKA_SECURITY_PROTOCOL", "SASL_PLAINTEXT");
        let kafka_max_retries = env_parse("KAFKA_MAX_RETRIES", 5);
        let kafka_circuit_breaker_cooldown = env_parse("KAFKA_CIRCUIT_BREAKER_COOLDOWN", 300);

        let db_host = env_or("DB_HOST", "localhost");
        let db_port = env_or("DB_PORT", "5432");
        let db_name = env_or("DB_DATABASE", "fleet");
        let db_user = env_or("DB_USER", "fleet");
        let db_pwd = env_or("DB_PWD", "fleet");

        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            db_user, db_pwd, db_host, db_port, db_name
        );

        let log_level = env_or("LOG_LEVEL", "info");

        let tracking = TrackingConfig {
            min_interval_ms: env_parse("TRACKING_MIN_INTERVAL_MS", 5000),
            min_distance_m: env_parse("TRACKING_MIN_DISTANCE_M", 10.0),
            fix_max_age_secs: env_parse("TRACKING_FIX_MAX_AGE_SECS", 30),
            fix_timeout_secs: env_parse("TRACKING_FIX_TIMEOUT_SECS", 10),
            permitted_devices: env_or("TRACKING_PERMITTED_DEVICES", "*"),
        };

        Ok(Self {
            kafka_bootstrap_servers,
            kafka_topic,
            kafka_group_id,
            kafka_auto_offset_reset,
            kafka_sasl_mechanism,
            kafka_username,
            kafka_password,
            kafka_security_protocol,
            kafka_max_retries,
            kafka_circuit_breaker_cooldown,
            database_url,
            log_level,
            tracking,
        })
    }
}
