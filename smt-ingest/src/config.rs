use std::{fmt, str::FromStr, time::Duration};

use anyhow::{bail, Context};
use smt_client::{
    db,
    portal::{endpoints::DEFAULT_BASE_URL, Credentials, ReadOptions},
};

#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub base_url: String,
    pub credentials: Credentials,
    pub read: ReadOptions,
}

#[derive(Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("topic", &self.topic)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub meter_table: String,
    pub interval_table: String,
    pub max_connections: u32,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The URL usually embeds the database password.
        f.debug_struct("DatabaseConfig")
            .field("meter_table", &self.meter_table)
            .field("interval_table", &self.interval_table)
            .field("max_connections", &self.max_connections)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub hourly_period: Duration,
    pub interval_period: Duration,
    pub interval_enabled: bool,
    pub read_on_start: bool,
    /// Upper bound for a single sink delivery.
    pub sink_timeout: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            hourly_period: Duration::from_secs(60 * 60),
            interval_period: Duration::from_secs(3 * 60 * 60),
            interval_enabled: false,
            read_on_start: false,
            sink_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

/// Immutable service configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub portal: PortalConfig,
    /// Present when `SMT_MQTT_HOST` is set.
    pub mqtt: Option<MqttConfig>,
    /// Present when `SMT_DB_URL` is set.
    pub database: Option<DatabaseConfig>,
    pub schedule: ScheduleConfig,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from a variable lookup.
    ///
    /// Missing credentials and unusable table names are errors; malformed
    /// optional values are logged and replaced by their defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let (Some(user), Some(password)) = (get("SMT_USER"), get("SMT_PASSWORD")) else {
            bail!("SMT_USER and SMT_PASSWORD must be set in the environment");
        };
        let credentials = Credentials::new(user, password).context("invalid SMT credentials")?;

        let defaults = ReadOptions::default();
        let read = ReadOptions {
            poll_interval: Duration::from_secs(parse_or(
                &get,
                "SMT_READ_POLL_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )),
            poll_attempts: parse_positive_or(&get, "SMT_READ_POLL_ATTEMPTS", defaults.poll_attempts),
            request_timeout: Duration::from_secs(parse_positive_or(
                &get,
                "SMT_HTTP_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )),
            ..defaults
        };
        let portal = PortalConfig {
            base_url: get("SMT_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            credentials,
            read,
        };

        let mqtt = get("SMT_MQTT_HOST").map(|host| MqttConfig {
            host,
            port: parse_or(&get, "SMT_MQTT_PORT", 1883),
            topic: get("SMT_MQTT_TOPIC").unwrap_or_else(|| "smt/meter".to_string()),
            client_id: get("SMT_MQTT_CLIENT_ID").unwrap_or_else(|| "smt-ingest".to_string()),
            username: get("SMT_MQTT_USER"),
            password: get("SMT_MQTT_PASSWORD"),
        });

        let database = match get("SMT_DB_URL") {
            Some(url) => {
                let meter_table = get("SMT_DB_TABLE").unwrap_or_else(|| "smt_meter".to_string());
                let interval_table =
                    get("SMT_INTERVAL_TABLE").unwrap_or_else(|| "smt_meter_interval".to_string());
                for table in [&meter_table, &interval_table] {
                    if !db::is_valid_table_name(table) {
                        bail!("invalid table name '{table}': use letters, digits and underscores");
                    }
                }
                Some(DatabaseConfig {
                    url,
                    meter_table,
                    interval_table,
                    max_connections: parse_positive_or(&get, "SMT_DB_MAX_CONNECTIONS", 2),
                })
            }
            None => None,
        };

        let schedule = ScheduleConfig {
            interval_enabled: parse_flag(&get, "SMT_INTERVAL_ENABLED"),
            read_on_start: parse_flag(&get, "SMT_READ_ON_START"),
            sink_timeout: Duration::from_secs(parse_positive_or(&get, "SMT_SINK_TIMEOUT_SECS", 30)),
            ..ScheduleConfig::default()
        };

        let metrics = get("SMT_METRICS_ADDR").map(|bind_addr| MetricsConfig { bind_addr });

        Ok(Self {
            portal,
            mqtt,
            database,
            schedule,
            metrics,
        })
    }
}

fn parse_or<T, F>(get: &F, key: &str, default: T) -> T
where
    T: FromStr + fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::error!(key, value = %raw, %default, "invalid value, using default");
            default
        }),
    }
}

/// Like [`parse_or`] for counts and timeouts, where zero would disable the feature.
fn parse_positive_or<T, F>(get: &F, key: &str, default: T) -> T
where
    T: FromStr + fmt::Display + PartialOrd + From<u8> + Copy,
    F: Fn(&str) -> Option<String>,
{
    let value = parse_or(get, key, default);
    if value > T::from(0) {
        return value;
    }
    tracing::error!(key, value = %value, %default, "value must be greater than zero, using default");
    default
}

fn parse_flag<F>(get: &F, key: &str) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None | Some("0" | "false" | "no" | "off") => false,
        Some("1" | "true" | "yes" | "on") => true,
        Some(other) => {
            tracing::warn!(key, value = other, "invalid flag, must be 0 or 1; defaulting to disabled");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(pairs: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|k| vars.get(k).cloned())
    }

    const CREDS: [(&str, &str); 2] = [("SMT_USER", "user"), ("SMT_PASSWORD", "secret")];

    #[test]
    fn credentials_are_required() {
        assert!(cfg(&[]).is_err());
        assert!(cfg(&[("SMT_USER", "user")]).is_err());
        assert!(cfg(&[("SMT_USER", "user"), ("SMT_PASSWORD", "")]).is_err());
    }

    #[test]
    fn sinks_are_disabled_without_their_settings() {
        let c = cfg(&CREDS).unwrap();
        assert!(c.mqtt.is_none());
        assert!(c.database.is_none());
        assert!(!c.schedule.interval_enabled);
        assert_eq!(c.portal.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn defaults_fill_optional_settings() {
        let mut vars = CREDS.to_vec();
        vars.extend([("SMT_MQTT_HOST", "broker.local"), ("SMT_DB_URL", "postgres://db/smt")]);
        let c = cfg(&vars).unwrap();

        let mqtt = c.mqtt.unwrap();
        assert_eq!(mqtt.port, 1883);
        assert_eq!(mqtt.topic, "smt/meter");

        let db = c.database.unwrap();
        assert_eq!(db.meter_table, "smt_meter");
        assert_eq!(db.interval_table, "smt_meter_interval");
    }

    #[test]
    fn invalid_port_falls_back_to_default() {
        let mut vars = CREDS.to_vec();
        vars.extend([("SMT_MQTT_HOST", "broker.local"), ("SMT_MQTT_PORT", "mqtt")]);
        assert_eq!(cfg(&vars).unwrap().mqtt.unwrap().port, 1883);
    }

    #[test]
    fn zero_pool_size_and_timeouts_fall_back_to_defaults() {
        let mut vars = CREDS.to_vec();
        vars.extend([
            ("SMT_DB_URL", "postgres://db/smt"),
            ("SMT_DB_MAX_CONNECTIONS", "0"),
            ("SMT_SINK_TIMEOUT_SECS", "0"),
            ("SMT_HTTP_TIMEOUT_SECS", "0"),
            ("SMT_READ_POLL_ATTEMPTS", "0"),
        ]);
        let c = cfg(&vars).unwrap();

        assert_eq!(c.database.unwrap().max_connections, 2);
        assert_eq!(c.schedule.sink_timeout, Duration::from_secs(30));
        assert_eq!(c.portal.read.request_timeout, Duration::from_secs(30));
        assert_eq!(c.portal.read.poll_attempts, 90);
    }

    #[test]
    fn interval_flag_accepts_common_spellings() {
        for (raw, expected) in [("1", true), ("true", true), ("ON", true), ("0", false), ("maybe", false)] {
            let mut vars = CREDS.to_vec();
            vars.push(("SMT_INTERVAL_ENABLED", raw));
            assert_eq!(cfg(&vars).unwrap().schedule.interval_enabled, expected, "{raw}");
        }
    }

    #[test]
    fn unsafe_table_name_is_rejected() {
        let mut vars = CREDS.to_vec();
        vars.extend([("SMT_DB_URL", "postgres://db/smt"), ("SMT_DB_TABLE", "meter; drop")]);
        assert!(cfg(&vars).is_err());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let mut vars = CREDS.to_vec();
        vars.extend([
            ("SMT_DB_URL", "postgres://u:dbpass@db/smt"),
            ("SMT_MQTT_HOST", "broker.local"),
            ("SMT_MQTT_PASSWORD", "mqttpass"),
        ]);
        let dbg = format!("{:?}", cfg(&vars).unwrap());
        assert!(!dbg.contains("secret"));
        assert!(!dbg.contains("dbpass"));
        assert!(!dbg.contains("mqttpass"));
    }
}
