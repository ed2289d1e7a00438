//! Broker configuration, either built in code or loaded from a TOML file.

use std::{collections::HashMap, path::Path, time::Duration};

use livebroker_schemas::{ConfigToml, MethodReturnTypes, TopicLayout};

use crate::{
    error::{Error, Result},
    retry::{DEFAULT_RECONNECT, Retry},
};

pub const DEFAULT_TYPE_FIELD: &str = "type";

/// Where the RPC facade and the push channel live, and whether calls are kept
/// live by push events.
#[derive(Clone, Debug)]
pub struct BrokerConfiguration {
    path: String,
    real_time: bool,
    stomp_path: Option<String>,
    topics: TopicLayout,
    type_field: String,
    reconnect: Retry,
    request_timeout: Option<Duration>,
}

impl BrokerConfiguration {
    /// Calls run once and their streams complete.
    pub fn one_shot<S: Into<String>>(path: S) -> BrokerConfiguration {
        BrokerConfiguration {
            path: trim_path(path.into()),
            real_time: false,
            stomp_path: None,
            topics: TopicLayout::default(),
            type_field: DEFAULT_TYPE_FIELD.to_owned(),
            reconnect: DEFAULT_RECONNECT,
            request_timeout: None,
        }
    }

    /// Calls are re-run whenever the push channel at `stomp_path` announces a
    /// change to the entity type they return.
    pub fn real_time<S: Into<String>, T: Into<String>>(
        path: S,
        stomp_path: T,
    ) -> BrokerConfiguration {
        BrokerConfiguration {
            real_time: true,
            stomp_path: Some(stomp_path.into()),
            ..Self::one_shot(path)
        }
    }

    pub fn with_topics(mut self, topics: TopicLayout) -> BrokerConfiguration {
        self.topics = topics;
        self
    }

    pub fn with_type_field<S: Into<String>>(mut self, field: S) -> BrokerConfiguration {
        self.type_field = field.into();
        self
    }

    pub fn with_reconnect(mut self, reconnect: Retry) -> BrokerConfiguration {
        self.reconnect = reconnect;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> BrokerConfiguration {
        self.request_timeout = Some(timeout);
        self
    }

    /// Base URL of the RPC facade, without a trailing slash.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_real_time(&self) -> bool {
        self.real_time
    }

    pub fn stomp_path(&self) -> Option<&str> {
        self.stomp_path.as_deref()
    }

    pub fn topics(&self) -> TopicLayout {
        self.topics
    }

    pub fn type_field(&self) -> &str {
        &self.type_field
    }

    pub fn reconnect(&self) -> &Retry {
        &self.reconnect
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(Error::Config("broker path is empty".to_owned()));
        }
        if self.real_time && self.stomp_path.as_deref().is_none_or(str::is_empty) {
            return Err(Error::Config(
                "real-time mode requires a stomp_path".to_owned(),
            ));
        }
        if self.type_field.is_empty() {
            return Err(Error::Config("type_field is empty".to_owned()));
        }
        Ok(())
    }
}

fn trim_path(path: String) -> String {
    path.trim_end_matches('/').to_owned()
}

/// A configuration file: the broker settings plus the return-type tables of
/// every known service.
#[derive(Clone, Debug)]
pub struct LoadedConfig {
    pub broker: BrokerConfiguration,
    pub types: HashMap<String, MethodReturnTypes>,
}

impl LoadedConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<LoadedConfig> {
        let path = path.as_ref();
        log::debug!("loading broker config from {}", path.display());
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    pub fn from_toml_str(s: &str) -> Result<LoadedConfig> {
        let raw: ConfigToml = toml::from_str(s)?;
        Self::from_toml(raw)
    }

    pub fn from_toml(raw: ConfigToml) -> Result<LoadedConfig> {
        let b = raw.broker;
        let mut broker = match b.real_time {
            true => BrokerConfiguration::real_time(b.path, b.stomp_path.unwrap_or_default()),
            false => {
                let mut cf = BrokerConfiguration::one_shot(b.path);
                cf.stomp_path = b.stomp_path;
                cf
            }
        }
        .with_topics(b.topics);

        if let Some(field) = b.type_field {
            broker = broker.with_type_field(field);
        }

        let delay = b
            .reconnect_delay_ms
            .unwrap_or(DEFAULT_RECONNECT.base_delay().as_millis() as u64);
        let mut reconnect = match b.reconnect_jitter_ms {
            Some(j) => {
                let max = delay.checked_add(j).ok_or_else(|| {
                    Error::Config(format!("reconnect jitter of {j}ms is out of range"))
                })?;
                Retry::delay_jitter_millis(delay..=max)
            }
            None => Retry::delay_millis(delay),
        };
        if b.reconnect_backoff {
            reconnect = reconnect.with_backoff();
        }
        broker = broker.with_reconnect(reconnect);

        if let Some(ms) = b.request_timeout_ms {
            broker = broker.with_request_timeout(Duration::from_millis(ms));
        }

        broker.validate()?;
        Ok(LoadedConfig {
            broker,
            types: raw.types,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slashes_are_removed() {
        let cf = BrokerConfiguration::one_shot("http://host/broker//");
        assert_eq!(cf.path(), "http://host/broker");
        assert!(cf.validate().is_ok());
    }

    #[test]
    fn real_time_requires_stomp_path() {
        let raw = r#"
            [broker]
            path = "/broker"
            real_time = true
        "#;
        match LoadedConfig::from_toml_str(raw) {
            Err(Error::Config(msg)) => assert!(msg.contains("stomp_path")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn file_settings_are_applied() {
        let raw = r#"
            [broker]
            path = "/broker/"
            real_time = true
            stomp_path = "/ws"
            topics = "per_kind"
            type_field = "entity"
            reconnect_delay_ms = 250

            [types.userService]
            findAll = "com.acme.User[]"
        "#;
        let cf = LoadedConfig::from_toml_str(raw).unwrap();
        assert_eq!(cf.broker.path(), "/broker");
        assert!(cf.broker.is_real_time());
        assert_eq!(cf.broker.stomp_path(), Some("/ws"));
        assert_eq!(cf.broker.topics(), TopicLayout::PerKind);
        assert_eq!(cf.broker.type_field(), "entity");
        assert_eq!(cf.broker.reconnect(), &Retry::delay_millis(250));
        assert_eq!(cf.types["userService"]["findAll"], "com.acme.User[]");
    }

    #[test]
    fn jitter_overflow_is_rejected() {
        let mut raw: ConfigToml = toml::from_str(
            r#"
            [broker]
            path = "/broker"
            reconnect_delay_ms = 100
            reconnect_jitter_ms = 50
        "#,
        )
        .unwrap();
        let cf = LoadedConfig::from_toml(raw.clone()).unwrap();
        assert_eq!(cf.broker.reconnect(), &Retry::delay_jitter_millis(100..=150));

        raw.broker.reconnect_jitter_ms = Some(u64::MAX);
        match LoadedConfig::from_toml(raw) {
            Err(Error::Config(msg)) => assert!(msg.contains("jitter")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            LoadedConfig::from_toml_str("[broker"),
            Err(Error::Parse(_))
        ));
    }
}
