use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Method name to the fully-qualified entity type it returns. Methods returning
/// a collection carry a `[]` suffix, e.g. `com.acme.User[]`.
pub type MethodReturnTypes = HashMap<String, String>;

/// The topic carrying every entity change when using [`TopicLayout::Generic`].
pub const ENTITIES_TOPIC: &str = "/topic/entities";

/// Strips the collection suffix from a declared return type.
pub fn entity_of(return_type: &str) -> &str {
    return_type.strip_suffix("[]").unwrap_or(return_type)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Persisted,
    Updated,
    Deleted,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 3] = [
        ChangeKind::Persisted,
        ChangeKind::Updated,
        ChangeKind::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Persisted => "persisted",
            ChangeKind::Updated => "updated",
            ChangeKind::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<ChangeKind> {
        ChangeKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
    }
}

/// How the server lays out its push topics.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicLayout {
    /// A single topic whose messages carry the entity type.
    #[default]
    Generic,
    /// One topic per change kind, e.g. `/topic/entities/updated`.
    PerKind,
}

impl TopicLayout {
    pub fn topics(&self) -> Vec<String> {
        match self {
            TopicLayout::Generic => vec![ENTITIES_TOPIC.to_owned()],
            TopicLayout::PerKind => ChangeKind::ALL
                .iter()
                .map(|k| format!("{}/{}", ENTITIES_TOPIC, k.as_str()))
                .collect(),
        }
    }

    /// The change kind implied by a topic, if the layout encodes one.
    pub fn kind_of(&self, topic: &str) -> Option<ChangeKind> {
        match self {
            TopicLayout::Generic => None,
            TopicLayout::PerKind => topic
                .strip_prefix(ENTITIES_TOPIC)
                .and_then(|rest| rest.strip_prefix('/'))
                .and_then(ChangeKind::parse),
        }
    }
}

/// The on-disk configuration file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigToml {
    pub broker: BrokerToml,
    #[serde(default)]
    pub types: HashMap<String, MethodReturnTypes>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrokerToml {
    pub path: String,
    #[serde(default)]
    pub real_time: bool,
    pub stomp_path: Option<String>,
    #[serde(default)]
    pub topics: TopicLayout,
    pub type_field: Option<String>,
    pub reconnect_delay_ms: Option<u64>,
    pub reconnect_jitter_ms: Option<u64>,
    #[serde(default)]
    pub reconnect_backoff: bool,
    pub request_timeout_ms: Option<u64>,
}
