//! Push message decoding and change-to-call matching.
//!
//! Invalidation is by entity type: a change to any `com.acme.User` makes every
//! engaged call returning `com.acme.User` or `com.acme.User[]` stale, whatever
//! record actually changed.

use std::{
    collections::BTreeMap,
    sync::{Arc, LazyLock},
};

use chrono::{DateTime, FixedOffset};
use livebroker_schemas::{ChangeKind, TopicLayout};
use regex::Regex;
use serde_json::Value;

use crate::{broker::BrokerInner, push::PushFrame};

static DATE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([0-9]{4}-[0-9]{2}-[0-9]{2})T([0-9]{2}:[0-9]{2})(:[0-9]{2}(?:\.[0-9]{1,9})?)?([Zz]|[+-][0-9]{2}:?[0-9]{2})?$",
    )
        .expect("date-time pattern")
});

/// A decoded push body: JSON, except that date-time strings become dates.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Date(DateTime<FixedOffset>),
    Array(Vec<Payload>),
    Object(BTreeMap<String, Payload>),
}

impl Payload {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Payload> {
        match self {
            Payload::Object(m) => m.get(key),
            _ => None,
        }
    }

    /// Back to plain JSON. Dates are written in RFC 3339 form.
    pub fn to_json(&self) -> Value {
        match self {
            Payload::Null => Value::Null,
            Payload::Bool(b) => Value::Bool(*b),
            Payload::Number(n) => Value::Number(n.clone()),
            Payload::String(s) => Value::String(s.clone()),
            Payload::Date(d) => Value::String(d.to_rfc3339()),
            Payload::Array(xs) => Value::Array(xs.iter().map(Payload::to_json).collect()),
            Payload::Object(m) => Value::Object(
                m.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Payload::Null,
            Value::Bool(b) => Payload::Bool(b),
            Value::Number(n) => Payload::Number(n),
            Value::String(s) => match parse_date_time(&s) {
                Some(d) => Payload::Date(d),
                None => Payload::String(s),
            },
            Value::Array(xs) => Payload::Array(xs.into_iter().map(Payload::from).collect()),
            Value::Object(m) => {
                Payload::Object(m.into_iter().map(|(k, v)| (k, Payload::from(v))).collect())
            }
        }
    }
}

/// Parses an ISO-8601 date-time. Seconds and offset are optional; a missing
/// offset means UTC.
pub fn parse_date_time(s: &str) -> Option<DateTime<FixedOffset>> {
    let caps = DATE_TIME.captures(s)?;
    let seconds = caps.get(3).map_or(":00", |m| m.as_str());
    let offset = match caps.get(4).map(|m| m.as_str()) {
        None | Some("Z") | Some("z") => "Z".to_owned(),
        Some(o) if o.contains(':') => o.to_owned(),
        Some(o) => {
            let mut chars = o.chars();
            let sign = chars.next()?;
            let hours: String = chars.by_ref().take(2).collect();
            let minutes: String = chars.collect();
            format!("{sign}{hours}:{minutes}")
        }
    };
    let normalized = format!("{}T{}{}{}", &caps[1], &caps[2], seconds, offset);
    DateTime::parse_from_rfc3339(&normalized).ok()
}

/// A change announced by the push channel.
#[derive(Clone, Debug, PartialEq)]
pub struct PushEvent {
    pub entity_type: String,
    pub kind: Option<ChangeKind>,
    pub payload: Payload,
}

/// Decodes one push message. Returns `None` if the message names no entity
/// type.
///
/// A JSON object names its type under `type_field`; a JSON string, or a body
/// that is not JSON at all, is itself the type name. The change kind comes
/// from the topic when the layout has one topic per kind, otherwise from an
/// optional `kind` field.
pub fn decode(topic: &str, body: &str, layout: TopicLayout, type_field: &str) -> Option<PushEvent> {
    let body = body.trim();
    let (entity_type, payload) = match serde_json::from_str::<Value>(body) {
        Ok(Value::String(s)) => (s.clone(), Payload::String(s)),
        Ok(v @ Value::Object(_)) => {
            let payload = Payload::from(v);
            let entity_type = payload.get(type_field)?.as_str()?.to_owned();
            (entity_type, payload)
        }
        Ok(_) => return None,
        Err(_) if body.is_empty() => return None,
        Err(_) => (body.to_owned(), Payload::String(body.to_owned())),
    };
    if entity_type.is_empty() {
        return None;
    }
    let kind = layout.kind_of(topic).or_else(|| {
        payload
            .get("kind")
            .and_then(Payload::as_str)
            .and_then(ChangeKind::parse)
    });
    Some(PushEvent {
        entity_type,
        kind,
        payload,
    })
}

impl BrokerInner {
    /// Reinvokes every engaged call made stale by `frame`. Returns how many
    /// calls were reinvoked.
    pub(crate) fn on_push_message(self: &Arc<Self>, frame: &PushFrame) -> usize {
        let cf = &self.config;
        let Some(event) = decode(&frame.topic, &frame.body, cf.topics(), cf.type_field()) else {
            log::warn!("ignoring push message on {} without an entity type", frame.topic);
            return 0;
        };
        let stale = self.registry().stale(&event.entity_type);
        log::debug!(
            "{} change to {} refreshes {} call(s)",
            event.kind.map_or("unspecified", |k| k.as_str()),
            event.entity_type,
            stale.len()
        );
        let n = stale.len();
        for call in stale {
            let inner = self.clone();
            tokio::spawn(async move {
                inner.invoker.invoke(call.id, call.args, call.observer).await;
            });
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};
    use serde_json::json;

    use super::*;

    #[test]
    fn date_time_strings_become_dates() {
        let p = Payload::from(json!({
            "createdAt": "2024-03-05T10:15:30",
            "name": "hello",
            "history": ["2024-03-05T10:15:30.250+01:00", "2024-03-05"],
        }));
        match p.get("createdAt") {
            Some(Payload::Date(d)) => {
                assert_eq!((d.year(), d.month(), d.day()), (2024, 3, 5));
                assert_eq!((d.hour(), d.minute(), d.second()), (10, 15, 30));
                assert_eq!(d.offset().local_minus_utc(), 0);
            }
            other => panic!("expected a date, got {other:?}"),
        }
        assert_eq!(p.get("name"), Some(&Payload::String("hello".to_owned())));
        match p.get("history") {
            Some(Payload::Array(xs)) => {
                assert!(matches!(&xs[0], Payload::Date(d) if d.offset().local_minus_utc() == 3600));
                assert_eq!(xs[1], Payload::String("2024-03-05".to_owned()));
            }
            other => panic!("expected an array, got {other:?}"),
        }
    }

    #[test]
    fn date_time_variants() {
        assert!(parse_date_time("2024-03-05T10:15").is_some());
        assert!(parse_date_time("2024-03-05T10:15:30Z").is_some());
        assert_eq!(
            parse_date_time("2024-03-05T10:15:30+0530").map(|d| d.offset().local_minus_utc()),
            Some(5 * 3600 + 30 * 60)
        );
        assert!(parse_date_time("2024-13-05T10:15:30").is_none());
        assert!(parse_date_time("hello").is_none());
        assert!(parse_date_time(" 2024-03-05T10:15:30").is_none());
    }

    #[test]
    fn non_ascii_digits_are_not_dates() {
        assert_eq!(parse_date_time("2024-03-05T10:15:30+०५३०"), None);
        assert_eq!(parse_date_time("२०२४-03-05T10:15:30Z"), None);

        let body = r#"{"type": "com.acme.Order", "at": "2024-03-05T10:15:30+०५३०"}"#;
        let e = decode("/topic/entities", body, TopicLayout::Generic, "type").unwrap();
        assert_eq!(
            e.payload.get("at"),
            Some(&Payload::String("2024-03-05T10:15:30+०५३०".to_owned()))
        );
    }

    #[test]
    fn raw_body_is_the_entity_type() {
        let e = decode("/topic/entities", "com.acme.User\n", TopicLayout::Generic, "type").unwrap();
        assert_eq!(e.entity_type, "com.acme.User");
        assert_eq!(e.kind, None);

        let e = decode("/topic/entities", "\"com.acme.User\"", TopicLayout::Generic, "type").unwrap();
        assert_eq!(e.entity_type, "com.acme.User");
    }

    #[test]
    fn object_body_carries_type_and_kind() {
        let body = r#"{"type": "com.acme.User", "kind": "deleted", "id": 7}"#;
        let e = decode("/topic/entities", body, TopicLayout::Generic, "type").unwrap();
        assert_eq!(e.entity_type, "com.acme.User");
        assert_eq!(e.kind, Some(ChangeKind::Deleted));
        assert_eq!(e.payload.get("id").map(Payload::to_json), Some(json!(7)));
    }

    #[test]
    fn per_kind_topic_decides_the_kind() {
        let body = r#"{"entity": "com.acme.User", "kind": "deleted"}"#;
        let e = decode("/topic/entities/updated", body, TopicLayout::PerKind, "entity").unwrap();
        assert_eq!(e.entity_type, "com.acme.User");
        assert_eq!(e.kind, Some(ChangeKind::Updated));
    }

    #[test]
    fn messages_without_a_type_are_rejected() {
        for body in ["", "   ", "42", "[]", r#"{"id": 7}"#, r#"{"type": 3}"#, r#""""#] {
            assert_eq!(decode("/topic/entities", body, TopicLayout::Generic, "type"), None);
        }
    }
}
