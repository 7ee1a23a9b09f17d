//! Ready-made matchers for common conditions.
//!
//! Field lookups accept dotted paths into nested objects, so
//! `field_eq("sender.role", "admin")` inspects `payload["sender"]["role"]`.
//!
//! ```rust,ignore
//! on_message()
//!     .matcher(command(["/ping"]) & !from_users([10001]))
//!     .handler(pong);
//! ```

use std::collections::HashSet;

use serde_json::Value;
use weave_core::{Event, RawPayload};

use crate::matcher::Matcher;

fn lookup<'a>(data: &'a RawPayload, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = data.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

/// The payload value at `path` equals `value`.
pub fn field_eq(path: impl Into<String>, value: impl Into<Value>) -> Matcher {
    let path = path.into();
    let value = value.into();
    Matcher::new(move |event| lookup(event.data(), &path) == Some(&value))
}

/// The payload value at `path` is absent or differs from `value`.
pub fn field_ne(path: impl Into<String>, value: impl Into<Value>) -> Matcher {
    field_eq(path, value).invert()
}

/// The sender's group role (`owner`, `admin`, `member`) is `role`.
pub fn role_is(role: impl Into<String>) -> Matcher {
    field_eq("sender.role", role.into())
}

/// The event was triggered by one of `user_ids`.
pub fn from_users(user_ids: impl IntoIterator<Item = i64>) -> Matcher {
    let users: HashSet<i64> = user_ids.into_iter().collect();
    Matcher::new(move |event| event.user_id().is_some_and(|id| users.contains(&id)))
}

/// The event happened in one of `group_ids`.
pub fn in_groups(group_ids: impl IntoIterator<Item = i64>) -> Matcher {
    let groups: HashSet<i64> = group_ids.into_iter().collect();
    Matcher::new(move |event| event.group_id().is_some_and(|id| groups.contains(&id)))
}

/// The first whitespace-separated token of the message text is one of `names`.
pub fn command<I, S>(names: I) -> Matcher
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let names: HashSet<String> = names.into_iter().map(Into::into).collect();
    Matcher::new(move |event| {
        event
            .text()
            .split_whitespace()
            .next()
            .is_some_and(|head| names.contains(head))
    })
}

/// The message text contains any of `words`.
pub fn keyword<I, S>(words: I) -> Matcher
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let words: Vec<String> = words.into_iter().map(Into::into).collect();
    Matcher::new(move |event| {
        let text = event.text();
        words.iter().any(|word| text.contains(word.as_str()))
    })
}

/// The message text starts with `prefix`.
pub fn prefix(prefix: impl Into<String>) -> Matcher {
    let prefix = prefix.into();
    Matcher::new(move |event| event.text().starts_with(&prefix))
}

/// The message mentions the receiving bot account.
pub fn to_me() -> Matcher {
    Matcher::new(mentions_self)
}

fn mentions_self(event: &Event) -> bool {
    let self_id = event.self_id();
    event.message().iter().any(|segment| {
        segment.kind == "at"
            && match segment.data.get("qq") {
                Some(Value::String(qq)) => qq.parse::<i64>().ok() == Some(self_id),
                Some(Value::Number(qq)) => qq.as_i64() == Some(self_id),
                _ => false,
            }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weave_core::Bot;

    fn event(value: Value) -> Event {
        let Value::Object(map) = value else {
            unreachable!()
        };
        Event::from_payload(map, Bot::disabled())
    }

    fn group_message(text: &str, role: &str) -> Event {
        event(json!({
            "post_type": "message",
            "message_type": "group",
            "self_id": 1,
            "group_id": 100,
            "user_id": 7,
            "message": text,
            "sender": { "role": role }
        }))
    }

    #[test]
    fn test_role_matchers() {
        let admin = group_message("hi", "admin");
        let member = group_message("hi", "member");

        assert!(role_is("admin").matches(&admin));
        assert!(!role_is("admin").matches(&member));
        assert!(!field_ne("sender.role", "admin").matches(&admin));
        assert!(field_ne("sender.role", "admin").matches(&member));
    }

    #[test]
    fn test_field_ne_on_missing_field() {
        let e = event(json!({ "post_type": "notice" }));
        assert!(field_ne("sender.role", "admin").matches(&e));
        assert!(!field_eq("sender.role", "admin").matches(&e));
    }

    #[test]
    fn test_command_uses_first_token() {
        let e = group_message("/echo hello world", "member");
        assert!(command(["/echo", "/say"]).matches(&e));
        assert!(!command(["hello"]).matches(&e));
        assert!(prefix("/ec").matches(&e));
        assert!(keyword(["world"]).matches(&e));
    }

    #[test]
    fn test_user_and_group_sets() {
        let e = group_message("x", "member");
        assert!(from_users([7, 8]).matches(&e));
        assert!(!from_users([8]).matches(&e));
        assert!(in_groups([100]).matches(&e));
        assert!(!in_groups([101]).matches(&e));
    }

    #[test]
    fn test_to_me() {
        let mentioned = event(json!({
            "post_type": "message",
            "message_type": "group",
            "self_id": 1,
            "message": [
                { "type": "at", "data": { "qq": "1" } },
                { "type": "text", "data": { "text": " ping" } }
            ]
        }));
        let other = event(json!({
            "post_type": "message",
            "message_type": "group",
            "self_id": 1,
            "message": [{ "type": "at", "data": { "qq": "2" } }]
        }));
        assert!(to_me().matches(&mentioned));
        assert!(!to_me().matches(&other));
    }
}
