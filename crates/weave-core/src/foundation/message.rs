//! Message segments.
//!
//! A [`Message`] is an ordered list of [`Segment`]s, each a `{ type, data }`
//! pair. It serializes to the array-of-segments shape used by the chat
//! gateway:
//!
//! ```json
//! [
//!   { "type": "text",  "data": { "text": "hello " } },
//!   { "type": "at",    "data": { "qq": "10001" } }
//! ]
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

// ============================================================================
// Segment
// ============================================================================

/// A single unit of message content (text, image, mention, …).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Segment type identifier (e.g. `"text"`, `"image"`, `"at"`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Segment payload.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Segment {
    /// Creates a segment of an arbitrary type.
    pub fn new(kind: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// A plain text segment.
    pub fn text(text: impl Into<String>) -> Self {
        Self::with_field("text", "text", Value::String(text.into()))
    }

    /// A mention of `user_id`.
    pub fn at(user_id: i64) -> Self {
        Self::with_field("at", "qq", Value::String(user_id.to_string()))
    }

    /// An image referenced by file name, URL or base64 URI.
    pub fn image(file: impl Into<String>) -> Self {
        Self::with_field("image", "file", Value::String(file.into()))
    }

    /// A mention of everyone in the group.
    pub fn at_all() -> Self {
        Self::with_field("at", "qq", Value::String("all".into()))
    }

    /// A built-in face (emoji) by id.
    pub fn face(id: i64) -> Self {
        Self::with_field("face", "id", Value::String(id.to_string()))
    }

    /// A voice clip by file name, URL or base64 URI.
    pub fn record(file: impl Into<String>) -> Self {
        Self::with_field("record", "file", Value::String(file.into()))
    }

    /// A video by file name, URL or base64 URI.
    pub fn video(file: impl Into<String>) -> Self {
        Self::with_field("video", "file", Value::String(file.into()))
    }

    /// A reply to `message_id`.
    pub fn reply(message_id: i64) -> Self {
        Self::with_field("reply", "id", Value::String(message_id.to_string()))
    }

    /// A reference to a stored forward message.
    pub fn forward(id: i64) -> Self {
        Self::with_field("forward", "id", Value::String(id.to_string()))
    }

    /// A forward node re-posting an existing message.
    pub fn node(message_id: i64) -> Self {
        Self::with_field("node", "id", Value::String(message_id.to_string()))
    }

    /// A forward node with custom author and content.
    pub fn node_custom(user_id: i64, nickname: impl Into<String>, content: impl Into<Message>) -> Self {
        let mut data = Map::new();
        data.insert("user_id".into(), Value::String(user_id.to_string()));
        data.insert("nickname".into(), Value::String(nickname.into()));
        data.insert("content".into(), content.into().to_value());
        Self::new("node", data)
    }

    fn with_field(kind: &str, key: &str, value: Value) -> Self {
        let mut data = Map::new();
        data.insert(key.to_string(), value);
        Self::new(kind, data)
    }

    /// Returns `true` for text segments.
    pub fn is_text(&self) -> bool {
        self.kind == "text"
    }

    /// Returns the text if this is a text segment.
    pub fn as_text(&self) -> Option<&str> {
        if self.is_text() {
            self.data.get("text").and_then(Value::as_str)
        } else {
            None
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// An ordered sequence of segments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Vec<Segment>);

impl Message {
    /// Creates an empty message.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Parses the `message` field of an inbound payload.
    ///
    /// Arrays are read segment by segment (malformed entries are skipped);
    /// a bare string becomes a single text segment.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(text) => Self::from(text.as_str()),
            Value::Array(items) => Self(
                items
                    .iter()
                    .filter_map(|item| Segment::deserialize(item).ok())
                    .collect(),
            ),
            _ => Self::new(),
        }
    }

    /// Appends a segment.
    pub fn push(&mut self, segment: impl Into<Segment>) {
        self.0.push(segment.into());
    }

    /// Appends a segment (builder style).
    #[must_use]
    pub fn with(mut self, segment: impl Into<Segment>) -> Self {
        self.push(segment);
        self
    }

    /// Returns the segments.
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Iterates the segments.
    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.0.iter()
    }

    /// Returns the number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no segments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Concatenates the content of all text segments.
    pub fn plain_text(&self) -> String {
        self.0.iter().filter_map(Segment::as_text).collect()
    }

    /// Merges adjacent text segments and drops empty ones.
    #[must_use]
    pub fn compact(self) -> Self {
        let mut out: Vec<Segment> = Vec::with_capacity(self.0.len());
        for segment in self.0 {
            match segment.as_text() {
                Some("") => continue,
                Some(text) => {
                    if let Some(prev) = out.last_mut()
                        && let Some(prev_text) = prev.as_text()
                    {
                        let merged = format!("{prev_text}{text}");
                        *prev = Segment::text(merged);
                        continue;
                    }
                    out.push(segment);
                }
                None => out.push(segment),
            }
        }
        Self(out)
    }

    /// Serializes to the wire representation.
    pub fn to_value(&self) -> Value {
        json!(self.0)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self(vec![Segment::text(text)])
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self(vec![Segment::text(text)])
    }
}

impl From<Segment> for Message {
    fn from(segment: Segment) -> Self {
        Self(vec![segment])
    }
}

impl From<Vec<Segment>> for Message {
    fn from(segments: Vec<Segment>) -> Self {
        Self(segments)
    }
}

impl FromIterator<Segment> for Message {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Message {
    type Item = &'a Segment;
    type IntoIter = std::slice::Iter<'a, Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_value_array() {
        let value = json!([
            { "type": "text", "data": { "text": "hi " } },
            { "type": "at", "data": { "qq": "42" } },
            { "broken": true },
            { "type": "text", "data": { "text": "there" } }
        ]);
        let message = Message::from_value(&value);
        assert_eq!(message.len(), 3);
        assert_eq!(message.plain_text(), "hi there");
    }

    #[test]
    fn test_from_value_string() {
        let message = Message::from_value(&json!("/help me"));
        assert_eq!(message.segments(), &[Segment::text("/help me")]);
    }

    #[test]
    fn test_compact_merges_text() {
        let message = Message::new()
            .with(Segment::text("a"))
            .with(Segment::text(""))
            .with(Segment::text("b"))
            .with(Segment::at(1))
            .with(Segment::text("c"))
            .compact();
        assert_eq!(
            message.segments(),
            &[Segment::text("ab"), Segment::at(1), Segment::text("c")]
        );
    }

    #[test]
    fn test_media_and_forward_segments() {
        let message = Message::new()
            .with(Segment::at_all())
            .with(Segment::face(14))
            .with(Segment::record("voice.amr"))
            .with(Segment::video("https://example.com/clip.mp4"))
            .with(Segment::forward(7))
            .with(Segment::node(99))
            .with(Segment::node_custom(10001, "alice", "hi"));

        assert_eq!(
            message.to_value(),
            json!([
                { "type": "at", "data": { "qq": "all" } },
                { "type": "face", "data": { "id": "14" } },
                { "type": "record", "data": { "file": "voice.amr" } },
                { "type": "video", "data": { "file": "https://example.com/clip.mp4" } },
                { "type": "forward", "data": { "id": "7" } },
                { "type": "node", "data": { "id": "99" } },
                { "type": "node", "data": {
                    "user_id": "10001",
                    "nickname": "alice",
                    "content": [{ "type": "text", "data": { "text": "hi" } }]
                } }
            ])
        );
        assert_eq!(message.plain_text(), "");
    }

    #[test]
    fn test_wire_shape() {
        let value = Message::from("hey").to_value();
        assert_eq!(value, json!([{ "type": "text", "data": { "text": "hey" } }]));
    }
}
