//! The unit of communication carried on a stream: a request or a reply.

use std::collections::HashMap;

use deadpool_redis::redis::Value;
use rand::Rng;

use crate::error::{Error, Result};

/// Lifecycle state of an [`Entry`]. `Pending` is the only non-terminal
/// value; `Fulfilled`/`Rejected` are produced by [`Entry::fulfilled`] /
/// [`Entry::rejected`] and never transition further. `Invalid` is never
/// produced by this crate's own code — it is the sentinel
/// [`Entry::from_fields`] assigns to a stream entry whose `status` field
/// is not one of the three wire values, so a malformed entry still
/// becomes a constructible `Entry` a worker can classify and purge
/// instead of a parse error that leaves it stuck in the PEL forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Fulfilled,
    Rejected,
    Invalid,
}

impl Status {
    fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Fulfilled => "fulfilled",
            Status::Rejected => "rejected",
            Status::Invalid => "invalid",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(Status::Pending),
            "fulfilled" => Ok(Status::Fulfilled),
            "rejected" => Ok(Status::Rejected),
            other => Err(Error::InvalidStatus(other.to_string())),
        }
    }
}

/// One request or reply message. Immutable — [`Entry::fulfilled`] and
/// [`Entry::rejected`] return a new value rather than mutating `self`.
/// Equality is by `id` alone: a reply is "the same entry" as its request.
#[derive(Debug, Clone)]
pub struct Entry {
    id: String,
    redis_id: Option<String>,
    status: Status,
    content: String,
    source_group: String,
    destination_group: String,
    instance_id: Option<String>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Entry {}

/// Generates a fresh 32-character hex correlation id.
fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.r#gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl Entry {
    /// Build a new pending request entry, generating a correlation id.
    pub fn new_request(
        content: impl Into<String>,
        source_group: impl Into<String>,
        destination_group: impl Into<String>,
        instance_id: Option<String>,
    ) -> Self {
        Entry {
            id: generate_id(),
            redis_id: None,
            status: Status::Pending,
            content: content.into(),
            source_group: source_group.into(),
            destination_group: destination_group.into(),
            instance_id,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn redis_id(&self) -> Option<&str> {
        self.redis_id.as_deref()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn source_group(&self) -> &str {
        &self.source_group
    }

    pub fn destination_group(&self) -> &str {
        &self.destination_group
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    pub fn with_redis_id(mut self, redis_id: impl Into<String>) -> Self {
        self.redis_id = Some(redis_id.into());
        self
    }

    /// True once this entry has reached a terminal status. `Invalid` is
    /// not terminal in this sense — it is classified and purged before a
    /// worker ever asks whether it is a reply.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, Status::Fulfilled | Status::Rejected)
    }

    /// True for a malformed entry whose `status` field did not parse.
    pub fn is_invalid(&self) -> bool {
        matches!(self.status, Status::Invalid)
    }

    /// Produce the fulfilled reply to this entry: source/destination swap,
    /// id and instance id are preserved, content is replaced, and
    /// `redis_id` is cleared since the reply is not yet published.
    pub fn fulfilled(&self, content: impl Into<String>) -> Self {
        self.reply(Status::Fulfilled, content)
    }

    /// Produce the rejected reply to this entry. See [`Entry::fulfilled`].
    pub fn rejected(&self, content: impl Into<String>) -> Self {
        self.reply(Status::Rejected, content)
    }

    fn reply(&self, status: Status, content: impl Into<String>) -> Self {
        Entry {
            id: self.id.clone(),
            redis_id: None,
            status,
            content: content.into(),
            source_group: self.destination_group.clone(),
            destination_group: self.source_group.clone(),
            instance_id: self.instance_id.clone(),
        }
    }

    /// Field-value pairs as written to the stream with `XADD`. `redis_id`
    /// is never included; Redis assigns it.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("id", self.id.clone()),
            ("status", self.status.as_str().to_string()),
            ("content", self.content.clone()),
            ("source_group", self.source_group.clone()),
            ("destination_group", self.destination_group.clone()),
        ];
        if let Some(instance_id) = &self.instance_id {
            fields.push(("instance_id", instance_id.clone()));
        }
        fields
    }

    /// Parse an entry back out of a stream field map (as produced by
    /// `StreamId::map`), plus the native stream id.
    pub fn from_fields(redis_id: &str, map: &HashMap<String, Value>) -> Result<Self> {
        let get = |key: &str| -> Result<String> {
            map.get(key)
                .and_then(value_as_string)
                .ok_or_else(|| Error::InvalidStatus(format!("entry missing field `{key}`")))
        };

        // An unparseable status does not fail the whole read: the entry
        // still needs an id and groups so a worker can ack+delete it by
        // `redis_id` rather than loop on the same parse error forever.
        let status = match Status::parse(&get("status")?) {
            Ok(status) => status,
            Err(_) => Status::Invalid,
        };

        Ok(Entry {
            id: get("id")?,
            redis_id: Some(redis_id.to_string()),
            status,
            content: get("content")?,
            source_group: get("source_group")?,
            destination_group: get("destination_group")?,
            instance_id: map.get("instance_id").and_then(value_as_string),
        })
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fulfilled_swaps_groups_and_preserves_id() {
        let request = Entry::new_request("ping", "parent", "child", Some("inst-1".to_string()));
        let reply = request.fulfilled("pong");

        assert_eq!(reply.id(), request.id());
        assert_eq!(reply.instance_id(), request.instance_id());
        assert_eq!(reply.source_group(), "child");
        assert_eq!(reply.destination_group(), "parent");
        assert_eq!(reply.content(), "pong");
        assert!(reply.is_terminal());
        assert!(reply.redis_id().is_none());
    }

    #[test]
    fn rejected_sets_terminal_status() {
        let request = Entry::new_request("q", "a", "b", None);
        let reply = request.rejected("no");
        assert!(matches!(reply.status(), Status::Rejected));
    }

    #[test]
    fn round_trips_through_fields() {
        let request = Entry::new_request("hi", "a", "b", Some("x".to_string()))
            .with_redis_id("1-0");
        let fields = request.to_fields();
        assert!(fields.iter().all(|(k, _)| *k != "redis_id"));

        let mut map = HashMap::new();
        for (k, v) in fields {
            map.insert(k.to_string(), Value::BulkString(v.into_bytes()));
        }

        let parsed = Entry::from_fields("1-0", &map).unwrap();
        assert_eq!(parsed.id(), request.id());
        assert_eq!(parsed.content(), "hi");
        assert_eq!(parsed.instance_id(), Some("x"));
    }

    #[test]
    fn unknown_status_becomes_invalid_sentinel_rather_than_failing_to_parse() {
        let mut map = HashMap::new();
        map.insert("id".into(), Value::BulkString(b"abc".to_vec()));
        map.insert("status".into(), Value::BulkString(b"bogus".to_vec()));
        map.insert("content".into(), Value::BulkString(b"x".to_vec()));
        map.insert("source_group".into(), Value::BulkString(b"a".to_vec()));
        map.insert("destination_group".into(), Value::BulkString(b"b".to_vec()));

        let entry = Entry::from_fields("1-0", &map).expect("a bad status must not fail the read");
        assert!(entry.is_invalid());
        assert!(!entry.is_terminal());
        assert_eq!(entry.redis_id(), Some("1-0"));
        assert_eq!(entry.id(), "abc");
    }

    #[test]
    fn missing_required_field_still_fails_to_parse() {
        let mut map = HashMap::new();
        map.insert("status".into(), Value::BulkString(b"pending".to_vec()));
        map.insert("content".into(), Value::BulkString(b"x".to_vec()));
        map.insert("source_group".into(), Value::BulkString(b"a".to_vec()));
        map.insert("destination_group".into(), Value::BulkString(b"b".to_vec()));

        let err = Entry::from_fields("1-0", &map).unwrap_err();
        assert!(matches!(err, Error::InvalidStatus(_)));
    }

    #[test]
    fn equality_is_by_id_alone() {
        let request = Entry::new_request("ping", "a", "b", None);
        let reply = request.fulfilled("pong");

        assert_eq!(request, reply);

        let unrelated = Entry::new_request("ping", "a", "b", None);
        assert_ne!(request, unrelated);
    }
}
