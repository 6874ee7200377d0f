//! Domain models as returned by the Parlor backend.
//!
//! Everything here is an immutable snapshot of what the server returned;
//! updates are modeled by re-fetching, never by mutating in place. Wire
//! tolerance (field aliases, author-as-id-or-object) is resolved at decode
//! time so the rest of the crate only ever sees canonical shapes.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Presence status of a user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    #[default]
    Offline,
    Away,
}

/// Coarse member role within a server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    #[default]
    Member,
}

/// Channel kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    #[default]
    Text,
    Voice,
    Forum,
}

impl ChannelKind {
    /// Wire name used in create-channel bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Text => "text",
            ChannelKind::Voice => "voice",
            ChannelKind::Forum => "forum",
        }
    }
}

/// Coarse permission checks derived from a member's role.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permission {
    SendMessages,
    DeleteMessages,
    ManageChannels,
    ManageServer,
    InviteUsers,
}

impl Permission {
    /// Whether a role grants this permission. Owners hold every permission.
    pub fn allows(&self, role: Role) -> bool {
        match self {
            Permission::SendMessages | Permission::InviteUsers => true,
            Permission::DeleteMessages | Permission::ManageChannels => {
                matches!(role, Role::Owner | Role::Admin)
            }
            Permission::ManageServer => matches!(role, Role::Owner),
        }
    }
}

/// The server (tenant) a client session is scoped to.
///
/// Fetched once during initialization and held for the session's lifetime.
#[derive(Clone, Debug, Deserialize)]
pub struct ServerInfo {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub member_count: u32,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A named conduit within a server holding an ordered sequence of messages.
#[derive(Clone, Debug, Deserialize)]
pub struct Channel {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub kind: ChannelKind,
    #[serde(default)]
    pub server_id: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A platform user.
#[derive(Clone, Debug, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub status: Presence,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl User {
    /// Build a placeholder user from a bare identifier.
    ///
    /// Message payloads sometimes carry only the author's id; the id then
    /// doubles as name and display name until a fuller record is fetched.
    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            display_name: Some(id.clone()),
            id,
            avatar_url: None,
            status: Presence::default(),
            roles: Vec::new(),
        }
    }

    /// Display name, falling back to the account name.
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

/// A user's membership in the session's server.
#[derive(Clone, Debug, Deserialize)]
pub struct Member {
    #[serde(default)]
    pub id: u64,
    pub user: User,
    #[serde(default)]
    pub role: Role,
    #[serde(default = "Utc::now")]
    pub joined_at: DateTime<Utc>,
}

/// A file attached to a message.
#[derive(Clone, Debug, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub content_type: String,
}

/// A message in a channel.
///
/// Message ids are monotonically increasing within a channel, so ordering
/// by id is chronological ordering; `Ord` is keyed on the id alone.
#[derive(Clone, Debug, Deserialize)]
#[serde(from = "MessageWire")]
pub struct Message {
    pub id: u64,
    pub channel_id: u64,
    pub author: User,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub attachments: Vec<Attachment>,
    /// Opaque embed payloads; not interpreted by the SDK.
    pub embeds: Vec<Value>,
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Message {}

impl PartialOrd for Message {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Message {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

/// The author field arrives either as a full user record or as a bare id.
#[derive(Deserialize)]
#[serde(untagged)]
enum AuthorWire {
    Full(User),
    Id(String),
}

#[derive(Deserialize)]
struct MessageWire {
    #[serde(default)]
    id: u64,
    #[serde(default, alias = "channelId")]
    channel_id: u64,
    #[serde(default)]
    author: Option<AuthorWire>,
    #[serde(default)]
    content: String,
    #[serde(default = "Utc::now", alias = "createdAt")]
    timestamp: DateTime<Utc>,
    #[serde(default)]
    edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    attachments: Vec<Attachment>,
    #[serde(default)]
    embeds: Vec<Value>,
}

impl From<MessageWire> for Message {
    fn from(wire: MessageWire) -> Self {
        let author = match wire.author {
            Some(AuthorWire::Full(user)) => user,
            Some(AuthorWire::Id(id)) => User::from_id(id),
            None => User::from_id("unknown"),
        };
        Self {
            id: wire.id,
            channel_id: wire.channel_id,
            author,
            content: wire.content,
            timestamp: wire.timestamp,
            edited_at: wire.edited_at,
            attachments: wire.attachments,
            embeds: wire.embeds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_author_as_full_record() {
        let msg: Message = serde_json::from_value(json!({
            "id": 77,
            "channel_id": 10,
            "author": {"id": "u1", "name": "alice", "status": "online"},
            "content": "hi",
            "timestamp": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(msg.id, 77);
        assert_eq!(msg.channel_id, 10);
        assert_eq!(msg.author.id, "u1");
        assert_eq!(msg.author.status, Presence::Online);
    }

    #[test]
    fn message_author_as_bare_id() {
        let msg: Message = serde_json::from_value(json!({
            "id": 77,
            "channelId": 10,
            "author": "u1",
            "content": "hi",
            "createdAt": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(msg.channel_id, 10);
        assert_eq!(msg.author.id, "u1");
        assert_eq!(msg.author.name, "u1");
        assert_eq!(msg.author.display_name(), "u1");
        assert_eq!(msg.timestamp.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn message_missing_author_becomes_unknown() {
        let msg: Message = serde_json::from_value(json!({
            "id": 1,
            "channel_id": 2,
            "content": "x",
            "timestamp": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(msg.author.id, "unknown");
    }

    #[test]
    fn id_order_is_chronological_order() {
        let mut messages: Vec<Message> = [5u64, 2, 9, 1]
            .iter()
            .map(|id| {
                serde_json::from_value(json!({
                    "id": id,
                    "channel_id": 1,
                    "author": "a",
                    "content": "",
                    "timestamp": "2024-01-01T00:00:00Z"
                }))
                .unwrap()
            })
            .collect();

        messages.sort();
        let ids: Vec<u64> = messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 5, 9]);
    }

    #[test]
    fn channel_defaults() {
        let ch: Channel = serde_json::from_value(json!({"id": 3, "name": "general"})).unwrap();
        assert_eq!(ch.kind, ChannelKind::Text);
        assert!(ch.description.is_empty());
    }

    #[test]
    fn member_wraps_user_with_default_role() {
        let m: Member = serde_json::from_value(json!({
            "id": 9,
            "user": {"id": "u2", "name": "bob"},
            "joined_at": "2024-02-02T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(m.role, Role::Member);
        assert_eq!(m.user.status, Presence::Offline);
    }
}
