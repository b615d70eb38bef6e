/// Telegram channel id (numeric, without the `-100` bot-API prefix).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ChannelId(pub i64);

/// Telegram message id (numeric, unique within a channel).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct MessageId(pub i32);

/// Minimal addressable handle for history/forward/read requests against a channel.
///
/// Access hashes may rotate on the remote side, so a reference is only valid
/// for the dialog snapshot it was resolved from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ChannelRef {
    pub id: ChannelId,
    pub access_hash: i64,
}

/// A channel as listed in the dialog snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    /// Absent for channels the account can see but not address (e.g. min constructors).
    pub access_hash: Option<i64>,
    pub title: String,
}

impl Channel {
    pub fn channel_ref(&self) -> Option<ChannelRef> {
        self.access_hash.map(|access_hash| ChannelRef {
            id: self.id,
            access_hash,
        })
    }
}

/// Peer a dialog points at. Only channels are triaged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Peer {
    Channel(ChannelId),
    Chat(i64),
    User(i64),
}

/// The polling account's view of one conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dialog {
    pub peer: Peer,
    pub unread_count: u32,
}

/// Dialog list plus the channel entities it references, fetched once per pass.
#[derive(Clone, Debug, Default)]
pub struct DialogSnapshot {
    pub dialogs: Vec<Dialog>,
    pub channels: Vec<Channel>,
}

impl DialogSnapshot {
    pub fn channel_by_id(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }

    pub fn channel_by_title(&self, title: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.title == title)
    }
}

/// A message as returned by a history fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    /// `None` for service messages (pins, joins) and media without caption.
    pub text: Option<String>,
    /// Channel the message was originally forwarded from, if any.
    pub forwarded_from: Option<ChannelId>,
    /// Unix timestamp (seconds).
    pub date: i64,
}

impl Message {
    /// Body text, treating an empty string the same as no text.
    pub fn body(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }
}

/// One page of channel history.
#[derive(Clone, Debug, Default)]
pub struct HistoryPage {
    pub messages: Vec<Message>,
    /// Total number of messages in the channel as reported by the remote.
    pub total_count: u32,
}

/// Authenticated session metadata, persisted by the bootstrapper.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Session {
    pub api_id: i32,
    pub session_id: String,
    pub phone_number: String,
    pub authorized_at: Option<String>,
}

/// Pending login: the remote sent a verification code to the configured phone.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AuthChallenge {
    pub phone_number: String,
    pub phone_code_hash: String,
}
