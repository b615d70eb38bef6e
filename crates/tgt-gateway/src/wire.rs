//! JSON shapes exchanged with the MTProto gateway, and their mapping onto
//! `tgt-core` domain types.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use tgt_core::{
    domain::{
        Channel, ChannelId, ChannelRef, Dialog, DialogSnapshot, HistoryPage, Message, MessageId,
        Peer,
    },
    errors::Error,
    transport::types::Request,
};

/// Envelope around every gateway response.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub ok: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<RpcError>,
}

/// MTProto RPC error as relayed by the gateway (e.g. `420 FLOOD_WAIT_30`).
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ConnectParams<'a> {
    pub api_id: i32,
    pub api_hash: &'a str,
    pub session: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct Connected {
    pub connection: String,
}

#[derive(Debug, Serialize)]
pub struct Call<'a> {
    pub connection: &'a str,
    pub method: &'a str,
    pub params: Value,
}

#[derive(Debug, Deserialize)]
struct WireDialogs {
    #[serde(default)]
    dialogs: Vec<WireDialog>,
    #[serde(default)]
    chats: Vec<WireChat>,
}

#[derive(Debug, Deserialize)]
struct WireDialog {
    peer: WirePeer,
    #[serde(default)]
    unread_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePeer {
    Channel { id: i64 },
    Chat { id: i64 },
    User { id: i64 },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireChat {
    Channel {
        id: i64,
        #[serde(default)]
        access_hash: Option<i64>,
        #[serde(default)]
        title: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireHistory {
    #[serde(default)]
    count: Option<u32>,
    #[serde(default)]
    messages: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: i32,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    date: i64,
    #[serde(default)]
    fwd_from: Option<WireFwdHeader>,
    /// Service messages (joins, pins) carry no body but still count as read.
    #[serde(default, rename = "_")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireFwdHeader {
    #[serde(default)]
    channel_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WireSentCode {
    phone_code_hash: String,
}

pub fn input_channel(c: ChannelRef) -> Value {
    json!({ "channel_id": c.id.0, "access_hash": c.access_hash })
}

pub fn history_params(c: ChannelRef, offset: u32, limit: u32) -> Value {
    json!({
        "peer": input_channel(c),
        "offset_id": 0,
        "add_offset": offset,
        "limit": limit,
    })
}

pub fn request_params(req: &Request) -> Value {
    match req {
        Request::ForwardMessages {
            from,
            to,
            ids,
            random_ids,
        } => json!({
            "from_peer": input_channel(*from),
            "to_peer": input_channel(*to),
            "id": ids.iter().map(|m| m.0).collect::<Vec<_>>(),
            "random_id": random_ids,
        }),
        Request::ReadHistory { channel, max_id } => json!({
            "channel": input_channel(*channel),
            "max_id": max_id.0,
        }),
    }
}

pub fn parse_dialogs(v: Value) -> Result<DialogSnapshot, Error> {
    let raw: WireDialogs = serde_json::from_value(v)?;
    let dialogs = raw
        .dialogs
        .into_iter()
        .map(|d| Dialog {
            peer: match d.peer {
                WirePeer::Channel { id } => Peer::Channel(ChannelId(id)),
                WirePeer::Chat { id } => Peer::Chat(id),
                WirePeer::User { id } => Peer::User(id),
            },
            unread_count: d.unread_count,
        })
        .collect();
    let channels = raw
        .chats
        .into_iter()
        .filter_map(|c| match c {
            WireChat::Channel {
                id,
                access_hash,
                title,
            } => Some(Channel {
                id: ChannelId(id),
                access_hash,
                title,
            }),
            WireChat::Other => None,
        })
        .collect();
    Ok(DialogSnapshot { dialogs, channels })
}

pub fn parse_history(v: Value) -> Result<HistoryPage, Error> {
    let raw: WireHistory = serde_json::from_value(v)?;
    let messages: Vec<Message> = raw
        .messages
        .into_iter()
        .map(|m| {
            let service = m.kind.as_deref() == Some("messageService");
            Message {
                id: MessageId(m.id),
                text: if service { None } else { m.message },
                forwarded_from: m.fwd_from.and_then(|f| f.channel_id).map(ChannelId),
                date: m.date,
            }
        })
        .collect();
    // Plain `messages.messages` has no count: the page is everything there is.
    let total_count = raw.count.unwrap_or(messages.len() as u32);
    Ok(HistoryPage {
        messages,
        total_count,
    })
}

pub fn parse_sent_code(v: Value) -> Result<String, Error> {
    let raw: WireSentCode = serde_json::from_value(v)?;
    Ok(raw.phone_code_hash)
}

/// Map an MTProto RPC error onto the core taxonomy.
pub fn map_rpc_error(e: &RpcError) -> Error {
    let msg = e.message.as_str();
    if e.code == 401
        || msg.starts_with("AUTH_KEY")
        || msg.starts_with("SESSION_")
        || msg == "USER_DEACTIVATED"
    {
        return Error::Auth(msg.to_string());
    }
    if e.code == 420 || msg.starts_with("FLOOD_WAIT") {
        let retry_after = msg
            .rsplit('_')
            .next()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);
        return Error::RateLimited { retry_after };
    }
    Error::Transport(format!("rpc error {}: {msg}", e.code))
}
