use crate::domain::{ChannelRef, MessageId};

/// Generic requests sent through [`super::port::Transport::send`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// `messages.forwardMessages`: copy `ids` from `from` into `to`.
    ///
    /// `random_ids` carries one fresh correlation id per forwarded message.
    ForwardMessages {
        from: ChannelRef,
        to: ChannelRef,
        ids: Vec<MessageId>,
        random_ids: Vec<i64>,
    },
    /// `channels.readHistory`: mark everything up to `max_id` as read.
    ReadHistory { channel: ChannelRef, max_id: MessageId },
}

impl Request {
    /// Build a forward request with fresh random ids.
    pub fn forward(from: ChannelRef, to: ChannelRef, ids: Vec<MessageId>) -> Self {
        let random_ids = ids.iter().map(|_| random_id()).collect();
        Self::ForwardMessages {
            from,
            to,
            ids,
            random_ids,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Request::ForwardMessages { .. } => "messages.forwardMessages",
            Request::ReadHistory { .. } => "channels.readHistory",
        }
    }
}

/// Response to a generic request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// Updates container (forward results); contents are not inspected.
    Updates,
    Bool(bool),
}

fn random_id() -> i64 {
    uuid::Uuid::new_v4().as_u64_pair().0 as i64
}
