//! In-memory transport used by unit tests across the crate.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::{
    domain::{
        AuthChallenge, Channel, ChannelId, ChannelRef, Dialog, DialogSnapshot, HistoryPage,
        Message, MessageId, Peer,
    },
    transport::{
        port::{Connector, Transport},
        types::{Request, Response},
    },
    Error, Result,
};

#[derive(Default)]
struct FakeState {
    snapshot: DialogSnapshot,
    /// Channel history, newest first.
    histories: HashMap<ChannelId, Vec<Message>>,
    list_dialogs_failures: VecDeque<Error>,
    history_failure_at_offset: Option<(u32, String)>,
    authorized: bool,
    submitted_codes: Vec<String>,
    code_requests: Vec<String>,
    history_calls: Vec<(ChannelRef, u32, u32)>,
    requests: Vec<Request>,
    read_channels: HashMap<ChannelId, MessageId>,
    /// Remote calls in order, with the (possibly paused) clock at call time.
    timeline: Vec<(Instant, &'static str)>,
    connects: usize,
    disconnects: usize,
}

#[derive(Default)]
pub(crate) struct FakeTransport {
    state: Mutex<FakeState>,
}

impl FakeTransport {
    pub(crate) fn authorized() -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().authorized = true;
        fake
    }

    pub(crate) fn add_channel(&self, id: i64, title: &str, unread: u32) {
        let mut st = self.state.lock().unwrap();
        st.snapshot.channels.push(Channel {
            id: ChannelId(id),
            access_hash: Some(id * 1000),
            title: title.to_string(),
        });
        st.snapshot.dialogs.push(Dialog {
            peer: Peer::Channel(ChannelId(id)),
            unread_count: unread,
        });
    }

    /// Set history newest first.
    pub(crate) fn set_history(&self, channel: i64, messages: Vec<Message>) {
        self.state
            .lock()
            .unwrap()
            .histories
            .insert(ChannelId(channel), messages);
    }

    pub(crate) fn fail_list_dialogs(&self, err: Error) {
        self.state
            .lock()
            .unwrap()
            .list_dialogs_failures
            .push_back(err);
    }

    pub(crate) fn fail_history_at_offset(&self, offset: u32, msg: &str) {
        self.state.lock().unwrap().history_failure_at_offset = Some((offset, msg.to_string()));
    }

    pub(crate) fn requests(&self) -> Vec<Request> {
        self.state.lock().unwrap().requests.clone()
    }

    pub(crate) fn forwards(&self) -> Vec<(ChannelRef, ChannelRef, Vec<MessageId>)> {
        self.requests()
            .into_iter()
            .filter_map(|r| match r {
                Request::ForwardMessages { from, to, ids, .. } => Some((from, to, ids)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn read_marks(&self) -> Vec<(ChannelRef, MessageId)> {
        self.requests()
            .into_iter()
            .filter_map(|r| match r {
                Request::ReadHistory { channel, max_id } => Some((channel, max_id)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn read_state(&self, channel: i64) -> Option<MessageId> {
        self.state
            .lock()
            .unwrap()
            .read_channels
            .get(&ChannelId(channel))
            .copied()
    }

    pub(crate) fn history_calls(&self) -> Vec<(ChannelRef, u32, u32)> {
        self.state.lock().unwrap().history_calls.clone()
    }

    pub(crate) fn code_requests(&self) -> Vec<String> {
        self.state.lock().unwrap().code_requests.clone()
    }

    pub(crate) fn submitted_codes(&self) -> Vec<String> {
        self.state.lock().unwrap().submitted_codes.clone()
    }

    pub(crate) fn timeline(&self) -> Vec<(Instant, &'static str)> {
        self.state.lock().unwrap().timeline.clone()
    }

    pub(crate) fn unread_count(&self, channel: i64) -> Option<u32> {
        self.state
            .lock()
            .unwrap()
            .snapshot
            .dialogs
            .iter()
            .find(|d| d.peer == Peer::Channel(ChannelId(channel)))
            .map(|d| d.unread_count)
    }

    pub(crate) fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub(crate) fn disconnects(&self) -> usize {
        self.state.lock().unwrap().disconnects
    }
}

pub(crate) fn text_message(id: i32, text: &str, date: i64) -> Message {
    Message {
        id: MessageId(id),
        text: Some(text.to_string()),
        forwarded_from: None,
        date,
    }
}

/// Pin, join or title change: has an id but no body.
pub(crate) fn service_message(id: i32, date: i64) -> Message {
    Message {
        id: MessageId(id),
        text: None,
        forwarded_from: None,
        date,
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn list_dialogs(&self) -> Result<DialogSnapshot> {
        let mut st = self.state.lock().unwrap();
        st.timeline.push((Instant::now(), "messages.getDialogs"));
        if let Some(err) = st.list_dialogs_failures.pop_front() {
            return Err(err);
        }
        if !st.authorized {
            return Err(Error::Auth("AUTH_KEY_UNREGISTERED".to_string()));
        }
        Ok(st.snapshot.clone())
    }

    async fn get_history(
        &self,
        channel: ChannelRef,
        offset: u32,
        limit: u32,
    ) -> Result<HistoryPage> {
        let mut st = self.state.lock().unwrap();
        st.history_calls.push((channel, offset, limit));
        st.timeline.push((Instant::now(), "messages.getHistory"));
        if let Some((at, msg)) = &st.history_failure_at_offset {
            if *at == offset {
                return Err(Error::Transport(msg.clone()));
            }
        }
        let all = st.histories.get(&channel.id).cloned().unwrap_or_default();
        let messages = all
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(HistoryPage {
            messages,
            total_count: all.len() as u32,
        })
    }

    async fn send(&self, request: Request) -> Result<Response> {
        let mut st = self.state.lock().unwrap();
        st.timeline.push((Instant::now(), request.method()));
        let response = match &request {
            Request::ForwardMessages { .. } => Response::Updates,
            Request::ReadHistory { channel, max_id } => {
                let entry = st.read_channels.entry(channel.id).or_insert(*max_id);
                if *max_id > *entry {
                    *entry = *max_id;
                }
                let read_up_to = *entry;
                let unread = st
                    .histories
                    .get(&channel.id)
                    .map(|h| h.iter().filter(|m| m.id > read_up_to).count() as u32)
                    .unwrap_or(0);
                let peer = Peer::Channel(channel.id);
                if let Some(d) = st.snapshot.dialogs.iter_mut().find(|d| d.peer == peer) {
                    d.unread_count = unread;
                }
                Response::Bool(true)
            }
        };
        st.requests.push(request);
        Ok(response)
    }

    async fn request_code(&self, phone_number: &str) -> Result<AuthChallenge> {
        self.state
            .lock()
            .unwrap()
            .code_requests
            .push(phone_number.to_string());
        Ok(AuthChallenge {
            phone_number: phone_number.to_string(),
            phone_code_hash: "hash".to_string(),
        })
    }

    async fn submit_code(&self, challenge: &AuthChallenge, code: &str) -> Result<()> {
        if challenge.phone_code_hash != "hash" {
            return Err(Error::Auth("PHONE_CODE_EXPIRED".to_string()));
        }
        let mut st = self.state.lock().unwrap();
        st.submitted_codes.push(code.to_string());
        st.authorized = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.lock().unwrap().disconnects += 1;
        Ok(())
    }
}

/// Hands out the same fake for every connection.
pub(crate) struct FakeConnector {
    fake: Arc<FakeTransport>,
}

impl FakeConnector {
    pub(crate) fn new(fake: Arc<FakeTransport>) -> Self {
        Self { fake }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Arc<dyn Transport>> {
        self.fake.state.lock().unwrap().connects += 1;
        Ok(self.fake.clone())
    }
}
