//! Triage loop: pick one unread channel per pass, forward keyword matches,
//! mark the channel read.
//!
//! Work is bounded to a single channel per pass; together with the idle wait
//! this caps the request rate against the remote.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    classifier::{classify, KeywordSet},
    config::{ChannelNames, Config},
    domain::{Channel, ChannelRef, DialogSnapshot, Message, MessageId, Peer},
    pacing::{ConstantBackoff, Pacer},
    supervisor::{Supervisor, SupervisorStats},
    transport::{
        port::{with_connection, Connector, Transport},
        throttled::ThrottledConnector,
        types::Request,
    },
    Result,
};

/// What a single pass did. Benign no-ops are outcomes, not errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    NoCandidate,
    EmptyHistory {
        channel: String,
    },
    Processed {
        channel: String,
        fetched: usize,
        matched: usize,
        forward: ForwardOutcome,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ForwardOutcome {
    NothingMatched,
    /// The keywords channel is not in the dialog snapshot.
    DestinationMissing,
    Forwarded(usize),
}

/// A dialog chosen for processing, resolved against the current snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub title: String,
    pub channel: ChannelRef,
    pub unread: u32,
}

pub struct TriageLoop {
    connector: Arc<dyn Connector>,
    pacer: Arc<Pacer>,
    keywords: KeywordSet,
    channels: ChannelNames,
    max_unread: u32,
}

impl TriageLoop {
    /// Every connection opened by the loop is throttled by its own pacer.
    pub fn new(cfg: &Config, connector: Arc<dyn Connector>) -> Result<Self> {
        let pacer = Arc::new(Pacer::new(cfg.pacing));
        let connector: Arc<dyn Connector> =
            Arc::new(ThrottledConnector::new(connector, pacer.clone()));
        Ok(Self {
            connector,
            pacer,
            keywords: cfg.keyword_set()?,
            channels: cfg.channels.clone(),
            max_unread: cfg.max_unread,
        })
    }

    /// Run passes forever (until `cancel`), logging and backing off on errors.
    pub async fn run(&self, cancel: CancellationToken) -> SupervisorStats {
        let pacing = *self.pacer.config();
        let mut supervisor = Supervisor::new(
            "triage",
            pacing.poll_interval,
            ConstantBackoff(pacing.error_backoff),
            cancel,
        );
        info!(
            keywords = self.keywords.keywords().len(),
            interval_ms = pacing.poll_interval.as_millis() as u64,
            "triage loop started"
        );
        supervisor.run(move || self.run_pass()).await
    }

    /// One full triage pass over a fresh connection.
    pub async fn run_pass(&self) -> Result<PassOutcome> {
        with_connection(self.connector.as_ref(), |t| async move {
            self.pacer.settle().await;
            self.pass(t.as_ref()).await
        })
        .await
    }

    async fn pass(&self, t: &dyn Transport) -> Result<PassOutcome> {
        let snapshot = t.list_dialogs().await?;

        let Some(candidate) = select_candidate(&snapshot, &self.channels, self.max_unread) else {
            debug!("no candidate dialog");
            return Ok(PassOutcome::NoCandidate);
        };

        let page = t
            .get_history(candidate.channel, 0, candidate.unread)
            .await?;
        if page.messages.is_empty() {
            debug!(channel = %candidate.title, "history empty");
            return Ok(PassOutcome::EmptyHistory {
                channel: candidate.title,
            });
        }

        // History arrives newest first.
        let mut batch = page.messages;
        batch.reverse();
        let fetched = batch.len();

        let matched = classify(&batch, &self.keywords);
        let forward = forward_messages(
            t,
            &self.pacer,
            &snapshot,
            candidate.channel,
            &self.channels.keywords,
            &matched,
        )
        .await?;

        // Service messages never match but still move the read mark.
        let max_id = batch.iter().map(|m| m.id).max().unwrap_or(MessageId(0));
        mark_read(t, candidate.channel, max_id).await?;

        info!(
            channel = %candidate.title,
            fetched,
            matched = matched.len(),
            "channel messages read"
        );

        Ok(PassOutcome::Processed {
            channel: candidate.title,
            fetched,
            matched: matched.len(),
            forward,
        })
    }
}

/// First channel dialog with `0 < unread < max_unread` that is not one of the
/// agent's own sink channels and is addressable in this snapshot.
///
/// Own channels are filtered here rather than after fetching so a busy sink
/// can never occupy the single slot of every pass.
pub fn select_candidate(
    snapshot: &DialogSnapshot,
    own: &ChannelNames,
    max_unread: u32,
) -> Option<Candidate> {
    snapshot.dialogs.iter().find_map(|d| {
        let Peer::Channel(id) = d.peer else {
            return None;
        };
        if d.unread_count == 0 || d.unread_count >= max_unread {
            return None;
        }
        let channel: &Channel = snapshot.channel_by_id(id)?;
        if own.is_own_channel(&channel.title) {
            return None;
        }
        Some(Candidate {
            title: channel.title.clone(),
            channel: channel.channel_ref()?,
            unread: d.unread_count,
        })
    })
}

/// Forward `messages` (in order) from `source` to the channel titled `dest_title`.
///
/// A destination missing from the snapshot is a silent no-op.
pub async fn forward_messages(
    t: &dyn Transport,
    pacer: &Pacer,
    snapshot: &DialogSnapshot,
    source: ChannelRef,
    dest_title: &str,
    messages: &[Message],
) -> Result<ForwardOutcome> {
    if messages.is_empty() {
        return Ok(ForwardOutcome::NothingMatched);
    }

    let Some(dest) = snapshot
        .channel_by_title(dest_title)
        .and_then(Channel::channel_ref)
    else {
        info!(channel = dest_title, "destination channel not found, skipping forward");
        return Ok(ForwardOutcome::DestinationMissing);
    };

    let ids = messages.iter().map(|m| m.id).collect::<Vec<_>>();
    let count = ids.len();

    pacer.before_forward().await;
    t.send(Request::forward(source, dest, ids)).await?;
    Ok(ForwardOutcome::Forwarded(count))
}

/// Mark `channel` read up to `max_id`. Idempotent.
pub async fn mark_read(t: &dyn Transport, channel: ChannelRef, max_id: MessageId) -> Result<()> {
    t.send(Request::ReadHistory { channel, max_id }).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChannelId, Dialog};
    use crate::pacing::PacingConfig;
    use crate::transport::fake::{service_message, text_message, FakeConnector, FakeTransport};
    use crate::Error;
    use std::collections::HashMap;
    use std::time::Duration;

    const HEAP: i64 = 900;
    const KEYWORDS: i64 = 901;

    fn test_config(keywords: &str) -> Config {
        let vars = HashMap::from([
            ("TG_API_ID", "1".to_string()),
            ("TG_API_HASH", "h".to_string()),
            ("TG_PHONE_NUMBER", "+1".to_string()),
            ("HEAP_CHANNEL_NAME", "Heap".to_string()),
            ("KEYWORDS_CHANNEL_NAME", "Keywords".to_string()),
            ("KEYWORDS", keywords.to_string()),
        ]);
        let mut cfg = Config::from_lookup(|k| vars.get(k).cloned()).unwrap();
        cfg.pacing = PacingConfig::immediate();
        cfg
    }

    fn triage(fake: &Arc<FakeTransport>, keywords: &str) -> TriageLoop {
        TriageLoop::new(
            &test_config(keywords),
            Arc::new(FakeConnector::new(fake.clone())),
        )
        .unwrap()
    }

    fn sinks(fake: &FakeTransport) {
        fake.add_channel(HEAP, "Heap", 0);
        fake.add_channel(KEYWORDS, "Keywords", 0);
    }

    fn channel_ref(id: i64) -> ChannelRef {
        ChannelRef {
            id: ChannelId(id),
            access_hash: id * 1000,
        }
    }

    #[tokio::test]
    async fn forwards_matches_and_marks_read() {
        let fake = Arc::new(FakeTransport::authorized());
        sinks(&fake);
        fake.add_channel(1, "X", 10);
        // Newest first: ids 10..=1, three of them mention rust.
        let history = (1..=10)
            .rev()
            .map(|id| {
                let text = if [2, 5, 9].contains(&id) {
                    format!("post {id} about Rust")
                } else {
                    format!("post {id}")
                };
                text_message(id, &text, 1_700_000_000 + id as i64)
            })
            .collect();
        fake.set_history(1, history);

        let outcome = triage(&fake, "rust").run_pass().await.unwrap();

        assert_eq!(
            outcome,
            PassOutcome::Processed {
                channel: "X".to_string(),
                fetched: 10,
                matched: 3,
                forward: ForwardOutcome::Forwarded(3),
            }
        );
        let forwards = fake.forwards();
        assert_eq!(forwards.len(), 1);
        let (from, to, ids) = &forwards[0];
        assert_eq!(*from, channel_ref(1));
        assert_eq!(*to, channel_ref(KEYWORDS));
        // Chronological order.
        assert_eq!(ids, &vec![MessageId(2), MessageId(5), MessageId(9)]);
        assert_eq!(fake.read_marks(), vec![(channel_ref(1), MessageId(10))]);
        assert_eq!(fake.history_calls(), vec![(channel_ref(1), 0, 10)]);
        assert_eq!(fake.connects(), 1);
        assert_eq!(fake.disconnects(), 1);
    }

    #[tokio::test]
    async fn marks_read_even_without_matches() {
        let fake = Arc::new(FakeTransport::authorized());
        sinks(&fake);
        fake.add_channel(1, "X", 2);
        fake.set_history(1, vec![text_message(2, "b", 2), text_message(1, "a", 1)]);

        let outcome = triage(&fake, "rust").run_pass().await.unwrap();

        assert!(matches!(
            outcome,
            PassOutcome::Processed {
                forward: ForwardOutcome::NothingMatched,
                ..
            }
        ));
        assert!(fake.forwards().is_empty());
        assert_eq!(fake.read_marks(), vec![(channel_ref(1), MessageId(2))]);
    }

    #[tokio::test]
    async fn own_channels_are_never_processed() {
        let fake = Arc::new(FakeTransport::authorized());
        fake.add_channel(HEAP, "Heap", 5);
        fake.set_history(HEAP, vec![text_message(1, "rust", 1)]);

        let outcome = triage(&fake, "rust").run_pass().await.unwrap();

        assert_eq!(outcome, PassOutcome::NoCandidate);
        assert!(fake.requests().is_empty());
        assert!(fake.history_calls().is_empty());
    }

    #[tokio::test]
    async fn busy_sink_does_not_starve_real_channels() {
        let fake = Arc::new(FakeTransport::authorized());
        fake.add_channel(KEYWORDS, "Keywords", 7);
        fake.add_channel(HEAP, "Heap", 0);
        fake.add_channel(2, "Y", 1);
        fake.set_history(2, vec![text_message(1, "rust", 1)]);

        let outcome = triage(&fake, "rust").run_pass().await.unwrap();

        assert!(matches!(outcome, PassOutcome::Processed { ref channel, .. } if channel == "Y"));
        assert_eq!(fake.read_marks(), vec![(channel_ref(2), MessageId(1))]);
        // Never forward a sink into itself.
        assert!(fake.forwards().iter().all(|(from, to, _)| from != to));
    }

    #[tokio::test]
    async fn service_only_backlog_is_read_and_next_channel_gets_its_turn() {
        let fake = Arc::new(FakeTransport::authorized());
        sinks(&fake);
        fake.add_channel(1, "A", 1);
        fake.set_history(1, vec![service_message(42, 1)]);
        fake.add_channel(2, "B", 1);
        fake.set_history(2, vec![text_message(7, "rust", 2)]);
        let triage = triage(&fake, "rust");

        let first = triage.run_pass().await.unwrap();
        let second = triage.run_pass().await.unwrap();

        assert_eq!(
            first,
            PassOutcome::Processed {
                channel: "A".to_string(),
                fetched: 1,
                matched: 0,
                forward: ForwardOutcome::NothingMatched,
            }
        );
        assert!(matches!(second, PassOutcome::Processed { ref channel, .. } if channel == "B"));
        assert_eq!(
            fake.read_marks(),
            vec![(channel_ref(1), MessageId(42)), (channel_ref(2), MessageId(7))]
        );
        assert_eq!(fake.unread_count(1), Some(0));
        assert_eq!(fake.unread_count(2), Some(0));
    }

    #[tokio::test]
    async fn newest_service_message_sets_the_read_mark() {
        let fake = Arc::new(FakeTransport::authorized());
        sinks(&fake);
        fake.add_channel(1, "X", 2);
        fake.set_history(1, vec![service_message(43, 2), text_message(42, "rust", 1)]);

        triage(&fake, "rust").run_pass().await.unwrap();

        assert_eq!(fake.forwards()[0].2, vec![MessageId(42)]);
        assert_eq!(fake.read_marks(), vec![(channel_ref(1), MessageId(43))]);
        assert_eq!(
            triage(&fake, "rust").run_pass().await.unwrap(),
            PassOutcome::NoCandidate
        );
    }

    #[tokio::test(start_paused = true)]
    async fn forward_waits_for_its_delay_and_read_mark_follows() {
        let fake = Arc::new(FakeTransport::authorized());
        sinks(&fake);
        fake.add_channel(1, "X", 2);
        fake.set_history(1, vec![text_message(2, "rust", 2), text_message(1, "plain", 1)]);
        let mut cfg = test_config("rust");
        cfg.pacing.settle_delay = Duration::from_secs(3);
        cfg.pacing.forward_delay = Duration::from_secs(10);
        let triage = TriageLoop::new(&cfg, Arc::new(FakeConnector::new(fake.clone()))).unwrap();

        let started = tokio::time::Instant::now();
        triage.run_pass().await.unwrap();

        let at = |method: &str| {
            fake.timeline()
                .into_iter()
                .find(|(_, m)| *m == method)
                .map(|(t, _)| t - started)
                .unwrap()
        };
        let methods: Vec<&str> = fake.timeline().into_iter().map(|(_, m)| m).collect();
        assert_eq!(
            methods,
            vec![
                "messages.getDialogs",
                "messages.getHistory",
                "messages.forwardMessages",
                "channels.readHistory",
            ]
        );
        assert!(at("messages.getDialogs") >= Duration::from_secs(3));
        assert!(at("messages.getHistory") < Duration::from_secs(10));
        assert!(at("messages.forwardMessages") >= at("messages.getHistory") + Duration::from_secs(10));
        assert!(at("channels.readHistory") >= at("messages.forwardMessages"));
    }

    #[tokio::test]
    async fn empty_history_is_a_no_op() {
        let fake = Arc::new(FakeTransport::authorized());
        sinks(&fake);
        fake.add_channel(1, "X", 3);

        let outcome = triage(&fake, "rust").run_pass().await.unwrap();

        assert_eq!(
            outcome,
            PassOutcome::EmptyHistory {
                channel: "X".to_string()
            }
        );
        assert!(fake.requests().is_empty());
    }

    #[tokio::test]
    async fn missing_keywords_channel_skips_forward_but_still_marks_read() {
        let fake = Arc::new(FakeTransport::authorized());
        fake.add_channel(1, "X", 1);
        fake.set_history(1, vec![text_message(4, "rust news", 1)]);

        let outcome = triage(&fake, "rust").run_pass().await.unwrap();

        assert!(matches!(
            outcome,
            PassOutcome::Processed {
                forward: ForwardOutcome::DestinationMissing,
                ..
            }
        ));
        assert!(fake.forwards().is_empty());
        assert_eq!(fake.read_marks().len(), 1);
    }

    #[tokio::test]
    async fn transport_error_propagates_and_still_disconnects() {
        let fake = Arc::new(FakeTransport::authorized());
        fake.fail_list_dialogs(Error::Transport("connection reset".into()));

        let err = triage(&fake, "rust").run_pass().await.unwrap_err();

        assert!(err.is_transient());
        assert_eq!(fake.disconnects(), 1);
    }

    #[tokio::test]
    async fn loop_survives_transient_errors() {
        let fake = Arc::new(FakeTransport::authorized());
        sinks(&fake);
        fake.add_channel(1, "X", 1);
        fake.set_history(1, vec![text_message(1, "hello", 1)]);
        fake.fail_list_dialogs(Error::Transport("flood".into()));

        let mut cfg = test_config("rust");
        cfg.pacing.poll_interval = Duration::from_millis(1);
        cfg.pacing.error_backoff = Duration::from_millis(1);
        let triage = Arc::new(
            TriageLoop::new(&cfg, Arc::new(FakeConnector::new(fake.clone()))).unwrap(),
        );
        let cancel = CancellationToken::new();
        let handle = {
            let triage = triage.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { triage.run(cancel).await })
        };

        // Wait until a pass after the failure has marked the channel read.
        for _ in 0..200 {
            if fake.read_state(1).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
        let stats = handle.await.unwrap();

        assert!(stats.failures >= 1);
        assert!(stats.passes >= 2);
        assert_eq!(fake.read_state(1), Some(MessageId(1)));
    }

    #[tokio::test]
    async fn read_marking_is_idempotent() {
        let fake = FakeTransport::authorized();
        mark_read(&fake, channel_ref(1), MessageId(5)).await.unwrap();
        let once = fake.read_state(1);
        mark_read(&fake, channel_ref(1), MessageId(5)).await.unwrap();
        assert_eq!(fake.read_state(1), once);
    }

    #[test]
    fn selects_first_dialog_in_open_unread_interval() {
        let own = ChannelNames {
            heap: "Heap".to_string(),
            keywords: "Keywords".to_string(),
        };
        let mut snapshot = DialogSnapshot::default();
        for (id, unread) in [(1, 0u32), (2, 50), (3, 120), (4, 49), (5, 1)] {
            snapshot.channels.push(Channel {
                id: ChannelId(id),
                access_hash: Some(id),
                title: format!("c{id}"),
            });
            snapshot.dialogs.push(Dialog {
                peer: Peer::Channel(ChannelId(id)),
                unread_count: unread,
            });
        }
        snapshot.dialogs.insert(
            0,
            Dialog {
                peer: Peer::User(42),
                unread_count: 3,
            },
        );

        let picked = select_candidate(&snapshot, &own, 50).unwrap();
        assert_eq!(picked.title, "c4");
        assert_eq!(picked.unread, 49);

        snapshot.dialogs.retain(|d| d.unread_count == 0 || d.unread_count >= 50);
        assert_eq!(select_candidate(&snapshot, &own, 50), None);
    }
}
