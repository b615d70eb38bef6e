//! Daily digest of the heap channel.
//!
//! Walks the heap channel's history page by page (newest first), keeps the
//! messages posted during the previous local calendar day and renders them
//! into a document. A failed run leaves an `.error.txt` report next to where
//! the document would have been and is not retried.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use tracing::{error, info};

use crate::{
    config::{Config, ReportConfig},
    document::DocumentSink,
    domain::{ChannelRef, DialogSnapshot},
    errors::Error,
    pacing::Pacer,
    transport::{
        port::{with_connection, Connector, Transport},
        throttled::ThrottledConnector,
    },
    Result,
};

/// One digest entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DigestRecord {
    /// Title of the channel the message was originally forwarded from.
    pub channel_title: String,
    pub date: i64,
    /// Body with newlines, carriage returns and tabs removed.
    pub body: String,
}

/// Half-open unix-time window `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DayWindow {
    pub start: i64,
    pub end: i64,
}

impl DayWindow {
    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// The calendar day before `now`, in `now`'s timezone.
pub fn previous_day<Tz: TimeZone>(now: &DateTime<Tz>) -> Result<DayWindow> {
    let tz = now.timezone();
    let today = now.date_naive();
    let yesterday = today
        .pred_opt()
        .ok_or_else(|| Error::External(format!("no day before {today}")))?;

    let midnight = |d: chrono::NaiveDate| -> Result<i64> {
        tz.from_local_datetime(&d.and_time(NaiveTime::MIN))
            .earliest()
            .map(|dt| dt.timestamp())
            .ok_or_else(|| Error::External(format!("no local midnight on {d}")))
    };

    Ok(DayWindow {
        start: midnight(yesterday)?,
        end: midnight(today)?,
    })
}

pub fn sanitize_body(body: &str) -> String {
    body.chars()
        .filter(|c| !matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

/// Render records as document paragraphs, in the order given.
pub fn render(records: &[DigestRecord]) -> Vec<String> {
    let mut out = Vec::with_capacity(records.len() * 5);
    for r in records {
        let date = DateTime::<Utc>::from_timestamp(r.date, 0)
            .map(|dt| dt.format("%-d-%-m-%Y %H:%M:%S").to_string())
            .unwrap_or_else(|| r.date.to_string());
        out.push(format!("Channel: {}", r.channel_title));
        out.push(format!("Date: {date}"));
        out.push(format!("Message: {}", r.body));
        out.push(String::new());
        out.push(String::new());
    }
    out
}

/// `{dir}/{name}-{MM-dd-yyyy}.docx` and `{dir}/{name}-{MM-dd-yyyy}.error.txt`.
pub fn report_paths(report: &ReportConfig, now: &DateTime<Local>) -> (PathBuf, PathBuf) {
    let stem = format!("{}-{}", report.name, now.format("%m-%d-%Y"));
    (
        report.dir.join(format!("{stem}.docx")),
        report.dir.join(format!("{stem}.error.txt")),
    )
}

/// Result of one digest run. Failures are reported, never propagated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DigestRunOutcome {
    Written { path: PathBuf, records: usize },
    Failed { error_path: PathBuf, message: String },
}

pub struct DigestExporter {
    connector: Arc<dyn Connector>,
    pacer: Arc<Pacer>,
    heap_title: String,
    report: ReportConfig,
    page_size: u32,
    sink: Arc<dyn DocumentSink>,
}

impl DigestExporter {
    pub fn new(cfg: &Config, connector: Arc<dyn Connector>, sink: Arc<dyn DocumentSink>) -> Self {
        let pacer = Arc::new(Pacer::new(cfg.pacing));
        Self {
            connector: Arc::new(ThrottledConnector::new(connector, pacer.clone())),
            pacer,
            heap_title: cfg.channels.heap.clone(),
            report: cfg.report.clone(),
            page_size: cfg.digest_page_size,
            sink,
        }
    }

    /// Run the digest for the day before now.
    pub async fn run(&self) -> DigestRunOutcome {
        self.run_at(Local::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Local>) -> DigestRunOutcome {
        let (doc_path, error_path) = report_paths(&self.report, &now);
        match self.export(&now, &doc_path).await {
            Ok(records) => {
                info!(path = %doc_path.display(), records, "digest written");
                DigestRunOutcome::Written {
                    path: doc_path,
                    records,
                }
            }
            Err(e) => {
                let message = e.to_string();
                error!(error = %message, "digest failed");
                if let Err(write_err) = write_error_report(&error_path, &message) {
                    error!(
                        path = %error_path.display(),
                        error = %write_err,
                        "failed to write digest error report"
                    );
                }
                DigestRunOutcome::Failed {
                    error_path,
                    message,
                }
            }
        }
    }

    async fn export(&self, now: &DateTime<Local>, doc_path: &Path) -> Result<usize> {
        let window = previous_day(now)?;
        let records = with_connection(self.connector.as_ref(), |t| async move {
            self.pacer.settle().await;
            self.collect(t.as_ref(), window).await
        })
        .await?;

        let sink = self.sink.clone();
        let paragraphs = render(&records);
        let path = doc_path.to_path_buf();
        tokio::task::spawn_blocking(move || sink.write(&paragraphs, &path))
            .await
            .map_err(|e| Error::Document(format!("document writer task failed: {e}")))??;
        Ok(records.len())
    }

    async fn collect(&self, t: &dyn Transport, window: DayWindow) -> Result<Vec<DigestRecord>> {
        let snapshot = t.list_dialogs().await?;
        let heap = snapshot
            .channel_by_title(&self.heap_title)
            .and_then(|c| c.channel_ref())
            .ok_or_else(|| Error::ChannelNotFound(self.heap_title.clone()))?;

        collect_window(t, &self.pacer, &snapshot, heap, window, self.page_size).await
    }
}

/// Page backward through `heap` collecting records inside `window`.
///
/// Stops when the remote has nothing past the current offset or at the first
/// message older than the window.
pub async fn collect_window(
    t: &dyn Transport,
    pacer: &Pacer,
    snapshot: &DialogSnapshot,
    heap: ChannelRef,
    window: DayWindow,
    page_size: u32,
) -> Result<Vec<DigestRecord>> {
    let mut records = Vec::new();
    let mut offset = 0u32;

    'paging: loop {
        pacer.before_page().await;
        let page = t.get_history(heap, offset, page_size).await?;
        if page.total_count <= offset || page.messages.is_empty() {
            break;
        }
        offset += page.messages.len() as u32;

        for msg in &page.messages {
            let Some(body) = msg.body() else {
                continue;
            };
            if msg.date >= window.end {
                continue;
            }
            if msg.date < window.start {
                break 'paging;
            }
            let Some(origin) = msg
                .forwarded_from
                .and_then(|id| snapshot.channel_by_id(id))
            else {
                continue;
            };
            records.push(DigestRecord {
                channel_title: origin.title.clone(),
                date: msg.date,
                body: sanitize_body(body),
            });
        }
    }

    Ok(records)
}

fn write_error_report(path: &Path, message: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{message}\n"))?;
    Ok(())
}
