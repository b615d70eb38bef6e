//! Cron scheduling for once-a-day jobs (the digest).
//!
//! Expressions use the classic 5-field layout (min hour dom mon dow) in local
//! time. Day-of-week numbers follow crontab (`0` and `7` are Sunday) and are
//! translated to day names before the schedule is handed to the `cron` crate,
//! which numbers days differently and wants a seconds field.

use std::{future::Future, str::FromStr, time::Duration};

use chrono::{DateTime, Local};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{Error, Result};

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Run `job` at every time matching `expr` until `cancel` fires.
///
/// Returns the number of completed runs. A run in progress is never interrupted.
pub async fn run_cron_job<F, Fut>(
    name: &str,
    expr: &CronExpr,
    cancel: CancellationToken,
    mut job: F,
) -> u64
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut runs = 0u64;
    loop {
        let now = Local::now();
        let Some(next) = expr.next_after(now) else {
            warn!(job = name, cron = expr.source(), "job has no next run (stopping)");
            break;
        };

        let dur = (next - now).to_std().unwrap_or(Duration::ZERO);
        info!(job = name, next = %next.format("%Y-%m-%d %H:%M"), "job scheduled");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(dur) => {
                job().await;
                runs += 1;
            }
        }
    }
    runs
}

/// A parsed 5-field cron expression.
#[derive(Clone, Debug)]
pub struct CronExpr {
    source: String,
    schedule: cron::Schedule,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let fields = expr.split_whitespace().collect::<Vec<_>>();
        let [min, hour, dom, mon, dow] = fields.as_slice() else {
            return Err(Error::Config(format!(
                "cron: expected 5 fields, got {}",
                fields.len()
            )));
        };

        let full = format!("0 {min} {hour} {dom} {mon} {}", day_of_week(dow)?);
        let schedule = cron::Schedule::from_str(&full)
            .map_err(|e| Error::Config(format!("cron: invalid expression {expr:?}: {e}")))?;

        Ok(Self {
            source: expr.to_string(),
            schedule,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// First matching minute strictly after `now`.
    pub fn next_after(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        self.schedule.after(&now).next()
    }
}

/// Rewrite crontab day-of-week numbers as day names.
///
/// Items that are already names (`Mon-Fri`) or `?` pass through untouched.
fn day_of_week(field: &str) -> Result<String> {
    if field == "*" {
        return Ok(field.to_string());
    }

    let mut items = Vec::new();
    for item in field.split(',') {
        if !item
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '*' | '-' | '/'))
        {
            items.push(item.to_string());
            continue;
        }

        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, parse_day_number(step, 1, u32::MAX)?),
            None => (item, 1),
        };
        let (start, end) = match range.split_once('-') {
            _ if range == "*" => (0, 6),
            Some((a, b)) => (parse_day_number(a, 0, 7)?, parse_day_number(b, 0, 7)?),
            None => {
                let day = parse_day_number(range, 0, 7)?;
                (day, if item.contains('/') { 6 } else { day })
            }
        };
        if start > end {
            return Err(Error::Config(format!("cron: empty day-of-week range: {item}")));
        }

        let mut seen = [false; 7];
        for day in (start..=end).step_by(step as usize) {
            seen[(day % 7) as usize] = true;
        }
        items.extend(
            seen.iter()
                .zip(DAY_NAMES)
                .filter(|(on, _)| **on)
                .map(|(_, name)| name.to_string()),
        );
    }
    Ok(items.join(","))
}

fn parse_day_number(s: &str, min: u32, max: u32) -> Result<u32> {
    s.parse::<u32>()
        .ok()
        .filter(|v| (min..=max).contains(v))
        .ok_or_else(|| Error::Config(format!("cron: invalid day-of-week value: {s}")))
}
