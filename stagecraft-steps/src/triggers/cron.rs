//! Cron trigger (scheduled emission).

use chrono::Utc;
use cron::Schedule;
use serde_json::Value as JsonValue;
use stagecraft_core::step::{step_channels, StepChannels};
use stagecraft_core::{
    default_output, Error, EventId, Result, Step, StepConfig, StepInput, StepOutput,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Continuous trigger that emits an event per schedule fire until cancelled.
/// Each emission carries a fresh event id.
///
/// # Configuration
///
/// ```yaml
/// step_type: cron
/// step_config:
///   schedule: "@every 5m"          # or "30s", or "0 0 2 * * *"
/// ```
///
/// Three schedule forms are accepted:
/// - `@every <duration>` - fixed interval (e.g. `@every 1h30m`)
/// - a bare duration (e.g. `5m`, `90s`, `250ms`)
/// - a cron expression (`sec min hour day month weekday`)
pub struct CronStep {
    schedule: ScheduleKind,
    schedule_expr: String,
}

#[derive(Clone)]
enum ScheduleKind {
    Interval(Duration),
    Cron(Box<Schedule>),
}

/// Create a `cron` step from configuration.
pub fn factory(config: &StepConfig) -> Result<Arc<dyn Step>> {
    let expr = config
        .get_str("schedule")
        .ok_or_else(|| Error::MissingConfig {
            key: "schedule".to_string(),
        })?;

    let schedule = parse_schedule(expr).map_err(|cause| Error::InvalidConfig {
        key: "schedule".to_string(),
        cause,
    })?;

    Ok(Arc::new(CronStep {
        schedule,
        schedule_expr: expr.to_string(),
    }))
}

fn parse_schedule(expr: &str) -> std::result::Result<ScheduleKind, String> {
    if let Some(duration_str) = expr.strip_prefix("@every ") {
        return parse_duration(duration_str.trim()).map(ScheduleKind::Interval);
    }

    if let Ok(duration) = parse_duration(expr) {
        return Ok(ScheduleKind::Interval(duration));
    }

    Schedule::from_str(expr)
        .map(|schedule| ScheduleKind::Cron(Box::new(schedule)))
        .map_err(|e| {
            format!(
                "unsupported schedule '{}' (use @every <duration>, a duration like 5m, \
                 or a cron expression): {}",
                expr, e
            )
        })
}

/// Parse a compound duration like `1h30m`, `90s`, or `250ms`.
fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }

        let mut unit = String::from(c);
        while let Some(&next) = chars.peek() {
            if next.is_ascii_alphabetic() {
                unit.push(next);
                chars.next();
            } else {
                break;
            }
        }

        let value: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration '{}'", s))?;
        digits.clear();

        total += match unit.as_str() {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            other => return Err(format!("unknown duration unit '{}'", other)),
        };
    }

    if !digits.is_empty() {
        return Err(format!("duration '{}' is missing a unit", s));
    }
    if total.is_zero() {
        return Err(format!("duration '{}' must be positive", s));
    }

    Ok(total)
}

impl CronStep {
    async fn wait_for_next_fire(schedule: &ScheduleKind) -> Option<()> {
        match schedule {
            ScheduleKind::Interval(interval) => {
                tokio::time::sleep(*interval).await;
                Some(())
            }
            ScheduleKind::Cron(schedule) => {
                let next = schedule.upcoming(Utc).next()?;
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;
                Some(())
            }
        }
    }
}

impl Step for CronStep {
    fn kind(&self) -> &str {
        "cron"
    }

    fn is_continuous(&self) -> bool {
        true
    }

    fn run(&self, cancel: CancellationToken, inputs: mpsc::Receiver<StepInput>) -> StepChannels {
        // Triggers emit spontaneously; the synthetic entry input is unused.
        drop(inputs);

        let schedule = self.schedule.clone();
        let schedule_expr = self.schedule_expr.clone();
        let (out_tx, err_tx, channels) = step_channels();

        tokio::spawn(async move {
            tracing::info!(schedule = %schedule_expr, "cron trigger started");

            loop {
                tokio::select! {
                    fired = CronStep::wait_for_next_fire(&schedule) => {
                        if fired.is_none() {
                            tracing::warn!(schedule = %schedule_expr, "no more scheduled times");
                            return;
                        }
                    }
                    _ = cancel.cancelled() => {
                        tracing::info!(schedule = %schedule_expr, "cron trigger stopped");
                        return;
                    }
                }

                let output = StepOutput::new(default_output(JsonValue::Null), EventId::new());
                tokio::select! {
                    sent = out_tx.send(output) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                    _ = cancel.cancelled() => return,
                }
            }
        });

        drop(err_tx);
        channels
    }
}
