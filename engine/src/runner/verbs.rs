//! `Gather` and `Record`: the two verbs whose completion is driven by
//! external signals (DTMF digits, a timeout) rather than a fixed delay.

use std::collections::HashMap;
use std::time::Duration;

use callml::{Gather, HttpMethod, Verb};

use crate::error::Result;
use crate::ids::ResourceKind;

use super::{Runner, VerbAction};

const DEFAULT_GATHER_TIMEOUT: Duration = Duration::from_secs(5);

fn parse_gather_timeout(timeout: &Option<String>) -> Duration {
    match timeout.as_deref() {
        None => DEFAULT_GATHER_TIMEOUT,
        Some("auto") => DEFAULT_GATHER_TIMEOUT,
        Some(s) => s
            .parse::<u64>()
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_GATHER_TIMEOUT),
    }
}

/// §4.3 Gather: play its children, then collect digits until
/// `finishOnKey` is pressed, `numDigits` is reached, or `timeout`
/// elapses with no further digits.
pub(crate) async fn exec_gather(
    runner: &mut Runner,
    g: &Gather,
    source_url: &str,
) -> Result<VerbAction> {
    // Children are restricted by the parser to Say/Play/Pause, so these
    // are dispatched directly rather than through `exec_verb` — avoiding
    // a recursive async-fn cycle, since Gather itself is dispatched from
    // `exec_verb`.
    for child in &g.children {
        let outcome = match child {
            Verb::Say { loop_count, .. } => {
                runner
                    .run_timed_or_indefinite(*loop_count, Duration::from_millis(300), source_url)
                    .await?
            }
            Verb::Play { loop_count, .. } => {
                runner
                    .run_timed_or_indefinite(*loop_count, Duration::from_secs(1), source_url)
                    .await?
            }
            Verb::Pause { length_secs } => runner.exec_pause(*length_secs).await?,
            _ => VerbAction::Next,
        };
        match outcome {
            VerbAction::Next => {}
            terminating => return Ok(terminating),
        }
    }

    let per_digit_timeout = parse_gather_timeout(&g.timeout);
    let finish_key = g.finish_on_key.as_deref().unwrap_or("#");
    let mut digits = String::new();

    'collect: loop {
        if let Some(n) = g.num_digits {
            if digits.chars().count() as u32 >= n {
                break 'collect;
            }
        }
        tokio::select! {
            _ = runner.hangup.cancelled() => return Ok(VerbAction::Hangup),
            Some(chunk) = runner.digits_rx.recv() => {
                for ch in chunk.chars() {
                    if !finish_key.is_empty() && ch.to_string() == finish_key {
                        break 'collect;
                    }
                    digits.push(ch);
                    if let Some(n) = g.num_digits {
                        if digits.chars().count() as u32 >= n {
                            break 'collect;
                        }
                    }
                }
            }
            _ = runner.tenant.clock.sleep(per_digit_timeout) => break 'collect,
        }
    }

    if digits.is_empty() {
        return Ok(VerbAction::Next);
    }

    runner.set_variable("Digits", digits.clone());

    match &g.action {
        Some(action) => {
            let mut form = HashMap::new();
            form.insert("Digits".to_string(), digits);
            runner.invoke_action(action, g.method, source_url, form).await
        }
        None => Ok(VerbAction::Next),
    }
}

/// §4.3 Record: no real audio exists in this simulator, so a recording
/// "completes" after `min(timeout, maxLength)` of simulated silence,
/// subject to the same hangup race every other timed verb honours.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn exec_record(
    runner: &mut Runner,
    max_length_secs: u32,
    timeout_secs: u32,
    _play_beep: bool,
    action: Option<&str>,
    method: HttpMethod,
    _transcribe: bool,
    source_url: &str,
) -> Result<VerbAction> {
    let wait_secs = timeout_secs.min(max_length_secs).max(1);
    tokio::select! {
        _ = runner.hangup.cancelled() => return Ok(VerbAction::Hangup),
        _ = runner.tenant.clock.sleep(Duration::from_secs(wait_secs as u64)) => {}
    }

    let recording_sid = runner.new_sid(ResourceKind::Recording);
    runner.set_variable("RecordingSid", recording_sid.to_string());
    runner.set_variable("RecordingDuration", wait_secs.to_string());
    runner.set_variable("RecordingStatus", "completed".to_string());
    let recording_url = format!("https://recordings.simulated.local/{recording_sid}");
    runner.set_variable("RecordingUrl", recording_url.clone());

    match action {
        Some(action) => {
            let mut form = HashMap::new();
            form.insert("RecordingSid".to_string(), recording_sid.to_string());
            form.insert("RecordingDuration".to_string(), wait_secs.to_string());
            form.insert("RecordingUrl".to_string(), recording_url);
            form.insert("RecordingStatus".to_string(), "completed".to_string());
            runner.invoke_action(action, method, source_url, form).await
        }
        None => Ok(VerbAction::Next),
    }
}
