//! `Dial` and `Enqueue`: the rendezvous-bridging verbs (§4.3.2, §4.3.3).
//! Bridging between two calls is modelled with a `CancellationToken`
//! shared by both sides rather than a bidirectional channel: whichever
//! side ends the bridge (by hanging up, or — for conferences — by
//! `endConferenceOnExit`) cancels the token, and the other side's
//! `select!` wakes up the same way it would for its own hangup.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

use callml::{ConferenceDial, Dial, DialLeg, DialLegKind, DialTarget, HttpMethod};

use crate::clock::Instant;
use crate::error::Result;
use crate::ids::Sid;
use crate::model::{ConferenceEvent, ConferenceStatus, ParticipantOverlay};

use super::{Runner, VerbAction};

/// Sent from a `<Dial><Queue>` agent to the member it pulled off the
/// queue (§4.3.2).
#[derive(Clone)]
pub struct DequeueSignal {
    pub partner: Sid,
    pub queue_sid: Sid,
    pub enqueued_at: Instant,
    pub bridge_token: CancellationToken,
}

pub(crate) async fn exec_dial(runner: &mut Runner, d: &Dial, source_url: &str) -> Result<VerbAction> {
    match &d.target {
        DialTarget::Queue(name) => {
            exec_dial_queue(runner, name, d.timeout_secs, d.action.as_deref(), d.method, source_url).await
        }
        DialTarget::Conference(c) => {
            exec_dial_conference(runner, c, d.action.as_deref(), d.method, source_url).await
        }
        DialTarget::Legs(legs) => {
            exec_dial_legs(
                runner,
                legs,
                d.timeout_secs,
                d.hangup_on_star,
                d.action.as_deref(),
                d.method,
                source_url,
            )
            .await
        }
    }
}

pub(crate) async fn exec_enqueue(
    runner: &mut Runner,
    name: &str,
    action: Option<&str>,
    method: HttpMethod,
    wait_url: Option<&str>,
    source_url: &str,
) -> Result<VerbAction> {
    let queue_sid = runner.tenant.get_or_create_queue(name);
    let call_sid = runner.call_sid.clone();
    let enqueued_at = runner.tenant.clock.now();
    runner.tenant.with_state(|s| {
        if let Some(q) = s.queues.get_mut(name) {
            q.members.push(call_sid.clone());
        }
    });
    runner.set_variable("QueueSid", queue_sid.to_string());

    let signal = loop {
        tokio::select! {
            _ = runner.hangup.cancelled() => {
                let call_sid = runner.call_sid.clone();
                runner.tenant.with_state(|s| {
                    if let Some(q) = s.queues.get_mut(name) {
                        q.members.retain(|m| m != &call_sid);
                    }
                });
                return Ok(VerbAction::Hangup);
            }
            Some(sig) = runner.dequeue_rx.recv() => break sig,
            _ = hold_tick(runner, wait_url) => {}
        }
    };

    tokio::select! {
        _ = runner.hangup.cancelled() => {
            signal.bridge_token.cancel();
            return Ok(VerbAction::Hangup);
        }
        _ = signal.bridge_token.cancelled() => {}
    }

    let queue_time = runner
        .tenant
        .clock
        .now()
        .saturating_duration_since(enqueued_at)
        .as_secs();
    runner.set_variable("DequeueCallSid", signal.partner.to_string());

    match action {
        Some(action) => {
            let mut form = HashMap::new();
            form.insert("QueueSid".to_string(), queue_sid.to_string());
            form.insert("QueueTime".to_string(), queue_time.to_string());
            form.insert("DequeueCallSid".to_string(), signal.partner.to_string());
            runner.invoke_action(action, method, source_url, form).await
        }
        None => Ok(VerbAction::Next),
    }
}

/// Not a real wait-music player — this simulator has no audio — just a
/// tick so the enqueue loop periodically re-polls rather than parking
/// forever on the dequeue channel alone.
async fn hold_tick(runner: &mut Runner, wait_url: Option<&str>) {
    let _ = wait_url;
    runner.tenant.clock.sleep(Duration::from_secs(2)).await;
}

async fn exec_dial_queue(
    runner: &mut Runner,
    queue_name: &str,
    timeout_secs: Option<u32>,
    action: Option<&str>,
    method: HttpMethod,
    source_url: &str,
) -> Result<VerbAction> {
    let queue_sid = runner.tenant.get_or_create_queue(queue_name);
    let timeout = Duration::from_secs(timeout_secs.unwrap_or(3600) as u64);
    let start = runner.tenant.clock.now();

    let member = loop {
        let popped = runner.tenant.with_state(|s| {
            s.queues.get_mut(queue_name).and_then(|q| {
                if q.members.is_empty() {
                    None
                } else {
                    Some(q.members.remove(0))
                }
            })
        });
        if popped.is_some() {
            break popped;
        }
        if runner.tenant.clock.now().saturating_duration_since(start) >= timeout {
            break None;
        }
        tokio::select! {
            _ = runner.hangup.cancelled() => return Ok(VerbAction::Hangup),
            _ = runner.tenant.clock.sleep(Duration::from_millis(200)) => {}
        }
    };

    let mut extra = HashMap::new();
    extra.insert("QueueSid".to_string(), queue_sid.to_string());

    let Some(partner) = member else {
        return finish_dial_action(runner, action, method, source_url, "no-answer", None, extra).await;
    };

    let bridge_token = CancellationToken::new();
    let signal = DequeueSignal {
        partner: runner.call_sid.clone(),
        queue_sid: queue_sid.clone(),
        enqueued_at: start,
        bridge_token: bridge_token.clone(),
    };
    runner.tenant.read_state(|s| {
        if let Some(h) = s.runners.get(&partner) {
            h.dequeue(signal.clone());
        }
    });
    runner.set_variable("DialCallSid", partner.to_string());
    extra.insert("DialCallSid".to_string(), partner.to_string());

    tokio::select! {
        _ = runner.hangup.cancelled() => {
            bridge_token.cancel();
            return Ok(VerbAction::Hangup);
        }
        _ = bridge_token.cancelled() => {}
    }

    let duration = runner.tenant.clock.now().saturating_duration_since(start).as_secs();
    finish_dial_action(runner, action, method, source_url, "completed", Some(duration), extra).await
}

/// §SPEC_FULL supplement: `Number`, `Client` and `Sip` legs all take the
/// same simulated-dial path, since none of them reach a real endpoint.
/// The first leg listed is treated as answered after a short ring, and
/// stays bridged until `timeout` elapses or (if `hangupOnStar`) the
/// dialing party presses `*`.
async fn exec_dial_legs(
    runner: &mut Runner,
    legs: &[DialLeg],
    timeout_secs: Option<u32>,
    hangup_on_star: bool,
    action: Option<&str>,
    method: HttpMethod,
    source_url: &str,
) -> Result<VerbAction> {
    let target = legs.first().cloned();
    tokio::select! {
        _ = runner.hangup.cancelled() => return Ok(VerbAction::Hangup),
        _ = runner.tenant.clock.sleep(Duration::from_millis(500)) => {}
    }

    let max_duration = Duration::from_secs(timeout_secs.unwrap_or(14_400) as u64);
    let start = runner.tenant.clock.now();
    let mut extra = HashMap::new();
    if let Some(t) = &target {
        extra.insert("DialAddress".to_string(), t.address.clone());
        extra.insert("DialLegKind".to_string(), t.kind.to_string());
    }

    loop {
        let elapsed = runner.tenant.clock.now().saturating_duration_since(start);
        if elapsed >= max_duration {
            return finish_dial_action(
                runner,
                action,
                method,
                source_url,
                "completed",
                Some(elapsed.as_secs()),
                extra,
            )
            .await;
        }
        let remaining = max_duration - elapsed;
        tokio::select! {
            _ = runner.hangup.cancelled() => return Ok(VerbAction::Hangup),
            Some(chunk) = runner.digits_rx.recv(), if hangup_on_star && matches!(target.as_ref().map(|t| &t.kind), Some(DialLegKind::Number)) => {
                if chunk.contains('*') {
                    let dur = runner.tenant.clock.now().saturating_duration_since(start).as_secs();
                    return finish_dial_action(runner, action, method, source_url, "completed", Some(dur), extra).await;
                }
            }
            _ = runner.tenant.clock.sleep(remaining) => {
                let dur = runner.tenant.clock.now().saturating_duration_since(start).as_secs();
                return finish_dial_action(runner, action, method, source_url, "completed", Some(dur), extra).await;
            }
        }
    }
}

async fn exec_dial_conference(
    runner: &mut Runner,
    c: &ConferenceDial,
    action: Option<&str>,
    method: HttpMethod,
    source_url: &str,
) -> Result<VerbAction> {
    let events: Vec<ConferenceEvent> = c
        .status_callback_events
        .iter()
        .filter_map(|e| parse_conference_event(e))
        .collect();
    let conf_sid = runner
        .tenant
        .get_or_create_conference(&c.name, c.status_callback.clone(), events);

    let overlay = ParticipantOverlay {
        muted: c.muted,
        hold: false,
        start_conference_on_enter: c.start_conference_on_enter,
        end_conference_on_exit: c.end_conference_on_exit,
        hold_url: c.hold_url.clone(),
        hold_method: c.hold_method,
        announce_url: None,
        announce_method: HttpMethod::default(),
    };

    let call_sid = runner.call_sid.clone();
    let start = runner.tenant.clock.now();
    let name = c.name.clone();

    let (conference_snapshot, started) = runner.tenant.with_state(|s| {
        s.overlays
            .insert((name.clone(), call_sid.clone()), overlay.clone());
        let conference = s.conferences.get_mut(&name).expect("just created above");
        conference.participants.push(call_sid.clone());
        let mut started = false;
        if conference.status == ConferenceStatus::Created
            && overlay.start_conference_on_enter
            && conference.participants.len() >= 2
        {
            conference.status = ConferenceStatus::InProgress;
            started = true;
        }
        let mut detail = HashMap::new();
        detail.insert("participant".to_string(), call_sid.to_string());
        conference
            .timeline
            .push(start, SystemTime::now(), "conference.join", detail);
        (conference.clone(), started)
    });
    runner.tenant.dispatch_conference_event(
        conference_snapshot.clone(),
        Some(call_sid.clone()),
        ConferenceEvent::Join,
    );
    if started {
        runner
            .tenant
            .dispatch_conference_event(conference_snapshot, None, ConferenceEvent::Start);
    }

    tokio::select! {
        _ = runner.hangup.cancelled() => {
            leave_conference(runner, &name).await;
            return Ok(VerbAction::Hangup);
        }
        Some(()) = runner.bridge_end_rx.recv() => {}
    }

    let duration = runner.tenant.clock.now().saturating_duration_since(start).as_secs();
    leave_conference(runner, &name).await;

    let mut extra = HashMap::new();
    extra.insert("ConferenceSid".to_string(), conf_sid.to_string());
    finish_dial_action(runner, action, method, source_url, "completed", Some(duration), extra).await
}

/// Removes the caller from `name`'s participant list; the conference
/// ends if it had `endConferenceOnExit` set, or if this was the last
/// participant, and the conference is still in progress.
async fn leave_conference(runner: &mut Runner, name: &str) {
    let call_sid = runner.call_sid.clone();
    let outcome = runner.tenant.with_state(|s| {
        let overlay = s
            .overlays
            .get(&(name.to_string(), call_sid.clone()))
            .cloned()
            .unwrap_or_default();
        let Some(conference) = s.conferences.get_mut(name) else {
            return None;
        };
        conference.participants.retain(|p| p != &call_sid);
        let mut detail = HashMap::new();
        detail.insert("participant".to_string(), call_sid.to_string());
        conference
            .timeline
            .push(runner.tenant.clock.now(), SystemTime::now(), "conference.leave", detail);
        let should_end = conference.status == ConferenceStatus::InProgress
            && (overlay.end_conference_on_exit || conference.participants.is_empty());
        if should_end {
            conference.status = ConferenceStatus::Completed;
            conference.ended_at = Some(SystemTime::now());
            return Some((conference.clone(), conference.participants.clone()));
        }
        Some((conference.clone(), Vec::new()))
    });
    let Some((conference, kicked)) = outcome else {
        return;
    };
    runner
        .tenant
        .dispatch_conference_event(conference.clone(), Some(call_sid), ConferenceEvent::Leave);
    if conference.status == ConferenceStatus::Completed {
        runner
            .tenant
            .dispatch_conference_event(conference, None, ConferenceEvent::End);
        runner.tenant.read_state(|s| {
            for p in &kicked {
                if let Some(h) = s.runners.get(p) {
                    h.bridge_end();
                }
            }
        });
    }
}

fn parse_conference_event(s: &str) -> Option<ConferenceEvent> {
    match s {
        "conference-start" | "start" => Some(ConferenceEvent::Start),
        "conference-end" | "end" => Some(ConferenceEvent::End),
        "participant-join" | "join" => Some(ConferenceEvent::Join),
        "participant-leave" | "leave" => Some(ConferenceEvent::Leave),
        _ => None,
    }
}

#[allow(clippy::too_many_arguments)]
async fn finish_dial_action(
    runner: &mut Runner,
    action: Option<&str>,
    method: HttpMethod,
    source_url: &str,
    dial_call_status: &str,
    duration_secs: Option<u64>,
    mut extra: HashMap<String, String>,
) -> Result<VerbAction> {
    runner.set_variable("DialCallStatus", dial_call_status.to_string());
    extra.insert("DialCallStatus".to_string(), dial_call_status.to_string());
    if let Some(d) = duration_secs {
        extra.insert("DialCallDuration".to_string(), d.to_string());
    }
    match action {
        Some(action) => runner.invoke_action(action, method, source_url, extra).await,
        None => Ok(VerbAction::Next),
    }
}
