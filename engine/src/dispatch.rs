//! C5: the status-callback dispatcher (§4.5). Per-call callbacks are
//! fired inline by the call's own runner task — one task, one call, so
//! they are already strictly ordered. Per-conference callbacks are not:
//! several participants' runner tasks can all observe the same
//! conference transition at once, so each conference gets its own
//! single-consumer queue, the same "one worker drains one channel"
//! shape `ringrtc`'s `lite::call_links` uses for its HTTP request queue.

use std::collections::HashMap;

use log::warn;
use tokio::sync::mpsc;

use crate::config::EngineConfig;
use crate::ids::Sid;
use crate::model::{Call, CallStatus, Conference, ConferenceEvent};
use crate::tenant::Tenant;
use crate::util::rfc3339;

/// §4.5: "answered" callback subscriptions fire on the `in-progress`
/// transition for *answered* calls; a subscription to any terminal
/// status fires on whichever terminal status the call actually reaches.
/// The two directions are not symmetric: subscribing to `completed`
/// does not fire on `busy`.
pub fn call_status_should_dispatch(subscribed: &[CallStatus], reached: CallStatus) -> bool {
    if subscribed.iter().any(|&s| s == reached) {
        return true;
    }
    if reached == CallStatus::InProgress {
        return subscribed.contains(&CallStatus::Answered);
    }
    if reached.is_terminal() {
        return subscribed.iter().any(|&s| s.is_terminal());
    }
    false
}

fn form_base(config: &EngineConfig) -> HashMap<String, String> {
    let mut form = HashMap::new();
    form.insert("ApiVersion".to_string(), config.api_version.clone());
    form
}

/// Builds the Twilio-shaped callback form for a call status transition.
pub fn build_call_status_form(call: &Call, config: &EngineConfig) -> HashMap<String, String> {
    let mut form = form_base(config);
    form.insert("CallSid".to_string(), call.sid.to_string());
    form.insert("AccountSid".to_string(), call.account_sid.to_string());
    form.insert("From".to_string(), call.from.clone());
    form.insert("To".to_string(), call.to.clone());
    form.insert("CallStatus".to_string(), call.status.wire_name().to_string());
    form.insert("Direction".to_string(), call.direction.to_string());
    if let Some(answered_at) = call.answered_at {
        let secs = call
            .ended_at
            .unwrap_or_else(std::time::SystemTime::now)
            .duration_since(answered_at)
            .unwrap_or_default()
            .as_secs();
        form.insert("CallDuration".to_string(), secs.to_string());
    }
    if let Some(parent) = &call.parent_call_sid {
        form.insert("ParentCallSid".to_string(), parent.to_string());
    }
    form.insert("Timestamp".to_string(), rfc3339(call.created_at));
    for (k, v) in &call.variables {
        form.insert(k.clone(), v.clone());
    }
    form
}

/// Fires (if subscribed) the status callback for `call`'s *current*
/// status. Errors are recorded on the tenant's error list rather than
/// propagated: a broken callback endpoint must not affect call
/// execution (§7).
pub async fn dispatch_call_status(tenant: &Tenant, call: &Call) {
    if !call_status_should_dispatch(&call.status_callback_events, call.status) {
        return;
    }
    let Some(url) = call.status_callback.clone() else {
        return;
    };
    let form = build_call_status_form(call, &tenant.config);
    let result = match call.status_callback_method {
        callml::HttpMethod::Get => {
            let query = serde_urlencoded_form(&form);
            tenant.webhook.get(&format!("{url}?{query}")).await
        }
        callml::HttpMethod::Post => tenant.webhook.post(&url, &form).await,
    };
    if let Err(e) = result {
        warn!("status callback to {url} failed for call {}: {e}", call.sid);
        tenant.record_error(Some(call.sid.clone()), &e);
    }
}

fn serde_urlencoded_form(form: &HashMap<String, String>) -> String {
    form.iter()
        .map(|(k, v)| format!("{}={}", urlencode(k), urlencode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

pub fn build_conference_event_form(
    conference: &Conference,
    participant: Option<&Sid>,
    event: ConferenceEvent,
    config: &EngineConfig,
) -> HashMap<String, String> {
    let mut form = form_base(config);
    form.insert("ConferenceSid".to_string(), conference.sid.to_string());
    form.insert("FriendlyName".to_string(), conference.name.clone());
    form.insert("StatusCallbackEvent".to_string(), event.wire_name().to_string());
    if let Some(p) = participant {
        form.insert("CallSid".to_string(), p.to_string());
    }
    form
}

struct ConferenceDispatchJob {
    conference: Conference,
    participant: Option<Sid>,
    event: ConferenceEvent,
}

/// One single-consumer worker per conference, so two participants'
/// runner tasks observing the same transition still deliver callbacks
/// in a fixed order rather than racing each other over the wire.
pub struct ConferenceDispatcher {
    tx: mpsc::UnboundedSender<ConferenceDispatchJob>,
}

impl ConferenceDispatcher {
    pub fn spawn(tenant: std::sync::Arc<Tenant>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ConferenceDispatchJob>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if !job
                    .conference
                    .status_callback_events
                    .contains(&job.event)
                {
                    continue;
                }
                let Some(url) = job.conference.status_callback.clone() else {
                    continue;
                };
                let form = build_conference_event_form(
                    &job.conference,
                    job.participant.as_ref(),
                    job.event,
                    &tenant.config,
                );
                if let Err(e) = tenant.webhook.post(&url, &form).await {
                    warn!("conference callback to {url} failed: {e}");
                    tenant.record_error(job.participant.clone(), &e);
                }
            }
        });
        Self { tx }
    }

    pub fn enqueue(&self, conference: Conference, participant: Option<Sid>, event: ConferenceEvent) {
        let _ = self.tx.send(ConferenceDispatchJob {
            conference,
            participant,
            event,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribing_to_completed_does_not_fire_on_busy() {
        assert!(!call_status_should_dispatch(&[CallStatus::Completed], CallStatus::Busy));
    }

    #[test]
    fn subscribing_to_any_terminal_status_fires_on_the_reached_one() {
        assert!(call_status_should_dispatch(&[CallStatus::Completed], CallStatus::Completed));
        assert!(call_status_should_dispatch(&[CallStatus::Busy], CallStatus::Busy));
    }

    #[test]
    fn answered_subscription_fires_on_in_progress_only() {
        assert!(call_status_should_dispatch(&[CallStatus::Answered], CallStatus::InProgress));
        assert!(!call_status_should_dispatch(&[CallStatus::Answered], CallStatus::Ringing));
    }

    #[test]
    fn non_terminal_non_answered_statuses_require_an_exact_subscription() {
        assert!(!call_status_should_dispatch(&[], CallStatus::Ringing));
        assert!(call_status_should_dispatch(&[CallStatus::Ringing], CallStatus::Ringing));
        assert!(!call_status_should_dispatch(&[CallStatus::Completed], CallStatus::Ringing));
    }
}
