//! The C2 operations table (§4.2): everything a caller can do to a
//! tenant's calls, queues and conferences, expressed as methods on
//! [`super::Tenant`].

use std::collections::HashMap;
use std::time::SystemTime;

use std::sync::Arc;

use crate::dispatch::dispatch_call_status;
use crate::error::{EngineError, Result};
use crate::ids::{ResourceKind, Sid};
use crate::model::{
    Application, Call, CallDirection, CallStatus, Conference, ProvisionedNumber, Queue,
};
use crate::params::{
    CreateApplicationParams, CreateCallParams, ParticipantUpdate, ProvisionNumberParams,
    UpdateCallParams, UpdateConferenceParams,
};

use super::Tenant;

/// A read-only, cloned-out view of a tenant, for demos/tests/snapshots
/// (§6: "a caller can always obtain a consistent snapshot").
#[derive(Clone, Debug, Default)]
pub struct TenantSnapshot {
    pub calls: Vec<Call>,
    pub queues: Vec<Queue>,
    pub conferences: Vec<Conference>,
}

impl Tenant {
    pub fn provision_number(&self, params: ProvisionNumberParams) -> ProvisionedNumber {
        let sid = self.new_sid(ResourceKind::PhoneNumber);
        let number = ProvisionedNumber {
            sid: sid.clone(),
            phone_number: params.phone_number,
            application_sid: params.application_sid,
            created_at: SystemTime::now(),
        };
        self.with_state(|s| {
            s.numbers.insert(sid, number.clone());
        });
        number
    }

    pub fn create_application(&self, params: CreateApplicationParams) -> Application {
        let sid = self.new_sid(ResourceKind::Application);
        let app = Application {
            sid: sid.clone(),
            friendly_name: params.friendly_name,
            voice_url: params.voice_url,
            voice_method: params.voice_method,
            status_callback: params.status_callback,
            status_callback_method: params.status_callback_method,
            created_at: SystemTime::now(),
        };
        self.with_state(|s| {
            s.applications.insert(sid, app.clone());
        });
        app
    }

    /// §4.2 "create call" (outbound, application-initiated).
    pub async fn create_call(self: &Arc<Self>, params: CreateCallParams) -> Result<Call> {
        if params.to.trim().is_empty() || params.from.trim().is_empty() {
            return Err(EngineError::Validation(
                "`from` and `to` must not be empty".to_string(),
            ));
        }
        let sid = self.new_sid(ResourceKind::Call);
        let call = self.default_call(
            sid.clone(),
            CallDirection::Outbound,
            params.from,
            params.to,
            params.url,
            params.method,
            params.status_callback,
            params.status_callback_method,
            params.status_callback_events,
            None,
        );
        self.with_state(|s| {
            s.calls.insert(sid.clone(), call.clone());
        });
        self.spawn_runner(sid).await;
        Ok(call)
    }

    /// §4.2 "create incoming call": the simulated PSTN/SIP edge ringing
    /// one of this tenant's provisioned numbers.
    pub async fn create_incoming_call(
        self: &Arc<Self>,
        to_number: &str,
        from: String,
    ) -> Result<Call> {
        let (application_sid, app) = self.read_state(|s| {
            let number = s
                .numbers
                .values()
                .find(|n| n.phone_number == to_number)
                .cloned();
            match number {
                Some(n) => {
                    let app = n
                        .application_sid
                        .as_ref()
                        .and_then(|a| s.applications.get(a))
                        .cloned();
                    (n.application_sid, app)
                }
                None => (None, None),
            }
        });
        let Some(app) = app else {
            return Err(EngineError::Validation(format!(
                "no application configured for number {to_number}"
            )));
        };
        let sid = self.new_sid(ResourceKind::Call);
        let call = self.default_call(
            sid.clone(),
            CallDirection::Inbound,
            from,
            to_number.to_string(),
            app.voice_url.clone(),
            app.voice_method,
            app.status_callback.clone(),
            app.status_callback_method,
            vec![CallStatus::Completed],
            None,
        );
        let _ = application_sid;
        self.with_state(|s| {
            s.calls.insert(sid.clone(), call.clone());
        });
        self.spawn_runner(sid).await;
        Ok(call)
    }

    async fn spawn_runner(self: &Arc<Self>, call_sid: Sid) {
        let handle = crate::runner::spawn(self.clone(), call_sid.clone());
        self.with_state(|s| {
            s.runners.insert(call_sid, handle);
        });
    }

    fn call_or_not_found(&self, call_sid: &Sid) -> Result<Call> {
        self.read_state(|s| {
            s.calls
                .get(call_sid)
                .cloned()
                .ok_or_else(|| EngineError::not_found("call", call_sid.clone()))
        })
    }

    pub fn answer(&self, call_sid: &Sid) -> Result<()> {
        let call = self.call_or_not_found(call_sid)?;
        if call.status != CallStatus::Ringing {
            return Err(EngineError::Validation(format!(
                "cannot answer call {call_sid} in status {}",
                call.status
            )));
        }
        self.read_state(|s| {
            if let Some(h) = s.runners.get(call_sid) {
                h.answer();
            }
        });
        Ok(())
    }

    pub fn set_busy(&self, call_sid: &Sid) -> Result<()> {
        self.call_or_not_found(call_sid)?;
        self.read_state(|s| {
            if let Some(h) = s.runners.get(call_sid) {
                h.busy();
            }
        });
        Ok(())
    }

    pub fn set_failed(&self, call_sid: &Sid) -> Result<()> {
        self.call_or_not_found(call_sid)?;
        self.read_state(|s| {
            if let Some(h) = s.runners.get(call_sid) {
                h.failed();
            }
        });
        Ok(())
    }

    /// §4.2 "hangup": idempotent, close-to-broadcast.
    pub fn hangup(&self, call_sid: &Sid) -> Result<()> {
        self.call_or_not_found(call_sid)?;
        self.read_state(|s| {
            if let Some(h) = s.runners.get(call_sid) {
                h.hangup();
            }
        });
        Ok(())
    }

    pub fn send_digits(&self, call_sid: &Sid, digits: &str) -> Result<()> {
        let call = self.call_or_not_found(call_sid)?;
        if call.is_terminal() {
            return Err(EngineError::Validation(format!(
                "cannot send digits to terminal call {call_sid}"
            )));
        }
        self.read_state(|s| {
            if let Some(h) = s.runners.get(call_sid) {
                h.digits(digits.to_string());
            }
        });
        Ok(())
    }

    pub fn update_call(&self, call_sid: &Sid, params: UpdateCallParams) -> Result<Call> {
        let hang_up_requested = params.status == Some(CallStatus::Completed);
        let new_url = params.url.clone();
        let updated = self.with_state(|s| -> Result<Call> {
            let call = s
                .calls
                .get_mut(call_sid)
                .ok_or_else(|| EngineError::not_found("call", call_sid.clone()))?;
            if let Some(url) = params.url {
                call.url = url;
            }
            if let Some(method) = params.method {
                call.method = method;
            }
            if let Some(cb) = params.status_callback {
                call.status_callback = Some(cb);
            }
            Ok(call.clone())
        })?;
        if let Some(url) = new_url {
            self.read_state(|s| {
                if let Some(h) = s.runners.get(call_sid) {
                    h.url_update(url);
                }
            });
        }
        if hang_up_requested {
            self.hangup(call_sid)?;
        }
        Ok(updated)
    }

    pub fn update_conference(
        &self,
        name: &str,
        params: UpdateConferenceParams,
    ) -> Result<Conference> {
        let conference = self.with_state(|s| -> Result<Conference> {
            let conference = s.conferences.get_mut(name).ok_or_else(|| {
                EngineError::Validation(format!("no such conference `{name}`"))
            })?;
            if let Some(status) = params.status {
                conference.status = status;
                if status == crate::model::ConferenceStatus::Completed {
                    conference.ended_at = Some(SystemTime::now());
                }
            }
            Ok(conference.clone())
        })?;
        if params.status == Some(crate::model::ConferenceStatus::Completed) {
            let participants = conference.participants.clone();
            self.read_state(|s| {
                for p in &participants {
                    if let Some(h) = s.runners.get(p) {
                        h.bridge_end();
                    }
                }
            });
        }
        Ok(conference)
    }

    pub fn update_participant(
        &self,
        conference_name: &str,
        call_sid: &Sid,
        update: ParticipantUpdate,
    ) -> Result<()> {
        self.with_state(|s| -> Result<()> {
            if !s.conferences.contains_key(conference_name) {
                return Err(EngineError::Validation(format!(
                    "no such conference `{conference_name}`"
                )));
            }
            let overlay = s
                .overlays
                .entry((conference_name.to_string(), call_sid.clone()))
                .or_default();
            if let Some(muted) = update.muted {
                overlay.muted = muted;
            }
            if let Some(hold) = update.hold {
                overlay.hold = hold;
            }
            if let Some(url) = update.hold_url {
                overlay.hold_url = Some(url);
            }
            if let Some(method) = update.hold_method {
                overlay.hold_method = method;
            }
            if let Some(url) = update.announce_url {
                overlay.announce_url = Some(url);
            }
            if let Some(method) = update.announce_method {
                overlay.announce_method = method;
            }
            Ok(())
        })
    }

    pub fn snapshot(&self) -> TenantSnapshot {
        self.read_state(|s| TenantSnapshot {
            calls: s.calls.values().cloned().collect(),
            queues: s.queues.values().cloned().collect(),
            conferences: s.conferences.values().cloned().collect(),
        })
    }

    pub fn get_call(&self, call_sid: &Sid) -> Result<Call> {
        self.call_or_not_found(call_sid)
    }

    /// Applies a status transition to `call_sid`, appends the timeline
    /// entry, and (inline, in the caller's task — always the call's own
    /// runner) fires the status callback (§4.5).
    pub async fn transition_call_status(&self, call_sid: &Sid, status: CallStatus) -> Result<Call> {
        let call = self.with_state(|s| -> Result<Call> {
            let call = s
                .calls
                .get_mut(call_sid)
                .ok_or_else(|| EngineError::not_found("call", call_sid.clone()))?;
            call.status = status;
            if status == CallStatus::InProgress && call.answered_at.is_none() {
                call.answered_at = Some(SystemTime::now());
            }
            if status.is_terminal() {
                call.ended_at = Some(SystemTime::now());
            }
            let mut detail = HashMap::new();
            detail.insert("status".to_string(), status.wire_name().to_string());
            call.timeline
                .push(self.clock.now(), SystemTime::now(), "call.status", detail);
            Ok(call.clone())
        })?;
        dispatch_call_status(self, &call).await;
        Ok(call)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;
    use tokio_util::sync::CancellationToken;

    use crate::clock::WallClock;
    use crate::config::EngineConfig;
    use crate::ids::{ResourceKind, Sid, SequentialSidFactory};
    use crate::tenant::Tenant;
    use crate::webhook::ScriptedWebhookClient;

    fn test_tenant() -> Arc<Tenant> {
        Tenant::new(
            "acme",
            "token",
            Arc::new(WallClock),
            Arc::new(ScriptedWebhookClient::new()),
            Arc::new(SequentialSidFactory::new()),
            EngineConfig::default(),
            &CancellationToken::new(),
        )
    }

    proptest! {
        /// C4's queue is a plain FIFO: members leave in the order they
        /// joined, regardless of how many join before the first leaves.
        #[test]
        fn queue_members_leave_in_join_order(n in 0usize..30) {
            let tenant = test_tenant();
            tenant.get_or_create_queue("support");
            let members: Vec<Sid> = (0..n)
                .map(|_| tenant.new_sid(ResourceKind::Call))
                .collect();
            tenant.with_state(|s| {
                let q = s.queues.get_mut("support").unwrap();
                q.members.extend(members.iter().cloned());
            });
            let popped: Vec<Sid> = tenant.with_state(|s| {
                let q = s.queues.get_mut("support").unwrap();
                std::iter::from_fn(|| {
                    if q.members.is_empty() { None } else { Some(q.members.remove(0)) }
                })
                .collect()
            });
            prop_assert_eq!(popped, members);
        }
    }

    #[test]
    fn get_or_create_queue_is_idempotent_by_name() {
        let tenant = test_tenant();
        let a = tenant.get_or_create_queue("support");
        let b = tenant.get_or_create_queue("support");
        assert_eq!(a, b);
    }
}
