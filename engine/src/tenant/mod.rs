//! C2: tenant state and the operations table (§4.2). A `Tenant` is one
//! subaccount's world: its numbers, applications, calls, queues and
//! conferences, all reachable only under one `parking_lot::RwLock` —
//! the rendezvous registry (C4) lives in here too, per the boundary the
//! spec draws ("accessed only under the tenant lock").

mod ops;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use callml::HttpMethod;

use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::ids::{ResourceKind, Sid, SidFactory};
use crate::model::{
    Application, Call, CallDirection, CallStatus, Conference, ConferenceStatus, EngineErrorRecord,
    ParticipantOverlay, ProvisionedNumber, Queue, SubAccount, Timeline,
};
use crate::dispatch::ConferenceDispatcher;
use crate::runner::RunnerHandle;
use crate::webhook::WebhookClient;

pub use ops::TenantSnapshot;

/// Everything mutable about a tenant, reached only through `Tenant::state`.
pub struct TenantState {
    pub profile: SubAccount,
    pub numbers: HashMap<Sid, ProvisionedNumber>,
    pub applications: HashMap<Sid, Application>,
    pub calls: HashMap<Sid, Call>,
    pub queues: HashMap<String, Queue>,
    pub conferences: HashMap<String, Conference>,
    /// Keyed by (conference name, participant call sid).
    pub overlays: HashMap<(String, Sid), ParticipantOverlay>,
    pub errors: Vec<EngineErrorRecord>,
    pub runners: HashMap<Sid, RunnerHandle>,
    pub conference_dispatchers: HashMap<String, ConferenceDispatcher>,
}

/// One subaccount. Cheap to clone behind an `Arc`; the collaborators
/// (`clock`, `webhook`, `sids`) are themselves `Arc`-shared with the
/// owning [`crate::engine::Engine`].
pub struct Tenant {
    pub sid: Sid,
    pub clock: Arc<dyn Clock>,
    pub webhook: Arc<dyn WebhookClient>,
    pub sids: Arc<dyn SidFactory>,
    pub config: crate::config::EngineConfig,
    pub cancel: CancellationToken,
    state: RwLock<TenantState>,
}

impl Tenant {
    pub fn new(
        friendly_name: impl Into<String>,
        auth_token: impl Into<String>,
        clock: Arc<dyn Clock>,
        webhook: Arc<dyn WebhookClient>,
        sids: Arc<dyn SidFactory>,
        config: crate::config::EngineConfig,
        parent_cancel: &CancellationToken,
    ) -> Arc<Self> {
        let sid = sids.next(ResourceKind::Account);
        let profile = SubAccount {
            sid: sid.clone(),
            friendly_name: friendly_name.into(),
            status: crate::model::AccountStatus::Active,
            created_at: SystemTime::now(),
            auth_token: auth_token.into(),
        };
        Arc::new(Self {
            sid,
            clock,
            webhook,
            sids,
            config,
            cancel: parent_cancel.child_token(),
            state: RwLock::new(TenantState {
                profile,
                numbers: HashMap::new(),
                applications: HashMap::new(),
                calls: HashMap::new(),
                queues: HashMap::new(),
                conferences: HashMap::new(),
                overlays: HashMap::new(),
                errors: Vec::new(),
                runners: HashMap::new(),
                conference_dispatchers: HashMap::new(),
            }),
        })
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut TenantState) -> R) -> R {
        f(&mut self.state.write())
    }

    pub fn read_state<R>(&self, f: impl FnOnce(&TenantState) -> R) -> R {
        f(&self.state.read())
    }

    pub fn new_sid(&self, kind: ResourceKind) -> Sid {
        self.sids.next(kind)
    }

    pub fn record_error(&self, call_sid: Option<Sid>, err: &EngineError) {
        self.with_state(|s| {
            s.errors.push(EngineErrorRecord {
                at: SystemTime::now(),
                call_sid,
                code: match err {
                    EngineError::NotFound { .. } => crate::error::NOT_FOUND_CODE,
                    _ => 0,
                },
                message: err.to_string(),
            });
        });
    }

    fn get_call(state: &TenantState, call_sid: &Sid) -> Result<Call> {
        state
            .calls
            .get(call_sid)
            .cloned()
            .ok_or_else(|| EngineError::not_found("call", call_sid.clone()))
    }

    /// Finds or mints the queue named `name` (C4).
    pub fn get_or_create_queue(&self, name: &str) -> Sid {
        self.with_state(|s| {
            if let Some(q) = s.queues.get(name) {
                return q.sid.clone();
            }
            let sid = self.sids.next(ResourceKind::Queue);
            s.queues.insert(
                name.to_string(),
                Queue {
                    sid: sid.clone(),
                    name: name.to_string(),
                    members: Vec::new(),
                    timeline: Timeline::default(),
                },
            );
            sid
        })
    }

    /// Finds or mints the conference named `name` (C4), spawning its
    /// serial dispatch worker the first time it is created.
    pub fn get_or_create_conference(
        self: &Arc<Self>,
        name: &str,
        status_callback: Option<String>,
        status_callback_events: Vec<crate::model::ConferenceEvent>,
    ) -> Sid {
        self.with_state(|s| {
            if let Some(c) = s.conferences.get(name) {
                return c.sid.clone();
            }
            let sid = self.sids.next(ResourceKind::Conference);
            s.conferences.insert(
                name.to_string(),
                Conference {
                    sid: sid.clone(),
                    name: name.to_string(),
                    participants: Vec::new(),
                    status: ConferenceStatus::Created,
                    created_at: SystemTime::now(),
                    ended_at: None,
                    timeline: Timeline::default(),
                    status_callback,
                    status_callback_events,
                },
            );
            s.conference_dispatchers
                .insert(name.to_string(), ConferenceDispatcher::spawn(self.clone()));
            sid
        })
    }

    /// Enqueues a conference-event callback on that conference's serial
    /// dispatch worker, if one exists (it always does once the
    /// conference itself exists).
    pub fn dispatch_conference_event(
        &self,
        conference: Conference,
        participant: Option<Sid>,
        event: crate::model::ConferenceEvent,
    ) {
        self.read_state(|s| {
            if let Some(worker) = s.conference_dispatchers.get(&conference.name) {
                worker.enqueue(conference, participant, event);
            }
        });
    }

    pub fn default_call(
        &self,
        sid: Sid,
        direction: CallDirection,
        from: String,
        to: String,
        url: String,
        method: HttpMethod,
        status_callback: Option<String>,
        status_callback_method: HttpMethod,
        status_callback_events: Vec<CallStatus>,
        parent_call_sid: Option<Sid>,
    ) -> Call {
        Call {
            sid,
            account_sid: self.sid.clone(),
            parent_call_sid,
            direction,
            status: CallStatus::Initiated,
            from,
            to,
            url,
            method,
            status_callback,
            status_callback_method,
            status_callback_events,
            timeline: Timeline::default(),
            executed_callml: Vec::new(),
            variables: HashMap::new(),
            created_at: SystemTime::now(),
            answered_at: None,
            ended_at: None,
            current_endpoint: None,
        }
    }
}
