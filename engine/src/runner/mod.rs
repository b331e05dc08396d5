//! C3: the call runner (§4.3), the largest component. One `tokio` task
//! per call, reachable only through a small set of bounded channels —
//! the same "actor with a mailbox" shape as `ringrtc::simnet::actor`,
//! except the mailbox here is several single-slot `mpsc` channels (one
//! per signal kind) instead of one `BinaryHeap` of delayed tasks, and
//! hangup is a `CancellationToken` rather than a channel message, since
//! it must be observable from *anywhere* in the verb interpreter without
//! being consumed like an ordinary signal.

mod dial;
mod verbs;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use callml::{Document, HttpMethod, Verb};

use crate::error::{EngineError, Result};
use crate::ids::{ResourceKind, Sid};
use crate::model::{CallDirection, CallStatus};
use crate::tenant::Tenant;
use crate::util::resolve_url;

pub use dial::DequeueSignal;

const SIGNAL_CAPACITY: usize = 1;

struct RunnerSignals {
    answer: mpsc::Sender<()>,
    busy: mpsc::Sender<()>,
    failed: mpsc::Sender<()>,
    digits: mpsc::Sender<String>,
    dequeue: mpsc::Sender<DequeueSignal>,
    url_update: mpsc::Sender<String>,
    bridge_end: mpsc::Sender<()>,
}

/// What the rest of the engine holds onto to steer a running call.
/// Every signal is best-effort: a full slot means a signal of that kind
/// is already pending, so a second one is simply dropped (§4.3:
/// "single-slot, drop-if-full").
pub struct RunnerHandle {
    signals: RunnerSignals,
    hangup_token: CancellationToken,
    pub(crate) join: tokio::task::JoinHandle<()>,
}

impl RunnerHandle {
    pub fn answer(&self) {
        let _ = self.signals.answer.try_send(());
    }
    pub fn busy(&self) {
        let _ = self.signals.busy.try_send(());
    }
    pub fn failed(&self) {
        let _ = self.signals.failed.try_send(());
    }
    pub fn digits(&self, digits: String) {
        let _ = self.signals.digits.try_send(digits);
    }
    pub fn dequeue(&self, signal: DequeueSignal) {
        let _ = self.signals.dequeue.try_send(signal);
    }
    pub fn url_update(&self, url: String) {
        let _ = self.signals.url_update.try_send(url);
    }
    pub fn bridge_end(&self) {
        let _ = self.signals.bridge_end.try_send(());
    }
    /// Idempotent; cancelling an already-cancelled token is a no-op.
    pub fn hangup(&self) {
        self.hangup_token.cancel();
    }
}

/// What a verb handler asks the interpreter loop to do next.
pub(crate) enum VerbAction {
    Next,
    ReplaceDocument(Document, String),
    Hangup,
}

/// What ran out at the end of a document: either the call hung up, or
/// a new URL arrived to re-enter the fetch loop (§4.3 "Completion").
pub(crate) enum WaitOutcome {
    Hangup,
    Refetch(String),
}

enum PickupOutcome {
    Answered,
    Busy,
    Failed,
    NoAnswer,
    Hangup,
}

pub(crate) struct Runner {
    tenant: Arc<Tenant>,
    call_sid: Sid,
    hangup: CancellationToken,
    answer_rx: mpsc::Receiver<()>,
    busy_rx: mpsc::Receiver<()>,
    failed_rx: mpsc::Receiver<()>,
    digits_rx: mpsc::Receiver<String>,
    dequeue_rx: mpsc::Receiver<DequeueSignal>,
    url_update_rx: mpsc::Receiver<String>,
    bridge_end_rx: mpsc::Receiver<()>,
}

/// Spawns the `tokio` task backing `call_sid` and returns the handle the
/// rest of the engine uses to steer it.
pub fn spawn(tenant: Arc<Tenant>, call_sid: Sid) -> RunnerHandle {
    let (answer_tx, answer_rx) = mpsc::channel(SIGNAL_CAPACITY);
    let (busy_tx, busy_rx) = mpsc::channel(SIGNAL_CAPACITY);
    let (failed_tx, failed_rx) = mpsc::channel(SIGNAL_CAPACITY);
    let (digits_tx, digits_rx) = mpsc::channel(SIGNAL_CAPACITY);
    let (dequeue_tx, dequeue_rx) = mpsc::channel(SIGNAL_CAPACITY);
    let (url_update_tx, url_update_rx) = mpsc::channel(SIGNAL_CAPACITY);
    let (bridge_end_tx, bridge_end_rx) = mpsc::channel(SIGNAL_CAPACITY);
    let hangup_token = tenant.cancel.child_token();

    let runner = Runner {
        tenant,
        call_sid,
        hangup: hangup_token.clone(),
        answer_rx,
        busy_rx,
        failed_rx,
        digits_rx,
        dequeue_rx,
        url_update_rx,
        bridge_end_rx,
    };
    let join = tokio::spawn(runner.run());

    RunnerHandle {
        signals: RunnerSignals {
            answer: answer_tx,
            busy: busy_tx,
            failed: failed_tx,
            digits: digits_tx,
            dequeue: dequeue_tx,
            url_update: url_update_tx,
            bridge_end: bridge_end_tx,
        },
        hangup_token,
        join,
    }
}

impl Runner {
    async fn run(mut self) {
        let Some(direction) = self
            .tenant
            .read_state(|s| s.calls.get(&self.call_sid).map(|c| c.direction))
        else {
            return;
        };

        if self.transition(CallStatus::Ringing).await.is_err() {
            return;
        }

        let prefetched = match direction {
            CallDirection::Inbound => {
                let (url, method) = self.current_url_method();
                match self.fetch_callml(&url, method).await {
                    Ok(doc) => {
                        if self.transition(CallStatus::InProgress).await.is_err() {
                            return;
                        }
                        Some((doc, url))
                    }
                    Err(e) => {
                        self.mark_failed(e).await;
                        return;
                    }
                }
            }
            CallDirection::Outbound => match self.wait_for_outbound_pickup().await {
                PickupOutcome::Answered => {
                    if self.transition(CallStatus::InProgress).await.is_err() {
                        return;
                    }
                    None
                }
                PickupOutcome::Busy => {
                    let _ = self.transition(CallStatus::Busy).await;
                    return;
                }
                PickupOutcome::Failed => {
                    let _ = self.transition(CallStatus::Failed).await;
                    return;
                }
                PickupOutcome::NoAnswer => {
                    let _ = self.transition(CallStatus::NoAnswer).await;
                    return;
                }
                PickupOutcome::Hangup => {
                    let _ = self.transition(CallStatus::Canceled).await;
                    return;
                }
            },
        };

        let (mut doc, mut source_url) = match prefetched {
            Some(pair) => pair,
            None => {
                let (url, method) = self.current_url_method();
                match self.fetch_callml(&url, method).await {
                    Ok(doc) => (doc, url),
                    Err(e) => {
                        self.mark_failed(e).await;
                        return;
                    }
                }
            }
        };

        'docs: loop {
            let mut idx = 0;
            while idx < doc.verbs.len() {
                if self.hangup.is_cancelled() {
                    let _ = self.transition(CallStatus::Completed).await;
                    return;
                }
                let verb = doc.verbs[idx].clone();
                self.record_executed(&verb);
                match self.exec_verb(&verb, &source_url).await {
                    Ok(VerbAction::Next) => idx += 1,
                    Ok(VerbAction::ReplaceDocument(new_doc, new_url)) => {
                        doc = new_doc;
                        source_url = new_url;
                        continue 'docs;
                    }
                    Ok(VerbAction::Hangup) => {
                        let _ = self.transition(CallStatus::Completed).await;
                        return;
                    }
                    Err(e) => {
                        self.mark_failed(e).await;
                        return;
                    }
                }
            }
            match self.wait_for_hangup_or_url_update().await {
                WaitOutcome::Hangup => {
                    let _ = self.transition(CallStatus::Completed).await;
                    return;
                }
                WaitOutcome::Refetch(url) => match self.fetch_and_parse(&url, &source_url).await {
                    Ok((new_doc, resolved)) => {
                        doc = new_doc;
                        source_url = resolved;
                    }
                    Err(e) => {
                        self.mark_failed(e).await;
                        return;
                    }
                },
            }
        }
    }

    async fn wait_for_outbound_pickup(&mut self) -> PickupOutcome {
        let ring_timeout = self.tenant.config.ring_timeout;
        tokio::select! {
            _ = self.hangup.cancelled() => PickupOutcome::Hangup,
            Some(()) = self.answer_rx.recv() => PickupOutcome::Answered,
            Some(()) = self.busy_rx.recv() => PickupOutcome::Busy,
            Some(()) = self.failed_rx.recv() => PickupOutcome::Failed,
            _ = self.tenant.clock.sleep(ring_timeout) => PickupOutcome::NoAnswer,
        }
    }

    pub(crate) async fn wait_for_hangup_or_url_update(&mut self) -> WaitOutcome {
        tokio::select! {
            _ = self.hangup.cancelled() => WaitOutcome::Hangup,
            Some(url) = self.url_update_rx.recv() => WaitOutcome::Refetch(url),
        }
    }

    async fn exec_verb(&mut self, verb: &Verb, source_url: &str) -> Result<VerbAction> {
        match verb {
            Verb::Say { loop_count, .. } => {
                self.run_timed_or_indefinite(*loop_count, Duration::from_millis(300), source_url)
                    .await
            }
            Verb::Play { loop_count, .. } => {
                self.run_timed_or_indefinite(*loop_count, Duration::from_secs(1), source_url)
                    .await
            }
            Verb::Pause { length_secs } => self.exec_pause(*length_secs).await,
            Verb::Redirect { url, method } => self.exec_redirect(url, *method, source_url).await,
            Verb::Hangup => Ok(VerbAction::Hangup),
            Verb::Gather(g) => verbs::exec_gather(self, g, source_url).await,
            Verb::Record {
                max_length_secs,
                timeout_secs,
                play_beep,
                action,
                method,
                transcribe,
            } => {
                verbs::exec_record(
                    self,
                    *max_length_secs,
                    *timeout_secs,
                    *play_beep,
                    action.as_deref(),
                    *method,
                    *transcribe,
                    source_url,
                )
                .await
            }
            Verb::Dial(d) => dial::exec_dial(self, d, source_url).await,
            Verb::Enqueue {
                name,
                action,
                method,
                wait_url,
            } => {
                dial::exec_enqueue(
                    self,
                    name,
                    action.as_deref(),
                    *method,
                    wait_url.as_deref(),
                    source_url,
                )
                .await
            }
        }
    }

    async fn run_timed_or_indefinite(
        &mut self,
        loop_count: u32,
        unit: Duration,
        source_url: &str,
    ) -> Result<VerbAction> {
        if loop_count == 0 {
            return match self.wait_for_hangup_or_url_update().await {
                WaitOutcome::Hangup => Ok(VerbAction::Hangup),
                WaitOutcome::Refetch(url) => {
                    let (doc, resolved) = self.fetch_and_parse(&url, source_url).await?;
                    Ok(VerbAction::ReplaceDocument(doc, resolved))
                }
            };
        }
        for _ in 0..loop_count {
            tokio::select! {
                _ = self.hangup.cancelled() => return Ok(VerbAction::Hangup),
                _ = self.tenant.clock.sleep(unit) => {}
            }
        }
        Ok(VerbAction::Next)
    }

    async fn exec_pause(&mut self, secs: u32) -> Result<VerbAction> {
        tokio::select! {
            _ = self.hangup.cancelled() => Ok(VerbAction::Hangup),
            _ = self.tenant.clock.sleep(Duration::from_secs(secs as u64)) => Ok(VerbAction::Next),
        }
    }

    async fn exec_redirect(
        &mut self,
        url: &str,
        method: HttpMethod,
        source_url: &str,
    ) -> Result<VerbAction> {
        let resolved = resolve_url(source_url, url)?;
        let doc = self.fetch_callml(&resolved, method).await?;
        Ok(VerbAction::ReplaceDocument(doc, resolved))
    }

    /// Fetches `action_url` (resolved against `source_url`), POSTs/GETs
    /// `form`, and turns the response into the next document to run — or,
    /// per §7, an empty response body is an implicit hangup.
    pub(crate) async fn invoke_action(
        &mut self,
        action_url: &str,
        method: HttpMethod,
        source_url: &str,
        mut form: HashMap<String, String>,
    ) -> Result<VerbAction> {
        let resolved = resolve_url(source_url, action_url)?;
        form.insert("CallSid".to_string(), self.call_sid.to_string());
        let response = match method {
            HttpMethod::Post => self.tenant.webhook.post(&resolved, &form).await?,
            HttpMethod::Get => {
                let query = encode_query(&form);
                self.tenant
                    .webhook
                    .get(&format!("{resolved}?{query}"))
                    .await?
            }
        };
        if response.body.trim().is_empty() {
            return Ok(VerbAction::Hangup);
        }
        let doc = callml::parse(&response.body).map_err(|source| EngineError::CallMlParse {
            url: resolved.clone(),
            source,
        })?;
        Ok(VerbAction::ReplaceDocument(doc, resolved))
    }

    async fn fetch_and_parse(&mut self, url: &str, source_url: &str) -> Result<(Document, String)> {
        let resolved = resolve_url(source_url, url)?;
        let doc = self.fetch_callml(&resolved, HttpMethod::Post).await?;
        Ok((doc, resolved))
    }

    async fn fetch_callml(&mut self, url: &str, method: HttpMethod) -> Result<Document> {
        let response = match method {
            HttpMethod::Post => {
                let form = self.request_form();
                self.tenant.webhook.post(url, &form).await?
            }
            HttpMethod::Get => self.tenant.webhook.get(url).await?,
        };
        callml::parse(&response.body).map_err(|source| EngineError::CallMlParse {
            url: url.to_string(),
            source,
        })
    }

    fn request_form(&self) -> HashMap<String, String> {
        let call = self.tenant.read_state(|s| s.calls.get(&self.call_sid).cloned());
        let mut form = HashMap::new();
        form.insert(
            "ApiVersion".to_string(),
            self.tenant.config.api_version.clone(),
        );
        form.insert("CallSid".to_string(), self.call_sid.to_string());
        if let Some(call) = call {
            form.insert("AccountSid".to_string(), call.account_sid.to_string());
            form.insert("From".to_string(), call.from);
            form.insert("To".to_string(), call.to);
            form.insert("CallStatus".to_string(), call.status.wire_name().to_string());
            form.insert("Direction".to_string(), call.direction.to_string());
            for (k, v) in call.variables {
                form.insert(k, v);
            }
        }
        form
    }

    fn current_url_method(&self) -> (String, HttpMethod) {
        self.tenant
            .read_state(|s| {
                s.calls
                    .get(&self.call_sid)
                    .map(|c| (c.url.clone(), c.method))
            })
            .unwrap_or_default()
    }

    fn record_executed(&mut self, verb: &Verb) {
        let tag = verb.tag().to_string();
        self.tenant.with_state(|s| {
            if let Some(call) = s.calls.get_mut(&self.call_sid) {
                call.executed_callml.push(tag);
            }
        });
    }

    pub(crate) fn set_variable(&mut self, key: &str, value: String) {
        self.tenant.with_state(|s| {
            if let Some(call) = s.calls.get_mut(&self.call_sid) {
                call.variables.insert(key.to_string(), value);
            }
        });
    }

    pub(crate) fn new_sid(&self, kind: ResourceKind) -> Sid {
        self.tenant.new_sid(kind)
    }

    pub(crate) fn tenant(&self) -> &Arc<Tenant> {
        &self.tenant
    }

    pub(crate) fn call_sid(&self) -> &Sid {
        &self.call_sid
    }

    pub(crate) fn hangup_token(&self) -> &CancellationToken {
        &self.hangup
    }

    pub(crate) async fn recv_digits(&mut self) -> Option<String> {
        self.digits_rx.recv().await
    }

    pub(crate) async fn recv_dequeue(&mut self) -> Option<DequeueSignal> {
        self.dequeue_rx.recv().await
    }

    pub(crate) async fn recv_bridge_end(&mut self) -> Option<()> {
        self.bridge_end_rx.recv().await
    }

    async fn transition(&mut self, status: CallStatus) -> Result<crate::model::Call> {
        debug!("call {} -> {status}", self.call_sid);
        self.tenant.transition_call_status(&self.call_sid, status).await
    }

    async fn mark_failed(&mut self, err: EngineError) {
        warn!("call {} failed: {err}", self.call_sid);
        self.tenant.record_error(Some(self.call_sid.clone()), &err);
        let _ = self.transition(CallStatus::Failed).await;
    }
}

fn encode_query(form: &HashMap<String, String>) -> String {
    form.iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                url::form_urlencoded::byte_serialize(k.as_bytes()).collect::<String>(),
                url::form_urlencoded::byte_serialize(v.as_bytes()).collect::<String>()
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}
