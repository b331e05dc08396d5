//! End-to-end scenarios driven against `VirtualClock` + `ScriptedWebhookClient`
//! + `SequentialSidFactory`, so every assertion is deterministic: no real
//! time passes and no real network call happens.

use std::sync::Arc;
use std::time::Duration;

use callml::HttpMethod;
use engine::model::CallStatus;
use engine::params::CreateCallParams;
use engine::{Clock, Engine, ScriptedWebhookClient, SequentialSidFactory, SidFactory, Tenant, VirtualClock, WebhookClient};

fn build_engine() -> (Arc<Engine>, Arc<VirtualClock>, Arc<ScriptedWebhookClient>) {
    let clock = Arc::new(VirtualClock::new());
    let webhook = Arc::new(ScriptedWebhookClient::new());
    let sids = Arc::new(SequentialSidFactory::new());
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let dyn_webhook: Arc<dyn WebhookClient> = webhook.clone();
    let dyn_sids: Arc<dyn SidFactory> = sids.clone();
    let engine = Engine::new(dyn_clock, dyn_webhook, dyn_sids, engine::config::EngineConfig::default());
    (engine, clock, webhook)
}

/// Repeatedly advances `clock` by `tick` (yielding to the executor between
/// each advance) until `pred` is true, or panics after `max_ticks`.
async fn advance_until(clock: &VirtualClock, tick: Duration, max_ticks: u32, mut pred: impl FnMut() -> bool) {
    for _ in 0..max_ticks {
        if pred() {
            return;
        }
        clock.advance(tick);
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached within {max_ticks} ticks of {tick:?}");
}

async fn place_call(tenant: &Arc<Tenant>, url: &str) -> engine::Sid {
    let call = tenant
        .create_call(CreateCallParams {
            from: "+15550001111".to_string(),
            to: "+15550002222".to_string(),
            url: url.to_string(),
            method: HttpMethod::Post,
            status_callback: None,
            status_callback_method: HttpMethod::Post,
            status_callback_events: vec![],
        })
        .await
        .expect("create_call");
    call.sid
}

async fn wait_ringing_then_answer(tenant: &Arc<Tenant>, clock: &VirtualClock, call_sid: &engine::Sid) {
    advance_until(clock, Duration::from_millis(10), 2000, || {
        tenant
            .get_call(call_sid)
            .map(|c| c.status == CallStatus::Ringing)
            .unwrap_or(false)
    })
    .await;
    tenant.answer(call_sid).expect("answer");
}

async fn wait_terminal(tenant: &Arc<Tenant>, clock: &VirtualClock, call_sid: &engine::Sid) {
    advance_until(clock, Duration::from_millis(20), 3000, || {
        tenant.get_call(call_sid).map(|c| c.is_terminal()).unwrap_or(false)
    })
    .await;
}

#[tokio::test]
async fn outbound_call_says_hello_then_hangs_up() {
    let (engine, clock, webhook) = build_engine();
    let tenant = engine.create_subaccount("acme", "token");

    webhook.script_body(
        "https://voice.test/answer",
        "<Response><Say>hello</Say><Hangup/></Response>",
    );

    let call_sid = place_call(&tenant, "https://voice.test/answer").await;
    wait_ringing_then_answer(&tenant, &clock, &call_sid).await;
    wait_terminal(&tenant, &clock, &call_sid).await;

    let call = tenant.get_call(&call_sid).unwrap();
    assert_eq!(call.status, CallStatus::Completed);
    assert_eq!(call.executed_callml, vec!["Say".to_string(), "Hangup".to_string()]);
    assert!(call.timeline.is_monotone());
    assert!(call.answered_at.is_some());
    assert!(call.ended_at.is_some());

    engine.shutdown().await;
}

#[tokio::test]
async fn gather_with_finish_on_key_invokes_action() {
    let (engine, clock, webhook) = build_engine();
    let tenant = engine.create_subaccount("acme", "token");

    webhook.script_body(
        "https://voice.test/answer",
        r#"<Response><Gather action="https://voice.test/gather-done" finishOnKey="#"><Say>enter code</Say></Gather></Response>"#,
    );
    webhook.script_body(
        "https://voice.test/gather-done",
        "<Response><Say>thanks</Say><Hangup/></Response>",
    );

    let call_sid = place_call(&tenant, "https://voice.test/answer").await;
    wait_ringing_then_answer(&tenant, &clock, &call_sid).await;

    advance_until(&clock, Duration::from_millis(10), 2000, || {
        tenant
            .get_call(&call_sid)
            .map(|c| c.status == CallStatus::InProgress)
            .unwrap_or(false)
    })
    .await;

    // Queued ahead of the Gather digit-collection loop; the mpsc channel
    // buffers it regardless of whether the runner is listening yet.
    tenant.send_digits(&call_sid, "1234#").expect("send_digits");

    wait_terminal(&tenant, &clock, &call_sid).await;

    let call = tenant.get_call(&call_sid).unwrap();
    assert_eq!(call.status, CallStatus::Completed);
    assert_eq!(
        call.executed_callml,
        vec!["Gather".to_string(), "Say".to_string(), "Hangup".to_string()]
    );
    assert_eq!(call.variables.get("Digits"), Some(&"1234".to_string()));
    assert!(webhook
        .calls()
        .iter()
        .any(|(method, url)| *method == "POST" && url == "https://voice.test/gather-done"));

    engine.shutdown().await;
}

#[tokio::test]
async fn gather_timeout_with_no_digits_falls_through_to_next_verb() {
    let (engine, clock, webhook) = build_engine();
    let tenant = engine.create_subaccount("acme", "token");

    webhook.script_body(
        "https://voice.test/answer",
        "<Response><Gather><Say>please enter</Say></Gather><Say>no input received</Say><Hangup/></Response>",
    );

    let call_sid = place_call(&tenant, "https://voice.test/answer").await;
    wait_ringing_then_answer(&tenant, &clock, &call_sid).await;
    // No digits ever sent: the per-digit timeout (default 5s) must expire
    // and the call must fall through to the next verb rather than hang.
    wait_terminal(&tenant, &clock, &call_sid).await;

    let call = tenant.get_call(&call_sid).unwrap();
    assert_eq!(call.status, CallStatus::Completed);
    assert_eq!(
        call.executed_callml,
        vec!["Gather".to_string(), "Say".to_string(), "Hangup".to_string()]
    );
    assert!(!call.variables.contains_key("Digits"));
    // No action was configured on the Gather, so nothing should have hit
    // the webhook beyond the original voice fetch.
    assert_eq!(webhook.calls().len(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn dial_number_hangup_on_star_ends_dial_early() {
    let (engine, clock, webhook) = build_engine();
    let tenant = engine.create_subaccount("acme", "token");

    webhook.script_body(
        "https://voice.test/answer",
        r#"<Response><Dial hangupOnStar="true" timeout="60"><Number>+15559999999</Number></Dial><Say>after dial</Say><Hangup/></Response>"#,
    );

    let call_sid = place_call(&tenant, "https://voice.test/answer").await;
    wait_ringing_then_answer(&tenant, &clock, &call_sid).await;

    advance_until(&clock, Duration::from_millis(10), 2000, || {
        tenant
            .get_call(&call_sid)
            .map(|c| c.status == CallStatus::InProgress)
            .unwrap_or(false)
    })
    .await;

    // Buffered the same way Gather digits are; picked up once the dial
    // leg's ring delay has elapsed and its select loop starts listening.
    tenant.send_digits(&call_sid, "*").expect("send_digits");

    wait_terminal(&tenant, &clock, &call_sid).await;

    let call = tenant.get_call(&call_sid).unwrap();
    assert_eq!(call.status, CallStatus::Completed);
    assert_eq!(
        call.executed_callml,
        vec!["Dial".to_string(), "Say".to_string(), "Hangup".to_string()]
    );
    assert_eq!(call.variables.get("DialCallStatus"), Some(&"completed".to_string()));

    engine.shutdown().await;
}

#[tokio::test]
async fn enqueue_dial_queue_bridges_and_ends_on_agent_hangup() {
    let (engine, clock, webhook) = build_engine();
    let tenant = engine.create_subaccount("acme", "token");

    webhook.script_body(
        "https://voice.test/member",
        "<Response><Enqueue>support</Enqueue><Hangup/></Response>",
    );
    webhook.script_body(
        "https://voice.test/agent",
        r#"<Response><Dial timeout="30"><Queue>support</Queue></Dial><Hangup/></Response>"#,
    );

    let member_sid = place_call(&tenant, "https://voice.test/member").await;
    wait_ringing_then_answer(&tenant, &clock, &member_sid).await;
    // Let the member actually join the queue before the agent dials it.
    advance_until(&clock, Duration::from_millis(10), 2000, || {
        tenant
            .get_call(&member_sid)
            .map(|c| c.status == CallStatus::InProgress)
            .unwrap_or(false)
    })
    .await;
    advance_until(&clock, Duration::from_millis(10), 500, || {
        tenant.snapshot().queues.iter().any(|q| q.name == "support" && !q.members.is_empty())
    })
    .await;

    let agent_sid = place_call(&tenant, "https://voice.test/agent").await;
    wait_ringing_then_answer(&tenant, &clock, &agent_sid).await;

    // Once bridged, the pair stays up until one side hangs up.
    advance_until(&clock, Duration::from_millis(10), 2000, || {
        tenant
            .get_call(&member_sid)
            .map(|c| c.variables.contains_key("DequeueCallSid"))
            .unwrap_or(false)
    })
    .await;

    tenant.hangup(&agent_sid).expect("hangup agent");

    wait_terminal(&tenant, &clock, &member_sid).await;
    wait_terminal(&tenant, &clock, &agent_sid).await;

    let member = tenant.get_call(&member_sid).unwrap();
    let agent = tenant.get_call(&agent_sid).unwrap();
    assert_eq!(member.status, CallStatus::Completed);
    assert_eq!(agent.status, CallStatus::Completed);
    assert_eq!(
        member.variables.get("DequeueCallSid"),
        Some(&agent_sid.to_string())
    );
    assert_eq!(
        member.executed_callml,
        vec!["Enqueue".to_string(), "Hangup".to_string()]
    );
    // The agent's Dial returns via the hangup branch directly, so it never
    // reaches its own trailing <Hangup/>.
    assert_eq!(agent.executed_callml, vec!["Dial".to_string()]);

    engine.shutdown().await;
}

#[tokio::test]
async fn conference_ends_when_end_conference_on_exit_participant_leaves() {
    let (engine, clock, webhook) = build_engine();
    let tenant = engine.create_subaccount("acme", "token");

    webhook.script_body(
        "https://voice.test/stays",
        r#"<Response><Dial><Conference endConferenceOnExit="false">room</Conference></Dial><Hangup/></Response>"#,
    );
    webhook.script_body(
        "https://voice.test/moderator",
        r#"<Response><Dial><Conference endConferenceOnExit="true">room</Conference></Dial><Hangup/></Response>"#,
    );

    let staying_sid = place_call(&tenant, "https://voice.test/stays").await;
    wait_ringing_then_answer(&tenant, &clock, &staying_sid).await;
    // The conference only becomes in-progress once a second participant
    // joins; with just one entrant it stays `created`.
    advance_until(&clock, Duration::from_millis(10), 2000, || {
        tenant
            .snapshot()
            .conferences
            .iter()
            .any(|c| c.name == "room" && c.participants.len() == 1)
    })
    .await;

    let moderator_sid = place_call(&tenant, "https://voice.test/moderator").await;
    wait_ringing_then_answer(&tenant, &clock, &moderator_sid).await;
    advance_until(&clock, Duration::from_millis(10), 2000, || {
        tenant.snapshot().conferences.iter().any(|c| {
            c.name == "room"
                && c.status == engine::model::ConferenceStatus::InProgress
                && c.participants.len() == 2
        })
    })
    .await;

    tenant.hangup(&moderator_sid).expect("hangup moderator");

    wait_terminal(&tenant, &clock, &moderator_sid).await;
    wait_terminal(&tenant, &clock, &staying_sid).await;

    let staying = tenant.get_call(&staying_sid).unwrap();
    let moderator = tenant.get_call(&moderator_sid).unwrap();
    assert_eq!(staying.status, CallStatus::Completed);
    assert_eq!(moderator.status, CallStatus::Completed);
    // The moderator's hangup bypasses its own <Hangup/>; the other
    // participant gets kicked via bridge_end and runs its own <Hangup/>.
    assert_eq!(moderator.executed_callml, vec!["Dial".to_string()]);
    assert_eq!(staying.executed_callml, vec!["Dial".to_string(), "Hangup".to_string()]);

    let conference = tenant
        .snapshot()
        .conferences
        .into_iter()
        .find(|c| c.name == "room")
        .expect("conference still exists");
    assert_eq!(conference.status, engine::model::ConferenceStatus::Completed);
    assert!(conference.participants.is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn conference_ends_when_last_participant_leaves() {
    let (engine, clock, webhook) = build_engine();
    let tenant = engine.create_subaccount("acme", "token");

    // Neither leg sets `endConferenceOnExit`; with the Twilio-matching
    // default of `false`, only the last participant leaving should end it.
    webhook.script_body(
        "https://voice.test/first",
        "<Response><Dial><Conference>lobby</Conference></Dial><Hangup/></Response>",
    );
    webhook.script_body(
        "https://voice.test/second",
        "<Response><Dial><Conference>lobby</Conference></Dial><Hangup/></Response>",
    );

    let first_sid = place_call(&tenant, "https://voice.test/first").await;
    wait_ringing_then_answer(&tenant, &clock, &first_sid).await;
    advance_until(&clock, Duration::from_millis(10), 2000, || {
        tenant
            .snapshot()
            .conferences
            .iter()
            .any(|c| c.name == "lobby" && c.participants.len() == 1)
    })
    .await;

    let second_sid = place_call(&tenant, "https://voice.test/second").await;
    wait_ringing_then_answer(&tenant, &clock, &second_sid).await;
    advance_until(&clock, Duration::from_millis(10), 2000, || {
        tenant.snapshot().conferences.iter().any(|c| {
            c.name == "lobby"
                && c.status == engine::model::ConferenceStatus::InProgress
                && c.participants.len() == 2
        })
    })
    .await;

    tenant.hangup(&first_sid).expect("hangup first");
    wait_terminal(&tenant, &clock, &first_sid).await;

    // One participant remains: the conference must still be in-progress.
    let mid = tenant
        .snapshot()
        .conferences
        .into_iter()
        .find(|c| c.name == "lobby")
        .expect("conference still exists");
    assert_eq!(mid.status, engine::model::ConferenceStatus::InProgress);
    assert_eq!(mid.participants.len(), 1);

    tenant.hangup(&second_sid).expect("hangup second");
    wait_terminal(&tenant, &clock, &second_sid).await;

    let conference = tenant
        .snapshot()
        .conferences
        .into_iter()
        .find(|c| c.name == "lobby")
        .expect("conference still exists");
    assert_eq!(conference.status, engine::model::ConferenceStatus::Completed);
    assert!(conference.participants.is_empty());
    assert!(conference.ended_at.is_some());

    engine.shutdown().await;
}

/// Same scenario, two independent engines: both must reach the identical
/// executed-verb sequence and final status purely from virtual-time
/// advancement, with no dependence on real wall-clock scheduling.
#[tokio::test]
async fn virtual_clock_scenario_is_deterministic_across_independent_runs() {
    async fn run_once() -> (CallStatus, Vec<String>) {
        let (engine, clock, webhook) = build_engine();
        let tenant = engine.create_subaccount("acme", "token");
        webhook.script_body(
            "https://voice.test/answer",
            "<Response><Pause length=\"2\"/><Say>hello</Say><Hangup/></Response>",
        );
        let call_sid = place_call(&tenant, "https://voice.test/answer").await;
        wait_ringing_then_answer(&tenant, &clock, &call_sid).await;
        wait_terminal(&tenant, &clock, &call_sid).await;
        let call = tenant.get_call(&call_sid).unwrap();
        engine.shutdown().await;
        (call.status, call.executed_callml)
    }

    let (status_a, verbs_a) = run_once().await;
    let (status_b, verbs_b) = run_once().await;

    assert_eq!(status_a, CallStatus::Completed);
    assert_eq!(status_a, status_b);
    assert_eq!(verbs_a, verbs_b);
    assert_eq!(verbs_a, vec!["Pause".to_string(), "Say".to_string(), "Hangup".to_string()]);
}
