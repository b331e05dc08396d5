//! The data model (§3).

use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

use callml::HttpMethod;

use crate::clock::Instant;
use crate::ids::Sid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AccountStatus {
    #[default]
    Active,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallDirection::Inbound => write!(f, "inbound"),
            CallDirection::Outbound => write!(f, "outbound"),
        }
    }
}

/// §3: one of these nine, with a sticky terminal subset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallStatus {
    Initiated,
    Queued,
    Ringing,
    InProgress,
    Completed,
    Busy,
    Failed,
    NoAnswer,
    Canceled,
    Answered,
}

impl CallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallStatus::Completed
                | CallStatus::Busy
                | CallStatus::Failed
                | CallStatus::NoAnswer
                | CallStatus::Canceled
        )
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            CallStatus::Initiated => "initiated",
            CallStatus::Queued => "queued",
            CallStatus::Ringing => "ringing",
            CallStatus::InProgress => "in-progress",
            CallStatus::Completed => "completed",
            CallStatus::Busy => "busy",
            CallStatus::Failed => "failed",
            CallStatus::NoAnswer => "no-answer",
            CallStatus::Canceled => "canceled",
            CallStatus::Answered => "answered",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// One append-only record on a call's or conference's timeline.
#[derive(Clone, Debug)]
pub struct TimelineEntry {
    pub at: Instant,
    pub wall_time: SystemTime,
    pub event: String,
    pub detail: HashMap<String, String>,
}

#[derive(Clone, Debug, Default)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
}

impl Timeline {
    pub fn push(&mut self, at: Instant, wall_time: SystemTime, event: impl Into<String>, detail: HashMap<String, String>) {
        self.entries.push(TimelineEntry {
            at,
            wall_time,
            event: event.into(),
            detail,
        });
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    /// §8: `∀ i: timeline[i].instant ≤ timeline[i+1].instant`.
    pub fn is_monotone(&self) -> bool {
        self.entries.windows(2).all(|w| w[0].at <= w[1].at)
    }
}

#[derive(Clone, Debug)]
pub struct ProvisionedNumber {
    pub sid: Sid,
    pub phone_number: String,
    pub application_sid: Option<Sid>,
    pub created_at: SystemTime,
}

#[derive(Clone, Debug)]
pub struct Application {
    pub sid: Sid,
    pub friendly_name: String,
    pub voice_url: String,
    pub voice_method: HttpMethod,
    pub status_callback: Option<String>,
    pub status_callback_method: HttpMethod,
    pub created_at: SystemTime,
}

/// Everything executed for a call is appended here (§4.3 "Tracking"),
/// distinct from the timeline: this is the realised flow, for test
/// assertions, not a diagnostic log.
pub type ExecutedCallMl = Vec<String>;

#[derive(Clone, Debug)]
pub struct Call {
    pub sid: Sid,
    pub account_sid: Sid,
    pub parent_call_sid: Option<Sid>,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub from: String,
    pub to: String,
    pub url: String,
    pub method: HttpMethod,
    pub status_callback: Option<String>,
    pub status_callback_method: HttpMethod,
    pub status_callback_events: Vec<CallStatus>,
    pub timeline: Timeline,
    pub executed_callml: ExecutedCallMl,
    pub variables: HashMap<String, String>,
    pub created_at: SystemTime,
    pub answered_at: Option<SystemTime>,
    pub ended_at: Option<SystemTime>,
    /// Debug label for the verb/rendezvous the call is currently inside,
    /// e.g. `"queue:support"`, `"conference:room"`, `"gather"`.
    pub current_endpoint: Option<String>,
}

impl Call {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Queue {
    pub sid: Sid,
    pub name: String,
    pub members: Vec<Sid>,
    pub timeline: Timeline,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConferenceStatus {
    Created,
    InProgress,
    Completed,
}

impl fmt::Display for ConferenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConferenceStatus::Created => write!(f, "created"),
            ConferenceStatus::InProgress => write!(f, "in-progress"),
            ConferenceStatus::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConferenceEvent {
    Start,
    End,
    Join,
    Leave,
}

impl ConferenceEvent {
    pub fn wire_name(self) -> &'static str {
        match self {
            ConferenceEvent::Start => "conference-start",
            ConferenceEvent::End => "conference-end",
            ConferenceEvent::Join => "participant-join",
            ConferenceEvent::Leave => "participant-leave",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Conference {
    pub sid: Sid,
    pub name: String,
    pub participants: Vec<Sid>,
    pub status: ConferenceStatus,
    pub created_at: SystemTime,
    pub ended_at: Option<SystemTime>,
    pub timeline: Timeline,
    pub status_callback: Option<String>,
    pub status_callback_events: Vec<ConferenceEvent>,
}

impl Conference {
    pub fn is_valid_in_progress(&self, overlays: &HashMap<Sid, ParticipantOverlay>) -> bool {
        if self.status != ConferenceStatus::InProgress {
            return true;
        }
        self.participants.len() >= 2
            && self.participants.iter().any(|p| {
                overlays
                    .get(p)
                    .map(|o| o.start_conference_on_enter)
                    .unwrap_or(false)
            })
    }
}

/// Per-(conference, call) attributes, distinct from the call's own state.
#[derive(Clone, Debug, Default)]
pub struct ParticipantOverlay {
    pub muted: bool,
    pub hold: bool,
    pub start_conference_on_enter: bool,
    pub end_conference_on_exit: bool,
    pub hold_url: Option<String>,
    pub hold_method: HttpMethod,
    pub announce_url: Option<String>,
    pub announce_method: HttpMethod,
}

#[derive(Clone, Debug)]
pub struct SubAccount {
    pub sid: Sid,
    pub friendly_name: String,
    pub status: AccountStatus,
    pub created_at: SystemTime,
    pub auth_token: String,
}

#[derive(Clone, Debug)]
pub struct EngineErrorRecord {
    pub at: SystemTime,
    pub call_sid: Option<Sid>,
    pub code: u32,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// §8: `∀ i: timeline[i].instant ≤ timeline[i+1].instant` holds
        /// for any sequence of entries pushed in non-decreasing offsets
        /// from a common base instant.
        #[test]
        fn sorted_offsets_are_always_monotone(mut offsets in proptest::collection::vec(0u64..10_000, 0..50)) {
            offsets.sort_unstable();
            let base = crate::clock::Instant::now();
            let mut timeline = Timeline::default();
            for ms in &offsets {
                timeline.push(base + std::time::Duration::from_millis(*ms), SystemTime::now(), "tick", HashMap::new());
            }
            prop_assert!(timeline.is_monotone());
        }

        /// A single out-of-order pair is enough to break monotonicity,
        /// unless the two offsets happen to be equal.
        #[test]
        fn a_single_inversion_breaks_monotonicity(a in 1u64..10_000, b in 0u64..9_999) {
            prop_assume!(b < a);
            let base = crate::clock::Instant::now();
            let mut timeline = Timeline::default();
            timeline.push(base + std::time::Duration::from_millis(a), SystemTime::now(), "first", HashMap::new());
            timeline.push(base + std::time::Duration::from_millis(b), SystemTime::now(), "second", HashMap::new());
            prop_assert!(!timeline.is_monotone());
        }
    }
}
