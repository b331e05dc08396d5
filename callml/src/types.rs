//! The verb tree the engine interprets. Nesting is shallow and closed:
//! only `Gather` and `Dial` have children, and each has a fixed shape
//! (§9 of the spec this was built against — "verb tree ≠ AST traversal").

use std::fmt;

/// The HTTP method used to fetch or post back to a CallML endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum HttpMethod {
    #[default]
    Post,
    Get,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Get => write!(f, "GET"),
        }
    }
}

/// A parsed CallML document: an ordered, flat list of verbs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Document {
    pub verbs: Vec<Verb>,
}

impl Document {
    pub fn new(verbs: Vec<Verb>) -> Self {
        Self { verbs }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.verbs.is_empty()
    }
}

/// One leg of a `<Dial>` target list. `Client` and `Sip` share the
/// simulated-dial path with `Number` (spec §4.3.1, §SPEC_FULL supplement).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DialLegKind {
    Number,
    Client,
    Sip,
}

impl fmt::Display for DialLegKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialLegKind::Number => write!(f, "Number"),
            DialLegKind::Client => write!(f, "Client"),
            DialLegKind::Sip => write!(f, "Sip"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DialLeg {
    pub kind: DialLegKind,
    pub address: String,
}

/// The participant-overlay attributes that can be set when dialing into
/// a conference (mirrors `engine::model::ParticipantOverlay`, but this
/// copy is what the markup requested before the call exists).
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ConferenceDial {
    pub name: String,
    pub muted: bool,
    pub start_conference_on_enter: bool,
    pub end_conference_on_exit: bool,
    pub hold_url: Option<String>,
    pub hold_method: HttpMethod,
    pub status_callback: Option<String>,
    pub status_callback_events: Vec<String>,
}

/// What a `<Dial>` verb is trying to reach. Exactly one of these, never
/// a mix (§4.3 invariant, enforced by the parser).
#[derive(Clone, Debug, PartialEq)]
pub enum DialTarget {
    Queue(String),
    Conference(ConferenceDial),
    Legs(Vec<DialLeg>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Dial {
    pub target: DialTarget,
    pub timeout_secs: Option<u32>,
    pub hangup_on_star: bool,
    pub action: Option<String>,
    pub method: HttpMethod,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Gather {
    pub timeout: Option<String>,
    pub num_digits: Option<u32>,
    pub finish_on_key: Option<String>,
    pub action: Option<String>,
    pub method: HttpMethod,
    /// Only `Say`, `Play`, and `Pause` are permitted here; the parser
    /// rejects anything else as `CallMlError::IllegalChild`.
    pub children: Vec<Verb>,
}

/// A single executable step in a CallML document.
#[derive(Clone, Debug, PartialEq)]
pub enum Verb {
    Say {
        text: String,
        voice: Option<String>,
        language: Option<String>,
        loop_count: u32,
    },
    Play {
        url: String,
        loop_count: u32,
    },
    Pause {
        length_secs: u32,
    },
    Gather(Gather),
    Dial(Dial),
    Enqueue {
        name: String,
        action: Option<String>,
        method: HttpMethod,
        wait_url: Option<String>,
    },
    Redirect {
        url: String,
        method: HttpMethod,
    },
    Record {
        max_length_secs: u32,
        timeout_secs: u32,
        play_beep: bool,
        action: Option<String>,
        method: HttpMethod,
        transcribe: bool,
    },
    Hangup,
}

impl Verb {
    /// The markup element name, used for timeline/error diagnostics.
    pub fn tag(&self) -> &'static str {
        match self {
            Verb::Say { .. } => "Say",
            Verb::Play { .. } => "Play",
            Verb::Pause { .. } => "Pause",
            Verb::Gather(_) => "Gather",
            Verb::Dial(_) => "Dial",
            Verb::Enqueue { .. } => "Enqueue",
            Verb::Redirect { .. } => "Redirect",
            Verb::Record { .. } => "Record",
            Verb::Hangup => "Hangup",
        }
    }
}
