//! Opaque resource identifiers.
//!
//! SID generation is treated as an external collaborator (the source
//! system has a dedicated opaque-string factory outside the call engine);
//! here that boundary is a trait so the engine never hard-codes how a SID
//! is minted, mirroring how `ringrtc::core::util::uuid_to_string` is a
//! free function the rest of the crate calls through rather than reaching
//! for `uuid::Uuid` directly everywhere.

use std::fmt;

use uuid::Uuid;

/// A resource class, encoded as the two-letter prefix of a [`Sid`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Account,
    Call,
    Queue,
    Conference,
    PhoneNumber,
    Application,
    Recording,
}

impl ResourceKind {
    pub const fn prefix(self) -> &'static str {
        match self {
            ResourceKind::Account => "AC",
            ResourceKind::Call => "CA",
            ResourceKind::Queue => "QU",
            ResourceKind::Conference => "CF",
            ResourceKind::PhoneNumber => "PN",
            ResourceKind::Application => "AP",
            ResourceKind::Recording => "RE",
        }
    }
}

/// An opaque, globally-unique, lexicographically-comparable identifier.
///
/// Treated as a value type: cheap to clone, comparable, hashable.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sid(String);

impl Sid {
    /// Build a `Sid` from an already-formatted string (e.g. round-tripped
    /// through a snapshot or a callback form). Does not validate the
    /// prefix; callers that need that should use [`Sid::kind`].
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The resource class this id claims to be, if its prefix is known.
    pub fn kind(&self) -> Option<ResourceKind> {
        use ResourceKind::*;
        let prefix = self.0.get(..2)?;
        [
            Account,
            Call,
            Queue,
            Conference,
            PhoneNumber,
            Application,
            Recording,
        ]
        .into_iter()
        .find(|k| k.prefix() == prefix)
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sid({})", self.0)
    }
}

/// Mints opaque [`Sid`]s. Swappable so tests can make identifiers
/// deterministic without touching engine logic.
pub trait SidFactory: Send + Sync {
    fn next(&self, kind: ResourceKind) -> Sid;
}

/// The production `SidFactory`: a v4 UUID's hex digits behind the
/// resource-class prefix.
#[derive(Default)]
pub struct UuidSidFactory;

impl SidFactory for UuidSidFactory {
    fn next(&self, kind: ResourceKind) -> Sid {
        let hex = Uuid::new_v4().simple().to_string();
        Sid(format!("{}{}", kind.prefix(), hex))
    }
}

/// A `SidFactory` that hands out predictable, incrementing ids, for
/// tests that want to assert on exact identifier values.
pub struct SequentialSidFactory {
    counter: std::sync::atomic::AtomicU64,
}

impl SequentialSidFactory {
    pub fn new() -> Self {
        Self {
            counter: std::sync::atomic::AtomicU64::new(1),
        }
    }
}

impl Default for SequentialSidFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SidFactory for SequentialSidFactory {
    fn next(&self, kind: ResourceKind) -> Sid {
        let n = self
            .counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Sid(format!("{}{:032x}", kind.prefix(), n))
    }
}
