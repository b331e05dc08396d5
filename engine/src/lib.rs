//! An in-process simulator of a cloud telephony control plane: a
//! per-call execution engine with a virtualizable clock, tenant state,
//! a CallML verb interpreter, a rendezvous registry for queues and
//! conferences, and a status-callback dispatcher.

pub mod clock;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod ids;
pub mod model;
pub mod params;
mod runner;
pub mod tenant;
mod util;
pub mod webhook;

pub use clock::{Clock, HybridClock, VirtualClock, WallClock};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use ids::{ResourceKind, Sid, SequentialSidFactory, SidFactory, UuidSidFactory};
pub use runner::DequeueSignal;
pub use tenant::{Tenant, TenantSnapshot};
pub use webhook::{ReqwestWebhookClient, ScriptedWebhookClient, WebhookClient, WebhookResponse};
