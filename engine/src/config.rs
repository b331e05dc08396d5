//! Process-wide, immutable-after-init configuration (§5). The library
//! never reads environment variables itself — callers build an
//! `EngineConfig` however they like (the demo binary uses the `config`
//! crate, matching `knhk`'s configuration layer) and hand it to
//! [`crate::engine::Engine::new`].

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// How long an outbound call rings before `no-answer` (§4.3).
    pub ring_timeout: Duration,
    /// Per-call webhook fetch deadline (§5, default 40s).
    pub webhook_deadline: Duration,
    /// `HybridClock`'s wall-to-virtual synchronisation period (§4.1).
    pub hybrid_clock_sync_period: Duration,
    /// The `ApiVersion` field stamped on callback forms (§6).
    pub api_version: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ring_timeout: Duration::from_secs(60),
            webhook_deadline: Duration::from_secs(40),
            hybrid_clock_sync_period: Duration::from_millis(10),
            api_version: "2010-04-01".to_string(),
        }
    }
}

/// Loads an [`EngineConfig`] from environment variables prefixed
/// `CALLSIM_` (e.g. `CALLSIM_RING_TIMEOUT_SECS=30`), falling back to
/// `EngineConfig::default()` for anything unset. Only used by the demo
/// binary; library consumers are expected to construct `EngineConfig`
/// directly.
pub fn load() -> anyhow::Result<EngineConfig> {
    #[derive(serde::Deserialize, Default)]
    struct Raw {
        ring_timeout_secs: Option<u64>,
        webhook_deadline_secs: Option<u64>,
        hybrid_clock_sync_period_ms: Option<u64>,
        api_version: Option<String>,
    }

    let raw: Raw = config::Config::builder()
        .add_source(config::Environment::with_prefix("CALLSIM"))
        .build()?
        .try_deserialize()
        .unwrap_or_default();

    let default = EngineConfig::default();
    Ok(EngineConfig {
        ring_timeout: raw
            .ring_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(default.ring_timeout),
        webhook_deadline: raw
            .webhook_deadline_secs
            .map(Duration::from_secs)
            .unwrap_or(default.webhook_deadline),
        hybrid_clock_sync_period: raw
            .hybrid_clock_sync_period_ms
            .map(Duration::from_millis)
            .unwrap_or(default.hybrid_clock_sync_period),
        api_version: raw.api_version.unwrap_or(default.api_version),
    })
}
