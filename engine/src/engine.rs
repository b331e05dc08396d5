//! The top-level entry point: a registry of tenants under one lock,
//! plus the collaborators every tenant shares (§5). Shaped after
//! `ringrtc`'s top-level `CallManager`: one long-lived object owns the
//! shared clock/http/id collaborators and hands out per-subaccount
//! handles, rather than each subaccount reaching for globals.

use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::ids::{Sid, SidFactory};
use crate::tenant::Tenant;
use crate::webhook::WebhookClient;

/// Process-wide simulator state: every subaccount, plus the shared,
/// `Arc`-held collaborators they're constructed with.
pub struct Engine {
    clock: Arc<dyn Clock>,
    webhook: Arc<dyn WebhookClient>,
    sids: Arc<dyn SidFactory>,
    config: EngineConfig,
    cancel: CancellationToken,
    tenants: RwLock<HashMap<Sid, Arc<Tenant>>>,
}

impl Engine {
    pub fn new(
        clock: Arc<dyn Clock>,
        webhook: Arc<dyn WebhookClient>,
        sids: Arc<dyn SidFactory>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            clock,
            webhook,
            sids,
            config,
            cancel: CancellationToken::new(),
            tenants: RwLock::new(HashMap::new()),
        })
    }

    /// §4.2 "create subaccount".
    pub fn create_subaccount(
        &self,
        friendly_name: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Arc<Tenant> {
        let tenant = Tenant::new(
            friendly_name,
            auth_token,
            self.clock.clone(),
            self.webhook.clone(),
            self.sids.clone(),
            self.config.clone(),
            &self.cancel,
        );
        self.tenants.write().insert(tenant.sid.clone(), tenant.clone());
        tenant
    }

    pub fn tenant(&self, account_sid: &Sid) -> Result<Arc<Tenant>> {
        self.tenants
            .read()
            .get(account_sid)
            .cloned()
            .ok_or_else(|| EngineError::not_found("account", account_sid.clone()))
    }

    pub fn tenants(&self) -> Vec<Arc<Tenant>> {
        self.tenants.read().values().cloned().collect()
    }

    /// §5 "Close()": cancels every tenant's hangup context and joins
    /// every outstanding runner task before returning.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let runners: Vec<_> = {
            let tenants = self.tenants.read();
            tenants
                .values()
                .flat_map(|t| t.with_state(|s| std::mem::take(&mut s.runners)))
                .collect()
        };
        info!("shutting down, joining {} outstanding call runner(s)", runners.len());
        for (_, handle) in runners {
            let _ = handle.join.await;
        }
    }
}
