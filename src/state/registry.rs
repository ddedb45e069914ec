//! Per-account orchestrator registry

use crate::config::OrchestratorConfig;
use crate::orchestrator::TransactionOrchestrator;
use crate::tx::{BroadcastClient, BuilderClient, SignerGateway};

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Orchestrator over boxed collaborators, as used by the HTTP API
pub type DynOrchestrator =
    TransactionOrchestrator<dyn BuilderClient, dyn SignerGateway, dyn BroadcastClient>;

struct Session {
    orchestrator: Arc<DynOrchestrator>,
    last_used: Instant,
}

impl Session {
    /// No request holds the orchestrator, so no run can be in flight
    fn is_unused(&self) -> bool {
        Arc::strong_count(&self.orchestrator) == 1
    }
}

pub struct SessionRegistry {
    builder: Arc<dyn BuilderClient>,
    signer: Arc<dyn SignerGateway>,
    broadcaster: Arc<dyn BroadcastClient>,
    config: OrchestratorConfig,
    sessions: DashMap<String, Session>,
}

impl SessionRegistry {
    pub fn new(
        builder: Arc<dyn BuilderClient>,
        signer: Arc<dyn SignerGateway>,
        broadcaster: Arc<dyn BroadcastClient>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            builder,
            signer,
            broadcaster,
            config,
            sessions: DashMap::new(),
        }
    }

    /// Orchestrator for the account, created on first use
    pub fn get_or_create(&self, account: &str) -> Arc<DynOrchestrator> {
        let mut session = self.sessions.entry(account.to_string()).or_insert_with(|| {
            debug!(%account, "Creating orchestrator session");
            Session {
                orchestrator: Arc::new(self.create(account)),
                last_used: Instant::now(),
            }
        });
        session.last_used = Instant::now();
        session.orchestrator.clone()
    }

    pub fn get(&self, account: &str) -> Option<Arc<DynOrchestrator>> {
        self.sessions.get(account).map(|s| s.orchestrator.clone())
    }

    /// Mark the session as recently used, keeping its terminal value readable
    pub fn touch(&self, account: &str) {
        if let Some(mut session) = self.sessions.get_mut(account) {
            session.last_used = Instant::now();
        }
    }

    /// Reset the account's orchestrator and drop the session when nothing
    /// else holds it. Returns whether a session existed.
    pub async fn reset(&self, account: &str) -> bool {
        let Some(orchestrator) = self.get(account) else {
            return false;
        };
        orchestrator.reset().await;
        drop(orchestrator);

        if self.sessions.remove_if(account, |_, s| s.is_unused()).is_some() {
            debug!(%account, "Dropped session after reset");
        }
        true
    }

    /// Drop sessions nobody holds that were last used more than `ttl` ago.
    /// Returns how many were dropped.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, s| !s.is_unused() || s.last_used.elapsed() < ttl);
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            debug!(evicted, remaining = self.sessions.len(), "Evicted idle sessions");
        }
        evicted
    }

    pub fn idle_ttl(&self) -> Duration {
        self.config.session_idle_ttl()
    }

    fn create(&self, account: &str) -> DynOrchestrator {
        let mut orchestrator = TransactionOrchestrator::new(
            self.builder.clone(),
            self.signer.clone(),
            self.broadcaster.clone(),
            &self.config,
        );

        let account = account.to_string();
        orchestrator.on_step(move |event| {
            debug!(
                %account,
                run_id = ?event.run_id,
                step = %event.step,
                asset = ?event.asset,
                failure = ?event.failure,
                "Step changed"
            );
        });

        orchestrator
    }
}
