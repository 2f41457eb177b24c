use std::sync::Arc;

use provisioner_core::{
    AuditStore, Config, LifecycleOrchestrator, SanitizedConfig, Scheduler, WorkshopStore,
};

/// Shared application state
pub struct AppState {
    config: Config,
    workshops: Arc<dyn WorkshopStore>,
    orchestrator: Arc<LifecycleOrchestrator>,
    scheduler: Arc<Scheduler>,
    audit_store: Arc<dyn AuditStore>,
}

impl AppState {
    pub fn new(
        config: Config,
        workshops: Arc<dyn WorkshopStore>,
        orchestrator: Arc<LifecycleOrchestrator>,
        scheduler: Arc<Scheduler>,
        audit_store: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            config,
            workshops,
            orchestrator,
            scheduler,
            audit_store,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn workshops(&self) -> &dyn WorkshopStore {
        self.workshops.as_ref()
    }

    pub fn orchestrator(&self) -> &Arc<LifecycleOrchestrator> {
        &self.orchestrator
    }

    pub fn scheduler(&self) -> &Scheduler {
        self.scheduler.as_ref()
    }

    pub fn audit_store(&self) -> &dyn AuditStore {
        self.audit_store.as_ref()
    }
}
