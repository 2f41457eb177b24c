pub mod audit;
pub mod config;
pub mod db;
pub mod deployment;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod provisioner;
pub mod rate_limit;
pub mod scheduler;
pub mod testing;
pub mod workshop;

pub use audit::{
    create_audit_system, AuditError, AuditEvent, AuditFilter, AuditHandle, AuditRecord,
    AuditStore, AuditWriter, SqliteAuditStore,
};
pub use config::{
    config_path_from_env, load_config, load_config_from_str, validate_config, Config,
    ConfigError, LogFormat, SanitizedConfig,
};
pub use deployment::{
    DeploymentAction, DeploymentError, DeploymentLog, DeploymentRecorder, DeploymentStatus,
    SqliteDeploymentRecorder,
};
pub use notify::{
    create_notification_channel, create_notifier, NotificationConfig, NotificationHandle,
    Notifier, StatusNotification,
};
pub use orchestrator::{
    register_jobs, AttendeeStatusReport, LifecycleOrchestrator, OperationResult,
    OrchestratorConfig, OrchestratorError, WorkshopStatusReport,
};
pub use provisioner::{
    CommandProvisioner, ProvisionError, ProvisionOutcome, Provisioner, ProvisionerConfig,
    ProvisioningGateway,
};
pub use rate_limit::{
    create_window_store, Decision, LimitClass, RateLimitConfig, RateLimitError, RateLimiter,
    WindowStore,
};
pub use scheduler::{
    JobContext, JobOutcome, JobReport, JobRun, Lane, Scheduler, SchedulerConfig, SchedulerError,
    SchedulerStatus,
};
pub use workshop::{
    derive_workshop_status, Attendee, CreateAttendeeRequest, CreateWorkshopRequest,
    SqliteWorkshopStore, Status, StoreError, Workshop, WorkshopFilter, WorkshopStore,
};
