mod config;
mod coordinator;
mod layout;
mod lock;
mod sink;

pub use config::{
    CoordinatorConfig, UpdaterSettings, DEFAULT_MAX_UPDATE_ATTEMPTS, DEFAULT_POLL_INTERVAL,
    DEFAULT_STAGING_GRACE, DEFAULT_UNLOCK_TIMEOUT,
};
pub use coordinator::{CheckOutcome, ContinueReason, UpdateCoordinator, EXIT_CODE_REPLACING};
pub use layout::IssuerLayout;
pub use lock::{AttemptLock, STALE_LOCK_AGE};
pub use sink::UpdateSink;
