//! Identity reconciliation core.
//! This crate owns the contact store schema and the group invariants.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use logging::{default_log_level, init_logging, logging_status, LogSettings, LoggingError};
pub use model::contact::{Contact, ContactId, ContactValidationError, LinkPrecedence, NewContact};
pub use repo::contact_repo::{
    ContactListQuery, ContactStore, RepoError, RepoResult, SqliteContactStore,
};
pub use service::identity_service::{
    ContactGroup, IdentifyRequest, IdentityError, IdentityResult, IdentityService, ReconcileStats,
};

/// Minimal health-check API for transport liveness checks.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
