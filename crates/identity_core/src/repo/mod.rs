//! Contact store contracts and the SQLite implementation.
//!
//! # Responsibility
//! - Define the narrow read/write operations the resolver needs.
//! - Keep SQL and soft-delete filtering inside the persistence boundary.
//!
//! # Invariants
//! - Write paths validate row shape before SQL mutations.
//! - Read paths reject invalid persisted rows instead of masking them.

pub mod contact_repo;
