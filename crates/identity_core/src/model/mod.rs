//! Domain model for identity reconciliation.
//!
//! # Responsibility
//! - Define the `Contact` record and its link precedence.
//! - Keep per-row shape rules next to the data they constrain.
//!
//! # Invariants
//! - Every contact is identified by a store-assigned, immutable `ContactId`.
//! - Deletion is a `deleted_at` tombstone, never a hard delete.

pub mod contact;
pub mod timestamp;
