//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate contact store calls into the identify use-case.
//! - Keep transport layers (HTTP, CLI) decoupled from storage details.

pub mod identity_service;
