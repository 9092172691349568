//! Contact domain model.
//!
//! # Responsibility
//! - Define the single persisted entity of the identity store.
//! - Provide row-shape validation shared by store write and read paths.
//!
//! # Invariants
//! - `id` and `created_at` are assigned by the store and never change.
//! - A primary carries no `linked_id`; a secondary links to another contact.
//! - At least one of `email` / `phone_number` is present.

use super::timestamp;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Store-assigned contact identifier.
pub type ContactId = i64;

/// Role of a contact inside its identity group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPrecedence {
    /// Canonical anchor of the group (the oldest contact).
    Primary,
    /// Any other member; `linked_id` points at the primary.
    Secondary,
}

impl LinkPrecedence {
    /// Storage/wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    /// Parses the storage representation; `None` for unknown values.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }
}

impl Display for LinkPrecedence {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row-shape violation for a contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactValidationError {
    /// Neither email nor phone number is set.
    MissingIdentifier,
    /// A primary contact carries a `linked_id`.
    PrimaryWithLink { linked_id: ContactId },
    /// A secondary contact has no `linked_id`.
    SecondaryWithoutLink,
    /// A secondary contact links to itself.
    SelfLink { id: ContactId },
}

impl Display for ContactValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingIdentifier => {
                write!(f, "contact must carry an email or a phone number")
            }
            Self::PrimaryWithLink { linked_id } => {
                write!(f, "primary contact must not link to {linked_id}")
            }
            Self::SecondaryWithoutLink => write!(f, "secondary contact must have linked_id"),
            Self::SelfLink { id } => write!(f, "contact {id} cannot link to itself"),
        }
    }
}

impl Error for ContactValidationError {}

/// Persisted contact record.
///
/// Serialized with the external camelCase names (`phoneNumber`, `linkedId`,
/// `linkPrecedence`, ...). Timestamps are held as Unix epoch milliseconds
/// and travel as RFC 3339 UTC strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ContactId,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
    #[serde(with = "timestamp::epoch_ms")]
    pub created_at: i64,
    #[serde(with = "timestamp::epoch_ms")]
    pub updated_at: i64,
    #[serde(with = "timestamp::option_epoch_ms")]
    pub deleted_at: Option<i64>,
}

impl Contact {
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    /// Id of the group primary this contact belongs to.
    pub fn anchor_id(&self) -> ContactId {
        self.linked_id.unwrap_or(self.id)
    }

    /// Seniority key: older first, store id breaks timestamp ties.
    pub fn seniority(&self) -> (i64, ContactId) {
        (self.created_at, self.id)
    }

    /// Returns whether every supplied identifier equals this contact's value.
    ///
    /// An unsupplied identifier is a wildcard, so `(Some(email), None)`
    /// matches any contact with that email regardless of its phone.
    pub fn covers(&self, email: Option<&str>, phone_number: Option<&str>) -> bool {
        let email_ok = email.map_or(true, |value| self.email.as_deref() == Some(value));
        let phone_ok =
            phone_number.map_or(true, |value| self.phone_number.as_deref() == Some(value));
        email_ok && phone_ok
    }

    /// Validates the row shape.
    pub fn validate(&self) -> Result<(), ContactValidationError> {
        validate_shape(
            Some(self.id),
            self.email.as_deref(),
            self.phone_number.as_deref(),
            self.link_precedence,
            self.linked_id,
        )
    }
}

/// Insert payload; the store assigns `id` and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub link_precedence: LinkPrecedence,
    pub linked_id: Option<ContactId>,
}

impl NewContact {
    /// A fresh group anchor.
    pub fn primary(email: Option<&str>, phone_number: Option<&str>) -> Self {
        Self {
            email: email.map(str::to_owned),
            phone_number: phone_number.map(str::to_owned),
            link_precedence: LinkPrecedence::Primary,
            linked_id: None,
        }
    }

    /// A new fact pattern attached to an existing group.
    pub fn secondary(
        email: Option<&str>,
        phone_number: Option<&str>,
        primary_id: ContactId,
    ) -> Self {
        Self {
            email: email.map(str::to_owned),
            phone_number: phone_number.map(str::to_owned),
            link_precedence: LinkPrecedence::Secondary,
            linked_id: Some(primary_id),
        }
    }

    pub fn validate(&self) -> Result<(), ContactValidationError> {
        validate_shape(
            None,
            self.email.as_deref(),
            self.phone_number.as_deref(),
            self.link_precedence,
            self.linked_id,
        )
    }
}

fn validate_shape(
    id: Option<ContactId>,
    email: Option<&str>,
    phone_number: Option<&str>,
    precedence: LinkPrecedence,
    linked_id: Option<ContactId>,
) -> Result<(), ContactValidationError> {
    if email.is_none() && phone_number.is_none() {
        return Err(ContactValidationError::MissingIdentifier);
    }

    match (precedence, linked_id) {
        (LinkPrecedence::Primary, Some(linked_id)) => {
            Err(ContactValidationError::PrimaryWithLink { linked_id })
        }
        (LinkPrecedence::Secondary, None) => Err(ContactValidationError::SecondaryWithoutLink),
        (LinkPrecedence::Secondary, Some(linked_id)) if Some(linked_id) == id => {
            Err(ContactValidationError::SelfLink { id: linked_id })
        }
        _ => Ok(()),
    }
}
