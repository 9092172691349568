//! Identity reconciliation service.
//!
//! # Responsibility
//! - Resolve an `(email, phone)` pair into its consolidated contact group.
//! - Merge groups bridged by the pair and extend a group with new
//!   identifier combinations.
//!
//! # Invariants
//! - One primary per group; every secondary links directly to it.
//! - The primary is the oldest contact by `(created_at, id)`.
//! - A pair already covered by a contact never inserts a new row.
//! - The whole read-merge-write cycle runs in one store transaction; group
//!   leadership is recomputed from stored rows on every call.

use crate::model::contact::{Contact, ContactId, LinkPrecedence, NewContact};
use crate::repo::contact_repo::{ContactStore, RepoError};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

pub type IdentityResult<T> = Result<T, IdentityError>;

/// Errors from the identify use-case.
#[derive(Debug)]
pub enum IdentityError {
    /// Neither email nor phone number was supplied.
    InvalidInput,
    /// The contact store failed a read or write.
    StoreUnavailable(RepoError),
    /// Stored data violates a group invariant.
    Internal(String),
}

impl Display for IdentityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput => write!(f, "Either email or phoneNumber is required"),
            Self::StoreUnavailable(err) => write!(f, "contact store unavailable: {err}"),
            Self::Internal(message) => write!(f, "identity invariant violated: {message}"),
        }
    }
}

impl Error for IdentityError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::StoreUnavailable(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for IdentityError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Validation(_) | RepoError::InvalidData(_) | RepoError::NotFound(_) => {
                Self::Internal(value.to_string())
            }
            other => Self::StoreUnavailable(other),
        }
    }
}

impl IdentityError {
    /// Short stable code for logs and transport mapping.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Internal(_) => "internal",
        }
    }
}

/// Inbound identify request.
///
/// Empty strings count as "not supplied"; no other normalization happens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

impl IdentifyRequest {
    pub fn new(email: Option<&str>, phone_number: Option<&str>) -> Self {
        Self {
            email: email.map(str::to_owned),
            phone_number: phone_number.map(str::to_owned),
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().filter(|value| !value.is_empty())
    }

    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref().filter(|value| !value.is_empty())
    }
}

/// A consolidated identity group: the primary first, then secondaries in
/// `(created_at, id)` order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactGroup {
    contacts: Vec<Contact>,
}

impl ContactGroup {
    /// Builds a group after checking the flat-star shape.
    ///
    /// # Errors
    /// - `Internal` when the rows do not hold exactly one primary, or a
    ///   secondary links anywhere else.
    pub fn from_contacts(mut contacts: Vec<Contact>) -> IdentityResult<Self> {
        let primaries: Vec<ContactId> = contacts
            .iter()
            .filter(|contact| contact.is_primary())
            .map(|contact| contact.id)
            .collect();
        let primary_id = match primaries.as_slice() {
            [id] => *id,
            [] => return Err(IdentityError::Internal("group has no primary".to_string())),
            many => {
                return Err(IdentityError::Internal(format!(
                    "group has {} primaries: {many:?}",
                    many.len()
                )))
            }
        };

        if let Some(stray) = contacts
            .iter()
            .find(|contact| !contact.is_primary() && contact.linked_id != Some(primary_id))
        {
            return Err(IdentityError::Internal(format!(
                "contact {} links to {:?} instead of primary {primary_id}",
                stray.id, stray.linked_id
            )));
        }

        contacts.sort_by_key(|contact| (!contact.is_primary(), contact.seniority()));
        Ok(Self { contacts })
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn primary(&self) -> &Contact {
        // from_contacts guarantees a non-empty group with the primary first.
        &self.contacts[0]
    }

    pub fn secondaries(&self) -> &[Contact] {
        &self.contacts[1..]
    }

    pub fn secondary_ids(&self) -> Vec<ContactId> {
        self.secondaries().iter().map(|contact| contact.id).collect()
    }

    /// Distinct emails, primary's first.
    pub fn emails(&self) -> Vec<&str> {
        distinct(self.contacts.iter().filter_map(|c| c.email.as_deref()))
    }

    /// Distinct phone numbers, primary's first.
    pub fn phone_numbers(&self) -> Vec<&str> {
        distinct(self.contacts.iter().filter_map(|c| c.phone_number.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = Vec::new();
    for value in values {
        if !seen.contains(&value) {
            seen.push(value);
        }
    }
    seen
}

/// Counters for one reconciliation, used for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub matched: usize,
    pub demoted: usize,
    pub relinked: usize,
    pub inserted: bool,
}

/// Identity resolver over a contact store.
pub struct IdentityService<S: ContactStore> {
    store: S,
}

impl<S: ContactStore> IdentityService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Resolves one request into its consolidated group.
    ///
    /// # Errors
    /// - `InvalidInput` when neither identifier is supplied.
    /// - `StoreUnavailable` on any store failure; nothing is committed.
    /// - `Internal` when stored rows break a group invariant.
    pub fn identify(&self, request: &IdentifyRequest) -> IdentityResult<ContactGroup> {
        self.identify_with_stats(request).map(|(group, _)| group)
    }

    /// Same as [`identify`](Self::identify), also returning what changed.
    pub fn identify_with_stats(
        &self,
        request: &IdentifyRequest,
    ) -> IdentityResult<(ContactGroup, ReconcileStats)> {
        let started_at = Instant::now();
        let email = request.email();
        let phone_number = request.phone_number();

        if email.is_none() && phone_number.is_none() {
            warn!("event=identify module=service status=rejected error_code=invalid_input");
            return Err(IdentityError::InvalidInput);
        }

        let outcome = self
            .store
            .atomically(|store| reconcile(store, email, phone_number));

        match &outcome {
            Ok((group, stats)) => info!(
                "event=identify module=service status=ok has_email={} has_phone={} matched={} demoted={} relinked={} inserted={} primary_id={} group_size={} duration_ms={}",
                email.is_some(),
                phone_number.is_some(),
                stats.matched,
                stats.demoted,
                stats.relinked,
                stats.inserted,
                group.primary().id,
                group.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=identify module=service status=error error_code={} duration_ms={} error={}",
                err.code(),
                started_at.elapsed().as_millis(),
                err
            ),
        }

        outcome
    }
}

/// Runs match, consolidation and extension against `store`.
///
/// Callers provide atomicity; this function only issues store calls.
fn reconcile<S: ContactStore + ?Sized>(
    store: &S,
    email: Option<&str>,
    phone_number: Option<&str>,
) -> IdentityResult<(ContactGroup, ReconcileStats)> {
    let matches = store.find_matching(email, phone_number)?;
    let mut stats = ReconcileStats {
        matched: matches.len(),
        ..ReconcileStats::default()
    };

    if matches.is_empty() {
        let created = store.create_contact(&NewContact::primary(email, phone_number))?;
        stats.inserted = true;
        return Ok((ContactGroup::from_contacts(vec![created])?, stats));
    }

    let candidates = primary_candidates(store, &matches)?;
    let primary = oldest(&candidates)
        .ok_or_else(|| IdentityError::Internal("matched contacts have no primary".to_string()))?
        .clone();

    for demoted in candidates.iter().filter(|c| c.id != primary.id) {
        store.update_link(demoted.id, LinkPrecedence::Secondary, Some(primary.id))?;
        stats.demoted += 1;
        stats.relinked += store.relink_secondaries(demoted.id, primary.id)?;
    }

    if !matches.iter().any(|c| c.covers(email, phone_number)) {
        store.create_contact(&NewContact::secondary(email, phone_number, primary.id))?;
        stats.inserted = true;
    }

    let group = ContactGroup::from_contacts(store.find_group(primary.id)?)?;
    Ok((group, stats))
}

/// Primaries of every group the matched contacts belong to.
///
/// Matched primaries are taken as-is; a matched secondary contributes the
/// primary it links to, loaded from the store when not already matched.
fn primary_candidates<S: ContactStore + ?Sized>(
    store: &S,
    matches: &[Contact],
) -> IdentityResult<Vec<Contact>> {
    let mut candidates: Vec<Contact> = matches.iter().filter(|c| c.is_primary()).cloned().collect();

    let missing: BTreeSet<ContactId> = matches
        .iter()
        .filter_map(|c| c.linked_id)
        .filter(|id| !candidates.iter().any(|p| p.id == *id))
        .collect();
    if missing.is_empty() {
        return Ok(candidates);
    }

    let ids: Vec<ContactId> = missing.into_iter().collect();
    let loaded = store.get_contacts(&ids)?;
    for id in ids {
        match loaded.iter().find(|c| c.id == id) {
            Some(contact) if contact.is_primary() => candidates.push(contact.clone()),
            Some(contact) => {
                return Err(IdentityError::Internal(format!(
                    "contact {id} is referenced as a primary but links to {:?}",
                    contact.linked_id
                )))
            }
            None => {
                return Err(IdentityError::Internal(format!(
                    "linked primary {id} is missing or deleted"
                )))
            }
        }
    }

    Ok(candidates)
}

/// The contact with the smallest `(created_at, id)`.
fn oldest(contacts: &[Contact]) -> Option<&Contact> {
    contacts.iter().min_by_key(|contact| contact.seniority())
}
