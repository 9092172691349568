mod common;

use common::{all_contacts, assert_store_invariants, identify, set_created_at, setup};
use identity_core::db::DbError;
use identity_core::{
    Contact, ContactId, ContactListQuery, ContactStore, IdentifyRequest, IdentityError,
    IdentityService, LinkPrecedence, NewContact, RepoError, RepoResult, SqliteContactStore,
};

fn ids(contacts: &[Contact]) -> Vec<ContactId> {
    contacts.iter().map(|c| c.id).collect()
}

#[test]
fn rejects_request_without_identifiers() {
    let conn = setup();
    let service = IdentityService::new(SqliteContactStore::try_new(&conn).unwrap());

    for request in [
        IdentifyRequest::default(),
        IdentifyRequest::new(Some(""), None),
        IdentifyRequest::new(Some(""), Some("")),
    ] {
        let err = service.identify(&request).unwrap_err();
        assert!(matches!(err, IdentityError::InvalidInput));
    }
    assert!(all_contacts(&conn).is_empty());
}

#[test]
fn first_sighting_creates_single_primary() {
    let conn = setup();

    let group = identify(&conn, Some("a@x.com"), Some("123"));
    assert_eq!(group.len(), 1);
    let primary = group.primary();
    assert_eq!(primary.link_precedence, LinkPrecedence::Primary);
    assert_eq!(primary.email.as_deref(), Some("a@x.com"));
    assert_eq!(primary.phone_number.as_deref(), Some("123"));
    assert!(group.secondaries().is_empty());
}

#[test]
fn empty_string_identifier_is_stored_as_null() {
    let conn = setup();

    let group = identify(&conn, Some("a@x.com"), Some(""));
    assert_eq!(group.primary().phone_number, None);
}

#[test]
fn worked_example_bridges_two_groups() {
    let conn = setup();

    let first = identify(&conn, Some("a@x.com"), None);
    let second = identify(&conn, None, Some("123"));
    assert_ne!(first.primary().id, second.primary().id);
    assert!(second.secondaries().is_empty());

    let merged = identify(&conn, Some("a@x.com"), Some("123"));
    assert_eq!(merged.len(), 3);
    assert_eq!(merged.primary().id, first.primary().id);

    let demoted = merged
        .contacts()
        .iter()
        .find(|c| c.id == second.primary().id)
        .unwrap();
    assert_eq!(demoted.link_precedence, LinkPrecedence::Secondary);
    assert_eq!(demoted.linked_id, Some(first.primary().id));

    let inserted = merged.contacts().last().unwrap();
    assert_eq!(inserted.email.as_deref(), Some("a@x.com"));
    assert_eq!(inserted.phone_number.as_deref(), Some("123"));
    assert_eq!(inserted.linked_id, Some(first.primary().id));
    assert_store_invariants(&conn);
}

#[test]
fn known_email_with_new_phone_adds_one_secondary() {
    let conn = setup();

    let original = identify(&conn, Some("lorraine@hillvalley.edu"), Some("123456"));
    let extended = identify(&conn, Some("mcfly@hillvalley.edu"), Some("123456"));

    assert_eq!(extended.len(), 2);
    assert_eq!(extended.primary().id, original.primary().id);
    let secondary = &extended.secondaries()[0];
    assert_eq!(secondary.email.as_deref(), Some("mcfly@hillvalley.edu"));
    assert_eq!(secondary.linked_id, Some(original.primary().id));
    assert_eq!(
        extended.emails(),
        vec!["lorraine@hillvalley.edu", "mcfly@hillvalley.edu"]
    );
    assert_eq!(extended.phone_numbers(), vec!["123456"]);
}

#[test]
fn repeated_requests_are_idempotent() {
    let conn = setup();

    identify(&conn, Some("a@x.com"), None);
    identify(&conn, None, Some("123"));
    let first = identify(&conn, Some("a@x.com"), Some("123"));
    let count = all_contacts(&conn).len();

    for (email, phone) in [
        (Some("a@x.com"), Some("123")),
        (Some("a@x.com"), None),
        (None, Some("123")),
    ] {
        let again = identify(&conn, email, phone);
        assert_eq!(again, first);
    }
    assert_eq!(all_contacts(&conn).len(), count);
}

#[test]
fn partial_identifier_never_inserts_when_matched() {
    let conn = setup();

    identify(&conn, Some("a@x.com"), Some("111"));
    let group = identify(&conn, None, Some("111"));
    assert_eq!(group.len(), 1);
    let group = identify(&conn, Some("a@x.com"), None);
    assert_eq!(group.len(), 1);
}

#[test]
fn oldest_primary_wins_by_created_at_not_id() {
    let conn = setup();

    let a = identify(&conn, Some("a@x.com"), Some("111")).primary().id;
    let b = identify(&conn, Some("b@x.com"), Some("222")).primary().id;
    set_created_at(&conn, a, 2_000);
    set_created_at(&conn, b, 1_000);

    let merged = identify(&conn, Some("a@x.com"), Some("222"));
    assert_eq!(merged.primary().id, b);
    let demoted = merged.contacts().iter().find(|c| c.id == a).unwrap();
    assert_eq!(demoted.link_precedence, LinkPrecedence::Secondary);
    assert_eq!(demoted.linked_id, Some(b));
    assert_store_invariants(&conn);
}

#[test]
fn created_at_tie_breaks_on_lower_id() {
    let conn = setup();

    let a = identify(&conn, Some("a@x.com"), None).primary().id;
    let b = identify(&conn, None, Some("222")).primary().id;
    set_created_at(&conn, a, 5_000);
    set_created_at(&conn, b, 5_000);

    let merged = identify(&conn, Some("a@x.com"), Some("222"));
    assert_eq!(merged.primary().id, a.min(b));
}

#[test]
fn demoted_primary_secondaries_outside_match_are_relinked() {
    let conn = setup();

    let p1 = identify(&conn, Some("e1@x.com"), Some("p1")).primary().id;
    let p2 = identify(&conn, Some("e2@x.com"), Some("p2")).primary().id;
    let group_two = identify(&conn, Some("e3@x.com"), Some("p2"));
    let s2 = group_two.secondaries()[0].id;
    let s3 = identify(&conn, Some("e4@x.com"), Some("p2")).secondaries()[1].id;

    // Matches p1 by phone and p2 by email; s2/s3 share neither.
    let merged = identify(&conn, Some("e2@x.com"), Some("p1"));
    assert_eq!(merged.primary().id, p1);
    for id in [p2, s2, s3] {
        let member = merged.contacts().iter().find(|c| c.id == id).unwrap();
        assert_eq!(member.linked_id, Some(p1), "contact {id} not re-linked");
    }
    assert_eq!(merged.len(), 5);
    assert_store_invariants(&conn);
}

#[test]
fn matched_secondary_anchors_request_to_its_primary() {
    let conn = setup();

    let primary = identify(&conn, Some("e1@x.com"), Some("p1")).primary().id;
    identify(&conn, Some("e2@x.com"), Some("p1"));

    // Only the secondary carries e2; the primary shares nothing with the request.
    let group = identify(&conn, Some("e2@x.com"), Some("p9"));
    assert_eq!(group.primary().id, primary);
    assert_eq!(group.len(), 3);
    assert!(group
        .contacts()
        .iter()
        .any(|c| c.phone_number.as_deref() == Some("p9") && c.linked_id == Some(primary)));
    assert_store_invariants(&conn);
}

#[test]
fn three_groups_collapse_into_oldest() {
    let conn = setup();

    let oldest = identify(&conn, Some("a@x.com"), Some("1")).primary().id;
    identify(&conn, Some("b@x.com"), Some("2"));
    identify(&conn, Some("c@x.com"), Some("3"));

    identify(&conn, Some("b@x.com"), Some("3"));
    let merged = identify(&conn, Some("a@x.com"), Some("2"));

    assert_eq!(merged.primary().id, oldest);
    assert_eq!(
        merged
            .contacts()
            .iter()
            .filter(|c| c.is_primary())
            .count(),
        1
    );
    assert_eq!(all_contacts(&conn).len(), merged.len());
    assert_store_invariants(&conn);
}

#[test]
fn long_mixed_sequence_keeps_invariants() {
    let conn = setup();
    let requests: &[(Option<&str>, Option<&str>)] = &[
        (Some("a"), None),
        (None, Some("1")),
        (Some("b"), Some("2")),
        (Some("a"), Some("2")),
        (Some("c"), Some("3")),
        (Some("d"), Some("1")),
        (Some("c"), Some("1")),
        (Some("e"), None),
        (Some("b"), Some("3")),
        (Some("e"), Some("4")),
        (Some("a"), Some("1")),
    ];

    for (email, phone) in requests {
        let group = identify(&conn, *email, *phone);
        assert_eq!(group.contacts().iter().filter(|c| c.is_primary()).count(), 1);
        assert!(group
            .secondaries()
            .iter()
            .all(|c| c.linked_id == Some(group.primary().id)));
        assert_store_invariants(&conn);
    }

    let primaries = all_contacts(&conn)
        .into_iter()
        .filter(|c| c.is_primary())
        .count();
    assert_eq!(primaries, 2, "only the `e`/`4` group stays separate");
}

#[test]
fn soft_deleted_contacts_are_ignored() {
    let conn = setup();
    let store = SqliteContactStore::try_new(&conn).unwrap();

    let old = identify(&conn, Some("a@x.com"), None).primary().id;
    store.soft_delete_contact(old).unwrap();

    let fresh = identify(&conn, Some("a@x.com"), None);
    assert_ne!(fresh.primary().id, old);
    assert!(!ids(fresh.contacts()).contains(&old));
}

#[test]
fn deleted_primary_with_live_secondary_is_reported_as_internal() {
    let conn = setup();
    let store = SqliteContactStore::try_new(&conn).unwrap();

    let primary = identify(&conn, Some("a@x.com"), None).primary().id;
    identify(&conn, Some("a@x.com"), Some("123"));
    store.soft_delete_contact(primary).unwrap();

    let service = IdentityService::new(SqliteContactStore::try_new(&conn).unwrap());
    let err = service
        .identify(&IdentifyRequest::new(None, Some("123")))
        .unwrap_err();
    assert!(matches!(err, IdentityError::Internal(message) if message.contains("missing")));
}

#[test]
fn reports_what_changed() {
    let conn = setup();
    identify(&conn, Some("a@x.com"), None);
    identify(&conn, None, Some("123"));

    let service = IdentityService::new(SqliteContactStore::try_new(&conn).unwrap());
    let (_, stats) = service
        .identify_with_stats(&IdentifyRequest::new(Some("a@x.com"), Some("123")))
        .unwrap();
    assert_eq!(stats.matched, 2);
    assert_eq!(stats.demoted, 1);
    assert_eq!(stats.relinked, 0);
    assert!(stats.inserted);
}

/// Delegates to SQLite but fails every insert.
struct FailingInsertStore<'conn> {
    inner: SqliteContactStore<'conn>,
}

impl ContactStore for FailingInsertStore<'_> {
    fn find_matching(&self, email: Option<&str>, phone: Option<&str>) -> RepoResult<Vec<Contact>> {
        self.inner.find_matching(email, phone)
    }

    fn get_contacts(&self, ids: &[ContactId]) -> RepoResult<Vec<Contact>> {
        self.inner.get_contacts(ids)
    }

    fn create_contact(&self, _contact: &NewContact) -> RepoResult<Contact> {
        Err(RepoError::Db(DbError::Sqlite(
            rusqlite::Error::ExecuteReturnedResults,
        )))
    }

    fn update_link(
        &self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> RepoResult<()> {
        self.inner.update_link(id, precedence, linked_id)
    }

    fn relink_secondaries(&self, from: ContactId, to: ContactId) -> RepoResult<usize> {
        self.inner.relink_secondaries(from, to)
    }

    fn find_group(&self, primary_id: ContactId) -> RepoResult<Vec<Contact>> {
        self.inner.find_group(primary_id)
    }

    fn get_contact(&self, id: ContactId, include_deleted: bool) -> RepoResult<Option<Contact>> {
        self.inner.get_contact(id, include_deleted)
    }

    fn list_contacts(&self, query: &ContactListQuery) -> RepoResult<Vec<Contact>> {
        self.inner.list_contacts(query)
    }

    fn soft_delete_contact(&self, id: ContactId) -> RepoResult<()> {
        self.inner.soft_delete_contact(id)
    }

    fn atomically<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<RepoError>,
    {
        self.inner.atomically(|_| work(self))
    }
}

#[test]
fn failed_insert_rolls_back_demotion() {
    let conn = setup();
    let a = identify(&conn, Some("a@x.com"), None).primary().id;
    let b = identify(&conn, None, Some("123")).primary().id;

    let service = IdentityService::new(FailingInsertStore {
        inner: SqliteContactStore::try_new(&conn).unwrap(),
    });
    let err = service
        .identify(&IdentifyRequest::new(Some("a@x.com"), Some("123")))
        .unwrap_err();
    assert!(matches!(err, IdentityError::StoreUnavailable(_)));

    let contacts = all_contacts(&conn);
    assert_eq!(contacts.len(), 2);
    assert!(contacts.iter().all(|c| c.is_primary()));
    assert_eq!(ids(&contacts), vec![a, b]);
}
