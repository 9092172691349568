#![allow(dead_code)]

use identity_core::db::open_db_in_memory;
use identity_core::{
    Contact, ContactGroup, ContactListQuery, ContactStore, IdentifyRequest, IdentityService,
    SqliteContactStore,
};
use rusqlite::{params, Connection};
use std::collections::HashMap;

pub fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

pub fn identify(conn: &Connection, email: Option<&str>, phone: Option<&str>) -> ContactGroup {
    let store = SqliteContactStore::try_new(conn).unwrap();
    IdentityService::new(store)
        .identify(&IdentifyRequest::new(email, phone))
        .unwrap()
}

pub fn all_contacts(conn: &Connection) -> Vec<Contact> {
    let store = SqliteContactStore::try_new(conn).unwrap();
    store.list_contacts(&ContactListQuery::default()).unwrap()
}

pub fn set_created_at(conn: &Connection, id: i64, created_at: i64) {
    conn.execute(
        "UPDATE contacts SET created_at = ?2 WHERE id = ?1;",
        params![id, created_at],
    )
    .unwrap();
}

/// Checks flat-star linking and identifier-transitive connectivity over the
/// whole table.
pub fn assert_store_invariants(conn: &Connection) {
    let contacts = all_contacts(conn);
    let by_id: HashMap<i64, &Contact> = contacts.iter().map(|c| (c.id, c)).collect();

    for contact in &contacts {
        if let Some(linked_id) = contact.linked_id {
            let primary = by_id
                .get(&linked_id)
                .unwrap_or_else(|| panic!("contact {} links to missing {linked_id}", contact.id));
            assert!(
                primary.is_primary(),
                "contact {} links to secondary {linked_id}",
                contact.id
            );
            assert!(
                primary.seniority() < contact.seniority(),
                "primary {linked_id} is not older than {}",
                contact.id
            );
        }
    }

    // Contacts sharing an identifier must share an anchor.
    for a in &contacts {
        for b in &contacts {
            let shares_email = a.email.is_some() && a.email == b.email;
            let shares_phone = a.phone_number.is_some() && a.phone_number == b.phone_number;
            if shares_email || shares_phone {
                assert_eq!(
                    a.anchor_id(),
                    b.anchor_id(),
                    "contacts {} and {} share an identifier but not a primary",
                    a.id,
                    b.id
                );
            }
        }
    }

    // No duplicate exact pairs inside a group.
    let mut seen = HashMap::new();
    for contact in &contacts {
        let key = (
            contact.anchor_id(),
            contact.email.clone(),
            contact.phone_number.clone(),
        );
        if let Some(previous) = seen.insert(key, contact.id) {
            panic!("contacts {previous} and {} duplicate one pair", contact.id);
        }
    }
}
