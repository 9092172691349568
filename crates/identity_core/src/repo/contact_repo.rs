//! Contact store contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide match, group and link-mutation queries over `contacts`.
//! - Run multi-step work inside one `BEGIN IMMEDIATE` transaction.
//!
//! # Invariants
//! - Every lookup except `get_contact(.., true)` / `list_contacts` with
//!   `include_deleted` skips rows with `deleted_at` set.
//! - Result sets are ordered by `(created_at, id)`.
//! - Only `link_precedence`, `linked_id`, `updated_at` and `deleted_at` are
//!   ever updated.
//!
//! # Locking
//! `atomically` opens `BEGIN IMMEDIATE`, which takes SQLite's single
//! database-wide writer lock. Resolutions against unrelated groups are
//! therefore serialized too, not just those sharing an email or phone; a
//! waiting writer blocks up to the connection busy timeout and then fails
//! with `SQLITE_BUSY` (`DbError::code() == "sqlite_busy"`). Readers on other
//! connections keep reading the last committed state under WAL. Per-group
//! locking would need a store with row-level locks.

use crate::db::migrations::{latest_version, schema_version};
use crate::db::DbError;
use crate::model::contact::{
    Contact, ContactId, ContactValidationError, LinkPrecedence, NewContact,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

const CONTACT_SELECT_SQL: &str = "SELECT
    id,
    phone_number,
    email,
    linked_id,
    link_precedence,
    created_at,
    updated_at,
    deleted_at
FROM contacts";

const NOW_MS_SQL: &str = "CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)";

pub type RepoResult<T> = Result<T, RepoError>;

/// Contact store error.
#[derive(Debug)]
pub enum RepoError {
    Validation(ContactValidationError),
    Db(DbError),
    NotFound(ContactId),
    InvalidData(String),
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "contact not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted contact data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "connection schema version {actual_version} does not match expected {expected_version}"
            ),
            Self::MissingRequiredTable(table) => write!(f, "required table missing: {table}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ContactValidationError> for RepoError {
    fn from(value: ContactValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Query options for listing contacts.
#[derive(Debug, Clone, Default)]
pub struct ContactListQuery {
    pub include_deleted: bool,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Storage operations required by the identity resolver.
pub trait ContactStore {
    /// Non-deleted contacts whose email equals `email` OR whose phone equals
    /// `phone_number`. Absent arguments do not participate.
    fn find_matching(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Vec<Contact>>;

    /// Non-deleted contacts with the given ids; unknown ids are skipped.
    fn get_contacts(&self, ids: &[ContactId]) -> RepoResult<Vec<Contact>>;

    /// Inserts a contact and returns it with assigned id and timestamps.
    fn create_contact(&self, contact: &NewContact) -> RepoResult<Contact>;

    /// Sets precedence and link of one contact.
    fn update_link(
        &self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> RepoResult<()>;

    /// Re-points every non-deleted contact linked to `from_primary` onto
    /// `to_primary`. Returns the number of rows changed.
    fn relink_secondaries(
        &self,
        from_primary: ContactId,
        to_primary: ContactId,
    ) -> RepoResult<usize>;

    /// The primary plus every non-deleted contact linked to it.
    fn find_group(&self, primary_id: ContactId) -> RepoResult<Vec<Contact>>;

    fn get_contact(&self, id: ContactId, include_deleted: bool) -> RepoResult<Option<Contact>>;

    fn list_contacts(&self, query: &ContactListQuery) -> RepoResult<Vec<Contact>>;

    /// Tombstones a contact. Already-deleted contacts keep their original
    /// `deleted_at`.
    fn soft_delete_contact(&self, id: ContactId) -> RepoResult<()>;

    /// Runs `work` as one atomic unit: all of its writes commit together or
    /// none do.
    fn atomically<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<RepoError>;
}

/// SQLite-backed contact store.
pub struct SqliteContactStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteContactStore<'conn> {
    /// Wraps a connection returned by `open_db`/`open_db_in_memory`.
    ///
    /// # Errors
    /// - `UninitializedConnection` when migrations were not applied.
    /// - `MissingRequiredTable` when `contacts` is absent.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_contact_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl ContactStore for SqliteContactStore<'_> {
    fn find_matching(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Vec<Contact>> {
        if email.is_none() && phone_number.is_none() {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare_cached(&format!(
            "{CONTACT_SELECT_SQL}
             WHERE deleted_at IS NULL
               AND (
                    (?1 IS NOT NULL AND email = ?1)
                 OR (?2 IS NOT NULL AND phone_number = ?2)
               )
             ORDER BY created_at ASC, id ASC;"
        ))?;
        let mut rows = stmt.query(params![email, phone_number])?;
        collect_contacts(&mut rows)
    }

    fn get_contacts(&self, ids: &[ContactId]) -> RepoResult<Vec<Contact>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "{CONTACT_SELECT_SQL}
             WHERE deleted_at IS NULL
               AND id IN ({placeholders})
             ORDER BY created_at ASC, id ASC;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(ids.iter()))?;
        collect_contacts(&mut rows)
    }

    fn create_contact(&self, contact: &NewContact) -> RepoResult<Contact> {
        contact.validate()?;

        self.conn.execute(
            "INSERT INTO contacts (
                phone_number,
                email,
                linked_id,
                link_precedence
            ) VALUES (?1, ?2, ?3, ?4);",
            params![
                contact.phone_number.as_deref(),
                contact.email.as_deref(),
                contact.linked_id,
                contact.link_precedence.as_str(),
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        self.get_contact(id, true)?.ok_or_else(|| {
            RepoError::InvalidData(format!("inserted contact {id} could not be read back"))
        })
    }

    fn update_link(
        &self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> RepoResult<()> {
        match (precedence, linked_id) {
            (LinkPrecedence::Primary, Some(linked_id)) => {
                return Err(ContactValidationError::PrimaryWithLink { linked_id }.into());
            }
            (LinkPrecedence::Secondary, None) => {
                return Err(ContactValidationError::SecondaryWithoutLink.into());
            }
            (LinkPrecedence::Secondary, Some(target)) if target == id => {
                return Err(ContactValidationError::SelfLink { id }.into());
            }
            _ => {}
        }

        let changed = self.conn.execute(
            &format!(
                "UPDATE contacts
                 SET
                    link_precedence = ?2,
                    linked_id = ?3,
                    updated_at = {NOW_MS_SQL}
                 WHERE id = ?1;"
            ),
            params![id, precedence.as_str(), linked_id],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }

    fn relink_secondaries(
        &self,
        from_primary: ContactId,
        to_primary: ContactId,
    ) -> RepoResult<usize> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE contacts
                 SET
                    linked_id = ?2,
                    updated_at = {NOW_MS_SQL}
                 WHERE linked_id = ?1
                   AND id <> ?2
                   AND deleted_at IS NULL;"
            ),
            params![from_primary, to_primary],
        )?;
        Ok(changed)
    }

    fn find_group(&self, primary_id: ContactId) -> RepoResult<Vec<Contact>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "{CONTACT_SELECT_SQL}
             WHERE deleted_at IS NULL
               AND (id = ?1 OR linked_id = ?1)
             ORDER BY created_at ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([primary_id])?;
        collect_contacts(&mut rows)
    }

    fn get_contact(&self, id: ContactId, include_deleted: bool) -> RepoResult<Option<Contact>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "{CONTACT_SELECT_SQL}
             WHERE id = ?1
               AND (?2 = 1 OR deleted_at IS NULL);"
        ))?;
        let mut rows = stmt.query(params![id, include_deleted])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_contact_row(row)?)),
            None => Ok(None),
        }
    }

    fn list_contacts(&self, query: &ContactListQuery) -> RepoResult<Vec<Contact>> {
        let mut sql = format!("{CONTACT_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if !query.include_deleted {
            sql.push_str(" AND deleted_at IS NULL");
        }

        sql.push_str(" ORDER BY created_at ASC, id ASC");

        match query.limit {
            Some(limit) => {
                sql.push_str(" LIMIT ?");
                bind_values.push(Value::Integer(i64::from(limit)));
            }
            None if query.offset > 0 => sql.push_str(" LIMIT -1"),
            None => {}
        }
        if query.offset > 0 {
            sql.push_str(" OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        collect_contacts(&mut rows)
    }

    fn soft_delete_contact(&self, id: ContactId) -> RepoResult<()> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE contacts
                 SET
                    deleted_at = COALESCE(deleted_at, {NOW_MS_SQL}),
                    updated_at = {NOW_MS_SQL}
                 WHERE id = ?1;"
            ),
            [id],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }

    fn atomically<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<RepoError>,
    {
        // IMMEDIATE takes the write lock before the first read, so a second
        // resolver touching the same rows waits instead of reading stale data.
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(RepoError::from)?;
        let value = work(self)?;
        tx.commit().map_err(RepoError::from)?;
        Ok(value)
    }
}

fn collect_contacts(rows: &mut rusqlite::Rows<'_>) -> RepoResult<Vec<Contact>> {
    let mut contacts = Vec::new();
    while let Some(row) = rows.next()? {
        contacts.push(parse_contact_row(row)?);
    }
    Ok(contacts)
}

fn parse_contact_row(row: &Row<'_>) -> RepoResult<Contact> {
    let id: ContactId = row.get("id")?;
    let precedence_text: String = row.get("link_precedence")?;
    let link_precedence = LinkPrecedence::parse(&precedence_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid link precedence `{precedence_text}` in contacts.link_precedence for id {id}"
        ))
    })?;

    let contact = Contact {
        id,
        phone_number: row.get("phone_number")?,
        email: row.get("email")?,
        linked_id: row.get("linked_id")?,
        link_precedence,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        deleted_at: row.get("deleted_at")?,
    };
    contact
        .validate()
        .map_err(|err| RepoError::InvalidData(format!("contact {id}: {err}")))?;
    Ok(contact)
}

fn ensure_contact_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = schema_version(conn)?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = 'contacts'
        );",
        [],
        |row| row.get(0),
    )?;
    if exists != 1 {
        return Err(RepoError::MissingRequiredTable("contacts"));
    }

    Ok(())
}
