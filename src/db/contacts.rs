use std::collections::BTreeSet;

use rusqlite::{params, params_from_iter, types::Value, Row};

use super::*;

const CONTACT_COLUMNS: &str =
    "id, email, phoneNumber, linkedId, linkPrecedence, createdAt, updatedAt, deletedAt";

impl ContactDb {
    // =========================================================================
    // Contacts
    // =========================================================================

    /// Contacts whose email equals `email` OR whose phone equals `phone_number`.
    ///
    /// Only supplied fields take part in the predicate; with neither supplied
    /// nothing matches. Rows come back in ascending id order.
    pub fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<DbContact>, DbError> {
        let mut conditions: Vec<&str> = Vec::new();
        let mut args: Vec<Value> = Vec::new();

        if let Some(email) = email {
            conditions.push("email = ?");
            args.push(Value::Text(email.to_string()));
        }
        if let Some(phone) = phone_number {
            conditions.push("phoneNumber = ?");
            args.push(Value::Text(phone.to_string()));
        }
        if conditions.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM Contact WHERE {} ORDER BY id",
            CONTACT_COLUMNS,
            conditions.join(" OR ")
        );
        self.query_contacts(&sql, args)
    }

    /// Every contact whose id is in `ids` or whose `linkedId` is in `ids`.
    ///
    /// This is the cluster closure read. Rows come back in ascending id order.
    pub fn find_by_ids_or_linked_ids(&self, ids: &BTreeSet<i64>) -> Result<Vec<DbContact>, DbError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {cols} FROM Contact
             WHERE id IN ({ph}) OR linkedId IN ({ph})
             ORDER BY id",
            cols = CONTACT_COLUMNS,
            ph = placeholders
        );
        let args: Vec<Value> = ids
            .iter()
            .chain(ids.iter())
            .map(|id| Value::Integer(*id))
            .collect();
        self.query_contacts(&sql, args)
    }

    /// Insert a contact and return the id the store assigned.
    pub fn insert_contact(&self, contact: &NewContact) -> Result<i64, DbError> {
        self.conn.execute(
            "INSERT INTO Contact (email, phoneNumber, linkedId, linkPrecedence, createdAt, updatedAt, deletedAt)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)",
            params![
                contact.email,
                contact.phone_number,
                contact.linked_id,
                contact.link_precedence.as_str(),
                format_timestamp(&contact.created_at),
                format_timestamp(&contact.updated_at),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Apply `update` to a single row. Returns false if no row has that id.
    pub fn update_contact(&self, id: i64, update: &ContactUpdate) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE Contact SET
                linkPrecedence = COALESCE(?1, linkPrecedence),
                linkedId = COALESCE(?2, linkedId),
                updatedAt = ?3
             WHERE id = ?4",
            params![
                update.link_precedence.map(|p| p.as_str()),
                update.linked_id,
                format_timestamp(&update.updated_at),
                id,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Fetch a contact by id.
    pub fn get_contact(&self, id: i64) -> Result<Option<DbContact>, DbError> {
        let sql = format!("SELECT {} FROM Contact WHERE id = ?", CONTACT_COLUMNS);
        let mut found = self.query_contacts(&sql, vec![Value::Integer(id)])?;
        Ok(found.pop())
    }

    /// Every contact in the store, ascending id.
    pub fn list_contacts(&self) -> Result<Vec<DbContact>, DbError> {
        let sql = format!("SELECT {} FROM Contact ORDER BY id", CONTACT_COLUMNS);
        self.query_contacts(&sql, Vec::new())
    }

    pub fn count_contacts(&self) -> Result<i64, DbError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM Contact", [], |row| row.get(0))?)
    }

    fn query_contacts(&self, sql: &str, args: Vec<Value>) -> Result<Vec<DbContact>, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(args), Self::map_contact_row)?;

        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(Self::finish_contact(row?)?);
        }
        Ok(contacts)
    }

    /// Raw column values; text columns are validated in `finish_contact` so a
    /// bad row surfaces as `DbError::InvalidRow` rather than a SQLite error.
    fn map_contact_row(row: &Row) -> rusqlite::Result<RawContact> {
        Ok(RawContact {
            id: row.get(0)?,
            email: row.get(1)?,
            phone_number: row.get(2)?,
            linked_id: row.get(3)?,
            link_precedence: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            deleted_at: row.get(7)?,
        })
    }

    fn finish_contact(raw: RawContact) -> Result<DbContact, DbError> {
        let link_precedence = LinkPrecedence::parse(&raw.link_precedence).ok_or_else(|| {
            DbError::InvalidRow(format!(
                "contact {} has unknown linkPrecedence '{}'",
                raw.id, raw.link_precedence
            ))
        })?;
        Ok(DbContact {
            id: raw.id,
            email: raw.email,
            phone_number: raw.phone_number,
            linked_id: raw.linked_id,
            link_precedence,
            created_at: parse_timestamp(&raw.created_at)?,
            updated_at: parse_timestamp(&raw.updated_at)?,
            deleted_at: raw.deleted_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

struct RawContact {
    id: i64,
    email: Option<String>,
    phone_number: Option<String>,
    linked_id: Option<i64>,
    link_precedence: String,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::super::test_support::test_db;
    use super::*;

    fn seed(db: &ContactDb, email: Option<&str>, phone: Option<&str>) -> i64 {
        db.insert_contact(&NewContact::primary(email, phone, now_utc()))
            .expect("insert")
    }

    #[test]
    fn test_insert_and_get_contact() {
        let db = test_db();
        let now = now_utc();
        let id = db
            .insert_contact(&NewContact::primary(Some("a@x.com"), Some("111"), now))
            .expect("insert");

        let contact = db.get_contact(id).unwrap().expect("exists");
        assert_eq!(contact.email.as_deref(), Some("a@x.com"));
        assert_eq!(contact.phone_number.as_deref(), Some("111"));
        assert_eq!(contact.link_precedence, LinkPrecedence::Primary);
        assert_eq!(contact.linked_id, None);
        assert_eq!(contact.created_at, now);
        assert_eq!(contact.deleted_at, None);
    }

    #[test]
    fn test_ids_increase_monotonically() {
        let db = test_db();
        let first = seed(&db, Some("a@x.com"), None);
        let second = seed(&db, Some("b@x.com"), None);
        assert!(second > first);
    }

    #[test]
    fn test_find_by_email_or_phone_matches_either_field() {
        let db = test_db();
        let a = seed(&db, Some("a@x.com"), Some("111"));
        let b = seed(&db, Some("b@x.com"), Some("222"));
        let _c = seed(&db, Some("c@x.com"), Some("333"));

        let found = db
            .find_by_email_or_phone(Some("a@x.com"), Some("222"))
            .unwrap();
        let ids: Vec<i64> = found.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn test_find_ignores_fields_not_supplied() {
        let db = test_db();
        // A phone-only contact must not match an email-only lookup via NULLs.
        seed(&db, None, Some("111"));
        assert!(db.find_by_email_or_phone(Some("a@x.com"), None).unwrap().is_empty());
        assert!(db.find_by_email_or_phone(None, None).unwrap().is_empty());
    }

    #[test]
    fn test_find_is_exact_match() {
        let db = test_db();
        seed(&db, Some("a@x.com"), None);
        assert!(db.find_by_email_or_phone(Some("A@X.COM"), None).unwrap().is_empty());
        assert!(db.find_by_email_or_phone(Some(" a@x.com"), None).unwrap().is_empty());
    }

    #[test]
    fn test_closure_includes_linked_rows() {
        let db = test_db();
        let primary = seed(&db, Some("a@x.com"), Some("111"));
        let linked = db
            .insert_contact(&NewContact::secondary(Some("a@x.com"), Some("222"), primary, now_utc()))
            .unwrap();
        let unrelated = seed(&db, Some("z@x.com"), Some("999"));

        let ids: BTreeSet<i64> = [primary].into_iter().collect();
        let closure = db.find_by_ids_or_linked_ids(&ids).unwrap();
        let got: Vec<i64> = closure.iter().map(|c| c.id).collect();
        assert_eq!(got, vec![primary, linked]);
        assert!(!got.contains(&unrelated));

        assert!(db.find_by_ids_or_linked_ids(&BTreeSet::new()).unwrap().is_empty());
    }

    #[test]
    fn test_update_contact_demote_and_relink() {
        let db = test_db();
        let keep = seed(&db, Some("a@x.com"), None);
        let demoted = seed(&db, Some("b@x.com"), None);
        let later = now_utc();

        assert!(db
            .update_contact(demoted, &ContactUpdate::demote(keep, later))
            .unwrap());
        let row = db.get_contact(demoted).unwrap().unwrap();
        assert_eq!(row.link_precedence, LinkPrecedence::Secondary);
        assert_eq!(row.linked_id, Some(keep));
        assert_eq!(row.updated_at, later);

        // Relink leaves precedence alone
        assert!(db
            .update_contact(demoted, &ContactUpdate::relink(keep, later))
            .unwrap());
        let row = db.get_contact(demoted).unwrap().unwrap();
        assert_eq!(row.link_precedence, LinkPrecedence::Secondary);

        assert!(!db
            .update_contact(9_999, &ContactUpdate::relink(keep, later))
            .unwrap());
    }

    #[test]
    fn test_unparseable_timestamp_is_invalid_row() {
        let db = test_db();
        db.conn_ref()
            .execute(
                "INSERT INTO Contact (email, linkPrecedence, createdAt, updatedAt)
                 VALUES ('a@x.com', 'primary', 'last tuesday', '2024-01-01T00:00:00.000Z')",
                [],
            )
            .unwrap();
        let err = db.list_contacts().unwrap_err();
        assert!(matches!(err, DbError::InvalidRow(_)), "got {err:?}");
    }
}
