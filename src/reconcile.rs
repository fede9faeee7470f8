//! Identity reconciliation.
//!
//! Given an (email?, phone?) pair, find the identity cluster it belongs to,
//! collapse clusters the pair bridges, record anything new, and report the
//! consolidated view. One call is one read-modify-write over the contact
//! store; `identify` runs it inside a single `BEGIN IMMEDIATE` transaction.
//!
//! Phases, in order:
//! 1. match lookup (or create a fresh primary and stop)
//! 2. cluster closure from the matched rows' primaries
//! 3. merge: demote every primary but the oldest, re-point their secondaries
//! 4. re-read the closure, find the surviving primary
//! 5. insert a secondary if the pair carries a value the cluster lacks
//! 6. re-read the closure and assemble the response

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};

use crate::db::{now_utc, ContactDb, ContactUpdate, DbContact, DbError, NewContact};
use crate::error::IdentifyError;
use crate::types::{ClusterView, IdentifyRequest};

/// The store operations reconciliation needs. Every call made during one
/// reconciliation must land in the same transaction.
pub trait ContactStore {
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<DbContact>, DbError>;

    fn find_by_ids_or_linked_ids(&self, ids: &BTreeSet<i64>) -> Result<Vec<DbContact>, DbError>;

    fn insert_contact(&self, contact: &NewContact) -> Result<i64, DbError>;

    fn update_contact(&self, id: i64, update: &ContactUpdate) -> Result<bool, DbError>;
}

impl ContactStore for ContactDb {
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<DbContact>, DbError> {
        ContactDb::find_by_email_or_phone(self, email, phone_number)
    }

    fn find_by_ids_or_linked_ids(&self, ids: &BTreeSet<i64>) -> Result<Vec<DbContact>, DbError> {
        ContactDb::find_by_ids_or_linked_ids(self, ids)
    }

    fn insert_contact(&self, contact: &NewContact) -> Result<i64, DbError> {
        ContactDb::insert_contact(self, contact)
    }

    fn update_contact(&self, id: i64, update: &ContactUpdate) -> Result<bool, DbError> {
        ContactDb::update_contact(self, id, update)
    }
}

/// Reconcile one request against the store, atomically.
///
/// Validation happens before the transaction opens; everything after runs
/// under `BEGIN IMMEDIATE` and is rolled back on any error.
pub fn identify(db: &ContactDb, request: &IdentifyRequest) -> Result<ClusterView, IdentifyError> {
    let email = request.email();
    let phone_number = request.phone_number();
    if email.is_none() && phone_number.is_none() {
        return Err(IdentifyError::InvalidInput(
            "email or phoneNumber is required".to_string(),
        ));
    }

    db.with_transaction(|tx| resolve(tx, email, phone_number))
}

/// Run the six reconciliation phases against `store`.
///
/// Callers own atomicity; use [`identify`] unless you already hold a
/// transaction.
pub fn resolve<S>(
    store: &S,
    email: Option<&str>,
    phone_number: Option<&str>,
) -> Result<ClusterView, IdentifyError>
where
    S: ContactStore + ?Sized,
{
    if email.is_none() && phone_number.is_none() {
        return Err(IdentifyError::InvalidInput(
            "email or phoneNumber is required".to_string(),
        ));
    }

    let now = now_utc();

    // 1. Match lookup
    let matches = store.find_by_email_or_phone(email, phone_number)?;
    if matches.is_empty() {
        let id = store.insert_contact(&NewContact::primary(email, phone_number, now))?;
        log::info!("New primary contact {}", id);
        return Ok(ClusterView {
            primary_contact_id: id,
            emails: email.map(str::to_string).into_iter().collect(),
            phone_numbers: phone_number.map(str::to_string).into_iter().collect(),
            secondary_contact_ids: Vec::new(),
        });
    }

    // 2. Cluster closure
    let primary_ids = primary_ids_of(&matches)?;
    let closure = store.find_by_ids_or_linked_ids(&primary_ids)?;
    check_primaries_present(&primary_ids, &closure)?;

    // 3. Merge resolution
    let merged = merge_primaries(store, &closure, now)?;

    // 4. Re-read closure
    let refreshed = if merged > 0 {
        store.find_by_ids_or_linked_ids(&primary_ids)?
    } else {
        closure
    };
    let true_primary = sole_primary(&refreshed)?;

    // 5. Novel-information insert
    if carries_new_value(&refreshed, email, phone_number) {
        let id = store.insert_contact(&NewContact::secondary(
            email,
            phone_number,
            true_primary.id,
            now,
        ))?;
        log::info!("New secondary contact {} under primary {}", id, true_primary.id);
    } else {
        log::debug!("No new information for primary {}", true_primary.id);
    }

    // 6. Response assembly
    let final_closure = store.find_by_ids_or_linked_ids(&primary_ids)?;
    cluster_view(&final_closure)
}

/// Primary ids referenced by the matched rows: a primary contributes itself,
/// a secondary its `linkedId`.
fn primary_ids_of(matches: &[DbContact]) -> Result<BTreeSet<i64>, IdentifyError> {
    let mut ids = BTreeSet::new();
    for contact in matches {
        if contact.is_primary() {
            ids.insert(contact.id);
        } else {
            let linked = contact.linked_id.ok_or_else(|| {
                IdentifyError::ConsistencyViolation(format!(
                    "secondary contact {} has no linkedId",
                    contact.id
                ))
            })?;
            ids.insert(linked);
        }
    }
    Ok(ids)
}

/// Every id a secondary pointed at must come back as a primary.
fn check_primaries_present(
    primary_ids: &BTreeSet<i64>,
    closure: &[DbContact],
) -> Result<(), IdentifyError> {
    for id in primary_ids {
        match closure.iter().find(|c| c.id == *id) {
            Some(contact) if contact.is_primary() => {}
            Some(_) => {
                return Err(IdentifyError::ConsistencyViolation(format!(
                    "contact {} is linked to as a primary but is secondary",
                    id
                )))
            }
            None => {
                return Err(IdentifyError::ConsistencyViolation(format!(
                    "linked primary {} does not exist",
                    id
                )))
            }
        }
    }
    Ok(())
}

/// Oldest primary in `contacts`: earliest `createdAt`, lowest id on ties.
fn oldest_primary(contacts: &[DbContact]) -> Option<&DbContact> {
    contacts
        .iter()
        .filter(|c| c.is_primary())
        .min_by_key(|c| c.age_key())
}

/// Collapse every primary in `closure` into the oldest one. Returns the number
/// of primaries demoted.
fn merge_primaries<S>(
    store: &S,
    closure: &[DbContact],
    now: DateTime<Utc>,
) -> Result<usize, IdentifyError>
where
    S: ContactStore + ?Sized,
{
    let Some(survivor) = oldest_primary(closure) else {
        return Err(IdentifyError::ConsistencyViolation(
            "cluster closure has no primary contact".to_string(),
        ));
    };

    let mut demoted = 0;
    for former in closure
        .iter()
        .filter(|c| c.is_primary() && c.id != survivor.id)
    {
        demote(store, former.id, survivor.id, now)?;

        // Re-point everything that hung off the demoted primary
        for follower in closure
            .iter()
            .filter(|c| !c.is_primary() && c.linked_id == Some(former.id))
        {
            relink(store, follower.id, survivor.id, now)?;
        }

        log::info!("Merged primary {} into {}", former.id, survivor.id);
        demoted += 1;
    }
    Ok(demoted)
}

fn demote<S>(store: &S, id: i64, primary_id: i64, now: DateTime<Utc>) -> Result<(), IdentifyError>
where
    S: ContactStore + ?Sized,
{
    if !store.update_contact(id, &ContactUpdate::demote(primary_id, now))? {
        return Err(IdentifyError::ConsistencyViolation(format!(
            "primary {} vanished during merge",
            id
        )));
    }
    Ok(())
}

fn relink<S>(store: &S, id: i64, primary_id: i64, now: DateTime<Utc>) -> Result<(), IdentifyError>
where
    S: ContactStore + ?Sized,
{
    if !store.update_contact(id, &ContactUpdate::relink(primary_id, now))? {
        return Err(IdentifyError::ConsistencyViolation(format!(
            "secondary {} vanished during merge",
            id
        )));
    }
    Ok(())
}

/// The one primary a settled closure must have.
fn sole_primary(closure: &[DbContact]) -> Result<&DbContact, IdentifyError> {
    let primaries = closure.iter().filter(|c| c.is_primary()).count();
    if primaries != 1 {
        return Err(IdentifyError::ConsistencyViolation(format!(
            "expected one primary after merge, found {}",
            primaries
        )));
    }
    oldest_primary(closure).ok_or_else(|| {
        IdentifyError::ConsistencyViolation("cluster closure has no primary contact".to_string())
    })
}

/// True if the request supplies an email or a phone that appears nowhere in
/// the cluster. Presence of a value on any row suppresses the insert, even
/// when the exact pair was never stored together.
fn carries_new_value(closure: &[DbContact], email: Option<&str>, phone_number: Option<&str>) -> bool {
    let known_emails: HashSet<&str> = closure.iter().filter_map(|c| c.email.as_deref()).collect();
    let known_phones: HashSet<&str> = closure
        .iter()
        .filter_map(|c| c.phone_number.as_deref())
        .collect();

    let new_email = email.is_some_and(|e| !known_emails.contains(e));
    let new_phone = phone_number.is_some_and(|p| !known_phones.contains(p));
    new_email || new_phone
}

/// Build the response from a settled closure. `closure` is in store order.
fn cluster_view(closure: &[DbContact]) -> Result<ClusterView, IdentifyError> {
    let primary = oldest_primary(closure).ok_or_else(|| {
        IdentifyError::ConsistencyViolation("final closure has no primary contact".to_string())
    })?;
    let secondaries: Vec<&DbContact> = closure.iter().filter(|c| !c.is_primary()).collect();

    let emails = dedup_in_order(
        primary
            .email
            .as_deref()
            .into_iter()
            .chain(secondaries.iter().filter_map(|c| c.email.as_deref())),
    );
    let phone_numbers = dedup_in_order(
        primary
            .phone_number
            .as_deref()
            .into_iter()
            .chain(secondaries.iter().filter_map(|c| c.phone_number.as_deref())),
    );

    Ok(ClusterView {
        primary_contact_id: primary.id,
        emails,
        phone_numbers,
        secondary_contact_ids: secondaries.iter().map(|c| c.id).collect(),
    })
}

fn dedup_in_order<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .filter(|v| seen.insert(*v))
        .map(str::to_string)
        .collect()
}
