//! Whole-table audit of the cluster link invariants.
//!
//! Reconciliation only inspects the rows a request touches. This scan walks
//! every contact and reports rows that break the two-level
//! secondary -> primary shape, so damage from manual edits or legacy imports
//! can be found before a request trips over it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::db::{ContactDb, DbContact, DbError, LinkPrecedence};

/// One broken row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LinkIssue {
    /// Neither email nor phone number is set.
    #[serde(rename_all = "camelCase")]
    MissingIdentifiers { contact_id: i64 },
    /// A primary carrying a `linkedId`.
    #[serde(rename_all = "camelCase")]
    PrimaryWithLink { contact_id: i64, linked_id: i64 },
    /// A secondary with no `linkedId`.
    #[serde(rename_all = "camelCase")]
    SecondaryWithoutLink { contact_id: i64 },
    /// A secondary pointing at an id that does not exist.
    #[serde(rename_all = "camelCase")]
    DanglingLink { contact_id: i64, linked_id: i64 },
    /// A secondary pointing at another secondary.
    #[serde(rename_all = "camelCase")]
    LinkToSecondary { contact_id: i64, linked_id: i64 },
}

/// Audit output for one database file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkReport {
    pub db_path: PathBuf,
    pub contacts: i64,
    pub issues: Vec<LinkIssue>,
}

impl LinkReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Count and scan `db`, labelling the result with `db_path`.
pub fn build_link_report(db: &ContactDb, db_path: &Path) -> Result<LinkReport, DbError> {
    Ok(LinkReport {
        db_path: db_path.to_path_buf(),
        contacts: db.count_contacts()?,
        issues: scan_contact_links(db)?,
    })
}

/// Scan every contact and return the issues found, ordered by contact id.
pub fn scan_contact_links(db: &ContactDb) -> Result<Vec<LinkIssue>, DbError> {
    let contacts = db.list_contacts()?;
    let issues = find_link_issues(&contacts);
    if issues.is_empty() {
        log::info!("Link audit: {} contacts, no issues", contacts.len());
    } else {
        log::warn!(
            "Link audit: {} issue(s) across {} contacts",
            issues.len(),
            contacts.len()
        );
    }
    Ok(issues)
}

fn find_link_issues(contacts: &[DbContact]) -> Vec<LinkIssue> {
    let by_id: HashMap<i64, LinkPrecedence> = contacts
        .iter()
        .map(|c| (c.id, c.link_precedence))
        .collect();

    let mut issues = Vec::new();
    for contact in contacts {
        if contact.email.is_none() && contact.phone_number.is_none() {
            issues.push(LinkIssue::MissingIdentifiers {
                contact_id: contact.id,
            });
        }

        match (contact.link_precedence, contact.linked_id) {
            (LinkPrecedence::Primary, None) => {}
            (LinkPrecedence::Primary, Some(linked_id)) => issues.push(LinkIssue::PrimaryWithLink {
                contact_id: contact.id,
                linked_id,
            }),
            (LinkPrecedence::Secondary, None) => issues.push(LinkIssue::SecondaryWithoutLink {
                contact_id: contact.id,
            }),
            (LinkPrecedence::Secondary, Some(linked_id)) => match by_id.get(&linked_id) {
                Some(LinkPrecedence::Primary) => {}
                Some(LinkPrecedence::Secondary) => issues.push(LinkIssue::LinkToSecondary {
                    contact_id: contact.id,
                    linked_id,
                }),
                None => issues.push(LinkIssue::DanglingLink {
                    contact_id: contact.id,
                    linked_id,
                }),
            },
        }
    }
    issues
}
