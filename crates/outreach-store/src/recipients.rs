//! Groups, candidates, contacts, and templates.
//!
//! Group membership is many-to-many and only ever read at dispatch
//! time; the resolver sees whatever the rows say in that moment.

use outreach_core::error::Result;
use outreach_core::types::{Candidate, Contact, EmailTemplate, Gender, RecipientGroup};
use rusqlite::params;

use crate::{Store, db_err};

impl Store {
    pub fn save_candidate(&self, candidate: &Candidate) -> Result<()> {
        self.lock()
            .execute(
                "INSERT OR REPLACE INTO candidates
                 (id, owner, name, emails, gender, location, predicted_position, keywords)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    candidate.id,
                    candidate.owner,
                    candidate.name,
                    serde_json::json!(candidate.emails).to_string(),
                    candidate.gender.as_str(),
                    candidate.location,
                    candidate.predicted_position,
                    serde_json::json!(candidate.keywords).to_string(),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn load_candidate(&self, id: &str) -> Result<Option<Candidate>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!("{CANDIDATE_SELECT} WHERE id = ?1"))
            .map_err(db_err)?;
        let mut rows = stmt.query_map([id], row_to_candidate).map_err(db_err)?;
        match rows.next() {
            Some(Ok(c)) => Ok(Some(c)),
            Some(Err(e)) => Err(db_err(e)),
            None => Ok(None),
        }
    }

    pub fn save_contact(&self, contact: &Contact) -> Result<()> {
        self.lock()
            .execute(
                "INSERT OR REPLACE INTO contacts
                 (id, owner, name, gender, email, company, position, department, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    contact.id,
                    contact.owner,
                    contact.name,
                    contact.gender.as_str(),
                    contact.email,
                    contact.company,
                    contact.position,
                    contact.department,
                    contact.is_active as i32,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn load_contact(&self, id: &str) -> Result<Option<Contact>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!("{CONTACT_SELECT} WHERE id = ?1"))
            .map_err(db_err)?;
        let mut rows = stmt.query_map([id], row_to_contact).map_err(db_err)?;
        match rows.next() {
            Some(Ok(c)) => Ok(Some(c)),
            Some(Err(e)) => Err(db_err(e)),
            None => Ok(None),
        }
    }

    pub fn save_group(&self, group: &RecipientGroup, kind: &str) -> Result<()> {
        self.lock()
            .execute(
                "INSERT OR REPLACE INTO groups (id, owner, name, kind, description)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![group.id, group.owner, group.name, kind, group.description],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn add_group_member(&self, group_id: &str, member_id: &str) -> Result<()> {
        self.lock()
            .execute(
                "INSERT OR IGNORE INTO group_members (group_id, member_id) VALUES (?1, ?2)",
                params![group_id, member_id],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn remove_group_member(&self, group_id: &str, member_id: &str) -> Result<()> {
        self.lock()
            .execute(
                "DELETE FROM group_members WHERE group_id = ?1 AND member_id = ?2",
                params![group_id, member_id],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Candidates currently in a group, whatever their address state.
    pub fn candidates_in_group(&self, group_id: &str) -> Result<Vec<Candidate>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "{CANDIDATE_SELECT} WHERE id IN
                     (SELECT member_id FROM group_members WHERE group_id = ?1)
                 ORDER BY name"
            ))
            .map_err(db_err)?;
        let rows = stmt.query_map([group_id], row_to_candidate).map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
    }

    /// Active contacts currently in a group.
    pub fn contacts_in_group(&self, group_id: &str) -> Result<Vec<Contact>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "{CONTACT_SELECT} WHERE is_active = 1 AND id IN
                     (SELECT member_id FROM group_members WHERE group_id = ?1)
                 ORDER BY name"
            ))
            .map_err(db_err)?;
        let rows = stmt.query_map([group_id], row_to_contact).map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
    }

    pub fn save_template(&self, template: &EmailTemplate) -> Result<()> {
        self.lock()
            .execute(
                "INSERT OR REPLACE INTO templates (id, name, subject, body)
                 VALUES (?1, ?2, ?3, ?4)",
                params![template.id, template.name, template.subject, template.body],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn load_template(&self, id: &str) -> Result<Option<EmailTemplate>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT id, name, subject, body FROM templates WHERE id = ?1")
            .map_err(db_err)?;
        let mut rows = stmt
            .query_map([id], |row| {
                Ok(EmailTemplate {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    subject: row.get(2)?,
                    body: row.get(3)?,
                })
            })
            .map_err(db_err)?;
        match rows.next() {
            Some(Ok(t)) => Ok(Some(t)),
            Some(Err(e)) => Err(db_err(e)),
            None => Ok(None),
        }
    }
}

const CANDIDATE_SELECT: &str = "SELECT id, owner, name, emails, gender, location, predicted_position, \
     keywords FROM candidates";

const CONTACT_SELECT: &str = "SELECT id, owner, name, gender, email, company, position, department, \
     is_active FROM contacts";

fn row_to_candidate(row: &rusqlite::Row<'_>) -> rusqlite::Result<Candidate> {
    let emails: String = row.get(3)?;
    let gender: String = row.get(4)?;
    let keywords: String = row.get(7)?;
    Ok(Candidate {
        id: row.get(0)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        emails: serde_json::from_str(&emails).unwrap_or_default(),
        gender: Gender::parse(&gender),
        location: row.get(5)?,
        predicted_position: row.get(6)?,
        keywords: serde_json::from_str(&keywords).unwrap_or_default(),
    })
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    let gender: String = row.get(3)?;
    Ok(Contact {
        id: row.get(0)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        gender: Gender::parse(&gender),
        email: row.get(4)?,
        company: row.get(5)?,
        position: row.get(6)?,
        department: row.get(7)?,
        is_active: row.get::<_, i32>(8)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, name: &str, emails: Vec<&str>) -> Candidate {
        Candidate {
            id: id.into(),
            owner: "op".into(),
            name: name.into(),
            emails: emails.into_iter().map(String::from).collect(),
            gender: Gender::Unknown,
            location: None,
            predicted_position: None,
            keywords: vec![],
        }
    }

    fn contact(id: &str, name: &str, active: bool) -> Contact {
        Contact {
            id: id.into(),
            owner: "op".into(),
            name: name.into(),
            gender: Gender::Female,
            email: format!("{id}@example.com"),
            company: "Acme".into(),
            position: None,
            department: None,
            is_active: active,
        }
    }

    #[test]
    fn test_group_membership_is_late_bound() {
        let store = Store::in_memory().unwrap();
        let group = RecipientGroup {
            id: "g1".into(),
            owner: "op".into(),
            name: "engineers".into(),
            description: None,
        };
        store.save_group(&group, "candidate").unwrap();
        store.save_candidate(&candidate("c1", "Ann", vec!["ann@example.com"])).unwrap();
        store.save_candidate(&candidate("c2", "Bo", vec![])).unwrap();
        store.add_group_member("g1", "c1").unwrap();

        assert_eq!(store.candidates_in_group("g1").unwrap().len(), 1);

        // Membership changes are visible on the next read.
        store.add_group_member("g1", "c2").unwrap();
        assert_eq!(store.candidates_in_group("g1").unwrap().len(), 2);
        store.remove_group_member("g1", "c1").unwrap();
        let members = store.candidates_in_group("g1").unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, "c2");
    }

    #[test]
    fn test_inactive_contacts_excluded() {
        let store = Store::in_memory().unwrap();
        store.save_contact(&contact("k1", "Kim", true)).unwrap();
        store.save_contact(&contact("k2", "Lee", false)).unwrap();
        store.add_group_member("g2", "k1").unwrap();
        store.add_group_member("g2", "k2").unwrap();

        let members = store.contacts_in_group("g2").unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, "k1");
    }

    #[test]
    fn test_template_round_trip() {
        let store = Store::in_memory().unwrap();
        let tpl = EmailTemplate {
            id: "tpl1".into(),
            name: "intro".into(),
            subject: "Hello {{candidate.salutation}}".into(),
            body: "We have a role for {{candidate.predicted_position}}.".into(),
        };
        store.save_template(&tpl).unwrap();
        let loaded = store.load_template("tpl1").unwrap().unwrap();
        assert_eq!(loaded.subject, tpl.subject);
    }
}
