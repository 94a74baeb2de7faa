//! Sending-identity rows.

use outreach_core::error::Result;
use outreach_core::types::SendingIdentity;
use rusqlite::params;

use crate::{Store, db_err};

impl Store {
    pub fn save_identity(&self, identity: &SendingIdentity) -> Result<()> {
        self.lock()
            .execute(
                "INSERT OR REPLACE INTO identities
                 (id, owner, address, sender_name, smtp_host, smtp_port,
                  use_tls, credential, daily_limit, signature, is_default)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    identity.id,
                    identity.owner,
                    identity.address,
                    identity.sender_name,
                    identity.smtp_host,
                    identity.smtp_port,
                    identity.use_tls as i32,
                    identity.credential,
                    identity.daily_limit,
                    identity.signature,
                    identity.is_default as i32,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn load_identity(&self, id: &str) -> Result<Option<SendingIdentity>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!("{IDENTITY_SELECT} WHERE id = ?1"))
            .map_err(db_err)?;
        let mut rows = stmt.query_map([id], row_to_identity).map_err(db_err)?;
        match rows.next() {
            Some(Ok(identity)) => Ok(Some(identity)),
            Some(Err(e)) => Err(db_err(e)),
            None => Ok(None),
        }
    }

    /// Resolve a task's identity selection, preserving input order.
    /// Unknown ids are skipped.
    pub fn load_identities_by_ids(&self, ids: &[&str]) -> Result<Vec<SendingIdentity>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(identity) = self.load_identity(id)? {
                out.push(identity);
            }
        }
        Ok(out)
    }

    /// All identities an operator can send from, default first.
    pub fn load_identities_for_owner(&self, owner: &str) -> Result<Vec<SendingIdentity>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "{IDENTITY_SELECT} WHERE owner = ?1 ORDER BY is_default DESC, address"
            ))
            .map_err(db_err)?;
        let rows = stmt.query_map([owner], row_to_identity).map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
    }
}

const IDENTITY_SELECT: &str = "SELECT id, owner, address, sender_name, smtp_host, smtp_port, use_tls, \
     credential, daily_limit, signature, is_default FROM identities";

fn row_to_identity(row: &rusqlite::Row<'_>) -> rusqlite::Result<SendingIdentity> {
    Ok(SendingIdentity {
        id: row.get(0)?,
        owner: row.get(1)?,
        address: row.get(2)?,
        sender_name: row.get(3)?,
        smtp_host: row.get(4)?,
        smtp_port: row.get::<_, i64>(5)? as u16,
        use_tls: row.get::<_, i32>(6)? != 0,
        credential: row.get(7)?,
        daily_limit: row.get(8)?,
        signature: row.get(9)?,
        is_default: row.get::<_, i32>(10)? != 0,
    })
}
