//! Scheduled-task rows.

use chrono::{DateTime, Utc};
use outreach_core::error::{OutreachError, Result};
use outreach_core::types::{
    Cadence, IdentitySelection, ScheduledTask, TargetRef, TaskStatus,
};
use rusqlite::{TransactionBehavior, params};

use crate::{Store, db_err, opt_ts, parse_opt_ts, parse_ts, to_ts};

/// Outcome of one dispatcher run, folded into the task row in a single
/// exclusive transaction.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub success_count: u32,
    pub failed_count: u32,
    pub last_run: DateTime<Utc>,
    pub next_run: Option<DateTime<Utc>>,
    pub new_status: Option<TaskStatus>,
}

impl Store {
    /// Insert or replace a task.
    pub fn save_task(&self, task: &ScheduledTask) -> Result<()> {
        let (target_kind, target_group) = match &task.target {
            TargetRef::CandidateGroup(id) => ("candidate_group", id.clone()),
            TargetRef::ContactGroup(id) => ("contact_group", id.clone()),
        };
        let (identity_mode, identity_ids) = match &task.identities {
            IdentitySelection::Single(id) => {
                ("single", serde_json::json!([id]).to_string())
            }
            IdentitySelection::Pool(ids) => ("pool", serde_json::json!(ids).to_string()),
        };
        let cadence = serde_json::to_string(&task.cadence)
            .map_err(|e| OutreachError::Storage(format!("serialize cadence: {e}")))?;

        self.lock()
            .execute(
                "INSERT OR REPLACE INTO scheduled_tasks
                 (id, owner, name, target_kind, target_group, template_id,
                  identity_mode, identity_ids, cadence, start_time, end_time,
                  status, enabled, last_run, next_run, total_executions,
                  successful_executions, failed_executions, description,
                  created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                         ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
                params![
                    task.id,
                    task.owner,
                    task.name,
                    target_kind,
                    target_group,
                    task.template_id,
                    identity_mode,
                    identity_ids,
                    cadence,
                    to_ts(task.start_time),
                    opt_ts(task.end_time),
                    task.status.as_str(),
                    task.enabled as i32,
                    opt_ts(task.last_run),
                    opt_ts(task.next_run),
                    task.total_executions,
                    task.successful_executions,
                    task.failed_executions,
                    task.description,
                    to_ts(task.created_at),
                    to_ts(task.updated_at),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Load one task by id.
    pub fn load_task(&self, id: &str) -> Result<Option<ScheduledTask>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!("{TASK_SELECT} WHERE id = ?1"))
            .map_err(db_err)?;
        let mut rows = stmt
            .query_map([id], row_to_task)
            .map_err(db_err)?;
        match rows.next() {
            Some(Ok(task)) => Ok(Some(task)),
            Some(Err(e)) => Err(db_err(e)),
            None => Ok(None),
        }
    }

    /// All tasks the runtime should hold a live binding for.
    pub fn load_schedulable_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "{TASK_SELECT} WHERE enabled = 1 AND status = 'active' ORDER BY created_at"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], row_to_task)
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
    }

    /// All tasks for an operator-facing listing.
    pub fn load_all_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!("{TASK_SELECT} ORDER BY created_at DESC"))
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], row_to_task)
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
    }

    pub fn delete_task(&self, id: &str) -> Result<()> {
        self.lock()
            .execute("DELETE FROM scheduled_tasks WHERE id = ?1", [id])
            .map_err(db_err)?;
        Ok(())
    }

    /// The single next-run write path used by the runtime when a task is
    /// bound.
    pub fn set_task_next_run(&self, id: &str, next_run: Option<DateTime<Utc>>) -> Result<()> {
        self.lock()
            .execute(
                "UPDATE scheduled_tasks SET next_run = ?1, updated_at = ?2 WHERE id = ?3",
                params![opt_ts(next_run), to_ts(Utc::now()), id],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn set_task_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        self.lock()
            .execute(
                "UPDATE scheduled_tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), to_ts(Utc::now()), id],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Fold one execution's outcome into the row. Counter arithmetic
    /// happens inside the statement, in one immediate transaction, so
    /// overlapping manual + scheduled firings cannot double-count.
    pub fn apply_run_outcome(&self, id: &str, outcome: &RunOutcome) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;
        tx.execute(
            "UPDATE scheduled_tasks SET
                 total_executions = total_executions + 1,
                 successful_executions = successful_executions + ?1,
                 failed_executions = failed_executions + ?2,
                 last_run = ?3,
                 next_run = ?4,
                 status = COALESCE(?5, status),
                 updated_at = ?6
             WHERE id = ?7",
            params![
                outcome.success_count,
                outcome.failed_count,
                to_ts(outcome.last_run),
                opt_ts(outcome.next_run),
                outcome.new_status.map(|s| s.as_str()),
                to_ts(Utc::now()),
                id,
            ],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(())
    }
}

const TASK_SELECT: &str = "SELECT id, owner, name, target_kind, target_group, template_id, \
     identity_mode, identity_ids, cadence, start_time, end_time, status, \
     enabled, last_run, next_run, total_executions, successful_executions, \
     failed_executions, description, created_at, updated_at \
     FROM scheduled_tasks";

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledTask> {
    let target_kind: String = row.get(3)?;
    let target_group: String = row.get(4)?;
    let target = if target_kind == "contact_group" {
        TargetRef::ContactGroup(target_group)
    } else {
        TargetRef::CandidateGroup(target_group)
    };

    let identity_mode: String = row.get(6)?;
    let identity_ids: String = row.get(7)?;
    let ids: Vec<String> = serde_json::from_str(&identity_ids).unwrap_or_default();
    let identities = if identity_mode == "pool" {
        IdentitySelection::Pool(ids)
    } else {
        IdentitySelection::Single(ids.into_iter().next().unwrap_or_default())
    };

    let cadence_json: String = row.get(8)?;
    let cadence: Cadence = serde_json::from_str(&cadence_json).unwrap_or(Cadence::Once);

    let status: String = row.get(11)?;
    let start_time: String = row.get(9)?;
    let end_time: Option<String> = row.get(10)?;
    let last_run: Option<String> = row.get(13)?;
    let next_run: Option<String> = row.get(14)?;
    let created_at: String = row.get(19)?;
    let updated_at: String = row.get(20)?;

    Ok(ScheduledTask {
        id: row.get(0)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        target,
        template_id: row.get(5)?,
        identities,
        cadence,
        start_time: parse_ts(&start_time),
        end_time: parse_opt_ts(end_time),
        status: TaskStatus::parse(&status),
        enabled: row.get::<_, i32>(12)? != 0,
        last_run: parse_opt_ts(last_run),
        next_run: parse_opt_ts(next_run),
        total_executions: row.get(15)?,
        successful_executions: row.get(16)?,
        failed_executions: row.get(17)?,
        description: row.get(18)?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> ScheduledTask {
        let mut task = ScheduledTask::new(
            "op",
            "weekly outreach",
            TargetRef::ContactGroup("g1".into()),
            "tpl1",
            IdentitySelection::Pool(vec!["i1".into(), "i2".into()]),
            Cadence::Weekly { weekdays: vec![0, 2] },
            Utc::now(),
        );
        task.description = Some("pilot".into());
        task
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let store = Store::in_memory().unwrap();
        let task = sample_task();
        store.save_task(&task).unwrap();

        let loaded = store.load_task(&task.id).unwrap().unwrap();
        assert_eq!(loaded.name, "weekly outreach");
        assert_eq!(loaded.target, TargetRef::ContactGroup("g1".into()));
        assert_eq!(loaded.cadence, Cadence::Weekly { weekdays: vec![0, 2] });
        assert_eq!(
            loaded.identities,
            IdentitySelection::Pool(vec!["i1".into(), "i2".into()])
        );
        assert_eq!(loaded.status, TaskStatus::Active);
    }

    #[test]
    fn test_schedulable_excludes_paused_and_disabled() {
        let store = Store::in_memory().unwrap();
        let active = sample_task();
        let mut paused = sample_task();
        paused.status = TaskStatus::Paused;
        let mut disabled = sample_task();
        disabled.enabled = false;
        store.save_task(&active).unwrap();
        store.save_task(&paused).unwrap();
        store.save_task(&disabled).unwrap();

        let schedulable = store.load_schedulable_tasks().unwrap();
        assert_eq!(schedulable.len(), 1);
        assert_eq!(schedulable[0].id, active.id);
    }

    #[test]
    fn test_apply_run_outcome_increments_counters() {
        let store = Store::in_memory().unwrap();
        let task = sample_task();
        store.save_task(&task).unwrap();

        let now = Utc::now();
        let outcome = RunOutcome {
            success_count: 4,
            failed_count: 1,
            last_run: now,
            next_run: Some(now + chrono::Duration::days(1)),
            new_status: None,
        };
        store.apply_run_outcome(&task.id, &outcome).unwrap();
        store.apply_run_outcome(&task.id, &outcome).unwrap();

        let loaded = store.load_task(&task.id).unwrap().unwrap();
        assert_eq!(loaded.total_executions, 2);
        assert_eq!(loaded.successful_executions, 8);
        assert_eq!(loaded.failed_executions, 2);
        assert!(loaded.last_run.is_some());
        assert_eq!(loaded.status, TaskStatus::Active);
    }

    #[test]
    fn test_outcome_can_complete_task() {
        let store = Store::in_memory().unwrap();
        let mut task = sample_task();
        task.cadence = Cadence::Once;
        store.save_task(&task).unwrap();

        store
            .apply_run_outcome(
                &task.id,
                &RunOutcome {
                    success_count: 2,
                    failed_count: 0,
                    last_run: Utc::now(),
                    next_run: None,
                    new_status: Some(TaskStatus::Completed),
                },
            )
            .unwrap();
        let loaded = store.load_task(&task.id).unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Completed);
        assert!(loaded.next_run.is_none());
    }
}
