//! Named statement templates.
//!
//! A named [`Command`](crate::models::Command) is only ever resolved through
//! this table; its name is never executed as SQL. The built-in set covers the
//! statements a job queue issues. Templates are prepared without declared
//! parameter types, so every placeholder carries an explicit cast.

use crate::error::{DbError, DbResult};
use std::borrow::Cow;
use std::collections::HashMap;

const INSERT_JOB: &str = "\
INSERT INTO que_jobs (queue, priority, run_at, job_class, args)
VALUES (
  coalesce($1::text, ''::text),
  coalesce($2::smallint, 100::smallint),
  coalesce($3::timestamptz, now()::timestamptz),
  $4::text,
  coalesce($5::json, '[]'::json)
)
RETURNING *";

const LOCK_JOB: &str = "\
WITH RECURSIVE jobs AS (
  SELECT (j).*, pg_try_advisory_lock((j).job_id) AS locked
  FROM (
    SELECT j
    FROM que_jobs AS j
    WHERE queue = $1::text
    AND run_at <= now()
    ORDER BY priority, run_at, job_id
    LIMIT 1
  ) AS t1
  UNION ALL (
    SELECT (j).*, pg_try_advisory_lock((j).job_id) AS locked
    FROM (
      SELECT (
        SELECT j
        FROM que_jobs AS j
        WHERE queue = $1::text
        AND run_at <= now()
        AND (priority, run_at, job_id) > (jobs.priority, jobs.run_at, jobs.job_id)
        ORDER BY priority, run_at, job_id
        LIMIT 1
      ) AS j
      FROM jobs
      WHERE jobs.job_id IS NOT NULL
      LIMIT 1
    ) AS t1
  )
)
SELECT queue, priority, run_at, job_id, job_class, args, error_count
FROM jobs
WHERE locked
LIMIT 1";

const CHECK_JOB: &str = "\
SELECT 1 AS one
FROM   que_jobs
WHERE  queue    = $1::text
AND    priority = $2::smallint
AND    run_at   = $3::timestamptz
AND    job_id   = $4::bigint";

const SET_ERROR: &str = "\
UPDATE que_jobs
SET error_count = error_count + 1,
    run_at      = now() + $1::float8 * '1 second'::interval,
    last_error  = $2::text
WHERE queue     = $3::text
AND   priority  = $4::smallint
AND   run_at    = $5::timestamptz
AND   job_id    = $6::bigint";

const DESTROY_JOB: &str = "\
DELETE FROM que_jobs
WHERE queue    = $1::text
AND   priority = $2::smallint
AND   run_at   = $3::timestamptz
AND   job_id   = $4::bigint";

const JOB_STATS: &str = "\
SELECT queue, job_class, count(*) AS count,
       count(locks.job_id) AS count_working,
       sum((error_count > 0)::int) AS count_errored,
       max(error_count) AS highest_error_count,
       min(run_at) AS oldest_run_at
FROM que_jobs
LEFT JOIN (
  SELECT (classid::bigint << 32) + objid::bigint AS job_id
  FROM pg_locks
  WHERE locktype = 'advisory'
) locks USING (job_id)
GROUP BY queue, job_class
ORDER BY count(*) DESC";

const WORKER_STATES: &str = "\
SELECT que_jobs.*, pg.pid AS pg_backend_pid, pg.state AS pg_state,
       pg.state_change AS pg_state_changed_at, pg.query AS pg_last_query,
       pg.query_start AS pg_last_query_started_at,
       pg.xact_start AS pg_transaction_started_at,
       pg.wait_event_type IS NOT DISTINCT FROM 'Lock' AS pg_waiting_on_lock
FROM que_jobs
JOIN (
  SELECT (classid::bigint << 32) + objid::bigint AS job_id, pg_stat_activity.*
  FROM pg_locks
  JOIN pg_stat_activity USING (pid)
  WHERE locktype = 'advisory'
) pg USING (job_id)";

/// Template table: command name → SQL text.
#[derive(Debug, Clone)]
pub struct SqlTemplates {
    templates: HashMap<Cow<'static, str>, Cow<'static, str>>,
}

impl SqlTemplates {
    /// The built-in job queue statements.
    pub fn new() -> Self {
        Self::empty()
            .with_template("insert_job", INSERT_JOB)
            .with_template("lock_job", LOCK_JOB)
            .with_template("check_job", CHECK_JOB)
            .with_template("set_error", SET_ERROR)
            .with_template("destroy_job", DESTROY_JOB)
            .with_template("job_stats", JOB_STATS)
            .with_template("worker_states", WORKER_STATES)
    }

    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Add or replace a template.
    pub fn with_template(
        mut self,
        name: impl Into<Cow<'static, str>>,
        sql: impl Into<Cow<'static, str>>,
    ) -> Self {
        self.templates.insert(name.into(), sql.into());
        self
    }

    /// Resolve a template by name.
    pub fn get(&self, name: &str) -> DbResult<&str> {
        self.templates
            .get(name)
            .map(|sql| sql.as_ref())
            .ok_or_else(|| DbError::unknown_command(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Template names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(|k| k.as_ref()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for SqlTemplates {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::lexer::{Scanner, Token};

    #[test]
    fn test_builtin_templates() {
        let templates = SqlTemplates::new();
        assert_eq!(
            templates.names(),
            vec![
                "check_job",
                "destroy_job",
                "insert_job",
                "job_stats",
                "lock_job",
                "set_error",
                "worker_states"
            ]
        );
        assert!(templates.get("insert_job").unwrap().starts_with("INSERT INTO que_jobs"));
    }

    #[test]
    fn test_unknown_name_is_an_error_not_sql() {
        let templates = SqlTemplates::new();
        let err = templates.get("SELECT 1").unwrap_err();
        assert!(matches!(err, DbError::UnknownCommand { ref name } if name == "SELECT 1"));
    }

    #[test]
    fn test_with_template_overrides() {
        let templates = SqlTemplates::new()
            .with_template("insert_job", "SELECT 1")
            .with_template(String::from("ping"), String::from("SELECT 'pong'"));
        assert_eq!(templates.get("insert_job").unwrap(), "SELECT 1");
        assert!(templates.contains("ping"));
    }

    #[test]
    fn test_every_parameter_is_cast() {
        let templates = SqlTemplates::new();
        for name in templates.names() {
            let sql = templates.get(name).unwrap();
            for token in Scanner::new(sql) {
                if let Token::Placeholder { start, end, .. } = token {
                    assert!(
                        sql[end..].starts_with("::"),
                        "{}: placeholder at byte {} has no cast",
                        name,
                        start
                    );
                }
            }
        }
    }

    #[test]
    fn test_worker_states_reads_current_activity_columns() {
        let sql = SqlTemplates::new().get("worker_states").unwrap().to_string();
        assert!(sql.contains("wait_event_type"));
        assert!(!sql.contains("pg.waiting "));
    }
}
