//! Submitted jobs are recorded in a SQLite database in the work directory
//!
//! The ledger lets one invocation submit a job and a later one wait for it, cancel it or list
//! it. It only mirrors what the executor reported; the scheduler stays the source of truth.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use log::info;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::job::{Job, JobState, JobStatus};

pub const LEDGER_FILE: &str = "callbridge.db";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JobKind {
    /// A registered function run by the worker, has a result file
    Call,
    Command,
}

/// db column values are lower case
impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JobKind::Call => write!(f, "call"),
            JobKind::Command => write!(f, "command"),
        }
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "call" => Ok(JobKind::Call),
            "command" => Ok(JobKind::Command),
            other => Err(format!("unknown job kind {other:?}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct JobRecord {
    pub id: String,
    pub kind: JobKind,
    pub executor: String,
    pub native_id: Option<String>,
    pub state: JobState,
    pub exit_code: Option<i32>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// A handle that executors can wait on or cancel
    pub fn to_job(&self) -> Job {
        let status = JobStatus {
            state: self.state,
            time: self.updated_at,
            exit_code: self.exit_code,
            message: None,
        };
        Job::attach(&self.id, self.native_id.clone(), status)
    }

    fn from_row(row: &Row) -> rusqlite::Result<JobRecord> {
        Ok(JobRecord {
            id: row.get(0)?,
            kind: parse_column(row, 1)?,
            executor: row.get(2)?,
            native_id: row.get(3)?,
            state: parse_column(row, 4)?,
            exit_code: row.get(5)?,
            submitted_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

fn parse_column<T: FromStr<Err = String>>(row: &Row, index: usize) -> rusqlite::Result<T> {
    let text: String = row.get(index)?;
    text.parse().map_err(|err: String| {
        rusqlite::Error::FromSqlConversionFailure(index, Type::Text, err.into())
    })
}

const COLUMNS: &str = "id, kind, executor, native_id, state, exit_code, submitted_at, updated_at";

pub struct Ledger {
    conn: Connection,
}

impl Ledger {
    /// Open (and create if needed) the ledger in a work directory
    pub fn open(work_directory: &Path) -> rusqlite::Result<Ledger> {
        let path = work_directory.join(LEDGER_FILE);
        if !path.exists() { info!("Creating new job ledger {}", path.display()) }
        let conn = Connection::open(&path)?;

        static SCHEMA: &str =
            include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/db/schema.sql"));
        conn.execute_batch(SCHEMA)?;

        Ok(Ledger { conn })
    }

    pub fn record_submission(
        &self,
        job: &Job,
        kind: JobKind,
        executor: &str,
    ) -> rusqlite::Result<()> {
        info!("Recording {kind} job {} in ledger", job.id);
        let now = Utc::now();
        self.conn.execute(
            &format!("INSERT INTO job ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                job.id,
                kind.to_string(),
                executor,
                job.native_id,
                job.status.state.to_string(),
                job.status.exit_code,
                now,
                now
            ],
        )?;
        Ok(())
    }

    pub fn update_status(&self, id: &str, status: &JobStatus) -> rusqlite::Result<()> {
        info!("Updating {id} with state {}", status.state);
        let updated = self.conn.execute(
            "UPDATE job SET state = ?1, exit_code = ?2, updated_at = ?3 WHERE id = ?4",
            params![status.state.to_string(), status.exit_code, status.time, id],
        )?;
        match updated {
            0 => Err(rusqlite::Error::QueryReturnedNoRows),
            _ => Ok(()),
        }
    }

    pub fn get(&self, id: &str) -> rusqlite::Result<Option<JobRecord>> {
        let query = format!("SELECT {COLUMNS} FROM job WHERE id = ?1");
        self.conn.query_row(&query, [id], JobRecord::from_row).optional()
    }

    pub fn list(&self) -> rusqlite::Result<Vec<JobRecord>> {
        let query = format!("SELECT {COLUMNS} FROM job ORDER BY submitted_at, id");
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map([], JobRecord::from_row)?;
        rows.collect()
    }
}
