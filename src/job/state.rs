use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JobState {
    New,
    Queued,
    Active,
    Completed,
    Failed,
    Canceled,
}

/// Job states follow PSI/J naming, only the last three are final
///
/// The ledger stores states as lower case text, so Display and FromStr must stay symmetric.
impl JobState {
    pub fn is_final(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::New => "new",
            JobState::Queued => "queued",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(JobState::New),
            "queued" => Ok(JobState::Queued),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "canceled" => Ok(JobState::Canceled),
            other => Err(format!("unknown job state {other:?}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct JobStatus {
    pub state: JobState,
    pub time: DateTime<Utc>,
    pub exit_code: Option<i32>,
    pub message: Option<String>,
}

impl JobStatus {
    pub fn new(state: JobState) -> JobStatus {
        JobStatus {
            state,
            time: Utc::now(),
            exit_code: None,
            message: None,
        }
    }

    pub fn exited(code: i32) -> JobStatus {
        let state = if code == 0 { JobState::Completed } else { JobState::Failed };
        JobStatus { exit_code: Some(code), ..JobStatus::new(state) }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> JobStatus {
        self.message = Some(message.into());
        self
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.state)?;
        if let Some(code) = self.exit_code {
            write!(f, " (exit code {code})")?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}
