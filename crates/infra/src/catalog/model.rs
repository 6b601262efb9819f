//! Import job records and their results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockline_core::{DomainError, ImportId, UserId};

/// Import job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ImportStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Processing => "processing",
            ImportStatus::Completed => "completed",
            ImportStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ImportStatus::Completed | ImportStatus::Failed)
    }
}

impl core::fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ImportStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending" => Ok(ImportStatus::Pending),
            "processing" => Ok(ImportStatus::Processing),
            "completed" => Ok(ImportStatus::Completed),
            "failed" => Ok(ImportStatus::Failed),
            other => Err(DomainError::validation(format!("unknown import status: {other}"))),
        }
    }
}

/// One recorded failure. `row` is the 1-based line in the source file
/// (header = 1); structural failures have no row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportIssue {
    pub row: Option<usize>,
    pub message: String,
}

impl ImportIssue {
    pub fn row(row: usize, message: impl Into<String>) -> Self {
        Self {
            row: Some(row),
            message: message.into(),
        }
    }

    pub fn structural(message: impl Into<String>) -> Self {
        Self {
            row: None,
            message: message.into(),
        }
    }
}

/// Counters and per-row failures of one run. This is the results artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResults {
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub failed: u64,
    pub errors: Vec<ImportIssue>,
}

impl ImportResults {
    pub fn record_failure(&mut self, row: usize, message: impl Into<String>) {
        self.failed += 1;
        self.errors.push(ImportIssue::row(row, message));
    }

    pub fn final_status(&self) -> ImportStatus {
        if self.failed > 0 {
            ImportStatus::Failed
        } else {
            ImportStatus::Completed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductImport {
    pub id: ImportId,
    pub path: String,
    pub uploaded_by: Option<UserId>,
    pub status: ImportStatus,
    pub results_path: Option<String>,
    pub errors: Vec<ImportIssue>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductImport {
    pub fn new(path: impl Into<String>, uploaded_by: Option<UserId>, at: DateTime<Utc>) -> Self {
        Self {
            id: ImportId::new(),
            path: path.into(),
            uploaded_by,
            status: ImportStatus::Pending,
            results_path: None,
            errors: Vec::new(),
            version: 0,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn started(&self, at: DateTime<Utc>) -> Self {
        Self {
            status: ImportStatus::Processing,
            updated_at: at,
            ..self.clone()
        }
    }

    /// Terminal snapshot after every row was attempted.
    pub fn finished(
        &self,
        results: &ImportResults,
        results_path: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            status: results.final_status(),
            results_path,
            errors: results.errors.clone(),
            updated_at: at,
            ..self.clone()
        }
    }

    /// Terminal snapshot for a source that could not be processed at all.
    pub fn failed(&self, issue: ImportIssue, at: DateTime<Utc>) -> Self {
        Self {
            status: ImportStatus::Failed,
            results_path: None,
            errors: vec![issue],
            updated_at: at,
            ..self.clone()
        }
    }

    pub fn requeued(&self, at: DateTime<Utc>) -> Self {
        Self {
            status: ImportStatus::Pending,
            updated_at: at,
            ..self.clone()
        }
    }
}

/// Status lookup answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStatusView {
    pub id: ImportId,
    pub path: String,
    pub status: ImportStatus,
    pub results: Option<ImportResults>,
    pub errors: Vec<ImportIssue>,
}
