use std::{
    fmt::{Display, Formatter},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AcquisitionError, AcquisitionErrorKind},
    extract::ExtractedContentRoot,
};

/// Where an acquisition attempt is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcquisitionStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

impl AcquisitionStatus {
    /// Returns true for the states an attempt never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl Display for AcquisitionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::InProgress => "in progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The outcome of a single acquisition.
///
/// An attempt is created by the tracker, moved through its states while the
/// pipeline runs and handed back once terminal. The tracker keeps no copy, so
/// persisting it is up to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AcquisitionAttempt {
    status: AcquisitionStatus,
    destination: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_kind: Option<AcquisitionErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_root: Option<ExtractedContentRoot>,
}

impl AcquisitionAttempt {
    pub(crate) fn new(destination: PathBuf) -> Self {
        Self {
            status: AcquisitionStatus::NotStarted,
            destination,
            started_at: None,
            completed_at: None,
            error_message: None,
            error_kind: None,
            content_root: None,
        }
    }

    pub(crate) fn begin(&mut self) {
        self.status = AcquisitionStatus::InProgress;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn complete(&mut self, root: ExtractedContentRoot) {
        self.status = AcquisitionStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.error_message = None;
        self.error_kind = None;
        self.content_root = Some(root);
    }

    pub(crate) fn fail(&mut self, err: &AcquisitionError) {
        self.status = AcquisitionStatus::Failed;
        self.completed_at = None;
        self.error_message = Some(err.to_string());
        self.error_kind = Some(err.kind());
        self.content_root = None;
    }

    pub fn status(&self) -> AcquisitionStatus {
        self.status
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Set once the attempt completed successfully.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// A full sentence naming the failing phase, set once the attempt failed.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn error_kind(&self) -> Option<AcquisitionErrorKind> {
        self.error_kind
    }

    pub fn content_root(&self) -> Option<&ExtractedContentRoot> {
        self.content_root.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.status == AcquisitionStatus::Completed
    }
}
