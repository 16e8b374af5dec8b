use std::fmt;

use crate::error::TryOnError;
use crate::images::GeneratedImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppStatus {
    #[default]
    Idle,
    Generating,
    Success,
    Error,
}

impl AppStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Generating => "generating",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A guard rejected the request; status stays where it was.
    Refused(String),
    Started,
    Completed(Vec<GeneratedImage>),
    Failed(String),
}

/// Snapshot of what the user sees. Every change goes through [`Session::reduce`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    pub status: AppStatus,
    pub results: Vec<GeneratedImage>,
    pub message: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reduce(self, event: SessionEvent) -> Self {
        match event {
            SessionEvent::Refused(message) => Self {
                message: Some(message),
                ..self
            },
            SessionEvent::Started => Self {
                status: AppStatus::Generating,
                results: Vec::new(),
                message: None,
            },
            SessionEvent::Completed(results) if results.is_empty() => Self {
                status: AppStatus::Error,
                results,
                message: Some(TryOnError::AllCallsFailed.to_string()),
            },
            SessionEvent::Completed(results) => Self {
                status: AppStatus::Success,
                results,
                message: None,
            },
            SessionEvent::Failed(message) => Self {
                status: AppStatus::Error,
                results: Vec::new(),
                message: Some(message),
            },
        }
    }

    pub fn is_generating(&self) -> bool {
        self.status == AppStatus::Generating
    }
}
