//! Error types for the dispatch crate.

use std::fmt;

/// Errors that fail a whole dispatch job.
///
/// A recipient that cannot be reached is not an error; it is recorded in the
/// [`DispatchReport`](crate::pipeline::DispatchReport).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The subject is empty after trimming.
    EmptySubject,
    /// The body is empty after trimming.
    EmptyBody,
    /// No recipient group has this id.
    UnknownGroup { id: String },
    /// The caller cancelled the job.
    Cancelled,
    /// The job ran past its deadline.
    DeadlineExceeded,
    /// A recipient task panicked or was aborted.
    Worker { details: String },
}

impl DispatchError {
    /// Returns true for errors caught before any network call.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptySubject | Self::EmptyBody | Self::UnknownGroup { .. }
        )
    }

    /// A message suitable for showing to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::EmptySubject => "Please provide a subject".to_string(),
            Self::EmptyBody => "Please provide a message body".to_string(),
            Self::UnknownGroup { id } => format!("Unknown group: {id}"),
            Self::Cancelled | Self::DeadlineExceeded | Self::Worker { .. } => {
                "Failed to send messages".to_string()
            }
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySubject => write!(f, "subject is empty"),
            Self::EmptyBody => write!(f, "body is empty"),
            Self::UnknownGroup { id } => write!(f, "unknown recipient group: {id}"),
            Self::Cancelled => write!(f, "dispatch cancelled"),
            Self::DeadlineExceeded => write!(f, "dispatch deadline exceeded"),
            Self::Worker { details } => write!(f, "recipient task failed: {details}"),
        }
    }
}

impl std::error::Error for DispatchError {}

/// A message could not be rendered for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderError {
    pub reason: String,
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to render message: {}", self.reason)
    }
}

impl std::error::Error for RenderError {}

impl From<lettre::error::Error> for RenderError {
    fn from(err: lettre::error::Error) -> Self {
        Self {
            reason: err.to_string(),
        }
    }
}

/// Errors from building a [`RecipientDirectory`](crate::recipient::RecipientDirectory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// Two groups share an id.
    DuplicateGroup { id: String },
    /// A group uses an id reserved for a built-in target.
    ReservedGroup { id: String },
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateGroup { id } => write!(f, "duplicate recipient group: {id}"),
            Self::ReservedGroup { id } => write!(f, "recipient group id is reserved: {id}"),
        }
    }
}

impl std::error::Error for DirectoryError {}
