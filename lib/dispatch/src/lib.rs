//! Rate-limited, retrying dispatch of one message to many recipients.
//!
//! - [`semaphore`]: process-wide cap on concurrent provider calls
//! - [`recipient`]: recipient groups and the directory jobs resolve against
//! - [`message`]: per-recipient rendering (plain text + Markdown HTML)
//! - [`provider`]: the delivery seam and status classification
//! - [`pipeline`]: fan-out, retry, deadline and cancellation

pub mod error;
pub mod message;
pub mod pipeline;
pub mod provider;
pub mod recipient;
pub mod semaphore;

pub use error::{DirectoryError, DispatchError, RenderError};
pub use message::{RenderedMessage, render, salutation};
pub use pipeline::{
    DeliveryStatus, DispatchJob, DispatchReport, Dispatcher, RecipientOutcome, RetryPolicy,
};
pub use provider::{MessageProvider, SendOutcome, classify_status};
pub use recipient::{
    DEFAULT_OPENING_LINE, JobTarget, Recipient, RecipientDirectory, RecipientGroup, TEST_TARGET,
};
pub use semaphore::{CountingSemaphore, Permit};

// Re-exported so callers can build recipients without depending on lettre.
pub use lettre::Address;
pub use lettre::address::AddressError;
pub use lettre::message::Mailbox;
