//! The dispatch pipeline: one task per recipient, bounded by a shared
//! semaphore, retrying transient provider failures with linear backoff.
//!
//! A recipient that cannot be reached never fails the job. Only validation,
//! caller cancellation, the job deadline, or a crashed task do.

use crate::error::DispatchError;
use crate::message::render;
use crate::provider::{MessageProvider, SendOutcome};
use crate::recipient::{JobTarget, Recipient, RecipientDirectory};
use crate::semaphore::CountingSemaphore;
use lettre::message::Mailbox;
use multi_emailer_core::MessageId;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// How many times to try a recipient and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

/// A batch send requested by a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchJob {
    pub subject: String,
    /// Markdown body.
    pub body: String,
    pub target: JobTarget,
}

impl DispatchJob {
    /// Checks the job before any recipient is contacted.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::EmptySubject`] or [`DispatchError::EmptyBody`].
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.subject.trim().is_empty() {
            return Err(DispatchError::EmptySubject);
        }
        if self.body.trim().is_empty() {
            return Err(DispatchError::EmptyBody);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    Failed { reason: String },
}

/// What happened to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientOutcome {
    pub address: String,
    pub message_id: Option<MessageId>,
    /// Provider calls made. Zero if rendering failed.
    pub attempts: u32,
    pub status: DeliveryStatus,
}

impl RecipientOutcome {
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        self.status == DeliveryStatus::Delivered
    }
}

/// Per-recipient outcomes of a completed job, in directory order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub outcomes: Vec<RecipientOutcome>,
}

impl DispatchReport {
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_delivered()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }
}

/// Runs dispatch jobs against a process-wide concurrency cap.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    semaphore: Arc<CountingSemaphore>,
    policy: RetryPolicy,
    job_timeout: Duration,
}

impl Dispatcher {
    pub fn new(semaphore: Arc<CountingSemaphore>, policy: RetryPolicy, job_timeout: Duration) -> Self {
        Self {
            semaphore,
            policy,
            job_timeout,
        }
    }

    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Sends `job` from `sender` to every recipient of its target.
    ///
    /// Returns once every recipient has a terminal outcome, the job deadline
    /// passes, or `cancel` fires. On deadline or cancellation all outstanding
    /// recipient tasks are aborted.
    ///
    /// # Errors
    ///
    /// Returns a validation error before any provider call, or
    /// [`DispatchError::Cancelled`], [`DispatchError::DeadlineExceeded`],
    /// [`DispatchError::Worker`] if the job could not finish.
    pub async fn dispatch(
        &self,
        directory: &RecipientDirectory,
        provider: Arc<dyn MessageProvider>,
        sender: &Mailbox,
        job: &DispatchJob,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport, DispatchError> {
        job.validate()?;
        let recipients = directory.resolve(&job.target, sender)?;
        let count = recipients.len();
        tracing::info!(recipients = count, sender = %sender.email, "Dispatching job");

        let job_cancel = cancel.child_token();
        // Stops stragglers however this function returns.
        let _stop = job_cancel.clone().drop_guard();

        let context = Arc::new(SendContext {
            semaphore: Arc::clone(&self.semaphore),
            policy: self.policy,
            provider,
            from: sender.clone(),
            subject: job.subject.trim().to_string(),
            body: job.body.trim().to_string(),
            cancel: job_cancel.clone(),
        });

        let mut tasks = JoinSet::new();
        for (index, recipient) in recipients.into_iter().enumerate() {
            let context = Arc::clone(&context);
            tasks.spawn(async move { (index, deliver(&context, recipient).await) });
        }

        let deadline = tokio::time::sleep(self.job_timeout);
        tokio::pin!(deadline);

        let mut outcomes: Vec<Option<RecipientOutcome>> = vec![None; count];
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tasks.abort_all();
                    tracing::warn!("Dispatch cancelled by caller");
                    return Err(DispatchError::Cancelled);
                }
                () = &mut deadline => {
                    job_cancel.cancel();
                    tasks.abort_all();
                    tracing::warn!(timeout = ?self.job_timeout, "Dispatch deadline exceeded");
                    return Err(DispatchError::DeadlineExceeded);
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((index, outcome))) => outcomes[index] = Some(outcome),
                    Some(Err(err)) => {
                        tasks.abort_all();
                        tracing::error!(error = %err, "Recipient task failed");
                        return Err(DispatchError::Worker {
                            details: err.to_string(),
                        });
                    }
                },
            }
        }

        let report = DispatchReport {
            outcomes: outcomes.into_iter().flatten().collect(),
        };
        tracing::info!(
            delivered = report.delivered(),
            failed = report.failed(),
            "Dispatch finished"
        );
        Ok(report)
    }
}

struct SendContext {
    semaphore: Arc<CountingSemaphore>,
    policy: RetryPolicy,
    provider: Arc<dyn MessageProvider>,
    from: Mailbox,
    subject: String,
    body: String,
    cancel: CancellationToken,
}

async fn deliver(context: &SendContext, recipient: Recipient) -> RecipientOutcome {
    let address = recipient.address.email.to_string();
    let message_id = MessageId::new();
    let failed = |attempts: u32, reason: String| RecipientOutcome {
        address: address.clone(),
        message_id: Some(message_id),
        attempts,
        status: DeliveryStatus::Failed { reason },
    };

    let message = match render(
        &context.from,
        &recipient,
        &context.subject,
        &context.body,
        message_id,
    ) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!(recipient = %address, error = %err, "Could not render message");
            return failed(0, err.to_string());
        }
    };
    let from = context.from.email.to_string();

    let mut attempt = 0;
    loop {
        attempt += 1;

        let outcome = {
            let _permit = tokio::select! {
                biased;
                () = context.cancel.cancelled() => return failed(attempt - 1, "cancelled".to_string()),
                permit = context.semaphore.permit() => permit,
            };
            tokio::select! {
                biased;
                () = context.cancel.cancelled() => return failed(attempt, "cancelled".to_string()),
                outcome = context.provider.send_raw(&from, &message.raw) => outcome,
            }
        };

        match outcome {
            SendOutcome::Delivered => {
                tracing::debug!(recipient = %address, attempt, "Message delivered");
                return RecipientOutcome {
                    address: address.clone(),
                    message_id: Some(message_id),
                    attempts: attempt,
                    status: DeliveryStatus::Delivered,
                };
            }
            SendOutcome::Permanent { reason } => {
                tracing::warn!(recipient = %address, attempt, %reason, "Message rejected");
                return failed(attempt, reason);
            }
            SendOutcome::Retryable { status } => {
                if attempt >= context.policy.max_attempts {
                    tracing::warn!(recipient = %address, attempt, status, "Giving up on recipient");
                    return failed(
                        attempt,
                        format!("gave up after {attempt} attempts (last status {status})"),
                    );
                }
                let delay = context.policy.delay_after(attempt);
                tracing::debug!(recipient = %address, attempt, status, ?delay, "Retrying after backoff");
                tokio::select! {
                    biased;
                    () = context.cancel.cancelled() => return failed(attempt, "cancelled".to_string()),
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
