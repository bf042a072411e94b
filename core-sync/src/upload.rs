//! # Upload Coordinator
//!
//! Issues idempotent uploads and reconciles the cache afterwards.
//!
//! ## Sequence
//!
//! 1. Reject if a pending or succeeded ticket with the same file key is
//!    inside the upload cooldown
//! 2. Reject if another upload is still settling (`busy`)
//! 3. Fingerprint the bytes; reject if the same digest prefix was submitted
//!    inside the content cooldown
//! 4. Open a pending ticket and upload with an idempotency key
//! 5. On success, wait for the settle delay and force a refresh; the upload
//!    response is not written to the cache
//! 6. On failure, show a categorised error; the cache is untouched
//!
//! Policy rejections are not errors: they produce an informational
//! notification and a `Rejected` outcome without any network call.

use bridge_traits::{BridgeError, Clock, RemoteFileService, UploadPayload, UploadReceipt};
use core_runtime::config::SyncTimings;
use core_runtime::events::{CoreEvent, EventBus, UploadEvent};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SyncError};
use crate::fingerprint::{self, Digest};
use crate::models::{
    FailureCategory, FileKey, RejectReason, TicketStatus, UploadFile, UploadOutcome, UploadTicket,
};
use crate::notifications::NotificationQueue;
use crate::scheduler::RefreshScheduler;
use crate::session::SessionContext;

/// Length of the idempotency key sent to the relay
const IDEMPOTENCY_KEY_LEN: usize = 32;

pub struct UploadCoordinator {
    remote: Arc<dyn RemoteFileService>,
    scheduler: Arc<RefreshScheduler>,
    notifications: Arc<NotificationQueue>,
    session: Arc<SessionContext>,
    clock: Arc<dyn Clock>,
    event_bus: Arc<EventBus>,
    timings: SyncTimings,
    upload_timeout: Duration,
    digest_prefix_len: usize,
}

impl UploadCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        remote: Arc<dyn RemoteFileService>,
        scheduler: Arc<RefreshScheduler>,
        notifications: Arc<NotificationQueue>,
        session: Arc<SessionContext>,
        clock: Arc<dyn Clock>,
        event_bus: Arc<EventBus>,
        timings: SyncTimings,
        upload_timeout: Duration,
        digest_prefix_len: usize,
    ) -> Self {
        Self {
            remote,
            scheduler,
            notifications,
            session,
            clock,
            event_bus,
            timings,
            upload_timeout,
            digest_prefix_len,
        }
    }

    #[instrument(skip(self, file), fields(name = %file.name, size = file.size_bytes()))]
    pub async fn submit(&self, file: UploadFile, custom_name: Option<String>) -> UploadOutcome {
        let key = file.file_key();
        let now = self.clock.unix_timestamp_millis();

        if let Err(e) = validate(&file) {
            return self.reject(&key, RejectReason::Invalid(e.to_string()), None).await;
        }

        let blocking = {
            let mut tickets = self.session.tickets();
            let pruned = tickets.prune(now, self.timings.upload_cooldown, self.timings.content_cooldown);
            if pruned > 0 {
                debug!(pruned, "Pruned expired upload tickets");
            }
            tickets
                .blocking(&key, now, self.timings.upload_cooldown)
                .map(|ticket| ticket.status)
        };
        if let Some(status) = blocking {
            debug!(?status, "File key inside cooldown");
            return self
                .reject(
                    &key,
                    RejectReason::RecentDuplicate,
                    Some(format!("{} was just uploaded", file.name)),
                )
                .await;
        }

        let Some(_uploading) = self.session.try_begin_upload() else {
            return self
                .reject(
                    &key,
                    RejectReason::Busy,
                    Some("Another upload is still finishing".to_string()),
                )
                .await;
        };

        let digest = compute_digest(&file).await;
        let prefix = digest.prefix(self.digest_prefix_len);
        if !digest.is_known() {
            warn!("Content digest unavailable; deduplicating by file key only");
        }

        // Resumed from the digest; re-check the book before claiming.
        let now = self.clock.unix_timestamp_millis();
        let duplicate_content = {
            let mut tickets = self.session.tickets();
            let seen = prefix
                .as_deref()
                .is_some_and(|p| tickets.content_seen(p, now, self.timings.content_cooldown));
            if !seen {
                if let Some(previous) =
                    tickets.open(UploadTicket::pending(key.clone(), prefix.clone(), now))
                {
                    debug!(previous = ?previous.status, "Superseded earlier ticket");
                }
            }
            seen
        };
        if duplicate_content {
            return self
                .reject(
                    &key,
                    RejectReason::DuplicateContent,
                    Some(format!("The content of {} was already uploaded", file.name)),
                )
                .await;
        }

        self.emit(UploadEvent::Submitted {
            file_key: key.to_string(),
            size_bytes: file.size_bytes(),
        });

        let display_name = custom_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&file.name)
            .to_string();

        let payload = UploadPayload {
            filename: file.name.clone(),
            mime_type: file.mime_type.clone(),
            data: file.bytes.clone(),
            custom_name,
            idempotency_key: idempotency_key(&key, prefix.as_deref()),
        };

        match self.upload(payload).await {
            Ok(receipt) => self.succeed(&key, &display_name, receipt).await,
            Err(error) => {
                self.fail(&key, prefix.as_deref(), &display_name, error)
                    .await
            }
        }
    }

    async fn upload(&self, payload: UploadPayload) -> Result<UploadReceipt> {
        match tokio::time::timeout(self.upload_timeout, self.remote.upload(payload)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SyncError::Remote(BridgeError::Timeout(self.upload_timeout))),
        }
    }

    async fn succeed(&self, key: &FileKey, display_name: &str, receipt: UploadReceipt) -> UploadOutcome {
        self.session.tickets().finish(key, TicketStatus::Succeeded);
        info!(
            file_id = %receipt.record.id,
            is_duplicate = receipt.is_duplicate,
            "Upload accepted by relay"
        );
        self.emit(UploadEvent::Completed {
            file_key: key.to_string(),
            file_id: receipt.record.id.clone(),
            is_duplicate: receipt.is_duplicate,
        });

        self.notifications
            .success(format!("Uploaded {}", display_name))
            .await;
        if receipt.is_duplicate {
            let existing = receipt
                .existing_file
                .as_ref()
                .map(|f| f.display_name.as_str())
                .unwrap_or(display_name);
            debug!(existing, "Relay reported the upload as a duplicate");
            self.notifications
                .info(format!("{} already exists on the relay", existing))
                .await;
        }

        // Let the relay finish processing before trusting its listing.
        tokio::time::sleep(self.timings.settle_delay).await;
        let refresh = self.scheduler.force_refresh(None).await;
        debug!(?refresh, "Post-upload refresh finished");

        UploadOutcome::Accepted {
            record: receipt.record,
        }
    }

    async fn fail(
        &self,
        key: &FileKey,
        prefix: Option<&str>,
        display_name: &str,
        error: SyncError,
    ) -> UploadOutcome {
        {
            let mut tickets = self.session.tickets();
            tickets.finish(key, TicketStatus::Failed);
            if let Some(prefix) = prefix {
                tickets.forget_content(prefix);
            }
        }

        let category = categorize(&error);
        let message = match category {
            FailureCategory::Size => format!("{} is too large to upload", display_name),
            FailureCategory::Type => format!("{} has an unsupported file type", display_name),
            FailureCategory::Network => format!(
                "Upload of {} failed: {}",
                display_name,
                error.user_message()
            ),
            FailureCategory::Server => format!(
                "Upload of {} was refused: {}",
                display_name,
                error.user_message()
            ),
        };

        warn!(error = %error, category = category.as_str(), "Upload failed");
        self.emit(UploadEvent::Failed {
            file_key: key.to_string(),
            category: category.as_str().to_string(),
            message: message.clone(),
        });
        self.notifications.error(message.clone()).await;

        UploadOutcome::Rejected {
            reason: RejectReason::Failed { category, message },
        }
    }

    async fn reject(&self, key: &FileKey, reason: RejectReason, message: Option<String>) -> UploadOutcome {
        debug!(reason = reason.code(), "Upload rejected by policy");
        self.emit(UploadEvent::Rejected {
            file_key: key.to_string(),
            reason: reason.code().to_string(),
        });
        match (&reason, message) {
            (RejectReason::Invalid(detail), _) => {
                self.notifications.warning(detail.clone()).await;
            }
            (_, Some(message)) => {
                self.notifications.info(message).await;
            }
            _ => {}
        }
        UploadOutcome::Rejected { reason }
    }

    fn emit(&self, event: UploadEvent) {
        self.event_bus.emit(CoreEvent::Upload(event)).ok();
    }
}

fn validate(file: &UploadFile) -> Result<()> {
    if file.name.trim().is_empty() {
        return Err(SyncError::InvalidInput("File has no name".to_string()));
    }
    if file.bytes.is_empty() {
        return Err(SyncError::InvalidInput(format!("{} is empty", file.name)));
    }
    Ok(())
}

/// Hash off the async workers; a failed hashing task yields `Unknown`
async fn compute_digest(file: &UploadFile) -> Digest {
    let bytes = file.bytes.clone();
    match tokio::task::spawn_blocking(move || fingerprint::digest(&bytes)).await {
        Ok(digest) => digest,
        Err(e) => {
            warn!(error = %e, "Fingerprinting task failed");
            Digest::Unknown
        }
    }
}

/// Stable key for the relay to recognise a retried submission
fn idempotency_key(key: &FileKey, digest_prefix: Option<&str>) -> String {
    let material = format!("{}#{}", key, digest_prefix.unwrap_or("-"));
    fingerprint::digest(material.as_bytes())
        .prefix(IDEMPOTENCY_KEY_LEN)
        .unwrap_or(material)
}

fn categorize(error: &SyncError) -> FailureCategory {
    match error {
        SyncError::Remote(bridge) if bridge.is_transport() => FailureCategory::Network,
        SyncError::Remote(BridgeError::Rejected { status, message }) => {
            let message = message.to_lowercase();
            if *status == 413 || message.contains("too large") || message.contains("size") {
                FailureCategory::Size
            } else if *status == 415 || message.contains("type") {
                FailureCategory::Type
            } else {
                FailureCategory::Server
            }
        }
        _ => FailureCategory::Server,
    }
}
