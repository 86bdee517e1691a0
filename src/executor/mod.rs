//! Fetch executor: retrieve one post, write it, and say how it went.

pub mod catalog;
pub mod converter;
pub mod writer;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::app::{QuireError, Result};
use crate::domain::{ArchiveEntry, PostRecord, Session, SkipReason, Subscription};
use crate::fetcher::{PageFetcher, PageRequest};
use crate::politeness::{Scheduler, Scope};
use crate::retry::{failure_reason, with_retry, RetryPolicy};
use crate::session::SessionManager;

pub use catalog::{Catalog, CatalogEntry};
pub use converter::{render, PostPayload, RenderedPost};
pub use writer::{content_hash, ArchiveWriter};

pub fn post_api_url(source_url: &str, slug: &str) -> String {
    format!("{}/api/v1/posts/{}", source_url, slug)
}

pub struct FetchExecutor {
    fetcher: Arc<dyn PageFetcher>,
    scheduler: Scheduler,
    retry: RetryPolicy,
    writer: ArchiveWriter,
}

impl FetchExecutor {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        scheduler: Scheduler,
        retry: RetryPolicy,
        writer: ArchiveWriter,
    ) -> Self {
        Self {
            fetcher,
            scheduler,
            retry,
            writer,
        }
    }

    /// Fetch `record` and resolve it to an archive entry.
    ///
    /// Per-post problems come back as `Skipped`/`Failed` entries. `Err` is
    /// reserved for failures that end the source or the run: a re-login
    /// that is refused or a session file that cannot be written.
    pub async fn fetch_one(
        &self,
        subscription: &Subscription,
        record: &PostRecord,
        session: &mut Session,
        sessions: &mut SessionManager,
    ) -> Result<ArchiveEntry> {
        if record.is_premium && !session.is_authenticated() {
            debug!("Skipping premium post {} without a session", record.post_id);
            return Ok(ArchiveEntry::skipped(&record.post_id, SkipReason::NoAccess));
        }

        let mut reauthenticated = false;
        let payload = loop {
            self.scheduler.throttle(Scope::Post).await;

            match self.retrieve(record, session).await {
                Ok(payload) => break payload,
                Err(QuireError::SessionExpired(_)) if !reauthenticated => {
                    warn!("Session expired while fetching {}, logging in again", record.post_id);
                    sessions.invalidate(session)?;
                    *session = sessions.get_session(subscription).await?;
                    reauthenticated = true;
                }
                Err(QuireError::SessionExpired(_)) => {
                    return Ok(ArchiveEntry::failed(
                        &record.post_id,
                        "session expired again after re-authentication",
                    ));
                }
                Err(QuireError::ContentAccess(_)) => {
                    return Ok(ArchiveEntry::skipped(&record.post_id, SkipReason::NoAccess));
                }
                Err(e) => {
                    warn!("Failed to fetch {}: {}", record.post_id, e);
                    return Ok(ArchiveEntry::failed(&record.post_id, failure_reason(&e)));
                }
            }
        };

        let rendered = match render(record, &payload) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!("Failed to convert {}: {}", record.post_id, e);
                return Ok(ArchiveEntry::failed(&record.post_id, failure_reason(&e)));
            }
        };

        let source_key = subscription.key();
        let document = match self.writer.write(&source_key, &record.slug, &rendered) {
            Ok(document) => document,
            Err(e) => {
                warn!("Failed to write {}: {}", record.post_id, e);
                return Ok(ArchiveEntry::failed(
                    &record.post_id,
                    format!("document write failed: {}", e),
                ));
            }
        };

        match self.writer.catalog(
            &source_key,
            &subscription.display_name,
            record,
            &payload,
            &document,
        ) {
            Ok(()) => Ok(ArchiveEntry::complete(&record.post_id, document)),
            Err(e) => {
                warn!("Failed to catalog {}: {}", record.post_id, e);
                Ok(ArchiveEntry::failed(
                    &record.post_id,
                    format!("catalog write failed: {}", e),
                ))
            }
        }
    }

    async fn retrieve(&self, record: &PostRecord, session: &Session) -> Result<PostPayload> {
        let url = post_api_url(&record.source_url, &record.slug);
        let token = session.active_token();

        with_retry(&self.retry, &self.scheduler, "post request", || {
            let url = url.as_str();
            async move {
                let request = PageRequest::new(url, self.scheduler.user_agent()).with_token(token);
                let doc = self.fetcher.navigate(request).await?.check(token.is_some())?;
                let payload = PostPayload::parse(&doc.body)?;

                if payload.body().is_none() {
                    if record.is_premium || payload.is_paid() {
                        return Err(QuireError::ContentAccess(record.url.clone()));
                    }
                    return Err(QuireError::Other("post has no body".into()));
                }
                Ok(payload)
            }
        })
        .await
    }
}
