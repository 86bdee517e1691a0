//! Content discovery: enumerate a source's posts without fetching them.
//!
//! Pages of the archive API are pulled lazily as the stream is polled. The
//! listing is assumed to be newest first, so enumeration stops at the first
//! post older than the requested lower bound. A listing request refused
//! because the session expired ends enumeration at once; the caller decides
//! whether to log in again.

mod listing;

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use tracing::{debug, warn};

use crate::app::{QuireError, Result};
use crate::domain::{PostRecord, Session, Subscription};
use crate::fetcher::{PageFetcher, PageRequest};
use crate::politeness::{Scheduler, Scope};
use crate::retry::{with_retry, RetryPolicy};

pub use listing::{is_paid_audience, parse_archive_page, parse_feed};

/// Consecutive failed pages after which enumeration gives up.
pub const MAX_CONSECUTIVE_PAGE_FAILURES: usize = 3;

pub fn archive_url(source_url: &str, offset: usize, limit: usize) -> String {
    format!(
        "{}/api/v1/archive?sort=new&search=&offset={}&limit={}",
        source_url, offset, limit
    )
}

pub fn feed_url(source_url: &str) -> String {
    format!("{}/feed", source_url)
}

/// Everything one enumeration produced.
#[derive(Debug, Default)]
pub struct Discovered {
    pub posts: Vec<PostRecord>,
    pub failed_pages: usize,
    /// The service rejected the session token part way through.
    pub session_expired: bool,
}

pub struct Discovery {
    fetcher: Arc<dyn PageFetcher>,
    scheduler: Scheduler,
    retry: RetryPolicy,
    page_size: usize,
    excluded_sections: Vec<String>,
}

struct Cursor {
    page: usize,
    offset: usize,
    consecutive_failures: usize,
    buffer: VecDeque<PostRecord>,
    done: bool,
}

enum PageOutcome {
    Posts {
        records: Vec<PostRecord>,
        raw_count: usize,
    },
    Failed(QuireError),
}

impl Discovery {
    pub fn new(fetcher: Arc<dyn PageFetcher>, scheduler: Scheduler, retry: RetryPolicy) -> Self {
        Self {
            fetcher,
            scheduler,
            retry,
            page_size: 12,
            excluded_sections: vec!["about".into(), "archive".into(), "podcast".into()],
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_excluded_sections(mut self, sections: Vec<String>) -> Self {
        self.excluded_sections = sections;
        self
    }

    /// Lazily enumerate posts of `subscription` published at or after `since`.
    ///
    /// An `Err` item reports one listing page that could not be read; the
    /// stream carries on with the next page. [`QuireError::SessionExpired`]
    /// is the exception: it is the last item, and the token is not sent again.
    pub fn discover<'a>(
        &'a self,
        subscription: &'a Subscription,
        session: &'a Session,
        since: Option<DateTime<Utc>>,
    ) -> impl Stream<Item = Result<PostRecord>> + 'a {
        let cursor = Cursor {
            page: 0,
            offset: 0,
            consecutive_failures: 0,
            buffer: VecDeque::new(),
            done: false,
        };

        stream::unfold(cursor, move |mut cursor| async move {
            loop {
                if let Some(record) = cursor.buffer.pop_front() {
                    return Some((Ok(record), cursor));
                }
                if cursor.done {
                    return None;
                }

                let page = cursor.page;
                if page > 0 {
                    self.scheduler.throttle(Scope::Post).await;
                }

                match self.fetch_page(subscription, session, cursor.offset).await {
                    PageOutcome::Failed(e @ QuireError::SessionExpired(_)) => {
                        cursor.done = true;
                        return Some((Err(e), cursor));
                    }
                    PageOutcome::Posts { records, raw_count } => {
                        cursor.consecutive_failures = 0;
                        cursor.page += 1;
                        cursor.offset += raw_count;
                        if raw_count < self.page_size {
                            cursor.done = true;
                        }
                        self.accept(&mut cursor, records, since);
                    }
                    PageOutcome::Failed(e) if page == 0 => {
                        warn!(
                            "Archive listing for {} unavailable ({}), falling back to feed",
                            subscription.source_url, e
                        );
                        cursor.done = true;
                        match self.fetch_feed(subscription, session).await {
                            Ok(records) => self.accept(&mut cursor, records, since),
                            Err(e @ QuireError::SessionExpired(_)) => return Some((Err(e), cursor)),
                            Err(e) => {
                                let err = QuireError::Discovery {
                                    source_url: subscription.source_url.clone(),
                                    page,
                                    reason: e.to_string(),
                                };
                                return Some((Err(err), cursor));
                            }
                        }
                    }
                    PageOutcome::Failed(e) => {
                        cursor.consecutive_failures += 1;
                        cursor.page += 1;
                        cursor.offset += self.page_size;
                        if cursor.consecutive_failures >= MAX_CONSECUTIVE_PAGE_FAILURES {
                            warn!(
                                "Stopping discovery for {} after {} failed pages",
                                subscription.source_url, cursor.consecutive_failures
                            );
                            cursor.done = true;
                        }
                        let err = QuireError::Discovery {
                            source_url: subscription.source_url.clone(),
                            page,
                            reason: e.to_string(),
                        };
                        return Some((Err(err), cursor));
                    }
                }
            }
        })
    }

    /// Collect the whole enumeration, newest first, ties by post id.
    pub async fn discover_all(
        &self,
        subscription: &Subscription,
        session: &Session,
        since: Option<DateTime<Utc>>,
    ) -> Discovered {
        let mut discovered = Discovered::default();
        let mut stream = Box::pin(self.discover(subscription, session, since));

        while let Some(item) = stream.next().await {
            match item {
                Ok(record) => discovered.posts.push(record),
                Err(QuireError::SessionExpired(url)) => {
                    warn!("Session rejected while listing {}", url);
                    discovered.session_expired = true;
                }
                Err(e) => {
                    warn!("{}", e);
                    discovered.failed_pages += 1;
                }
            }
        }

        sort_posts(&mut discovered.posts);
        discovered
    }

    /// Sort a page, drop excluded sections, stop at the first post before `since`.
    fn accept(&self, cursor: &mut Cursor, mut records: Vec<PostRecord>, since: Option<DateTime<Utc>>) {
        sort_posts(&mut records);
        for record in records {
            if since.is_some_and(|since| record.publish_date < since) {
                debug!("Reached {} older than the lower bound, stopping", record.post_id);
                cursor.done = true;
                break;
            }
            if self
                .excluded_sections
                .iter()
                .any(|section| section == record.section())
            {
                continue;
            }
            cursor.buffer.push_back(record);
        }
    }

    async fn fetch_page(&self, subscription: &Subscription, session: &Session, offset: usize) -> PageOutcome {
        let url = archive_url(&subscription.source_url, offset, self.page_size);
        let body = match self.get(&url, session).await {
            Ok(body) => body,
            Err(e) => return PageOutcome::Failed(e),
        };

        match parse_archive_page(&subscription.source_url, &body) {
            Ok((records, raw_count)) => PageOutcome::Posts { records, raw_count },
            Err(e) => PageOutcome::Failed(e),
        }
    }

    async fn fetch_feed(&self, subscription: &Subscription, session: &Session) -> Result<Vec<PostRecord>> {
        let body = self.get(&feed_url(&subscription.source_url), session).await?;
        parse_feed(&subscription.source_url, body.as_bytes())
    }

    async fn get(&self, url: &str, session: &Session) -> Result<String> {
        let token = session.active_token();
        with_retry(&self.retry, &self.scheduler, "listing request", || async move {
            let request = PageRequest::new(url, self.scheduler.user_agent()).with_token(token);
            let doc = self.fetcher.navigate(request).await?;
            Ok(doc.check(token.is_some())?.body)
        })
        .await
    }
}

/// Deterministic order: publish date descending, then post id ascending.
pub fn sort_posts(posts: &mut [PostRecord]) {
    posts.sort_by(|a, b| {
        b.publish_date
            .cmp(&a.publish_date)
            .then_with(|| a.post_id.cmp(&b.post_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::TimeZone;

    use crate::config::PolitenessConfig;
    use crate::domain::TokenIssuer;
    use crate::test_support::{archive_page, publish, token_for, FakeFetcher, FakePost, Reply};

    const SOURCE: &str = "https://example.substack.com";

    fn discovery(fake: &Arc<FakeFetcher>, page_size: usize) -> Discovery {
        let scheduler = Scheduler::new(&PolitenessConfig::immediate(), Duration::ZERO);
        let retry = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            jitter_range: Duration::ZERO,
        };
        Discovery::new(fake.clone(), scheduler, retry).with_page_size(page_size)
    }

    fn subscription() -> Subscription {
        Subscription::new(SOURCE, None, false).unwrap()
    }

    fn posts() -> Vec<FakePost> {
        vec![
            FakePost::new("e", "2024-05-01", false),
            FakePost::new("d", "2024-04-01", true),
            FakePost::new("c", "2024-03-01", false),
            FakePost::new("b", "2023-12-01", false),
            FakePost::new("a", "2023-11-01", false),
        ]
    }

    fn ids(posts: &[PostRecord]) -> Vec<&str> {
        posts.iter().map(|p| p.post_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_paginates_until_exhausted() {
        let fake = FakeFetcher::new();
        publish(&fake, SOURCE, &posts(), 2);
        let engine = discovery(&fake, 2);
        let sub = subscription();
        let session = Session::anonymous(SOURCE);

        let found = engine.discover_all(&sub, &session, None).await;
        assert_eq!(ids(&found.posts), vec!["p/e", "p/d", "p/c", "p/b", "p/a"]);
        assert_eq!(found.failed_pages, 0);
        assert!(found.posts[1].is_premium);
        // Three pages; the last is short so no empty page is requested.
        assert_eq!(fake.requests_to("/api/v1/archive"), 3);
    }

    #[tokio::test]
    async fn test_early_stop_at_lower_bound() {
        let fake = FakeFetcher::new();
        publish(&fake, SOURCE, &posts(), 2);
        let engine = discovery(&fake, 2);
        let sub = subscription();
        let session = Session::anonymous(SOURCE);

        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let found = engine.discover_all(&sub, &session, Some(since)).await;

        assert_eq!(ids(&found.posts), vec!["p/e", "p/d", "p/c"]);
        // Page two holds the first older post; page three is never read.
        assert_eq!(fake.requests_to("/api/v1/archive"), 2);
    }

    #[tokio::test]
    async fn test_stream_is_lazy() {
        let fake = FakeFetcher::new();
        publish(&fake, SOURCE, &posts(), 2);
        let engine = discovery(&fake, 2);
        let sub = subscription();
        let session = Session::anonymous(SOURCE);

        let mut stream = Box::pin(engine.discover(&sub, &session, None));
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.post_id, "p/e");
        assert_eq!(fake.requests_to("/api/v1/archive"), 1);
    }

    #[tokio::test]
    async fn test_bad_page_skipped() {
        let fake = FakeFetcher::new();
        let all = posts();
        fake.route(
            &archive_url(SOURCE, 0, 2),
            vec![Reply::Ok(archive_page(SOURCE, &all[0..2]))],
        );
        fake.route(&archive_url(SOURCE, 2, 2), vec![Reply::Ok("not json".into())]);
        fake.route(
            &archive_url(SOURCE, 4, 2),
            vec![Reply::Ok(archive_page(SOURCE, &all[4..5]))],
        );
        let engine = discovery(&fake, 2);
        let sub = subscription();
        let session = Session::anonymous(SOURCE);

        let found = engine.discover_all(&sub, &session, None).await;
        assert_eq!(ids(&found.posts), vec!["p/e", "p/d", "p/a"]);
        assert_eq!(found.failed_pages, 1);
    }

    #[tokio::test]
    async fn test_page_error_item_is_discovery_error() {
        let fake = FakeFetcher::new();
        let all = posts();
        fake.route(
            &archive_url(SOURCE, 0, 2),
            vec![Reply::Ok(archive_page(SOURCE, &all[0..2]))],
        );
        fake.route(&archive_url(SOURCE, 2, 2), vec![Reply::Status(404)]);
        let engine = discovery(&fake, 2);
        let sub = subscription();
        let session = Session::anonymous(SOURCE);

        let items: Vec<_> = engine.discover(&sub, &session, None).collect().await;
        assert!(items[0].is_ok());
        assert!(matches!(items[2], Err(QuireError::Discovery { page: 1, .. })));
    }

    #[tokio::test]
    async fn test_gives_up_after_consecutive_failures() {
        let fake = FakeFetcher::new();
        let all = posts();
        fake.route(
            &archive_url(SOURCE, 0, 2),
            vec![Reply::Ok(archive_page(SOURCE, &all[0..2]))],
        );
        // Every later page is missing (404).
        let engine = discovery(&fake, 2);
        let sub = subscription();
        let session = Session::anonymous(SOURCE);

        let found = engine.discover_all(&sub, &session, None).await;
        assert_eq!(found.posts.len(), 2);
        assert_eq!(found.failed_pages, MAX_CONSECUTIVE_PAGE_FAILURES);
    }

    #[tokio::test]
    async fn test_transient_page_failure_retried() {
        let fake = FakeFetcher::new();
        let all = posts();
        fake.route(
            &archive_url(SOURCE, 0, 12),
            vec![Reply::Status(503), Reply::Ok(archive_page(SOURCE, &all))],
        );
        let engine = discovery(&fake, 12);
        let sub = subscription();
        let session = Session::anonymous(SOURCE);

        let found = engine.discover_all(&sub, &session, None).await;
        assert_eq!(found.posts.len(), 5);
        assert_eq!(fake.requests_to("/api/v1/archive"), 2);
    }

    #[tokio::test]
    async fn test_feed_fallback() {
        let fake = FakeFetcher::new();
        fake.route(
            &feed_url(SOURCE),
            vec![Reply::Ok(
                r#"<?xml version="1.0"?><rss version="2.0"><channel><title>x</title>
                <item><title>Only</title><link>https://example.substack.com/p/only</link>
                <pubDate>Mon, 01 Jan 2024 09:00:00 GMT</pubDate></item>
                <item><title>About</title><link>https://example.substack.com/about</link>
                <pubDate>Mon, 01 Jan 2024 09:00:00 GMT</pubDate></item>
                </channel></rss>"#
                    .into(),
            )],
        );
        let engine = discovery(&fake, 12);
        let sub = subscription();
        let session = Session::anonymous(SOURCE);

        let found = engine.discover_all(&sub, &session, None).await;
        assert_eq!(ids(&found.posts), vec!["p/only"]);
        assert_eq!(found.failed_pages, 0);
    }

    #[tokio::test]
    async fn test_expired_session_ends_enumeration() {
        let fake = FakeFetcher::new();
        fake.route(&archive_url(SOURCE, 0, 2), vec![Reply::Status(401)]);
        fake.route(&feed_url(SOURCE), vec![Reply::Ok(String::new())]);
        let engine = discovery(&fake, 2);
        let sub = Subscription::new(SOURCE, None, true).unwrap();
        let session = Session::authenticated(SOURCE, token_for("stale", TokenIssuer::Login));

        let items: Vec<_> = engine.discover(&sub, &session, None).collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(QuireError::SessionExpired(_))));

        let found = engine.discover_all(&sub, &session, None).await;
        assert!(found.session_expired);
        assert_eq!(found.failed_pages, 0);
        // Neither the feed nor a second archive attempt sees the token.
        assert_eq!(fake.requests_to("/feed"), 0);
        assert_eq!(fake.requests_to("/api/v1/archive"), 2);
    }

    #[test]
    fn test_sort_ties_by_post_id() {
        let fake = FakePost::new("x", "2024-01-01", false);
        let record = |id: &str| PostRecord {
            post_id: id.into(),
            source_url: SOURCE.into(),
            url: format!("{}/{}", SOURCE, id),
            slug: id.into(),
            publish_date: fake.date,
            is_premium: false,
            title: String::new(),
        };
        let mut posts = vec![record("p/b"), record("p/a")];
        sort_posts(&mut posts);
        assert_eq!(ids(&posts), vec!["p/a", "p/b"]);
    }
}
