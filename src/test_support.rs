//! Scripted in-memory transport for exercising the engine without a network.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::app::{QuireError, Result};
use crate::domain::{StoredCookie, TokenBlob, TokenIssuer};
use crate::fetcher::{Document, PageFetcher, PageRequest};
use crate::session::Credentials;

pub const SESSION_COOKIE: &str = "substack.sid";

#[derive(Debug, Clone)]
pub enum Reply {
    Ok(String),
    Status(u16),
    /// Connection-level failure.
    Timeout,
    /// Full body for a valid session, `teaser` for anonymous readers,
    /// 401 for a token the fake no longer accepts.
    Premium { body: String, teaser: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginReply {
    Success,
    Reject,
    Unavailable,
}

#[derive(Default)]
struct FakeState {
    routes: HashMap<String, VecDeque<Reply>>,
    logins: VecDeque<LoginReply>,
    valid_tokens: HashSet<String>,
    issued: u32,
    login_attempts: u32,
    navigations: Vec<(String, Option<String>)>,
    expire_at: HashSet<String>,
    cancel_at: HashMap<String, Arc<AtomicBool>>,
}

#[derive(Default)]
pub struct FakeFetcher {
    state: Mutex<FakeState>,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// Script the replies for `url`; the last reply repeats.
    pub fn route(&self, url: &str, replies: Vec<Reply>) {
        self.with_state(|s| {
            s.routes.insert(url.to_string(), replies.into());
        });
    }

    pub fn script_logins(&self, replies: Vec<LoginReply>) {
        self.with_state(|s| s.logins = replies.into());
    }

    /// Treat `sid` as a live session cookie value.
    pub fn accept_token(&self, sid: &str) {
        self.with_state(|s| {
            s.valid_tokens.insert(sid.to_string());
        });
    }

    /// The first authenticated request to `url` revokes every live token.
    pub fn expire_sessions_at(&self, url: &str) {
        self.with_state(|s| {
            s.expire_at.insert(url.to_string());
        });
    }

    /// Raise `flag` when `url` is requested.
    pub fn cancel_at(&self, url: &str, flag: Arc<AtomicBool>) {
        self.with_state(|s| {
            s.cancel_at.insert(url.to_string(), flag);
        });
    }

    pub fn login_attempts(&self) -> u32 {
        self.with_state(|s| s.login_attempts)
    }

    pub fn navigations(&self) -> Vec<String> {
        self.with_state(|s| s.navigations.iter().map(|(u, _)| u.clone()).collect())
    }

    pub fn requests_to(&self, needle: &str) -> usize {
        self.with_state(|s| s.navigations.iter().filter(|(u, _)| u.contains(needle)).count())
    }

    /// Cookie header sent with each request to `url`, in order.
    pub fn cookies_sent_to(&self, url: &str) -> Vec<Option<String>> {
        self.with_state(|s| {
            s.navigations
                .iter()
                .filter(|(u, _)| u == url)
                .map(|(_, c)| c.clone())
                .collect()
        })
    }
}

fn session_id(token: Option<&TokenBlob>) -> Option<String> {
    let header = token?.cookie_header()?;
    header.split("; ").find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

pub fn token_for(sid: &str, issuer: TokenIssuer) -> TokenBlob {
    TokenBlob::cookies(
        issuer,
        vec![StoredCookie {
            name: SESSION_COOKIE.into(),
            value: sid.into(),
            domain: None,
        }],
    )
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn navigate(&self, request: PageRequest<'_>) -> Result<Document> {
        let url = request.url.to_string();
        let sid = session_id(request.token);

        let reply = self.with_state(|s| {
            s.navigations.push((url.clone(), request.token.and_then(|t| t.cookie_header())));
            if let Some(flag) = s.cancel_at.get(&url) {
                flag.store(true, Ordering::SeqCst);
            }
            if sid.is_some() && s.expire_at.remove(&url) {
                s.valid_tokens.clear();
            }
            let sid_valid = sid.as_ref().map(|id| s.valid_tokens.contains(id));

            let reply = match s.routes.get_mut(&url) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            };
            (reply, sid_valid)
        });

        let (status, body) = match reply {
            (None, _) => (404, String::new()),
            (Some(Reply::Ok(body)), _) => (200, body),
            (Some(Reply::Status(status)), _) => (status, String::new()),
            (Some(Reply::Timeout), _) => {
                return Err(QuireError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("timed out fetching {}", url),
                )))
            }
            (Some(Reply::Premium { body, teaser }), valid) => match valid {
                Some(true) => (200, body),
                Some(false) => (401, String::new()),
                None => (200, teaser),
            },
        };

        Ok(Document { url, status, body })
    }

    async fn authenticate(
        &self,
        source_url: &str,
        _credentials: &Credentials,
        _user_agent: &str,
    ) -> Result<TokenBlob> {
        let reply = self.with_state(|s| {
            s.login_attempts += 1;
            s.logins.pop_front().unwrap_or(LoginReply::Success)
        });

        match reply {
            LoginReply::Success => {
                let sid = self.with_state(|s| {
                    s.issued += 1;
                    let sid = format!("login-{}", s.issued);
                    s.valid_tokens.insert(sid.clone());
                    sid
                });
                Ok(token_for(&sid, TokenIssuer::Login))
            }
            LoginReply::Reject => Err(QuireError::Authentication {
                source_url: source_url.to_string(),
                reason: "Invalid password".into(),
            }),
            LoginReply::Unavailable => Err(QuireError::Status {
                url: "https://substack.com/api/v1/login".into(),
                status: 503,
            }),
        }
    }
}

/// A listed post for building fake archive pages.
#[derive(Debug, Clone)]
pub struct FakePost {
    pub slug: String,
    pub date: DateTime<Utc>,
    pub premium: bool,
}

impl FakePost {
    pub fn new(slug: &str, date: &str, premium: bool) -> Self {
        let date = DateTime::parse_from_rfc3339(&format!("{}T09:00:00Z", date))
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|e| panic!("bad fixture date {}: {}", date, e));
        Self {
            slug: slug.to_string(),
            date,
            premium,
        }
    }

    pub fn url(&self, source: &str) -> String {
        format!("{}/p/{}", source, self.slug)
    }

    pub fn post_id(&self) -> String {
        format!("p/{}", self.slug)
    }
}

pub fn archive_page(source: &str, posts: &[FakePost]) -> String {
    let items: Vec<_> = posts
        .iter()
        .map(|p| {
            json!({
                "slug": p.slug,
                "title": format!("Post {}", p.slug),
                "post_date": p.date.to_rfc3339(),
                "audience": if p.premium { "only_paid" } else { "everyone" },
                "canonical_url": p.url(source),
            })
        })
        .collect();
    serde_json::Value::Array(items).to_string()
}

pub fn post_body(post: &FakePost) -> String {
    json!({
        "title": format!("Post {}", post.slug),
        "subtitle": "A subtitle",
        "post_date": post.date.to_rfc3339(),
        "body_html": format!("<p>Body of <strong>{}</strong></p>", post.slug),
        "reaction_count": 7,
    })
    .to_string()
}

pub fn post_teaser(post: &FakePost) -> String {
    json!({
        "title": format!("Post {}", post.slug),
        "post_date": post.date.to_rfc3339(),
        "body_html": null,
    })
    .to_string()
}

pub fn post_api_url(source: &str, slug: &str) -> String {
    format!("{}/api/v1/posts/{}", source, slug)
}

/// Route a whole publication: archive pages of `page_size`, and each post.
pub fn publish(fake: &FakeFetcher, source: &str, posts: &[FakePost], page_size: usize) {
    let mut offset = 0;
    for chunk in posts.chunks(page_size.max(1)) {
        fake.route(
            &crate::discovery::archive_url(source, offset, page_size),
            vec![Reply::Ok(archive_page(source, chunk))],
        );
        offset += chunk.len();
    }
    fake.route(
        &crate::discovery::archive_url(source, offset, page_size),
        vec![Reply::Ok("[]".into())],
    );

    for post in posts {
        let reply = if post.premium {
            Reply::Premium {
                body: post_body(post),
                teaser: post_teaser(post),
            }
        } else {
            Reply::Ok(post_body(post))
        };
        fake.route(&post_api_url(source, &post.slug), vec![reply]);
    }
}
