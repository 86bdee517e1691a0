//! Headless Chrome transport.
//!
//! Drives a real browser through chromiumoxide for sources that only serve
//! content to something that looks like one, and for reusing an operator's
//! already logged-in browser profile.
//!
//! # Architecture
//!
//! ```text
//! PageRequest → ChromeFetcher → in-page fetch() → Document
//! ```
//!
//! Requests are made with `fetch` from a page on the source's origin, so the
//! page's cookies (imported or from the profile) ride along.

mod chrome;
mod config;
mod script;

pub use chrome::ChromeFetcher;
pub use config::BrowserConfig;
