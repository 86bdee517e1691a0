use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as LaunchConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::Page;
use futures::StreamExt;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tokio::sync::OnceCell;
use url::Url;

use crate::app::{QuireError, Result};
use crate::browser::config::BrowserConfig;
use crate::browser::script;
use crate::domain::{publication_name, StoredCookie, TokenBlob, TokenIssuer, TokenPayload};
use crate::fetcher::{Document, PageFetcher, PageRequest};
use crate::politeness::Scheduler;
use crate::session::Credentials;

const SESSION_COOKIE: &str = "substack.sid";

fn browser_err(context: &str) -> impl Fn(chromiumoxide::error::CdpError) -> QuireError + '_ {
    move |e| QuireError::Browser(format!("{}: {}", context, e))
}

#[derive(Debug, Deserialize)]
struct InPageResponse {
    status: u16,
    body: String,
}

/// Chrome-driven transport using chromiumoxide.
///
/// The browser is launched on first use and shared by every request.
pub struct ChromeFetcher {
    config: BrowserConfig,
    scheduler: Scheduler,
    browser: OnceCell<Arc<Browser>>,
}

impl ChromeFetcher {
    pub fn new(config: BrowserConfig, scheduler: Scheduler) -> Self {
        Self {
            config,
            scheduler,
            browser: OnceCell::new(),
        }
    }

    async fn browser(&self) -> Result<Arc<Browser>> {
        let browser = self
            .browser
            .get_or_try_init(|| async { self.launch().await.map(Arc::new) })
            .await?;
        Ok(browser.clone())
    }

    async fn launch(&self) -> Result<Browser> {
        let mut builder = LaunchConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-software-rasterizer")
            .request_timeout(self.config.timeout());

        if !self.config.headless {
            builder = builder.with_head();
        }
        if let Some(ref profile) = self.config.profile_dir {
            builder = builder.user_data_dir(profile);
        }
        if let Some(ref chrome) = self.config.chrome_path {
            builder = builder.chrome_executable(chrome);
        }

        let launch_config = builder
            .build()
            .map_err(|e| QuireError::Browser(format!("Failed to build browser config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(launch_config).await.map_err(|e| {
            QuireError::Browser(format!(
                "Failed to launch browser: {}. Is Chrome or Chromium installed and in PATH?",
                e
            ))
        })?;

        tokio::spawn(async move { while let Some(_event) = handler.next().await {} });

        tracing::debug!(headless = self.config.headless, "Browser launched");
        Ok(browser)
    }

    async fn open(&self, url: &str, user_agent: &str) -> Result<Page> {
        let browser = self.browser().await?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(browser_err("Failed to create page"))?;
        page.set_user_agent(user_agent)
            .await
            .map_err(browser_err("Failed to set user agent"))?;
        if url != "about:blank" {
            page.goto(url).await.map_err(browser_err("Navigation failed"))?;
            page.wait_for_navigation()
                .await
                .map_err(browser_err("Navigation failed"))?;
        }
        Ok(page)
    }

    async fn evaluate<T: serde::de::DeserializeOwned>(&self, page: &Page, expression: String) -> Result<T> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(QuireError::Browser)?;

        page.evaluate_expression(params)
            .await
            .map_err(browser_err("Script execution failed"))?
            .into_value()
            .map_err(|e| QuireError::Browser(format!("Failed to parse result: {:?}", e)))
    }

    async fn sign_in(&self, page: &Page, credentials: &Credentials) -> Result<()> {
        page.find_element(script::PASSWORD_OPTION)
            .await
            .map_err(browser_err("Sign-in form not found"))?
            .click()
            .await
            .map_err(browser_err("Sign-in form not clickable"))?;

        page.find_element(script::EMAIL_INPUT)
            .await
            .map_err(browser_err("Email field not found"))?
            .click()
            .await
            .map_err(browser_err("Email field not clickable"))?
            .type_str(&credentials.email)
            .await
            .map_err(browser_err("Failed to type email"))?;

        page.find_element(script::PASSWORD_INPUT)
            .await
            .map_err(browser_err("Password field not found"))?
            .click()
            .await
            .map_err(browser_err("Password field not clickable"))?
            .type_str(credentials.password.expose_secret())
            .await
            .map_err(browser_err("Failed to type password"))?;

        page.find_element(script::SUBMIT_BUTTON)
            .await
            .map_err(browser_err("Submit button not found"))?
            .click()
            .await
            .map_err(browser_err("Submit button not clickable"))?;

        page.wait_for_navigation()
            .await
            .map_err(browser_err("Login redirect failed"))?;
        self.scheduler.settle(self.config.wait_after_login()).await;
        Ok(())
    }
}

fn origin_of(url: &str) -> Result<String> {
    Ok(Url::parse(url)?.origin().ascii_serialization())
}

fn cookie_params(cookies: &[StoredCookie], origin: &str) -> Result<Vec<CookieParam>> {
    cookies
        .iter()
        .map(|c| {
            let mut builder = CookieParam::builder().name(&c.name).value(&c.value);
            builder = match c.domain {
                Some(ref domain) => builder.domain(domain),
                None => builder.url(origin),
            };
            builder.build().map_err(QuireError::Browser)
        })
        .collect()
}

#[async_trait]
impl PageFetcher for ChromeFetcher {
    async fn navigate(&self, request: PageRequest<'_>) -> Result<Document> {
        let origin = origin_of(request.url)?;
        let page = self.open("about:blank", request.user_agent).await?;

        if let Some(TokenPayload::Cookies { cookies }) = request.token.map(|t| &t.payload) {
            page.set_cookies(cookie_params(cookies, &origin)?)
                .await
                .map_err(browser_err("Failed to set cookies"))?;
        }

        page.goto(origin.as_str())
            .await
            .map_err(browser_err("Navigation failed"))?;
        page.wait_for_navigation()
            .await
            .map_err(browser_err("Navigation failed"))?;

        let result: Result<InPageResponse> = self.evaluate(&page, script::fetch_script(request.url)).await;
        let _ = page.close().await;
        let response = result?;

        tracing::debug!(status = response.status, url = request.url, "Fetched in browser");
        Ok(Document {
            url: request.url.to_string(),
            status: response.status,
            body: response.body,
        })
    }

    async fn authenticate(
        &self,
        source_url: &str,
        credentials: &Credentials,
        user_agent: &str,
    ) -> Result<TokenBlob> {
        let page = self
            .open(&script::sign_in_url(&publication_name(source_url)), user_agent)
            .await?;

        let outcome = async {
            self.sign_in(&page, credentials).await?;

            let message: String = self.evaluate(&page, script::login_error_script()).await?;
            if !message.is_empty() {
                return Err(QuireError::Authentication {
                    source_url: source_url.to_string(),
                    reason: message,
                });
            }

            let cookies: Vec<StoredCookie> = page
                .get_cookies()
                .await
                .map_err(browser_err("Failed to read cookies"))?
                .into_iter()
                .map(|c| StoredCookie {
                    name: c.name,
                    value: c.value,
                    domain: Some(c.domain.trim_start_matches('.').to_string()),
                })
                .collect();

            if !cookies.iter().any(|c| c.name == SESSION_COOKIE) {
                return Err(QuireError::Authentication {
                    source_url: source_url.to_string(),
                    reason: "no session cookie after sign-in".into(),
                });
            }
            Ok(TokenBlob::cookies(TokenIssuer::Login, cookies))
        }
        .await;

        let _ = page.close().await;
        outcome
    }
}
