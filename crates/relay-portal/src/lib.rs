//! Portal adapter: form login, listing and detail pages over a cookie session.
//!
//! Implements the `relay-core` Authenticator / AnnouncementSource ports.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use chrono::{
    format::{Item, StrftimeItems},
    Local,
};
use reqwest::Url;
use tokio::io::AsyncWriteExt;

pub mod parse;

use relay_core::{
    config::PortalConfig,
    domain::{Announcement, Attachment},
    errors::Error,
    ports::{AnnouncementSource, Authenticator, BODY_ERROR, BODY_UNAVAILABLE},
    Result,
};

const USER_AGENT: &str = concat!("announcement-relay/", env!("CARGO_PKG_VERSION"));

/// Unauthenticated portal client; `login` turns it into a [`PortalSession`].
#[derive(Clone, Debug)]
pub struct PortalClient {
    cfg: PortalConfig,
    base: Url,
}

impl PortalClient {
    pub fn new(cfg: PortalConfig) -> Result<Self> {
        let base = Url::parse(&cfg.base_url)
            .map_err(|e| Error::Config(format!("PORTAL_BASE_URL is not a valid URL: {e}")))?;
        if StrftimeItems::new(&cfg.date_format).any(|i| matches!(i, Item::Error)) {
            return Err(Error::Config(format!(
                "PORTAL_DATE_FORMAT is not a valid date format: `{}`",
                cfg.date_format
            )));
        }
        Ok(Self { cfg, base })
    }

    fn build_http(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .timeout(self.cfg.request_timeout)
            .build()
            .map_err(|e| Error::External(format!("http client build failed: {e}")))
    }

    /// Two-step form login: fetch the form tokens, post credentials, check the sentinel.
    pub async fn login(&self) -> Result<PortalSession> {
        let http = self.build_http()?;
        let auth_err = |e: reqwest::Error| Error::Auth(format!("login request failed: {e}"));

        let form_page = http
            .get(&self.cfg.login_url)
            .send()
            .await
            .map_err(auth_err)?
            .text()
            .await
            .map_err(auth_err)?;
        let form = parse::parse_login_form(&form_page)?;

        let resp = http
            .post(&self.cfg.login_url)
            .form(&[
                ("name", self.cfg.username.as_str()),
                ("pass", self.cfg.password.as_str()),
                ("form_build_id", form.form_build_id.as_str()),
                ("form_id", form.form_id.as_str()),
                ("op", self.cfg.login_submit.as_str()),
            ])
            .send()
            .await
            .map_err(auth_err)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Auth(format!("login returned {status}")));
        }
        let body = resp.text().await.map_err(auth_err)?;
        if !body.contains(&self.cfg.login_sentinel) {
            return Err(Error::Auth(
                "login sentinel not found in response, check the credentials".to_string(),
            ));
        }

        tracing::info!(user = %self.cfg.username, "portal login succeeded");
        Ok(PortalSession {
            http,
            cfg: self.cfg.clone(),
            base: self.base.clone(),
        })
    }
}

#[async_trait]
impl Authenticator for PortalClient {
    async fn authenticate(&self) -> Result<Arc<dyn AnnouncementSource>> {
        let session = self.login().await?;
        Ok(Arc::new(session))
    }
}

/// Authenticated portal session. Owns the cookie jar.
pub struct PortalSession {
    http: reqwest::Client,
    cfg: PortalConfig,
    base: Url,
}

impl PortalSession {
    async fn get_page(&self, url: &str) -> Result<String> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("GET {url}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Fetch(format!("GET {url}: {status}")));
        }
        resp.text()
            .await
            .map_err(|e| Error::Fetch(format!("GET {url}: reading body: {e}")))
    }

    fn today(&self) -> String {
        Local::now().format(&self.cfg.date_format).to_string()
    }
}

#[async_trait]
impl AnnouncementSource for PortalSession {
    async fn list_todays_announcements(&self) -> Vec<Announcement> {
        let html = match self.get_page(&self.cfg.listing_url).await {
            Ok(html) => html,
            Err(e) => {
                tracing::error!(error = %e, "failed to fetch the announcement listing");
                return Vec::new();
            }
        };

        let today = self.today();
        match parse::parse_listing(&html, &self.base, &today) {
            Ok(items) => {
                tracing::info!(count = items.len(), %today, "today's announcements listed");
                items
            }
            Err(e) => {
                tracing::warn!(error = %e, "announcement listing not parsed");
                Vec::new()
            }
        }
    }

    async fn fetch_body(&self, link: &str) -> String {
        let html = match self.get_page(link).await {
            Ok(html) => html,
            Err(e) => {
                tracing::error!(%link, error = %e, "failed to fetch announcement body");
                return BODY_ERROR.to_string();
            }
        };

        match parse::parse_body(&html, &self.cfg.signoff_marker) {
            Ok(Some(body)) => body,
            Ok(None) => {
                tracing::warn!(%link, "announcement body region not found");
                BODY_UNAVAILABLE.to_string()
            }
            Err(e) => {
                tracing::error!(%link, error = %e, "failed to parse announcement body");
                BODY_ERROR.to_string()
            }
        }
    }

    async fn fetch_attachments(&self, link: &str) -> Vec<Attachment> {
        let html = match self.get_page(link).await {
            Ok(html) => html,
            Err(e) => {
                tracing::error!(%link, error = %e, "failed to fetch announcement attachments");
                return Vec::new();
            }
        };

        parse::parse_attachments(&html, &self.base).unwrap_or_else(|e| {
            tracing::error!(%link, error = %e, "failed to parse announcement attachments");
            Vec::new()
        })
    }

    async fn download(&self, attachment: &Attachment, dest: &Path) -> Result<()> {
        let url = &attachment.url;
        let mut resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("GET {url}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Fetch(format!("GET {url}: {status}")));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| Error::Fetch(format!("GET {url}: reading body: {e}")))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}
