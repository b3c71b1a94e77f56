//! HTML report export.
//!
//! The backend renders a session's cached HTML report into a downloadable
//! document. The report text comes from
//! [`SessionCoordinator::html_report`](crate::session::SessionCoordinator::html_report).

use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use tracing::info;
use url::Url;

use crate::config::BackendConfig;
use crate::error::{Error, Result};

/// File name used when the backend does not suggest one.
pub const DEFAULT_REPORT_FILENAME: &str = "report.html";

/// A rendered report ready to be written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlReport {
    pub filename: String,
    pub body: Vec<u8>,
}

/// Client for the session report endpoints.
///
/// # Example
///
/// ```rust,no_run
/// use data_agent_client::report::ReportClient;
///
/// # async fn example() -> Result<(), data_agent_client::Error> {
/// let reports = ReportClient::new("http://localhost:8065")?;
/// let report = reports.download_html("session-1", "<h1>Sales</h1>").await?;
/// std::fs::write(&report.filename, &report.body).ok();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ReportClient {
    base_url: Url,
    http: reqwest::Client,
}

impl ReportClient {
    pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
        let base_url = Url::parse(base_url.as_ref())?;
        Ok(Self {
            base_url,
            http: reqwest::Client::new(),
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self {
            base_url: Url::parse(&config.base_url)?,
            http,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// URL of the HTML export for `session_id`.
    pub fn html_report_url(&self, session_id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::Validation(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "sessions", session_id, "reports", "html"]);
        Ok(url)
    }

    /// Render `content` into a downloadable HTML document.
    pub async fn download_html(&self, session_id: &str, content: &str) -> Result<HtmlReport> {
        if content.is_empty() {
            return Err(Error::Validation("report content must not be empty".into()));
        }

        let response = self
            .http
            .post(self.html_report_url(session_id)?)
            .header(CONTENT_TYPE, "text/plain;charset=utf-8")
            .body(content.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".into());
            return Err(Error::from_status(status.as_u16(), message));
        }

        let filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(disposition_filename)
            .unwrap_or_else(|| DEFAULT_REPORT_FILENAME.to_string());
        let body = response.bytes().await?.to_vec();

        info!(
            name: "report.downloaded",
            session_id,
            filename = %filename,
            bytes = body.len(),
            "HTML report downloaded"
        );
        Ok(HtmlReport { filename, body })
    }
}

/// The `filename` parameter of a `Content-Disposition` header.
fn disposition_filename(header: &str) -> Option<String> {
    let (_, rest) = header.split_once("filename=")?;
    let rest = rest.strip_prefix('"').unwrap_or(rest);
    let name = rest.split([';', '"']).next()?.trim();
    (!name.is_empty()).then(|| name.to_string())
}
