use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{redirect, Client};
use tracing::{debug, info};
use url::Url;

use crate::config::FetchConfig;
use crate::error::{ForgeError, Result};

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml";
const MAX_REDIRECTS: usize = 10;

/// Supplies raw page markup for a URL.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Plain HTTP GET with redirects followed. No script execution.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    USER_AGENT,
                    config
                        .user_agent
                        .parse()
                        .map_err(|_| ForgeError::Config("user_agent is not a valid header value".to_string()))?,
                );
                headers.insert(ACCEPT, reqwest::header::HeaderValue::from_static(ACCEPT_HTML));
                headers
            })
            .build()
            .map_err(|e| ForgeError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

/// Parse `url`, accepting only http and https.
pub fn check_page_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url)?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ForgeError::Input(
            "Only HTTP and HTTPS URLs are supported".to_string(),
        ));
    }
    Ok(parsed)
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let parsed = check_page_url(url)?;

        debug!(url = %parsed, "Fetching page");
        let response = self.client.get(parsed).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ForgeError::Network(format!("HTTP {} for {}", status, url)));
        }

        let body = response.text().await?;
        info!(url = %url, bytes = body.len(), "Fetched page");
        Ok(body)
    }
}
