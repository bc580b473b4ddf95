//! JSON-over-HTTP fetch functions for configured views.

use std::sync::Arc;

use reqwest::{Client, header::ACCEPT};
use serde_json::Value;
use tracing::debug;

use crate::cache::{FamilyFactory, FetchError, SharedFetcher, fetcher};

use super::error::InfraError;

const FAMILY_PLACEHOLDER: &str = "{id}";

#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
}

impl UpstreamClient {
    pub fn new() -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .build()
            .map_err(|err| InfraError::upstream(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn user_agent() -> &'static str {
        concat!("viewcache/", env!("CARGO_PKG_VERSION"))
    }

    /// Fetcher issuing `GET url` and decoding the body as JSON.
    pub fn json_fetcher(&self, url: String) -> SharedFetcher {
        let client = self.client.clone();
        let url: Arc<str> = url.into();
        fetcher(move || {
            let client = client.clone();
            let url = Arc::clone(&url);
            async move { get_json(&client, &url).await }
        })
    }

    /// Factory substituting each parameter value into `template`'s `{id}`.
    pub fn family_factory(&self, template: String) -> FamilyFactory {
        let upstream = self.clone();
        Arc::new(move |id: &str| upstream.json_fetcher(template.replace(FAMILY_PLACEHOLDER, id)))
    }
}

async fn get_json(client: &Client, url: &str) -> Result<Value, FetchError> {
    let response = client
        .get(url)
        .header(ACCEPT, "application/json")
        .send()
        .await
        .map_err(|err| FetchError::upstream(format!("GET {url}: {err}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::upstream(format!("GET {url} returned {status}")));
    }
    debug!(
        target = "viewcache::infra::upstream",
        url,
        status = status.as_u16(),
        "upstream responded"
    );

    response
        .json::<Value>()
        .await
        .map_err(|err| FetchError::decode(format!("GET {url}: {err}")))
}
