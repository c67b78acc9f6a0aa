//! Transport seam for the two backend calls
//!
//! The engine only talks to the backend through [`EventApi`], so tests and
//! alternative transports can stand in for the HTTP implementation.

use crate::{Event, EventDetails, EventId, Result};
use futures_util::future::BoxFuture;

/// Source of the event catalog and per-event details
pub trait EventApi: Send + Sync {
    /// Full catalog snapshot (`GET /api/get-all-events`)
    fn fetch_all_events(&self) -> BoxFuture<'_, Result<Vec<Event>>>;

    /// Detail payload for one event (`GET /api/get-event-details/{id}`)
    fn fetch_event_details<'a>(&'a self, id: &'a EventId) -> BoxFuture<'a, Result<EventDetails>>;
}

#[cfg(feature = "http")]
pub use http::{DEFAULT_BASE_URL, HttpEventApi};

#[cfg(feature = "http")]
mod http {
    use super::*;
    use crate::EngineError;
    use reqwest::{StatusCode, Url};

    /// Default backend location used by the command-line front end
    pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

    /// HTTP client for the catalog backend
    #[derive(Debug, Clone)]
    pub struct HttpEventApi {
        base_url: Url,
        client: reqwest::Client,
    }

    impl HttpEventApi {
        /// Create a client for the backend rooted at `base_url`
        pub fn new(base_url: &str) -> Result<Self> {
            Self::with_client(base_url, reqwest::Client::new())
        }

        /// Create a client reusing an existing `reqwest::Client`
        pub fn with_client(base_url: &str, client: reqwest::Client) -> Result<Self> {
            let base_url = Url::parse(base_url).map_err(|e| {
                EngineError::InvalidConfig(format!("invalid API base URL {base_url:?}: {e}"))
            })?;
            if base_url.cannot_be_a_base() {
                return Err(EngineError::InvalidConfig(format!(
                    "API base URL {base_url} cannot hold a path"
                )));
            }
            Ok(Self { base_url, client })
        }

        #[inline]
        pub fn base_url(&self) -> &Url {
            &self.base_url
        }

        pub(crate) fn endpoint(&self, segments: &[&str]) -> Url {
            let mut url = self.base_url.clone();
            // Checked in the constructor
            if let Ok(mut path) = url.path_segments_mut() {
                path.pop_if_empty().extend(segments);
            }
            url
        }
    }

    impl EventApi for HttpEventApi {
        fn fetch_all_events(&self) -> BoxFuture<'_, Result<Vec<Event>>> {
            let url = self.endpoint(&["api", "get-all-events"]);
            Box::pin(async move {
                tracing::debug!("GET {}", url);
                let response = self.client.get(url).send().await?.error_for_status()?;
                decode(&response.bytes().await?)
            })
        }

        fn fetch_event_details<'a>(
            &'a self,
            id: &'a EventId,
        ) -> BoxFuture<'a, Result<EventDetails>> {
            let url = self.endpoint(&["api", "get-event-details", &id.to_string()]);
            Box::pin(async move {
                tracing::debug!("GET {}", url);
                let response = self.client.get(url).send().await?;
                if response.status() == StatusCode::NOT_FOUND {
                    return Err(EngineError::NotFound(id.clone()));
                }
                let response = response.error_for_status()?;
                decode(&response.bytes().await?)
            })
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
        serde_json::from_slice(body).map_err(|e| EngineError::MalformedData(e.to_string()))
    }

}
