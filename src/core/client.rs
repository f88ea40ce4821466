use serde::de::DeserializeOwned;
use tracing::debug;

use crate::core::{
    activity::{Activity, SubmitActivityRequest, SubmitActivityResponse},
    error::ClientError,
    service::{Instance, NewInstance, Service},
};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8081";

/// The execution service as seen by the poller. Implementations must be safe
/// for concurrent use: several polls may share one client.
#[async_trait::async_trait]
pub trait ExecutionService: Send + Sync {
    async fn list_services(&self) -> Result<Vec<Service>, ClientError>;
    async fn list_instances(&self) -> Result<Vec<Instance>, ClientError>;
    async fn create_instance(&self, instance: NewInstance) -> Result<Instance, ClientError>;
    async fn list_activities(&self) -> Result<Vec<Activity>, ClientError>;
    async fn submit_activity(
        &self,
        request: SubmitActivityRequest,
    ) -> Result<SubmitActivityResponse, ClientError>;
}

#[derive(Clone, Debug)]
pub struct Client {
    pub client: reqwest::Client,
    pub base_url: String,
}

impl Client {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", &self.base_url, path)
    }

    async fn read_json<T: DeserializeOwned>(
        url: String,
        sent: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<T, ClientError> {
        let res = sent.map_err(|e| ClientError::Transport {
            url: url.clone(),
            message: e.to_string(),
        })?;

        let status = res.status();
        let text = res.text().await.map_err(|e| ClientError::Transport {
            url: url.clone(),
            message: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(ClientError::Status {
                url,
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
                body: text,
            });
        }

        serde_json::from_str::<T>(&text).map_err(|e| ClientError::Decode {
            url,
            message: e.to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = self.url(path);
        debug!(%url, "GET");
        let sent = self.client.get(&url).send().await;
        Self::read_json(url, sent).await
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        debug!(%url, "POST");
        let sent = self.client.post(&url).json(body).send().await;
        Self::read_json(url, sent).await
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

#[async_trait::async_trait]
impl ExecutionService for Client {
    async fn list_services(&self) -> Result<Vec<Service>, ClientError> {
        self.get("services").await
    }

    async fn list_instances(&self) -> Result<Vec<Instance>, ClientError> {
        self.get("instances").await
    }

    async fn create_instance(&self, instance: NewInstance) -> Result<Instance, ClientError> {
        self.post("instances", &instance).await
    }

    async fn list_activities(&self) -> Result<Vec<Activity>, ClientError> {
        self.get("activities").await
    }

    async fn submit_activity(
        &self,
        request: SubmitActivityRequest,
    ) -> Result<SubmitActivityResponse, ClientError> {
        self.post("activities", &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        let client = Client::new("http://localhost:8081/");
        assert_eq!(client.url("activities"), "http://localhost:8081/api/activities");
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        // Port 9 (discard) is essentially never listening on loopback.
        let client = Client::new("http://127.0.0.1:9");
        let err = client.list_activities().await.unwrap_err();
        assert!(matches!(err, ClientError::Transport { .. }), "{err:?}");
        assert_eq!(err.status(), None);
    }
}
