//! HTTP client for the self-service ops API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{
    AutoDeployRequest, OpsError, SelfServiceOps, ServiceStatus, TriggerTestSuiteRequest,
};

/// Response body of `POST /trigger-test-suite`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerTestSuiteResponse {
    #[serde(default)]
    run_id: Option<String>,
}

/// [`SelfServiceOps`] over HTTP.
#[derive(Debug, Clone)]
pub struct SelfServiceOpsClient {
    client: reqwest::Client,
    base_url: Url,
}

impl SelfServiceOpsClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, OpsError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        let base_url = Url::parse(base_url)
            .map_err(|e| OpsError::InvalidBaseUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(OpsError::InvalidBaseUrl(base_url.to_string()));
        }

        Ok(Self { client, base_url })
    }

    /// Appends `segments` to the base URL, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Result<Url, OpsError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| OpsError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, OpsError> {
        let response = self.client.post(self.url(&[path])?).json(body).send().await?;
        Self::check_status(response).await
    }

    /// Passes 2xx responses through and turns everything else into [`OpsError::Status`].
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, OpsError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(OpsError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Decodes a JSON body, treating an empty body as the default value.
    async fn json_or_default<T: DeserializeOwned + Default>(
        response: reqwest::Response,
    ) -> Result<T, OpsError> {
        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }
        serde_json::from_slice(&bytes).map_err(|e| OpsError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SelfServiceOps for SelfServiceOpsClient {
    #[instrument(skip(self, request), fields(test_suite = %request.image_name, environment = %request.environment))]
    async fn trigger_test_suite(
        &self,
        request: &TriggerTestSuiteRequest,
    ) -> Result<Option<String>, OpsError> {
        let response = self.post("trigger-test-suite", request).await?;
        let body: TriggerTestSuiteResponse = Self::json_or_default(response).await?;
        debug!(run_id = ?body.run_id, "Test suite triggered");
        Ok(body.run_id)
    }

    #[instrument(skip(self, request), fields(service = %request.image_name, environment = %request.environment))]
    async fn auto_deploy_service(&self, request: &AutoDeployRequest) -> Result<(), OpsError> {
        self.post("auto-deploy-service", request).await?;
        debug!(version = %request.version, "Auto-deploy requested");
        Ok(())
    }

    async fn service_status(&self, service: &str) -> Result<Option<ServiceStatus>, OpsError> {
        let response = self
            .client
            .get(self.url(&["status", service])?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = Self::check_status(response).await?;
        response
            .json()
            .await
            .map(Some)
            .map_err(|e| OpsError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_events::UserDetails;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> SelfServiceOpsClient {
        SelfServiceOpsClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    fn trigger_request() -> TriggerTestSuiteRequest {
        TriggerTestSuiteRequest {
            image_name: "smoke".into(),
            environment: "dev".into(),
            cpu: 4096,
            memory: 8192,
            user: UserDetails::system(),
            profile: Some("nightly".into()),
        }
    }

    #[test]
    fn test_url_building_trims_trailing_slash() {
        let client =
            SelfServiceOpsClient::new("http://ops.local/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.url(&["status", "foo"]).unwrap().as_str(),
            "http://ops.local/status/foo"
        );

        let nested =
            SelfServiceOpsClient::new("http://ops.local/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            nested.url(&["status", "foo"]).unwrap().as_str(),
            "http://ops.local/api/status/foo"
        );
    }

    #[test]
    fn test_service_name_is_encoded_as_one_segment() {
        let client = SelfServiceOpsClient::new("http://ops.local", Duration::from_secs(1)).unwrap();
        let url = client.url(&["status", "team/api?v=1#x"]).unwrap();
        assert_eq!(url.path(), "/status/team%2Fapi%3Fv=1%23x");
        assert!(url.query().is_none());
        assert!(url.fragment().is_none());
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let err = SelfServiceOpsClient::new("not a url", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, OpsError::InvalidBaseUrl(_)));
    }

    #[tokio::test]
    async fn test_trigger_test_suite_returns_run_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/trigger-test-suite"))
            .and(body_partial_json(serde_json::json!({
                "imageName": "smoke",
                "environment": "dev",
                "profile": "nightly",
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"runId": "run-1"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let run_id = client(&server)
            .trigger_test_suite(&trigger_request())
            .await
            .unwrap();
        assert_eq!(run_id.as_deref(), Some("run-1"));
    }

    #[tokio::test]
    async fn test_trigger_test_suite_accepts_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/trigger-test-suite"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let run_id = client(&server)
            .trigger_test_suite(&trigger_request())
            .await
            .unwrap();
        assert!(run_id.is_none());
    }

    #[tokio::test]
    async fn test_auto_deploy_maps_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auto-deploy-service"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let request = AutoDeployRequest {
            image_name: "foo".into(),
            version: "1.2.3".into(),
            environment: "dev".into(),
            user: UserDetails::system(),
            cpu: 256,
            memory: 512,
            instance_count: 2,
            config_version: None,
        };
        let err = client(&server)
            .auto_deploy_service(&request)
            .await
            .unwrap_err();

        match err {
            OpsError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "busy");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_service_status_not_found_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status/unknown"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let status = client(&server).service_status("unknown").await.unwrap();
        assert!(status.is_none());
    }

    #[tokio::test]
    async fn test_service_status_keeps_slashes_inside_the_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status/team%2Fapi"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let status = client(&server).service_status("team/api").await.unwrap();
        assert!(status.is_none());
    }

    #[tokio::test]
    async fn test_service_status_decodes_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status/foo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "repositoryStatus": {
                    "status": "RUNNING",
                    "kind": "service",
                    "creator": "alice"
                }
            })))
            .mount(&server)
            .await;

        let status = client(&server).service_status("foo").await.unwrap().unwrap();
        assert_eq!(status.repository_status.status, "RUNNING");
        assert_eq!(status.repository_status.creator.as_deref(), Some("alice"));
        assert!(status.repository_status.started.is_none());
    }
}
