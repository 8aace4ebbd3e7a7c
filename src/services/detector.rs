//! HTTP client for the remote whitefly detection service.

use std::time::Duration;

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::Config;

/// A detection entry exactly as the service sends it: `{"<index>": {xmin, ymin, xmax, ymax}}`.
pub type RawDetection = serde_json::Value;

/// Every variant means the detector could not give a usable answer. Nothing here retries.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("detection service returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Accepts one or more files under the `files` field.
    pub batch_url: String,
    /// Accepts exactly one file under the `file` field.
    pub single_url: String,
    pub timeout: Duration,
}

impl From<&Config> for DetectorConfig {
    fn from(config: &Config) -> Self {
        Self {
            batch_url: config.detection_batch_url.clone(),
            single_url: config.detection_single_url.clone(),
            timeout: config.detection_timeout,
        }
    }
}

#[derive(Deserialize)]
struct DetectionEnvelope {
    result: Vec<RawDetection>,
}

#[derive(Clone)]
pub struct DetectionClient {
    http: Client,
    config: DetectorConfig,
}

impl DetectionClient {
    pub fn new(config: DetectorConfig) -> Result<Self, DetectionError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    /// `host:port` of the batch endpoint, for error messages shown to users.
    pub fn service_address(&self) -> String {
        match url::Url::parse(&self.config.batch_url) {
            Ok(url) => match (url.host_str(), url.port_or_known_default()) {
                (Some(host), Some(port)) => format!("{}:{}", host, port),
                (Some(host), None) => host.to_string(),
                _ => self.config.batch_url.clone(),
            },
            Err(_) => self.config.batch_url.clone(),
        }
    }

    /// Sends every file of `batch` in one request. Returns one detection list per element of
    /// the service's response array; the first list belongs to the first file.
    pub async fn detect(&self, batch: &[(String, Bytes)]) -> Result<Vec<Vec<RawDetection>>, DetectionError> {
        let form = batch.iter().fold(Form::new(), |form, (filename, data)| {
            form.part("files", file_part(filename, data))
        });

        debug!("Sending {} file(s) to {}", batch.len(), self.config.batch_url);
        let envelopes = self.post(&self.config.batch_url, form).await?;
        Ok(envelopes.into_iter().map(|e| e.result).collect())
    }

    pub async fn detect_single(&self, filename: &str, data: &Bytes) -> Result<Vec<RawDetection>, DetectionError> {
        let form = Form::new().part("file", file_part(filename, data));

        debug!("Sending {} to {}", filename, self.config.single_url);
        let envelopes = self.post(&self.config.single_url, form).await?;
        envelopes
            .into_iter()
            .next()
            .map(|e| e.result)
            .ok_or_else(|| DetectionError::InvalidResponse("empty response array".to_string()))
    }

    async fn post(&self, url: &str, form: Form) -> Result<Vec<DetectionEnvelope>, DetectionError> {
        let response = self.http.post(url).multipart(form).send().await.map_err(|e| {
            warn!("Detection request to {} failed: {}", url, e);
            DetectionError::Network(e)
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            warn!("Detection service returned {} for {}", status, url);
            return Err(DetectionError::Status { status, body });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| DetectionError::InvalidResponse(e.to_string()))
    }
}

fn file_part(filename: &str, data: &Bytes) -> Part {
    Part::stream(reqwest::Body::from(data.clone())).file_name(filename.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, timeout: Duration) -> DetectionClient {
        DetectionClient::new(DetectorConfig {
            batch_url: format!("{}/multi_file_async/", server.uri()),
            single_url: format!("{}/post_single_file/", server.uri()),
            timeout,
        })
        .unwrap()
    }

    fn detections(n: u32) -> serde_json::Value {
        let result: Vec<_> = (0..n)
            .map(|i| json!({ (i.to_string()): {"xmin": 1, "ymin": 1, "xmax": 5, "ymax": 5} }))
            .collect();
        json!([{ "result": result }])
    }

    #[tokio::test]
    async fn test_detect_parses_result_lists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/multi_file_async/"))
            .and(body_string_contains("name=\"files\"; filename=\"leaf.png\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(detections(3)))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let lists = client
            .detect(&[("leaf.png".to_string(), Bytes::from_static(b"pixels"))])
            .await
            .unwrap();

        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].len(), 3);
        assert_eq!(lists[0][2], json!({"2": {"xmin": 1, "ymin": 1, "xmax": 5, "ymax": 5}}));
    }

    #[tokio::test]
    async fn test_detect_single_uses_file_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/post_single_file/"))
            .and(body_string_contains("name=\"file\"; filename=\"one.png\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(detections(4)))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let result = client
            .detect_single("one.png", &Bytes::from_static(b"pixels"))
            .await
            .unwrap();

        assert_eq!(result.len(), 4);
    }

    #[tokio::test]
    async fn test_non_200_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let err = client
            .detect(&[("a.png".to_string(), Bytes::from_static(b"x"))])
            .await
            .unwrap_err();

        match err {
            DetectionError::Status { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_payload_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": []})))
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let err = client
            .detect(&[("a.png".to_string(), Bytes::from_static(b"x"))])
            .await
            .unwrap_err();

        assert!(matches!(err, DetectionError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_timeout_is_a_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(detections(1))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_millis(100));
        let err = client
            .detect(&[("a.png".to_string(), Bytes::from_static(b"x"))])
            .await
            .unwrap_err();

        assert!(matches!(err, DetectionError::Network(_)));
    }

    #[test]
    fn test_service_address() {
        let client = DetectionClient::new(DetectorConfig {
            batch_url: "http://localhost:5000/multi_file_async/".to_string(),
            single_url: "http://localhost:5000/post_single_file/".to_string(),
            timeout: Duration::from_secs(1),
        })
        .unwrap();

        assert_eq!(client.service_address(), "localhost:5000");
    }
}
