//! Chunked batch uploads to the ingestion backend.
//!
//! Large item collections go out as consecutive bounded-size POSTs, in
//! order, stopping at the first rejected chunk. There is no rollback of
//! chunks the backend has already accepted; daily summaries are date-keyed,
//! so a full re-run after a failure upserts rather than duplicates.

use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::UploadConfig;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{endpoint} rejected chunk {index} of {count} with status {status}")]
    ChunkRejected {
        endpoint: &'static str,
        index: usize,
        count: usize,
        status: u16,
    },

    #[error("{endpoint} rejected the payload with status {status}")]
    Rejected { endpoint: &'static str, status: u16 },

    #[error("Upload request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// The closed set of ingestion payload shapes.
///
/// Each variant knows its endpoint and how a chunk nests into the request
/// body, so call sites cannot mix an endpoint with the wrong wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    UserInfo,
    DailySummaries,
    ActivitySummaries,
}

impl PayloadShape {
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::UserInfo => "/api/apple-health/user-infos",
            Self::DailySummaries => "/api/apple-health/daily-summaries",
            Self::ActivitySummaries => "/api/apple-health/activity-summaries",
        }
    }

    /// Wrap a chunk into this endpoint's request body. Activity summaries
    /// carry the shared export date alongside the chunk; daily summaries
    /// embed it per item instead.
    fn wrap(&self, chunk: &[Value], export_date: Option<&str>) -> Value {
        match self {
            Self::DailySummaries => json!({ "summaries": chunk }),
            Self::ActivitySummaries => {
                let mut body = json!({ "summaries": chunk });
                if let Some(date) = export_date {
                    body["exportDate"] = json!(date);
                }
                body
            }
            Self::UserInfo => json!({ "items": chunk }),
        }
    }
}

/// HTTP client for the ingestion endpoints.
pub struct Uploader {
    client: reqwest::Client,
    base_url: String,
    chunk_size: usize,
    chunk_delay: Duration,
}

impl Uploader {
    pub fn new(config: &UploadConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("stride/0.1.0")
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            chunk_size: config.chunk_size.max(1),
            chunk_delay: Duration::from_millis(config.chunk_delay_ms),
        }
    }

    async fn post_json(
        &self,
        endpoint: &'static str,
        body: &Value,
        token: &str,
    ) -> Result<StatusCode, UploadError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        Ok(resp.status())
    }

    /// POST a single unchunked object to the shape's endpoint.
    pub async fn post_object(
        &self,
        shape: PayloadShape,
        payload: &Value,
        token: &str,
    ) -> Result<(), UploadError> {
        let endpoint = shape.endpoint();
        let status = self.post_json(endpoint, payload, token).await?;
        if status.is_success() {
            debug!(endpoint, status = status.as_u16(), "Posted object");
            Ok(())
        } else {
            warn!(endpoint, status = status.as_u16(), "Upload rejected");
            Err(UploadError::Rejected {
                endpoint,
                status: status.as_u16(),
            })
        }
    }

    /// POST items in consecutive chunks of at most the configured size.
    ///
    /// Chunks go out sequentially in item order, with a short delay between
    /// consecutive chunks so a big export does not burst the backend. The
    /// first rejected chunk aborts the call; earlier chunks stay delivered.
    pub async fn post_chunked(
        &self,
        shape: PayloadShape,
        items: &[Value],
        token: &str,
        export_date: Option<&str>,
    ) -> Result<(), UploadError> {
        if items.is_empty() {
            debug!(endpoint = shape.endpoint(), "Nothing to upload");
            return Ok(());
        }

        let endpoint = shape.endpoint();
        let count = items.len().div_ceil(self.chunk_size);
        info!(endpoint, items = items.len(), chunks = count, "Uploading in chunks");

        for (i, chunk) in items.chunks(self.chunk_size).enumerate() {
            let index = i + 1;
            let body = shape.wrap(chunk, export_date);
            let status = self.post_json(endpoint, &body, token).await?;
            if !status.is_success() {
                warn!(
                    endpoint,
                    chunk = index,
                    chunks = count,
                    status = status.as_u16(),
                    "Chunk rejected, aborting upload"
                );
                return Err(UploadError::ChunkRejected {
                    endpoint,
                    index,
                    count,
                    status: status.as_u16(),
                });
            }
            debug!(endpoint, chunk = index, chunks = count, "Chunk accepted");
            if index < count {
                tokio::time::sleep(self.chunk_delay).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use wiremock::matchers::{bearer_token, body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_uploader(base_url: &str) -> Uploader {
        Uploader::new(&UploadConfig {
            backend_url: base_url.to_string(),
            chunk_size: 100,
            chunk_delay_ms: 0,
            timeout_secs: 5,
        })
    }

    #[test]
    fn test_payload_shapes() {
        let chunk = vec![json!({"a": 1})];

        assert_eq!(
            PayloadShape::DailySummaries.wrap(&chunk, None),
            json!({"summaries": [{"a": 1}]})
        );

        let activity = PayloadShape::ActivitySummaries.wrap(&chunk, Some("2024-03-10"));
        assert_eq!(activity["exportDate"], "2024-03-10");
        assert_eq!(activity["summaries"][0]["a"], 1);

        assert_eq!(
            PayloadShape::UserInfo.wrap(&chunk, None),
            json!({"items": [{"a": 1}]})
        );
    }

    #[tokio::test]
    async fn test_chunked_partitioning_and_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/apple-health/daily-summaries"))
            .and(bearer_token("tok"))
            .respond_with(ResponseTemplate::new(200))
            .expect(3)
            .mount(&server)
            .await;

        let uploader = test_uploader(&server.uri());
        let items: Vec<Value> = (0..250).map(|i| json!({"seq": i})).collect();
        uploader
            .post_chunked(PayloadShape::DailySummaries, &items, "tok", None)
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);

        let sizes: Vec<usize> = requests
            .iter()
            .map(|r| {
                let body: Value = serde_json::from_slice(&r.body).unwrap();
                body["summaries"].as_array().unwrap().len()
            })
            .collect();
        assert_eq!(sizes, vec![100, 100, 50]);

        let first: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(first["summaries"][0]["seq"], 0);
        let last: Value = serde_json::from_slice(&requests[2].body).unwrap();
        assert_eq!(last["summaries"][0]["seq"], 200);
        assert_eq!(last["summaries"][49]["seq"], 249);
    }

    #[tokio::test]
    async fn test_first_rejection_aborts_remaining_chunks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/apple-health/daily-summaries"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let uploader = test_uploader(&server.uri());
        let items: Vec<Value> = (0..250).map(|i| json!({"seq": i})).collect();
        let result = uploader
            .post_chunked(PayloadShape::DailySummaries, &items, "tok", None)
            .await;

        match result {
            Err(UploadError::ChunkRejected { index, count, status, .. }) => {
                assert_eq!(index, 1);
                assert_eq!(count, 3);
                assert_eq!(status, 500);
            }
            other => panic!("expected ChunkRejected, got {other:?}"),
        }

        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_items_issue_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let uploader = test_uploader(&server.uri());
        uploader
            .post_chunked(PayloadShape::DailySummaries, &[], "tok", None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_activity_chunks_carry_export_date() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/apple-health/activity-summaries"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let uploader = test_uploader(&server.uri());
        let items = vec![json!({"activeEnergyBurned": "520"})];
        uploader
            .post_chunked(PayloadShape::ActivitySummaries, &items, "tok", Some("2024-03-10"))
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["exportDate"], "2024-03-10");
        assert_eq!(body["summaries"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_post_object_user_info() {
        let server = MockServer::start().await;
        let payload = json!({
            "exportDate": "2024-03-10",
            "attributes": {"dateOfBirth": "1990-01-01"}
        });
        Mock::given(method("POST"))
            .and(path("/api/apple-health/user-infos"))
            .and(bearer_token("tok"))
            .and(body_json(&payload))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let uploader = test_uploader(&server.uri());
        uploader
            .post_object(PayloadShape::UserInfo, &payload, "tok")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_post_object_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let uploader = test_uploader(&server.uri());
        let result = uploader
            .post_object(PayloadShape::UserInfo, &json!({}), "tok")
            .await;
        assert!(matches!(
            result,
            Err(UploadError::Rejected { status: 403, .. })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Chunk bodies cover every item exactly once, in order, with every
        /// chunk at the size bound except possibly the last.
        #[test]
        fn prop_chunk_bodies_reassemble_in_order(
            len in 0usize..600,
            chunk_size in 1usize..200,
        ) {
            let items: Vec<Value> = (0..len).map(|i| json!({"seq": i})).collect();
            let bodies: Vec<Value> = items
                .chunks(chunk_size)
                .map(|c| PayloadShape::DailySummaries.wrap(c, None))
                .collect();

            prop_assert_eq!(bodies.len(), len.div_ceil(chunk_size));

            let mut reassembled: Vec<Value> = Vec::new();
            for (i, body) in bodies.iter().enumerate() {
                let summaries = body["summaries"].as_array().unwrap();
                if i + 1 < bodies.len() {
                    prop_assert_eq!(summaries.len(), chunk_size);
                } else {
                    prop_assert!(summaries.len() <= chunk_size);
                }
                reassembled.extend(summaries.iter().cloned());
            }
            prop_assert_eq!(reassembled, items);
        }
    }
}
