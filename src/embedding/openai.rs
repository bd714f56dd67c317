//! OpenAI-compatible `/embeddings` client.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::{Client, header::AUTHORIZATION};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::{EmbeddingError, EmbeddingProvider};
use crate::{config::EmbeddingsConfig, observability::metrics::record_embedding_generation};

const PROVIDER: &str = "openai";

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
    encoding_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<EmbeddingUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f64>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingUsage {
    prompt_tokens: u32,
}

/// Embeddings from any server speaking the OpenAI wire format.
pub struct OpenAiEmbeddings {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: Option<usize>,
    batch_size: usize,
}

impl OpenAiEmbeddings {
    pub fn from_config(config: &EmbeddingsConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            batch_size: config.batch_size.max(1),
        })
    }

    /// One request for one batch. Vectors come back in input order, along
    /// with the prompt token count when the server reports it.
    async fn embed_batch(
        &self,
        batch: &[String],
    ) -> Result<(Vec<Vec<f64>>, Option<u32>), EmbeddingError> {
        let url = format!("{}/embeddings", self.base_url);
        let body = EmbeddingRequest {
            input: batch,
            model: &self.model,
            encoding_format: "float",
            dimensions: self.dimensions,
        };

        let request = self.client.post(&url).json(&body);
        let request = match &self.api_key {
            Some(api_key) => request.header(AUTHORIZATION, format!("Bearer {api_key}")),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("(empty body)"));
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(String::from))
                .unwrap_or(body);
            return Err(EmbeddingError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let text = response.text().await?;
        let parsed: EmbeddingResponse =
            serde_json::from_str(&text).map_err(|e| EmbeddingError::ParseError(e.to_string()))?;
        let tokens = parsed.usage.as_ref().map(|u| u.prompt_tokens);
        let vectors = self.ordered_vectors(batch.len(), parsed.data)?;
        debug!(
            provider = PROVIDER,
            model = %self.model,
            inputs = batch.len(),
            prompt_tokens = ?tokens,
            "Embedding batch completed"
        );
        Ok((vectors, tokens))
    }

    /// Reorder by `index` and check count and dimensionality.
    fn ordered_vectors(
        &self,
        expected: usize,
        mut data: Vec<EmbeddingData>,
    ) -> Result<Vec<Vec<f64>>, EmbeddingError> {
        if data.len() != expected {
            return Err(EmbeddingError::CountMismatch {
                expected,
                actual: data.len(),
            });
        }
        data.sort_by_key(|d| d.index);
        if data.iter().enumerate().any(|(i, d)| d.index != i) {
            return Err(EmbeddingError::ParseError(
                "response indices do not cover the request".into(),
            ));
        }
        if let Some(expected) = self.dimensions
            && let Some(bad) = data.iter().find(|d| d.embedding.len() != expected)
        {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: bad.embedding.len(),
            });
        }
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    #[instrument(
        skip(self, texts),
        fields(provider = "openai", operation = "embed_documents", count = texts.len())
    )]
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let start = Instant::now();
            let result = self.embed_batch(batch).await;
            let duration_secs = start.elapsed().as_secs_f64();
            match result {
                Ok((batch_vectors, tokens)) => {
                    record_embedding_generation(
                        PROVIDER,
                        &self.model,
                        "success",
                        duration_secs,
                        tokens,
                        batch.len() as u32,
                    );
                    vectors.extend(batch_vectors);
                }
                Err(e) => {
                    record_embedding_generation(
                        PROVIDER,
                        &self.model,
                        "error",
                        duration_secs,
                        None,
                        batch.len() as u32,
                    );
                    warn!(
                        provider = PROVIDER,
                        model = %self.model,
                        inputs = batch.len(),
                        error = %e,
                        "Embedding request failed"
                    );
                    return Err(e);
                }
            }
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header, method, path},
    };

    use super::*;

    fn config(server: &MockServer) -> EmbeddingsConfig {
        EmbeddingsConfig {
            base_url: format!("{}/v1/", server.uri()),
            api_key: Some("sk-test".into()),
            model: "text-embedding-3-small".into(),
            dimensions: Some(2),
            batch_size: 512,
            timeout_secs: 5,
        }
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_embed_documents_orders_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "text-embedding-3-small",
                "dimensions": 2,
                "input": ["a", "b"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "list",
                "model": "text-embedding-3-small",
                "data": [
                    {"object": "embedding", "index": 1, "embedding": [0.0, 1.0]},
                    {"object": "embedding", "index": 0, "embedding": [1.0, 0.0]}
                ],
                "usage": {"prompt_tokens": 2, "total_tokens": 2}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAiEmbeddings::from_config(&config(&server)).unwrap();
        let vectors = provider.embed_documents(&texts(&["a", "b"])).await.unwrap();

        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_embed_documents_batches_requests() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(body_partial_json(json!({"input": ["a", "b"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"index": 0, "embedding": [1.0, 0.0]},
                    {"index": 1, "embedding": [0.0, 1.0]}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(body_partial_json(json!({"input": ["c"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [0.5, 0.5]}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAiEmbeddings::from_config(&EmbeddingsConfig {
            batch_size: 2,
            ..config(&server)
        })
        .unwrap();
        let vectors = provider
            .embed_documents(&texts(&["a", "b", "c"]))
            .await
            .unwrap();

        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[2], vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn test_embed_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [0.6, 0.8]}]
            })))
            .mount(&server)
            .await;

        let provider = OpenAiEmbeddings::from_config(&config(&server)).unwrap();
        assert_eq!(provider.embed_query("q").await.unwrap(), vec![0.6, 0.8]);
    }

    #[tokio::test]
    async fn test_api_error_message_is_extracted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
            })))
            .mount(&server)
            .await;

        let provider = OpenAiEmbeddings::from_config(&config(&server)).unwrap();
        let err = provider.embed_documents(&texts(&["a"])).await.unwrap_err();

        match err {
            EmbeddingError::Api { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Incorrect API key provided");
            }
            other => panic!("expected API error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_count_mismatch_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [1.0, 0.0]}]
            })))
            .mount(&server)
            .await;

        let provider = OpenAiEmbeddings::from_config(&config(&server)).unwrap();
        let err = provider.embed_documents(&texts(&["a", "b"])).await.unwrap_err();

        assert!(matches!(
            err,
            EmbeddingError::CountMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [1.0, 0.0, 0.0]}]
            })))
            .mount(&server)
            .await;

        let provider = OpenAiEmbeddings::from_config(&config(&server)).unwrap();
        let err = provider.embed_documents(&texts(&["a"])).await.unwrap_err();

        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_malformed_body_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let provider = OpenAiEmbeddings::from_config(&config(&server)).unwrap();
        let err = provider.embed_documents(&texts(&["a"])).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::ParseError(_)));
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let provider = OpenAiEmbeddings::from_config(&config(&server)).unwrap();
        assert!(provider.embed_documents(&[]).await.unwrap().is_empty());
    }
}
