//! Embedding providers.
//!
//! The store only needs vectors of its configured dimensionality; which
//! model produces them is up to the provider.

mod openai;

use async_trait::async_trait;
pub use openai::OpenAiEmbeddings;
use thiserror::Error;

/// Errors that can occur during embedding generation.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Embedding API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse embedding response: {0}")]
    ParseError(String),

    #[error("Expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Turns text into vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed every text, returning one vector per input in input order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, EmbeddingError>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f64>, EmbeddingError> {
        let mut vectors = self.embed_documents(&[text.to_string()]).await?;
        match vectors.pop() {
            Some(vector) if vectors.is_empty() => Ok(vector),
            _ => Err(EmbeddingError::CountMismatch {
                expected: 1,
                actual: vectors.len() + 1,
            }),
        }
    }

    /// Output dimensionality, when known up front.
    fn dimensions(&self) -> Option<usize>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;

    use super::*;

    /// Returns fixed vectors for known texts. Unknown texts are an error.
    pub(crate) struct StaticEmbeddings {
        vectors: HashMap<String, Vec<f64>>,
        dimensions: usize,
    }

    impl StaticEmbeddings {
        pub(crate) fn new(dimensions: usize, pairs: &[(&str, Vec<f64>)]) -> Self {
            Self {
                vectors: pairs
                    .iter()
                    .map(|(text, vector)| (text.to_string(), vector.clone()))
                    .collect(),
                dimensions,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for StaticEmbeddings {
        async fn embed_documents(
            &self,
            texts: &[String],
        ) -> Result<Vec<Vec<f64>>, EmbeddingError> {
            texts
                .iter()
                .map(|text| {
                    self.vectors
                        .get(text)
                        .cloned()
                        .ok_or_else(|| EmbeddingError::ParseError(format!("no vector for {text:?}")))
                })
                .collect()
        }

        fn dimensions(&self) -> Option<usize> {
            Some(self.dimensions)
        }
    }

    #[tokio::test]
    async fn test_default_embed_query_uses_embed_documents() {
        let provider = StaticEmbeddings::new(2, &[("hello", vec![1.0, 0.0])]);
        assert_eq!(provider.embed_query("hello").await.unwrap(), vec![1.0, 0.0]);
        assert!(provider.embed_query("unknown").await.is_err());
    }
}
