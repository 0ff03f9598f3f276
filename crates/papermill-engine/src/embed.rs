use serde::Deserialize;

/// Embedding failures, split so callers can treat throttling differently
/// from real errors: rate limits are retried in place and never consume the
/// handler's error budget.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("embedding service rate limited")]
    RateLimited,
    #[error("embedding request failed: {0}")]
    Failed(String),
}

#[async_trait::async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Client for an HTTP embedding service: POST {"input": text} to the
/// configured URL, expect {"embedding": [f32, ...]} back. HTTP 429 maps to
/// `EmbedError::RateLimited`.
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl HttpEmbeddingClient {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key,
        }
    }

    /// Build from `PAPERMILL_EMBED_URL` and optional `PAPERMILL_EMBED_API_KEY`.
    pub fn from_env() -> anyhow::Result<Self> {
        let url = std::env::var("PAPERMILL_EMBED_URL")
            .map_err(|_| anyhow::anyhow!("PAPERMILL_EMBED_URL is not set"))?;
        let api_key = std::env::var("PAPERMILL_EMBED_API_KEY").ok();
        Ok(Self::new(url, api_key))
    }
}

#[async_trait::async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut req = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({"input": text}));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| EmbedError::Failed(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(EmbedError::RateLimited);
        }
        if !resp.status().is_success() {
            return Err(EmbedError::Failed(format!("status {}", resp.status())));
        }
        let body: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| EmbedError::Failed(e.to_string()))?;
        if body.embedding.is_empty() {
            return Err(EmbedError::Failed("empty embedding vector".into()));
        }
        Ok(body.embedding)
    }
}
