//! reqwest-backed [`ModelBridge`] speaking both wire shapes against any
//! OpenAI-compatible endpoint.

use std::time::Duration;

use serde_json::Value;

use grasp_domain::config::{ApiKind, ModelConfig};
use grasp_domain::error::{Error, Result};
use grasp_domain::model::{FunctionSpec, Message, Response};

use crate::bridge::{select_api, ModelBridge};
use crate::{completions, responses};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";

/// Production bridge: serializes the conversation per API kind and posts it
/// to `{endpoint}/chat/completions` or `{endpoint}/responses`.
pub struct HttpBridge {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl HttpBridge {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        let api_key = std::env::var("GRASP_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok();
        if api_key.is_none() {
            tracing::debug!("no API key in environment, sending unauthenticated requests");
        }
        Ok(Self { client, api_key })
    }

    /// Model ids carry a provider prefix (`openai/gpt-5-mini`); the backend
    /// only sees the part after it.
    fn effective_model(config: &ModelConfig) -> &str {
        config
            .model
            .split_once('/')
            .map(|(_, model)| model)
            .unwrap_or(&config.model)
    }

    fn endpoint(config: &ModelConfig) -> &str {
        config
            .model_endpoint
            .as_deref()
            .unwrap_or(DEFAULT_ENDPOINT)
            .trim_end_matches('/')
    }

    async fn post(&self, url: &str, body: &Value, timeout: Duration) -> Result<Value> {
        let mut request = self
            .client
            .post(url)
            .timeout(timeout)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await.map_err(from_reqwest)?;
        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(Error::Http(format!("HTTP {} - {}", status.as_u16(), text)));
        }

        serde_json::from_str(&text)
            .map_err(|e| Error::Protocol(format!("invalid response body: {e}")))
    }
}

#[async_trait::async_trait]
impl ModelBridge for HttpBridge {
    async fn call(
        &self,
        messages: &[Message],
        functions: &[FunctionSpec],
        config: &ModelConfig,
    ) -> Result<Response> {
        let api = select_api(config);
        let model = Self::effective_model(config);
        let endpoint = Self::endpoint(config);
        let timeout = Duration::from_secs_f64(config.completion_timeout);

        tracing::debug!(model, api = ?api, endpoint, "model call");

        match api {
            ApiKind::Completions => {
                let url = format!("{endpoint}/chat/completions");
                let body = completions::build_body(messages, functions, config, model)?;
                let resp = self.post(&url, &body, timeout).await?;
                completions::parse_response(&resp)
            }
            ApiKind::Responses => {
                let url = format!("{endpoint}/responses");
                let body = responses::build_body(messages, functions, config, model)?;
                let resp = self.post(&url, &body, timeout).await?;
                responses::parse_response(&resp)
            }
        }
    }
}

fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_prefix_is_stripped() {
        let mut config = ModelConfig::default();
        assert_eq!(HttpBridge::effective_model(&config), "gpt-5-mini");
        config.model = "local-model".into();
        assert_eq!(HttpBridge::effective_model(&config), "local-model");
    }

    #[test]
    fn endpoint_default_and_trim() {
        let mut config = ModelConfig::default();
        assert_eq!(HttpBridge::endpoint(&config), DEFAULT_ENDPOINT);
        config.model_endpoint = Some("http://localhost:8080/v1/".into());
        assert_eq!(HttpBridge::endpoint(&config), "http://localhost:8080/v1");
    }
}
