use grasp_domain::config::{ApiKind, ModelConfig};
use grasp_domain::error::Result;
use grasp_domain::model::{FunctionSpec, Message, Response};

/// Trait every LLM backend adapter must implement.
///
/// Failures map onto the shared error taxonomy: `Error::Timeout` for the
/// per-call timeout, `Error::Http` for transport problems, and
/// `Error::Protocol` for malformed responses or unexpected finish reasons.
#[async_trait::async_trait]
pub trait ModelBridge: Send + Sync {
    /// Send the conversation and the available functions, wait for the full
    /// response.
    async fn call(
        &self,
        messages: &[Message],
        functions: &[FunctionSpec],
        config: &ModelConfig,
    ) -> Result<Response>;
}

/// Select the wire shape for a request: an explicit setting wins, otherwise
/// OpenAI-compatible model ids use the responses API.
pub fn select_api(config: &ModelConfig) -> ApiKind {
    if let Some(api) = config.api {
        return api;
    }
    if config.model.starts_with("openai") {
        ApiKind::Responses
    } else {
        ApiKind::Completions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_selection() {
        let mut config = ModelConfig::default();
        assert_eq!(select_api(&config), ApiKind::Responses);

        config.model = "deepseek/deepseek-chat".into();
        assert_eq!(select_api(&config), ApiKind::Completions);

        config.api = Some(ApiKind::Responses);
        assert_eq!(select_api(&config), ApiKind::Responses);
    }
}
