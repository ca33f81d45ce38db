//! Planning policy backed by an OpenAI-compatible chat-completions endpoint
//! with native tool calling. Azure OpenAI deployments are supported through
//! [`OpenAiConfig::azure`].

use async_trait::async_trait;
use reqwest::Client;
use research_core::actions::ActionDefinition;
use research_core::messaging::{Conversation, MessageRole};
use research_core::policy::{ActionCall, Decision, PlanningPolicy};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiAuth {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `api-key: <key>`, as Azure expects
    ApiKeyHeader,
}

#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub api_url: Option<String>,
    pub auth: ApiAuth,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("model", &self.model)
            .field("api_url", &self.api_url)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            api_url: None,
            auth: ApiAuth::Bearer,
            max_tokens: None,
            temperature: None,
        }
    }

    /// Azure OpenAI deployment. The deployment name doubles as the model.
    pub fn azure(
        endpoint: &str,
        deployment: impl Into<String>,
        api_version: &str,
        api_key: impl Into<String>,
    ) -> Self {
        let deployment = deployment.into();
        let url = format!(
            "{}/openai/deployments/{deployment}/chat/completions?api-version={api_version}",
            endpoint.trim_end_matches('/')
        );
        Self {
            api_key: api_key.into(),
            model: deployment,
            api_url: Some(url),
            auth: ApiAuth::ApiKeyHeader,
            max_tokens: None,
            temperature: None,
        }
    }

    /// Azure when `AZURE_AI_ENDPOINT` is set (with `AZURE_MODEL_DEPLOYMENT`,
    /// `AZURE_AI_API_VERSION`, `AZURE_AI_API_KEY`), otherwise OpenAI with
    /// `OPENAI_API_KEY` and `OPENAI_MODEL` (default `gpt-4o-mini`).
    pub fn from_env() -> anyhow::Result<Self> {
        let var = |key: &str| {
            std::env::var(key).map_err(|_| anyhow::anyhow!("{key} is not set"))
        };
        if let Ok(endpoint) = std::env::var("AZURE_AI_ENDPOINT") {
            return Ok(Self::azure(
                &endpoint,
                var("AZURE_MODEL_DEPLOYMENT")?,
                &var("AZURE_AI_API_VERSION")?,
                var("AZURE_AI_API_KEY")?,
            ));
        }
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Ok(Self::new(var("OPENAI_API_KEY")?, model).with_api_url(std::env::var("OPENAI_API_URL").ok()))
    }

    pub fn with_api_url(mut self, api_url: Option<String>) -> Self {
        self.api_url = api_url;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

pub struct OpenAiPolicy {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiPolicy {
    pub fn new(config: OpenAiConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder()
                .user_agent("deep-research-engine/0.1")
                .build()?,
            config,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize)]
struct ToolCall {
    id: String,
    function: FunctionCall,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn to_openai_messages(conversation: &Conversation) -> Vec<Value> {
    let mut messages = Vec::with_capacity(conversation.len() + 1);
    messages.push(json!({"role": "system", "content": conversation.system_prompt()}));

    for message in conversation.messages() {
        let value = match message.role {
            MessageRole::User => json!({"role": "user", "content": message.content}),
            MessageRole::Assistant if message.action_requests.is_empty() => {
                json!({"role": "assistant", "content": message.content})
            }
            MessageRole::Assistant => {
                let calls: Vec<Value> = message
                    .action_requests
                    .iter()
                    .map(|r| {
                        json!({
                            "id": r.id,
                            "type": "function",
                            "function": {"name": r.name, "arguments": r.args.to_string()},
                        })
                    })
                    .collect();
                let content = (!message.content.is_empty()).then(|| message.content.clone());
                json!({"role": "assistant", "content": content, "tool_calls": calls})
            }
            MessageRole::ActionResult => {
                let call_id = message
                    .result
                    .as_ref()
                    .map(|r| r.request_id.clone())
                    .unwrap_or_default();
                json!({"role": "tool", "tool_call_id": call_id, "content": message.content})
            }
        };
        messages.push(value);
    }
    messages
}

fn to_openai_tools(actions: &[ActionDefinition]) -> Vec<Value> {
    actions
        .iter()
        .map(|a| {
            json!({
                "type": "function",
                "function": {
                    "name": a.name,
                    "description": a.description,
                    "parameters": a.schema.to_json_schema(),
                },
            })
        })
        .collect()
}

fn to_decision(message: ChoiceMessage) -> Decision {
    let tool_calls = message.tool_calls.unwrap_or_default();
    if tool_calls.is_empty() {
        return Decision::final_answer(message.content.unwrap_or_default());
    }
    let calls = tool_calls
        .into_iter()
        .map(|call| {
            // Unparseable arguments are passed through so schema validation
            // reports them back to the model.
            let args = if call.function.arguments.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&call.function.arguments)
                    .unwrap_or(Value::String(call.function.arguments))
            };
            ActionCall::new(call.function.name, args).with_id(call.id)
        })
        .collect();
    Decision::actions_with_text(calls, message.content.unwrap_or_default())
}

#[async_trait]
impl PlanningPolicy for OpenAiPolicy {
    async fn decide(
        &self,
        conversation: &Conversation,
        actions: &[ActionDefinition],
    ) -> anyhow::Result<Decision> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: to_openai_messages(conversation),
            tools: to_openai_tools(actions),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };
        let url = self.config.api_url.as_deref().unwrap_or(OPENAI_CHAT_URL);

        tracing::debug!(
            agent = conversation.agent(),
            model = %self.config.model,
            messages = body.messages.len(),
            tools = body.tools.len(),
            "chat completion request"
        );

        let request = self.client.post(url).json(&body);
        let request = match self.config.auth {
            ApiAuth::Bearer => request.bearer_auth(&self.config.api_key),
            ApiAuth::ApiKeyHeader => request.header("api-key", &self.config.api_key),
        };
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(%status, body = %error_text, "chat completion failed");
            anyhow::bail!("chat completion error: {status} - {error_text}");
        }

        let data: ChatResponse = response.json().await?;
        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("chat completion response has no choices"))?;
        Ok(to_decision(choice.message))
    }
}
