//! Web search: the provider contract, the `internet_search` action and two
//! providers (Tavily over HTTP, and a canned one for offline runs).

use std::sync::Arc;

use async_trait::async_trait;
use research_core::actions::{Action, ActionContext, ActionDefinition, Capability};
use research_core::error::ActionError;
use research_core::schema::{ActionArgs, ArgumentSchema, ParamType};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const SEARCH_TOPICS: [&str; 3] = ["general", "news", "finance"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub max_results: u32,
    pub topic: String,
    pub include_raw_content: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub content: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, request: SearchRequest) -> anyhow::Result<Vec<SearchHit>>;
}

/// `internet_search`: runs a web search through the configured provider.
/// Provider failures become action failures and are not retried.
pub struct InternetSearchAction {
    provider: Arc<dyn SearchProvider>,
}

impl InternetSearchAction {
    pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Action for InternetSearchAction {
    fn definition(&self) -> ActionDefinition {
        ActionDefinition::new(
            "internet_search",
            "Run a web search",
            Capability::Pure,
            ArgumentSchema::new()
                .required("query", ParamType::String, "What to search for")
                .with_default(
                    "max_results",
                    ParamType::Integer,
                    "Number of results to return",
                    json!(5),
                )
                .with_default(
                    "topic",
                    ParamType::enumeration(SEARCH_TOPICS),
                    "Search category",
                    json!("general"),
                )
                .with_default(
                    "include_raw_content",
                    ParamType::Boolean,
                    "Include the raw page content of each result",
                    json!(false),
                ),
        )
    }

    async fn execute(&self, args: ActionArgs, ctx: ActionContext) -> Result<String, ActionError> {
        let request: SearchRequest = args.parse("internet_search")?;
        tracing::info!(
            agent = %ctx.agent,
            request = %ctx.request_id,
            query = %request.query,
            topic = %request.topic,
            "internet_search"
        );

        let query = request.query.clone();
        let hits = self
            .provider
            .search(request)
            .await
            .map_err(|e| ActionError::failed("internet_search", format!("{e:#}")))?;

        tracing::debug!(agent = %ctx.agent, hits = hits.len(), "search finished");
        serde_json::to_string_pretty(&json!({"query": query, "results": hits}))
            .map_err(|e| ActionError::failed("internet_search", e))
    }
}

#[derive(Debug, Clone)]
pub struct TavilyConfig {
    pub api_key: String,
    pub api_url: Option<String>,
}

impl TavilyConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: None,
        }
    }

    /// Reads `TAVILY_API_KEY`.
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("TAVILY_API_KEY")
            .map_err(|_| anyhow::anyhow!("TAVILY_API_KEY is not set"))?;
        Ok(Self::new(api_key))
    }
}

pub struct TavilySearch {
    client: Client,
    config: TavilyConfig,
}

impl TavilySearch {
    pub fn new(config: TavilyConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder()
                .user_agent("deep-research-engine/0.1")
                .build()?,
            config,
        })
    }
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: u32,
    topic: &'a str,
    include_raw_content: bool,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    raw_content: Option<String>,
}

#[async_trait]
impl SearchProvider for TavilySearch {
    async fn search(&self, request: SearchRequest) -> anyhow::Result<Vec<SearchHit>> {
        let url = self
            .config
            .api_url
            .as_deref()
            .unwrap_or("https://api.tavily.com/search");

        let body = TavilyRequest {
            api_key: &self.config.api_key,
            query: &request.query,
            max_results: request.max_results,
            topic: &request.topic,
            include_raw_content: request.include_raw_content,
        };

        tracing::debug!(query = %request.query, "calling Tavily");
        let data: TavilyResponse = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(data
            .results
            .into_iter()
            .map(|r| SearchHit {
                title: r.title,
                url: r.url,
                content: r.content,
                score: r.score,
                raw_content: r.raw_content.filter(|_| request.include_raw_content),
            })
            .collect())
    }
}

/// Returns the same canned hits for every query, trimmed to `max_results`.
#[derive(Debug, Clone)]
pub struct StaticSearch {
    hits: Vec<SearchHit>,
}

impl StaticSearch {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self { hits }
    }

    /// A small fixed corpus for offline runs.
    pub fn sample() -> Self {
        Self::new(vec![
            SearchHit {
                title: "Latest AI Developments 2024".into(),
                url: "https://example.com/ai-2024".into(),
                content: "Recent advances in AI include improved language models, better multimodal capabilities, and enhanced safety measures.".into(),
                score: 0.95,
                raw_content: None,
            },
            SearchHit {
                title: "AI Breakthroughs in Healthcare".into(),
                url: "https://example.com/ai-healthcare".into(),
                content: "AI is revolutionizing healthcare with better diagnostic tools and personalized treatment plans.".into(),
                score: 0.90,
                raw_content: None,
            },
        ])
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    async fn search(&self, request: SearchRequest) -> anyhow::Result<Vec<SearchHit>> {
        Ok(self
            .hits
            .iter()
            .take(request.max_results as usize)
            .cloned()
            .collect())
    }
}
