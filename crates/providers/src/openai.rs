use crate::{
    AnalysisRequest, AnalysisResponse, EmbedResponse, EmbeddingProvider, LlmProvider,
    ProviderError,
};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;

/// README text beyond this many characters is not sent to the model.
const README_PROMPT_LIMIT: usize = 6000;

#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
}

#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    cfg: Arc<OpenAiConfig>,
}

impl OpenAiProvider {
    pub fn new(cfg: OpenAiConfig) -> Self {
        Self {
            client: Client::new(),
            cfg: Arc::new(cfg),
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait::async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        #[derive(serde::Serialize)]
        struct EmbedRequest<'a> {
            model: &'a str,
            input: &'a [String],
        }

        let body = EmbedRequest {
            model: &self.cfg.embedding_model,
            input: texts,
        };

        let resp = self
            .client
            .post(format!("{}/v1/embeddings", self.cfg.base_url))
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ProviderError::RequestFailed(format!(
                "embeddings returned status {}",
                resp.status()
            )));
        }

        let parsed: EmbeddingApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        Ok(EmbedResponse {
            vectors: parsed.data.into_iter().map(|d| d.embedding).collect(),
        })
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, ProviderError> {
        #[derive(serde::Serialize)]
        struct ChatMessage<'a> {
            role: &'static str,
            content: &'a str,
        }
        #[derive(serde::Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: Vec<ChatMessage<'a>>,
            temperature: f32,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChatMessageResp,
        }
        #[derive(Deserialize)]
        struct ChatMessageResp {
            content: String,
        }
        #[derive(Deserialize)]
        struct ChatApiResponse {
            choices: Vec<Choice>,
        }

        let prompt = analysis_prompt(request);
        let body = ChatRequest {
            model: &self.cfg.chat_model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            temperature: 0.2,
        };

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.cfg.base_url))
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ProviderError::RequestFailed(format!(
                "chat returned status {}",
                resp.status()
            )));
        }

        let parsed: ChatApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();

        parse_analysis(&content)
    }
}

fn analysis_prompt(request: &AnalysisRequest) -> String {
    let readme: String = request
        .readme
        .as_deref()
        .unwrap_or("")
        .chars()
        .take(README_PROMPT_LIMIT)
        .collect();
    format!(
        "Analyze the GitHub repository {name}.\n\
         Description: {desc}\n\
         Primary language: {lang}\n\
         Topics: {topics}\n\
         README:\n{readme}\n\n\
         Respond with ONLY a JSON object with keys \"summary\" (one paragraph), \
         \"categories\" (1-4 short lowercase labels), \"features\" (up to 6 strings) \
         and \"use_cases\" (up to 4 strings).",
        name = request.full_name,
        desc = request.description.as_deref().unwrap_or("(none)"),
        lang = request.language.as_deref().unwrap_or("unknown"),
        topics = request.topics.join(", "),
    )
}

/// Extracts the first JSON object from a chat reply, tolerating code fences.
pub fn parse_analysis(content: &str) -> Result<AnalysisResponse, ProviderError> {
    let json_str = match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if end > start => &content[start..=end],
        _ => content,
    };
    serde_json::from_str(json_str).map_err(|e| ProviderError::Decode(e.to_string()))
}
