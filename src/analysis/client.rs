use anyhow::Context;
use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::nutrition::FoodItem;

/// Which hosted model the analyzer should route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    #[default]
    Gemini,
    OpenAi,
}

/// The vision model, seen only through its contract. An empty list is a
/// valid response here; callers decide whether it counts as failure.
#[async_trait]
pub trait AnalyzerClient: Send + Sync {
    async fn analyze(&self, image: &[u8], provider: AiProvider) -> anyhow::Result<Vec<FoodItem>>;

    async fn correct(
        &self,
        image: &[u8],
        items: &[FoodItem],
        instruction: &str,
        provider: AiProvider,
    ) -> anyhow::Result<Vec<FoodItem>>;

    async fn search(&self, query: &str, provider: AiProvider) -> anyhow::Result<Vec<FoodItem>>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest<'a> {
    provider: AiProvider,
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    items: Option<&'a [FoodItem]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instruction: Option<&'a str>,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    provider: AiProvider,
    query: &'a str,
}

#[derive(Deserialize)]
struct ItemsResponse {
    #[serde(default)]
    items: Vec<FoodItem>,
}

/// JSON-over-HTTP analyzer gateway.
pub struct HttpAnalyzer {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpAnalyzer {
    pub fn new(base_url: &str, api_key: Option<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("mealsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build analyzer http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> anyhow::Result<Vec<FoodItem>> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.post(&url).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let res = req.send().await.with_context(|| format!("POST {url}"))?;
        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            anyhow::bail!("analyzer returned {status}: {text}");
        }

        let body: ItemsResponse = res.json().await.context("decode analyzer response")?;
        debug!(%url, items = body.items.len(), "analyzer responded");
        Ok(body.items)
    }
}

#[async_trait]
impl AnalyzerClient for HttpAnalyzer {
    async fn analyze(&self, image: &[u8], provider: AiProvider) -> anyhow::Result<Vec<FoodItem>> {
        let body = AnalyzeRequest {
            provider,
            image: Base64::encode_string(image),
            items: None,
            instruction: None,
        };
        self.post("/analyze", &body).await
    }

    async fn correct(
        &self,
        image: &[u8],
        items: &[FoodItem],
        instruction: &str,
        provider: AiProvider,
    ) -> anyhow::Result<Vec<FoodItem>> {
        let body = AnalyzeRequest {
            provider,
            image: Base64::encode_string(image),
            items: Some(items),
            instruction: Some(instruction),
        };
        self.post("/correct", &body).await
    }

    async fn search(&self, query: &str, provider: AiProvider) -> anyhow::Result<Vec<FoodItem>> {
        self.post("/search", &SearchRequest { provider, query }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_wire_names() {
        assert_eq!(serde_json::to_string(&AiProvider::Gemini).unwrap(), "\"gemini\"");
        assert_eq!(serde_json::to_string(&AiProvider::OpenAi).unwrap(), "\"openai\"");
    }

    #[test]
    fn correct_request_carries_items_and_instruction() {
        let items = vec![FoodItem::new("Toast", "2 slices", Default::default())];
        let body = AnalyzeRequest {
            provider: AiProvider::Gemini,
            image: Base64::encode_string(b"img"),
            items: Some(items.as_slice()),
            instruction: Some("it was rye bread"),
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["image"], "aW1n");
        assert_eq!(v["instruction"], "it was rye bread");
        assert_eq!(v["items"][0]["servingSize"], "2 slices");
    }

    #[test]
    fn analyze_request_omits_correction_fields() {
        let body = AnalyzeRequest {
            provider: AiProvider::OpenAi,
            image: String::new(),
            items: None,
            instruction: None,
        };
        let v = serde_json::to_value(&body).unwrap();
        assert!(v.get("items").is_none());
        assert!(v.get("instruction").is_none());
    }
}
