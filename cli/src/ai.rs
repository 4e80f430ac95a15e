use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AiConfig;
use mealprep_core::feedback::{CollaboratorError, RecipeReviser};
use mealprep_core::models::{Recipe, RecipeCategory};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 2000;

const SYSTEM_PROMPT: &str = "You adjust batch-cooking recipes based on user feedback. \
Keep the recipe's category, equipment and portion size unless the feedback asks otherwise, \
and keep macros_per_portion consistent with the new ingredients. \
Never use an ingredient whose name or tag is in the excluded list. \
Reply with JSON only, no prose, in the form \
{\"modifiedRecipe\": {<full recipe with the same fields as the input>}, \"changes\": [\"short description\", ...]}.";

const DRAFT_SYSTEM_PROMPT: &str = "You write batch-cooking recipes that keep well for several days. \
Give quantities for the whole batch and macros_per_portion for one portion. \
Never use an ingredient whose name or tag is in the excluded list. \
Reply with JSON only, no prose, in the form \
{\"newRecipe\": {\"name\": str, \"category\": \"protein\"|\"legume\"|\"base\"|\"complement\", \
\"ingredients\": [{\"name\": str, \"quantity\": number, \"unit\": str, \"category\": str, \"tags\": [str]}], \
\"macros_per_portion\": {\"protein\": number, \"carbs\": number, \"fat\": number, \"calories\": number}, \
\"cooking\": {\"method\": str, \"duration\": {\"min_minutes\": int, \"max_minutes\": int}, \"equipment\": str}, \
\"complexity\": 1-5}}.";

/// Anthropic Messages API client that proposes recipe revisions.
pub struct AnthropicReviser {
    client: reqwest::Client,
    rt: tokio::runtime::Handle,
    api_key: String,
    model: String,
    endpoint: String,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl AnthropicReviser {
    /// `None` when no API key is configured.
    pub fn from_config(config: &AiConfig) -> Result<Option<Self>> {
        let Some(api_key) = config.api_key.clone() else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .user_agent(format!("mealprep/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Some(Self {
            client,
            rt: tokio::runtime::Handle::current(),
            api_key,
            model: config.model.clone(),
            endpoint: config.endpoint.clone(),
        }))
    }

    pub async fn revise_async(
        &self,
        recipe: &Recipe,
        comment: &str,
        excluded_tags: &BTreeSet<String>,
    ) -> Result<Value, CollaboratorError> {
        let prompt = user_prompt(recipe, comment, excluded_tags)
            .map_err(|e| CollaboratorError::Failed(format!("{e:#}")))?;
        tracing::debug!(recipe = %recipe.id, model = %self.model, "requesting recipe revision");
        self.ask(SYSTEM_PROMPT, prompt).await
    }

    pub async fn draft_async(
        &self,
        request: &str,
        category: Option<RecipeCategory>,
        excluded_tags: &BTreeSet<String>,
    ) -> Result<Value, CollaboratorError> {
        tracing::debug!(model = %self.model, "requesting recipe draft");
        self.ask(DRAFT_SYSTEM_PROMPT, draft_prompt(request, category, excluded_tags))
            .await
    }

    async fn ask(&self, system: &str, prompt: String) -> Result<Value, CollaboratorError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CollaboratorError::Failed(format!(
                "API returned {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let data: MessagesResponse = resp.json().await.map_err(transport_error)?;
        Ok(response_value(&data))
    }
}

impl RecipeReviser for AnthropicReviser {
    fn revise(
        &self,
        recipe: &Recipe,
        comment: &str,
        excluded_tags: &BTreeSet<String>,
    ) -> Result<Value, CollaboratorError> {
        self.rt
            .block_on(self.revise_async(recipe, comment, excluded_tags))
    }

    fn draft(
        &self,
        request: &str,
        category: Option<RecipeCategory>,
        excluded_tags: &BTreeSet<String>,
    ) -> Result<Value, CollaboratorError> {
        self.rt
            .block_on(self.draft_async(request, category, excluded_tags))
    }
}

fn transport_error(e: reqwest::Error) -> CollaboratorError {
    if e.is_timeout() {
        CollaboratorError::Timeout
    } else {
        CollaboratorError::Failed(e.to_string())
    }
}

fn excluded_list(excluded_tags: &BTreeSet<String>) -> String {
    if excluded_tags.is_empty() {
        "none".to_string()
    } else {
        excluded_tags.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

fn draft_prompt(
    request: &str,
    category: Option<RecipeCategory>,
    excluded_tags: &BTreeSet<String>,
) -> String {
    let category = category.map_or("your choice", RecipeCategory::as_str);
    let excluded = excluded_list(excluded_tags);
    format!("Request: {request}\n\nCategory: {category}\n\nExcluded ingredients or tags: {excluded}")
}

fn user_prompt(recipe: &Recipe, comment: &str, excluded_tags: &BTreeSet<String>) -> Result<String> {
    let recipe_json = serde_json::to_string_pretty(recipe)?;
    let excluded = excluded_list(excluded_tags);
    Ok(format!(
        "Recipe:\n{recipe_json}\n\nUser feedback: {comment}\n\nExcluded ingredients or tags: {excluded}"
    ))
}

/// The model's text as JSON. Text that isn't JSON is passed through as a
/// string and left for the proposal parser to accept or reject.
fn response_value(data: &MessagesResponse) -> Value {
    let text: String = data
        .content
        .iter()
        .filter(|b| b.kind == "text")
        .map(|b| b.text.as_str())
        .collect();
    serde_json::from_str(text.trim()).unwrap_or_else(|_| Value::String(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mealprep_core::models::{
        CookingParams, DurationRange, Equipment, Ingredient, Macros, PurchaseCategory,
    };
    use serde_json::{Map, json};

    fn recipe() -> Recipe {
        Recipe {
            id: "chili".to_string(),
            name: "Chili".to_string(),
            category: RecipeCategory::Legume,
            ingredients: vec![Ingredient {
                name: "beans".to_string(),
                quantity: 400.0,
                unit: "g".to_string(),
                category: PurchaseCategory::Legume,
                tags: BTreeSet::new(),
            }],
            macros_per_portion: Macros::new(20.0, 40.0, 5.0, 300.0),
            cooking: CookingParams {
                method: "slow cook".to_string(),
                duration: DurationRange {
                    min_minutes: 240,
                    max_minutes: 300,
                },
                equipment: Equipment::SlowCooker,
            },
            complexity: 2,
            favorite: false,
            ratings: Vec::new(),
            revision: 0,
            extra: Map::new(),
        }
    }

    #[test]
    fn test_user_prompt_contents() {
        let excluded: BTreeSet<String> = ["pork".to_string()].into();
        let prompt = user_prompt(&recipe(), "too bland", &excluded).unwrap();
        assert!(prompt.contains("\"id\": \"chili\""));
        assert!(prompt.contains("User feedback: too bland"));
        assert!(prompt.ends_with("pork"));

        let prompt = user_prompt(&recipe(), "ok", &BTreeSet::new()).unwrap();
        assert!(prompt.ends_with("none"));
    }

    #[test]
    fn test_draft_prompt_contents() {
        let excluded: BTreeSet<String> = ["peanut".to_string()].into();
        let prompt = draft_prompt("spicy chickpeas", Some(RecipeCategory::Legume), &excluded);
        assert!(prompt.starts_with("Request: spicy chickpeas"));
        assert!(prompt.contains("Category: legume"));
        assert!(prompt.ends_with("peanut"));

        let prompt = draft_prompt("anything", None, &BTreeSet::new());
        assert!(prompt.contains("Category: your choice"));
        assert!(DRAFT_SYSTEM_PROMPT.contains("newRecipe"));
    }

    #[test]
    fn test_response_value_parses_json_text() {
        let data: MessagesResponse = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "{\"modifiedRecipe\": {\"name\": \"x\"}}"}]
        }))
        .unwrap();
        let value = response_value(&data);
        assert_eq!(value["modifiedRecipe"]["name"], "x");
    }

    #[test]
    fn test_response_value_keeps_prose() {
        let data: MessagesResponse = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "Sorry, I can't help."}]
        }))
        .unwrap();
        assert_eq!(response_value(&data), json!("Sorry, I can't help."));
    }

    #[test]
    fn test_request_shape() {
        let request = MessagesRequest {
            model: "m",
            max_tokens: MAX_TOKENS,
            system: SYSTEM_PROMPT,
            messages: vec![Message {
                role: "user",
                content: "hi".to_string(),
            }],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["max_tokens"], 2000);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_no_key_means_no_reviser() {
        let config = AiConfig {
            api_key: None,
            model: "m".to_string(),
            endpoint: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
        };
        assert!(AnthropicReviser::from_config(&config).unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unreachable_endpoint_is_collaborator_error() {
        let config = AiConfig {
            api_key: Some("test".to_string()),
            model: "m".to_string(),
            endpoint: "http://127.0.0.1:9/v1/messages".to_string(),
            timeout_secs: 2,
        };
        let reviser = AnthropicReviser::from_config(&config).unwrap().unwrap();
        let result = reviser
            .revise_async(&recipe(), "too bland", &BTreeSet::new())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore = "requires ANTHROPIC_API_KEY and network access"]
    async fn test_live_revision() {
        let config = AiConfig {
            api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            model: crate::config::DEFAULT_AI_MODEL.to_string(),
            endpoint: crate::config::DEFAULT_AI_ENDPOINT.to_string(),
            timeout_secs: 30,
        };
        let reviser = AnthropicReviser::from_config(&config).unwrap().unwrap();
        let value = reviser
            .revise_async(&recipe(), "needs more spice", &BTreeSet::new())
            .await
            .unwrap();
        assert!(value.get("modifiedRecipe").is_some());
    }
}
