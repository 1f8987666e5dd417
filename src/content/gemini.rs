//! Gemini-backed content service
//!
//! Uses a long-lived reqwest::Client for connection pooling and asks the
//! model for a single JSON object matching the requested schema.

use super::{ContentRequest, ContentService};
use crate::error::OrchestrationError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/{}:generateContent", GEMINI_BASE_URL, model),
        })
    }

    /// Generate raw text from Gemini
    pub async fn generate(&self, system_prompt: &str, query: &str) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(OrchestrationError::ConfigurationError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}?key={}", self.endpoint, self.api_key);

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: query.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.2,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 2048,
                response_mime_type: "application/json",
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: system_prompt.to_string(),
                }],
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                OrchestrationError::ContentService(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(OrchestrationError::ContentService(format!(
                "Gemini API returned {}: {}",
                status, error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            OrchestrationError::ContentService(format!("Gemini parse error: {}", e))
        })?;

        gemini_response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| {
                OrchestrationError::ContentService("Empty response from Gemini".to_string())
            })
    }
}

/// `ContentService` that prompts Gemini for schema-shaped JSON.
pub struct GeminiContentService {
    client: GeminiClient,
}

impl GeminiContentService {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ContentService for GeminiContentService {
    async fn invoke(&self, request: &ContentRequest) -> Result<Value> {
        let system_prompt = build_system_prompt(request);
        let query = format!(
            "{}\n\nINPUT:\n{}",
            request.instructions,
            serde_json::to_string_pretty(&request.context)?
        );

        debug!(task = %request.task, schema = request.schema.name, "Calling Gemini");
        let raw = self.client.generate(&system_prompt, &query).await?;

        parse_json_payload(&raw).map_err(|detail| OrchestrationError::schema(request.schema.name, detail))
    }
}

fn build_system_prompt(request: &ContentRequest) -> String {
    format!(
        r#"You are a professional equity research analyst working inside an automated research agent.

Task: {}

Rules:
- Return ONLY one valid JSON object
- No explanation text, no markdown
- The object MUST contain these fields: {}
- Scores on a 0-100 scale must stay within 0-100; confidences within 0-1"#,
        request.task,
        request.schema.required_fields.join(", ")
    )
}

/// Strip optional ```json fences and parse the remaining text.
fn parse_json_payload(raw: &str) -> std::result::Result<Value, String> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    serde_json::from_str(cleaned).map_err(|e| format!("response is not valid JSON: {} | raw={}", e, raw))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
    response_mime_type: &'static str,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentTask, SchemaDescriptor};
    use serde_json::json;

    #[test]
    fn test_parse_fenced_payload() {
        let raw = "```json\n{\"route\": \"news\"}\n```";
        assert_eq!(parse_json_payload(raw).unwrap(), json!({"route": "news"}));
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(parse_json_payload("Sure! Here is the analysis.").is_err());
    }

    #[test]
    fn test_system_prompt_lists_required_fields() {
        let request = ContentRequest {
            task: ContentTask::Route,
            instructions: String::new(),
            context: json!({}),
            schema: SchemaDescriptor {
                name: "routing_decision",
                required_fields: &["route", "confidence", "reasoning"],
            },
        };
        let prompt = build_system_prompt(&request);
        assert!(prompt.contains("route, confidence, reasoning"));
        assert!(prompt.contains("Task: route"));
    }

    #[test]
    fn test_request_serialization() {
        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: "Analyze MSFT".to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.2,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 2048,
                response_mime_type: "application/json",
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: "You are an analyst".to_string(),
                }],
            },
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("Analyze MSFT"));
        assert!(json.contains("generationConfig"));
        assert!(json.contains("responseMimeType"));
    }

    #[tokio::test]
    async fn test_missing_api_key_is_configuration_error() {
        let client = GeminiClient::new(String::new(), "gemini-2.0-flash", Duration::from_secs(5)).unwrap();
        let err = client.generate("system", "query").await.unwrap_err();
        assert!(err.is_configuration());
    }
}
