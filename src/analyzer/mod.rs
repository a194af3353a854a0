//! Analyzer Client — calls the external LLM (an Anthropic-style Messages
//! API) with a cacheable system preamble and parses its structured
//! response. Parse failure never throws: it yields a documented fallback
//! result flagging the project for manual review.

use serde_json::json;

use crate::config::WorkerConfig;
use crate::error::PipelineError;
use crate::model::{AnalysisResult, Complexity, MaturityLevel};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const SYSTEM_PREAMBLE: &str = r#"You are a senior engineering reviewer. Given the source context of a software project, respond with a single JSON object (optionally inside a ```json fenced block) with exactly these fields:
{
  "summary": string,
  "techStack": { "<category>": [string, ...], ... },
  "complexity": "simple" | "moderate" | "complex",
  "recommendations": [ { "kind": string, "priority": "low"|"medium"|"high", "message": string }, ... ],
  "completionScore": integer 0-100,
  "maturityLevel": "poc" | "mvp" | "production" | "mature",
  "productionGaps": [string, ...],
  "estimatedValue": { "value": number, "confidence": "low"|"medium"|"high" }
}
Do not include any other text outside the JSON object."#;

pub struct AnalyzerClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl AnalyzerClient {
    pub fn new(api_key: String, worker: &WorkerConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model: worker.model.clone(),
            max_tokens: worker.max_tokens,
            temperature: worker.temperature,
        }
    }

    pub async fn analyze(&self, context_blob: &str) -> Result<AnalysisResult, PipelineError> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "system": [
                {
                    "type": "text",
                    "text": SYSTEM_PREAMBLE,
                    "cache_control": { "type": "ephemeral" },
                }
            ],
            "messages": [
                { "role": "user", "content": context_blob }
            ],
        });

        let response = self
            .http
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::Timeout(0, e.to_string())
                } else {
                    PipelineError::classify(None, &e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::classify(Some(status.as_u16()), &text));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PipelineError::Parse(e.to_string()))?;

        let text = extract_text(&payload);
        let tokens_used = payload
            .get("usage")
            .and_then(|u| u.get("output_tokens"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        Ok(parse_analysis(&text, &self.model, tokens_used))
    }
}

fn extract_text(payload: &serde_json::Value) -> String {
    payload
        .get("content")
        .and_then(|c| c.as_array())
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

/// Extraction prefers a fenced ```json block, falling back to the first
/// balanced `{...}` span.
fn extract_json_span(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let after = &text[start + "```json".len()..];
        if let Some(end) = after.find("```") {
            return Some(after[..end].trim());
        }
    }

    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_analysis(text: &str, model: &str, tokens_used: i64) -> AnalysisResult {
    let Some(span) = extract_json_span(text) else {
        return AnalysisResult::fallback(model);
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(span) else {
        return AnalysisResult::fallback(model);
    };

    let summary = value
        .get("summary")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let tech_stack = value.get("techStack").cloned().unwrap_or_else(|| json!({}));
    let complexity = match value.get("complexity").and_then(|v| v.as_str()) {
        Some("simple") => Complexity::Simple,
        Some("complex") => Complexity::Complex,
        _ => Complexity::Moderate,
    };
    let recommendations = value
        .get("recommendations")
        .cloned()
        .unwrap_or_else(|| json!([]));
    let completion_score = value
        .get("completionScore")
        .and_then(|v| v.as_i64())
        .unwrap_or(0) as i32;
    let maturity_level = match value.get("maturityLevel").and_then(|v| v.as_str()) {
        Some("mvp") => MaturityLevel::Mvp,
        Some("production") => MaturityLevel::Production,
        Some("mature") => MaturityLevel::Mature,
        _ => MaturityLevel::Poc,
    };
    let production_gaps = value
        .get("productionGaps")
        .cloned()
        .unwrap_or_else(|| json!([]));
    let estimated_value = value
        .get("estimatedValue")
        .cloned()
        .unwrap_or_else(|| json!({"value": 0, "confidence": "low"}));

    AnalysisResult {
        summary,
        tech_stack,
        complexity,
        recommendations,
        completion_score,
        maturity_level,
        production_gaps,
        estimated_value,
        model: model.to_string(),
        tokens_used,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_json_block() {
        let text = "Here is the result:\n```json\n{\"summary\": \"ok\"}\n```\nthanks";
        assert_eq!(extract_json_span(text), Some("{\"summary\": \"ok\"}"));
    }

    #[test]
    fn falls_back_to_first_brace_span() {
        let text = "preamble { \"summary\": \"ok\", \"nested\": {\"a\": 1} } trailer";
        let span = extract_json_span(text).unwrap();
        assert!(span.starts_with('{') && span.ends_with('}'));
        let parsed: serde_json::Value = serde_json::from_str(span).unwrap();
        assert_eq!(parsed["summary"], "ok");
    }

    #[test]
    fn unparseable_text_yields_fallback_with_manual_review_recommendation() {
        let result = parse_analysis("not json at all", "claude-test", 0);
        assert_eq!(result.completion_score, 0);
        let recs = result.recommendations.as_array().unwrap();
        assert_eq!(recs[0]["kind"], "tooling");
        assert_eq!(recs[0]["priority"], "high");
    }

    #[test]
    fn missing_fields_take_documented_defaults() {
        let result = parse_analysis(r#"{"summary": "partial"}"#, "claude-test", 10);
        assert_eq!(result.summary, "partial");
        assert_eq!(result.tech_stack, json!({}));
        assert!(matches!(result.complexity, Complexity::Moderate));
        assert_eq!(result.completion_score, 0);
        assert!(matches!(result.maturity_level, MaturityLevel::Poc));
        assert_eq!(result.estimated_value["confidence"], "low");
    }
}
