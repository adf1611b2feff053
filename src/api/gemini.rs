use crate::config::Config;
use crate::logw;
use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::json;

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const HARM_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

pub fn extract_candidate_text(resp_json: &str) -> Option<String> {
    let root: serde_json::Value = serde_json::from_str(resp_json).ok()?;

    if let Some(err) = root.get("error") {
        if let Some(msg) = err.get("message").and_then(|v| v.as_str()) {
            logw(format!("Gemini error message: {}", msg));
        }
        if let Some(status) = err.get("status").and_then(|v| v.as_str()) {
            logw(format!("Gemini error status: {}", status));
        }
        return None;
    }

    let parts = root
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;

    let mut out = String::new();
    for part in parts {
        if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
            out.push_str(text);
        }
    }

    if out.is_empty() { None } else { Some(out) }
}

/// Prompt in, generated text out. Content-safety thresholds are disabled
/// for every harm category. Failures are logged and reported as None; no
/// retry.
pub async fn generate_text(client: &Client, cfg: &Config, prompt: &str) -> Result<Option<String>> {
    let url = format!(
        "{}/{}:generateContent?key={}",
        GEMINI_BASE, cfg.gemini_model, cfg.gemini_api_key
    );

    let safety: Vec<serde_json::Value> = HARM_CATEGORIES
        .iter()
        .map(|cat| json!({"category": cat, "threshold": "BLOCK_NONE"}))
        .collect();

    let body = json!({
        "contents": [{"parts": [{"text": prompt}]}],
        "safetySettings": safety,
    });

    let resp = client
        .post(&url)
        .json(&body)
        .timeout(std::time::Duration::from_secs(600))
        .send()
        .await
        .context("Gemini request failed")?;

    let status = resp.status();
    let raw = resp.text().await.unwrap_or_default();

    if !status.is_success() {
        logw(format!("Gemini HTTP {}", status.as_u16()));
        if !raw.is_empty() {
            let snippet = raw.chars().take(800).collect::<String>();
            logw(format!("Gemini raw body: {}", snippet));
        }
        return Ok(None);
    }

    Ok(extract_candidate_text(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_candidate_text() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"Hello "},{"text":"world"}]}}]}"#;
        assert_eq!(extract_candidate_text(raw).unwrap(), "Hello world");
    }

    #[test]
    fn error_payload_yields_none() {
        let raw = r#"{"error":{"message":"API key not valid","status":"INVALID_ARGUMENT"}}"#;
        assert!(extract_candidate_text(raw).is_none());
        assert!(extract_candidate_text("not json").is_none());
        assert!(extract_candidate_text(r#"{"candidates":[]}"#).is_none());
    }
}
