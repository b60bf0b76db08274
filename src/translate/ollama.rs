use anyhow::{anyhow, Context};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::config::OllamaOptions;
use crate::translate::prompts::{build_user_prompt, system_prompt};
use crate::translate::TextTranslator;

static THINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<think>.*?</think>").expect("think regex"));

/// Client for a local Ollama server (`/api/generate`, `/api/tags`).
pub struct OllamaTranslator {
    client: Client,
    base_url: String,
    model: String,
    system_prompt: &'static str,
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    system: &'a str,
    stream: bool,
    /// Reasoning models answer without a thinking section.
    think: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

impl OllamaTranslator {
    /// `structured` selects the Markdown system prompt.
    pub fn new(opts: &OllamaOptions, model: impl Into<String>, structured: bool) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(opts.request_timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            base_url: opts.base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            system_prompt: system_prompt(structured),
            temperature: opts.temperature,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// True when the server answers `/api/tags`.
    pub fn check_connection(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

impl TextTranslator for OllamaTranslator {
    fn model(&self) -> &str {
        &self.model
    }

    fn translate(&self, text: &str, target_language: &str) -> anyhow::Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.model,
            prompt: build_user_prompt(text, target_language),
            system: self.system_prompt,
            stream: false,
            think: false,
            options: self.temperature.map(|temperature| GenerateOptions { temperature }),
        };
        debug!("POST {url} ({} chars)", text.chars().count());
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .with_context(|| format!("request {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().unwrap_or_default();
            return Err(anyhow!("ollama returned {status}: {}", detail.trim()));
        }
        let parsed: GenerateResponse = resp.json().context("decode ollama response")?;
        Ok(strip_thinking(&parsed.response))
    }

    fn list_models(&self) -> anyhow::Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .with_context(|| format!("request {url}"))?
            .error_for_status()
            .with_context(|| format!("request {url}"))?;
        let tags: TagsResponse = resp.json().context("decode ollama model list")?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

/// Removes `<think>...</think>` sections some models put before the answer.
pub fn strip_thinking(text: &str) -> String {
    THINK_RE.replace_all(text, "").trim().to_string()
}

/// `installed` is a tag like `qwen2.5:7b`; a wanted name without a tag matches `:latest`.
pub fn model_matches(installed: &str, wanted: &str) -> bool {
    if installed == wanted {
        return true;
    }
    match installed.split_once(':') {
        Some((name, "latest")) => name == wanted,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{model_matches, strip_thinking, GenerateOptions, GenerateRequest};

    #[test]
    fn thinking_sections_are_removed() {
        assert_eq!(
            strip_thinking("<think>\nplan the answer\n</think>\n\nHallo Welt"),
            "Hallo Welt"
        );
        assert_eq!(strip_thinking("<THINK>x</THINK>a<think>y</think>b"), "ab");
        assert_eq!(strip_thinking("  plain  "), "plain");
    }

    #[test]
    fn model_names_match_latest_tag() {
        assert!(model_matches("llama3.2:latest", "llama3.2"));
        assert!(model_matches("qwen2.5:7b", "qwen2.5:7b"));
        assert!(!model_matches("qwen2.5:7b", "qwen2.5"));
        assert!(!model_matches("llama3.2:latest", "llama3"));
    }

    #[test]
    fn generate_request_is_non_streaming() {
        let req = GenerateRequest {
            model: "llama3.2",
            prompt: "p".into(),
            system: "s",
            stream: false,
            think: false,
            options: None,
        };
        let json = serde_json::to_value(&req).expect("json");
        assert_eq!(json["stream"], false);
        assert_eq!(json["think"], false);
        assert!(json.get("options").is_none());

        let req = GenerateRequest {
            options: Some(GenerateOptions { temperature: 0.5 }),
            ..req
        };
        let json = serde_json::to_value(&req).expect("json");
        assert_eq!(json["options"]["temperature"], 0.5);
    }
}
