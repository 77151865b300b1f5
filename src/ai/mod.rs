//! Caption generation and relevance scoring through an LLM

pub mod openrouter;

use anyhow::{anyhow, Result};
use regex::Regex;
use std::sync::OnceLock;

use crate::config::OpenRouterConfig;

pub use openrouter::OpenRouterClient;

/// Longest slice of source text placed into a prompt
const MAX_PROMPT_TEXT_CHARS: usize = 200;

/// A prompt with a `{text}` placeholder
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate(String);

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn render(&self, text: &str) -> String {
        let text: String = text.trim().chars().take(MAX_PROMPT_TEXT_CHARS).collect();
        if self.0.contains("{text}") {
            self.0.replace("{text}", &text)
        } else {
            format!("{} {}", self.0.trim_end(), text)
        }
    }
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```[a-zA-Z]*").expect("fence regex should compile"))
}

fn hashtag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#\w+").expect("hashtag regex should compile"))
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex should compile"))
}

fn score_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+(\.\d+)?").expect("score regex should compile"))
}

/// Tidy raw model output into a one-line caption of at most `max_chars` characters
pub fn clean_caption(raw: &str, max_chars: usize) -> String {
    let text = fence_re().replace_all(raw, "");
    let text = hashtag_re().replace_all(&text, "");
    let text = whitespace_re().replace_all(&text, " ");
    let text = text
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '“' || c == '”')
        .trim();
    text.chars().take(max_chars).collect::<String>().trim_end().to_string()
}

/// Strip characters that are not allowed in file names, fold line breaks and
/// other whitespace runs into single spaces, and cap the length
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| !c.is_control())
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|'))
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(100).collect::<String>().trim_end().to_string()
}

/// Read the leading number of a score reply, 0.0 when there is none
pub fn parse_score(reply: &str) -> f64 {
    score_re()
        .find(reply.trim())
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0)
}

/// Writes captions and scores candidates with the configured prompts
pub struct Captioner {
    client: OpenRouterClient,
    caption_prompt: PromptTemplate,
    score_prompt: PromptTemplate,
    max_chars: usize,
}

impl Captioner {
    pub fn new(config: &OpenRouterConfig) -> Self {
        Self {
            client: OpenRouterClient::new(config),
            caption_prompt: PromptTemplate::new(&config.caption_prompt),
            score_prompt: PromptTemplate::new(&config.score_prompt),
            max_chars: config.caption_max_chars,
        }
    }

    pub async fn caption(&self, text: &str) -> Result<String> {
        let raw = self.client.generate(&self.caption_prompt.render(text)).await?;
        let caption = clean_caption(&raw, self.max_chars);
        if caption.is_empty() {
            return Err(anyhow!("caption was empty after cleanup"));
        }
        Ok(caption)
    }

    /// Caption, or the sanitized source text when the model is unavailable
    pub async fn caption_or_fallback(&self, text: &str) -> String {
        if self.client.has_keys() {
            match self.caption(text).await {
                Ok(caption) => return caption,
                Err(e) => log::warn!("Caption failed, using source text: {}", e),
            }
        }
        fallback_caption(text, self.max_chars)
    }

    /// Relevance score from the model, 0.0 on any failure
    pub async fn score_relevance(&self, text: &str) -> f64 {
        match self.client.generate(&self.score_prompt.render(text)).await {
            Ok(reply) => parse_score(&reply),
            Err(e) => {
                log::warn!("Scoring failed: {}", e);
                0.0
            }
        }
    }
}

fn fallback_caption(text: &str, max_chars: usize) -> String {
    let cut: String = sanitize_filename(text).chars().take(max_chars).collect();
    cut.trim_end().to_string()
}
