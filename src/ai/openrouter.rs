use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::OpenRouterConfig;
use crate::types::APP_NAME;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct OpenRouterClient {
    client: Client,
    api_keys: Vec<String>,
    current_key_index: AtomicUsize,
    model: String,
    endpoint: String,
    max_tokens: u32,
    temperature: f32,
    system_prompt: Option<String>,
    referer: Option<String>,
}

#[derive(Deserialize)]
struct OpenRouterResponse {
    #[serde(default)]
    choices: Vec<OpenRouterChoice>,
}

#[derive(Deserialize)]
struct OpenRouterChoice {
    message: OpenRouterMessage,
}

#[derive(Deserialize)]
struct OpenRouterMessage {
    content: Option<String>,
}

impl OpenRouterClient {
    pub fn new(config: &OpenRouterConfig) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_keys: config
                .api_keys
                .iter()
                .filter(|k| !k.trim().is_empty())
                .cloned()
                .collect(),
            current_key_index: AtomicUsize::new(0),
            model: config.model.clone(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            system_prompt: config.system_prompt.clone(),
            referer: config.referer.clone().filter(|r| !r.trim().is_empty()),
        }
    }

    pub fn has_keys(&self) -> bool {
        !self.api_keys.is_empty()
    }

    fn get_current_key(&self) -> Result<&str> {
        if self.api_keys.is_empty() {
            return Err(anyhow!("No OpenRouter API keys available"));
        }
        let index = self.current_key_index.load(Ordering::Relaxed) % self.api_keys.len();
        Ok(self.api_keys[index].as_str())
    }

    fn rotate_key(&self) {
        if self.api_keys.len() > 1 {
            let next = (self.current_key_index.load(Ordering::Relaxed) + 1) % self.api_keys.len();
            self.current_key_index.store(next, Ordering::Relaxed);
        }
    }

    fn payload(&self, prompt: &str) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &self.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        })
    }

    /// Send one user prompt and return the trimmed completion text
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let payload = self.payload(prompt);

        let mut attempts = 0;
        let max_attempts = self.api_keys.len().max(3);

        while attempts < max_attempts {
            let key = self.get_current_key()?;

            let mut request = self
                .client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", key))
                .header("X-Title", APP_NAME);
            if let Some(referer) = &self.referer {
                request = request.header("HTTP-Referer", referer.as_str());
            }
            let response = request.json(&payload).send().await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let body: OpenRouterResponse = resp.json().await?;
                        let content = body
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|c| c.message.content)
                            .map(|c| c.trim().to_string())
                            .filter(|c| !c.is_empty());
                        return content.ok_or_else(|| anyhow!("OpenRouter returned an empty completion"));
                    }

                    let error_text = resp.text().await.unwrap_or_default();
                    log::warn!("OpenRouter Error ({}): {}", status, error_text);

                    match status.as_u16() {
                        401 | 402 | 429 => self.rotate_key(),
                        500..=599 => {}
                        _ => return Err(anyhow!("OpenRouter request rejected ({})", status)),
                    }
                }
                Err(e) => {
                    log::warn!("Request failed: {}", e);
                    self.rotate_key();
                }
            }
            attempts += 1;
        }

        Err(anyhow!(
            "OpenRouter request failed after {} attempts",
            max_attempts
        ))
    }
}
