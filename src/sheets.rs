//! Google Sheets upload log

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde_json::json;

use crate::config::SheetsConfig;
use crate::drive::GoogleAuth;

pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

/// One logged upload
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    pub source: String,
    pub url: String,
    pub caption: String,
    pub drive_name: String,
    pub timestamp: chrono::DateTime<chrono::Local>,
}

impl SheetRow {
    pub fn new(source: &str, url: &str, caption: &str, drive_name: &str) -> Self {
        Self {
            source: source.to_string(),
            url: url.to_string(),
            caption: caption.to_string(),
            drive_name: drive_name.to_string(),
            timestamp: chrono::Local::now(),
        }
    }

    fn values(&self) -> Vec<String> {
        vec![
            self.source.clone(),
            self.url.clone(),
            self.caption.clone(),
            self.drive_name.clone(),
            self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]
    }
}

pub struct SheetsLogger {
    client: Client,
    auth: GoogleAuth,
    endpoint: String,
}

impl SheetsLogger {
    pub fn new(config: &SheetsConfig, auth: GoogleAuth) -> Self {
        let range = urlencoding::encode(&format!("{}!A1", config.tab_name)).into_owned();
        let endpoint = format!(
            "{}/v4/spreadsheets/{}/values/{}:append",
            config.api_base.trim_end_matches('/'),
            config.sheet_id,
            range
        );
        Self {
            client: Client::new(),
            auth,
            endpoint,
        }
    }

    pub async fn append_row(&self, row: &SheetRow) -> Result<()> {
        let token = self.auth.token(SHEETS_SCOPE).await?;
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .query(&[("valueInputOption", "RAW")])
            .json(&json!({"values": [row.values()]}))
            .send()
            .await
            .context("Sheets append request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Sheets append returned {}: {}", status, body));
        }
        Ok(())
    }

    /// Append, logging failures instead of returning them
    pub async fn log_upload(&self, row: &SheetRow) {
        match self.append_row(row).await {
            Ok(()) => log::info!("Logged {} to sheet", row.drive_name),
            Err(e) => log::warn!("Could not log {} to sheet: {}", row.drive_name, e),
        }
    }
}
