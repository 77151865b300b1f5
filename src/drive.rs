//! Google Drive Integration Module
//! Handles service account authentication and file uploads

use anyhow::{anyhow, Context, Result};
use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use crate::config::DriveConfig;
use crate::types::UploadRecord;

pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
pub const MULTIPART_BOUNDARY: &str = "clipshaper_upload_boundary";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Refreshable OAuth credentials of a user who authorized the app
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizedUser {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
}

impl AuthorizedUser {
    /// Trade the refresh token for a fresh access token
    async fn access_token(&self) -> Result<String> {
        let resp = Client::new()
            .post(&self.token_uri)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .context("OAuth token refresh request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("OAuth token refresh returned {}: {}", status, body));
        }

        let refreshed: RefreshResponse = resp.json().await.context("Invalid token response")?;
        Ok(refreshed.access_token)
    }
}

/// Credentials for Google APIs
#[derive(Clone)]
pub enum GoogleAuth {
    ServiceAccount(Arc<dyn TokenProvider>),
    AuthorizedUser(Arc<AuthorizedUser>),
    /// A ready bearer token
    Static(String),
}

impl GoogleAuth {
    /// Build from an inline service account JSON or a key file path, inline first
    pub fn from_sources(inline_json: Option<&str>, key_path: Option<&str>) -> Result<Self> {
        if let Some(json) = inline_json.filter(|j| !j.trim().is_empty()) {
            let account = CustomServiceAccount::from_json(json)
                .map_err(|e| anyhow!("Invalid service account JSON: {}", e))?;
            return Ok(GoogleAuth::ServiceAccount(Arc::new(account)));
        }

        if let Some(path) = key_path.filter(|p| !p.trim().is_empty()) {
            let account = CustomServiceAccount::from_file(path)
                .map_err(|e| anyhow!("Failed to load service account {}: {}", path, e))?;
            return Ok(GoogleAuth::ServiceAccount(Arc::new(account)));
        }

        Err(anyhow!(
            "No Google credentials. Set GDRIVE_SERVICE_ACCOUNT, GOOGLE_APPLICATION_CREDENTIALS \
             or google_service_account in settings.json"
        ))
    }

    /// `GDRIVE_SERVICE_ACCOUNT` from the environment, then the configured key path
    pub fn from_env(key_path: Option<&str>) -> Result<Self> {
        let inline = std::env::var("GDRIVE_SERVICE_ACCOUNT").ok();
        Self::from_sources(inline.as_deref(), key_path)
    }

    /// Parse authorized-user JSON (`client_id`, `client_secret`, `refresh_token`)
    pub fn from_authorized_user_json(json: &str) -> Result<Self> {
        let user: AuthorizedUser =
            serde_json::from_str(json).context("Invalid authorized user OAuth JSON")?;
        Ok(GoogleAuth::AuthorizedUser(Arc::new(user)))
    }

    /// Credentials for a YouTube channel: a ready `YOUTUBE_ACCESS_TOKEN`, or the
    /// authorized-user JSON stored in the `token_env` variable
    pub fn for_youtube(token_env: &str) -> Result<Self> {
        Self::youtube_from_lookup(token_env, |key| std::env::var(key).ok())
    }

    fn youtube_from_lookup<F>(token_env: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("YOUTUBE_ACCESS_TOKEN").filter(|t| !t.trim().is_empty()) {
            return Ok(GoogleAuth::Static(token.trim().to_string()));
        }
        match lookup(token_env).filter(|j| !j.trim().is_empty()) {
            Some(json) => Self::from_authorized_user_json(&json),
            None => Err(anyhow!(
                "No YouTube credentials. Set YOUTUBE_ACCESS_TOKEN or {}",
                token_env
            )),
        }
    }

    pub async fn token(&self, scope: &str) -> Result<String> {
        match self {
            GoogleAuth::ServiceAccount(provider) => {
                let token = provider
                    .token(&[scope])
                    .await
                    .map_err(|e| anyhow!("Failed to get Google access token: {}", e))?;
                Ok(token.as_str().to_string())
            }
            // Refreshing keeps the scopes granted at consent time
            GoogleAuth::AuthorizedUser(user) => user.access_token().await,
            GoogleAuth::Static(token) => Ok(token.clone()),
        }
    }
}

/// Escape a value for a Drive `q` string literal
pub fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<FileEntry>,
}

#[derive(Deserialize)]
struct FileEntry {
    id: String,
}

/// A file stored in the Drive folder
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FolderPage {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

pub struct DriveUploader {
    client: Client,
    auth: GoogleAuth,
    api_base: String,
    folder_id: String,
}

impl DriveUploader {
    /// Authenticate and resolve the target folder, creating it by name if needed
    pub async fn connect(config: &DriveConfig, auth: GoogleAuth) -> Result<Self> {
        let mut uploader = Self {
            client: Client::new(),
            auth,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            folder_id: String::new(),
        };

        uploader.folder_id = match config.folder_id.as_deref().filter(|f| !f.is_empty()) {
            Some(id) => id.to_string(),
            None => uploader.ensure_folder(&config.folder_name).await?,
        };

        log::info!("Drive folder: {}", uploader.folder_id());
        Ok(uploader)
    }

    pub fn folder_id(&self) -> &str {
        &self.folder_id
    }

    async fn list(&self, query: &str) -> Result<Vec<FileEntry>> {
        let token = self.auth.token(DRIVE_SCOPE).await?;
        let resp = self
            .client
            .get(format!("{}/drive/v3/files", self.api_base))
            .bearer_auth(token)
            .query(&[("q", query), ("fields", "files(id)"), ("spaces", "drive")])
            .send()
            .await
            .context("Drive files.list request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Drive files.list returned {}: {}", status, body));
        }

        let list: FileList = resp.json().await.context("Invalid files.list response")?;
        Ok(list.files)
    }

    /// Id of the folder named `name`, created when missing
    pub async fn ensure_folder(&self, name: &str) -> Result<String> {
        let query = format!(
            "name='{}' and mimeType='{}' and trashed=false",
            escape_query_value(name),
            FOLDER_MIME_TYPE
        );
        if let Some(existing) = self.list(&query).await?.into_iter().next() {
            return Ok(existing.id);
        }

        let token = self.auth.token(DRIVE_SCOPE).await?;
        let resp = self
            .client
            .post(format!("{}/drive/v3/files", self.api_base))
            .bearer_auth(token)
            .query(&[("fields", "id")])
            .json(&json!({"name": name, "mimeType": FOLDER_MIME_TYPE}))
            .send()
            .await
            .context("Drive folder create request failed")?;

        if !resp.status().is_success() {
            return Err(anyhow!("Drive folder create returned {}", resp.status()));
        }

        let created: FileEntry = resp.json().await.context("Invalid folder create response")?;
        log::info!("Created Drive folder '{}' ({})", name, created.id);
        Ok(created.id)
    }

    /// Whether a non-trashed file called `name` is already in the folder
    pub async fn exists(&self, name: &str) -> Result<bool> {
        let query = format!(
            "name='{}' and '{}' in parents and trashed=false",
            escape_query_value(name),
            escape_query_value(&self.folder_id)
        );
        Ok(!self.list(&query).await?.is_empty())
    }

    /// Upload `local_path` into the folder under `name`
    pub async fn store(&self, local_path: &Path, name: &str) -> Result<UploadRecord> {
        let bytes = tokio::fs::read(local_path)
            .await
            .with_context(|| format!("Failed to read {}", local_path.display()))?;

        let metadata = json!({"name": name, "parents": [self.folder_id]});
        let body = multipart_related_body(&metadata, "video/mp4", &bytes);

        let token = self.auth.token(DRIVE_SCOPE).await?;
        let resp = self
            .client
            .post(format!("{}/upload/drive/v3/files", self.api_base))
            .bearer_auth(token)
            .query(&[("uploadType", "multipart"), ("fields", "id,name,webViewLink")])
            .header(
                "Content-Type",
                format!("multipart/related; boundary={}", MULTIPART_BOUNDARY),
            )
            .body(body)
            .send()
            .await
            .context("Drive upload request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Upload request failed with status {}: {}", status, text));
        }

        let record: UploadRecord = resp.json().await.context("Invalid upload response")?;
        log::info!("Uploaded {} as {}", local_path.display(), record.remote_id);
        Ok(record)
    }

    /// Every non-trashed file in the folder, following page tokens
    pub async fn list_folder(&self) -> Result<Vec<DriveFile>> {
        let query = format!(
            "'{}' in parents and trashed=false",
            escape_query_value(&self.folder_id)
        );
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let token = self.auth.token(DRIVE_SCOPE).await?;
            let mut request = self
                .client
                .get(format!("{}/drive/v3/files", self.api_base))
                .bearer_auth(token)
                .query(&[
                    ("q", query.as_str()),
                    ("fields", "nextPageToken,files(id,name)"),
                    ("spaces", "drive"),
                    ("pageSize", "1000"),
                ]);
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page.as_str())]);
            }

            let resp = request.send().await.context("Drive folder listing failed")?;
            if !resp.status().is_success() {
                return Err(anyhow!("Drive folder listing returned {}", resp.status()));
            }

            let page: FolderPage = resp.json().await.context("Invalid files.list response")?;
            files.extend(page.files);
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        Ok(files)
    }

    /// Stream a file's content to `dest`. A partial file is removed on failure.
    pub async fn download(&self, file_id: &str, dest: &Path) -> Result<()> {
        let result = self.download_to(file_id, dest).await;
        if result.is_err() && dest.exists() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }

    async fn download_to(&self, file_id: &str, dest: &Path) -> Result<()> {
        let token = self.auth.token(DRIVE_SCOPE).await?;
        let mut resp = self
            .client
            .get(format!("{}/drive/v3/files/{}", self.api_base, file_id))
            .bearer_auth(token)
            .query(&[("alt", "media")])
            .send()
            .await
            .context("Drive download request failed")?;

        if !resp.status().is_success() {
            return Err(anyhow!("Drive download of {} returned {}", file_id, resp.status()));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;
        while let Some(chunk) = resp.chunk().await.context("Drive download interrupted")? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    pub async fn delete(&self, file_id: &str) -> Result<()> {
        let token = self.auth.token(DRIVE_SCOPE).await?;
        let resp = self
            .client
            .delete(format!("{}/drive/v3/files/{}", self.api_base, file_id))
            .bearer_auth(token)
            .send()
            .await
            .context("Drive delete request failed")?;

        if !resp.status().is_success() {
            return Err(anyhow!("Drive delete of {} returned {}", file_id, resp.status()));
        }
        Ok(())
    }
}

/// `multipart/related` body with JSON metadata followed by the media bytes
pub fn multipart_related_body(metadata: &serde_json::Value, mime_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 512);
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{meta}\r\n--{b}\r\nContent-Type: {mime}\r\n\r\n",
            b = MULTIPART_BOUNDARY,
            meta = metadata,
            mime = mime_type
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer, folder_id: Option<&str>) -> DriveConfig {
        DriveConfig {
            enabled: true,
            folder_name: "Shorts".to_string(),
            folder_id: folder_id.map(String::from),
            api_base: server.uri(),
            ..DriveConfig::default()
        }
    }

    fn auth() -> GoogleAuth {
        GoogleAuth::Static("test-token".to_string())
    }

    #[test]
    fn test_escape_query_value() {
        assert_eq!(escape_query_value("Don't stop"), "Don\\'t stop");
        assert_eq!(escape_query_value("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_multipart_body_layout() {
        let body = multipart_related_body(&json!({"name": "a.mp4"}), "video/mp4", b"DATA");
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("--clipshaper_upload_boundary\r\n"));
        assert!(text.contains("{\"name\":\"a.mp4\"}"));
        assert!(text.contains("Content-Type: video/mp4\r\n\r\nDATA\r\n"));
        assert!(text.ends_with("--clipshaper_upload_boundary--\r\n"));
    }

    #[test]
    fn test_youtube_credentials_lookup() {
        let token = GoogleAuth::youtube_from_lookup("YT_TOKEN", |key| {
            (key == "YOUTUBE_ACCESS_TOKEN").then(|| " ya29.token ".to_string())
        })
        .unwrap();
        assert!(matches!(token, GoogleAuth::Static(t) if t == "ya29.token"));

        let user = GoogleAuth::youtube_from_lookup("CATS_YT_TOKEN", |key| {
            (key == "CATS_YT_TOKEN").then(|| {
                r#"{"client_id": "id", "client_secret": "secret", "refresh_token": "r"}"#
                    .to_string()
            })
        })
        .unwrap();
        assert!(matches!(user, GoogleAuth::AuthorizedUser(u) if u.token_uri == DEFAULT_TOKEN_URI));

        assert!(GoogleAuth::youtube_from_lookup("YT_TOKEN", |_| None).is_err());
        assert!(GoogleAuth::from_authorized_user_json("{\"client_id\": \"x\"}").is_err());
    }

    #[tokio::test]
    async fn test_authorized_user_refreshes_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "fresh", "expires_in": 3599})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let auth = GoogleAuth::from_authorized_user_json(
            &json!({
                "client_id": "id",
                "client_secret": "secret",
                "refresh_token": "r-1",
                "token_uri": format!("{}/token", server.uri()),
            })
            .to_string(),
        )
        .unwrap();
        assert_eq!(auth.token("scope").await.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn test_list_folder_follows_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{"id": "b", "name": "Second.mp4"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("q", "'f1' in parents and trashed=false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{"id": "a", "name": "First.mp4"}],
                "nextPageToken": "p2"
            })))
            .mount(&server)
            .await;

        let uploader = DriveUploader::connect(&config(&server, Some("f1")), auth())
            .await
            .unwrap();
        let files = uploader.list_folder().await.unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["First.mp4", "Second.mp4"]);
    }

    #[tokio::test]
    async fn test_download_and_delete() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/file-1"))
            .and(query_param("alt", "media"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"video bytes".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/drive/v3/files/file-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let uploader = DriveUploader::connect(&config(&server, Some("f1")), auth())
            .await
            .unwrap();

        let dest = dir.path().join("clip.mp4");
        uploader.download("file-1", &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"video bytes");

        let missing = dir.path().join("gone.mp4");
        assert!(uploader.download("gone", &missing).await.is_err());
        assert!(!missing.exists());

        uploader.delete("file-1").await.unwrap();
    }

    #[test]
    fn test_missing_credentials_is_an_error() {
        assert!(GoogleAuth::from_sources(None, None).is_err());
        assert!(GoogleAuth::from_sources(Some("  "), Some("")).is_err());
        assert!(GoogleAuth::from_sources(Some("{not json"), None).is_err());
    }

    #[tokio::test]
    async fn test_connect_reuses_existing_folder() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(header("Authorization", "Bearer test-token"))
            .and(query_param(
                "q",
                "name='Shorts' and mimeType='application/vnd.google-apps.folder' and trashed=false",
            ))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"files": [{"id": "folder-1"}]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let uploader = DriveUploader::connect(&config(&server, None), auth())
            .await
            .unwrap();
        assert_eq!(uploader.folder_id(), "folder-1");
    }

    #[tokio::test]
    async fn test_connect_creates_missing_folder() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"files": []})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/drive/v3/files"))
            .and(body_string_contains(FOLDER_MIME_TYPE))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "new-folder"})))
            .expect(1)
            .mount(&server)
            .await;

        let uploader = DriveUploader::connect(&config(&server, None), auth())
            .await
            .unwrap();
        assert_eq!(uploader.folder_id(), "new-folder");
    }

    #[tokio::test]
    async fn test_exists_escapes_quotes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param(
                "q",
                "name='Cat\\'s jump.mp4' and 'f1' in parents and trashed=false",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"files": [{"id": "x"}]})))
            .mount(&server)
            .await;

        let uploader = DriveUploader::connect(&config(&server, Some("f1")), auth())
            .await
            .unwrap();
        assert!(uploader.exists("Cat's jump.mp4").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_uploads_multipart() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/drive/v3/files"))
            .and(query_param("uploadType", "multipart"))
            .and(header(
                "Content-Type",
                "multipart/related; boundary=clipshaper_upload_boundary",
            ))
            .and(body_string_contains("\"parents\":[\"f1\"]"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "file-9",
                "name": "clip.mp4",
                "webViewLink": "https://drive.google.com/file/d/file-9/view"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("clip.mp4");
        std::fs::write(&local, b"fake video").unwrap();

        let uploader = DriveUploader::connect(&config(&server, Some("f1")), auth())
            .await
            .unwrap();
        let record = uploader.store(&local, "clip.mp4").await.unwrap();
        assert_eq!(record.remote_id, "file-9");
        assert_eq!(record.name, "clip.mp4");
        assert!(record.web_view_link.is_some());
    }

    #[tokio::test]
    async fn test_store_reports_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("clip.mp4");
        std::fs::write(&local, b"fake video").unwrap();

        let uploader = DriveUploader::connect(&config(&server, Some("f1")), auth())
            .await
            .unwrap();
        let err = uploader.store(&local, "clip.mp4").await.unwrap_err();
        assert!(err.to_string().contains("403"));
    }
}
