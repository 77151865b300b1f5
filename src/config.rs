//! Configuration management for clipshaper
//! Handles loading and saving settings to settings.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::shorts::{BackgroundStyle, CompositionMode};

/// How the audio track is carried into the vertical output
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AudioHandling {
    /// Re-encode to AAC at `audio_bitrate`
    #[default]
    Aac,
    /// Pass the source audio stream through untouched
    Copy,
    /// Resample by `factor` and restore the tempo, so pitch moves while
    /// duration stays. Always re-encodes to AAC.
    PitchShift { factor: f64 },
}

/// Pitch factors drawn per clip when `pitch_variation` is on
pub const PITCH_FACTORS: [f64; 2] = [0.99, 1.01];

/// Caption burned into the top of the frame
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HeadlineConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_fontfile")]
    pub fontfile: Option<String>,
    #[serde(default = "default_font_size")]
    pub font_size: u32,
    /// Distance of the text from the top edge in pixels
    #[serde(default = "default_headline_y")]
    pub y: u32,
    #[serde(default = "default_true")]
    pub boxed: bool,
}

fn default_fontfile() -> Option<String> {
    Some("/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf".to_string())
}

fn default_font_size() -> u32 {
    60
}

fn default_headline_y() -> u32 {
    150
}

impl Default for HeadlineConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fontfile: default_fontfile(),
            font_size: default_font_size(),
            y: default_headline_y(),
            boxed: true,
        }
    }
}

/// Shorts transformation configuration
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ShortsConfig {
    /// Composition mode, "auto" picks from the source aspect ratio
    #[serde(default)]
    pub mode: CompositionMode,
    /// Background used when "auto" meets a non-portrait source
    #[serde(default)]
    pub background: BackgroundStyle,
    /// Allowed deviation from 9:16 before a source counts as already portrait
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Gaussian blur sigma for the background layer (default 20)
    #[serde(default = "default_blur_sigma")]
    pub blur_sigma: f32,
    /// x264 constant rate factor (default 23)
    #[serde(default = "default_crf")]
    pub crf: u8,
    /// x264 preset (default "fast")
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default)]
    pub audio: AudioHandling,
    /// Draw a pitch shift from `PITCH_FACTORS` for every clip
    #[serde(default)]
    pub pitch_variation: bool,
    /// Audio bitrate when re-encoding (default "128k")
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    /// Kill ffmpeg after this many seconds, null disables the limit
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub headline: HeadlineConfig,
}

fn default_tolerance() -> f64 {
    0.02
}

fn default_blur_sigma() -> f32 {
    20.0
}

fn default_crf() -> u8 {
    23
}

fn default_preset() -> String {
    "fast".to_string()
}

fn default_audio_bitrate() -> String {
    "128k".to_string()
}

fn default_timeout_secs() -> Option<u64> {
    Some(600)
}

impl Default for ShortsConfig {
    fn default() -> Self {
        Self {
            mode: CompositionMode::Auto,
            background: BackgroundStyle::Blur,
            tolerance: default_tolerance(),
            blur_sigma: default_blur_sigma(),
            crf: default_crf(),
            preset: default_preset(),
            audio: AudioHandling::Aac,
            pitch_variation: false,
            audio_bitrate: default_audio_bitrate(),
            timeout_secs: default_timeout_secs(),
            headline: HeadlineConfig::default(),
        }
    }
}

/// Backoff settings for the downloader
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// yt-dlp settings
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DownloaderConfig {
    #[serde(default = "default_format")]
    pub format: String,
    /// Directory downloads land in before they are reformatted
    #[serde(default = "default_download_dir")]
    pub download_dir: String,
    #[serde(default)]
    pub cookies_path: Option<String>,
    #[serde(default)]
    pub force_ipv4: bool,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_format() -> String {
    "bestvideo[height<=1080]+bestaudio/best".to_string()
}

fn default_download_dir() -> String {
    dirs::cache_dir()
        .map(|d| d.join("clipshaper").join("downloads"))
        .unwrap_or_else(|| Path::new("./downloads").to_path_buf())
        .to_string_lossy()
        .to_string()
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            download_dir: default_download_dir(),
            cookies_path: None,
            force_ipv4: false,
            retry: RetryConfig::default(),
        }
    }
}

/// OpenRouter captioning settings
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OpenRouterConfig {
    /// API keys, rotated on 401/402/429
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_openrouter_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Prompt for captions; `{text}` is replaced by the candidate text
    #[serde(default = "default_caption_prompt")]
    pub caption_prompt: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Prompt for relevance scoring; `{text}` is replaced by the candidate text
    #[serde(default = "default_score_prompt")]
    pub score_prompt: String,
    #[serde(default = "default_caption_max_chars")]
    pub caption_max_chars: usize,
    /// Site URL sent as `HTTP-Referer` for OpenRouter app attribution
    #[serde(default)]
    pub referer: Option<String>,
}

fn default_model() -> String {
    "google/gemma-2-9b-it".to_string()
}

fn default_openrouter_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_max_tokens() -> u32 {
    100
}

fn default_temperature() -> f32 {
    0.7
}

fn default_caption_prompt() -> String {
    "Create a short, engaging TikTok caption (under 100 chars) from: {text}".to_string()
}

fn default_score_prompt() -> String {
    "Score this post from 1 to 10 for how likely it is to go viral as a short video. \
     Only output a number. Post: \"{text}\""
        .to_string()
}

fn default_caption_max_chars() -> usize {
    100
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            model: default_model(),
            base_url: default_openrouter_base_url(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            caption_prompt: default_caption_prompt(),
            system_prompt: None,
            score_prompt: default_score_prompt(),
            caption_max_chars: default_caption_max_chars(),
            referer: None,
        }
    }
}

/// Google Drive upload settings
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DriveConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Folder looked up (or created) by name when `folder_id` is not set
    #[serde(default = "default_folder_name")]
    pub folder_name: String,
    #[serde(default)]
    pub folder_id: Option<String>,
    /// Skip the upload when a file with the same name already exists
    #[serde(default = "default_true")]
    pub skip_existing: bool,
    #[serde(default = "default_google_api_base")]
    pub api_base: String,
}

fn default_folder_name() -> String {
    "Shorts".to_string()
}

fn default_true() -> bool {
    true
}

fn default_google_api_base() -> String {
    "https://www.googleapis.com".to_string()
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            folder_name: default_folder_name(),
            folder_id: None,
            skip_existing: true,
            api_base: default_google_api_base(),
        }
    }
}

/// Google Sheets upload log settings
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SheetsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub sheet_id: String,
    #[serde(default = "default_tab_name")]
    pub tab_name: String,
    #[serde(default = "default_sheets_api_base")]
    pub api_base: String,
}

fn default_tab_name() -> String {
    "Sheet1".to_string()
}

fn default_sheets_api_base() -> String {
    "https://sheets.googleapis.com".to_string()
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sheet_id: String::new(),
            tab_name: default_tab_name(),
            api_base: default_sheets_api_base(),
        }
    }
}

/// YouTube Shorts publishing from the Drive folder
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct YouTubeConfig {
    /// Environment variable holding the channel's authorized-user OAuth JSON
    #[serde(default = "default_youtube_token_env")]
    pub token_env: String,
    #[serde(default = "default_title_suffix")]
    pub title_suffix: String,
    #[serde(default = "default_description")]
    pub description: String,
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    /// public, unlisted or private
    #[serde(default = "default_privacy_status")]
    pub privacy_status: String,
    /// Remove the Drive copy once YouTube accepted the upload
    #[serde(default = "default_true")]
    pub delete_from_drive: bool,
    #[serde(default = "default_google_api_base")]
    pub api_base: String,
}

fn default_youtube_token_env() -> String {
    "YT_TOKEN".to_string()
}

fn default_title_suffix() -> String {
    "#shorts".to_string()
}

fn default_description() -> String {
    "Enjoy! #Shorts".to_string()
}

fn default_tags() -> Vec<String> {
    vec!["Shorts".to_string()]
}

fn default_privacy_status() -> String {
    "public".to_string()
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            token_env: default_youtube_token_env(),
            title_suffix: default_title_suffix(),
            description: default_description(),
            tags: default_tags(),
            category_id: None,
            privacy_status: default_privacy_status(),
            delete_from_drive: true,
            api_base: default_google_api_base(),
        }
    }
}

/// Where pipeline candidates come from
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Reddit,
    Youtube,
}

/// Pipeline run settings
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    #[serde(default)]
    pub source: SourceKind,
    /// Subreddit name for reddit, search terms for youtube
    #[serde(default = "default_query")]
    pub query: String,
    /// Second subreddit or search used when the first yields too few clips
    #[serde(default)]
    pub fallback_query: Option<String>,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    /// Reddit listing window: hour, day, week, month, year, all
    #[serde(default = "default_time_filter")]
    pub time_filter: String,
    #[serde(default = "default_reddit_base_url")]
    pub reddit_base_url: String,
    /// Stop after this many clips were produced
    #[serde(default = "default_target_count")]
    pub target_count: usize,
    #[serde(default = "default_min_duration")]
    pub min_duration: f64,
    #[serde(default = "default_max_duration")]
    pub max_duration: f64,
    #[serde(default = "default_true")]
    pub require_audio: bool,
    /// Ask the LLM to score candidates and process the best first
    #[serde(default)]
    pub rank_by_relevance: bool,
    /// Retry with the simple scale-and-crop graph if a composite graph fails
    #[serde(default = "default_true")]
    pub fallback_to_simple: bool,
}

fn default_query() -> String {
    "cats".to_string()
}

fn default_search_limit() -> usize {
    50
}

fn default_time_filter() -> String {
    "day".to_string()
}

fn default_reddit_base_url() -> String {
    "https://www.reddit.com".to_string()
}

fn default_target_count() -> usize {
    5
}

fn default_min_duration() -> f64 {
    5.0
}

fn default_max_duration() -> f64 {
    180.0
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Reddit,
            query: default_query(),
            fallback_query: None,
            search_limit: default_search_limit(),
            time_filter: default_time_filter(),
            reddit_base_url: default_reddit_base_url(),
            target_count: default_target_count(),
            min_duration: default_min_duration(),
            max_duration: default_max_duration(),
            require_audio: true,
            rank_by_relevance: false,
            fallback_to_simple: true,
        }
    }
}

/// Application configuration stored in settings.json
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Where finished shorts are kept when Drive upload is disabled
    #[serde(default = "default_output_dir")]
    pub default_output_dir: String,
    /// Path to a Google service account JSON key used by Drive and Sheets
    #[serde(default)]
    pub google_service_account: Option<String>,
    #[serde(default)]
    pub shorts_config: ShortsConfig,
    #[serde(default)]
    pub downloader: DownloaderConfig,
    #[serde(default)]
    pub openrouter: OpenRouterConfig,
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default)]
    pub sheets: SheetsConfig,
    #[serde(default)]
    pub youtube: YouTubeConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

fn default_output_dir() -> String {
    "./output".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_output_dir: default_output_dir(),
            google_service_account: None,
            shorts_config: ShortsConfig::default(),
            downloader: DownloaderConfig::default(),
            openrouter: OpenRouterConfig::default(),
            drive: DriveConfig::default(),
            sheets: SheetsConfig::default(),
            youtube: YouTubeConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file not found: {}. Run `clipshaper init` to create one",
                path.display()
            ));
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Create a default configuration file
    pub fn create_default(path: &Path) -> Result<()> {
        AppConfig::default().save(path)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Fill secrets from the environment.
    ///
    /// `OPENROUTER_API_KEY` is added to the key list, `GOOGLE_APPLICATION_CREDENTIALS`
    /// sets the service account path when the file does not name one.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENROUTER_API_KEY").filter(|k| !k.trim().is_empty()) {
            if !self.openrouter.api_keys.contains(&key) {
                self.openrouter.api_keys.insert(0, key);
            }
        }

        if self.google_service_account.is_none() {
            self.google_service_account =
                lookup("GOOGLE_APPLICATION_CREDENTIALS").filter(|p| !p.trim().is_empty());
        }
    }

    /// Reject values that would produce broken ffmpeg invocations
    pub fn validate(&self) -> Result<()> {
        let shorts = &self.shorts_config;
        if !(shorts.tolerance > 0.0 && shorts.tolerance < 1.0) {
            anyhow::bail!("shorts_config.tolerance must be between 0 and 1");
        }
        if shorts.crf > 51 {
            anyhow::bail!("shorts_config.crf must be 51 or lower");
        }
        if shorts.blur_sigma <= 0.0 {
            anyhow::bail!("shorts_config.blur_sigma must be positive");
        }
        if let AudioHandling::PitchShift { factor } = shorts.audio {
            if !(factor > 0.5 && factor < 2.0) {
                anyhow::bail!("shorts_config.audio pitch-shift factor must be between 0.5 and 2");
            }
        }
        if self.pipeline.min_duration > self.pipeline.max_duration {
            anyhow::bail!("pipeline.min_duration is larger than pipeline.max_duration");
        }
        if self.sheets.enabled && self.sheets.sheet_id.trim().is_empty() {
            anyhow::bail!("sheets.enabled is set but sheets.sheet_id is empty");
        }
        Ok(())
    }

    /// Ensure output directory exists
    pub fn ensure_output_dir(&self) -> Result<()> {
        if !Path::new(&self.default_output_dir).exists() {
            fs::create_dir_all(&self.default_output_dir)?;
        }
        Ok(())
    }
}
