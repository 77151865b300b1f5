//! Candidate discovery
//! Finds clip URLs on Reddit listings or through yt-dlp YouTube search

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::process::Stdio;
use tokio::process::Command;

use crate::config::{PipelineConfig, SourceKind};
use crate::types::Candidate;

/// Hosts yt-dlp can usually pull a video from
pub const VIDEO_DOMAINS: &[&str] = &[
    "v.redd.it",
    "youtube.com",
    "youtu.be",
    "streamable.com",
    "gfycat.com",
    "imgur.com",
    "tiktok.com",
    "instagram.com",
    "twitter.com",
    "x.com",
    "twitch.tv",
    "dailymotion.com",
    "rumble.com",
];

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

/// What to look for
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCriteria {
    /// Subreddit name or search terms
    pub query: String,
    pub limit: usize,
}

impl SearchCriteria {
    pub fn new(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            limit,
        }
    }
}

pub enum CandidateSource {
    Reddit(RedditSource),
    YouTubeSearch(YouTubeSearch),
}

impl CandidateSource {
    pub fn from_config(config: &PipelineConfig) -> Self {
        match config.source {
            SourceKind::Reddit => CandidateSource::Reddit(RedditSource::new(
                &config.reddit_base_url,
                &config.time_filter,
            )),
            SourceKind::Youtube => CandidateSource::YouTubeSearch(YouTubeSearch),
        }
    }

    pub async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<Candidate>> {
        match self {
            CandidateSource::Reddit(source) => source.search(criteria).await,
            CandidateSource::YouTubeSearch(source) => source.search(criteria).await,
        }
    }
}

/// True when `url` points at one of the known video hosts
pub fn is_video_host(url: &str) -> bool {
    let host = match reqwest::Url::parse(url) {
        Ok(parsed) => match parsed.host_str() {
            Some(h) => h.to_ascii_lowercase(),
            None => return false,
        },
        Err(_) => return false,
    };
    VIDEO_DOMAINS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
}

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Deserialize)]
struct Child {
    data: Post,
}

#[derive(Deserialize)]
struct Post {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    permalink: String,
    #[serde(default)]
    is_video: bool,
    #[serde(default)]
    stickied: bool,
    #[serde(default)]
    subreddit: String,
    #[serde(default)]
    media: Option<Media>,
}

#[derive(Deserialize)]
struct Media {
    reddit_video: Option<RedditVideo>,
}

#[derive(Deserialize)]
struct RedditVideo {
    duration: Option<f64>,
}

/// Top posts of a subreddit through the public JSON listing
pub struct RedditSource {
    client: Client,
    base_url: String,
    time_filter: String,
}

impl RedditSource {
    pub fn new(base_url: &str, time_filter: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            time_filter: time_filter.to_string(),
        }
    }

    pub async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<Candidate>> {
        let subreddit = criteria.query.trim().trim_start_matches("r/");
        let url = format!("{}/r/{}/top.json", self.base_url, subreddit);
        let limit = criteria.limit.to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("t", self.time_filter.as_str()),
                ("limit", limit.as_str()),
            ])
            .header("User-Agent", BROWSER_USER_AGENT)
            .send()
            .await
            .with_context(|| format!("Failed to fetch r/{}", subreddit))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Reddit returned {} for r/{}",
                response.status(),
                subreddit
            ));
        }

        let body = response.text().await?;
        parse_listing(&body)
    }
}

/// Turn a Reddit listing into video candidates, dropping stickied and non-video posts
pub fn parse_listing(body: &str) -> Result<Vec<Candidate>> {
    let listing: Listing = serde_json::from_str(body).context("Failed to parse Reddit listing")?;

    let candidates = listing
        .data
        .children
        .into_iter()
        .map(|c| c.data)
        .filter(|p| !p.stickied)
        .filter(|p| p.is_video || is_video_host(&p.url))
        .map(|p| {
            let duration_hint = p
                .media
                .and_then(|m| m.reddit_video)
                .and_then(|v| v.duration);
            // v.redd.it links need the post page for yt-dlp to find the audio track
            let url = if p.is_video && !p.permalink.is_empty() {
                format!("https://www.reddit.com{}", p.permalink)
            } else {
                p.url
            };
            Candidate {
                url,
                text: p.title,
                duration_hint,
                source: format!("r/{}", p.subreddit),
            }
        })
        .collect();

    Ok(candidates)
}

#[derive(Deserialize)]
struct SearchResult {
    #[serde(default)]
    entries: Vec<SearchEntry>,
}

#[derive(Deserialize)]
struct SearchEntry {
    id: Option<String>,
    url: Option<String>,
    #[serde(default)]
    title: String,
    duration: Option<f64>,
}

/// YouTube search through `yt-dlp --flat-playlist`
pub struct YouTubeSearch;

impl YouTubeSearch {
    pub async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<Candidate>> {
        let target = format!("ytsearch{}:{}", criteria.limit, criteria.query);
        let output = Command::new("yt-dlp")
            .args(["--flat-playlist", "-J", "--no-warnings", target.as_str()])
            .stdin(Stdio::null())
            .output()
            .await
            .context("Failed to execute yt-dlp")?;

        if !output.status.success() {
            return Err(anyhow!(
                "yt-dlp search failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        parse_search_results(&String::from_utf8_lossy(&output.stdout))
    }
}

pub fn parse_search_results(json: &str) -> Result<Vec<Candidate>> {
    let result: SearchResult =
        serde_json::from_str(json).context("Failed to parse yt-dlp search output")?;

    Ok(result
        .entries
        .into_iter()
        .filter_map(|e| {
            let url = match (e.url, e.id) {
                (Some(url), _) if url.starts_with("http") => url,
                (_, Some(id)) => format!("https://www.youtube.com/watch?v={}", id),
                _ => return None,
            };
            Some(Candidate {
                url,
                text: e.title,
                duration_hint: e.duration,
                source: "youtube".to_string(),
            })
        })
        .collect())
}
