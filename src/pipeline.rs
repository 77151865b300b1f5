//! End-to-end run: find candidates, download, filter, reformat, caption, upload.
//!
//! Candidates are handled one at a time. A failure on one candidate is logged
//! and the run moves on to the next.

use anyhow::Result;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::ai::{sanitize_filename, Captioner};
use crate::config::{AppConfig, PipelineConfig, ShortsConfig};
use crate::download::{remove_download, Downloader};
use crate::drive::{DriveUploader, GoogleAuth};
use crate::error::ReformatError;
use crate::filtergraph::GraphError;
use crate::sheets::{SheetRow, SheetsLogger};
use crate::shorts::{self, CompositionMode, ReformatPlan};
use crate::sources::{CandidateSource, SearchCriteria};
use crate::types::{Candidate, DownloadedClip, UploadRecord};

/// Duration and audio requirements a download must meet
#[derive(Debug, Clone, PartialEq)]
pub struct ClipFilter {
    pub min_duration: f64,
    pub max_duration: f64,
    pub require_audio: bool,
}

impl ClipFilter {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            min_duration: config.min_duration,
            max_duration: config.max_duration,
            require_audio: config.require_audio,
        }
    }

    fn duration_ok(&self, seconds: f64) -> bool {
        seconds >= self.min_duration && seconds <= self.max_duration
    }

    /// Reject a candidate early when the listing already reports its length
    pub fn precheck(&self, candidate: &Candidate) -> Option<String> {
        match candidate.duration_hint {
            Some(d) if !self.duration_ok(d) => Some(format!("listed duration {:.1}s out of range", d)),
            _ => None,
        }
    }

    /// Reason the clip is unusable, or None when it passes
    pub fn check(&self, clip: &DownloadedClip) -> Option<String> {
        if !self.duration_ok(clip.duration_seconds) {
            return Some(format!(
                "duration {:.1}s outside {:.0}-{:.0}s",
                clip.duration_seconds, self.min_duration, self.max_duration
            ));
        }
        if self.require_audio && !clip.has_audio {
            return Some("no audio track".to_string());
        }
        None
    }
}

/// File name for a finished short, derived from its caption
pub fn output_file_name(caption: &str, index: usize) -> String {
    let stem = sanitize_filename(caption);
    if stem.is_empty() {
        format!("clip_{}.mp4", index)
    } else {
        format!("{}.mp4", stem)
    }
}

/// Stable sort of candidates by descending score
pub fn order_by_scores(candidates: Vec<Candidate>, scores: &[f64]) -> Vec<Candidate> {
    let mut paired: Vec<(f64, Candidate)> = scores.iter().copied().zip(candidates).collect();
    paired.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    paired.into_iter().map(|(_, c)| c).collect()
}

fn with_optional_headline(
    plan: ReformatPlan,
    headline: Option<&str>,
    config: &ShortsConfig,
) -> ReformatPlan {
    match headline {
        Some(text) => plan.with_headline(text, &config.headline),
        None => plan,
    }
}

/// Only an ffmpeg failure on a composite graph is worth a simple retry
pub fn should_fall_back(plan: &ReformatPlan, err: &ReformatError) -> bool {
    plan.mode.is_composite() && matches!(err, ReformatError::Transcode { .. })
}

/// Scale-and-crop plan for the already probed source of `plan`
pub fn fallback_plan(
    plan: &ReformatPlan,
    config: &ShortsConfig,
    headline: Option<&str>,
) -> Result<(ReformatPlan, ShortsConfig), GraphError> {
    let simple = ShortsConfig {
        mode: CompositionMode::Simple,
        ..config.clone()
    };
    let retry = shorts::plan_reformat(plan.dimensions, &simple)?;
    Ok((with_optional_headline(retry, headline, &simple), simple))
}

/// Reformat, retrying once with the plain scale-and-crop graph when a
/// composite graph makes ffmpeg fail.
///
/// Per-clip random choices are drawn once, so the plan checked for the
/// fallback is the plan that ran.
pub async fn reformat_with_fallback(
    input: &Path,
    output: &Path,
    config: &ShortsConfig,
    headline: Option<&str>,
    allow_fallback: bool,
) -> Result<PathBuf, ReformatError> {
    let config = shorts::draw_per_clip(config, &mut rand::thread_rng());
    let plan = with_optional_headline(shorts::inspect(input, &config).await?, headline, &config);

    match shorts::transform_with_plan(input, output, &plan, &config).await {
        Err(err) if allow_fallback && should_fall_back(&plan, &err) => {
            log::warn!("Mode {} failed, retrying with simple: {}", plan.mode, err);
            let (retry, simple) = fallback_plan(&plan, &config, headline)?;
            shorts::transform_with_plan(input, output, &retry, &simple).await
        }
        other => other,
    }
}

/// A short that made it through the whole pipeline
#[derive(Debug, Clone)]
pub struct ProducedClip {
    pub source_url: String,
    pub caption: String,
    pub file_name: String,
    /// Kept on disk when Drive upload is disabled
    pub local_path: Option<PathBuf>,
    pub upload: Option<UploadRecord>,
}

enum Outcome {
    Produced(ProducedClip),
    Skipped(String),
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub considered: usize,
    pub skipped: usize,
    pub failed: usize,
    pub produced: Vec<ProducedClip>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} produced, {} skipped, {} failed ({} candidates considered)",
            self.produced.len(),
            self.skipped,
            self.failed,
            self.considered
        )
    }
}

pub struct Pipeline {
    config: AppConfig,
    source: CandidateSource,
    downloader: Downloader,
    captioner: Captioner,
    filter: ClipFilter,
    drive: Option<DriveUploader>,
    sheets: Option<SheetsLogger>,
}

impl Pipeline {
    /// Wire up every collaborator from settings; Drive and Sheets connect here
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let needs_google = config.drive.enabled || config.sheets.enabled;
        let auth = if needs_google {
            Some(GoogleAuth::from_env(config.google_service_account.as_deref())?)
        } else {
            None
        };

        let drive = match (&auth, config.drive.enabled) {
            (Some(auth), true) => Some(DriveUploader::connect(&config.drive, auth.clone()).await?),
            _ => None,
        };
        let sheets = match (&auth, config.sheets.enabled) {
            (Some(auth), true) => Some(SheetsLogger::new(&config.sheets, auth.clone())),
            _ => None,
        };

        if drive.is_none() {
            config.ensure_output_dir()?;
        }

        Ok(Self {
            source: CandidateSource::from_config(&config.pipeline),
            downloader: Downloader::new(config.downloader.clone()),
            captioner: Captioner::new(&config.openrouter),
            filter: ClipFilter::from_config(&config.pipeline),
            drive,
            sheets,
            config,
        })
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let target = self.config.pipeline.target_count;

        let mut queries = vec![self.config.pipeline.query.clone()];
        if let Some(fallback) = self.config.pipeline.fallback_query.clone() {
            queries.push(fallback);
        }

        for query in queries {
            if summary.produced.len() >= target {
                break;
            }

            println!("🔍 Searching {}...", query);
            let candidates = match self.gather_candidates(&query).await {
                Ok(c) => c,
                Err(e) => {
                    log::warn!("Search for '{}' failed: {}", query, e);
                    continue;
                }
            };
            println!("   Found {} candidates", candidates.len());

            for candidate in candidates {
                if summary.produced.len() >= target {
                    break;
                }
                summary.considered += 1;

                let index = summary.produced.len() + 1;
                println!("\n🎬 [{}/{}] {}", index, target, truncate(&candidate.text, 60));

                match self.process(&candidate, index).await {
                    Ok(Outcome::Produced(clip)) => {
                        println!("✅ {}", clip.file_name);
                        summary.produced.push(clip);
                    }
                    Ok(Outcome::Skipped(reason)) => {
                        println!("⏭️  Skipped: {}", reason);
                        summary.skipped += 1;
                    }
                    Err(e) => {
                        log::warn!("Failed to process {}: {:#}", candidate.url, e);
                        println!("⚠️  Failed: {}", e);
                        summary.failed += 1;
                    }
                }
            }
        }

        Ok(summary)
    }

    async fn gather_candidates(&self, query: &str) -> Result<Vec<Candidate>> {
        let criteria = SearchCriteria::new(query, self.config.pipeline.search_limit);
        let candidates = self.source.search(&criteria).await?;

        if !self.config.pipeline.rank_by_relevance || candidates.is_empty() {
            return Ok(candidates);
        }

        let mut scores = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let score = self.captioner.score_relevance(&candidate.text).await;
            log::debug!("Score {:.1} for {}", score, candidate.url);
            scores.push(score);
        }
        Ok(order_by_scores(candidates, &scores))
    }

    async fn process(&self, candidate: &Candidate, index: usize) -> Result<Outcome> {
        if let Some(reason) = self.filter.precheck(candidate) {
            return Ok(Outcome::Skipped(reason));
        }

        let clip = self.downloader.fetch(&candidate.url).await?;
        let result = self.process_download(candidate, &clip, index).await;
        remove_download(&clip.path);
        result
    }

    async fn process_download(
        &self,
        candidate: &Candidate,
        clip: &DownloadedClip,
        index: usize,
    ) -> Result<Outcome> {
        if let Some(reason) = self.filter.check(clip) {
            return Ok(Outcome::Skipped(reason));
        }

        let caption = self.captioner.caption_or_fallback(&candidate.text).await;
        let file_name = output_file_name(&caption, index);

        if let Some(drive) = &self.drive {
            if self.config.drive.skip_existing && drive.exists(&file_name).await? {
                return Ok(Outcome::Skipped(format!("{} already in Drive", file_name)));
            }
        }

        let output_dir = match self.drive {
            Some(_) => self.downloader.download_dir().join("vertical"),
            None => PathBuf::from(&self.config.default_output_dir),
        };
        let output = output_dir.join(&file_name);

        let headline = self
            .config
            .shorts_config
            .headline
            .enabled
            .then_some(caption.as_str());
        if let Err(e) = reformat_with_fallback(
            &clip.path,
            &output,
            &self.config.shorts_config,
            headline,
            self.config.pipeline.fallback_to_simple,
        )
        .await
        {
            if e.is_fatal_input() {
                log::warn!("Discarding source {}: {}", candidate.url, e);
            }
            return Err(e.into());
        }

        let Some(drive) = &self.drive else {
            return Ok(Outcome::Produced(ProducedClip {
                source_url: candidate.url.clone(),
                caption,
                file_name,
                local_path: Some(output),
                upload: None,
            }));
        };

        let upload = drive.store(&output, &file_name).await;
        remove_download(&output);
        let record = upload?;

        if let Some(sheets) = &self.sheets {
            let row = SheetRow::new(&candidate.source, &candidate.url, &caption, &file_name);
            sheets.log_upload(&row).await;
        }

        Ok(Outcome::Produced(ProducedClip {
            source_url: candidate.url.clone(),
            caption,
            file_name,
            local_path: None,
            upload: Some(record),
        }))
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    }
}
