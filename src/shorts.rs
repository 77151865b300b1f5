//! Shorts transformation module for clipshaper
//! Converts clips of any aspect ratio to 1080x1920 vertical video

use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{AudioHandling, HeadlineConfig, ShortsConfig, PITCH_FACTORS};
use crate::error::ReformatError;
use crate::filtergraph::{
    AspectFit, Dim, FilterChain, FilterGraph, FilterGraphBuilder, GraphError, Position, Stage,
};
use crate::types::VideoDimensions;
use crate::video;

pub const OUTPUT_WIDTH: u32 = 1080;
pub const OUTPUT_HEIGHT: u32 = 1920;
pub const PORTRAIT_ASPECT: f64 = 9.0 / 16.0;
pub const DEFAULT_TOLERANCE: f64 = 0.02;

/// Label of the final video stream in every graph
const VIDEO_OUT: &str = "vout";

/// Whether a source is already close enough to 9:16 to be cropped directly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectClass {
    NearPortrait,
    Other,
}

/// Strict comparison: a ratio exactly `tolerance` away is not near portrait
pub fn classify_ratio(aspect: f64, tolerance: f64) -> AspectClass {
    if (aspect - PORTRAIT_ASPECT).abs() < tolerance {
        AspectClass::NearPortrait
    } else {
        AspectClass::Other
    }
}

pub fn classify_aspect(dims: VideoDimensions, tolerance: f64) -> AspectClass {
    classify_ratio(dims.aspect(), tolerance)
}

/// Strategy for mapping a source frame onto the 1080x1920 canvas
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum CompositionMode {
    /// Decide from the source aspect ratio
    #[default]
    Auto,
    /// Cover-scale then center-crop
    Simple,
    /// Blurred square background behind a sharp 1080x1080 square
    BlurSquare,
    /// Blurred full frame behind the width-locked source
    BlurFullwidth,
    /// Source on solid black bars
    LetterboxBlack,
}

impl CompositionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompositionMode::Auto => "auto",
            CompositionMode::Simple => "simple",
            CompositionMode::BlurSquare => "blur-square",
            CompositionMode::BlurFullwidth => "blur-fullwidth",
            CompositionMode::LetterboxBlack => "letterbox-black",
        }
    }

    /// Composite modes are the ones worth a fallback to `Simple` on failure
    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            CompositionMode::BlurSquare | CompositionMode::BlurFullwidth
        )
    }
}

impl fmt::Display for CompositionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Background chosen when `Auto` meets a non-portrait source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundStyle {
    #[default]
    Blur,
    Black,
    /// Blur or black, drawn per clip by `draw_per_clip`
    Random,
}

/// Pick the concrete mode. Explicit modes are returned unchanged.
///
/// `Random` must be drawn before planning; left undrawn it behaves like `Blur`.
pub fn resolve_mode(
    requested: CompositionMode,
    class: AspectClass,
    background: BackgroundStyle,
) -> CompositionMode {
    if requested != CompositionMode::Auto {
        return requested;
    }
    match (class, background) {
        (AspectClass::NearPortrait, _) => CompositionMode::Simple,
        (AspectClass::Other, BackgroundStyle::Black) => CompositionMode::LetterboxBlack,
        (AspectClass::Other, BackgroundStyle::Blur | BackgroundStyle::Random) => {
            CompositionMode::BlurFullwidth
        }
    }
}

/// Settle every per-clip random choice up front, so one clip is planned,
/// transcoded and retried with the same values.
pub fn draw_per_clip<R: Rng + ?Sized>(config: &ShortsConfig, rng: &mut R) -> ShortsConfig {
    let mut drawn = config.clone();
    if drawn.background == BackgroundStyle::Random {
        drawn.background = if rng.gen_bool(0.5) {
            BackgroundStyle::Blur
        } else {
            BackgroundStyle::Black
        };
    }
    if drawn.pitch_variation {
        let factor = PITCH_FACTORS[rng.gen_range(0..PITCH_FACTORS.len())];
        drawn.audio = AudioHandling::PitchShift { factor };
        drawn.pitch_variation = false;
    }
    drawn
}

/// Everything decided before ffmpeg is spawned
#[derive(Debug, Clone, PartialEq)]
pub struct ReformatPlan {
    pub dimensions: VideoDimensions,
    pub class: AspectClass,
    pub mode: CompositionMode,
    pub graph: FilterGraph,
}

impl ReformatPlan {
    /// Burn `text` into the top of the frame. Blank text leaves the plan as is.
    pub fn with_headline(mut self, text: &str, style: &HeadlineConfig) -> Self {
        let text = text.trim();
        if text.is_empty() {
            return self;
        }
        self.graph = self.graph.append(Stage::DrawText {
            text: text.to_string(),
            fontfile: style.fontfile.clone(),
            size: style.font_size,
            y: Position::Px(style.y),
            boxed: style.boxed,
        });
        self
    }
}

/// Same dimensions and config always give the same plan
pub fn plan_reformat(
    dims: VideoDimensions,
    config: &ShortsConfig,
) -> Result<ReformatPlan, GraphError> {
    let class = classify_aspect(dims, config.tolerance);
    let mode = resolve_mode(config.mode, class, config.background);
    let graph = build_filter_graph(mode, dims, config.blur_sigma)?;
    Ok(ReformatPlan {
        dimensions: dims,
        class,
        mode,
        graph,
    })
}

/// Scale that covers the whole canvas, cropping the overflow later
fn cover_canvas() -> Stage {
    Stage::Scale {
        width: Dim::Px(OUTPUT_WIDTH),
        height: Dim::Px(OUTPUT_HEIGHT),
        fit: Some(AspectFit::Increase),
    }
}

fn crop_canvas() -> Stage {
    Stage::Crop {
        width: OUTPUT_WIDTH,
        height: OUTPUT_HEIGHT,
        x: None,
        y: None,
    }
}

/// Scale that keeps the whole frame visible: width-locked for wide sources,
/// height-locked for sources taller than 9:16
fn fit_canvas(dims: VideoDimensions) -> Stage {
    if dims.aspect() < PORTRAIT_ASPECT {
        Stage::Scale {
            width: Dim::KeepAspect,
            height: Dim::Px(OUTPUT_HEIGHT),
            fit: None,
        }
    } else {
        Stage::Scale {
            width: Dim::Px(OUTPUT_WIDTH),
            height: Dim::KeepAspect,
            fit: None,
        }
    }
}

fn centered_overlay() -> FilterChain {
    FilterChain::new("bg")
        .input("fg")
        .then(Stage::Overlay {
            x: Position::Center,
            y: Position::Center,
        })
        .to(VIDEO_OUT)
}

/// Build the filter graph for a mode. `Auto` is resolved with the default
/// tolerance and a blurred background.
pub fn build_filter_graph(
    mode: CompositionMode,
    dims: VideoDimensions,
    blur_sigma: f32,
) -> Result<FilterGraph, GraphError> {
    let builder = FilterGraphBuilder::new();

    let builder = match mode {
        CompositionMode::Auto => {
            let resolved = match classify_aspect(dims, DEFAULT_TOLERANCE) {
                AspectClass::NearPortrait => CompositionMode::Simple,
                AspectClass::Other => CompositionMode::BlurFullwidth,
            };
            return build_filter_graph(resolved, dims, blur_sigma);
        }

        CompositionMode::Simple => builder.chain(
            FilterChain::new("0:v")
                .then(cover_canvas())
                .then(crop_canvas())
                .then(Stage::SetSar)
                .to(VIDEO_OUT),
        ),

        CompositionMode::BlurFullwidth => builder
            .chain(
                FilterChain::new("0:v")
                    .then(Stage::Split { outputs: 2 })
                    .to("bg_src")
                    .to("fg_src"),
            )
            .chain(
                FilterChain::new("bg_src")
                    .then(cover_canvas())
                    .then(crop_canvas())
                    .then(Stage::Blur { sigma: blur_sigma })
                    .then(Stage::SetSar)
                    .to("bg"),
            )
            .chain(
                FilterChain::new("fg_src")
                    .then(fit_canvas(dims))
                    .then(Stage::SetSar)
                    .to("fg"),
            )
            .chain(centered_overlay()),

        CompositionMode::BlurSquare => {
            // Integer division; a half-pixel offset is truncated
            let side = dims.width.min(dims.height);
            let x = (dims.width - side) / 2;
            let y = (dims.height - side) / 2;

            builder
                .chain(
                    FilterChain::new("0:v")
                        .then(Stage::Crop {
                            width: side,
                            height: side,
                            x: Some(x),
                            y: Some(y),
                        })
                        .then(Stage::Split { outputs: 2 })
                        .to("bg_src")
                        .to("fg_src"),
                )
                .chain(
                    FilterChain::new("bg_src")
                        .then(Stage::Scale {
                            width: Dim::Px(OUTPUT_WIDTH),
                            height: Dim::Px(OUTPUT_HEIGHT),
                            fit: None,
                        })
                        .then(Stage::SetSar)
                        .then(Stage::Blur { sigma: blur_sigma })
                        .to("bg"),
                )
                .chain(
                    FilterChain::new("fg_src")
                        .then(Stage::Scale {
                            width: Dim::Px(OUTPUT_WIDTH),
                            height: Dim::Px(OUTPUT_WIDTH),
                            fit: None,
                        })
                        .then(Stage::SetSar)
                        .to("fg"),
                )
                .chain(centered_overlay())
        }

        CompositionMode::LetterboxBlack => builder.chain(
            FilterChain::new("0:v")
                .then(fit_canvas(dims))
                .then(Stage::Pad {
                    width: OUTPUT_WIDTH,
                    height: OUTPUT_HEIGHT,
                    color: "black".to_string(),
                })
                .then(Stage::SetSar)
                .to(VIDEO_OUT),
        ),
    };

    builder.build()
}

/// Arguments for the single ffmpeg invocation of a transform
pub fn build_ffmpeg_args(
    input: &Path,
    output: &Path,
    graph: &FilterGraph,
    config: &ShortsConfig,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-filter_complex".to_string(),
        graph.to_string(),
        "-map".to_string(),
        graph.map_arg(),
        "-map".to_string(),
        "0:a?".to_string(), // Audio from source (optional)
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        config.preset.clone(),
        "-crf".to_string(),
        config.crf.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
    ];

    match config.audio {
        AudioHandling::Aac => {
            args.push("-c:a".to_string());
            args.push("aac".to_string());
            args.push("-b:a".to_string());
            args.push(config.audio_bitrate.clone());
        }
        AudioHandling::Copy => {
            args.push("-c:a".to_string());
            args.push("copy".to_string());
        }
        AudioHandling::PitchShift { factor } => {
            args.push("-af".to_string());
            args.push(format!(
                "asetrate=48000*{f},aresample=48000,atempo=1/{f}",
                f = factor
            ));
            args.push("-c:a".to_string());
            args.push("aac".to_string());
            args.push("-b:a".to_string());
            args.push(config.audio_bitrate.clone());
        }
    }

    args.push("-movflags".to_string());
    args.push("+faststart".to_string());
    args.push(output.to_string_lossy().to_string());
    args
}

/// `clip.mp4` -> `clip_VERTICAL.mp4` next to the source
pub fn default_output_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "clip".to_string());
    source.with_file_name(format!("{}_VERTICAL.mp4", stem))
}

/// Probe the source and work out what the transform would do.
///
/// Expects a config already passed through `draw_per_clip`.
pub async fn inspect(input: &Path, config: &ShortsConfig) -> Result<ReformatPlan, ReformatError> {
    video::ensure_readable_file(input)?;
    let dims = video::probe_dimensions(input).await?;
    Ok(plan_reformat(dims, config)?)
}

/// Transform a video clip to a 1080x1920 short, drawing per-clip choices once.
pub async fn transform_to_short(
    input: &Path,
    output: &Path,
    config: &ShortsConfig,
) -> Result<PathBuf, ReformatError> {
    let config = draw_per_clip(config, &mut rand::thread_rng());
    let plan = inspect(input, &config).await?;
    transform_with_plan(input, output, &plan, &config).await
}

/// Run the transcode for an already computed plan.
///
/// The source is opened read-only and never deleted. On failure no output
/// file is left behind.
pub async fn transform_with_plan(
    input: &Path,
    output: &Path,
    plan: &ReformatPlan,
    config: &ShortsConfig,
) -> Result<PathBuf, ReformatError> {
    if input == output {
        return Err(ReformatError::invalid_input(
            input,
            "output path would overwrite the source",
        ));
    }

    log::info!(
        "Reformatting {} ({}, {:?}) with mode {}",
        input.display(),
        plan.dimensions,
        plan.class,
        plan.mode
    );

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let args = build_ffmpeg_args(input, output, &plan.graph, config);
    video::run_ffmpeg(&args, output, config.timeout_secs.map(Duration::from_secs)).await?;

    Ok(output.to_path_buf())
}

/// Render a single frame of the composition to an image
pub async fn generate_preview(
    input: &Path,
    output_image: &Path,
    config: &ShortsConfig,
    timestamp_secs: f64,
) -> Result<PathBuf, ReformatError> {
    let config = draw_per_clip(config, &mut rand::thread_rng());
    let plan = inspect(input, &config).await?;

    let args: Vec<String> = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-ss".to_string(),
        format!("{:.3}", timestamp_secs.max(0.0)),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-filter_complex".to_string(),
        plan.graph.to_string(),
        "-map".to_string(),
        plan.graph.map_arg(),
        "-frames:v".to_string(),
        "1".to_string(),
        output_image.to_string_lossy().to_string(),
    ];

    video::run_ffmpeg(&args, output_image, config.timeout_secs.map(Duration::from_secs)).await?;
    Ok(output_image.to_path_buf())
}

pub type ProgressCallback = Box<dyn Fn(usize, usize, &str) + Send>;

/// Transform every mp4 in a directory, skipping files that fail
pub async fn transform_batch(
    input_dir: &Path,
    output_dir: &Path,
    config: &ShortsConfig,
    progress_callback: Option<ProgressCallback>,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir)?;

    let mut entries: Vec<PathBuf> = std::fs::read_dir(input_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|ext| ext == "mp4").unwrap_or(false))
        .collect();
    entries.sort();

    let total = entries.len();
    let mut output_files = Vec::new();

    for (i, input_path) in entries.iter().enumerate() {
        let file_name = input_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let output_path = output_dir.join(format!("short_{}", file_name));

        if let Some(ref callback) = progress_callback {
            callback(i + 1, total, &file_name);
        }

        match transform_to_short(input_path, &output_path, config).await {
            Ok(path) => output_files.push(path),
            Err(e) => log::warn!("Failed to transform {}: {}", file_name, e),
        }
    }

    Ok(output_files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const ALL_MODES: [CompositionMode; 5] = [
        CompositionMode::Auto,
        CompositionMode::Simple,
        CompositionMode::BlurSquare,
        CompositionMode::BlurFullwidth,
        CompositionMode::LetterboxBlack,
    ];

    fn dims(w: u32, h: u32) -> VideoDimensions {
        VideoDimensions::new(w, h)
    }

    fn plan(w: u32, h: u32, mode: CompositionMode) -> ReformatPlan {
        let config = ShortsConfig {
            mode,
            ..ShortsConfig::default()
        };
        plan_reformat(dims(w, h), &config).unwrap()
    }

    #[test]
    fn test_exact_portrait_is_near() {
        assert_eq!(
            classify_aspect(dims(1080, 1920), DEFAULT_TOLERANCE),
            AspectClass::NearPortrait
        );
        assert_eq!(
            classify_aspect(dims(720, 1280), DEFAULT_TOLERANCE),
            AspectClass::NearPortrait
        );
    }

    #[test]
    fn test_tolerance_boundary_is_strict() {
        let tolerance = DEFAULT_TOLERANCE;
        assert_eq!(
            classify_ratio(PORTRAIT_ASPECT + tolerance, tolerance),
            AspectClass::Other
        );
        assert_eq!(
            classify_ratio(PORTRAIT_ASPECT + tolerance - 1e-9, tolerance),
            AspectClass::NearPortrait
        );
        assert_eq!(
            classify_ratio(PORTRAIT_ASPECT - tolerance + 1e-9, tolerance),
            AspectClass::NearPortrait
        );
    }

    #[test]
    fn test_auto_on_portrait_is_simple_without_overlay() {
        let plan = plan(1080, 1920, CompositionMode::Auto);
        assert_eq!(plan.mode, CompositionMode::Simple);
        assert_eq!(plan.graph.count("overlay"), 0);
        assert!(!plan.graph.has_blur());
        assert_eq!(
            plan.graph.to_string(),
            "[0:v]scale=1080:1920:force_original_aspect_ratio=increase,crop=1080:1920,setsar=1[vout]"
        );
    }

    #[test]
    fn test_auto_on_four_by_three_composites() {
        let plan = plan(1440, 1080, CompositionMode::Auto);
        assert_eq!(plan.class, AspectClass::Other);
        assert!(plan.mode.is_composite());
        assert_eq!(plan.graph.count("overlay"), 1);
        assert_eq!(plan.graph.count("gblur"), 1);
    }

    #[test]
    fn test_auto_on_landscape_is_blur_fullwidth() {
        let plan = plan(1920, 1080, CompositionMode::Auto);
        assert_eq!(plan.mode, CompositionMode::BlurFullwidth);
        assert_eq!(
            plan.graph.to_string(),
            "[0:v]split=2[bg_src][fg_src];\
             [bg_src]scale=1080:1920:force_original_aspect_ratio=increase,crop=1080:1920,gblur=sigma=20,setsar=1[bg];\
             [fg_src]scale=1080:-2,setsar=1[fg];\
             [bg][fg]overlay=(W-w)/2:(H-h)/2[vout]"
        );
    }

    #[test]
    fn test_tall_source_is_height_locked() {
        let graph = build_filter_graph(CompositionMode::BlurFullwidth, dims(720, 1800), 20.0)
            .unwrap()
            .to_string();
        assert!(graph.contains("[fg_src]scale=-2:1920,setsar=1[fg]"));

        let letterbox = build_filter_graph(CompositionMode::LetterboxBlack, dims(720, 1800), 20.0)
            .unwrap()
            .to_string();
        assert!(letterbox.starts_with("[0:v]scale=-2:1920,pad=1080:1920"));
    }

    #[test]
    fn test_blur_square_centers_crop() {
        let graph = build_filter_graph(CompositionMode::BlurSquare, dims(1920, 1080), 20.0)
            .unwrap();
        let text = graph.to_string();
        assert!(text.starts_with("[0:v]crop=1080:1080:420:0,split=2[bg_src][fg_src]"));
        assert!(text.contains("[bg_src]scale=1080:1920,setsar=1,gblur=sigma=20[bg]"));
        assert!(text.contains("[fg_src]scale=1080:1080,setsar=1[fg]"));
        assert_eq!(graph.count("overlay"), 1);

        // Portrait source: square is cut from the middle of the height
        let portrait = build_filter_graph(CompositionMode::BlurSquare, dims(1080, 1921), 20.0)
            .unwrap()
            .to_string();
        // (1921 - 1080) / 2 = 420.5, truncated
        assert!(portrait.starts_with("[0:v]crop=1080:1080:0:420,"));
    }

    #[test]
    fn test_letterbox_pads_black() {
        let plan = plan(1920, 1080, CompositionMode::LetterboxBlack);
        assert_eq!(
            plan.graph.to_string(),
            "[0:v]scale=1080:-2,pad=1080:1920:(ow-iw)/2:(oh-ih)/2:black,setsar=1[vout]"
        );
        assert_eq!(plan.graph.count("overlay"), 0);
    }

    #[test]
    fn test_forced_simple_on_landscape() {
        let plan = plan(1920, 1080, CompositionMode::Simple);
        assert_eq!(plan.mode, CompositionMode::Simple);
        assert!(!plan.graph.has_blur());
    }

    #[test]
    fn test_every_mode_targets_full_canvas() {
        for mode in ALL_MODES {
            for (w, h) in [(1920, 1080), (1080, 1920), (1440, 1080), (640, 640), (720, 1800)] {
                let text = build_filter_graph(mode, dims(w, h), 20.0).unwrap().to_string();
                let full_canvas = text.contains("crop=1080:1920")
                    || text.contains("pad=1080:1920")
                    || (text.contains("scale=1080:1920") && text.contains("overlay"));
                assert!(full_canvas, "{} {}x{}: {}", mode, w, h, text);
                assert!(text.ends_with("[vout]"));
            }
        }
    }

    #[test]
    fn test_construction_is_deterministic() {
        for mode in ALL_MODES {
            let a = plan(1280, 720, mode);
            let b = plan(1280, 720, mode);
            assert_eq!(a.graph.to_string(), b.graph.to_string());
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_background_style_selection() {
        assert_eq!(
            resolve_mode(CompositionMode::Auto, AspectClass::Other, BackgroundStyle::Black),
            CompositionMode::LetterboxBlack
        );
        assert_eq!(
            resolve_mode(
                CompositionMode::Auto,
                AspectClass::NearPortrait,
                BackgroundStyle::Random
            ),
            CompositionMode::Simple
        );
        assert_eq!(
            resolve_mode(
                CompositionMode::BlurSquare,
                AspectClass::NearPortrait,
                BackgroundStyle::Black
            ),
            CompositionMode::BlurSquare
        );
    }

    #[test]
    fn test_random_background_is_drawn_once_per_clip() {
        let config = ShortsConfig {
            background: BackgroundStyle::Random,
            ..ShortsConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = Vec::new();

        for _ in 0..50 {
            let drawn = draw_per_clip(&config, &mut rng);
            assert_ne!(drawn.background, BackgroundStyle::Random);

            // Inspecting and transcoding plan from the same drawn config
            let first = plan_reformat(dims(1920, 1080), &drawn).unwrap();
            let second = plan_reformat(dims(1920, 1080), &drawn).unwrap();
            assert_eq!(first, second);
            seen.push(first.mode);
        }

        assert!(seen.contains(&CompositionMode::BlurFullwidth));
        assert!(seen.contains(&CompositionMode::LetterboxBlack));
    }

    #[test]
    fn test_undrawn_random_plans_deterministically() {
        let config = ShortsConfig {
            background: BackgroundStyle::Random,
            ..ShortsConfig::default()
        };
        for _ in 0..20 {
            let plan = plan_reformat(dims(1920, 1080), &config).unwrap();
            assert_eq!(plan.mode, CompositionMode::BlurFullwidth);
        }
    }

    #[test]
    fn test_pitch_variation_draws_a_factor() {
        let config = ShortsConfig {
            pitch_variation: true,
            ..ShortsConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..10 {
            let drawn = draw_per_clip(&config, &mut rng);
            assert!(!drawn.pitch_variation);
            match drawn.audio {
                AudioHandling::PitchShift { factor } => assert!(PITCH_FACTORS.contains(&factor)),
                other => panic!("expected pitch shift, got {:?}", other),
            }
        }

        let plain = draw_per_clip(&ShortsConfig::default(), &mut rng);
        assert_eq!(plain, ShortsConfig::default());
    }

    #[test]
    fn test_headline_is_burned_after_composition() {
        let style = HeadlineConfig::default();
        let headlined =
            plan(1920, 1080, CompositionMode::BlurFullwidth).with_headline("Cat: 1", &style);
        let text = headlined.graph.to_string();
        assert!(text.ends_with(
            "overlay=(W-w)/2:(H-h)/2,drawtext=fontfile=/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf:\
             text=Cat\\\\: 1:expansion=none:fontsize=60:fontcolor=white:x=(w-text_w)/2:y=150:\
             shadowcolor=black@0.6:shadowx=2:shadowy=2:box=1:boxcolor=black@0.4:boxborderw=10[vout]"
        ));
        assert_eq!(headlined.graph.count("drawtext"), 1);

        let untouched = plan(1080, 1920, CompositionMode::Simple);
        assert_eq!(untouched.clone().with_headline("   ", &style), untouched);
    }

    #[test]
    fn test_ffmpeg_args_audio_handling() {
        let graph = build_filter_graph(CompositionMode::Simple, dims(1080, 1920), 20.0).unwrap();
        let mut config = ShortsConfig::default();
        let args = build_ffmpeg_args(Path::new("in.mp4"), Path::new("out.mp4"), &graph, &config);
        let joined = args.join(" ");
        assert!(joined.contains("-map [vout] -map 0:a?"));
        assert!(joined.contains("-c:v libx264 -preset fast -crf 23"));
        assert!(joined.contains("-c:a aac -b:a 128k"));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));

        config.audio = AudioHandling::Copy;
        let joined = build_ffmpeg_args(Path::new("in.mp4"), Path::new("out.mp4"), &graph, &config)
            .join(" ");
        assert!(joined.contains("-c:a copy"));
        assert!(!joined.contains("-b:a"));
        assert!(!joined.contains("-af"));
    }

    #[test]
    fn test_ffmpeg_args_pitch_shift() {
        let graph = build_filter_graph(CompositionMode::Simple, dims(1080, 1920), 20.0).unwrap();
        let config = ShortsConfig {
            audio: AudioHandling::PitchShift { factor: 1.01 },
            ..ShortsConfig::default()
        };
        let args = build_ffmpeg_args(Path::new("in.mp4"), Path::new("out.mp4"), &graph, &config);
        let joined = args.join(" ");
        assert!(args
            .windows(2)
            .any(|w| w == ["-af", "asetrate=48000*1.01,aresample=48000,atempo=1/1.01"]));
        assert!(joined.contains("-c:a aac -b:a 128k"));
        assert!(!joined.contains("-c:a copy"));
    }

    #[test]
    fn test_mode_names() {
        assert_eq!(CompositionMode::BlurFullwidth.to_string(), "blur-fullwidth");
        let parsed: CompositionMode = serde_json::from_str("\"letterbox-black\"").unwrap();
        assert_eq!(parsed, CompositionMode::LetterboxBlack);
    }

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            default_output_path(Path::new("/tmp/abc123.mp4")),
            PathBuf::from("/tmp/abc123_VERTICAL.mp4")
        );
    }

    #[tokio::test]
    async fn test_zero_byte_input_never_transcodes() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("empty.mp4");
        std::fs::write(&input, b"").unwrap();
        let output = dir.path().join("out.mp4");

        let err = transform_to_short(&input, &output, &ShortsConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReformatError::InvalidInput { .. }));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_non_video_input_never_transcodes() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("readme.mp4");
        std::fs::write(&input, "plain text, not a container").unwrap();
        let output = dir.path().join("out.mp4");

        let err = transform_to_short(&input, &output, &ShortsConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_fatal_input());
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_output_must_differ_from_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"data").unwrap();
        let simple = plan(1920, 1080, CompositionMode::Simple);
        let err = transform_with_plan(&input, &input, &simple, &ShortsConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReformatError::InvalidInput { .. }));
        assert!(input.exists());
    }
}
