//! clipshaper
//! Turns landscape and square clips into 1080x1920 shorts, and runs the
//! search -> download -> reformat -> caption -> upload pipeline around it,
//! then publishes the Drive folder to YouTube Shorts.

mod ai;
mod config;
mod download;
mod drive;
mod error;
mod filtergraph;
mod pipeline;
mod retry;
mod sheets;
mod shorts;
mod sources;
mod types;
mod video;
mod youtube;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::AppConfig;
use simplelog::{
    ColorChoice, CombinedLogger, Config, LevelFilter, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::shorts::{BackgroundStyle, CompositionMode};
use crate::types::{APP_NAME, APP_VERSION};

#[derive(Parser)]
#[command(name = "clipshaper", version)]
#[command(about = "Reformat clips into vertical 9:16 shorts")]
struct Cli {
    /// Settings file
    #[arg(long, global = true, default_value = "settings.json")]
    config: PathBuf,

    /// Verbose logging, also written to debug.log
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

/// Overrides for the `shorts_config` block
#[derive(clap::Args, Debug, Default)]
struct ShortsArgs {
    #[arg(long, value_enum)]
    mode: Option<CompositionMode>,

    /// Background for auto mode on non-portrait sources
    #[arg(long, value_enum)]
    background: Option<BackgroundStyle>,

    /// Allowed deviation from 9:16 before a source counts as portrait
    #[arg(long)]
    tolerance: Option<f64>,

    /// Kill ffmpeg after this many seconds (0 disables the limit)
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Transform one video into a vertical short
    Reformat {
        input: PathBuf,
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
        /// Burn this text into the top of the frame
        #[arg(long)]
        headline: Option<String>,
        #[command(flatten)]
        shorts: ShortsArgs,
    },
    /// Show the chosen mode and filter graph without transcoding
    Plan {
        input: PathBuf,
        #[command(flatten)]
        shorts: ShortsArgs,
    },
    /// Print dimensions, duration and audio presence
    Probe { input: PathBuf },
    /// Render one frame of the composition to an image
    Preview {
        input: PathBuf,
        /// Timestamp in seconds
        #[arg(long, default_value_t = 0.0)]
        at: f64,
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
        #[command(flatten)]
        shorts: ShortsArgs,
    },
    /// Transform every mp4 in a directory
    Batch {
        input_dir: PathBuf,
        output_dir: Option<PathBuf>,
        #[command(flatten)]
        shorts: ShortsArgs,
    },
    /// Run the full pipeline with the settings file
    Run,
    /// Upload every video in the Drive folder as a YouTube Short
    Publish,
    /// Write a default settings file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl ShortsArgs {
    fn apply(&self, config: &mut AppConfig) -> Result<()> {
        let shorts = &mut config.shorts_config;
        if let Some(mode) = self.mode {
            shorts.mode = mode;
        }
        if let Some(background) = self.background {
            shorts.background = background;
        }
        if let Some(tolerance) = self.tolerance {
            shorts.tolerance = tolerance;
        }
        if let Some(timeout) = self.timeout {
            shorts.timeout_secs = (timeout > 0).then_some(timeout);
        }
        config.validate()
    }
}

fn init_logging(debug: bool) -> Result<()> {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    if debug {
        loggers.push(WriteLogger::new(
            LevelFilter::Debug,
            Config::default(),
            OpenOptions::new()
                .create(true)
                .append(true)
                .open("debug.log")
                .context("Failed to open debug.log")?,
        ));
    }

    let _ = CombinedLogger::init(loggers);
    Ok(())
}

/// Settings from disk when present, otherwise defaults plus environment secrets
fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        return AppConfig::load(path);
    }
    log::debug!("{} not found, using defaults", path.display());
    let mut config = AppConfig::default();
    config.apply_env_overrides(|key| std::env::var(key).ok());
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug)?;
    log::info!("Starting {} v{}", APP_NAME, APP_VERSION);

    match cli.command {
        Command::Init { force } => {
            if cli.config.exists() && !force {
                anyhow::bail!(
                    "{} already exists, pass --force to overwrite it",
                    cli.config.display()
                );
            }
            AppConfig::create_default(&cli.config)?;
            println!("📝 Wrote default settings to {}", cli.config.display());
            Ok(())
        }

        Command::Probe { input } => {
            video::ensure_readable_file(&input)?;
            let dims = video::probe_dimensions(&input).await?;
            let duration = video::probe_duration(&input).await?;
            let audio = video::has_audio_stream(&input).await?;
            println!("📐 {}", input.display());
            println!("   Dimensions: {} (aspect {:.4})", dims, dims.aspect());
            println!("   Duration: {:.2}s", duration);
            println!("   Audio: {}", if audio { "yes" } else { "no" });
            Ok(())
        }

        Command::Plan {
            input,
            shorts: overrides,
        } => {
            let mut config = load_config(&cli.config)?;
            overrides.apply(&mut config)?;
            let drawn = shorts::draw_per_clip(&config.shorts_config, &mut rand::thread_rng());
            let plan = shorts::inspect(&input, &drawn).await?;
            println!("📐 {}", input.display());
            println!("   Dimensions: {}", plan.dimensions);
            println!("   Aspect class: {:?}", plan.class);
            println!("   Mode: {}", plan.mode);
            println!("   Filter graph: {}", plan.graph);
            Ok(())
        }

        Command::Reformat {
            input,
            output,
            headline,
            shorts: overrides,
        } => {
            let mut config = load_config(&cli.config)?;
            overrides.apply(&mut config)?;
            video::check_dependencies()?;

            let output = output.unwrap_or_else(|| shorts::default_output_path(&input));
            println!("🎬 Transforming to vertical short...");
            println!("   Input: {}", input.display());
            println!("   Output: {}", output.display());
            println!("   Mode: {}", config.shorts_config.mode);

            let drawn = shorts::draw_per_clip(&config.shorts_config, &mut rand::thread_rng());
            let mut plan = shorts::inspect(&input, &drawn).await?;
            if let Some(text) = headline.as_deref() {
                plan = plan.with_headline(text, &drawn.headline);
            }
            let result = shorts::transform_with_plan(&input, &output, &plan, &drawn).await?;
            println!("✅ Short saved to: {}", result.display());
            Ok(())
        }

        Command::Preview {
            input,
            at,
            output,
            shorts: overrides,
        } => {
            let mut config = load_config(&cli.config)?;
            overrides.apply(&mut config)?;

            let output = output.unwrap_or_else(|| input.with_extension("preview.png"));
            println!("🎬 Generating preview...");
            println!("   Input: {}", input.display());
            println!("   Timestamp: {:.2}s", at);

            shorts::generate_preview(&input, &output, &config.shorts_config, at).await?;
            println!("✅ Preview saved to: {}", output.display());
            Ok(())
        }

        Command::Batch {
            input_dir,
            output_dir,
            shorts: overrides,
        } => {
            let mut config = load_config(&cli.config)?;
            overrides.apply(&mut config)?;
            video::check_dependencies()?;

            let output_dir =
                output_dir.unwrap_or_else(|| PathBuf::from(&config.default_output_dir));
            println!("🎬 Batch transforming videos...");
            println!("   Input dir: {}", input_dir.display());
            println!("   Output dir: {}", output_dir.display());

            let results = shorts::transform_batch(
                &input_dir,
                &output_dir,
                &config.shorts_config,
                Some(Box::new(|current: usize, total: usize, name: &str| {
                    println!("   [{}/{}] Processing: {}", current, total, name);
                })),
            )
            .await?;

            println!(
                "✅ Transformed {} videos to: {}",
                results.len(),
                output_dir.display()
            );
            Ok(())
        }

        Command::Run => {
            let config = AppConfig::load(&cli.config)?;
            video::check_dependencies()?;

            println!("🚀 Producing {} shorts", config.pipeline.target_count);
            let pipeline = pipeline::Pipeline::from_config(config).await?;
            let summary = pipeline.run().await?;

            println!("\n🎉 Completed: {}", summary);
            for clip in &summary.produced {
                match (&clip.upload, &clip.local_path) {
                    (Some(record), _) => println!(
                        "   ☁️  {} -> {}",
                        record.name,
                        record.web_view_link.as_deref().unwrap_or(&record.remote_id)
                    ),
                    (None, Some(path)) => println!("   💾 {}", path.display()),
                    (None, None) => println!("   {}", clip.file_name),
                }
                println!("      \"{}\" from {}", clip.caption, clip.source_url);
            }
            Ok(())
        }

        Command::Publish => {
            let config = AppConfig::load(&cli.config)?;
            let drive_auth = drive::GoogleAuth::from_env(config.google_service_account.as_deref())?;
            let drive = drive::DriveUploader::connect(&config.drive, drive_auth).await?;
            let youtube_auth = drive::GoogleAuth::for_youtube(&config.youtube.token_env)?;
            let uploader = youtube::YouTubeUploader::new(&config.youtube, youtube_auth);

            let work_dir = Path::new(&config.downloader.download_dir).join("publish");
            println!("🚀 Publishing Drive folder {} to YouTube", drive.folder_id());
            let summary = youtube::publish_from_drive(&drive, &uploader, &work_dir).await?;

            println!("\n🎉 Completed: {}", summary);
            for (name, video_id) in &summary.published {
                println!("   ▶️  {} -> https://youtube.com/shorts/{}", name, video_id);
            }
            Ok(())
        }
    }
}
