use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use frame_annotator_cache::{AnnotatorConfig, CacheLevel, CacheStatus};
use frame_annotator_core::{
    ChannelObserver, HttpFrameSource, NavigationController, NavigationEvent, NavigationOutcome,
    VideoInfo,
};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "frame-annotator")]
#[command(about = "Frame cache and prefetch client for the video frame annotator")]
pub struct Cli {
    /// Configuration file; defaults to the platform config directory.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Step through frames on a running server, printing events as JSON lines.
    Walk {
        /// Number of frames in the video loaded on the server.
        #[arg(long)]
        frames: u32,
        #[arg(long, default_value_t = 30.0)]
        fps: f64,
        /// First frame to show.
        #[arg(long, default_value_t = 0)]
        start: i64,
        /// Navigations after the first frame.
        #[arg(long, default_value_t = 10)]
        steps: u32,
        /// Frames moved per navigation; negative walks backwards.
        #[arg(long, default_value_t = 1, allow_hyphen_values = true)]
        stride: i64,
        /// Server base URL, overriding the configuration.
        #[arg(long)]
        server: Option<String>,
        /// Preload the whole video before walking.
        #[arg(long)]
        bulk: bool,
        /// Per-request timeout in seconds.
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Print the effective configuration as TOML.
    Config,
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum EventLine {
    Render {
        frame: u32,
        bytes: usize,
        time_seconds: Option<f64>,
    },
    Loading {
        loading: bool,
    },
    Cache {
        size: usize,
        capacity: Option<usize>,
        level: &'static str,
        display: String,
    },
    Progress {
        completed: u32,
        total: u32,
    },
    Error {
        message: String,
    },
    Summary {
        current_frame: Option<u32>,
        cached: usize,
        hits: u64,
        misses: u64,
        evictions: u64,
        hit_rate: f64,
    },
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging();

    match cli.command {
        Commands::Walk {
            frames,
            fps,
            start,
            steps,
            stride,
            server,
            bulk,
            timeout,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(server) = server {
                config.server_url = server;
            }
            if bulk {
                config.bulk_preload = true;
            }
            let walk = Walk {
                video: VideoInfo::new(frames, fps),
                start,
                steps,
                stride,
                timeout: Duration::from_secs(timeout),
            };
            run_walk(config, walk)
        }
        Commands::Config => {
            let config = load_config(cli.config.as_deref())?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Log to stderr, filtered by `RUST_LOG` (default `info`)
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Ignore a second initialisation when `run` is called more than once
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<AnnotatorConfig> {
    match path {
        Some(path) if !path.exists() => {
            anyhow::bail!("config file does not exist: {}", path.display())
        }
        _ => AnnotatorConfig::load(path).context("failed to load configuration"),
    }
}

struct Walk {
    video: VideoInfo,
    start: i64,
    steps: u32,
    stride: i64,
    timeout: Duration,
}

fn run_walk(config: AnnotatorConfig, walk: Walk) -> Result<()> {
    if walk.video.total_frames == 0 {
        anyhow::bail!("--frames must be >= 1");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let result = runtime.block_on(async move {
        let source = Arc::new(HttpFrameSource::with_timeout(
            config.server_url.clone(),
            walk.timeout,
        ));
        tracing::info!(server = source.base_url(), "walking frames");

        let bulk = config.bulk_preload;
        let (observer, mut events) = ChannelObserver::new();
        let nav = NavigationController::new(source, config, Arc::new(observer));
        nav.load_video(walk.video)?;
        if bulk {
            nav.prefetcher().join_sweep().await;
        }
        print_events(&mut events, &walk.video)?;

        let mut target = walk.start;
        for step in 0..=walk.steps {
            if step > 0 {
                target = target.saturating_add(walk.stride);
            }
            match nav.navigate_to(target).await {
                Ok(NavigationOutcome::Ignored) => {
                    tracing::info!(target, "walked past the end of the video");
                    break;
                }
                // Failures were already printed as error events
                Ok(_) | Err(_) => {}
            }
            print_events(&mut events, &walk.video)?;
        }

        let stats = nav.cache_stats();
        print_line(&EventLine::Summary {
            current_frame: nav.current_frame(),
            cached: stats.frame_count,
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            hit_rate: stats.hit_rate(),
        })?;

        nav.page_unloading();
        Ok::<(), anyhow::Error>(())
    });

    // Abandoned prefetch requests may still be running on the blocking pool
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

fn print_events(
    events: &mut UnboundedReceiver<NavigationEvent>,
    video: &VideoInfo,
) -> Result<()> {
    while let Ok(event) = events.try_recv() {
        print_line(&event_line(event, video))?;
    }
    Ok(())
}

fn event_line(event: NavigationEvent, video: &VideoInfo) -> EventLine {
    match event {
        NavigationEvent::RenderFrame { index, payload } => EventLine::Render {
            frame: index,
            bytes: payload.len(),
            time_seconds: video.frame_time(index),
        },
        NavigationEvent::LoadingChanged(loading) => EventLine::Loading { loading },
        NavigationEvent::CacheStatus(status) => cache_line(status),
        NavigationEvent::PrefetchProgress(progress) => EventLine::Progress {
            completed: progress.completed,
            total: progress.total,
        },
        NavigationEvent::Error(error) => EventLine::Error {
            message: error.to_string(),
        },
    }
}

fn cache_line(status: CacheStatus) -> EventLine {
    let level = match status.level() {
        CacheLevel::Normal => "normal",
        CacheLevel::NearCapacity => "near_capacity",
        CacheLevel::Full => "full",
    };
    EventLine::Cache {
        size: status.size,
        capacity: status.capacity,
        level,
        display: status.to_string(),
    }
}

fn print_line(line: &EventLine) -> Result<()> {
    println!("{}", serde_json::to_string(line)?);
    Ok(())
}
