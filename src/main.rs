mod cache;
mod capture;
mod config;
mod layout;
mod ocr;
mod overlay;
mod pipeline;
mod translate;

use anyhow::{anyhow, Context, Result};
use cache::TranslationCache;
use capture::{Capture, ReplayCapture};
use clap::Parser;
use config::TranslatorKind;
use log::info;
use ocr::VisionRecognizer;
use overlay::OverlayApp;
use pipeline::{PipelineWorker, Scheduler};
use std::path::PathBuf;
use translate::{DeepL, LocalServer, Passthrough, Translator};

/// Captures a window, OCRs it, and shows translated subtitles in an
/// always-on-top overlay.
#[derive(Parser, Debug)]
#[command(name = "screen-interpreter", version, about)]
struct Args {
    /// Path to the config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Substring of the window title to capture
    #[arg(short, long)]
    window: Option<String>,

    /// List visible window titles and exit
    #[arg(short, long)]
    list_windows: bool,

    /// Startup overlay mode: off, banner or inplace
    #[arg(short, long)]
    mode: Option<String>,

    /// Read frames from a PNG file instead of capturing a window
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Show recognized text without translating it
    #[arg(long)]
    no_translate: bool,

    /// Dump each captured frame to the working directory
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.list_windows {
        for title in capture::list_windows() {
            println!("{title}");
        }
        return Ok(());
    }

    let mut raw = config::load_config(args.config.as_deref())?;
    if let Some(window) = args.window {
        raw.window_title = window;
    }
    if let Some(mode) = args.mode {
        raw.overlay_mode = mode;
    }
    let settings = raw.validate().context("invalid configuration")?;

    let capture: Box<dyn Capture> = match &args.replay {
        Some(path) => Box::new(ReplayCapture::new(path.clone())),
        None => capture::platform_capture(),
    };

    let vision_api_key = if settings.vision_api_key.is_empty() {
        std::env::var("VISION_API_KEY")
            .map_err(|_| anyhow!("no vision_api_key in config and VISION_API_KEY is unset"))?
    } else {
        settings.vision_api_key.clone()
    };
    let recognizer = Box::new(VisionRecognizer::new(vision_api_key)?);

    let translator: Box<dyn Translator> = if args.no_translate {
        Box::new(Passthrough)
    } else {
        match settings.translator {
            TranslatorKind::DeepL => Box::new(DeepL::new(
                settings.deepl_auth_key.clone(),
                &settings.target_language,
            )?),
            TranslatorKind::LocalServer => {
                Box::new(LocalServer::new(settings.local_server_url.clone())?)
            }
        }
    };

    info!(
        "[init] window {:?}, refresh {:?}, mode {}",
        settings.window_title,
        settings.refresh_rate,
        settings.mode.label()
    );

    let worker = PipelineWorker {
        capture,
        recognizer,
        translator,
        cache: TranslationCache::default(),
        window_title: settings.window_title.clone(),
        confidence_threshold: settings.confidence_threshold,
        dump_frames: args.debug,
    };
    let scheduler = Scheduler::new(worker, settings.refresh_rate);

    let options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_inner_size([800.0, 240.0])
            .with_transparent(true)
            .with_decorations(false)
            .with_always_on_top(),
        ..Default::default()
    };

    let app = OverlayApp::new(&settings, scheduler);
    eframe::run_native(
        "Screen Interpreter",
        options,
        Box::new(move |_cc| Ok(Box::new(app))),
    )
    .map_err(|e| anyhow!("overlay window failed: {e}"))
}
