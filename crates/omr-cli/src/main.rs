use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use omr_core::grading::{
    self, AnswerExtractor, ExtractionContext, ExtractionResult, UnavailableExtractor,
};
use omr_core::synthetic::{render_sheet, SheetSpec};
use omr_core::{AnswerKey, FrameAnalysis, FrameAnalyzer, LayoutKind};
use omr_hw::{Camera, Frame, FrameSource, StillSource};
use omr_scanner::{
    CaptureState, ControllerEvent, DirectorySink, LoopControl, ScannerConfig, ScannerSession,
    SessionUpdate,
};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "omr", about = "OMR answer sheet scanner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a single image and report capture quality
    Analyze {
        /// Image file (PNG, JPEG, ...)
        #[arg(required_unless_present = "synthetic")]
        image: Option<PathBuf>,
        /// Answer key, e.g. "A,B,BLANK,D"
        #[arg(short, long)]
        key: Option<String>,
        /// Registration mark layout (four-corner, fixed-margin, eight-point)
        #[arg(short, long)]
        layout: Option<LayoutKind>,
        /// Analyze a generated sheet instead of a file
        #[arg(long, conflicts_with = "image")]
        synthetic: bool,
        /// Print the full analysis as JSON
        #[arg(long)]
        json: bool,
    },
    /// Scan from a camera until a sheet is captured or Ctrl-C
    Scan {
        /// V4L2 device path (overrides OMR_CAMERA_DEVICE)
        #[arg(short, long)]
        device: Option<String>,
        /// Directory for captured images (overrides OMR_OUTPUT_DIR)
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
        /// Answer key, e.g. "A,B,BLANK,D"
        #[arg(short, long)]
        key: Option<String>,
        /// Disable the auto-capture countdown; press Enter to capture
        #[arg(long)]
        no_auto: bool,
        /// Analyze on the capture thread instead of a background worker
        #[arg(long)]
        inline: bool,
    },
    /// List V4L2 capture devices
    Devices,
    /// Score extracted answers against a key
    Grade {
        /// Answer key, e.g. "A,B,BLANK,D"
        #[arg(short, long)]
        key: String,
        /// Extraction result as JSON
        #[arg(short, long, required_unless_present = "image")]
        answers: Option<PathBuf>,
        /// Captured sheet to send to the answer extractor
        #[arg(short, long, conflicts_with = "answers")]
        image: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            image,
            key,
            layout,
            synthetic,
            json,
        } => analyze(image, key.as_deref(), layout, synthetic, json),
        Commands::Scan {
            device,
            out_dir,
            key,
            no_auto,
            inline,
        } => {
            let mut config = ScannerConfig::from_env();
            if let Some(device) = device {
                config.camera_device = device;
            }
            if let Some(dir) = out_dir {
                config.output_dir = dir;
            }
            if no_auto {
                config.auto_capture = false;
            }
            if inline {
                config.use_worker = false;
            }
            let key = parse_key(key.as_deref())?;
            scan(config, key).await
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
            Ok(())
        }
        Commands::Grade {
            key,
            answers,
            image,
            json,
        } => grade(&key, answers, image, json),
        Commands::Config => {
            let config = ScannerConfig::from_env();
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn parse_key(key: Option<&str>) -> Result<AnswerKey> {
    match key {
        Some(list) => AnswerKey::parse_list(list)
            .with_context(|| format!("invalid answer key '{list}'")),
        None => Ok(AnswerKey::default()),
    }
}

fn analyze(
    image: Option<PathBuf>,
    key: Option<&str>,
    layout: Option<LayoutKind>,
    synthetic: bool,
    json: bool,
) -> Result<()> {
    let mut config = ScannerConfig::from_env();
    if let Some(layout) = layout {
        config.marker_layout = layout;
    }
    let analyzer = config.analyzer();
    let key = parse_key(key)?;

    let frame = if synthetic {
        synthetic_frame(&analyzer, &key)
    } else {
        let path = image.context("no image given")?;
        let mut source = StillSource::open(&path)
            .map_err(|e| anyhow::anyhow!("{e} ({})", e.remediation()))?;
        source.next_frame()?
    };

    let analysis = analyzer
        .analyze(&frame.data, frame.width, frame.height, Frame::CHANNELS, &key)
        .context("analysis failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
    } else {
        print_analysis(&analysis, frame.width, frame.height);
    }
    Ok(())
}

/// A well-lit sheet drawn for the configured layout, with the key's answers filled in.
fn synthetic_frame(analyzer: &FrameAnalyzer, key: &AnswerKey) -> Frame {
    let filled = key
        .answers()
        .iter()
        .enumerate()
        .filter_map(|(q, a)| a.choice().map(|c| (q, c.index())))
        .collect();
    let spec = SheetSpec {
        width: 640,
        height: 480,
        filled,
        questions: key.len(),
        ..SheetSpec::default()
    };
    let rgba = render_sheet(&spec, analyzer.layout(), &analyzer.config().bubbles);
    Frame::from_rgba(rgba, spec.width, spec.height, 0)
}

fn print_analysis(analysis: &FrameAnalysis, width: u32, height: u32) {
    let q = &analysis.quality;
    let a = &analysis.alignment;
    println!("Frame:      {width}x{height}");
    println!("Focus:      {:.2}", q.focus);
    println!("Brightness: {:.2}", q.brightness);
    println!(
        "Alignment:  {:.2} ({}/{} markers, {} required)",
        a.alignment,
        a.detected_markers,
        a.corners.len(),
        a.required_markers
    );
    println!("Overall:    {:.2}", q.overall);
    println!(
        "Capture:    {}",
        if analysis.can_capture { "ready" } else { "not ready" }
    );
    for (issue, hint) in q.issues.iter().zip(&q.recommendations) {
        println!("  - {issue}: {hint}");
    }

    println!("Markers:");
    for c in &a.corners {
        println!(
            "  {:<14} ({:>6.1}, {:>6.1})  {}  dark={:.2}",
            c.name,
            c.x,
            c.y,
            if c.detected { "found  " } else { "missing" },
            c.dark_ratio
        );
    }

    let filled: Vec<_> = analysis.bubbles.iter().filter(|b| b.is_filled).collect();
    if !analysis.bubbles.is_empty() {
        println!("Bubbles:    {} scanned, {} look filled", analysis.bubbles.len(), filled.len());
        for b in filled {
            println!(
                "  Q{} {}  fill={:.2} confidence={:.2}",
                b.question_number, b.option, b.fill_ratio, b.confidence
            );
        }
    }
}

async fn scan(config: ScannerConfig, key: AnswerKey) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_on_signal = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop_on_signal.store(true, Ordering::Relaxed);
        }
    });

    let manual = Arc::new(AtomicBool::new(false));
    if !config.auto_capture {
        let manual = Arc::clone(&manual);
        std::thread::spawn(move || {
            for line in std::io::stdin().lock().lines() {
                if line.is_err() {
                    break;
                }
                manual.store(true, Ordering::Relaxed);
            }
        });
        println!("Press Enter to capture once the sheet is ready.");
    }

    let out_dir = config.output_dir.clone();
    let captured = tokio::task::spawn_blocking(move || run_scan(&config, key, &stop, &manual))
        .await
        .context("scan task panicked")??;

    match captured {
        Some(id) => println!("Captured {}", out_dir.join(format!("{id}.jpg")).display()),
        None => println!("Scan cancelled"),
    }
    Ok(())
}

fn run_scan(
    config: &ScannerConfig,
    key: AnswerKey,
    stop: &AtomicBool,
    manual: &AtomicBool,
) -> Result<Option<String>> {
    let camera = Camera::open(&config.camera_device, config.frame_width, config.frame_height)
        .map_err(|e| anyhow::anyhow!("{e} ({})", e.remediation()))?;
    let dark = camera
        .warm_up(config.warmup_frames)
        .map_err(|e| anyhow::anyhow!("{e} ({})", e.remediation()))?;
    tracing::debug!(dark, "warmup complete");

    let sink = DirectorySink::new(&config.output_dir);
    let mut session = ScannerSession::from_config(config, Box::new(camera), Box::new(sink), key)?;

    let mut last_countdown = 0;
    let captured = session.run(config.frame_interval(), |update| {
        report(update, &mut last_countdown);
        if stop.load(Ordering::Relaxed) {
            return LoopControl::Stop;
        }
        if manual.swap(false, Ordering::Relaxed) {
            if update.can_capture {
                return LoopControl::CaptureNow;
            }
            println!("Not ready yet");
        }
        LoopControl::Continue
    });

    if session.state() == CaptureState::Error {
        bail!(
            "scanner stopped: {}",
            session.controller().last_error().unwrap_or("unknown error")
        );
    }
    Ok(captured.map(|id| id.to_string()))
}

fn report(update: &SessionUpdate, last_countdown: &mut u64) {
    match update.event {
        Some(ControllerEvent::Ready) => println!("Sheet ready"),
        Some(ControllerEvent::NotReady) => {
            let hints = update
                .analysis
                .as_ref()
                .map(|a| a.quality.recommendations.join(", "))
                .unwrap_or_default();
            println!("Not ready: {hints}");
        }
        Some(ControllerEvent::CountdownCancelled) => println!("Hold steady..."),
        Some(ControllerEvent::CountdownStarted | ControllerEvent::AutoCapture) | None => {}
    }
    if let Some(error) = &update.capture_error {
        eprintln!("Capture failed: {error}; still scanning");
    }
    if update.countdown_seconds != *last_countdown {
        if update.countdown_seconds > 0 {
            println!("Capturing in {}...", update.countdown_seconds);
        }
        *last_countdown = update.countdown_seconds;
    }
}

fn grade(key: &str, answers: Option<PathBuf>, image: Option<PathBuf>, json: bool) -> Result<()> {
    let key = parse_key(Some(key))?;

    let result = match (answers, image) {
        (Some(path), _) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let value: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("{} is not valid JSON", path.display()))?;
            ExtractionResult::from_response(&value, key.len())
                .with_context(|| format!("unusable answers in {}", path.display()))?
        }
        (None, Some(path)) => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let context = ExtractionContext {
                question_count: key.len(),
                options_per_question: ScannerConfig::from_env().analysis.bubbles.option_count(&key),
            };
            UnavailableExtractor
                .analyze(&bytes, &context)
                .context("answer extraction failed")?
        }
        (None, None) => bail!("either --answers or --image is required"),
    };

    let report = grading::grade(&key, &result);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    for q in &report.per_question {
        println!(
            "Q{:<3} expected {:<5} given {:<5} {:?}",
            q.question_number,
            q.expected.to_string(),
            q.given.to_string(),
            q.outcome
        );
    }
    println!(
        "Score: {}/{} ({:.1}%), {} blank",
        report.correct, report.total, report.score_percent, report.blank
    );
    Ok(())
}
