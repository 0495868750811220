use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use visible_light_common::config::Config;
use visible_light_reader::bus::{self, CommandBus, LocalBus};
use visible_light_reader::controller::{CaptureController, ControllerSettings, LoopEnd};
use visible_light_reader::convert::PixelConverter;
use visible_light_reader::detector::MotionEntryDetector;
use visible_light_reader::pending::PendingCommands;
use visible_light_reader::recorder::{self, EncoderSettings, FfmpegRecorder};
use visible_light_reader::source::MjpegSource;

/// How often commands are polled once acquisition has given up.
const COMMAND_POLL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        camera = config.camera.url,
        width = config.camera.width,
        height = config.camera.height,
        fps = config.camera.fps,
        capture_folder = %config.capture.folder.display(),
        bus = config.bus.mode,
        "starting visible-light reader"
    );

    // Recordings fail to start without ffmpeg; acquisition still runs.
    recorder::ffmpeg::check_ffmpeg_available().await;

    let bus = match connect_bus(&config) {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, mode = config.bus.mode, "failed to set up command bus");
            std::process::exit(1);
        }
    };

    let pending = Arc::new(PendingCommands::new());
    tokio::spawn(bus::run_subscription(bus.subscribe(), Arc::clone(&pending)));

    let (width, height) = (config.camera.width, config.camera.height);
    let source = MjpegSource::spawn(
        &tokio::runtime::Handle::current(),
        config.camera.url.clone(),
        width,
        height,
    );
    let recorder = FfmpegRecorder::new(
        config.camera.fps,
        (width, height),
        config.capture.color,
        EncoderSettings {
            codec: config.capture.codec.clone(),
            crf: config.capture.crf,
            preset: config.capture.preset.clone(),
        },
    );
    let detector = MotionEntryDetector::new(&config.detector);

    let controller = CaptureController::new(
        source,
        PixelConverter::new(width, height),
        recorder,
        detector,
        Arc::clone(&bus),
        pending,
        ControllerSettings::from_config(&config),
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let acquisition = tokio::task::spawn_blocking({
        let shutdown = Arc::clone(&shutdown);
        move || {
            let mut controller = controller;
            if controller.run(&shutdown) == LoopEnd::Exhausted {
                // Acquisition is gone but an open recording can still be
                // stopped or aborted from the bus.
                controller.serve_commands(&shutdown, COMMAND_POLL);
            }
            info!(state = controller.state().name(), "capture controller stopped");
            // Dropping the controller finalizes any open recording.
        }
    });

    shutdown_signal().await;
    shutdown.store(true, Ordering::Release);

    if let Err(e) = acquisition.await {
        error!(error = %e, "acquisition task failed");
        std::process::exit(1);
    }
    info!("visible-light reader stopped");
}

fn connect_bus(config: &Config) -> Result<Arc<dyn CommandBus>, String> {
    match config.bus.mode.as_str() {
        "local" => Ok(Arc::new(LocalBus::new())),
        #[cfg(feature = "kafka")]
        "kafka" => bus::KafkaBus::connect(&config.bus.brokers, &config.bus.group_id)
            .map(|b| Arc::new(b) as Arc<dyn CommandBus>)
            .map_err(|e| e.to_string()),
        #[cfg(not(feature = "kafka"))]
        "kafka" => Err("built without the `kafka` feature".into()),
        other => Err(format!("unknown bus mode '{other}', expected 'local' or 'kafka'")),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("ctrl-c received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}
