//! vigild - Vigil detection daemon
//!
//! This daemon:
//! 1. Connects to the configured live source (probe-validated)
//! 2. Spawns the local control endpoint (detection toggle, on-demand capture)
//! 3. Runs the sampling scheduler: motion differencing, perception
//!    providers, cooldowns, and the alert dedup gate
//! 4. Survives source drops through backoff reconnects, and exits nonzero
//!    only when a source is lost for good

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use vigil_kernel::{
    AlertDispatcher, CameraAdapter, ControlConfig, ControlServer, ControlState, LiveSource,
    LogDispatcher, MonotonicClock, MotionConfig, MotionDifferencer, PerceptionProvider,
    RtspCamera, RtspCameraConfig, SamplingScheduler, SchedulerConfig, SourceError,
    StubPresenceProvider, VigildConfig,
};

#[derive(Debug, Parser)]
#[command(name = "vigild", about = "Vigil detection daemon", version)]
struct Args {
    /// Configuration file (TOML).
    #[arg(long, env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,

    /// Override the source URL from the config file.
    #[arg(long)]
    source_url: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => VigildConfig::load_from(path)?,
        None => VigildConfig::load()?,
    };
    if let Some(url) = args.source_url {
        cfg.source.url = url;
    }

    log::info!("vigild {} starting", env!("CARGO_PKG_VERSION"));
    log::info!("source: {}", cfg.source.url);

    let control = Arc::new(ControlState::new(cfg.detection.enabled));

    // SIGINT/SIGTERM flip the shared shutdown flag; backoff sleeps poll it,
    // so even a mid-reconnect daemon stops promptly.
    let ctrlc_state = control.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received");
        ctrlc_state.request_shutdown();
    })
    .map_err(|e| anyhow!("failed to install signal handler: {}", e))?;

    let adapter = build_adapter(&cfg)?;
    let clock = Arc::new(MonotonicClock::new());
    let mut source = LiveSource::new(
        adapter,
        cfg.source.max_reconnect_attempts,
        clock.clone(),
        control.shutdown_flag(),
    );
    source.connect()?;
    let properties = source.properties();
    log::info!(
        "stream properties: {}x{} @ {} fps",
        properties.width,
        properties.height,
        properties.fps
    );

    let control_handle = ControlServer::new(
        ControlConfig {
            addr: cfg.control.addr.clone(),
        },
        control.clone(),
    )
    .spawn()?;
    log::info!("control endpoint listening on {}", control_handle.addr);

    let motion = cfg.motion.enabled.then(|| {
        MotionDifferencer::new(MotionConfig {
            sensitivity: cfg.motion.sensitivity,
            min_region_area: cfg.motion.min_region_area,
            ..MotionConfig::default()
        })
    });

    // Presence/identity models are pluggable; the stub provider stands in
    // until a deployment wires real ones.
    let mut providers: Vec<Box<dyn PerceptionProvider>> = Vec::new();
    if cfg.presence.enabled {
        providers.push(Box::new(StubPresenceProvider::new(50)));
        log::info!("presence provider registered: stub");
    }

    let dispatcher = build_dispatcher(&cfg)?;

    let scheduler_config = SchedulerConfig {
        detection_interval: cfg.detection.interval,
        health_check_interval: cfg.source.health_check_interval,
        motion_cooldown: cfg.motion.cooldown,
        min_motion_percentage: cfg.motion.min_percentage,
        presence_cooldown: cfg.presence.cooldown,
        duplicate_threshold: cfg.alerts.duplicate_threshold,
        ..SchedulerConfig::default()
    };

    let mut scheduler = SamplingScheduler::new(
        scheduler_config,
        source,
        motion,
        providers,
        dispatcher,
        clock,
        control.clone(),
    );

    let result = scheduler.run();

    control.request_shutdown();
    if let Err(err) = control_handle.stop() {
        log::warn!("control endpoint stop failed: {}", err);
    }

    match result {
        Ok(()) => {
            log::info!("vigild stopped");
            Ok(())
        }
        Err(err @ SourceError::ConnectionLost { .. }) => {
            log::error!("vigild stopping: {}", err);
            Err(err.into())
        }
        Err(err) => Err(err.into()),
    }
}

fn build_adapter(cfg: &VigildConfig) -> Result<Box<dyn CameraAdapter>> {
    let url = cfg.source.url.as_str();
    if url.starts_with("stub://") || url.starts_with("rtsp://") {
        return Ok(Box::new(RtspCamera::new(RtspCameraConfig {
            url: url.to_string(),
            fps: cfg.source.fps,
            width: cfg.source.width,
            height: cfg.source.height,
        })?));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        #[cfg(feature = "ingest-http")]
        {
            use std::time::Duration;
            use vigil_kernel::{HttpCamera, HttpCameraConfig};
            return Ok(Box::new(HttpCamera::new(HttpCameraConfig {
                url: url.to_string(),
                fps: cfg.source.fps,
                timeout: Duration::from_secs(5),
            })?));
        }
        #[cfg(not(feature = "ingest-http"))]
        bail!("http sources require the ingest-http feature");
    }
    bail!("unsupported source url '{}'", url)
}

#[cfg(not(feature = "alert-mqtt"))]
fn build_dispatcher(_cfg: &VigildConfig) -> Result<Box<dyn AlertDispatcher>> {
    Ok(Box::new(LogDispatcher))
}

#[cfg(feature = "alert-mqtt")]
fn build_dispatcher(_cfg: &VigildConfig) -> Result<Box<dyn AlertDispatcher>> {
    use vigil_kernel::{MqttDispatcher, MqttDispatcherConfig};
    match std::env::var("VIGIL_MQTT_BROKER").ok() {
        Some(broker) => {
            let (host, port) = match broker.rsplit_once(':') {
                Some((host, port)) => (host.to_string(), port.parse()?),
                None => (broker, 1883),
            };
            Ok(Box::new(MqttDispatcher::connect(MqttDispatcherConfig {
                broker_host: host,
                broker_port: port,
                ..MqttDispatcherConfig::default()
            })?))
        }
        None => Ok(Box::new(LogDispatcher)),
    }
}
