//! detstream - live object-detection MJPEG streamer
//!
//! Captures from a camera or file, annotates every frame with detections and
//! an FPS readout, and serves the result at `http://<host>:<port>/`.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use detstream::{Shutdown, StreamService, StreamerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Camera index, /dev/video* path, stub:// scene or video file [default: 0].
    #[arg(long)]
    source: Option<String>,
    /// Detector: motion, stub, or a path to a YOLOv8 .onnx export [default: motion].
    #[arg(long)]
    model: Option<String>,
    /// Listener port [default: 5000].
    #[arg(long)]
    port: Option<u16>,
    /// Listener address [default: 0.0.0.0].
    #[arg(long)]
    host: Option<String>,
    /// Requested capture width (best-effort).
    #[arg(long)]
    width: Option<u32>,
    /// Requested capture height (best-effort).
    #[arg(long)]
    height: Option<u32>,
    /// Record the annotated stream to this Motion-JPEG AVI file.
    #[arg(long)]
    save: Option<PathBuf>,
    /// JSON config file; flags override its values.
    #[arg(long, env = "DETSTREAM_CONFIG")]
    config: Option<PathBuf>,
    /// Do not draw the FPS readout.
    #[arg(long)]
    no_fps: bool,
    /// JPEG quality for streamed frames (1-100).
    #[arg(long)]
    jpeg_quality: Option<u8>,
}

impl Args {
    fn apply(self, cfg: &mut StreamerConfig) {
        if let Some(source) = self.source {
            cfg.source.uri = source;
        }
        if let Some(model) = self.model {
            cfg.model = model;
        }
        if let Some(port) = self.port {
            cfg.server.port = port;
        }
        if let Some(host) = self.host {
            cfg.server.host = host;
        }
        if self.width.is_some() {
            cfg.source.width = self.width;
        }
        if self.height.is_some() {
            cfg.source.height = self.height;
        }
        if self.save.is_some() {
            cfg.record.path = self.save;
        }
        if self.no_fps {
            cfg.annotate.show_fps = false;
        }
        if let Some(quality) = self.jpeg_quality {
            cfg.annotate.jpeg_quality = quality;
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = StreamerConfig::load(args.config.as_deref())?;
    args.apply(&mut cfg);
    cfg.validate()?;

    log::info!(
        "detstream {}: source={} model={} listen={}",
        env!("CARGO_PKG_VERSION"),
        cfg.source.uri,
        cfg.model,
        cfg.bind_addr()
    );
    if let Some(path) = &cfg.record.path {
        log::info!("recording to {} at {} fps", path.display(), cfg.record.fps);
    }

    let shutdown = Shutdown::new();
    let handler_shutdown = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received");
        handler_shutdown.trigger();
    })
    .expect("error setting Ctrl-C handler");

    let service = StreamService::start(&cfg, shutdown)?;
    let report = service.serve()?;
    log::info!(
        "detstream stopped: capture {:?}, annotate {:?}",
        report.capture,
        report.annotate
    );
    Ok(())
}
