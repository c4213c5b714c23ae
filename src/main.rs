//! Multicam-capture binary for testing camera capture.

use std::error::Error;
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use multicam_capture::validation::split_batch;
use multicam_capture::{enumerate_formats, list_cameras, validate, FourCC, Multicam};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// camera capture device, repeat for several cameras
    #[arg(
        short,
        long = "device",
        env = "MULTICAM_DEVICES",
        value_delimiter = ',',
        default_value = "/dev/video0"
    )]
    devices: Vec<PathBuf>,

    /// capture resolution
    #[arg(long, default_value = "640 480", value_delimiter = ' ', num_args = 2)]
    size: Vec<u32>,

    /// pixel format FOURCC
    #[arg(short, long, default_value = "MJPG")]
    format: FourCC,

    /// frame rate
    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// number of batches to capture
    #[arg(short = 'n', long, default_value_t = 10)]
    frames: usize,

    /// write each camera's last frame as JPEG into this directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// list capture devices and exit
    #[arg(long)]
    list: bool,

    /// print the formats of each device and exit
    #[arg(long)]
    formats: bool,

    /// verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Err(err) = run(&args) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    if args.list {
        for path in list_cameras() {
            let caps = validate(&path)?;
            println!("{}: {} ({})", path.display(), caps.card, caps.driver);
        }
        return Ok(());
    }

    if args.formats {
        for path in &args.devices {
            println!("{}:", path.display());
            for (fourcc, info) in enumerate_formats(path)? {
                println!("  {fourcc} {}", info.description);
                for size in &info.sizes {
                    let rates: Vec<String> =
                        size.rates().iter().map(|r| format!("{r:.2}")).collect();
                    println!("    {}x{} @ {}", size.width, size.height, rates.join(", "));
                }
            }
        }
        return Ok(());
    }

    let (width, height) = match args.size.as_slice() {
        &[w, h] => (w, h),
        _ => return Err("--size takes a width and a height".into()),
    };

    let mut multicam = Multicam::new(args.devices.clone(), width, height, args.format, args.fps)?;
    multicam.start()?;
    info!(cameras = multicam.len(), width, height, format = %args.format, "streaming");

    let started = Instant::now();
    let mut last = Vec::new();
    for batch in 0..args.frames {
        last = multicam.read()?;
        info!(batch, bytes = last.len(), "captured");
    }
    let elapsed = started.elapsed().as_secs_f64();
    if elapsed > 0.0 && args.frames > 0 {
        #[allow(clippy::cast_precision_loss)]
        let rate = args.frames as f64 / elapsed;
        info!(batches = args.frames, rate, "done");
    }

    if let Err(err) = multicam.stop() {
        warn!(error = %err, "stop failed");
    }

    if let (Some(dir), false) = (&args.output, last.is_empty()) {
        std::fs::create_dir_all(dir)?;
        for (index, frame) in split_batch(&last, width, height)?.into_iter().enumerate() {
            let path = dir.join(format!("camera{index}.jpg"));
            image::save_buffer(
                &path,
                &frame.data,
                width,
                height,
                image::ExtendedColorType::Rgb8,
            )?;
            info!(path = %path.display(), "saved");
        }
    }

    Ok(())
}
