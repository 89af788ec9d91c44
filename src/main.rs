// src/main.rs

use anyhow::{bail, Context, Result};
use clap::Parser;
use lane_marking::pipeline::{FrameOutput, LanePipeline};
use lane_marking::road_overlay::style_caption;
use lane_marking::video_processor;
use lane_marking::{Config, OrtExecutor};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "lane-marking",
    version,
    about = "Decode lanes from a UFLDv2 model and classify their markings"
)]
struct Args {
    /// Image, video, or directory of inputs
    #[arg(long)]
    input: PathBuf,

    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override model.path from the config
    #[arg(long)]
    model: Option<String>,

    #[arg(long, default_value = "output")]
    output: PathBuf,

    /// Force the original image size used for coordinate mapping
    #[arg(long, num_args = 2, value_names = ["W", "H"])]
    ori_size: Option<Vec<u32>>,

    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Inference threads
    #[arg(long)]
    threads: Option<usize>,

    #[arg(long)]
    tau_row: Option<f32>,

    #[arg(long)]
    tau_col: Option<f32>,

    #[arg(long)]
    min_pts_row: Option<usize>,

    #[arg(long)]
    min_pts_col: Option<usize>,

    #[arg(long)]
    local_width: Option<usize>,

    #[arg(long)]
    gap_tol: Option<usize>,

    /// Keep lanes in slot order instead of sorting left to right
    #[arg(long, default_value_t = false)]
    slot_order: bool,

    /// Write a JSON Lines sidecar next to each output
    #[arg(long, default_value_t = false)]
    json: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(model) = &self.model {
            config.model.path = model.clone();
        }
        if let Some(size) = &self.ori_size {
            match size.as_slice() {
                &[w, h] if w > 0 && h > 0 => config.model.ori_size = Some((w, h)),
                _ => bail!("--ori-size expects two positive integers"),
            }
        }
        if self.debug {
            config.debug = true;
        }
        if let Some(threads) = self.threads {
            config.inference.num_threads = threads;
        }

        let d = &mut config.decoder;
        if let Some(v) = self.tau_row {
            d.tau_row = v;
        }
        if let Some(v) = self.tau_col {
            d.tau_col = v;
        }
        if let Some(v) = self.min_pts_row {
            d.min_pts_row = v;
        }
        if let Some(v) = self.min_pts_col {
            d.min_pts_col = v;
        }
        if let Some(v) = self.local_width {
            d.local_width = v;
        }
        if let Some(v) = self.gap_tol {
            d.gap_tol = v;
        }
        if self.slot_order {
            d.sort_left_to_right = false;
        }

        config.validate()
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    args.apply(&mut config)?;

    let level = if config.debug { "debug" } else { config.logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lane_marking={},ort=warn", level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Lane marking pipeline starting");
    info!(
        "Decoder: tau_row={:.2} tau_col={:.2} min_pts={}/{} local_width={} gap_tol={}",
        config.decoder.tau_row,
        config.decoder.tau_col,
        config.decoder.min_pts_row,
        config.decoder.min_pts_col,
        config.decoder.local_width,
        config.decoder.gap_tol
    );

    let inputs = if args.input.is_dir() {
        video_processor::find_inputs(&args.input)?
    } else if args.input.exists() {
        vec![args.input.clone()]
    } else {
        bail!("input {} does not exist", args.input.display());
    };
    if inputs.is_empty() {
        error!("No images or videos found in {}", args.input.display());
        return Ok(());
    }

    let executor = OrtExecutor::new(&config)?;
    let mut pipeline = LanePipeline::new(config, executor)?;

    fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;

    for (idx, input) in inputs.iter().enumerate() {
        info!("[{}/{}] {}", idx + 1, inputs.len(), input.display());

        let result = if video_processor::is_video_file(input) {
            process_video(&mut pipeline, input, &args)
        } else {
            process_image(&mut pipeline, input, &args)
        };
        if let Err(e) = result {
            error!("Failed to process {}: {:#}", input.display(), e);
        }
    }

    let summary = pipeline.metrics().summary();
    info!("Final report:\n{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

fn open_sidecar(input: &Path, args: &Args) -> Result<Option<BufWriter<File>>> {
    if !args.json {
        return Ok(None);
    }
    let path = video_processor::sidecar_path(input, &args.output);
    let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    info!("Sidecar: {}", path.display());
    Ok(Some(BufWriter::new(file)))
}

fn write_record(sidecar: &mut Option<BufWriter<File>>, out: &FrameOutput) -> Result<()> {
    if let Some(w) = sidecar.as_mut() {
        serde_json::to_writer(&mut *w, &out.record())?;
        writeln!(w)?;
    }
    Ok(())
}

fn log_frame(out: &FrameOutput) {
    if let Some(message) = &out.reshape_warning {
        warn!("frame {}: {}", out.frame_id, message);
    }
    let styles: Vec<String> = out
        .lanes
        .iter()
        .zip(&out.styles)
        .map(|(lane, s)| style_caption(lane.slot, s))
        .collect();
    info!(
        "frame {}: {} lane(s), {} point(s) in {:.1} ms {}",
        out.frame_id,
        out.lanes.len(),
        out.total_points(),
        out.timings.total_us as f64 / 1000.0,
        styles.join(" ")
    );
}

fn process_image(pipeline: &mut LanePipeline<OrtExecutor>, input: &Path, args: &Args) -> Result<()> {
    let frame = video_processor::load_image(input)?;
    let out = pipeline.forward(&frame)?;
    log_frame(&out);

    let path = video_processor::output_image_path(input, &args.output);
    video_processor::save_image(&out.annotated, &path)?;
    info!("Saved {}", path.display());

    let mut sidecar = open_sidecar(input, args)?;
    write_record(&mut sidecar, &out)?;
    if let Some(mut w) = sidecar {
        w.flush()?;
    }
    Ok(())
}

#[cfg(feature = "video")]
fn process_video(pipeline: &mut LanePipeline<OrtExecutor>, input: &Path, args: &Args) -> Result<()> {
    use lane_marking::video_processor::{FrameSink, VideoReader};

    let mut reader = VideoReader::open(input)?;
    let mut sink = FrameSink::open(
        &video_processor::output_video_path(input, &args.output),
        &video_processor::output_frames_dir(input, &args.output),
        reader.width,
        reader.height,
        reader.fps,
    )?;
    let mut sidecar = open_sidecar(input, args)?;

    // new stream, no label history carries over
    pipeline.reset_tracks();

    let mut frames = 0usize;
    while let Some(frame) = reader.read_frame()? {
        let out = pipeline.forward(&frame)?;
        if let Some(message) = &out.reshape_warning {
            warn!("frame {}: {}", out.frame_id, message);
        }
        sink.write(&out.annotated)?;
        write_record(&mut sidecar, &out)?;
        frames += 1;

        if frames % 50 == 0 {
            info!(
                "Progress: {:.1}% ({}/{}) | {:.1} FPS",
                reader.progress(),
                reader.current_frame,
                reader.total_frames,
                pipeline.metrics().fps()
            );
        }
    }

    if let Some(mut w) = sidecar {
        w.flush()?;
    }
    info!("✓ {} frame(s) processed", frames);
    Ok(())
}

#[cfg(not(feature = "video"))]
fn process_video(_pipeline: &mut LanePipeline<OrtExecutor>, input: &Path, _args: &Args) -> Result<()> {
    bail!(
        "{} is a video; rebuild with `--features video` to process videos",
        input.display()
    )
}
