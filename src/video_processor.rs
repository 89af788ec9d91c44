// src/video_processor.rs
//
// File-level I/O around the pipeline: input discovery, still images, and
// video in/out. Video decoding/encoding goes through OpenCV and is only
// available with the `video` feature; without a usable writer the annotated
// frames are written as a numbered PNG sequence instead.

use anyhow::{Context, Result};
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];
const VIDEO_EXTENSIONS: [&str; 6] = ["mp4", "avi", "mov", "mkv", "m4v", "webm"];

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| allowed.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn is_image_file(path: &Path) -> bool {
    has_extension(path, &IMAGE_EXTENSIONS)
}

pub fn is_video_file(path: &Path) -> bool {
    has_extension(path, &VIDEO_EXTENSIONS)
}

/// Every image or video under `dir`, sorted by path.
pub fn find_inputs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut inputs: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && (is_image_file(p) || is_video_file(p)))
        .collect();
    inputs.sort();

    info!("Found {} input file(s) in {}", inputs.len(), dir.display());
    Ok(inputs)
}

// ============================================================================
// OUTPUT NAMING
// ============================================================================

fn stem(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string())
}

pub fn output_image_path(input: &Path, out_dir: &Path) -> PathBuf {
    out_dir.join(format!("{}_lane.jpg", stem(input)))
}

pub fn output_video_path(input: &Path, out_dir: &Path) -> PathBuf {
    out_dir.join(format!("{}_lane.mp4", stem(input)))
}

pub fn output_frames_dir(input: &Path, out_dir: &Path) -> PathBuf {
    out_dir.join(format!("{}_lane_frames", stem(input)))
}

/// JSON Lines sidecar, one record per processed frame.
pub fn sidecar_path(input: &Path, out_dir: &Path) -> PathBuf {
    out_dir.join(format!("{}_lane.jsonl", stem(input)))
}

// ============================================================================
// STILL IMAGES
// ============================================================================

pub fn load_image(path: &Path) -> Result<RgbImage> {
    let img = image::open(path).with_context(|| format!("Failed to read image {}", path.display()))?;
    Ok(img.to_rgb8())
}

pub fn save_image(img: &RgbImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    img.save(path)
        .with_context(|| format!("Failed to write image {}", path.display()))?;
    Ok(())
}

/// Numbered PNG frames: `frame_000000.png`, `frame_000001.png`, ...
pub struct FrameSequenceWriter {
    dir: PathBuf,
    next_index: usize,
}

impl FrameSequenceWriter {
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create frame directory {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            next_index: 0,
        })
    }

    pub fn frame_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("frame_{:06}.png", index))
    }

    pub fn write(&mut self, frame: &RgbImage) -> Result<()> {
        let path = self.frame_path(self.next_index);
        save_image(frame, &path)?;
        self.next_index += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> usize {
        self.next_index
    }
}

// ============================================================================
// VIDEO
// ============================================================================

/// Destination for annotated video frames.
pub enum FrameSink {
    #[cfg(feature = "video")]
    Video(video::VideoFileWriter),
    Frames(FrameSequenceWriter),
}

impl FrameSink {
    /// Open an encoded video at `video_path`, or fall back to a PNG sequence
    /// in `frames_dir` when no writer can be opened.
    #[cfg_attr(not(feature = "video"), allow(unused_variables))]
    pub fn open(video_path: &Path, frames_dir: &Path, width: u32, height: u32, fps: f64) -> Result<Self> {
        #[cfg(feature = "video")]
        match video::VideoFileWriter::create(video_path, width, height, fps) {
            Ok(writer) => {
                info!("Output video: {}", video_path.display());
                return Ok(FrameSink::Video(writer));
            }
            Err(e) => warn!("Video writer unavailable ({:#}), writing frames instead", e),
        }

        #[cfg(not(feature = "video"))]
        warn!("Built without video support, writing frames instead");

        info!("Output frames: {}", frames_dir.display());
        Ok(FrameSink::Frames(FrameSequenceWriter::create(frames_dir)?))
    }

    pub fn write(&mut self, frame: &RgbImage) -> Result<()> {
        match self {
            #[cfg(feature = "video")]
            FrameSink::Video(writer) => writer.write(frame),
            FrameSink::Frames(writer) => writer.write(frame),
        }
    }
}

#[cfg(feature = "video")]
pub use video::VideoReader;

#[cfg(feature = "video")]
mod video {
    use anyhow::{bail, Context, Result};
    use image::RgbImage;
    use opencv::{
        core::{self, Mat},
        imgproc,
        prelude::*,
        videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst, VideoWriter},
    };
    use std::path::Path;
    use tracing::info;

    pub struct VideoReader {
        cap: VideoCapture,
        pub fps: f64,
        pub total_frames: i32,
        pub current_frame: i32,
        pub width: u32,
        pub height: u32,
    }

    impl VideoReader {
        pub fn open(path: &Path) -> Result<Self> {
            info!("Opening video: {}", path.display());

            let path_str = path.to_str().context("video path is not valid UTF-8")?;
            let cap = VideoCapture::from_file(path_str, videoio::CAP_ANY)?;
            if !cap.is_opened()? {
                bail!("Failed to open video file {}", path.display());
            }

            let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
            let total_frames = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_COUNT)? as i32;
            let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)? as u32;
            let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)? as u32;

            info!(
                "Video properties: {}x{} @ {:.1} FPS, {} frames",
                width, height, fps, total_frames
            );

            Ok(Self {
                cap,
                fps: if fps > 0.0 { fps } else { 30.0 },
                total_frames,
                current_frame: 0,
                width,
                height,
            })
        }

        /// Next frame as RGB, `None` at end of stream.
        pub fn read_frame(&mut self) -> Result<Option<RgbImage>> {
            let mut mat = Mat::default();
            if !VideoCaptureTrait::read(&mut self.cap, &mut mat)? || mat.empty() {
                return Ok(None);
            }
            self.current_frame += 1;

            let mut rgb = Mat::default();
            imgproc::cvt_color_def(&mat, &mut rgb, imgproc::COLOR_BGR2RGB)?;

            let (w, h) = (rgb.cols() as u32, rgb.rows() as u32);
            let data = rgb.data_bytes()?.to_vec();
            let img = RgbImage::from_raw(w, h, data).context("decoded frame has unexpected size")?;
            Ok(Some(img))
        }

        pub fn progress(&self) -> f32 {
            if self.total_frames == 0 {
                return 0.0;
            }
            (self.current_frame as f32 / self.total_frames as f32) * 100.0
        }
    }

    pub struct VideoFileWriter {
        writer: VideoWriter,
    }

    impl VideoFileWriter {
        pub fn create(path: &Path, width: u32, height: u32, fps: f64) -> Result<Self> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let path_str = path.to_str().context("output path is not valid UTF-8")?;
            let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
            let writer = VideoWriter::new(
                path_str,
                fourcc,
                fps,
                core::Size::new(width as i32, height as i32),
                true,
            )?;
            if !writer.is_opened()? {
                bail!("VideoWriter could not open {}", path.display());
            }
            Ok(Self { writer })
        }

        pub fn write(&mut self, frame: &RgbImage) -> Result<()> {
            let flat = Mat::from_slice(frame.as_raw())?;
            let rgb = flat.reshape(3, frame.height() as i32)?;
            let mut bgr = Mat::default();
            imgproc::cvt_color_def(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR)?;
            self.writer.write(&bgr)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_file_kinds() {
        assert!(is_image_file(Path::new("a/b/road.JPG")));
        assert!(is_image_file(Path::new("road.png")));
        assert!(is_video_file(Path::new("clip.MP4")));
        assert!(is_video_file(Path::new("dashcam/clip.webm")));
        assert!(!is_video_file(Path::new("road.png")));
        assert!(!is_image_file(Path::new("notes")));
    }

    #[test]
    fn test_output_names() {
        let input = Path::new("/data/in/drive_01.mp4");
        let out = Path::new("/tmp/out");
        assert_eq!(output_image_path(input, out), out.join("drive_01_lane.jpg"));
        assert_eq!(output_video_path(input, out), out.join("drive_01_lane.mp4"));
        assert_eq!(output_frames_dir(input, out), out.join("drive_01_lane_frames"));
        assert_eq!(sidecar_path(input, out), out.join("drive_01_lane.jsonl"));
    }

    #[test]
    fn test_frame_sequence_writer() {
        let dir = std::env::temp_dir().join(format!("lane_frames_{}", std::process::id()));
        let mut writer = FrameSequenceWriter::create(&dir).unwrap();
        let frame = RgbImage::from_pixel(8, 4, Rgb([10, 20, 30]));
        writer.write(&frame).unwrap();
        writer.write(&frame).unwrap();

        assert_eq!(writer.frames_written(), 2);
        assert!(dir.join("frame_000000.png").exists());
        assert!(dir.join("frame_000001.png").exists());

        let back = load_image(&dir.join("frame_000001.png")).unwrap();
        assert_eq!(back.get_pixel(3, 2), &Rgb([10, 20, 30]));
        let _ = fs::remove_dir_all(&dir);
    }

    #[cfg(not(feature = "video"))]
    #[test]
    fn test_frame_sink_falls_back_to_png_sequence() {
        let dir = std::env::temp_dir().join(format!("lane_sink_{}", std::process::id()));
        let mut sink = FrameSink::open(&dir.join("clip_lane.mp4"), &dir.join("frames"), 8, 4, 25.0).unwrap();
        sink.write(&RgbImage::new(8, 4)).unwrap();

        assert!(matches!(sink, FrameSink::Frames(_)));
        assert!(dir.join("frames/frame_000000.png").exists());
        assert!(!dir.join("clip_lane.mp4").exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_find_inputs_filters_and_sorts() {
        let dir = std::env::temp_dir().join(format!("lane_inputs_{}", std::process::id()));
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("b.mp4"), b"").unwrap();
        fs::write(dir.join("nested/a.png"), b"").unwrap();
        fs::write(dir.join("readme.txt"), b"").unwrap();

        let found = find_inputs(&dir).unwrap();
        assert_eq!(found, vec![dir.join("b.mp4"), dir.join("nested/a.png")]);
        let _ = fs::remove_dir_all(&dir);
    }
}
