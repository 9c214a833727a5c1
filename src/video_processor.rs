// src/video_processor.rs
//
// Frame sources and input discovery. Sources run on the reader thread and
// hand decoded RGB frames to the analysis loop; they never look at frame
// content beyond decoding it.

use crate::error::PipelineError;
use crate::types::{Config, Frame};
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// One decoded frame, or the reason it could not be decoded.
pub type FrameMessage = std::result::Result<Frame, PipelineError>;

// ============================================================================
// CANCELLATION
// ============================================================================

/// Shared stop flag. Checked between frames only.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// INPUTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoInput {
    VideoFile(PathBuf),
    /// Directory of still images, one frame per file, sorted by name.
    ImageSequence(PathBuf),
}

impl VideoInput {
    pub fn path(&self) -> &Path {
        match self {
            Self::VideoFile(p) | Self::ImageSequence(p) => p,
        }
    }

    /// Base name used for output files.
    pub fn stem(&self) -> String {
        let path = self.path();
        let stem = match self {
            Self::VideoFile(_) => path.file_stem(),
            Self::ImageSequence(_) => path.file_name(),
        };
        stem.map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string())
    }

    /// `<dir>/<stem>_tracks.csv` and `<dir>/<stem>_manifest.json`, where
    /// `dir` defaults to `csv/` next to the input.
    pub fn output_paths(&self, output_dir: Option<&Path>) -> (PathBuf, PathBuf) {
        let dir = match output_dir {
            Some(d) => d.to_path_buf(),
            None => self
                .path()
                .parent()
                .map(|p| p.join("csv"))
                .unwrap_or_else(|| PathBuf::from("csv")),
        };
        let stem = self.stem();
        (
            dir.join(format!("{}_tracks.csv", stem)),
            dir.join(format!("{}_manifest.json", stem)),
        )
    }
}

fn has_extension(path: &Path, extensions: &[impl AsRef<str>]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.as_ref().eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

fn is_image(path: &Path) -> bool {
    path.is_file() && has_extension(path, &IMAGE_EXTENSIONS[..])
}

fn list_images(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| is_image(p))
        .collect()
}

/// A single input given on the command line: a directory is an image
/// sequence, anything else is treated as a video file.
pub fn resolve_input(path: &Path) -> Result<VideoInput> {
    if path.is_dir() {
        Ok(VideoInput::ImageSequence(path.to_path_buf()))
    } else if path.is_file() {
        Ok(VideoInput::VideoFile(path.to_path_buf()))
    } else {
        anyhow::bail!("Input {} does not exist", path.display())
    }
}

/// Batch discovery: direct children of `dir` that are video files (by
/// configured extension) or directories containing images. Sorted by name.
pub fn find_inputs(dir: &Path, config: &Config) -> Result<Vec<VideoInput>> {
    if !dir.is_dir() {
        anyhow::bail!("Batch input {} is not a directory", dir.display());
    }
    let mut inputs = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path.is_dir() {
            if !list_images(path).is_empty() {
                inputs.push(VideoInput::ImageSequence(path.to_path_buf()));
            }
        } else if has_extension(path, config.output.video_extensions.as_slice()) {
            inputs.push(VideoInput::VideoFile(path.to_path_buf()));
        }
    }

    info!("Found {} input(s) in {}", inputs.len(), dir.display());
    Ok(inputs)
}

// ============================================================================
// FRAME SOURCES
// ============================================================================

/// Hands out frame indices in order. An index is used up when it is
/// claimed, whether or not its frame then decodes.
#[derive(Debug, Default)]
pub struct FrameCursor {
    next: u64,
}

impl FrameCursor {
    pub fn claim(&mut self) -> u64 {
        let index = self.next;
        self.next += 1;
        index
    }

    /// Index the next `claim` will return.
    pub fn position(&self) -> u64 {
        self.next
    }
}

pub trait FrameSource: Send {
    /// (width, height) of every frame this source yields.
    fn dimensions(&self) -> (usize, usize);

    /// Number of frames, when the container knows it.
    fn frame_count(&self) -> Option<u64>;

    /// `Ok(None)` at end of input. A `FrameRead` error consumes the frame
    /// index; the next call moves on to the following frame.
    fn read_frame(&mut self) -> std::result::Result<Option<Frame>, PipelineError>;
}

pub fn open_source(input: &VideoInput) -> std::result::Result<Box<dyn FrameSource>, PipelineError> {
    match input {
        VideoInput::ImageSequence(dir) => Ok(Box::new(ImageSequenceSource::open(dir)?)),
        #[cfg(feature = "video")]
        VideoInput::VideoFile(path) => Ok(Box::new(opencv_source::OpenCvSource::open(path)?)),
        #[cfg(not(feature = "video"))]
        VideoInput::VideoFile(path) => Err(PipelineError::SourceUnreadable {
            input: path.display().to_string(),
            reason: "built without the `video` feature; use an image-sequence directory"
                .to_string(),
        }),
    }
}

fn decode_image(path: &Path) -> std::result::Result<(usize, usize, Vec<u8>), String> {
    let img = image::open(path).map_err(|e| e.to_string())?;
    let rgb = img.to_rgb8();
    let (w, h) = (rgb.width() as usize, rgb.height() as usize);
    Ok((w, h, rgb.into_raw()))
}

pub struct ImageSequenceSource {
    files: Vec<PathBuf>,
    cursor: FrameCursor,
    width: usize,
    height: usize,
    first: Option<Frame>,
}

impl ImageSequenceSource {
    /// Decodes the first image up front; if that fails the whole sequence is
    /// unreadable.
    pub fn open(dir: &Path) -> std::result::Result<Self, PipelineError> {
        let unreadable = |reason: String| PipelineError::SourceUnreadable {
            input: dir.display().to_string(),
            reason,
        };

        let files = list_images(dir);
        let first_path = files
            .first()
            .ok_or_else(|| unreadable("no image files".to_string()))?;
        let (width, height, data) = decode_image(first_path)
            .map_err(|e| unreadable(format!("{}: {}", first_path.display(), e)))?;

        info!(
            "Image sequence {}: {} frames, {}x{}",
            dir.display(),
            files.len(),
            width,
            height
        );

        let mut cursor = FrameCursor::default();
        let first = Frame::from_rgb(cursor.claim(), width, height, data);
        Ok(Self {
            cursor,
            width,
            height,
            first: Some(first),
            files,
        })
    }
}

impl FrameSource for ImageSequenceSource {
    fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn frame_count(&self) -> Option<u64> {
        Some(self.files.len() as u64)
    }

    fn read_frame(&mut self) -> std::result::Result<Option<Frame>, PipelineError> {
        if let Some(frame) = self.first.take() {
            return Ok(Some(frame));
        }
        let Some(path) = self.files.get(self.cursor.position() as usize) else {
            return Ok(None);
        };
        let index = self.cursor.claim();

        let (w, h, data) = decode_image(path).map_err(|e| PipelineError::FrameRead {
            frame_index: index,
            reason: format!("{}: {}", path.display(), e),
        })?;
        if (w, h) != (self.width, self.height) {
            return Err(PipelineError::FrameRead {
                frame_index: index,
                reason: format!(
                    "{} is {}x{}, sequence is {}x{}",
                    path.display(),
                    w,
                    h,
                    self.width,
                    self.height
                ),
            });
        }
        Ok(Some(Frame::from_rgb(index, w, h, data)))
    }
}

#[cfg(feature = "video")]
mod opencv_source {
    use super::{FrameCursor, FrameSource};
    use crate::error::PipelineError;
    use crate::types::Frame;
    use opencv::{
        core::Mat,
        imgproc,
        prelude::*,
        videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
    };
    use std::path::Path;
    use tracing::info;

    pub struct OpenCvSource {
        cap: VideoCapture,
        cursor: FrameCursor,
        total_frames: Option<u64>,
        width: usize,
        height: usize,
        first: Option<Frame>,
    }

    fn cv_err(input: &Path, e: opencv::Error) -> PipelineError {
        PipelineError::SourceUnreadable {
            input: input.display().to_string(),
            reason: e.to_string(),
        }
    }

    impl OpenCvSource {
        pub fn open(path: &Path) -> Result<Self, PipelineError> {
            info!("Opening video: {}", path.display());
            let unreadable = |reason: &str| PipelineError::SourceUnreadable {
                input: path.display().to_string(),
                reason: reason.to_string(),
            };

            let name = path.to_str().ok_or_else(|| unreadable("non UTF-8 path"))?;
            let cap = VideoCapture::from_file(name, videoio::CAP_ANY).map_err(|e| cv_err(path, e))?;
            if !cap.is_opened().map_err(|e| cv_err(path, e))? {
                return Err(unreadable("failed to open video file"));
            }

            let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS).unwrap_or(0.0);
            let count = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_COUNT).unwrap_or(0.0);
            let mut source = Self {
                cap,
                cursor: FrameCursor::default(),
                total_frames: (count > 0.0).then_some(count as u64),
                width: 0,
                height: 0,
                first: None,
            };

            let first = source
                .decode_next()
                .map_err(|e| unreadable(&e.to_string()))?
                .ok_or_else(|| unreadable("no decodable first frame"))?;
            source.width = first.width;
            source.height = first.height;
            info!(
                "Video properties: {}x{} @ {:.1} FPS (container), {} frames",
                first.width,
                first.height,
                fps,
                count as i64
            );
            source.first = Some(first);
            Ok(source)
        }

        fn decode_next(&mut self) -> Result<Option<Frame>, PipelineError> {
            // claimed before reading so a failed decode still moves on
            let index = self.cursor.claim();
            let read_err = |e: opencv::Error| PipelineError::FrameRead {
                frame_index: index,
                reason: e.to_string(),
            };

            let mut mat = Mat::default();
            let ok = VideoCaptureTrait::read(&mut self.cap, &mut mat).map_err(read_err)?;
            if !ok || mat.empty() {
                return Ok(None);
            }

            let mut rgb = Mat::default();
            imgproc::cvt_color(&mat, &mut rgb, imgproc::COLOR_BGR2RGB, 0).map_err(read_err)?;
            let data = rgb.data_bytes().map_err(read_err)?.to_vec();
            Ok(Some(Frame::from_rgb(
                index,
                rgb.cols() as usize,
                rgb.rows() as usize,
                data,
            )))
        }
    }

    impl FrameSource for OpenCvSource {
        fn dimensions(&self) -> (usize, usize) {
            (self.width, self.height)
        }

        fn frame_count(&self) -> Option<u64> {
            self.total_frames
        }

        fn read_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
            if let Some(frame) = self.first.take() {
                return Ok(Some(frame));
            }
            self.decode_next()
        }
    }
}

// ============================================================================
// READER
// ============================================================================

/// Producer loop for the reader thread. Sends every decoded frame (and every
/// recoverable read error) in order; stops on end of input, a fatal error,
/// the stop signal, or a dropped receiver.
pub fn run_reader(mut source: Box<dyn FrameSource>, tx: mpsc::Sender<FrameMessage>, stop: StopSignal) {
    loop {
        if stop.is_stopped() {
            debug!("Reader stopping on request");
            return;
        }
        let message = match source.read_frame() {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => return,
            Err(e) if e.is_recoverable() => {
                warn!("{}", e);
                Err(e)
            }
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        };
        if tx.blocking_send(message).is_err() {
            return;
        }
    }
}
