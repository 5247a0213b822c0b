use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::shared::clock::{Clock, Timestamp};
use crate::shared::constants::IMAGE_EXTENSIONS;
use crate::shared::frame::{Frame, PixelFormat, Rotation};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to read frame directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no images found in {0}")]
    Empty(PathBuf),
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("invalid frame rate {0}")]
    InvalidFps(f64),
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// How a decoded sequence is played back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplaySettings {
    pub fps: f64,
    /// Orientation hint stamped on every frame, as a sensor would report it.
    pub rotation: Rotation,
    /// Restart from the first image after the last one.
    pub looping: bool,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            fps: 30.0,
            rotation: Rotation::Deg0,
            looping: false,
        }
    }
}

struct StillImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

/// Replays a directory of still images as a camera stream.
///
/// Images are decoded up front in file-name order, so playback cadence is
/// not disturbed by decoding.
pub struct ImageSequenceSource {
    images: Vec<StillImage>,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path) -> Result<Self, SourceError> {
        let entries = fs::read_dir(dir).map_err(|e| SourceError::ReadDir {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && has_image_extension(path))
            .collect();
        paths.sort();
        if paths.is_empty() {
            return Err(SourceError::Empty(dir.to_path_buf()));
        }

        let images = paths
            .iter()
            .map(|path| decode(path))
            .collect::<Result<Vec<_>, _>>()?;
        log::info!("Loaded {} frames from {}", images.len(), dir.display());
        Ok(Self { images })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Image `index` as an RGBA frame.
    pub fn frame_at(&self, index: usize, rotation: Rotation, timestamp: Timestamp) -> Option<Frame> {
        let image = self.images.get(index)?;
        Some(Frame::new(
            image.data.clone(),
            image.width,
            image.height,
            PixelFormat::Rgba8888,
            rotation,
            timestamp,
        ))
    }

    /// Starts playback on a capture thread, handing each frame to `deliver`.
    pub fn start<F>(
        self,
        mut deliver: F,
        settings: ReplaySettings,
        clock: Arc<dyn Clock>,
    ) -> Result<CaptureHandle, SourceError>
    where
        F: FnMut(Frame) + Send + 'static,
    {
        if !(settings.fps.is_finite() && settings.fps > 0.0) {
            return Err(SourceError::InvalidFps(settings.fps));
        }
        // Tiny rates overflow the interval.
        let interval = Duration::try_from_secs_f64(1.0 / settings.fps)
            .map_err(|_| SourceError::InvalidFps(settings.fps))?;
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let thread = std::thread::Builder::new()
            .name("browtap-capture".into())
            .spawn(move || {
                let mut produced = 0u64;
                let mut next_due = Instant::now();
                'replay: loop {
                    for index in 0..self.len() {
                        if stop_flag.load(Ordering::Relaxed) {
                            break 'replay;
                        }
                        let now = Instant::now();
                        if next_due > now {
                            std::thread::sleep(next_due - now);
                        }
                        next_due += interval;

                        if let Some(frame) = self.frame_at(index, settings.rotation, clock.now()) {
                            deliver(frame);
                            produced += 1;
                        }
                    }
                    if !settings.looping {
                        break;
                    }
                }
                log::debug!("Capture finished after {produced} frames");
                produced
            })
            .map_err(SourceError::Spawn)?;

        Ok(CaptureHandle {
            stop,
            thread: Some(thread),
        })
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

fn decode(path: &Path) -> Result<StillImage, SourceError> {
    let rgba = image::open(path)
        .map_err(|e| SourceError::Decode {
            path: path.to_path_buf(),
            source: e,
        })?
        .to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(StillImage {
        data: rgba.into_raw(),
        width,
        height,
    })
}

/// Control handle for a running capture thread.
pub struct CaptureHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<u64>>,
}

impl CaptureHandle {
    /// Asks the capture thread to stop before its next frame.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Waits for playback to end; returns the number of frames produced.
    pub fn join(mut self) -> u64 {
        self.thread
            .take()
            .and_then(|t| t.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
