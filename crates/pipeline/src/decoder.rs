//! Video decoding into RGB rasters.
//!
//! [`FfmpegDecoder`] probes the file for dimensions and per-frame
//! presentation timestamps, then spawns `ffmpeg` writing packed `rgb24`
//! frames to a pipe which [`FfmpegFrameReader`] consumes one frame at a
//! time.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use carlitos_core::ffmpeg::{parse_stream_info, FfmpegError, FfmpegTools};
use image::RgbImage;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout};
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error(transparent)]
    Ffmpeg(#[from] FfmpegError),

    #[error("decoder I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream ended mid-frame after {got} of {expected} bytes")]
    Truncated { expected: usize, got: usize },

    #[error("decoder exited with {exit_code:?}: {stderr}")]
    ProcessFailed {
        exit_code: Option<i32>,
        stderr: String,
    },
}

impl DecodeError {
    /// Files without a video stream never become decodable.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            DecodeError::Ffmpeg(FfmpegError::NoVideoStream | FfmpegError::VideoNotFound(_))
        )
    }
}

/// One decoded frame.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// 0-based index in decode order.
    pub index: u64,
    /// Presentation timestamp in seconds.
    pub timestamp: f64,
    pub image: RgbImage,
}

/// Sequential access to the frames of one opened video.
#[async_trait]
pub trait FrameReader: Send {
    /// The next frame, or `None` once the stream is exhausted.
    async fn next_frame(&mut self) -> Result<Option<DecodedFrame>, DecodeError>;
}

#[async_trait]
pub trait VideoDecoder: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Box<dyn FrameReader>, DecodeError>;
}

// ---------------------------------------------------------------------------
// ffmpeg implementation
// ---------------------------------------------------------------------------

pub struct FfmpegDecoder {
    tools: FfmpegTools,
}

impl FfmpegDecoder {
    pub fn new(tools: FfmpegTools) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl VideoDecoder for FfmpegDecoder {
    async fn open(&self, path: &Path) -> Result<Box<dyn FrameReader>, DecodeError> {
        let probe = self.tools.probe_video(path).await?;
        let info = parse_stream_info(&probe)?;
        let timestamps = self.tools.frame_timestamps(path).await?;

        let mut child = tokio::process::Command::new(&self.tools.ffmpeg)
            .args(FfmpegTools::rawvideo_args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(FfmpegError::NotFound)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("ffmpeg stdout not captured"))?;
        let stderr = child.stderr.take().map(|stderr| tokio::spawn(drain(stderr)));

        tracing::debug!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            rotation = info.rotation,
            duration_secs = info.duration,
            frames = timestamps.len(),
            "Decoder opened",
        );

        Ok(Box::new(FfmpegFrameReader {
            child,
            stdout,
            stderr,
            width: info.width,
            height: info.height,
            frame_bytes: info.width as usize * info.height as usize * 3,
            framerate: info.framerate,
            timestamps,
            next_index: 0,
        }))
    }
}

/// Collect a child's stderr so the pipe never fills and blocks it.
async fn drain(mut stream: impl AsyncRead + Unpin) -> String {
    let mut buf = Vec::new();
    if let Err(e) = stream.read_to_end(&mut buf).await {
        tracing::debug!(error = %e, read = buf.len(), "Could not read decoder stderr to the end");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Fill `buf` from `reader`, returning how many bytes were read before EOF.
async fn read_full(reader: &mut (impl AsyncRead + Unpin), buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

pub struct FfmpegFrameReader {
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    width: u32,
    height: u32,
    frame_bytes: usize,
    framerate: f64,
    timestamps: Vec<f64>,
    next_index: u64,
}

impl FfmpegFrameReader {
    fn timestamp_for(&self, index: u64) -> f64 {
        if let Some(ts) = usize::try_from(index).ok().and_then(|i| self.timestamps.get(i)) {
            return *ts;
        }
        if self.framerate > 0.0 {
            index as f64 / self.framerate
        } else {
            self.timestamps.last().copied().unwrap_or(0.0)
        }
    }

    async fn finish(&mut self) -> Result<(), DecodeError> {
        let status = self.child.wait().await?;
        if status.success() {
            return Ok(());
        }
        let stderr = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        Err(DecodeError::ProcessFailed {
            exit_code: status.code(),
            stderr: stderr.trim().to_string(),
        })
    }
}

#[async_trait]
impl FrameReader for FfmpegFrameReader {
    async fn next_frame(&mut self) -> Result<Option<DecodedFrame>, DecodeError> {
        let mut buf = vec![0u8; self.frame_bytes];
        let got = read_full(&mut self.stdout, &mut buf).await?;

        if got == 0 {
            self.finish().await?;
            return Ok(None);
        }
        if got < self.frame_bytes {
            // A non-zero exit explains a short read better than the size mismatch.
            self.finish().await?;
            return Err(DecodeError::Truncated {
                expected: self.frame_bytes,
                got,
            });
        }

        let image = RgbImage::from_raw(self.width, self.height, buf).ok_or(DecodeError::Truncated {
            expected: self.frame_bytes,
            got,
        })?;
        let index = self.next_index;
        self.next_index += 1;

        Ok(Some(DecodedFrame {
            index,
            timestamp: self.timestamp_for(index),
            image,
        }))
    }
}
