//! Landmark extraction: staged video → decoded frames → pose detection →
//! [`FrameResult`] per frame, in strict frame order.

use std::path::Path;
use std::sync::Arc;

use carlitos_core::pose::FrameResult;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};

use crate::decoder::{DecodeError, FrameReader, VideoDecoder};
use crate::detector::{DetectorError, PoseDetector, PoseDetectorProvider};
use crate::storage::{StorageError, VideoStorage};

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("video fetch failed: {0}")]
    Storage(#[from] StorageError),

    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("pose detector initialization failed: {0}")]
    DetectorInit(#[source] DetectorError),

    #[error("pose detection failed on frame {frame}: {source}")]
    Detector {
        frame: u64,
        #[source]
        source: DetectorError,
    },

    #[error("detector returned invalid landmarks on frame {frame}: {reason}")]
    InvalidLandmarks { frame: u64, reason: String },
}

impl ExtractionError {
    /// Whether another attempt could succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            ExtractionError::Storage(e) => e.is_retriable(),
            ExtractionError::Decode(e) => e.is_retriable(),
            ExtractionError::DetectorInit(_)
            | ExtractionError::Detector { .. }
            | ExtractionError::InvalidLandmarks { .. } => true,
        }
    }
}

pub struct LandmarkExtractor {
    storage: Arc<dyn VideoStorage>,
    decoder: Arc<dyn VideoDecoder>,
    detectors: Arc<dyn PoseDetectorProvider>,
}

impl LandmarkExtractor {
    pub fn new(
        storage: Arc<dyn VideoStorage>,
        decoder: Arc<dyn VideoDecoder>,
        detectors: Arc<dyn PoseDetectorProvider>,
    ) -> Self {
        Self {
            storage,
            decoder,
            detectors,
        }
    }

    /// Extract every frame of the video stored under `storage_key`.
    ///
    /// All-or-nothing: the first error aborts and no partial sequence is
    /// returned. The staged copy is removed before this returns, and also
    /// when the future is dropped mid-way.
    pub async fn extract(&self, storage_key: &str) -> Result<Vec<FrameResult>, ExtractionError> {
        let staged = self.storage.fetch(storage_key).await?;
        let frames: Vec<FrameResult> = self.frames(staged.path()).try_collect().await?;
        drop(staged);

        tracing::debug!(
            storage_key,
            frames = frames.len(),
            with_pose = frames.iter().filter(|f| f.has_pose()).count(),
            "Extraction finished",
        );
        Ok(frames)
    }

    /// Lazily decode and analyze the video at `path`.
    ///
    /// Nothing happens until the stream is polled; each call starts a fresh
    /// decoder and detector session. The stream ends after the last decoded
    /// frame or after yielding the first error.
    pub fn frames<'a>(
        &'a self,
        path: &'a Path,
    ) -> BoxStream<'a, Result<FrameResult, ExtractionError>> {
        stream::once(async move {
            let reader = self.decoder.open(path).await?;
            let detector = self
                .detectors
                .create()
                .await
                .map_err(ExtractionError::DetectorInit)?;
            Ok::<_, ExtractionError>(frame_stream(reader, detector))
        })
        .try_flatten()
        .boxed()
    }
}

fn frame_stream(
    reader: Box<dyn FrameReader>,
    detector: Box<dyn PoseDetector>,
) -> BoxStream<'static, Result<FrameResult, ExtractionError>> {
    stream::try_unfold((reader, detector), |(mut reader, mut detector)| async move {
        let Some(frame) = reader.next_frame().await? else {
            return Ok(None);
        };
        let detection = detector
            .detect(&frame)
            .await
            .map_err(|source| ExtractionError::Detector {
                frame: frame.index,
                source,
            })?;
        let result = FrameResult::from_detection(frame.index, frame.timestamp, detection)
            .map_err(|e| ExtractionError::InvalidLandmarks {
                frame: frame.index,
                reason: e.to_string(),
            })?;
        Ok(Some((result, (reader, detector))))
    })
    .boxed()
}
