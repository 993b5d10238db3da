//! Pose detection behind an HTTP service.
//!
//! The detector model is opaque: frames go out as PNG, landmarks come back
//! in the fixed 33-point ordering.
//!
//! ```text
//! GET  {base}/health             -> 2xx when the model is loaded
//! POST {base}/v1/pose  image/png -> { "landmarks": [{x, y, z, visibility}, ...] | null }
//! ```

use std::io::Cursor;

use async_trait::async_trait;
use carlitos_core::pose::Landmark;
use image::ImageFormat;
use serde::Deserialize;

use crate::decoder::DecodedFrame;

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("pose service request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("pose service error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("pose service unavailable: {0}")]
    Unavailable(String),

    #[error("frame encoding failed: {0}")]
    Encode(String),
}

/// A detector session used for the frames of one extraction.
#[async_trait]
pub trait PoseDetector: Send {
    /// Landmarks for the frame, or `None` when no person was found.
    async fn detect(&mut self, frame: &DecodedFrame) -> Result<Option<Vec<Landmark>>, DetectorError>;
}

/// Creates detector sessions; creation failing is an initialization error.
#[async_trait]
pub trait PoseDetectorProvider: Send + Sync {
    async fn create(&self) -> Result<Box<dyn PoseDetector>, DetectorError>;
}

#[derive(Debug, Deserialize)]
struct PoseResponse {
    landmarks: Option<Vec<Landmark>>,
}

/// Ensure the response has a success status code.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, DetectorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|e| format!("<failed to read body: {e}>"));
    Err(DetectorError::Api {
        status: status.as_u16(),
        body,
    })
}

pub struct HttpPoseDetectorProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPoseDetectorProvider {
    pub fn new(base_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl PoseDetectorProvider for HttpPoseDetectorProvider {
    async fn create(&self) -> Result<Box<dyn PoseDetector>, DetectorError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| DetectorError::Unavailable(e.to_string()))?;
        ensure_success(response).await?;

        Ok(Box::new(HttpPoseDetector {
            client: self.client.clone(),
            endpoint: format!("{}/v1/pose", self.base_url),
        }))
    }
}

pub struct HttpPoseDetector {
    client: reqwest::Client,
    endpoint: String,
}

/// PNG-encode a frame off the async runtime.
async fn encode_png(frame: &DecodedFrame) -> Result<Vec<u8>, DetectorError> {
    let image = frame.image.clone();
    tokio::task::spawn_blocking(move || {
        let mut buf = Cursor::new(Vec::new());
        image
            .write_to(&mut buf, ImageFormat::Png)
            .map(|()| buf.into_inner())
            .map_err(|e| DetectorError::Encode(e.to_string()))
    })
    .await
    .map_err(|e| DetectorError::Encode(e.to_string()))?
}

#[async_trait]
impl PoseDetector for HttpPoseDetector {
    async fn detect(&mut self, frame: &DecodedFrame) -> Result<Option<Vec<Landmark>>, DetectorError> {
        let png = encode_png(frame).await?;
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(png)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let parsed: PoseResponse = response.json().await?;
        Ok(parsed.landmarks.filter(|l| !l.is_empty()))
    }
}
