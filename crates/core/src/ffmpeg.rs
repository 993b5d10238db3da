//! FFmpeg/FFprobe command utilities for frame extraction.
//!
//! Probing, per-frame presentation timestamps, and the argument list for
//! piping decoded frames out as raw RGB.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Error type for FFmpeg/FFprobe operations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("video file not found: {0}")]
    VideoNotFound(String),

    #[error("no decodable video stream")]
    NoVideoStream,
}

/// Paths of the two binaries. Defaults resolve through `PATH`.
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for FfmpegTools {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

/// Dimensions and timing of the first video stream.
///
/// `width` and `height` are the displayed size: ffmpeg applies the stream's
/// rotation while decoding, so a quarter turn swaps the coded dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoStreamInfo {
    pub width: u32,
    pub height: u32,
    /// Display rotation in degrees, normalized to 0, 90, 180 or 270.
    pub rotation: u32,
    pub framerate: f64,
    pub duration: f64,
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    pub streams: Vec<FfprobeStream>,
    pub format: FfprobeFormat,
}

/// A single stream from ffprobe output.
#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub index: i32,
    pub codec_name: Option<String>,
    pub codec_type: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    /// e.g. "30/1" or "24000/1001"
    pub r_frame_rate: Option<String>,
    pub duration: Option<String>,
    #[serde(default)]
    pub tags: FfprobeStreamTags,
    #[serde(default)]
    pub side_data_list: Vec<FfprobeSideData>,
}

/// Stream tags; older muxers record rotation here.
#[derive(Debug, Default, Deserialize)]
pub struct FfprobeStreamTags {
    pub rotate: Option<String>,
}

/// Stream side data, e.g. the display matrix.
#[derive(Debug, Deserialize)]
pub struct FfprobeSideData {
    pub side_data_type: Option<String>,
    pub rotation: Option<f64>,
}

/// Format-level metadata from ffprobe.
#[derive(Debug, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
    pub format_name: Option<String>,
}

/// `-show_entries frame=...` output.
#[derive(Debug, Deserialize)]
pub struct FfprobeFrames {
    #[serde(default)]
    pub frames: Vec<FfprobeFrame>,
}

#[derive(Debug, Deserialize)]
pub struct FfprobeFrame {
    pub pts_time: Option<String>,
    pub best_effort_timestamp_time: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

impl FfmpegTools {
    async fn run_ffprobe(&self, args: &[&str], path: &Path) -> Result<String, FfmpegError> {
        if !path.exists() {
            return Err(FfmpegError::VideoNotFound(
                path.to_string_lossy().to_string(),
            ));
        }

        let output = tokio::process::Command::new(&self.ffprobe)
            .args(args)
            .arg(path)
            .output()
            .await
            .map_err(FfmpegError::NotFound)?;

        if !output.status.success() {
            return Err(FfmpegError::ExecutionFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run `ffprobe` on a video file and return the parsed JSON output.
    pub async fn probe_video(&self, path: &Path) -> Result<FfprobeOutput, FfmpegError> {
        let stdout = self
            .run_ffprobe(
                &[
                    "-v",
                    "quiet",
                    "-print_format",
                    "json",
                    "-show_format",
                    "-show_streams",
                ],
                path,
            )
            .await?;
        serde_json::from_str::<FfprobeOutput>(&stdout)
            .map_err(|e| FfmpegError::ParseError(format!("{e}: {stdout}")))
    }

    /// Presentation timestamp (seconds) of every decoded frame of the first
    /// video stream, in decoder output order.
    pub async fn frame_timestamps(&self, path: &Path) -> Result<Vec<f64>, FfmpegError> {
        let stdout = self
            .run_ffprobe(
                &[
                    "-v",
                    "error",
                    "-select_streams",
                    "v:0",
                    "-show_entries",
                    "frame=pts_time,best_effort_timestamp_time",
                    "-print_format",
                    "json",
                ],
                path,
            )
            .await?;
        let frames = serde_json::from_str::<FfprobeFrames>(&stdout)
            .map_err(|e| FfmpegError::ParseError(e.to_string()))?;
        Ok(parse_frame_timestamps(&frames))
    }

    /// Arguments that make `ffmpeg` write every decoded frame of the first
    /// video stream to stdout as packed `rgb24`, without dropping or
    /// duplicating frames. Autorotation stays on, so frames come out in the
    /// orientation [`parse_stream_info`] reports.
    pub fn rawvideo_args(path: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-v", "error", "-nostdin", "-i"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(path.as_os_str().to_owned());
        args.extend(
            [
                "-map",
                "0:v:0",
                "-fps_mode",
                "passthrough",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "pipe:1",
            ]
            .into_iter()
            .map(OsString::from),
        );
        args
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Find the first video stream in the ffprobe output.
fn first_video_stream(probe: &FfprobeOutput) -> Option<&FfprobeStream> {
    probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
}

/// Parse the video duration in seconds from ffprobe output.
pub fn parse_duration(probe: &FfprobeOutput) -> f64 {
    if let Some(secs) = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
    {
        return secs;
    }
    first_video_stream(probe)
        .and_then(|s| s.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Parse the video framerate from ffprobe output.
pub fn parse_framerate(probe: &FfprobeOutput) -> f64 {
    first_video_stream(probe)
        .and_then(|s| s.r_frame_rate.as_deref())
        .map(parse_fraction)
        .unwrap_or(0.0)
}

/// Parse a fraction string like `"30/1"` into a float.
pub fn parse_fraction(s: &str) -> f64 {
    if let Some((num, den)) = s.split_once('/') {
        let num = num.parse::<f64>().unwrap_or(0.0);
        let den = den.parse::<f64>().unwrap_or(1.0);
        return if den > 0.0 { num / den } else { 0.0 };
    }
    s.parse::<f64>().unwrap_or(0.0)
}

/// Display rotation of a stream, snapped to a multiple of 90 degrees.
///
/// The display matrix wins over the legacy `rotate` tag.
pub fn parse_rotation(stream: &FfprobeStream) -> u32 {
    let degrees = stream
        .side_data_list
        .iter()
        .find_map(|side| side.rotation)
        .or_else(|| {
            stream
                .tags
                .rotate
                .as_deref()
                .and_then(|r| r.trim().parse::<f64>().ok())
        })
        .filter(|d| d.is_finite())
        .unwrap_or(0.0);
    let quarter_turns = (degrees / 90.0).round() as i64;
    (quarter_turns.rem_euclid(4) * 90) as u32
}

/// Stream info for the first video stream with usable dimensions.
pub fn parse_stream_info(probe: &FfprobeOutput) -> Result<VideoStreamInfo, FfmpegError> {
    let stream = first_video_stream(probe).ok_or(FfmpegError::NoVideoStream)?;
    let coded_width = stream.width.and_then(|w| u32::try_from(w).ok()).unwrap_or(0);
    let coded_height = stream.height.and_then(|h| u32::try_from(h).ok()).unwrap_or(0);
    if coded_width == 0 || coded_height == 0 {
        return Err(FfmpegError::NoVideoStream);
    }
    let rotation = parse_rotation(stream);
    let (width, height) = if rotation % 180 == 90 {
        (coded_height, coded_width)
    } else {
        (coded_width, coded_height)
    };
    Ok(VideoStreamInfo {
        width,
        height,
        rotation,
        framerate: parse_framerate(probe),
        duration: parse_duration(probe),
    })
}

/// Per-frame timestamps; a frame with neither field falls back to the
/// previous frame's timestamp (0.0 for the first).
pub fn parse_frame_timestamps(frames: &FfprobeFrames) -> Vec<f64> {
    let mut last = 0.0;
    frames
        .frames
        .iter()
        .map(|frame| {
            let ts = frame
                .best_effort_timestamp_time
                .as_deref()
                .or(frame.pts_time.as_deref())
                .and_then(|t| t.parse::<f64>().ok())
                .filter(|t| t.is_finite())
                .unwrap_or(last);
            last = ts;
            ts
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn video_stream(width: Option<i32>, height: Option<i32>, rate: Option<&str>) -> FfprobeStream {
        FfprobeStream {
            index: 0,
            codec_name: Some("h264".into()),
            codec_type: Some("video".into()),
            width,
            height,
            r_frame_rate: rate.map(Into::into),
            duration: Some("60.0".into()),
            tags: FfprobeStreamTags::default(),
            side_data_list: Vec::new(),
        }
    }

    fn display_matrix(rotation: f64) -> FfprobeSideData {
        FfprobeSideData {
            side_data_type: Some("Display Matrix".into()),
            rotation: Some(rotation),
        }
    }

    fn probe(streams: Vec<FfprobeStream>, duration: Option<&str>) -> FfprobeOutput {
        FfprobeOutput {
            streams,
            format: FfprobeFormat {
                duration: duration.map(Into::into),
                format_name: None,
            },
        }
    }

    #[test]
    fn test_parse_fraction_standard() {
        assert!((parse_fraction("30/1") - 30.0).abs() < 0.001);
    }

    #[test]
    fn test_parse_fraction_ntsc() {
        let fps = parse_fraction("24000/1001");
        assert!((fps - 23.976).abs() < 0.01);
    }

    #[test]
    fn test_parse_fraction_plain_number() {
        assert!((parse_fraction("25") - 25.0).abs() < 0.001);
    }

    #[test]
    fn test_parse_fraction_zero_denominator() {
        assert!((parse_fraction("30/0") - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_parse_duration_prefers_format() {
        let p = probe(vec![video_stream(Some(640), Some(480), None)], Some("120.5"));
        assert!((parse_duration(&p) - 120.5).abs() < 0.001);
    }

    #[test]
    fn test_parse_duration_from_stream() {
        let p = probe(vec![video_stream(Some(640), Some(480), None)], None);
        assert!((parse_duration(&p) - 60.0).abs() < 0.001);
    }

    #[test]
    fn test_stream_info() {
        let p = probe(vec![video_stream(Some(1920), Some(1080), Some("30/1"))], None);
        let info = parse_stream_info(&p).unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert!((info.framerate - 30.0).abs() < 0.001);
    }

    #[test]
    fn test_stream_info_quarter_turn_swaps_dimensions() {
        let mut stream = video_stream(Some(1920), Some(1080), Some("30/1"));
        stream.side_data_list.push(display_matrix(-90.0));
        let info = parse_stream_info(&probe(vec![stream], None)).unwrap();
        assert_eq!(info.rotation, 270);
        assert_eq!((info.width, info.height), (1080, 1920));
    }

    #[test]
    fn test_stream_info_half_turn_keeps_dimensions() {
        let mut stream = video_stream(Some(1920), Some(1080), None);
        stream.side_data_list.push(display_matrix(180.0));
        let info = parse_stream_info(&probe(vec![stream], None)).unwrap();
        assert_eq!(info.rotation, 180);
        assert_eq!((info.width, info.height), (1920, 1080));
    }

    #[test]
    fn test_rotation_from_legacy_tag() {
        let mut stream = video_stream(Some(640), Some(480), None);
        stream.tags.rotate = Some("90".into());
        assert_eq!(parse_rotation(&stream), 90);

        stream.side_data_list.push(display_matrix(-180.0));
        assert_eq!(parse_rotation(&stream), 180);
    }

    #[test]
    fn test_rotation_snaps_to_quarter_turns() {
        let mut stream = video_stream(Some(640), Some(480), None);
        assert_eq!(parse_rotation(&stream), 0);
        stream.side_data_list.push(display_matrix(-89.6));
        assert_eq!(parse_rotation(&stream), 270);
    }

    #[test]
    fn test_ffprobe_json_with_display_matrix() {
        let json = r#"{
            "streams": [{
                "index": 0,
                "codec_name": "h264",
                "codec_type": "video",
                "width": 1280,
                "height": 720,
                "r_frame_rate": "30/1",
                "side_data_list": [
                    {"side_data_type": "Display Matrix", "displaymatrix": "...", "rotation": -90}
                ]
            }],
            "format": {"duration": "4.2", "format_name": "mov,mp4,m4a,3gp,3g2,mj2"}
        }"#;
        let output: FfprobeOutput = serde_json::from_str(json).unwrap();
        let info = parse_stream_info(&output).unwrap();
        assert_eq!((info.width, info.height, info.rotation), (720, 1280, 270));
        assert!((info.duration - 4.2).abs() < 1e-9);
    }

    #[test]
    fn test_stream_info_audio_only() {
        let mut audio = video_stream(None, None, None);
        audio.codec_type = Some("audio".into());
        let p = probe(vec![audio], Some("3.0"));
        assert_matches!(parse_stream_info(&p), Err(FfmpegError::NoVideoStream));
    }

    #[test]
    fn test_stream_info_missing_dimensions() {
        let p = probe(vec![video_stream(None, Some(480), None)], None);
        assert_matches!(parse_stream_info(&p), Err(FfmpegError::NoVideoStream));
    }

    #[test]
    fn test_frame_timestamps_parse() {
        let json = r#"{"frames":[
            {"pts_time":"0.000000","best_effort_timestamp_time":"0.000000"},
            {"pts_time":"0.033367"},
            {"best_effort_timestamp_time":"0.066733"},
            {}
        ]}"#;
        let frames: FfprobeFrames = serde_json::from_str(json).unwrap();
        let ts = parse_frame_timestamps(&frames);
        assert_eq!(ts.len(), 4);
        assert!((ts[1] - 0.033367).abs() < 1e-9);
        assert!((ts[2] - 0.066733).abs() < 1e-9);
        assert_eq!(ts[3], ts[2]);
    }

    #[test]
    fn test_frame_timestamps_empty() {
        let frames: FfprobeFrames = serde_json::from_str("{}").unwrap();
        assert!(parse_frame_timestamps(&frames).is_empty());
    }

    #[test]
    fn test_rawvideo_args_pipe_rgb() {
        let args = FfmpegTools::rawvideo_args(Path::new("/tmp/in.mp4"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "rgb24"]));
        assert!(args.windows(2).any(|w| w == ["-fps_mode", "passthrough"]));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }
}
