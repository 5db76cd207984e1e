//! Frame sequence to video file encoding
//!
//! MP4 goes through an external `ffmpeg` fed raw RGBA frames on stdin.
//! GIF is encoded in-process.

use crate::backend::RenderedVideo;
use crate::config::{VideoConfig, VideoFormat};
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame};
use meshrelay_core::{RelayError, Result};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

/// Rendered videos are always written at this rate
pub const VIDEO_FPS: u32 = 30;

pub struct VideoEncoder {
    format: VideoFormat,
    ffmpeg_path: String,
}

impl VideoEncoder {
    pub fn from_config(config: &VideoConfig) -> Self {
        Self {
            format: config.format,
            ffmpeg_path: config.ffmpeg_path.clone(),
        }
    }

    pub fn extension(&self) -> &'static str {
        self.format.extension()
    }

    /// Encode `video` to `output` at [`VIDEO_FPS`]
    pub fn encode(&self, video: &RenderedVideo, output: &Path) -> Result<()> {
        let (width, height) = frame_dimensions(video)?;
        match self.format {
            VideoFormat::Gif => encode_gif(video, output),
            VideoFormat::Mp4 => self.encode_mp4(video, width, height, output),
        }
    }

    fn encode_mp4(&self, video: &RenderedVideo, width: u32, height: u32, output: &Path) -> Result<()> {
        let mut child = Command::new(&self.ffmpeg_path)
            .args(ffmpeg_args(width, height, output))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                RelayError::Encoding(format!(
                    "Failed to start '{}' (set video.ffmpeg_path or use video.format = \"gif\"): {}",
                    self.ffmpeg_path, e
                ))
            })?;

        {
            let stdin = child
                .stdin
                .as_mut()
                .ok_or_else(|| RelayError::Encoding("ffmpeg stdin unavailable".to_string()))?;
            for frame in &video.frames {
                stdin.write_all(frame.as_raw())?;
            }
        }
        // Closing stdin signals end of stream
        drop(child.stdin.take());

        let result = child.wait_with_output()?;
        if !result.status.success() {
            return Err(RelayError::Encoding(format!(
                "ffmpeg exited with {}: {}",
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }
        Ok(())
    }
}

fn ffmpeg_args(width: u32, height: u32, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgba".into(),
        "-s".into(),
        format!("{}x{}", width, height),
        "-r".into(),
        VIDEO_FPS.to_string(),
        "-i".into(),
        "-".into(),
        // yuv420p needs even dimensions
        "-vf".into(),
        "pad=ceil(iw/2)*2:ceil(ih/2)*2".into(),
        "-c:v".into(),
        "libx264".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-movflags".into(),
        "+faststart".into(),
        output.to_string_lossy().into_owned(),
    ]
}

fn frame_dimensions(video: &RenderedVideo) -> Result<(u32, u32)> {
    let first = video
        .frames
        .first()
        .ok_or_else(|| RelayError::Encoding("Rendered video has no frames".to_string()))?;
    let dims = first.dimensions();
    if video.frames.iter().any(|f| f.dimensions() != dims) {
        return Err(RelayError::Encoding(
            "Rendered frames have inconsistent dimensions".to_string(),
        ));
    }
    Ok(dims)
}

fn encode_gif(video: &RenderedVideo, output: &Path) -> Result<()> {
    let file = std::fs::File::create(output)?;
    let mut encoder = GifEncoder::new(std::io::BufWriter::new(file));
    encoder
        .set_repeat(Repeat::Infinite)
        .map_err(|e| RelayError::Encoding(format!("GIF setup failed: {}", e)))?;

    let delay = Delay::from_numer_denom_ms(1000, VIDEO_FPS);
    let frames = video
        .frames
        .iter()
        .map(|f| Frame::from_parts(f.clone(), 0, 0, delay));
    encoder
        .encode_frames(frames)
        .map_err(|e| RelayError::Encoding(format!("GIF encoding failed: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(frames: usize, size: u32) -> RenderedVideo {
        RenderedVideo {
            frames: (0..frames)
                .map(|i| image::RgbaImage::from_pixel(size, size, image::Rgba([i as u8 * 20, 0, 0, 255])))
                .collect(),
        }
    }

    fn gif_encoder() -> VideoEncoder {
        VideoEncoder::from_config(&VideoConfig {
            format: VideoFormat::Gif,
            ..Default::default()
        })
    }

    #[test]
    fn test_gif_encoding_writes_all_frames() {
        let path = std::env::temp_dir().join(format!("meshrelay_video_{}.gif", uuid::Uuid::new_v4()));
        gif_encoder().encode(&video(5, 16), &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..6], b"GIF89a");

        use image::AnimationDecoder;
        let decoder = image::codecs::gif::GifDecoder::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(decoder.into_frames().count(), 5);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_empty_video_rejected() {
        let path = std::env::temp_dir().join("meshrelay_video_empty.gif");
        let err = gif_encoder().encode(&video(0, 16), &path).unwrap_err();
        assert_eq!(err.kind(), meshrelay_core::ErrorKind::Io);
        assert!(!path.exists());
    }

    #[test]
    fn test_mismatched_frames_rejected() {
        let mut v = video(2, 16);
        v.frames.push(image::RgbaImage::new(8, 8));
        assert!(frame_dimensions(&v).is_err());
    }

    #[test]
    fn test_ffmpeg_args_fixed_rate() {
        let args = ffmpeg_args(512, 512, Path::new("/tmp/out.mp4"));
        let rate = args.iter().position(|a| a == "-r").unwrap();
        assert_eq!(args[rate + 1], "30");
        assert!(args.contains(&"512x512".to_string()));
        assert_eq!(args.last().unwrap(), "/tmp/out.mp4");
    }

    #[test]
    fn test_missing_ffmpeg_is_encoding_error() {
        let encoder = VideoEncoder::from_config(&VideoConfig {
            format: VideoFormat::Mp4,
            ffmpeg_path: "/nonexistent/meshrelay/ffmpeg".to_string(),
        });
        let path = std::env::temp_dir().join(format!("meshrelay_video_{}.mp4", uuid::Uuid::new_v4()));
        let err = encoder.encode(&video(2, 16), &path).unwrap_err();
        assert!(matches!(err, RelayError::Encoding(_)));
    }
}
