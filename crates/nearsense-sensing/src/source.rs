//! Frame sources.
//!
//! The pipeline only sees the [`FrameSource`] / [`FrameSourceFactory`]
//! traits. The production implementation spawns FFmpeg and reads raw RGB24
//! frames from its stdout.

use std::process::Stdio;

use async_trait::async_trait;
use nearsense_models::CameraConfig;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::error::{SensingError, SensingResult};
use crate::frame::Frame;

/// A stream of frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Read the next frame.
    async fn read(&mut self) -> SensingResult<Frame>;

    /// Release the underlying device.
    async fn close(&mut self);
}

/// Opens frame sources for a camera configuration.
#[async_trait]
pub trait FrameSourceFactory: Send + Sync {
    async fn open(&self, config: &CameraConfig) -> SensingResult<Box<dyn FrameSource>>;
}

/// Builder for the FFmpeg capture command line.
#[derive(Debug, Clone)]
pub struct CaptureCommand {
    input: String,
    input_format: Option<String>,
    width: u32,
    height: u32,
}

impl CaptureCommand {
    /// Create a capture command for a camera config.
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            input: resolve_input(&config.source, config.input_format.as_deref()),
            input_format: config.input_format.clone(),
            width: config.width,
            height: config.height,
        }
    }

    /// Size of one output frame in bytes.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-v".to_string(),
            "error".to_string(),
        ];

        if let Some(format) = &self.input_format {
            args.push("-f".to_string());
            args.push(format.clone());
            args.push("-video_size".to_string());
            args.push(format!("{}x{}", self.width, self.height));
        }

        args.push("-i".to_string());
        args.push(self.input.clone());

        // Raw RGB24 on stdout, scaled to the configured size
        args.extend(
            [
                "-an",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-s",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(format!("{}x{}", self.width, self.height));
        args.push("pipe:1".to_string());

        args
    }
}

/// Map a bare device index to a device path where the platform needs one.
fn resolve_input(source: &str, input_format: Option<&str>) -> String {
    let is_index = !source.is_empty() && source.chars().all(|c| c.is_ascii_digit());
    match input_format {
        Some("v4l2") if is_index => format!("/dev/video{}", source),
        None if is_index && cfg!(target_os = "linux") => format!("/dev/video{}", source),
        _ => source.to_string(),
    }
}

/// Frame source backed by an FFmpeg child process.
///
/// When FFmpeg exits (end of file, unplugged device) the next read spawns
/// a fresh process.
pub struct FfmpegFrameSource {
    command: CaptureCommand,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    buffer: Vec<u8>,
    sequence: u64,
    width: u32,
    height: u32,
}

impl FfmpegFrameSource {
    /// Spawn FFmpeg for the given camera.
    pub fn open(config: &CameraConfig) -> SensingResult<Self> {
        which::which("ffmpeg").map_err(|_| SensingError::FfmpegNotFound)?;
        if config.width == 0 || config.height == 0 {
            return Err(SensingError::source_unavailable("camera size must be non-zero"));
        }

        let command = CaptureCommand::from_config(config);
        let mut source = Self {
            buffer: vec![0; command.frame_len()],
            command,
            child: None,
            stdout: None,
            sequence: 0,
            width: config.width,
            height: config.height,
        };
        source.spawn()?;

        info!(
            source = %config.source,
            width = config.width,
            height = config.height,
            "Camera opened"
        );
        Ok(source)
    }

    fn spawn(&mut self) -> SensingResult<()> {
        let args = self.command.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SensingError::source_unavailable(format!("failed to spawn ffmpeg: {}", e)))?;

        self.stdout = child.stdout.take();
        if self.stdout.is_none() {
            return Err(SensingError::source_unavailable("ffmpeg stdout not captured"));
        }
        self.child = Some(child);
        Ok(())
    }

    async fn reap(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn read(&mut self) -> SensingResult<Frame> {
        if self.stdout.is_none() {
            warn!("FFmpeg capture not running, respawning");
            self.spawn()?;
        }

        let Some(stdout) = self.stdout.as_mut() else {
            return Err(SensingError::frame_read("capture pipe closed"));
        };

        if let Err(e) = stdout.read_exact(&mut self.buffer).await {
            self.reap().await;
            return Err(SensingError::frame_read(format!("capture ended: {}", e)));
        }

        self.sequence += 1;
        Frame::new(self.width, self.height, self.buffer.clone(), self.sequence)
    }

    async fn close(&mut self) {
        self.reap().await;
        info!("Camera released");
    }
}

/// Factory producing [`FfmpegFrameSource`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegSourceFactory;

#[async_trait]
impl FrameSourceFactory for FfmpegSourceFactory {
    async fn open(&self, config: &CameraConfig) -> SensingResult<Box<dyn FrameSource>> {
        let source = FfmpegFrameSource::open(config)?;
        Ok(Box::new(source))
    }
}
