//! Webcam capture using nokhwa
//!
//! Each opened camera lives on its own thread, since nokhwa cameras cannot
//! move between threads on every platform. The handle talks to that thread
//! over a command channel. Raw frames go to the preview surface and, while an
//! encoder holds the camera, to the encoder's frame tap.

use super::error::{CaptureError, CaptureResult};
use super::ffmpeg_recorder::FfmpegRecorder;
use super::traits::{
    CameraDevice, CameraInfo, CaptureBackend, Facing, FrameTap, MediaEncoder, PreviewSurface, Resolution, Rotation,
    StreamFormat,
};
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType};
use nokhwa::{Camera, NokhwaError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Get list of available cameras
pub fn get_cameras() -> Vec<CameraInfo> {
    query_cameras().unwrap_or_else(|e| {
        tracing::warn!("Failed to enumerate cameras: {}", e);
        Vec::new()
    })
}

fn query_cameras() -> CaptureResult<Vec<CameraInfo>> {
    let cameras = nokhwa::query(ApiBackend::Auto).map_err(|e| CaptureError::DeviceError(e.to_string()))?;
    Ok(cameras
        .into_iter()
        .map(|info| {
            let id = match info.index() {
                CameraIndex::Index(i) => i.to_string(),
                CameraIndex::String(s) => s.to_string(),
            };
            let name = info.human_name().to_string();
            let facing = facing_from_name(&name);
            CameraInfo { id, name, facing }
        })
        .collect())
}

/// Guess a camera's orientation from its human-readable name
pub fn facing_from_name(name: &str) -> Facing {
    let name = name.to_lowercase();
    if ["back", "rear", "environment"].iter().any(|k| name.contains(k)) {
        Facing::Back
    } else if ["front", "facetime", "user", "integrated"].iter().any(|k| name.contains(k)) {
        Facing::Front
    } else {
        Facing::External
    }
}

/// Map a nokhwa frame format to the matching FFmpeg pixel format name
fn ffmpeg_pixel_format(format: FrameFormat) -> &'static str {
    match format {
        FrameFormat::YUYV => "yuyv422",
        FrameFormat::NV12 => "nv12",
        FrameFormat::RAWRGB => "rgb24",
        FrameFormat::GRAY => "gray",
        FrameFormat::MJPEG => "mjpeg",
        #[allow(unreachable_patterns)]
        other => {
            tracing::warn!("Unknown camera format {:?}, falling back to yuyv422", other);
            "yuyv422"
        }
    }
}

/// Size and stream layout the camera settled on
fn negotiated_format(format: &CameraFormat) -> (Resolution, StreamFormat) {
    let resolution = format.resolution();
    (
        Resolution::new(resolution.width(), resolution.height()),
        StreamFormat {
            pixel_format: ffmpeg_pixel_format(format.format()).to_string(),
            fps: format.frame_rate(),
        },
    )
}

fn camera_index(id: &str) -> CameraIndex {
    match id.parse::<u32>() {
        Ok(idx) => CameraIndex::Index(idx),
        Err(_) => CameraIndex::String(id.to_string()),
    }
}

fn map_error(id: &str, error: NokhwaError) -> CaptureError {
    match error {
        NokhwaError::OpenDeviceError(..) => CaptureError::DeviceBusy(id.to_string()),
        other => CaptureError::DeviceError(other.to_string()),
    }
}

/// Camera backend over the platform's native capture API
#[derive(Debug, Clone, Default)]
pub struct NokhwaBackend {
    rotation: Rotation,
    /// Requested frame rate, camera default when unset
    frame_rate: Option<u32>,
    /// Facing of every camera from the last listing
    facings: Arc<Mutex<HashMap<String, Facing>>>,
}

impl NokhwaBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rotation applied to every recording (desktop displays do not rotate)
    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = (fps > 0).then_some(fps);
        self
    }

    /// Replace the cached listing, returning the camera ids in order
    fn remember(&self, cameras: &[CameraInfo]) -> Vec<String> {
        let mut facings = self.facings.lock();
        facings.clear();
        cameras
            .iter()
            .map(|camera| {
                facings.insert(camera.id.clone(), camera.facing);
                camera.id.clone()
            })
            .collect()
    }

    fn cached_facing(&self, id: &str) -> Option<Facing> {
        self.facings.lock().get(id).copied()
    }
}

impl CaptureBackend for NokhwaBackend {
    fn list_camera_identifiers(&self) -> CaptureResult<Vec<String>> {
        Ok(self.remember(&query_cameras()?))
    }

    fn identifier_facing(&self, id: &str) -> Facing {
        if let Some(facing) = self.cached_facing(id) {
            return facing;
        }
        // Not seen in the last listing, so list again once
        self.remember(&get_cameras());
        self.cached_facing(id).unwrap_or(Facing::External)
    }

    fn open_device(&self, id: &str) -> CaptureResult<Box<dyn CameraDevice>> {
        Ok(Box::new(NokhwaDevice::open(id, self.frame_rate)?))
    }

    fn display_rotation_for(&self, _id: &str) -> Rotation {
        self.rotation
    }

    fn create_encoder(&self) -> Box<dyn MediaEncoder> {
        Box::new(FfmpegRecorder::new())
    }
}

enum DeviceCommand {
    SupportedSizes(SyncSender<Vec<Resolution>>),
    Configure(Resolution, Option<u32>, SyncSender<CaptureResult<(Resolution, StreamFormat)>>),
    Stream(PreviewSurface, SyncSender<CaptureResult<()>>),
    Close,
}

/// Camera opened on a dedicated owner thread
struct NokhwaDevice {
    id: String,
    commands: Sender<DeviceCommand>,
    worker: Option<JoinHandle<()>>,
    format: StreamFormat,
    frame_rate: Option<u32>,
    tap: FrameTap,
    /// Frames flow to the tap only while the encoder holds the camera
    encoder_owned: Arc<AtomicBool>,
}

impl NokhwaDevice {
    fn open(id: &str, frame_rate: Option<u32>) -> CaptureResult<Self> {
        let (commands, command_rx) = mpsc::channel();
        let (opened_tx, opened_rx) = mpsc::sync_channel(1);
        let tap = FrameTap::default();
        let encoder_owned = Arc::new(AtomicBool::new(false));

        let worker = {
            let id = id.to_string();
            let tap = tap.clone();
            let encoder_owned = encoder_owned.clone();
            std::thread::Builder::new()
                .name(format!("camera-{id}"))
                .spawn(move || run_camera(id, opened_tx, command_rx, tap, encoder_owned))
                .map_err(|e| CaptureError::DeviceError(e.to_string()))?
        };

        match opened_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                id: id.to_string(),
                commands,
                worker: Some(worker),
                format: StreamFormat::default(),
                frame_rate,
                tap,
                encoder_owned,
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(CaptureError::DeviceError(format!("camera {id} thread exited during open")))
            }
        }
    }

    fn request<T>(&self, build: impl FnOnce(SyncSender<T>) -> DeviceCommand) -> CaptureResult<T> {
        let closed = || CaptureError::DeviceError(format!("camera {} thread is gone", self.id));
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.commands.send(build(reply_tx)).map_err(|_| closed())?;
        reply_rx.recv().map_err(|_| closed())
    }
}

impl CameraDevice for NokhwaDevice {
    fn supported_sizes(&self) -> Vec<Resolution> {
        self.request(DeviceCommand::SupportedSizes).unwrap_or_default()
    }

    fn configure(&mut self, size: Resolution, _rotation: Rotation) -> CaptureResult<Resolution> {
        // Rotation is written as encoder metadata, the sensor is left alone
        let frame_rate = self.frame_rate;
        let (negotiated, format) = self.request(|reply| DeviceCommand::Configure(size, frame_rate, reply))??;
        self.format = format;
        Ok(negotiated)
    }

    fn bind_preview(&mut self, surface: &PreviewSurface) -> CaptureResult<()> {
        let surface = surface.clone();
        self.request(|reply| DeviceCommand::Stream(surface, reply))?
    }

    fn unlock(&mut self) -> CaptureResult<()> {
        self.encoder_owned.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn lock(&mut self) -> CaptureResult<()> {
        self.encoder_owned.store(false, Ordering::SeqCst);
        self.tap.detach();
        Ok(())
    }

    fn stream_format(&self) -> StreamFormat {
        self.format.clone()
    }

    fn frame_tap(&self) -> FrameTap {
        self.tap.clone()
    }

    fn release(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.encoder_owned.store(false, Ordering::SeqCst);
        self.tap.detach();
        let _ = self.commands.send(DeviceCommand::Close);
        if worker.join().is_err() {
            tracing::warn!("Camera {} thread panicked", self.id);
        }
    }
}

impl Drop for NokhwaDevice {
    fn drop(&mut self) {
        self.release();
    }
}

fn run_camera(
    id: String,
    opened: SyncSender<CaptureResult<()>>,
    commands: Receiver<DeviceCommand>,
    tap: FrameTap,
    encoder_owned: Arc<AtomicBool>,
) {
    let format = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution);
    let mut camera = match Camera::new(camera_index(&id), format) {
        Ok(camera) => {
            let _ = opened.send(Ok(()));
            camera
        }
        Err(e) => {
            tracing::error!("Failed to open camera {}: {:?}", id, e);
            let _ = opened.send(Err(map_error(&id, e)));
            return;
        }
    };

    let mut preview: Option<PreviewSurface> = None;
    let mut frame_count: u64 = 0;

    loop {
        // Block for commands until streaming, then poll between frames
        let command = if preview.is_some() {
            match commands.try_recv() {
                Ok(command) => Some(command),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => Some(DeviceCommand::Close),
            }
        } else {
            Some(commands.recv().unwrap_or(DeviceCommand::Close))
        };

        match command {
            Some(DeviceCommand::SupportedSizes(reply)) => {
                let sizes = match camera.compatible_camera_formats() {
                    Ok(formats) => {
                        let mut sizes: Vec<Resolution> = formats
                            .iter()
                            .map(|f| Resolution::new(f.resolution().width(), f.resolution().height()))
                            .collect();
                        sizes.sort_by_key(|s| std::cmp::Reverse(s.area()));
                        sizes.dedup();
                        sizes
                    }
                    Err(e) => {
                        tracing::warn!("Camera {} did not report formats: {}", id, e);
                        Vec::new()
                    }
                };
                let _ = reply.send(sizes);
            }
            Some(DeviceCommand::Configure(size, frame_rate, reply)) => {
                let result = camera
                    .set_resolution(nokhwa::utils::Resolution::new(size.width, size.height))
                    .map(|()| {
                        if let Some(fps) = frame_rate {
                            if let Err(e) = camera.set_frame_rate(fps) {
                                tracing::warn!("Camera {} rejected {}fps: {}", id, fps, e);
                            }
                        }
                        negotiated_format(&camera.camera_format())
                    })
                    .map_err(|e| map_error(&id, e));
                let _ = reply.send(result);
            }
            Some(DeviceCommand::Stream(surface, reply)) => {
                let result = camera.open_stream().map_err(|e| map_error(&id, e));
                if result.is_ok() {
                    let camera_format = camera.camera_format();
                    tracing::info!(
                        "Camera {} streaming {}x{} @ {}fps, format={:?}",
                        id,
                        camera_format.resolution().width(),
                        camera_format.resolution().height(),
                        camera_format.frame_rate(),
                        camera_format.format()
                    );
                    preview = Some(surface);
                }
                let _ = reply.send(result);
            }
            Some(DeviceCommand::Close) => break,
            None => {}
        }

        if let Some(surface) = &preview {
            // Blocks until the camera delivers the next frame
            match camera.frame() {
                Ok(frame) => {
                    let data = frame.buffer();
                    surface.publish(data);
                    if encoder_owned.load(Ordering::SeqCst) && tap.push(data) {
                        frame_count += 1;
                    }
                }
                Err(e) => tracing::debug!("Failed to capture frame: {:?}", e),
            }
        }
    }

    if preview.is_some() {
        if let Err(e) = camera.stop_stream() {
            tracing::warn!("Error stopping camera stream: {:?}", e);
        }
    }
    tracing::info!("Camera {} closed after handing {} frames to encoders", id, frame_count);
}
