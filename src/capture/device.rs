//! Exclusive camera device handle
//!
//! A `DeviceHandle` owns the hardware lock on one camera. Releasing consumes
//! the handle, so it cannot be used or released again afterwards.

use super::error::{CaptureError, CaptureResult};
use super::traits::{CameraDevice, CaptureBackend, FrameTap, PreviewSurface, Resolution, Rotation, StreamFormat};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Camera held by the one live handle in this process, if any
static HELD_DEVICE: Mutex<Option<String>> = parking_lot::const_mutex(None);

/// Who currently controls the camera hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LockState {
    /// Control was given up and no encoder has taken it yet
    Unlocked,
    LockedBySelf,
    LockedByEncoder,
}

/// Whether a camera id is currently held by a live handle
pub fn is_device_held(id: &str) -> bool {
    HELD_DEVICE.lock().as_deref() == Some(id)
}

/// The camera currently held in this process
pub fn held_device() -> Option<String> {
    HELD_DEVICE.lock().clone()
}

/// Exclusive handle to one opened camera
pub struct DeviceHandle {
    id: String,
    device: Box<dyn CameraDevice>,
    lock_state: LockState,
    size: Option<Resolution>,
    rotation: Rotation,
    released: bool,
}

impl DeviceHandle {
    /// Open a camera through the backend, claiming it for this process.
    ///
    /// Fails with `DeviceBusy` while any other handle is alive.
    pub fn open(backend: &dyn CaptureBackend, id: &str) -> CaptureResult<Self> {
        {
            let mut held = HELD_DEVICE.lock();
            if let Some(current) = held.as_deref() {
                return Err(CaptureError::DeviceBusy(current.to_string()));
            }
            *held = Some(id.to_string());
        }

        match backend.open_device(id) {
            Ok(device) => {
                tracing::info!("Opened camera {}", id);
                Ok(Self {
                    id: id.to_string(),
                    device,
                    lock_state: LockState::LockedBySelf,
                    size: None,
                    rotation: Rotation::NONE,
                    released: false,
                })
            }
            Err(e) => {
                unregister(id);
                Err(e)
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn lock_state(&self) -> LockState {
        self.lock_state
    }

    /// Negotiated capture size, once applied
    pub fn size(&self) -> Option<Resolution> {
        self.size
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn supported_sizes(&self) -> Vec<Resolution> {
        self.device.supported_sizes()
    }

    pub fn stream_format(&self) -> StreamFormat {
        self.device.stream_format()
    }

    pub fn frame_tap(&self) -> FrameTap {
        self.device.frame_tap()
    }

    /// Apply the capture size and display rotation.
    ///
    /// The camera may settle on a different size than requested; that size is
    /// the one kept.
    pub fn apply(&mut self, size: Resolution, rotation: Rotation) -> CaptureResult<()> {
        self.require_self_locked("apply size")?;
        let negotiated = self.device.configure(size, rotation)?;
        if negotiated != size {
            tracing::info!("Camera {} asked for {} but delivers {}", self.id, size, negotiated);
        }
        self.size = Some(negotiated);
        self.rotation = rotation;
        tracing::debug!("Camera {} configured at {} rotated {}", self.id, negotiated, rotation.degrees());
        Ok(())
    }

    /// Bind the live image stream to a preview surface
    pub fn bind_preview(&mut self, surface: &PreviewSurface) -> CaptureResult<()> {
        self.require_self_locked("bind preview")?;
        if !surface.is_ready() {
            return Err(CaptureError::PreviewBindingError(
                "surface has no backing texture yet".to_string(),
            ));
        }
        self.device.bind_preview(surface)
    }

    /// Give up control so an encoder can take the camera
    pub fn unlock(&mut self) -> CaptureResult<()> {
        self.require_self_locked("unlock")?;
        self.device.unlock()?;
        self.lock_state = LockState::Unlocked;
        Ok(())
    }

    /// Record that an encoder has started driving the camera
    pub(crate) fn hand_to_encoder(&mut self) {
        if self.lock_state == LockState::Unlocked {
            self.lock_state = LockState::LockedByEncoder;
        }
    }

    /// Reclaim control from the encoder. No-op if already held.
    pub fn lock(&mut self) -> CaptureResult<()> {
        if self.lock_state == LockState::LockedBySelf {
            return Ok(());
        }
        self.device.lock()?;
        self.lock_state = LockState::LockedBySelf;
        Ok(())
    }

    /// Close the camera and drop the hardware lock
    pub fn release(mut self) {
        self.release_inner();
    }

    fn require_self_locked(&self, operation: &str) -> CaptureResult<()> {
        if self.lock_state != LockState::LockedBySelf {
            return Err(CaptureError::DeviceError(format!(
                "cannot {operation} while camera is {:?}",
                self.lock_state
            )));
        }
        Ok(())
    }

    /// Release in place for owners that cannot give the handle up by value
    pub(crate) fn release_inner(&mut self) {
        if self.released {
            return;
        }
        if self.lock_state != LockState::LockedBySelf {
            if let Err(e) = self.lock() {
                tracing::warn!("Failed to reclaim camera {} before release: {}", self.id, e);
            }
        }
        self.device.release();
        self.released = true;
        unregister(&self.id);
        tracing::info!("Released camera {}", self.id);
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!("Camera {} dropped without release", self.id);
            self.release_inner();
        }
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("id", &self.id)
            .field("lock_state", &self.lock_state)
            .field("size", &self.size)
            .field("rotation", &self.rotation)
            .finish()
    }
}

fn unregister(id: &str) {
    let mut held = HELD_DEVICE.lock();
    if held.as_deref() == Some(id) {
        *held = None;
    }
}
