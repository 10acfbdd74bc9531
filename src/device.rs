use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use crate::capture::{CaptureSession, CaptureState};
use crate::error::{Error, Result};
use crate::frame::{BufferRequirements, BufferStrategy, FrameSet, ReconcileAction};
use crate::memory;
use crate::runtime::Runtime;
use crate::transport::{AccessMode, DeviceRef, ModuleRef, StreamRef, Transport};

const ADJUST_PACKET_SIZE_COMMAND: &str = "GVSPAdjustPacketSize";

/// Policy applied to the packet-size negotiation step during open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketSizePolicy {
    /// Negotiation failure is logged and ignored.
    #[default]
    BestEffort,
    /// Negotiation failure aborts the open.
    Require,
}

/// Options for [`Camera::open`].
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Camera id to open; the first enumerated device when `None`.
    pub id: Option<String>,
    pub access: AccessMode,
    /// Number of frame buffers to provision.
    pub frame_count: u32,
    pub strategy: BufferStrategy,
    pub packet_size: PacketSizePolicy,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            id: None,
            access: AccessMode::EXCLUSIVE,
            frame_count: 4,
            strategy: BufferStrategy::default(),
            packet_size: PacketSizePolicy::default(),
        }
    }
}

impl OpenOptions {
    /// Builder: open a specific camera by id
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Builder: set the access mode
    pub fn access(mut self, access: AccessMode) -> Self {
        self.access = access;
        self
    }

    /// Builder: set the number of frame buffers
    pub fn frame_count(mut self, count: u32) -> Self {
        self.frame_count = count;
        self
    }

    /// Builder: set the buffer layout strategy
    pub fn strategy(mut self, strategy: BufferStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Builder: set the packet-size negotiation policy
    pub fn packet_size(mut self, policy: PacketSizePolicy) -> Self {
        self.packet_size = policy;
        self
    }
}

/// An opened camera.
///
/// The handle owns the frame buffer set and mediates every capture and
/// configuration operation. Methods take `&mut self`: reconfiguration,
/// start/stop and close cannot race each other from the owning thread, and
/// operations that are illegal while capture runs fail with [`Error::Busy`].
pub struct Camera {
    #[allow(dead_code)]
    pub(crate) runtime: Arc<Runtime>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) dev: DeviceRef,
    pub(crate) stream: StreamRef,
    pub(crate) id: String,
    pub(crate) state: CaptureState,
    pub(crate) frames: FrameSet,
    pub(crate) session: Option<Arc<CaptureSession>>,
    frame_count: u32,
    closed: bool,
}

impl Camera {
    /// Open a camera and provision its initial frame buffers.
    ///
    /// When no id is given the first enumerated device is used.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use gencam::{Camera, OpenOptions, Runtime};
    /// use gencam::transport::sim::SimTransport;
    ///
    /// let transport = Arc::new(SimTransport::new());
    /// transport.add_device("SIM-CAM-0");
    /// let runtime = Runtime::init(transport).unwrap();
    /// let camera = Camera::open(&runtime, OpenOptions::default()).unwrap();
    /// assert!(camera.frame_set().is_allocated());
    /// ```
    pub fn open(runtime: &Arc<Runtime>, options: OpenOptions) -> Result<Self> {
        let transport = runtime.transport().clone();
        let id = match options.id {
            Some(id) => id,
            None => {
                let devices = transport.enumerate_devices()?;
                devices.into_iter().next().ok_or(Error::NotFound)?.id
            }
        };
        let dev = transport.open_device(&id, options.access)?;
        let stream = match transport.stream(dev) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = transport.close_device(dev);
                return Err(e);
            }
        };
        if let Err(e) = Self::adjust_packet_size(transport.as_ref(), stream) {
            match options.packet_size {
                PacketSizePolicy::Require => {
                    let _ = transport.close_device(dev);
                    return Err(e);
                }
                PacketSizePolicy::BestEffort => {
                    warn!(device = id.as_str(), error = %e, "packet size negotiation failed")
                }
            }
        }
        debug!(device = id.as_str(), "camera opened");
        let mut camera = Camera {
            runtime: runtime.clone(),
            transport,
            dev,
            stream,
            id,
            state: CaptureState::Idle,
            frames: FrameSet::new(options.strategy),
            session: None,
            frame_count: options.frame_count,
            closed: false,
        };
        // initial buffers sized from the current payload; errors close the
        // device via Drop
        camera.allocate_buffers(options.frame_count)?;
        Ok(camera)
    }

    fn adjust_packet_size(transport: &dyn Transport, stream: StreamRef) -> Result<()> {
        let module = ModuleRef::Stream(stream);
        transport.run_command(module, ADJUST_PACKET_SIZE_COMMAND)?;
        loop {
            match transport.poll_command_done(module, ADJUST_PACKET_SIZE_COMMAND) {
                Ok(true) => return Ok(()),
                Ok(false) => thread::yield_now(),
                // give up on the first query failure
                Err(_) => return Ok(()),
            }
        }
    }

    /// The camera identifier this handle was opened with.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn device_ref(&self) -> DeviceRef {
        self.dev
    }

    pub fn stream_ref(&self) -> StreamRef {
        self.stream
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Whether the capture engine is running.
    pub fn streaming(&self) -> bool {
        self.state.is_streaming()
    }

    /// Whether the device is actively producing frames.
    pub fn acquiring(&self) -> bool {
        self.state.is_acquiring()
    }

    pub fn frame_set(&self) -> &FrameSet {
        &self.frames
    }

    /// Allocate (or reallocate) `count` frame buffers sized to the current
    /// payload. Fails with `Busy` while capture is active.
    pub fn allocate_buffers(&mut self, count: u32) -> Result<()> {
        if count == 0 {
            return Err(Error::BadParameter("frame count must be non-zero"));
        }
        if self.state.is_streaming() {
            return Err(Error::Busy);
        }
        self.frame_count = count;
        self.reconcile_buffers()
    }

    /// Re-derive buffer requirements from the transport and rebuild the
    /// frame set when something relevant changed.
    ///
    /// Every payload-affecting parameter setter funnels through here, so an
    /// unchanged configuration never churns buffers.
    pub(crate) fn reconcile_buffers(&mut self) -> Result<()> {
        if self.state.is_streaming() {
            return Err(Error::Busy);
        }
        self.stop_capture()?;
        let payload = self.transport.payload_size(self.dev)?;
        let alignment = self
            .transport
            .buffer_alignment(self.dev)
            .map(memory::sanitize_alignment)
            .unwrap_or(1);
        let req = BufferRequirements {
            payload_size: payload,
            alignment,
            frame_count: self.frame_count,
        };
        let action = self.frames.reconcile(&req);
        if action != ReconcileAction::NoOp {
            debug!(
                device = self.id.as_str(),
                payload,
                alignment,
                frames = self.frame_count,
                ?action,
                "rebuilding frame buffers"
            );
        }
        self.frames.rebuild(&req, action)
    }

    /// Close the camera: stop capture, release all buffers, close the
    /// transport device.
    ///
    /// A failure at any stage is surfaced without completing the later
    /// stages; the Drop impl then retries as a best-effort safety net.
    pub fn close(mut self) -> Result<()> {
        self.close_internal()
    }

    fn close_internal(&mut self) -> Result<()> {
        self.stop_capture()?;
        self.frames.teardown(true);
        self.transport.close_device(self.dev)?;
        self.closed = true;
        debug!(device = self.id.as_str(), "camera closed");
        Ok(())
    }

    /// Soft-reset the device.
    ///
    /// The handle is consumed and the transport device closed regardless of
    /// the command's outcome; the camera must be reopened afterwards. The
    /// command's error, if any, is returned.
    pub fn reset(mut self) -> Result<()> {
        let result = self
            .transport
            .run_command(ModuleRef::Device(self.dev), "DeviceReset");
        if let Some(session) = self.session.take() {
            session.deactivate();
        }
        // the reset invalidated all transport-side registrations
        self.frames.set_announced(false);
        self.frames.teardown(true);
        self.state = CaptureState::Idle;
        if let Err(e) = self.transport.close_device(self.dev) {
            warn!(device = self.id.as_str(), error = %e, "closing device after reset failed");
        }
        self.closed = true;
        result
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.close_internal() {
            warn!(device = self.id.as_str(), error = %e, "failed to close camera on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_is_send() {
        fn implements<T: Send>() {}
        implements::<Camera>();
    }
}
