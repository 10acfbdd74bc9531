//! The transport collaborator contract.
//!
//! Everything the capture core needs from a GenTL-style camera runtime,
//! expressed as a trait so vendor backends and the in-process simulation
//! are interchangeable.

use std::path::Path;
use std::ptr::NonNull;
use std::sync::Arc;

use bitflags::bitflags;

use crate::error::Result;
use crate::frame::FrameDescriptor;

#[cfg(feature = "sim")]
pub mod sim;

bitflags! {
    /// Device access modes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessMode: u32 {
        const FULL      = 0x01;
        const READ      = 0x02;
        const EXCLUSIVE = 0x08;
    }
}

/// Opaque reference to an opened transport device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceRef(pub(crate) u64);

/// Opaque reference to a device's capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamRef(pub(crate) u64);

/// Module a feature command is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleRef {
    Device(DeviceRef),
    Stream(StreamRef),
}

/// Description of an enumerable device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub id: String,
    pub model: String,
    pub serial: String,
}

/// One entry of an enumerated feature's option list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumOption {
    pub name: String,
    pub available: bool,
}

/// Completion observer registered with every queued buffer.
///
/// The transport invokes this on its own delivery thread(s), once per
/// finished frame.
pub trait FrameObserver: Send + Sync {
    fn frame_done(
        self: Arc<Self>,
        dev: &DeviceRef,
        stream: &StreamRef,
        frame: &mut FrameDescriptor,
    );
}

/// A GenTL-style camera transport runtime.
///
/// Scalar features are addressed by their GenICam name; command features run
/// against either the device or the stream module.
pub trait Transport: Send + Sync {
    /// Start the runtime. Implementations must be idempotent.
    fn startup(&self, config_path: Option<&Path>) -> Result<()>;

    /// Stop the runtime. Best effort; never fails.
    fn shutdown(&self);

    fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>>;

    fn open_device(&self, id: &str, mode: AccessMode) -> Result<DeviceRef>;

    fn close_device(&self, dev: DeviceRef) -> Result<()>;

    /// The capture stream belonging to an opened device.
    fn stream(&self, dev: DeviceRef) -> Result<StreamRef>;

    /// Bytes needed for one complete frame at the current configuration.
    fn payload_size(&self, dev: DeviceRef) -> Result<u32>;

    /// Required frame buffer alignment for the active stream configuration.
    ///
    /// Callers fall back to 1 when this is unsupported.
    fn buffer_alignment(&self, dev: DeviceRef) -> Result<i64>;

    /// Register a frame buffer so it becomes eligible for delivery.
    ///
    /// # Safety
    ///
    /// `frame` and the buffer it points to must stay valid and at a stable
    /// address until [`Transport::revoke_all_buffers`] has returned success
    /// for this device.
    unsafe fn announce_buffer(&self, dev: DeviceRef, frame: NonNull<FrameDescriptor>)
        -> Result<()>;

    /// Unregister all announced buffers. Fails while frames are still in
    /// flight; callers retry.
    fn revoke_all_buffers(&self, dev: DeviceRef) -> Result<()>;

    fn start_capture_engine(&self, dev: DeviceRef) -> Result<()>;

    fn end_capture_engine(&self, dev: DeviceRef) -> Result<()>;

    /// Discard all buffers waiting in the receive queue.
    fn flush_queue(&self, dev: DeviceRef);

    /// Submit an announced buffer to the receive queue.
    ///
    /// `observer` is invoked once when the transport has filled the frame.
    ///
    /// # Safety
    ///
    /// Same contract as [`Transport::announce_buffer`]: `frame` must stay
    /// valid until the queue has been flushed or the frame delivered.
    unsafe fn queue_buffer(
        &self,
        dev: DeviceRef,
        frame: NonNull<FrameDescriptor>,
        observer: Arc<dyn FrameObserver>,
    ) -> Result<()>;

    fn run_command(&self, module: ModuleRef, name: &str) -> Result<()>;

    fn poll_command_done(&self, module: ModuleRef, name: &str) -> Result<bool>;

    fn feature_int(&self, dev: DeviceRef, name: &str) -> Result<i64>;

    fn set_feature_int(&self, dev: DeviceRef, name: &str, value: i64) -> Result<()>;

    /// (min, max, step) of an integer feature.
    fn feature_int_range(&self, dev: DeviceRef, name: &str) -> Result<(i64, i64, i64)>;

    /// The discrete value set of an integer feature, if it has one.
    fn feature_int_values(&self, dev: DeviceRef, name: &str) -> Result<Vec<i64>>;

    fn feature_float(&self, dev: DeviceRef, name: &str) -> Result<f64>;

    fn set_feature_float(&self, dev: DeviceRef, name: &str, value: f64) -> Result<()>;

    /// (min, max, step) of a float feature; step is reported only by some
    /// transports.
    fn feature_float_range(&self, dev: DeviceRef, name: &str) -> Result<(f64, f64, Option<f64>)>;

    fn feature_enum(&self, dev: DeviceRef, name: &str) -> Result<String>;

    fn set_feature_enum(&self, dev: DeviceRef, name: &str, value: &str) -> Result<()>;

    /// All options of an enumerated feature with per-option availability.
    fn feature_enum_options(&self, dev: DeviceRef, name: &str) -> Result<Vec<EnumOption>>;

    fn feature_bool(&self, dev: DeviceRef, name: &str) -> Result<bool>;

    fn set_feature_bool(&self, dev: DeviceRef, name: &str, value: bool) -> Result<()>;
}
