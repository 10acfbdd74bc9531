//! Safe, synchronous-feeling capture API for GenICam-style machine vision
//! cameras.
//!
//! The crate wraps an asynchronous camera transport (announce buffers, queue
//! them, get completion callbacks) behind a handle-based API: open a
//! [`Camera`], start capture with a callback, and every completed frame is
//! handed to you and automatically re-queued until you stop.

mod error;
pub use error::{Error, Result};

pub mod memory;
pub use memory::AlignedBuffer;

pub mod frame;
pub use frame::{
    BufferRequirements, BufferStrategy, FrameContext, FrameDescriptor, FrameSet, FrameStatus,
    ReconcileAction,
};

mod capture;
pub use capture::{CaptureCallback, CaptureState};

mod device;
pub use device::{Camera, OpenOptions, PacketSizePolicy};

mod params;
pub use params::FeatureRange;

mod runtime;
pub use runtime::Runtime;

pub mod transport;
pub use transport::{AccessMode, DeviceInfo, DeviceRef, StreamRef, Transport};
