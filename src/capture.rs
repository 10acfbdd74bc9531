use std::any::Any;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{debug, trace, warn};

use crate::device::Camera;
use crate::error::{Error, Result};
use crate::frame::{FrameContext, FrameDescriptor};
use crate::transport::{DeviceRef, FrameObserver, ModuleRef, StreamRef, Transport};

/// Capture-loop state of a camera handle.
///
/// Forward transitions: Idle → Announced (buffers announced) → Streaming
/// (capture engine running) → Acquiring (device producing frames).
/// [`Camera::stop_capture`] walks them back in reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    Announced,
    Streaming,
    Acquiring,
}

impl CaptureState {
    /// Whether the capture engine is running.
    pub fn is_streaming(self) -> bool {
        matches!(self, CaptureState::Streaming | CaptureState::Acquiring)
    }

    /// Whether the device is actively producing frames.
    pub fn is_acquiring(self) -> bool {
        matches!(self, CaptureState::Acquiring)
    }
}

/// User callback invoked for every completed frame.
///
/// Runs on the transport's delivery thread. The image data must be copied
/// out if it is needed after the callback returns; the buffer is re-queued
/// immediately afterwards.
pub type CaptureCallback =
    dyn Fn(&DeviceRef, &StreamRef, &mut FrameDescriptor, &(dyn Any + Send + Sync)) + Send + Sync;

static SESSION_IDS: AtomicU64 = AtomicU64::new(1);

/// Per-capture-session state shared with the transport's delivery thread.
///
/// One session lives from `start_capture` to `stop_capture`. Its
/// [`FrameObserver`] impl is the completion relay: hand the frame to the
/// user callback, re-assert the descriptor's context, re-queue.
pub(crate) struct CaptureSession {
    id: u64,
    transport: Arc<dyn Transport>,
    dev: DeviceRef,
    callback: Arc<CaptureCallback>,
    user_data: Arc<dyn Any + Send + Sync>,
    active: AtomicBool,
}

impl CaptureSession {
    fn new(
        transport: Arc<dyn Transport>,
        dev: DeviceRef,
        callback: Arc<CaptureCallback>,
        user_data: Arc<dyn Any + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(CaptureSession {
            id: SESSION_IDS.fetch_add(1, Ordering::Relaxed),
            transport,
            dev,
            callback,
            user_data,
            active: AtomicBool::new(true),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Stop re-queueing frames. Called by stop before the queue is flushed,
    /// so a relay racing with stop drops out instead of re-queueing into a
    /// flushed queue.
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl FrameObserver for CaptureSession {
    fn frame_done(
        self: Arc<Self>,
        dev: &DeviceRef,
        stream: &StreamRef,
        frame: &mut FrameDescriptor,
    ) {
        trace!(frame_id = frame.frame_id, "frame completed");
        let saved = frame.context();
        (self.callback)(dev, stream, frame, self.user_data.as_ref());
        // user code must not be able to break the re-queue bookkeeping
        frame.set_context(saved);
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        let ptr = NonNull::from(frame);
        let observer = self.clone();
        if let Err(e) = unsafe { self.transport.queue_buffer(self.dev, ptr, observer) } {
            // stop() may have flushed the queue between the flag check and
            // here; the frame is revoked with the rest either way.
            warn!(error = %e, "failed to re-queue completed frame");
        }
    }
}

impl Camera {
    /// Start continuous capture.
    ///
    /// Announces every frame buffer, starts the capture engine, stamps the
    /// session context into every descriptor, queues all descriptors and
    /// finally runs the `AcquisitionStart` command. Any failure partway
    /// unwinds via [`Camera::stop_capture`] and surfaces the triggering
    /// error.
    ///
    /// `callback` is invoked once per completed frame on the transport's
    /// delivery thread until [`Camera::stop_capture`] is called.
    pub fn start_capture(
        &mut self,
        callback: Arc<CaptureCallback>,
        user_data: Arc<dyn Any + Send + Sync>,
    ) -> Result<()> {
        if self.state.is_streaming() {
            return Err(Error::Busy);
        }
        if !self.frames.is_allocated() {
            return Err(Error::Resources("no frame buffers allocated".into()));
        }
        // alignment is a property of the active stream configuration, so it
        // is re-derived on every start; a no-op when nothing changed
        self.reconcile_buffers()?;
        debug!(
            device = self.id.as_str(),
            frames = self.frames.frame_count(),
            "starting capture"
        );

        let ptrs = self.frames.frame_ptrs();
        for (index, ptr) in ptrs.iter().enumerate() {
            if let Err(e) = unsafe { self.transport.announce_buffer(self.dev, *ptr) } {
                warn!(index, error = %e, "announcing frame buffer failed, rolling back");
                self.transport.flush_queue(self.dev);
                while self.transport.revoke_all_buffers(self.dev).is_err() {
                    thread::yield_now();
                }
                return Err(e);
            }
        }
        self.frames.set_announced(true);
        self.state = CaptureState::Announced;

        if let Err(e) = self.transport.start_capture_engine(self.dev) {
            // unwind and surface the triggering error, not the cleanup's
            let _ = self.stop_capture();
            return Err(e);
        }
        self.state = CaptureState::Streaming;

        let session = CaptureSession::new(
            self.transport.clone(),
            self.dev,
            callback,
            user_data,
        );
        for (index, frame) in self.frames.frames_mut().iter_mut().enumerate() {
            frame.set_context(FrameContext {
                session: session.id(),
                index: index as u32,
            });
        }
        self.session = Some(session.clone());

        for ptr in ptrs {
            if let Err(e) = unsafe { self.transport.queue_buffer(self.dev, ptr, session.clone()) }
            {
                let _ = self.stop_capture();
                return Err(e);
            }
        }

        if let Err(e) = self
            .transport
            .run_command(ModuleRef::Device(self.dev), "AcquisitionStart")
        {
            let _ = self.stop_capture();
            return Err(e);
        }
        self.state = CaptureState::Acquiring;
        debug!(device = self.id.as_str(), "acquisition started");
        Ok(())
    }

    /// Stop capture. Tolerant of being called in any state; a no-op when
    /// already idle with nothing announced.
    ///
    /// Revocation is retried until the transport confirms no frame is in
    /// flight. There is no timeout: a transport that never completes its
    /// outstanding frames will block the calling thread here.
    pub fn stop_capture(&mut self) -> Result<()> {
        if self.state == CaptureState::Idle && !self.frames.announced() {
            return Ok(());
        }
        if self.state.is_acquiring() {
            self.transport
                .run_command(ModuleRef::Device(self.dev), "AcquisitionStop")?;
            self.state = CaptureState::Streaming;
        }
        if self.state.is_streaming() {
            self.transport.end_capture_engine(self.dev)?;
            self.state = CaptureState::Announced;
        }
        if let Some(session) = &self.session {
            session.deactivate();
        }
        self.transport.flush_queue(self.dev);
        while self.transport.revoke_all_buffers(self.dev).is_err() {
            thread::yield_now();
        }
        self.frames.set_announced(false);
        self.session = None;
        self.state = CaptureState::Idle;
        debug!(device = self.id.as_str(), "capture stopped");
        Ok(())
    }
}
