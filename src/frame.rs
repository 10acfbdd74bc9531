use std::ptr::NonNull;
use std::slice;

use crate::error::{Error, Result};
use crate::memory::{align_up, sanitize_alignment, AlignedBuffer};

/// Delivery status of a frame, set by the transport on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameStatus {
    /// Not delivered yet (or re-queued and awaiting the next completion).
    #[default]
    Pending,
    /// The frame was received completely.
    Complete,
    /// The frame was received, but data is missing.
    Incomplete,
    /// The buffer was too small for the payload.
    TooSmall,
    /// The frame is invalid and must not be interpreted.
    Invalid,
}

/// Association between a descriptor and its capture session.
///
/// Replaces per-descriptor raw context pointers: `session` tags which
/// capture session stamped the descriptor and `index` is the descriptor's
/// slot in its owning [`FrameSet`]. The completion relay re-asserts this
/// after every user callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameContext {
    pub session: u64,
    pub index: u32,
}

/// A single transport-facing frame buffer handle.
///
/// The descriptor is a plain buffer handle plus completion metadata; all
/// ownership bookkeeping lives in the owning [`FrameSet`]. Descriptor
/// addresses are used as keys by the transport while announced, so the set
/// keeps them in a boxed slice it never grows or moves.
pub struct FrameDescriptor {
    pub(crate) buffer: *mut u8,
    pub(crate) buffer_size: usize,
    /// Bytes of image data written by the transport.
    pub image_size: usize,
    pub width: u32,
    pub height: u32,
    pub frame_id: u64,
    pub timestamp: u64,
    pub status: FrameStatus,
    pub(crate) context: FrameContext,
}

impl FrameDescriptor {
    fn new(buffer: *mut u8, buffer_size: usize) -> Self {
        FrameDescriptor {
            buffer,
            buffer_size,
            image_size: 0,
            width: 0,
            height: 0,
            frame_id: 0,
            timestamp: 0,
            status: FrameStatus::default(),
            context: FrameContext::default(),
        }
    }

    /// Size of the backing buffer in bytes.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.buffer
    }

    /// View of the image data delivered into this buffer.
    pub fn data(&self) -> &[u8] {
        let len = self.image_size.min(self.buffer_size);
        unsafe { slice::from_raw_parts(self.buffer, len) }
    }

    pub fn context(&self) -> FrameContext {
        self.context
    }

    pub(crate) fn set_context(&mut self, context: FrameContext) {
        self.context = context;
    }
}

/// How backing memory for a frame set is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferStrategy {
    /// One contiguous allocation sliced into frame-sized slots.
    #[default]
    Contiguous,
    /// One independent allocation per frame.
    Discrete,
}

/// What the transport currently requires of the buffer set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRequirements {
    pub payload_size: u32,
    /// Required address alignment, power of two.
    pub alignment: usize,
    pub frame_count: u32,
}

/// Outcome of comparing requirements against the existing set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Nothing relevant changed, keep everything.
    NoOp,
    /// Rebuild the descriptor array over the existing memory.
    ReplaceFrames,
    /// Release everything and allocate from scratch.
    ReplaceAll,
}

/// The set of frame buffers and descriptors owned by a camera handle.
///
/// Memory and descriptors always travel together: descriptors only ever
/// point into allocations this set owns, and both are torn down here and
/// nowhere else.
pub struct FrameSet {
    strategy: BufferStrategy,
    allocations: Vec<AlignedBuffer>,
    frames: Box<[FrameDescriptor]>,
    payload_size: u32,
    slot_size: usize,
    alignment: usize,
    announced: bool,
}

// Raw pointers inside the descriptors only ever reference the allocations
// owned by this set.
unsafe impl Send for FrameSet {}

impl FrameSet {
    /// Returns an empty set; call [`FrameSet::rebuild`] to populate it.
    pub fn new(strategy: BufferStrategy) -> Self {
        FrameSet {
            strategy,
            allocations: Vec::new(),
            frames: Vec::new().into_boxed_slice(),
            payload_size: 0,
            slot_size: 0,
            alignment: 1,
            announced: false,
        }
    }

    pub fn strategy(&self) -> BufferStrategy {
        self.strategy
    }

    pub fn frame_count(&self) -> u32 {
        self.frames.len() as u32
    }

    pub fn payload_size(&self) -> u32 {
        self.payload_size
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Total bytes currently allocated for frame buffers.
    pub fn allocation_size(&self) -> usize {
        self.allocations.iter().map(AlignedBuffer::len).sum()
    }

    pub fn is_allocated(&self) -> bool {
        !self.frames.is_empty()
    }

    pub fn announced(&self) -> bool {
        self.announced
    }

    pub(crate) fn set_announced(&mut self, announced: bool) {
        self.announced = announced;
    }

    pub fn frames(&self) -> &[FrameDescriptor] {
        &self.frames
    }

    pub(crate) fn frames_mut(&mut self) -> &mut [FrameDescriptor] {
        &mut self.frames
    }

    pub(crate) fn frame_ptrs(&mut self) -> Vec<NonNull<FrameDescriptor>> {
        self.frames.iter_mut().map(NonNull::from).collect()
    }

    /// Compare `req` against the current set and decide what must change.
    ///
    /// This is the single reconciliation point every payload-affecting
    /// parameter setter goes through, so untouched configurations never
    /// churn buffers.
    pub fn reconcile(&self, req: &BufferRequirements) -> ReconcileAction {
        if !self.is_allocated() {
            return ReconcileAction::ReplaceAll;
        }
        if req.frame_count != self.frame_count() || req.alignment != self.alignment {
            return ReconcileAction::ReplaceAll;
        }
        let slot = align_up(req.payload_size as usize, sanitize_alignment(req.alignment as i64));
        if slot > self.slot_size {
            return ReconcileAction::ReplaceAll;
        }
        if req.payload_size != self.payload_size {
            // new payload still fits the existing slots
            return ReconcileAction::ReplaceFrames;
        }
        ReconcileAction::NoOp
    }

    /// Apply a reconcile decision, rebuilding descriptors and memory as needed.
    ///
    /// Fails with `Busy` while the set is announced to the transport and with
    /// `BadParameter` for a zero frame count or payload.
    pub fn rebuild(&mut self, req: &BufferRequirements, action: ReconcileAction) -> Result<()> {
        if self.announced {
            return Err(Error::Busy);
        }
        if req.frame_count == 0 {
            return Err(Error::BadParameter("frame count must be non-zero"));
        }
        if req.payload_size == 0 {
            return Err(Error::BadParameter("payload size must be non-zero"));
        }
        let action = if action == ReconcileAction::ReplaceFrames && self.allocations.is_empty() {
            ReconcileAction::ReplaceAll
        } else {
            action
        };
        match action {
            ReconcileAction::NoOp => Ok(()),
            ReconcileAction::ReplaceFrames => {
                self.teardown(false);
                self.build(req, true)
            }
            ReconcileAction::ReplaceAll => {
                self.teardown(true);
                self.build(req, false)
            }
        }
    }

    /// Drop the descriptor array; with `free_memory` also release the
    /// backing allocations.
    ///
    /// Must not be called while announced.
    pub fn teardown(&mut self, free_memory: bool) {
        debug_assert!(!self.announced);
        self.frames = Vec::new().into_boxed_slice();
        if free_memory {
            self.allocations.clear();
            self.payload_size = 0;
            self.slot_size = 0;
            self.alignment = 1;
        }
    }

    fn build(&mut self, req: &BufferRequirements, reuse_memory: bool) -> Result<()> {
        let count = req.frame_count as usize;
        if !reuse_memory {
            let alignment = sanitize_alignment(req.alignment as i64);
            let slot = align_up(req.payload_size as usize, alignment);
            match self.strategy {
                BufferStrategy::Contiguous => {
                    let total = slot.checked_mul(count).ok_or(Error::BadParameter(
                        "frame set size overflows the address space",
                    ))?;
                    self.allocations = vec![AlignedBuffer::allocate(total, alignment)?];
                }
                BufferStrategy::Discrete => {
                    let mut allocations = Vec::with_capacity(count);
                    for _ in 0..count {
                        allocations.push(AlignedBuffer::allocate(slot, alignment)?);
                    }
                    self.allocations = allocations;
                }
            }
            self.alignment = alignment;
            self.slot_size = slot;
        }

        let slot = self.slot_size;
        let mut frames = Vec::with_capacity(count);
        match self.strategy {
            BufferStrategy::Contiguous => {
                let base = self.allocations[0].as_ptr();
                for i in 0..count {
                    frames.push(FrameDescriptor::new(unsafe { base.add(i * slot) }, slot));
                }
            }
            BufferStrategy::Discrete => {
                for allocation in &self.allocations {
                    frames.push(FrameDescriptor::new(allocation.as_ptr(), slot));
                }
            }
        }
        self.frames = frames.into_boxed_slice();
        self.payload_size = req.payload_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(payload: u32, alignment: usize, count: u32) -> BufferRequirements {
        BufferRequirements {
            payload_size: payload,
            alignment,
            frame_count: count,
        }
    }

    #[test]
    fn fresh_set_always_replaces_all() {
        let set = FrameSet::new(BufferStrategy::Contiguous);
        assert_eq!(set.reconcile(&req(4096, 64, 4)), ReconcileAction::ReplaceAll);
    }

    #[test]
    fn unchanged_requirements_are_a_noop() {
        let mut set = FrameSet::new(BufferStrategy::Contiguous);
        let r = req(4096, 64, 4);
        set.rebuild(&r, ReconcileAction::ReplaceAll).unwrap();
        assert_eq!(set.reconcile(&r), ReconcileAction::NoOp);
    }

    #[test]
    fn payload_growth_beyond_slot_replaces_all() {
        let mut set = FrameSet::new(BufferStrategy::Contiguous);
        set.rebuild(&req(4096, 64, 4), ReconcileAction::ReplaceAll)
            .unwrap();
        let before = set.allocation_size();
        assert_eq!(
            set.reconcile(&req(131072, 64, 4)),
            ReconcileAction::ReplaceAll
        );
        set.rebuild(&req(131072, 64, 4), ReconcileAction::ReplaceAll)
            .unwrap();
        assert!(set.allocation_size() > before);
        assert_eq!(set.frame_count(), 4);
    }

    #[test]
    fn payload_shrink_reuses_memory() {
        let mut set = FrameSet::new(BufferStrategy::Contiguous);
        set.rebuild(&req(4096, 64, 4), ReconcileAction::ReplaceAll)
            .unwrap();
        let size_before = set.allocation_size();
        let base_before = set.frames()[0].as_ptr();
        let r = req(2048, 64, 4);
        assert_eq!(set.reconcile(&r), ReconcileAction::ReplaceFrames);
        set.rebuild(&r, ReconcileAction::ReplaceFrames).unwrap();
        assert_eq!(set.allocation_size(), size_before);
        assert_eq!(set.frames()[0].as_ptr(), base_before);
        assert_eq!(set.payload_size(), 2048);
    }

    #[test]
    fn alignment_change_replaces_all() {
        let mut set = FrameSet::new(BufferStrategy::Contiguous);
        set.rebuild(&req(4096, 64, 4), ReconcileAction::ReplaceAll)
            .unwrap();
        assert_eq!(
            set.reconcile(&req(4096, 128, 4)),
            ReconcileAction::ReplaceAll
        );
    }

    #[test]
    fn zero_count_is_rejected() {
        let mut set = FrameSet::new(BufferStrategy::Contiguous);
        assert!(matches!(
            set.rebuild(&req(4096, 64, 0), ReconcileAction::ReplaceAll),
            Err(Error::BadParameter(_))
        ));
    }

    #[test]
    fn rebuild_while_announced_is_busy() {
        let mut set = FrameSet::new(BufferStrategy::Contiguous);
        set.rebuild(&req(4096, 64, 4), ReconcileAction::ReplaceAll)
            .unwrap();
        set.set_announced(true);
        assert!(matches!(
            set.rebuild(&req(8192, 64, 4), ReconcileAction::ReplaceAll),
            Err(Error::Busy)
        ));
        set.set_announced(false);
    }

    #[test]
    fn contiguous_slots_are_aligned_and_disjoint() {
        let mut set = FrameSet::new(BufferStrategy::Contiguous);
        set.rebuild(&req(1000, 64, 3), ReconcileAction::ReplaceAll)
            .unwrap();
        let frames = set.frames();
        assert_eq!(frames.len(), 3);
        for pair in frames.windows(2) {
            let gap = pair[1].as_ptr() as usize - pair[0].as_ptr() as usize;
            assert!(gap >= 1000);
            assert_eq!(pair[0].as_ptr() as usize % 64, 0);
        }
    }

    #[test]
    fn discrete_buffers_are_independent_and_aligned() {
        let mut set = FrameSet::new(BufferStrategy::Discrete);
        set.rebuild(&req(1000, 256, 3), ReconcileAction::ReplaceAll)
            .unwrap();
        assert_eq!(set.allocations.len(), 3);
        for frame in set.frames() {
            assert_eq!(frame.as_ptr() as usize % 256, 0);
            assert!(frame.buffer_size() >= 1000);
        }
    }
}
