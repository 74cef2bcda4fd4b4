//! Backing runtime: raw host storage and device tagging.
//!
//! The graph core never allocates per tensor. It plans offsets first, then
//! asks its runtime for one contiguous buffer, and binds every tensor to a
//! blob inside it.

use crate::internal::*;
use derive_new::new;
use std::alloc::Layout;
use std::ptr::NonNull;

/// Alignment of arena buffers: the widest element type the planner sizes.
pub const BUFFER_ALIGNMENT: usize = 8;

/// Device discriminant of a runtime, compared when a tensor built for one
/// graph is adopted by another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
}

impl fmt::Display for Device {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Device::Cpu => write!(fmt, "CPU"),
        }
    }
}

/// Raw storage provider behind an arena.
pub trait Runtime: fmt::Debug {
    /// The device this runtime allocates on.
    fn device(&self) -> Device;

    /// Allocate `size` bytes, aligned to [BUFFER_ALIGNMENT].
    fn alloc(&self, size: usize) -> CulvertResult<NonNull<u8>>;

    /// Release a buffer obtained from `alloc`.
    ///
    /// # Safety
    /// `ptr` must come from `alloc` on the same runtime, with the same
    /// `size`, and must not be used afterwards.
    unsafe fn dealloc(&self, ptr: NonNull<u8>, size: usize);
}

/// Host-memory runtime.
#[derive(Debug, Clone, Default)]
pub struct CpuRuntime;

impl Runtime for CpuRuntime {
    fn device(&self) -> Device {
        Device::Cpu
    }

    fn alloc(&self, size: usize) -> CulvertResult<NonNull<u8>> {
        ensure!(size > 0, "refusing to allocate an empty buffer");
        let layout = Layout::from_size_align(size, BUFFER_ALIGNMENT)?;
        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or_else(|| format_err!("host allocation of {} bytes failed", size))
    }

    unsafe fn dealloc(&self, ptr: NonNull<u8>, size: usize) {
        let layout = Layout::from_size_align_unchecked(size, BUFFER_ALIGNMENT);
        std::alloc::dealloc(ptr.as_ptr(), layout);
    }
}

/// One realized arena: the single backing allocation for a graph's tensors.
///
/// The buffer owns its storage and returns it to the runtime on drop.
pub struct Buffer {
    runtime: Arc<dyn Runtime>,
    ptr: NonNull<u8>,
    len: usize,
}

impl Buffer {
    pub(crate) fn realize(runtime: Arc<dyn Runtime>, len: usize) -> CulvertResult<Buffer> {
        let ptr = runtime.alloc(len)?;
        Ok(Buffer { runtime, ptr, len })
    }

    /// Base address of the buffer.
    pub fn base(&self) -> NonNull<u8> {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn device(&self) -> Device {
        self.runtime.device()
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "Buffer({} bytes on {} at {:p})", self.len, self.device(), self.ptr)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // SAFETY: ptr came from this runtime's alloc with this len.
        unsafe { self.runtime.dealloc(self.ptr, self.len) }
    }
}

/// A tensor's view into a realized buffer.
///
/// The blob does not own the bytes it points at, but holding it keeps the
/// backing buffer live.
#[derive(Clone, new)]
pub struct Blob {
    buffer: Arc<Buffer>,
    offset: usize,
}

impl Blob {
    /// Address of the first byte of the tensor.
    pub fn as_ptr(&self) -> NonNull<u8> {
        // SAFETY: the planner never hands out an offset beyond the peak the
        // buffer was sized with.
        unsafe { NonNull::new_unchecked(self.buffer.base().as_ptr().add(self.offset)) }
    }

    /// Offset of the tensor inside the arena.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn device(&self) -> Device {
        self.buffer.device()
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "Blob(+{} in {:?})", self.offset, self.buffer)
    }
}
