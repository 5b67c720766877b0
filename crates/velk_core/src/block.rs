//! Intrusive reference-count blocks
//!
//! Every refcounted object owns exactly one heap-allocated control block:
//! a strong count, a weak count and a back-pointer. The strong set
//! collectively owns one weak reference, so `weak >= 1` whenever
//! `strong > 0`. When the strong count reaches zero the object is
//! destroyed; when the weak count reaches zero the block is released.
//!
//! Two block kinds exist. The regular block is exactly the three fields
//! and is recycled through a thread-local pool. The external block is a
//! superset carrying a destroy callback; slab allocators use it to run
//! custom reclamation when an object dies inside a slot. The low bit of
//! the back-pointer distinguishes the kinds.

use std::cell::Cell;
use std::ptr;
use std::sync::atomic::{fence, AtomicU32, Ordering};

const EXTERNAL_TAG: usize = 0b1;

/// Refcount record shared by all handles of one object.
///
/// `strong` and `weak` are atomic so handles may be copied and dropped
/// from any thread; everything else in the kernel is single-thread.
#[repr(C)]
pub struct ControlBlock {
    strong: AtomicU32,
    weak: AtomicU32,
    /// Object back-pointer with the external tag in the low bit. Doubles
    /// as the freelist link while the block sits in the pool.
    ptr: Cell<*mut ()>,
}

impl ControlBlock {
    pub(crate) const fn new(strong: u32, weak: u32) -> ControlBlock {
        ControlBlock {
            strong: AtomicU32::new(strong),
            weak: AtomicU32::new(weak),
            ptr: Cell::new(ptr::null_mut()),
        }
    }

    pub fn strong_count(&self) -> u32 {
        self.strong.load(Ordering::Relaxed)
    }

    pub fn weak_count(&self) -> u32 {
        self.weak.load(Ordering::Relaxed)
    }

    /// Adds one strong reference.
    pub fn add_strong(&self) {
        self.strong.fetch_add(1, Ordering::Relaxed);
    }

    /// Releases one strong reference. Returns true when this was the
    /// last one; the caller must then destroy the object and release the
    /// strong set's shared weak reference.
    #[must_use]
    pub fn release_strong(&self) -> bool {
        if self.strong.fetch_sub(1, Ordering::AcqRel) == 1 {
            fence(Ordering::Acquire);
            return true;
        }
        false
    }

    /// Adds one weak reference.
    pub fn add_weak(&self) {
        self.weak.fetch_add(1, Ordering::Relaxed);
    }

    /// Releases one weak reference. Returns true when this was the last
    /// one; the caller must then release the block itself.
    #[must_use]
    pub fn release_weak(&self) -> bool {
        if self.weak.fetch_sub(1, Ordering::AcqRel) == 1 {
            fence(Ordering::Acquire);
            return true;
        }
        false
    }

    /// Attempts to add a strong reference for a weak upgrade. Fails once
    /// the strong count has reached zero.
    #[must_use]
    pub fn try_upgrade(&self) -> bool {
        let mut current = self.strong.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return false;
            }
            match self.strong.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Stores the object back-pointer, preserving the external tag.
    pub fn set_object_ptr(&self, object: *mut ()) {
        let tag = self.ptr.get() as usize & EXTERNAL_TAG;
        self.ptr.set((object as usize | tag) as *mut ());
    }

    /// The object back-pointer with the tag masked off.
    pub fn object_ptr(&self) -> *mut () {
        (self.ptr.get() as usize & !EXTERNAL_TAG) as *mut ()
    }

    /// Marks the block as external: it is the leading field of an
    /// [`ExternalControlBlock`] and must be released through its destroy
    /// callback.
    pub fn set_external_tag(&self) {
        self.ptr.set((self.ptr.get() as usize | EXTERNAL_TAG) as *mut ());
    }

    pub fn is_external(&self) -> bool {
        self.ptr.get() as usize & EXTERNAL_TAG != 0
    }

    /// Recovers the external block header when the tag is set.
    ///
    /// # Safety
    /// The block must actually be the leading field of an
    /// `ExternalControlBlock` whenever the tag is set; both allocation
    /// paths in the kernel guarantee this.
    pub unsafe fn external(&self) -> Option<*mut ExternalControlBlock> {
        if self.is_external() {
            Some(self as *const ControlBlock as *mut ExternalControlBlock)
        } else {
            None
        }
    }

    #[cfg(feature = "block-pool")]
    fn freelist_next(&self) -> *mut ControlBlock {
        self.ptr.get() as *mut ControlBlock
    }

    #[cfg(feature = "block-pool")]
    fn set_freelist_next(&self, next: *mut ControlBlock) {
        self.ptr.set(next as *mut ());
    }
}

/// Which release is being performed through a destroy callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DestroyPhase {
    /// The last strong reference dropped: destroy the object.
    Object,
    /// The last weak reference dropped: release the block allocation.
    Block,
}

/// Destroy callback of an external block.
pub type DestroyFn = unsafe fn(*mut ExternalControlBlock, DestroyPhase);

/// Control block with a custom destroy callback.
///
/// Allocated and owned by whoever supplies the callback (the hive);
/// handles only ever see the leading [`ControlBlock`].
#[repr(C)]
pub struct ExternalControlBlock {
    pub block: ControlBlock,
    pub destroy: DestroyFn,
}

impl ExternalControlBlock {
    pub fn new(destroy: DestroyFn) -> ExternalControlBlock {
        ExternalControlBlock {
            block: ControlBlock::new(1, 1),
            destroy,
        }
    }
}

// ---------------------------------------------------------------------------
// Thread-local block pool
// ---------------------------------------------------------------------------

#[cfg(feature = "block-pool")]
mod pool {
    use super::ControlBlock;
    use std::cell::RefCell;

    const POOL_MAX: usize = 256;

    struct BlockPool {
        head: *mut ControlBlock,
        size: usize,
    }

    impl Drop for BlockPool {
        fn drop(&mut self) {
            let mut head = self.head;
            while !head.is_null() {
                let next = unsafe { (*head).freelist_next() };
                drop(unsafe { Box::from_raw(head) });
                head = next;
            }
        }
    }

    thread_local! {
        static POOL: RefCell<BlockPool> = const {
            RefCell::new(BlockPool { head: std::ptr::null_mut(), size: 0 })
        };
    }

    pub(super) fn alloc() -> *mut ControlBlock {
        let recycled = POOL
            .try_with(|pool| {
                let mut pool = pool.borrow_mut();
                if pool.head.is_null() {
                    return None;
                }
                let block = pool.head;
                pool.head = unsafe { (*block).freelist_next() };
                pool.size -= 1;
                Some(block)
            })
            .ok()
            .flatten();

        match recycled {
            Some(block) => {
                unsafe { (*block).reset() };
                block
            }
            None => Box::into_raw(Box::new(ControlBlock::new(1, 1))),
        }
    }

    pub(super) fn dealloc(block: *mut ControlBlock) {
        let pooled = POOL
            .try_with(|pool| {
                let mut pool = pool.borrow_mut();
                if pool.size >= POOL_MAX {
                    return false;
                }
                unsafe { (*block).set_freelist_next(pool.head) };
                pool.head = block;
                pool.size += 1;
                true
            })
            .unwrap_or(false);

        if !pooled {
            drop(unsafe { Box::from_raw(block) });
        }
    }
}

impl ControlBlock {
    /// Reinitializes a pooled block for reuse.
    #[cfg(feature = "block-pool")]
    fn reset(&self) {
        self.strong.store(1, Ordering::Relaxed);
        self.weak.store(1, Ordering::Relaxed);
        self.ptr.set(ptr::null_mut());
    }
}

/// Allocates a regular control block with `strong = 1, weak = 1`.
pub fn alloc_control_block() -> *mut ControlBlock {
    #[cfg(feature = "block-pool")]
    {
        pool::alloc()
    }
    #[cfg(not(feature = "block-pool"))]
    {
        Box::into_raw(Box::new(ControlBlock::new(1, 1)))
    }
}

/// Releases a regular control block, recycling it when pool space remains.
///
/// # Safety
/// `block` must come from [`alloc_control_block`], have no outstanding
/// references, and must not be an external block.
pub unsafe fn dealloc_control_block(block: *mut ControlBlock) {
    debug_assert!(!(*block).is_external());
    #[cfg(feature = "block-pool")]
    {
        pool::dealloc(block);
    }
    #[cfg(not(feature = "block-pool"))]
    {
        drop(Box::from_raw(block));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_block_counts() {
        let block = alloc_control_block();
        let b = unsafe { &*block };
        assert_eq!(b.strong_count(), 1);
        assert_eq!(b.weak_count(), 1);
        assert!(b.release_strong());
        assert!(b.release_weak());
        unsafe { dealloc_control_block(block) };
    }

    #[test]
    fn test_pool_recycles_blocks() {
        let first = alloc_control_block();
        let b = unsafe { &*first };
        assert!(b.release_strong());
        assert!(b.release_weak());
        unsafe { dealloc_control_block(first) };

        // The pooled block comes back reinitialized.
        let second = alloc_control_block();
        let b = unsafe { &*second };
        assert_eq!(b.strong_count(), 1);
        assert_eq!(b.weak_count(), 1);
        assert!(b.object_ptr().is_null());
        assert!(b.release_strong());
        assert!(b.release_weak());
        unsafe { dealloc_control_block(second) };
    }

    #[test]
    fn test_upgrade_fails_after_last_strong() {
        let block = alloc_control_block();
        let b = unsafe { &*block };
        assert!(b.try_upgrade());
        assert!(!b.release_strong());
        assert!(b.release_strong());
        assert!(!b.try_upgrade());
        assert!(b.release_weak());
        unsafe { dealloc_control_block(block) };
    }

    #[test]
    fn test_external_tag_masking() {
        let block = ControlBlock::new(1, 1);
        let object = 0x1000 as *mut ();
        block.set_object_ptr(object);
        assert!(!block.is_external());
        block.set_external_tag();
        assert!(block.is_external());
        assert_eq!(block.object_ptr(), object);
        // Re-storing the pointer keeps the tag.
        block.set_object_ptr(0x2000 as *mut ());
        assert!(block.is_external());
        assert_eq!(block.object_ptr(), 0x2000 as *mut ());
    }
}
