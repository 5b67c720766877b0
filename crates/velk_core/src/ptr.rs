//! Strong and weak object handles
//!
//! `Ref<T>` and `WeakRef<T>` are aliasing smart pointers over the
//! intrusive [`ControlBlock`](crate::block::ControlBlock): a target
//! pointer (possibly an interface view of the object) plus the block
//! shared by every handle of that object. The counters are atomic, so
//! handles may be dropped from any thread; the objects they point at
//! follow the kernel's single-thread discipline and the handles are
//! deliberately `!Send`.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;

use crate::block::{dealloc_control_block, ControlBlock, DestroyPhase};
use crate::interface::{IInterface, InterfaceExt, InterfaceInfo};

/// Strong handle: keeps the object alive.
pub struct Ref<T: IInterface + ?Sized> {
    target: NonNull<T>,
    block: NonNull<ControlBlock>,
    _not_send: PhantomData<*const ()>,
}

/// Weak handle: keeps only the control block alive; upgrade to access
/// the object.
pub struct WeakRef<T: IInterface + ?Sized> {
    target: NonNull<T>,
    block: NonNull<ControlBlock>,
    _not_send: PhantomData<*const ()>,
}

impl<T: IInterface + ?Sized> Ref<T> {
    /// Takes ownership of one already-counted strong reference.
    ///
    /// # Safety
    /// `target` must be the live object governed by `block`, and the
    /// caller must own exactly one strong count to hand over.
    pub unsafe fn adopt(target: NonNull<T>, block: NonNull<ControlBlock>) -> Ref<T> {
        Ref {
            target,
            block,
            _not_send: PhantomData,
        }
    }

    /// Borrows the target.
    pub fn get(&self) -> &T {
        unsafe { self.target.as_ref() }
    }

    /// Creates a weak handle to the same object.
    pub fn downgrade(&self) -> WeakRef<T> {
        self.block_ref().add_weak();
        WeakRef {
            target: self.target,
            block: self.block,
            _not_send: PhantomData,
        }
    }

    /// Navigates to another interface of the same object.
    pub fn cast<I>(&self) -> Option<Ref<I>>
    where
        I: IInterface + InterfaceInfo + ?Sized + 'static,
    {
        let view: &I = self.get().interface::<I>()?;
        self.block_ref().add_strong();
        Some(Ref {
            target: NonNull::from(view),
            block: self.block,
            _not_send: PhantomData,
        })
    }

    /// Whether two handles (of possibly different interface types) point
    /// at the same object.
    pub fn ptr_eq<U: IInterface + ?Sized>(&self, other: &Ref<U>) -> bool {
        self.block == other.block
    }

    /// Address of the object, for slab residency checks.
    pub fn data_ptr(&self) -> *const () {
        self.target.as_ptr() as *const ()
    }

    pub fn strong_count(&self) -> u32 {
        self.block_ref().strong_count()
    }

    pub(crate) fn block(&self) -> NonNull<ControlBlock> {
        self.block
    }

    /// Releases the handle without dropping the reference it owns.
    pub(crate) fn into_raw(self) -> (NonNull<T>, NonNull<ControlBlock>) {
        let parts = (self.target, self.block);
        std::mem::forget(self);
        parts
    }

    fn block_ref(&self) -> &ControlBlock {
        unsafe { self.block.as_ref() }
    }
}

impl<T: IInterface + ?Sized> Clone for Ref<T> {
    fn clone(&self) -> Ref<T> {
        self.block_ref().add_strong();
        Ref {
            target: self.target,
            block: self.block,
            _not_send: PhantomData,
        }
    }
}

impl<T: IInterface + ?Sized> Deref for Ref<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.get()
    }
}

impl<T: IInterface + ?Sized> Drop for Ref<T> {
    fn drop(&mut self) {
        unsafe {
            let block = self.block.as_ptr();
            if !(*block).release_strong() {
                return;
            }
            if let Some(ecb) = (*block).external() {
                // Slab-resident object: the block's owner reclaims both
                // the object and, eventually, the block.
                ((*ecb).destroy)(ecb, DestroyPhase::Object);
            } else {
                // Boxed object: the handle's vtable carries the concrete
                // drop glue and allocation layout.
                drop(Box::from_raw(self.target.as_ptr()));
                if (*block).release_weak() {
                    dealloc_control_block(block);
                }
            }
        }
    }
}

impl<T: IInterface + ?Sized> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("strong", &self.block_ref().strong_count())
            .field("weak", &self.block_ref().weak_count())
            .finish()
    }
}

impl<T: IInterface + ?Sized> WeakRef<T> {
    /// Takes ownership of one already-counted weak reference.
    ///
    /// # Safety
    /// `target` must be the object governed by `block`, and the caller
    /// must own exactly one weak count to hand over.
    pub unsafe fn adopt(target: NonNull<T>, block: NonNull<ControlBlock>) -> WeakRef<T> {
        WeakRef {
            target,
            block,
            _not_send: PhantomData,
        }
    }

    /// Attempts to recover a strong handle; fails once the last strong
    /// reference has dropped.
    pub fn upgrade(&self) -> Option<Ref<T>> {
        let block = unsafe { self.block.as_ref() };
        if block.try_upgrade() {
            Some(Ref {
                target: self.target,
                block: self.block,
                _not_send: PhantomData,
            })
        } else {
            None
        }
    }

    /// Whether two weak handles point at the same object.
    pub fn ptr_eq(&self, other: &WeakRef<T>) -> bool {
        self.block == other.block
    }

    pub fn strong_count(&self) -> u32 {
        unsafe { self.block.as_ref() }.strong_count()
    }
}

impl<T: IInterface + ?Sized> Clone for WeakRef<T> {
    fn clone(&self) -> WeakRef<T> {
        unsafe { self.block.as_ref() }.add_weak();
        WeakRef {
            target: self.target,
            block: self.block,
            _not_send: PhantomData,
        }
    }
}

impl<T: IInterface + ?Sized> Drop for WeakRef<T> {
    fn drop(&mut self) {
        unsafe {
            let block = self.block.as_ptr();
            if !(*block).release_weak() {
                return;
            }
            if let Some(ecb) = (*block).external() {
                ((*ecb).destroy)(ecb, DestroyPhase::Block);
            } else {
                dealloc_control_block(block);
            }
        }
    }
}

impl<T: IInterface + ?Sized> fmt::Debug for WeakRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRef")
            .field("strong", &self.strong_count())
            .finish()
    }
}
