//! Object factories
//!
//! A factory publishes a class's identity and constructs instances:
//! heap-allocated with a fresh control block, or placement-constructed
//! into a caller-supplied slot with an adopted external block (the slab
//! path). Construction ordering is fixed: bind the block, construct,
//! install the self-weak handle, publish.

use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::block::{ControlBlock, ExternalControlBlock};
use crate::interface::{IInterface, InterfaceExt};
use crate::member::MemberDesc;
use crate::object::{create_boxed, ISharedFromObject, ObjectClass};
use crate::ptr::{Ref, WeakRef};
use crate::types::ObjectFlags;
use crate::uid::Uid;

/// Static identity of a registered class.
#[derive(Clone, Copy, Debug)]
pub struct ClassInfo {
    pub uid: Uid,
    pub name: &'static str,
    pub members: &'static [MemberDesc],
}

/// Constructs instances of one class.
pub trait IObjectFactory: 'static {
    fn class_info(&self) -> ClassInfo;

    fn instance_size(&self) -> usize;

    fn instance_alignment(&self) -> usize;

    /// Allocates an instance with a fresh control block and the
    /// self-weak handle installed.
    fn create_instance(&self) -> Option<Ref<dyn IInterface>>;

    /// Constructs an instance into `slot`, adopting the supplied
    /// external control block instead of allocating one.
    ///
    /// # Safety
    /// `slot` must be valid, writable, suitably aligned memory of at
    /// least `instance_size()` bytes; `block` must be live with
    /// `strong = 1, weak = 1`. The caller owns reclamation through the
    /// block's destroy callback.
    unsafe fn construct_in_place(
        &self,
        slot: *mut u8,
        block: *mut ExternalControlBlock,
        flags: ObjectFlags,
    ) -> Option<NonNull<dyn IInterface>>;

    /// Runs the destructor of an instance previously constructed into
    /// `slot`, without releasing the slot memory.
    ///
    /// # Safety
    /// `slot` must hold a live instance created by this factory's
    /// `construct_in_place`.
    unsafe fn destroy_in_place(&self, slot: *mut u8);
}

/// The factory of a declared [`ObjectClass`].
pub struct ClassFactory<C: ObjectClass> {
    _marker: PhantomData<fn() -> C>,
}

impl<C: ObjectClass> Default for ClassFactory<C> {
    fn default() -> Self {
        ClassFactory {
            _marker: PhantomData,
        }
    }
}

impl<C: ObjectClass + IInterface> IObjectFactory for ClassFactory<C> {
    fn class_info(&self) -> ClassInfo {
        ClassInfo {
            uid: C::CLASS_UID,
            name: C::CLASS_NAME,
            members: C::members(),
        }
    }

    fn instance_size(&self) -> usize {
        std::mem::size_of::<C>()
    }

    fn instance_alignment(&self) -> usize {
        std::mem::align_of::<C>()
    }

    fn create_instance(&self) -> Option<Ref<dyn IInterface>> {
        Some(create_boxed::<C>())
    }

    unsafe fn construct_in_place(
        &self,
        slot: *mut u8,
        block: *mut ExternalControlBlock,
        _flags: ObjectFlags,
    ) -> Option<NonNull<dyn IInterface>> {
        let object = slot as *mut C;
        object.write(C::construct());

        // The leading field of an external block is the plain block.
        let plain = NonNull::new(block as *mut ControlBlock)?;
        (*object).object_core().install_block(plain);
        plain.as_ref().set_object_ptr(object as *mut ());

        let iface = NonNull::new_unchecked(object as *mut dyn IInterface);
        plain.as_ref().add_weak();
        let weak = WeakRef::adopt(iface, plain);
        if let Some(shared) = iface.as_ref().interface::<dyn ISharedFromObject>() {
            shared.set_self(weak);
        }
        Some(iface)
    }

    unsafe fn destroy_in_place(&self, slot: *mut u8) {
        std::ptr::drop_in_place(slot as *mut C);
    }
}
