//! Object base and class declarations
//!
//! A concrete class is a struct embedding an [`ObjectCore`] and declared
//! with the [`object_class!`] macro, which generates the static interface
//! dispatch table, the concatenated member table and the root trait
//! impls. Factories install the control block and the self-weak handle
//! after construction, so a partially constructed object is never
//! published.

use std::cell::{Cell, RefCell};
use std::ptr::NonNull;

use crate::block::{alloc_control_block, ControlBlock};
use crate::interface::{IInterface, InterfaceExt};
use crate::member::MemberDesc;
use crate::metadata::MetadataContainer;
use crate::ptr::{Ref, WeakRef};
use crate::types::ReturnValue;
use crate::uid::Uid;

crate::interface! {
    /// An addressable object: anything that can hand out additional
    /// handles to itself.
    pub trait IObject: IInterface {
        /// The object's self-weak handle, installed by its factory.
        fn get_self(&self) -> Option<WeakRef<dyn IInterface>>;
    }
}

crate::interface! {
    /// Factory-side interface for installing the self-weak handle.
    pub trait ISharedFromObject: IInterface {
        /// One-shot; later calls return `NothingToDo`.
        fn set_self(&self, weak: WeakRef<dyn IInterface>) -> ReturnValue;
    }
}

/// Per-instance kernel state embedded in every concrete class.
#[derive(Default)]
pub struct ObjectCore {
    block: Cell<Option<NonNull<ControlBlock>>>,
    self_weak: RefCell<Option<WeakRef<dyn IInterface>>>,
    metadata: RefCell<Option<MetadataContainer>>,
}

impl ObjectCore {
    pub fn block(&self) -> Option<NonNull<ControlBlock>> {
        self.block.get()
    }

    /// Binds the control block. Factory-only; called exactly once before
    /// the object is published.
    pub(crate) fn install_block(&self, block: NonNull<ControlBlock>) {
        debug_assert!(self.block.get().is_none());
        self.block.set(Some(block));
    }

    pub fn self_weak(&self) -> Option<WeakRef<dyn IInterface>> {
        self.self_weak.borrow().clone()
    }

    pub fn set_self(&self, weak: WeakRef<dyn IInterface>) -> ReturnValue {
        let mut slot = self.self_weak.borrow_mut();
        if slot.is_some() {
            return ReturnValue::NothingToDo;
        }
        *slot = Some(weak);
        ReturnValue::Success
    }

    pub fn set_metadata(&self, container: MetadataContainer) -> ReturnValue {
        let mut slot = self.metadata.borrow_mut();
        if slot.is_some() {
            return ReturnValue::NothingToDo;
        }
        *slot = Some(container);
        ReturnValue::Success
    }

    pub fn with_metadata<R>(&self, f: impl FnOnce(&MetadataContainer) -> R) -> Option<R> {
        self.metadata.borrow().as_ref().map(f)
    }
}

/// A concrete, factory-constructible class.
pub trait ObjectClass: Sized + 'static {
    const CLASS_NAME: &'static str;
    const CLASS_UID: Uid;

    /// Concatenated member tables of every implemented interface, in
    /// declaration order.
    fn members() -> &'static [MemberDesc] {
        &[]
    }

    fn construct() -> Self;

    fn interface_table() -> &'static [crate::interface::InterfaceEntry];

    fn object_core(&self) -> &ObjectCore;
}

/// Allocates an instance of `C` on the heap with a fresh control block
/// and the self-weak handle installed.
pub fn create_boxed<C: ObjectClass + IInterface>() -> Ref<dyn IInterface> {
    let block = alloc_control_block();
    let raw: *mut C = Box::into_raw(Box::new(C::construct()));
    unsafe {
        let block = NonNull::new_unchecked(block);
        (*raw).object_core().install_block(block);
        block.as_ref().set_object_ptr(raw as *mut ());

        let handle = Ref::adopt(NonNull::new_unchecked(raw as *mut dyn IInterface), block);
        if let Some(shared) = handle.get().interface::<dyn ISharedFromObject>() {
            shared.set_self(handle.downgrade());
        }
        handle
    }
}

/// Declares a concrete class: the `ObjectClass` identity, the interface
/// dispatch table (always including `IObject` and `ISharedFromObject`)
/// and the root trait impls.
///
/// The `metadata` form additionally wires `IMetadata` and
/// `IMetadataContainer` through the object's lazily installed
/// [`MetadataContainer`].
///
/// ```ignore
/// object_class! {
///     pub class Widget {
///         name: "app.Widget",
///         core: core,
///         metadata,
///         implements: [IWidget],
///     }
/// }
/// ```
#[macro_export]
macro_rules! object_class {
    (
        $(#[$meta:meta])*
        pub class $ty:ident {
            name: $name:literal,
            core: $core:ident,
            implements: [$($iface:path),* $(,)?] $(,)?
        }
    ) => {
        $crate::object_class!(@impl $ty, $name, $core,
            [$crate::object::IObject, $crate::object::ISharedFromObject $(, $iface)*]);
    };

    (
        $(#[$meta:meta])*
        pub class $ty:ident {
            name: $name:literal,
            core: $core:ident,
            metadata,
            implements: [$($iface:path),* $(,)?] $(,)?
        }
    ) => {
        $crate::object_class!(@impl $ty, $name, $core,
            [$crate::object::IObject, $crate::object::ISharedFromObject,
             $crate::metadata::IMetadata, $crate::metadata::IMetadataContainer $(, $iface)*]);

        impl $crate::metadata::IMetadata for $ty {
            fn static_metadata(&self) -> &'static [$crate::member::MemberDesc] {
                <$ty as $crate::object::ObjectClass>::members()
            }

            fn get_property(
                &self,
                name: &str,
            ) -> Option<$crate::ptr::Ref<dyn $crate::property::IProperty>> {
                self.$core.with_metadata(|m| m.get_property(name)).flatten()
            }

            fn get_event(
                &self,
                name: &str,
            ) -> Option<$crate::ptr::Ref<dyn $crate::function::IEvent>> {
                self.$core.with_metadata(|m| m.get_event(name)).flatten()
            }

            fn get_function(
                &self,
                name: &str,
            ) -> Option<$crate::ptr::Ref<dyn $crate::function::IFunction>> {
                self.$core.with_metadata(|m| m.get_function(name)).flatten()
            }

            fn notify(
                &self,
                kind: $crate::types::MemberKind,
                uid: $crate::uid::Uid,
                notification: $crate::types::Notification,
            ) {
                self.$core.with_metadata(|m| m.notify(kind, uid, notification));
            }

            fn observe(
                &self,
                kind: $crate::types::MemberKind,
                uid: $crate::uid::Uid,
                handler: &$crate::ptr::Ref<dyn $crate::function::IFunction>,
            ) -> $crate::types::ReturnValue {
                self.$core
                    .with_metadata(|m| m.observe(kind, uid, handler))
                    .unwrap_or($crate::types::ReturnValue::Fail)
            }
        }

        impl $crate::metadata::IMetadataContainer for $ty {
            fn set_metadata_container(
                &self,
                container: $crate::metadata::MetadataContainer,
            ) -> $crate::types::ReturnValue {
                self.$core.set_metadata(container)
            }
        }
    };

    (@impl $ty:ident, $name:literal, $core:ident, [$($iface:path),+]) => {
        impl $crate::object::ObjectClass for $ty {
            const CLASS_NAME: &'static str = $name;
            const CLASS_UID: $crate::uid::Uid = $crate::uid::uid_of($name);

            fn members() -> &'static [$crate::member::MemberDesc] {
                const LEN: usize =
                    0 $(+ <dyn $iface as $crate::interface::InterfaceInfo>::MEMBERS.len())+;
                static MEMBERS: [$crate::member::MemberDesc; LEN] =
                    $crate::member::concat_members::<LEN>(&[
                        $(<dyn $iface as $crate::interface::InterfaceInfo>::MEMBERS),+
                    ]);
                &MEMBERS
            }

            fn construct() -> Self {
                <$ty as ::core::default::Default>::default()
            }

            fn interface_table() -> &'static [$crate::interface::InterfaceEntry] {
                static TABLE: &[$crate::interface::InterfaceEntry] = &[
                    $(
                        $crate::interface::InterfaceEntry {
                            uid: <dyn $iface as $crate::interface::InterfaceInfo>::UID,
                            name: <dyn $iface as $crate::interface::InterfaceInfo>::NAME,
                            caster: {
                                fn cast(any: &dyn ::std::any::Any) -> &dyn $iface {
                                    match any.downcast_ref::<$ty>() {
                                        Some(object) => object,
                                        None => unreachable!(),
                                    }
                                }
                                static CASTER: $crate::interface::Caster<dyn $iface> =
                                    $crate::interface::Caster { cast_ref: cast };
                                &CASTER
                            },
                        },
                    )+
                ];
                TABLE
            }

            fn object_core(&self) -> &$crate::object::ObjectCore {
                &self.$core
            }
        }

        impl $crate::interface::IInterface for $ty {
            fn get_interface(
                &self,
                uid: $crate::uid::Uid,
            ) -> Option<&dyn $crate::interface::IInterface> {
                $crate::interface::query_table(self, uid)
            }

            fn interface_table(&self) -> &'static [$crate::interface::InterfaceEntry] {
                <$ty as $crate::object::ObjectClass>::interface_table()
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn control_block(
                &self,
            ) -> Option<::std::ptr::NonNull<$crate::block::ControlBlock>> {
                self.$core.block()
            }
        }

        impl $crate::object::IObject for $ty {
            fn get_self(
                &self,
            ) -> Option<$crate::ptr::WeakRef<dyn $crate::interface::IInterface>> {
                self.$core.self_weak()
            }
        }

        impl $crate::object::ISharedFromObject for $ty {
            fn set_self(
                &self,
                weak: $crate::ptr::WeakRef<dyn $crate::interface::IInterface>,
            ) -> $crate::types::ReturnValue {
                self.$core.set_self(weak)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{same_object, InterfaceInfo};
    use std::cell::Cell;

    crate::interface! {
        pub trait ICounter: IInterface {
            fn value(&self) -> i32;
        }
    }

    thread_local! {
        static ALIVE: Cell<i32> = const { Cell::new(0) };
    }

    pub struct Counter {
        core: ObjectCore,
        value: Cell<i32>,
    }

    impl Default for Counter {
        fn default() -> Self {
            ALIVE.with(|alive| alive.set(alive.get() + 1));
            Counter {
                core: ObjectCore::default(),
                value: Cell::new(7),
            }
        }
    }

    impl Drop for Counter {
        fn drop(&mut self) {
            ALIVE.with(|alive| alive.set(alive.get() - 1));
        }
    }

    crate::object_class! {
        pub class Counter {
            name: "velk.test.Counter",
            core: core,
            implements: [ICounter],
        }
    }

    impl ICounter for Counter {
        fn value(&self) -> i32 {
            self.value.get()
        }
    }

    fn alive() -> i32 {
        ALIVE.with(|alive| alive.get())
    }

    #[test]
    fn test_refcount_balance() {
        let before = alive();
        let object = create_boxed::<Counter>();
        assert_eq!(alive(), before + 1);

        let second = object.clone();
        let third = second.cast::<dyn ICounter>().unwrap();
        drop(object);
        drop(second);
        assert_eq!(alive(), before + 1);
        drop(third);
        assert_eq!(alive(), before);
    }

    #[test]
    fn test_weak_upgrade_lifecycle() {
        let object = create_boxed::<Counter>();
        let weak = object.downgrade();

        let upgraded = weak.upgrade().expect("object still alive");
        assert!(upgraded.ptr_eq(&object));
        drop(upgraded);

        drop(object);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_interface_query_reflexivity() {
        let object = create_boxed::<Counter>();

        let counter = object.get().interface::<dyn ICounter>().expect("implements ICounter");
        assert_eq!(counter.value(), 7);

        // Navigating back to the root lands on the same object.
        let root = counter
            .get_interface(<dyn IInterface as InterfaceInfo>::UID)
            .expect("root always resolves");
        assert!(same_object(root, object.get()));

        // Unknown UIDs miss.
        assert!(object
            .get()
            .get_interface(crate::uid::uid_of("velk.test.NotImplemented"))
            .is_none());
    }

    #[test]
    fn test_get_self_hands_out_live_handles() {
        let object = create_boxed::<Counter>();
        let this = object.get().interface::<dyn IObject>().unwrap();

        let weak = this.get_self().expect("factory installed the self-weak");
        let strong = weak.upgrade().expect("object alive");
        assert!(strong.ptr_eq(&object));
    }

    #[test]
    fn test_set_self_is_one_shot() {
        let object = create_boxed::<Counter>();
        let shared = object.get().interface::<dyn ISharedFromObject>().unwrap();
        // The factory already installed the self-weak.
        assert_eq!(
            shared.set_self(object.downgrade()),
            crate::types::ReturnValue::NothingToDo
        );
    }
}
