//! Interface root and UID-based navigation
//!
//! An interface is a contract trait identified by a compile-time UID.
//! Concrete classes advertise the interfaces they implement through a
//! static dispatch table of `(UID, caster)` entries; navigation between
//! the interfaces of one object is a scan of that table followed by a
//! checked downcast-and-unsize through the caster record.
//!
//! Interfaces are declared with the [`interface!`] macro, which emits the
//! trait itself plus its [`InterfaceInfo`] identity.

use std::any::Any;
use std::ptr::NonNull;

use crate::block::{ControlBlock, DestroyPhase};
use crate::member::MemberDesc;
use crate::uid::Uid;

/// Root capability of every kernel object: UID-based interface queries
/// and access to the intrusive control block.
///
/// Non-copyable and non-movable by construction; the capability is only
/// ever carried by references and [`Ref`](crate::ptr::Ref) handles.
pub trait IInterface: 'static {
    /// Untyped interface query. `Uid::NIL` always resolves to the root.
    fn get_interface(&self, uid: Uid) -> Option<&dyn IInterface>;

    /// The class's static interface dispatch table.
    fn interface_table(&self) -> &'static [InterfaceEntry];

    /// The object as `Any`, for caster downcasts.
    fn as_any(&self) -> &dyn Any;

    /// The object's control block, once installed by its factory.
    fn control_block(&self) -> Option<NonNull<ControlBlock>>;
}

/// Compile-time identity of an interface, implemented for each
/// `dyn ITrait` by the [`interface!`] macro.
pub trait InterfaceInfo: 'static {
    const UID: Uid;
    const NAME: &'static str;
    /// Members (properties, events, functions) declared by the contract.
    const MEMBERS: &'static [MemberDesc] = &[];
}

impl InterfaceInfo for dyn IInterface {
    const UID: Uid = Uid::NIL;
    const NAME: &'static str = "IInterface";
}

/// One row of a class's interface dispatch table.
pub struct InterfaceEntry {
    pub uid: Uid,
    pub name: &'static str,
    /// Type-erased [`Caster`] for this entry's interface.
    pub caster: &'static (dyn Any + Send + Sync),
}

/// Recovers a typed interface view from the object's `Any` form.
pub struct Caster<I: ?Sized + 'static> {
    pub cast_ref: fn(&dyn Any) -> &I,
}

/// Builds a table row for interface `I` from its caster record.
pub fn entry<I: InterfaceInfo + ?Sized + 'static>(caster: &'static Caster<I>) -> InterfaceEntry {
    InterfaceEntry {
        uid: I::UID,
        name: I::NAME,
        caster,
    }
}

/// Table scan shared by hand-written `IInterface::get_interface` impls.
pub fn query_table<C: IInterface>(object: &C, uid: Uid) -> Option<&dyn IInterface> {
    if uid == Uid::NIL {
        return Some(object as &dyn IInterface);
    }
    object
        .interface_table()
        .iter()
        .any(|entry| entry.uid == uid)
        .then_some(object as &dyn IInterface)
}

/// Builds and leaks an interface table once per class.
///
/// Generic classes cannot hold their table in a `static`; this keyed
/// store gives them the same one-build lifetime.
pub fn leaked_interface_table(
    key: std::any::TypeId,
    build: fn() -> Vec<InterfaceEntry>,
) -> &'static [InterfaceEntry] {
    use rustc_hash::FxHashMap;
    use std::sync::{Mutex, OnceLock};

    static TABLES: OnceLock<Mutex<FxHashMap<std::any::TypeId, &'static [InterfaceEntry]>>> =
        OnceLock::new();

    let tables = TABLES.get_or_init(Default::default);
    let mut tables = tables.lock().expect("interface table store poisoned");
    *tables.entry(key).or_insert_with(|| build().leak())
}

/// Typed interface navigation, available on anything that exposes
/// [`IInterface`].
pub trait InterfaceExt: IInterface {
    /// Returns this object viewed through interface `I`, or `None` when
    /// the class does not implement it.
    fn interface<I>(&self) -> Option<&I>
    where
        I: InterfaceInfo + ?Sized + 'static,
    {
        let entry = self
            .interface_table()
            .iter()
            .find(|entry| entry.uid == I::UID)?;
        let caster = entry.caster.downcast_ref::<Caster<I>>()?;
        Some((caster.cast_ref)(self.as_any()))
    }
}

impl<T: IInterface + ?Sized> InterfaceExt for T {}

/// Whether two interface references view the same object.
pub fn same_object(a: &dyn IInterface, b: &dyn IInterface) -> bool {
    std::ptr::addr_eq(a as *const dyn IInterface, b as *const dyn IInterface)
}

/// Adds one strong reference to the object's count.
pub fn add_ref(object: &dyn IInterface) {
    if let Some(block) = object.control_block() {
        unsafe { block.as_ref() }.add_strong();
    }
}

/// Releases one strong reference, destroying the object when it was the
/// last one.
///
/// # Safety
/// The caller must own a strong reference that is not otherwise tracked
/// (e.g. taken earlier with [`add_ref`]), and must not touch the object
/// through `object` afterwards.
pub unsafe fn release(object: &dyn IInterface) {
    let Some(block) = object.control_block() else {
        return;
    };
    let block = block.as_ptr();
    if (*block).release_strong() {
        if let Some(ecb) = (*block).external() {
            ((*ecb).destroy)(ecb, DestroyPhase::Object);
        } else {
            let object = object as *const dyn IInterface as *mut dyn IInterface;
            drop(Box::from_raw(object));
            if (*block).release_weak() {
                crate::block::dealloc_control_block(block);
            }
        }
    }
}

/// Declares an interface: the contract trait plus its [`InterfaceInfo`]
/// identity (UID derived from the trait name) and optional member table.
///
/// ```ignore
/// interface! {
///     /// A reactive slot with change notification.
///     pub trait IProperty: IInterface {
///         fn get_value(&self) -> Option<Ref<dyn IAny>>;
///     }
/// }
/// ```
#[macro_export]
macro_rules! interface {
    (
        $(#[$meta:meta])*
        pub trait $name:ident: $super:path { $($body:tt)* }
        $(members = $members:expr;)?
    ) => {
        $(#[$meta])*
        pub trait $name: $super { $($body)* }

        impl $crate::interface::InterfaceInfo for dyn $name {
            const UID: $crate::uid::Uid =
                $crate::uid::uid_of(concat!("velk.", stringify!($name)));
            const NAME: &'static str = stringify!($name);
            $(const MEMBERS: &'static [$crate::member::MemberDesc] = $members;)?
        }
    };
}
