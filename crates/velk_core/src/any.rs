//! Type-erased value containers
//!
//! An `Any` stores one typed value behind the [`IAny`] interface and
//! refuses every operation whose requested UID is not in its compatible
//! set. Byte-moving operations are size-checked and side-effect free on
//! failure; setting a byte-equal value reports `NothingToDo` so property
//! change detection can short-circuit.

use std::any::TypeId;
use std::cell::RefCell;

use smallvec::{smallvec, SmallVec};

use crate::interface;
use crate::interface::{IInterface, InterfaceEntry};
use crate::object::{create_boxed, IObject, ISharedFromObject, ObjectClass, ObjectCore};
use crate::ptr::Ref;
use crate::types::ReturnValue;
use crate::uid::{uid_of, Uid};

crate::interface! {
    /// Type-erased value container with runtime type checking.
    pub trait IAny: IInterface {
        /// Primary type UID of the stored value.
        fn type_uid(&self) -> Uid;

        /// All type UIDs this container accepts.
        fn compatible_types(&self) -> SmallVec<[Uid; 2]>;

        /// Byte-window size of the stored value for `uid`, or 0 when the
        /// type is not compatible.
        fn data_size(&self, uid: Uid) -> usize;

        /// Copies the stored bytes into `dst`, which must be exactly
        /// `data_size(uid)` long.
        fn get_data(&self, dst: &mut [u8], uid: Uid) -> ReturnValue;

        /// Replaces the stored value from `src`. `NothingToDo` when the
        /// new bytes equal the current ones.
        fn set_data(&self, src: &[u8], uid: Uid) -> ReturnValue;

        /// Replaces the stored value from a compatible `Any`.
        fn copy_from(&self, other: &dyn IAny) -> ReturnValue;

        /// Allocates an independent copy of this value through the
        /// registry.
        fn clone_any(&self) -> Option<Ref<dyn IAny>>;
    }
}

/// A value type storable in a [`SimpleAny`], with a defined byte window.
pub trait ValueType: Clone + Default + 'static {
    const NAME: &'static str;
    const UID: Uid;

    /// Current size of the byte window.
    fn data_size(&self) -> usize;

    /// Whether `len` is an acceptable incoming window size.
    fn validate_size(len: usize) -> bool;

    fn write_bytes(&self, dst: &mut [u8]);

    fn read_bytes(src: &[u8]) -> Option<Self>;
}

macro_rules! primitive_value_type {
    ($($ty:ty => $name:literal),+ $(,)?) => {$(
        impl ValueType for $ty {
            const NAME: &'static str = $name;
            const UID: Uid = uid_of($name);

            fn data_size(&self) -> usize {
                std::mem::size_of::<$ty>()
            }

            fn validate_size(len: usize) -> bool {
                len == std::mem::size_of::<$ty>()
            }

            fn write_bytes(&self, dst: &mut [u8]) {
                dst.copy_from_slice(&self.to_ne_bytes());
            }

            fn read_bytes(src: &[u8]) -> Option<Self> {
                Some(<$ty>::from_ne_bytes(src.try_into().ok()?))
            }
        }
    )+};
}

primitive_value_type! {
    i8 => "i8", i16 => "i16", i32 => "i32", i64 => "i64",
    u8 => "u8", u16 => "u16", u32 => "u32", u64 => "u64",
    f32 => "f32", f64 => "f64",
}

impl ValueType for bool {
    const NAME: &'static str = "bool";
    const UID: Uid = uid_of("bool");

    fn data_size(&self) -> usize {
        1
    }

    fn validate_size(len: usize) -> bool {
        len == 1
    }

    fn write_bytes(&self, dst: &mut [u8]) {
        dst[0] = *self as u8;
    }

    fn read_bytes(src: &[u8]) -> Option<Self> {
        match src {
            [0] => Some(false),
            [1] => Some(true),
            _ => None,
        }
    }
}

impl ValueType for String {
    const NAME: &'static str = "string";
    const UID: Uid = uid_of("string");

    /// The byte window of a string is its live UTF-8 contents.
    fn data_size(&self) -> usize {
        self.len()
    }

    fn validate_size(_len: usize) -> bool {
        true
    }

    fn write_bytes(&self, dst: &mut [u8]) {
        dst.copy_from_slice(self.as_bytes());
    }

    fn read_bytes(src: &[u8]) -> Option<Self> {
        std::str::from_utf8(src).ok().map(str::to_owned)
    }
}

/// Basic `Any` holding a single value of one type in local storage.
pub struct SimpleAny<T: ValueType> {
    core: ObjectCore,
    data: RefCell<T>,
}

impl<T: ValueType> SimpleAny<T> {
    fn current_bytes(&self) -> Vec<u8> {
        let data = self.data.borrow();
        let mut bytes = vec![0u8; data.data_size()];
        data.write_bytes(&mut bytes);
        bytes
    }
}

impl<T: ValueType> ObjectClass for SimpleAny<T> {
    const CLASS_NAME: &'static str = T::NAME;
    const CLASS_UID: Uid = T::UID;

    fn construct() -> Self {
        SimpleAny {
            core: ObjectCore::default(),
            data: RefCell::new(T::default()),
        }
    }

    fn interface_table() -> &'static [InterfaceEntry] {
        fn cast_any<T: ValueType>(any: &dyn std::any::Any) -> &dyn IAny {
            any.downcast_ref::<SimpleAny<T>>().expect("caster invariant")
        }
        fn cast_object<T: ValueType>(any: &dyn std::any::Any) -> &dyn IObject {
            any.downcast_ref::<SimpleAny<T>>().expect("caster invariant")
        }
        fn cast_shared<T: ValueType>(any: &dyn std::any::Any) -> &dyn ISharedFromObject {
            any.downcast_ref::<SimpleAny<T>>().expect("caster invariant")
        }
        fn build<T: ValueType>() -> Vec<InterfaceEntry> {
            vec![
                interface::entry::<dyn IAny>(Box::leak(Box::new(interface::Caster {
                    cast_ref: cast_any::<T>,
                }))),
                interface::entry::<dyn IObject>(Box::leak(Box::new(interface::Caster {
                    cast_ref: cast_object::<T>,
                }))),
                interface::entry::<dyn ISharedFromObject>(Box::leak(Box::new(
                    interface::Caster {
                        cast_ref: cast_shared::<T>,
                    },
                ))),
            ]
        }
        interface::leaked_interface_table(TypeId::of::<SimpleAny<T>>(), build::<T>)
    }

    fn object_core(&self) -> &ObjectCore {
        &self.core
    }
}

impl<T: ValueType> IInterface for SimpleAny<T> {
    fn get_interface(&self, uid: Uid) -> Option<&dyn IInterface> {
        interface::query_table(self, uid)
    }

    fn interface_table(&self) -> &'static [InterfaceEntry] {
        <Self as ObjectClass>::interface_table()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn control_block(&self) -> Option<std::ptr::NonNull<crate::block::ControlBlock>> {
        self.core.block()
    }
}

impl<T: ValueType> IObject for SimpleAny<T> {
    fn get_self(&self) -> Option<crate::ptr::WeakRef<dyn IInterface>> {
        self.core.self_weak()
    }
}

impl<T: ValueType> ISharedFromObject for SimpleAny<T> {
    fn set_self(&self, weak: crate::ptr::WeakRef<dyn IInterface>) -> ReturnValue {
        self.core.set_self(weak)
    }
}

impl<T: ValueType> IAny for SimpleAny<T> {
    fn type_uid(&self) -> Uid {
        T::UID
    }

    fn compatible_types(&self) -> SmallVec<[Uid; 2]> {
        smallvec![T::UID]
    }

    fn data_size(&self, uid: Uid) -> usize {
        if uid == T::UID {
            self.data.borrow().data_size()
        } else {
            0
        }
    }

    fn get_data(&self, dst: &mut [u8], uid: Uid) -> ReturnValue {
        if uid != T::UID {
            return ReturnValue::Fail;
        }
        let data = self.data.borrow();
        if dst.len() != data.data_size() {
            return ReturnValue::Fail;
        }
        data.write_bytes(dst);
        ReturnValue::Success
    }

    fn set_data(&self, src: &[u8], uid: Uid) -> ReturnValue {
        if uid != T::UID || !T::validate_size(src.len()) {
            return ReturnValue::Fail;
        }
        let Some(value) = T::read_bytes(src) else {
            return ReturnValue::Fail;
        };
        if self.current_bytes() == src {
            return ReturnValue::NothingToDo;
        }
        *self.data.borrow_mut() = value;
        ReturnValue::Success
    }

    fn copy_from(&self, other: &dyn IAny) -> ReturnValue {
        let size = other.data_size(T::UID);
        if size == 0 && other.type_uid() != T::UID {
            return ReturnValue::Fail;
        }
        let mut bytes = vec![0u8; size];
        if other.get_data(&mut bytes, T::UID) != ReturnValue::Success {
            return ReturnValue::Fail;
        }
        self.set_data(&bytes, T::UID)
    }

    fn clone_any(&self) -> Option<Ref<dyn IAny>> {
        let clone = crate::runtime::instance().create_any(T::UID)?;
        match clone.copy_from(self) {
            ReturnValue::Success | ReturnValue::NothingToDo => Some(clone),
            _ => None,
        }
    }
}

/// Creates a standalone `Any` holding `value`, outside the registry.
pub fn new_any<T: ValueType>(value: T) -> Ref<dyn IAny> {
    let object = create_boxed::<SimpleAny<T>>();
    let any = object.cast::<dyn IAny>().expect("SimpleAny exposes IAny");
    let mut bytes = vec![0u8; value.data_size()];
    value.write_bytes(&mut bytes);
    any.set_data(&bytes, T::UID);
    any
}

/// Reads the typed value out of an `Any`, when the types agree.
pub fn any_get<T: ValueType>(any: &dyn IAny) -> Option<T> {
    let size = any.data_size(T::UID);
    if size == 0 && any.type_uid() != T::UID {
        return None;
    }
    let mut bytes = vec![0u8; size];
    if any.get_data(&mut bytes, T::UID) != ReturnValue::Success {
        return None;
    }
    T::read_bytes(&bytes)
}

/// Writes a typed value into an `Any`.
pub fn any_set<T: ValueType>(any: &dyn IAny, value: &T) -> ReturnValue {
    let mut bytes = vec![0u8; value.data_size()];
    value.write_bytes(&mut bytes);
    any.set_data(&bytes, T::UID)
}

/// Value equality between two `Any`s: identical primary type and
/// byte-equal payload.
pub fn any_equal(a: &dyn IAny, b: &dyn IAny) -> bool {
    let uid = a.type_uid();
    if uid != b.type_uid() {
        return false;
    }
    let size = a.data_size(uid);
    if size != b.data_size(uid) {
        return false;
    }
    let mut left = vec![0u8; size];
    let mut right = vec![0u8; size];
    a.get_data(&mut left, uid) == ReturnValue::Success
        && b.get_data(&mut right, uid) == ReturnValue::Success
        && left == right
}
