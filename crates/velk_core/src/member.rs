//! Static member descriptors
//!
//! Interface contracts declare their reflectable members (properties,
//! events, functions) as compile-time [`MemberDesc`] tables. A class's
//! metadata is the concatenation of the tables of every interface it
//! implements, in declaration order; [`concat_members`] builds that
//! concatenation in a const context.

use crate::any::ValueType;
use crate::function::BoundFn;
use crate::types::{MemberKind, ReturnValue};
use crate::uid::Uid;

/// Compile-time descriptor of one interface member.
#[derive(Clone, Copy, Debug)]
pub struct MemberDesc {
    pub kind: MemberKind,
    pub name: &'static str,
    /// UID of the declaring interface; `notify` routes by this.
    pub owner_uid: Uid,
    /// Value type of a property member; `Uid::NIL` for events/functions.
    pub type_uid: Uid,
    pub default: MemberDefault,
    /// Dispatch trampoline for a function member, bound to the owning
    /// object when the runtime function is materialized.
    pub thunk: Option<BoundFn>,
}

impl MemberDesc {
    /// Declares a property member with a default value.
    pub const fn property(
        name: &'static str,
        owner_uid: Uid,
        type_uid: Uid,
        default: MemberDefault,
    ) -> MemberDesc {
        MemberDesc {
            kind: MemberKind::Property,
            name,
            owner_uid,
            type_uid,
            default,
            thunk: None,
        }
    }

    /// Declares an event member.
    pub const fn event(name: &'static str, owner_uid: Uid) -> MemberDesc {
        MemberDesc {
            kind: MemberKind::Event,
            name,
            owner_uid,
            type_uid: Uid::NIL,
            default: MemberDefault::None,
            thunk: None,
        }
    }

    /// Declares a function member dispatched through `thunk`.
    pub const fn function(name: &'static str, owner_uid: Uid, thunk: BoundFn) -> MemberDesc {
        MemberDesc {
            kind: MemberKind::Function,
            name,
            owner_uid,
            type_uid: Uid::NIL,
            default: MemberDefault::None,
            thunk: Some(thunk),
        }
    }
}

/// Default value embedded in a property descriptor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MemberDefault {
    None,
    Bool(bool),
    F32(f32),
    F64(f64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Str(&'static str),
}

impl MemberDefault {
    /// UID of the carried value type.
    pub fn type_uid(&self) -> Uid {
        match self {
            MemberDefault::None => Uid::NIL,
            MemberDefault::Bool(_) => bool::UID,
            MemberDefault::F32(_) => f32::UID,
            MemberDefault::F64(_) => f64::UID,
            MemberDefault::I8(_) => i8::UID,
            MemberDefault::I16(_) => i16::UID,
            MemberDefault::I32(_) => i32::UID,
            MemberDefault::I64(_) => i64::UID,
            MemberDefault::U8(_) => u8::UID,
            MemberDefault::U16(_) => u16::UID,
            MemberDefault::U32(_) => u32::UID,
            MemberDefault::U64(_) => u64::UID,
            MemberDefault::Str(_) => String::UID,
        }
    }

    /// The value's byte window, as stored by the matching `Any`.
    pub fn bytes(&self) -> Vec<u8> {
        match self {
            MemberDefault::None => Vec::new(),
            MemberDefault::Bool(v) => vec![*v as u8],
            MemberDefault::F32(v) => v.to_ne_bytes().to_vec(),
            MemberDefault::F64(v) => v.to_ne_bytes().to_vec(),
            MemberDefault::I8(v) => v.to_ne_bytes().to_vec(),
            MemberDefault::I16(v) => v.to_ne_bytes().to_vec(),
            MemberDefault::I32(v) => v.to_ne_bytes().to_vec(),
            MemberDefault::I64(v) => v.to_ne_bytes().to_vec(),
            MemberDefault::U8(v) => v.to_ne_bytes().to_vec(),
            MemberDefault::U16(v) => v.to_ne_bytes().to_vec(),
            MemberDefault::U32(v) => v.to_ne_bytes().to_vec(),
            MemberDefault::U64(v) => v.to_ne_bytes().to_vec(),
            MemberDefault::Str(s) => s.as_bytes().to_vec(),
        }
    }

    /// Writes the default into an `Any` of the matching type.
    pub fn write_to(&self, any: &dyn crate::any::IAny) -> ReturnValue {
        if matches!(self, MemberDefault::None) {
            return ReturnValue::NothingToDo;
        }
        any.set_data(&self.bytes(), self.type_uid())
    }
}

/// Typed access to a descriptor's default, checked against its declared
/// value type.
pub fn default_value<T: ValueType>(desc: &MemberDesc) -> Option<T> {
    if desc.type_uid != T::UID || desc.default.type_uid() != T::UID {
        return None;
    }
    T::read_bytes(&desc.default.bytes())
}

const MEMBER_PLACEHOLDER: MemberDesc = MemberDesc::event("", Uid::NIL);

/// Concatenates interface member tables into one class table.
///
/// `N` must equal the summed length of `tables`; mismatches abort
/// compilation.
pub const fn concat_members<const N: usize>(tables: &[&[MemberDesc]]) -> [MemberDesc; N] {
    let mut out = [MEMBER_PLACEHOLDER; N];
    let mut at = 0;
    let mut t = 0;
    while t < tables.len() {
        let table = tables[t];
        let mut i = 0;
        while i < table.len() {
            assert!(at < N, "member table length mismatch");
            out[at] = table[i];
            at += 1;
            i += 1;
        }
        t += 1;
    }
    assert!(at == N, "member table length mismatch");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: Uid = crate::uid::uid_of("velk.ITestOwner");

    #[test]
    fn test_default_value_typed() {
        let desc = MemberDesc::property("width", OWNER, f32::UID, MemberDefault::F32(100.0));
        assert_eq!(default_value::<f32>(&desc), Some(100.0));
        assert_eq!(default_value::<i32>(&desc), None);
    }

    #[test]
    fn test_concat_preserves_order() {
        const A: &[MemberDesc] = &[
            MemberDesc::property("width", OWNER, f32::UID, MemberDefault::F32(1.0)),
            MemberDesc::event("on_clicked", OWNER),
        ];
        const B: &[MemberDesc] = &[MemberDesc::property(
            "version",
            OWNER,
            i32::UID,
            MemberDefault::I32(1),
        )];
        const ALL: [MemberDesc; 3] = concat_members::<3>(&[A, B]);

        assert_eq!(ALL[0].name, "width");
        assert_eq!(ALL[1].name, "on_clicked");
        assert_eq!(ALL[2].name, "version");
        assert_eq!(ALL.len(), A.len() + B.len());
    }
}
