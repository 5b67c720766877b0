//! Velk Object Kernel
//!
//! This crate provides the foundational primitives of the Velk component
//! object runtime:
//!
//! - **Interfaces & UIDs**: contract traits addressed by compile-time
//!   128-bit identifiers, with per-class dispatch tables for navigation
//! - **Intrusive Refcounting**: strong/weak handles over pooled control
//!   blocks, with an external-block path for slab allocators
//! - **Reflectable Metadata**: static member tables mirrored per-object
//!   into lazily materialized runtime properties, events and functions
//! - **Reactive Primitives**: type-erased values, properties with change
//!   events and deferred coalescing, partitioned handler lists
//! - **Deferred Scheduler**: a cooperative FIFO queue drained by
//!   `update()`
//!
//! # Example
//!
//! ```rust
//! use velk_core::{any_get, instance, new_any, IProperty, InvokeType, ValueType};
//!
//! let velk = instance();
//!
//! // Create a reactive property backed by an i32 Any.
//! let property = velk
//!     .create_property(<i32 as ValueType>::UID, Some(new_any(5i32)))
//!     .expect("i32 is a built-in value type");
//!
//! let ten = new_any(10i32);
//! property.set_value(ten.get(), InvokeType::Immediate);
//! assert_eq!(any_get::<i32>(property.get_value().unwrap().get()), Some(10));
//! ```

pub mod any;
pub mod block;
pub mod error;
pub mod factory;
pub mod function;
pub mod interface;
pub mod member;
pub mod metadata;
pub mod object;
pub mod property;
pub mod ptr;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod state;
pub mod types;
pub mod uid;

pub use any::{any_equal, any_get, any_set, new_any, IAny, SimpleAny, ValueType};
pub use block::{
    alloc_control_block, dealloc_control_block, ControlBlock, DestroyFn, DestroyPhase,
    ExternalControlBlock,
};
pub use error::{Result, VelkError};
pub use factory::{ClassFactory, ClassInfo, IObjectFactory};
pub use function::{
    callback, BoundFn, CallableFn, EventObject, FnArgs, FunctionObject, IEvent, IFunction,
    IFunctionInternal,
};
pub use interface::{
    add_ref, release, same_object, Caster, IInterface, InterfaceEntry, InterfaceExt,
    InterfaceInfo,
};
pub use member::{concat_members, default_value, MemberDefault, MemberDesc};
pub use metadata::{IMetadata, IMetadataContainer, IPropertyState, MetadataContainer};
pub use object::{create_boxed, IObject, ISharedFromObject, ObjectClass, ObjectCore};
pub use property::{IProperty, IPropertyInternal, PropertyObject};
pub use ptr::{Ref, WeakRef};
pub use registry::TypeRegistry;
pub use runtime::{instance, IVelk, Velk};
pub use scheduler::DeferredTask;
pub use state::{
    property_state, read_state, write_state, write_state_with, InterfaceState, StateCell,
    StateReader, StateWriter,
};
pub use types::{succeeded, InvokeType, MemberKind, Notification, ObjectFlags, ReturnValue};
pub use uid::{uid_of, Uid};
