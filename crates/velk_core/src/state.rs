//! Typed state access
//!
//! Interfaces may describe their properties with a plain `State` struct
//! held by the implementing object in a [`StateCell`]. The reader gives
//! shared access; the writer is an RAII guard that fires
//! `notify(Property, <interface>, Changed)` on drop, so handlers observe
//! the state only after the write completes.

use std::cell::{Ref as CellRef, RefCell, RefMut};
use std::ops::{Deref, DerefMut};

use crate::function::callback;
use crate::interface::{IInterface, InterfaceExt, InterfaceInfo};
use crate::metadata::{IMetadata, IPropertyState};
use crate::object::IObject;
use crate::scheduler::DeferredTask;
use crate::types::{InvokeType, MemberKind, Notification, ReturnValue};
use crate::uid::Uid;

/// An interface with an associated state struct.
pub trait InterfaceState: InterfaceInfo {
    type State: 'static;
}

/// Holder of an interface's state struct inside an object.
///
/// Exposed to the kernel through `IPropertyState::property_state` as
/// `&dyn Any`.
pub struct StateCell<S: 'static>(RefCell<S>);

impl<S: 'static> StateCell<S> {
    pub fn new(state: S) -> StateCell<S> {
        StateCell(RefCell::new(state))
    }
}

impl<S: Default + 'static> Default for StateCell<S> {
    fn default() -> Self {
        StateCell::new(S::default())
    }
}

/// Shared, null-safe view of an interface's state.
pub struct StateReader<'a, S: 'static>(CellRef<'a, S>);

impl<S> Deref for StateReader<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.0
    }
}

/// Exclusive view of an interface's state; notifies on drop.
pub struct StateWriter<'a, S: 'static> {
    state: Option<RefMut<'a, S>>,
    meta: &'a dyn IMetadata,
    owner_uid: Uid,
}

impl<S> Deref for StateWriter<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.state.as_ref().expect("writer state taken")
    }
}

impl<S> DerefMut for StateWriter<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.state.as_mut().expect("writer state taken")
    }
}

impl<S> Drop for StateWriter<'_, S> {
    fn drop(&mut self) {
        // End the borrow before handlers run; they may read the state.
        self.state.take();
        self.meta
            .notify(MemberKind::Property, self.owner_uid, Notification::Changed);
    }
}

/// The object's `StateCell` for interface `I`, when it holds one.
pub fn property_state<I>(object: &dyn IInterface) -> Option<&StateCell<I::State>>
where
    I: InterfaceState + ?Sized,
{
    object
        .interface::<dyn IPropertyState>()?
        .property_state(I::UID)?
        .downcast_ref()
}

/// Read-only access to interface `I`'s state on `object`.
pub fn read_state<I>(object: &dyn IInterface) -> Option<StateReader<'_, I::State>>
where
    I: InterfaceState + ?Sized,
{
    Some(StateReader(property_state::<I>(object)?.0.borrow()))
}

/// Write access to interface `I`'s state on `object`; the returned guard
/// notifies when dropped.
pub fn write_state<I>(object: &dyn IInterface) -> Option<StateWriter<'_, I::State>>
where
    I: InterfaceState + ?Sized,
{
    let cell = property_state::<I>(object)?;
    let meta = object.interface::<dyn IMetadata>()?;
    Some(StateWriter {
        state: Some(cell.0.borrow_mut()),
        meta,
        owner_uid: I::UID,
    })
}

/// Applies `f` to interface `I`'s state, immediately or on the next
/// `update()` drain.
///
/// The deferred form captures the object weakly and re-resolves the
/// state at drain time; when the object is gone by then, the write is
/// silently skipped.
pub fn write_state_with<I, F>(object: &dyn IInterface, f: F, invoke: InvokeType)
where
    I: InterfaceState + ?Sized,
    F: FnOnce(&mut I::State) + 'static,
{
    match invoke {
        InvokeType::Immediate => {
            if let Some(mut writer) = write_state::<I>(object) {
                f(&mut *writer);
            }
        }
        InvokeType::Deferred => {
            let Some(weak) = object.interface::<dyn IObject>().and_then(|o| o.get_self())
            else {
                return;
            };
            let deferred = RefCell::new(Some(f));
            let task = callback(move |_| {
                let Some(strong) = weak.upgrade() else {
                    return ReturnValue::NothingToDo;
                };
                let Some(f) = deferred.borrow_mut().take() else {
                    return ReturnValue::NothingToDo;
                };
                let result = match write_state::<I>(strong.get()) {
                    Some(mut writer) => {
                        f(&mut *writer);
                        ReturnValue::Success
                    }
                    None => ReturnValue::Fail,
                };
                result
            });
            crate::runtime::instance().queue_deferred_tasks(&[DeferredTask::new(task)]);
        }
    }
}
