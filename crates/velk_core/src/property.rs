//! Reactive property objects
//!
//! A property pairs a backing `Any` with an on-changed event. Writes
//! fire the event only when the stored bytes actually change; deferred
//! writes coalesce into a single pending value committed by the next
//! `update()` drain, with at most one queued commit task per property
//! per drain. The commit task captures the property weakly, so a
//! property dropped before the drain is a silent no-op.

use std::cell::{Cell, RefCell};

use crate::any::{any_equal, IAny};
use crate::function::{callback, EventObject, IEvent};
use crate::interface::{IInterface, InterfaceExt};
use crate::object::{create_boxed, ObjectCore};
use crate::ptr::Ref;
use crate::scheduler::DeferredTask;
use crate::types::{InvokeType, ReturnValue};

crate::interface! {
    /// A reactive slot with change notification.
    pub trait IProperty: IInterface {
        /// Writes a value. `ReadOnly` on a read-only property,
        /// `InvalidArgument` on a type mismatch, `NothingToDo` when the
        /// value is byte-equal to the current one and no differing
        /// deferred value is pending.
        fn set_value(&self, value: &dyn IAny, invoke: InvokeType) -> ReturnValue;

        /// The committed backing value; never the pending one.
        fn get_value(&self) -> Option<Ref<dyn IAny>>;

        /// The change event, materialized on first access.
        fn on_changed(&self) -> Ref<dyn IEvent>;
    }
}

crate::interface! {
    /// Initialization interface for a property's backing storage.
    pub trait IPropertyInternal: IInterface {
        /// Seats the backing `Any`. One-shot; a second call fails.
        /// Writes through the seated `Any` directly do not fire
        /// `on_changed`.
        fn set_any(&self, any: Ref<dyn IAny>) -> ReturnValue;

        fn get_any(&self) -> Option<Ref<dyn IAny>>;

        fn set_read_only(&self, read_only: bool);
    }
}

/// Runtime property instance.
#[derive(Default)]
pub struct PropertyObject {
    core: ObjectCore,
    data: RefCell<Option<Ref<dyn IAny>>>,
    on_changed: RefCell<Option<Ref<dyn IEvent>>>,
    pending: RefCell<Option<Ref<dyn IAny>>>,
    pending_queued: Cell<bool>,
    read_only: Cell<bool>,
}

crate::object_class! {
    pub class PropertyObject {
        name: "velk.Property",
        core: core,
        implements: [
            crate::property::IProperty,
            crate::property::IPropertyInternal,
        ],
    }
}

impl PropertyObject {
    fn backing(&self) -> Option<Ref<dyn IAny>> {
        self.data.borrow().clone()
    }

    /// Whether a pending value exists that differs from the backing.
    fn pending_differs(&self, backing: &dyn IAny) -> bool {
        match &*self.pending.borrow() {
            Some(pending) => !any_equal(pending.get(), backing),
            None => false,
        }
    }

    fn fire_on_changed(&self, committed: &dyn IAny) {
        let event = self.on_changed.borrow().clone();
        if let Some(event) = event {
            event.invoke(&[committed], InvokeType::Immediate);
        }
    }

    fn set_immediate(&self, backing: &Ref<dyn IAny>, value: &dyn IAny) -> ReturnValue {
        if any_equal(value, backing.get()) {
            if self.pending_differs(backing.get()) {
                // The incoming write supersedes the pending one.
                self.pending.borrow_mut().take();
                return ReturnValue::Success;
            }
            return ReturnValue::NothingToDo;
        }
        if backing.copy_from(value) != ReturnValue::Success {
            return ReturnValue::Fail;
        }
        self.pending.borrow_mut().take();
        self.fire_on_changed(backing.get());
        ReturnValue::Success
    }

    fn set_deferred(&self, backing: &Ref<dyn IAny>, value: &dyn IAny) -> ReturnValue {
        if any_equal(value, backing.get()) && !self.pending_differs(backing.get()) {
            return ReturnValue::NothingToDo;
        }

        // Coalesce: one pending slot, overwritten by each deferred set.
        {
            let mut pending = self.pending.borrow_mut();
            match &*pending {
                Some(existing) => {
                    if existing.copy_from(value) == ReturnValue::Fail {
                        return ReturnValue::Fail;
                    }
                }
                None => match value.clone_any() {
                    Some(clone) => *pending = Some(clone),
                    None => return ReturnValue::Fail,
                },
            }
        }

        if !self.pending_queued.get() {
            let Some(weak) = self.core.self_weak() else {
                return ReturnValue::Fail;
            };
            let commit = callback(move |_| {
                let Some(strong) = weak.upgrade() else {
                    return ReturnValue::NothingToDo;
                };
                let Some(property) = strong.get().as_any().downcast_ref::<PropertyObject>()
                else {
                    return ReturnValue::Fail;
                };
                property.commit_pending();
                ReturnValue::Success
            });
            crate::runtime::instance().queue_deferred_tasks(&[DeferredTask::new(commit)]);
            self.pending_queued.set(true);
        }
        ReturnValue::Success
    }

    /// Commits the coalesced pending value. The `on_changed` firing is
    /// handed to the drain's notification pass, so handlers observe
    /// every commit of the drain.
    fn commit_pending(&self) {
        self.pending_queued.set(false);
        let Some(pending) = self.pending.borrow_mut().take() else {
            return;
        };
        let Some(backing) = self.backing() else {
            return;
        };
        if any_equal(pending.get(), backing.get()) {
            return;
        }
        if backing.copy_from(pending.get()) != ReturnValue::Success {
            return;
        }
        let event = self.on_changed.borrow().clone();
        if let Some(event) = event {
            if let Some(callable) = event.cast::<dyn crate::function::IFunction>() {
                crate::runtime::instance().queue_post_drain(DeferredTask {
                    callable,
                    args: std::rc::Rc::from(vec![backing]),
                });
            }
        }
    }
}

impl IProperty for PropertyObject {
    fn set_value(&self, value: &dyn IAny, invoke: InvokeType) -> ReturnValue {
        if self.read_only.get() {
            return ReturnValue::ReadOnly;
        }
        let Some(backing) = self.backing() else {
            return ReturnValue::Fail;
        };
        if !backing.compatible_types().contains(&value.type_uid()) {
            return ReturnValue::InvalidArgument;
        }
        match invoke {
            InvokeType::Immediate => self.set_immediate(&backing, value),
            InvokeType::Deferred => self.set_deferred(&backing, value),
        }
    }

    fn get_value(&self) -> Option<Ref<dyn IAny>> {
        self.backing()
    }

    fn on_changed(&self) -> Ref<dyn IEvent> {
        let mut slot = self.on_changed.borrow_mut();
        if let Some(event) = &*slot {
            return event.clone();
        }
        let event = create_boxed::<EventObject>()
            .cast::<dyn IEvent>()
            .expect("EventObject exposes IEvent");
        *slot = Some(event.clone());
        event
    }
}

impl IPropertyInternal for PropertyObject {
    fn set_any(&self, any: Ref<dyn IAny>) -> ReturnValue {
        let mut data = self.data.borrow_mut();
        if data.is_some() {
            return ReturnValue::Fail;
        }
        *data = Some(any);
        ReturnValue::Success
    }

    fn get_any(&self) -> Option<Ref<dyn IAny>> {
        self.backing()
    }

    fn set_read_only(&self, read_only: bool) {
        self.read_only.set(read_only);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::any::{any_get, new_any};
    use crate::function::IFunction;
    use crate::runtime::instance;
    use std::cell::Cell;
    use std::rc::Rc;

    fn int_property(initial: i32) -> Ref<dyn IProperty> {
        instance()
            .create_property(<i32 as crate::any::ValueType>::UID, Some(new_any(initial)))
            .expect("i32 property")
    }

    fn observed(property: &Ref<dyn IProperty>) -> (Rc<Cell<u32>>, Rc<Cell<i32>>) {
        let count = Rc::new(Cell::new(0));
        let last = Rc::new(Cell::new(0));
        let (c, l) = (count.clone(), last.clone());
        let handler = callback(move |args| {
            c.set(c.get() + 1);
            if let Some(value) = args.first().and_then(|any| any_get::<i32>(*any)) {
                l.set(value);
            }
            ReturnValue::Success
        });
        property
            .on_changed()
            .add_handler(&handler, InvokeType::Immediate);
        (count, last)
    }

    #[test]
    fn test_set_same_value_short_circuits() {
        let property = int_property(5);
        let (count, _) = observed(&property);

        let five = new_any(5i32);
        assert_eq!(
            property.set_value(five.get(), InvokeType::Immediate),
            ReturnValue::NothingToDo
        );
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_set_new_value_fires_once() {
        let property = int_property(5);
        let (count, last) = observed(&property);

        let ten = new_any(10i32);
        assert_eq!(
            property.set_value(ten.get(), InvokeType::Immediate),
            ReturnValue::Success
        );
        assert_eq!(count.get(), 1);
        assert_eq!(last.get(), 10);
        assert_eq!(any_get::<i32>(property.get_value().unwrap().get()), Some(10));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let property = int_property(5);
        let wrong = new_any(1.0f32);
        assert_eq!(
            property.set_value(wrong.get(), InvokeType::Immediate),
            ReturnValue::InvalidArgument
        );
        assert_eq!(any_get::<i32>(property.get_value().unwrap().get()), Some(5));
    }

    #[test]
    fn test_deferred_coalescing() {
        let property = int_property(0);
        let (count, last) = observed(&property);

        for value in [1i32, 2, 3] {
            let any = new_any(value);
            assert_eq!(
                property.set_value(any.get(), InvokeType::Deferred),
                ReturnValue::Success
            );
        }
        // Nothing committed before the drain.
        assert_eq!(any_get::<i32>(property.get_value().unwrap().get()), Some(0));
        assert_eq!(count.get(), 0);

        instance().update();
        assert_eq!(any_get::<i32>(property.get_value().unwrap().get()), Some(3));
        assert_eq!(count.get(), 1);
        assert_eq!(last.get(), 3);

        // The drain consumed the pending slot; a fresh drain does nothing.
        instance().update();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_deferred_back_to_current_value_commits_nothing() {
        let property = int_property(7);
        let (count, _) = observed(&property);

        let other = new_any(8i32);
        let back = new_any(7i32);
        assert_eq!(
            property.set_value(other.get(), InvokeType::Deferred),
            ReturnValue::Success
        );
        assert_eq!(
            property.set_value(back.get(), InvokeType::Deferred),
            ReturnValue::Success
        );

        instance().update();
        assert_eq!(any_get::<i32>(property.get_value().unwrap().get()), Some(7));
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_property_dropped_before_update_is_silent() {
        let property = int_property(1);
        let two = new_any(2i32);
        assert_eq!(
            property.set_value(two.get(), InvokeType::Deferred),
            ReturnValue::Success
        );
        drop(property);
        // The queued commit finds an expired weak and skips.
        instance().update();
    }

    #[test]
    fn test_read_only_property() {
        let property = int_property(7);
        property
            .get()
            .interface::<dyn IPropertyInternal>()
            .unwrap()
            .set_read_only(true);

        let nine = new_any(9i32);
        assert_eq!(
            property.set_value(nine.get(), InvokeType::Immediate),
            ReturnValue::ReadOnly
        );
        assert_eq!(any_get::<i32>(property.get_value().unwrap().get()), Some(7));
    }

    #[test]
    fn test_set_any_is_one_shot() {
        let property = int_property(0);
        let internal = property.get().interface::<dyn IPropertyInternal>().unwrap();
        assert_eq!(internal.set_any(new_any(5i32)), ReturnValue::Fail);
        assert_eq!(any_get::<i32>(property.get_value().unwrap().get()), Some(0));
    }
}
