//! Per-object metadata containers
//!
//! The registry attaches a [`MetadataContainer`] to every created object
//! whose class declares members. The container lazily materializes
//! runtime properties, events and functions from the static descriptor
//! table on first lookup and caches them, so repeated lookups return the
//! same instance. `notify` fans member-change notifications out to the
//! materialized on-changed events and registered observers.

use std::cell::RefCell;

use smallvec::SmallVec;

use crate::function::{IEvent, IFunction, IFunctionInternal};
use crate::interface::{IInterface, InterfaceExt};
use crate::member::MemberDesc;
use crate::object::ObjectClass;
use crate::property::{IProperty, IPropertyInternal};
use crate::ptr::{Ref, WeakRef};
use crate::types::{InvokeType, MemberKind, Notification, ReturnValue};
use crate::uid::Uid;

crate::interface! {
    /// Reflection over an object's declared members.
    pub trait IMetadata: IInterface {
        /// The class's static member table.
        fn static_metadata(&self) -> &'static [MemberDesc];

        /// The runtime property for a declared member, materialized on
        /// first access. `None` for unknown names.
        fn get_property(&self, name: &str) -> Option<Ref<dyn IProperty>>;

        fn get_event(&self, name: &str) -> Option<Ref<dyn IEvent>>;

        fn get_function(&self, name: &str) -> Option<Ref<dyn IFunction>>;

        /// Fires the on-changed events of the materialized properties
        /// declared by the interface `uid`, then any matching observers.
        fn notify(&self, kind: MemberKind, uid: Uid, notification: Notification);

        /// Registers a handler observing `(kind, uid)` notifications.
        fn observe(
            &self,
            kind: MemberKind,
            uid: Uid,
            handler: &Ref<dyn IFunction>,
        ) -> ReturnValue;
    }
}

crate::interface! {
    /// Container installation hook, called once by the registry at the
    /// end of object creation.
    pub trait IMetadataContainer: IInterface {
        /// One-shot; later calls return `NothingToDo`.
        fn set_metadata_container(&self, container: MetadataContainer) -> ReturnValue;
    }
}

crate::interface! {
    /// Access to the typed state structs of an object's interfaces.
    pub trait IPropertyState: IInterface {
        /// The type-erased `StateCell` for the interface `uid`, or
        /// `None` when the class holds no state for it.
        fn property_state(&self, interface_uid: Uid) -> Option<&dyn std::any::Any>;
    }
}

/// Lazy runtime mirror of a class's static member table.
pub struct MetadataContainer {
    members: &'static [MemberDesc],
    /// The owning object; function members bind their primary target to
    /// it on materialization.
    owner: WeakRef<dyn IInterface>,
    properties: RefCell<Vec<(&'static str, Ref<dyn IProperty>)>>,
    events: RefCell<Vec<(&'static str, Ref<dyn IEvent>)>>,
    functions: RefCell<Vec<(&'static str, Ref<dyn IFunction>)>>,
    observers: RefCell<SmallVec<[(MemberKind, Uid, Ref<dyn IFunction>); 2]>>,
}

impl MetadataContainer {
    pub fn new(members: &'static [MemberDesc], owner: WeakRef<dyn IInterface>) -> Self {
        MetadataContainer {
            members,
            owner,
            properties: RefCell::new(Vec::new()),
            events: RefCell::new(Vec::new()),
            functions: RefCell::new(Vec::new()),
            observers: RefCell::new(SmallVec::new()),
        }
    }

    pub fn static_metadata(&self) -> &'static [MemberDesc] {
        self.members
    }

    fn find(&self, kind: MemberKind, name: &str) -> Option<&'static MemberDesc> {
        self.members
            .iter()
            .find(|desc| desc.kind == kind && desc.name == name)
    }

    pub fn get_property(&self, name: &str) -> Option<Ref<dyn IProperty>> {
        if let Some((_, cached)) = self
            .properties
            .borrow()
            .iter()
            .find(|(cached_name, _)| *cached_name == name)
        {
            return Some(cached.clone());
        }
        let desc = self.find(MemberKind::Property, name)?;
        let property = crate::runtime::instance().create_property(desc.type_uid, None)?;
        if let Some(internal) = property.get().interface::<dyn IPropertyInternal>() {
            if let Some(backing) = internal.get_any() {
                desc.default.write_to(backing.get());
            }
        }
        self.properties.borrow_mut().push((desc.name, property.clone()));
        Some(property)
    }

    pub fn get_event(&self, name: &str) -> Option<Ref<dyn IEvent>> {
        if let Some((_, cached)) = self
            .events
            .borrow()
            .iter()
            .find(|(cached_name, _)| *cached_name == name)
        {
            return Some(cached.clone());
        }
        let desc = self.find(MemberKind::Event, name)?;
        let event = crate::runtime::instance()
            .create(crate::function::EventObject::CLASS_UID)?
            .cast::<dyn IEvent>()?;
        self.events.borrow_mut().push((desc.name, event.clone()));
        Some(event)
    }

    pub fn get_function(&self, name: &str) -> Option<Ref<dyn IFunction>> {
        if let Some((_, cached)) = self
            .functions
            .borrow()
            .iter()
            .find(|(cached_name, _)| *cached_name == name)
        {
            return Some(cached.clone());
        }
        let desc = self.find(MemberKind::Function, name)?;
        let function = crate::runtime::instance()
            .create(crate::function::FunctionObject::CLASS_UID)?
            .cast::<dyn IFunction>()?;
        if let Some(thunk) = desc.thunk {
            if let Some(internal) = function.get().interface::<dyn IFunctionInternal>() {
                internal.bind(self.owner.clone(), thunk);
            }
        }
        self.functions.borrow_mut().push((desc.name, function.clone()));
        Some(function)
    }

    pub fn notify(&self, kind: MemberKind, uid: Uid, _notification: Notification) {
        if kind == MemberKind::Property {
            // Only materialized properties can have listeners.
            let materialized: Vec<_> = self.properties.borrow().clone();
            for (name, property) in &materialized {
                let owned = self
                    .find(MemberKind::Property, name)
                    .is_some_and(|desc| desc.owner_uid == uid);
                if !owned {
                    continue;
                }
                if let Some(value) = property.get_value() {
                    property
                        .on_changed()
                        .invoke(&[value.get()], InvokeType::Immediate);
                }
            }
        }

        let observers: Vec<_> = self
            .observers
            .borrow()
            .iter()
            .filter(|(observed_kind, observed_uid, _)| {
                *observed_kind == kind && *observed_uid == uid
            })
            .map(|(_, _, handler)| handler.clone())
            .collect();
        for handler in observers {
            handler.invoke(&[], InvokeType::Immediate);
        }
    }

    pub fn observe(
        &self,
        kind: MemberKind,
        uid: Uid,
        handler: &Ref<dyn IFunction>,
    ) -> ReturnValue {
        let mut observers = self.observers.borrow_mut();
        if observers
            .iter()
            .any(|(observed_kind, observed_uid, known)| {
                *observed_kind == kind && *observed_uid == uid && known.ptr_eq(handler)
            })
        {
            return ReturnValue::NothingToDo;
        }
        observers.push((kind, uid, handler.clone()));
        ReturnValue::Success
    }
}
