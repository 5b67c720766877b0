//! Type registry
//!
//! Maps class UIDs to factories and runs the object creation pipeline:
//! factory construction, self-weak installation, and metadata-container
//! wiring for classes with a non-empty member table.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::any::IAny;
use crate::factory::{ClassFactory, ClassInfo, IObjectFactory};
use crate::interface::{IInterface, InterfaceExt};
use crate::metadata::{IMetadataContainer, MetadataContainer};
use crate::object::{IObject, ObjectClass};
use crate::property::{IProperty, IPropertyInternal, PropertyObject};
use crate::ptr::Ref;
use crate::types::ReturnValue;
use crate::uid::Uid;

/// UID-keyed store of class factories.
#[derive(Default)]
pub struct TypeRegistry {
    factories: RefCell<FxHashMap<Uid, Rc<dyn IObjectFactory>>>,
}

impl TypeRegistry {
    /// Registers a factory, replacing any prior registration for the
    /// same UID.
    pub fn register(&self, factory: Rc<dyn IObjectFactory>) -> ReturnValue {
        let info = factory.class_info();
        debug!(name = info.name, uid = %info.uid, "register type");
        self.factories.borrow_mut().insert(info.uid, factory);
        ReturnValue::Success
    }

    /// Registers the factory of a declared class.
    pub fn register_type<C: ObjectClass + IInterface>(&self) -> ReturnValue {
        self.register(Rc::new(ClassFactory::<C>::default()))
    }

    pub fn unregister(&self, uid: Uid) -> ReturnValue {
        self.factories.borrow_mut().remove(&uid);
        ReturnValue::Success
    }

    pub fn find_factory(&self, uid: Uid) -> Option<Rc<dyn IObjectFactory>> {
        self.factories.borrow().get(&uid).cloned()
    }

    pub fn class_info(&self, uid: Uid) -> Option<ClassInfo> {
        self.find_factory(uid).map(|factory| factory.class_info())
    }

    /// Creates an object by class UID: construct, then wire the
    /// metadata container when the class declares members.
    pub fn create(&self, uid: Uid) -> Option<Ref<dyn IInterface>> {
        let Some(factory) = self.find_factory(uid) else {
            warn!(uid = %uid, "create: no factory registered");
            return None;
        };
        let object = factory.create_instance()?;

        let info = factory.class_info();
        if !info.members.is_empty() {
            let owner = object
                .get()
                .interface::<dyn IObject>()
                .and_then(|object| object.get_self());
            if let (Some(owner), Some(container)) =
                (owner, object.get().interface::<dyn IMetadataContainer>())
            {
                container.set_metadata_container(MetadataContainer::new(info.members, owner));
            }
        }
        Some(object)
    }

    /// Creates an `Any` by its value-type UID.
    pub fn create_any(&self, uid: Uid) -> Option<Ref<dyn IAny>> {
        self.create(uid)?.cast::<dyn IAny>()
    }

    /// Creates a property of `type_uid`, seating `initial` as its
    /// backing when compatible, otherwise a fresh default-valued `Any`.
    pub fn create_property(
        &self,
        type_uid: Uid,
        initial: Option<Ref<dyn IAny>>,
    ) -> Option<Ref<dyn IProperty>> {
        let property = self.create(PropertyObject::CLASS_UID)?.cast::<dyn IProperty>()?;
        let internal = property.get().interface::<dyn IPropertyInternal>()?;

        if let Some(value) = initial {
            if value.compatible_types().contains(&type_uid) {
                if internal.set_any(value) == ReturnValue::Success {
                    return Some(property);
                }
            } else {
                warn!(uid = %type_uid, "initial property value has incompatible type");
            }
        }

        let backing = self.create_any(type_uid)?;
        (internal.set_any(backing) == ReturnValue::Success).then_some(property)
    }

    pub fn len(&self) -> usize {
        self.factories.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.borrow().is_empty()
    }
}
