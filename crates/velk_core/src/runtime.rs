//! Runtime root
//!
//! [`instance()`] returns the calling thread's runtime root: the type
//! registry plus the deferred task queue, with the kernel's built-in
//! classes (property, event, function, and the `SimpleAny` family)
//! registered up front. The root is created lazily and lives for the
//! rest of the thread.

use std::cell::OnceCell;
use std::rc::Rc;

use crate::any::{IAny, SimpleAny};
use crate::error::{Result, VelkError};
use crate::factory::{ClassInfo, IObjectFactory};
use crate::function::{EventObject, FunctionObject};
use crate::interface::IInterface;
use crate::object::{create_boxed, ObjectClass, ObjectCore};
use crate::property::{IProperty, PropertyObject};
use crate::ptr::Ref;
use crate::registry::TypeRegistry;
use crate::scheduler::{DeferredQueue, DeferredTask};
use crate::types::ReturnValue;
use crate::uid::Uid;

crate::interface! {
    /// The runtime root's public surface.
    pub trait IVelk: IInterface {
        fn register_factory(&self, factory: Rc<dyn IObjectFactory>) -> ReturnValue;

        fn unregister_factory(&self, uid: Uid) -> ReturnValue;

        fn create(&self, uid: Uid) -> Option<Ref<dyn IInterface>>;

        fn create_any(&self, uid: Uid) -> Option<Ref<dyn IAny>>;

        fn create_property(
            &self,
            type_uid: Uid,
            initial: Option<Ref<dyn IAny>>,
        ) -> Option<Ref<dyn IProperty>>;

        fn class_info(&self, uid: Uid) -> Option<ClassInfo>;

        fn queue_deferred_tasks(&self, tasks: &[DeferredTask]) -> ReturnValue;

        /// Drains the deferred queue. Tasks enqueued during the drain
        /// join the next one.
        fn update(&self);

        fn type_registry(&self) -> &TypeRegistry;
    }
}

/// The runtime root object.
#[derive(Default)]
pub struct Velk {
    core: ObjectCore,
    registry: TypeRegistry,
    queue: DeferredQueue,
}

crate::object_class! {
    pub class Velk {
        name: "velk.Velk",
        core: core,
        implements: [crate::runtime::IVelk],
    }
}

impl Velk {
    /// Registers the factory of a declared class.
    pub fn register_type<C: ObjectClass + IInterface>(&self) -> ReturnValue {
        self.registry.register_type::<C>()
    }

    pub fn register_factory(&self, factory: Rc<dyn IObjectFactory>) -> ReturnValue {
        self.registry.register(factory)
    }

    pub fn unregister_factory(&self, uid: Uid) -> ReturnValue {
        self.registry.unregister(uid)
    }

    pub fn create(&self, uid: Uid) -> Option<Ref<dyn IInterface>> {
        self.registry.create(uid)
    }

    /// Like [`Velk::create`], with a typed error for the failure case.
    pub fn create_checked(&self, uid: Uid) -> Result<Ref<dyn IInterface>> {
        self.registry.create(uid).ok_or(VelkError::UnknownClass(uid))
    }

    pub fn create_any(&self, uid: Uid) -> Option<Ref<dyn IAny>> {
        self.registry.create_any(uid)
    }

    pub fn create_property(
        &self,
        type_uid: Uid,
        initial: Option<Ref<dyn IAny>>,
    ) -> Option<Ref<dyn IProperty>> {
        self.registry.create_property(type_uid, initial)
    }

    pub fn class_info(&self, uid: Uid) -> Option<ClassInfo> {
        self.registry.class_info(uid)
    }

    pub fn queue_deferred_tasks(&self, tasks: &[DeferredTask]) -> ReturnValue {
        self.queue.queue(tasks);
        ReturnValue::Success
    }

    /// Defers a change notification to the end of the running drain.
    pub(crate) fn queue_post_drain(&self, task: DeferredTask) {
        self.queue.queue_post(task);
    }

    pub fn update(&self) {
        self.queue.update();
    }

    pub fn type_registry(&self) -> &TypeRegistry {
        &self.registry
    }

    fn register_builtins(&self) {
        self.register_type::<PropertyObject>();
        self.register_type::<EventObject>();
        self.register_type::<FunctionObject>();

        self.register_type::<SimpleAny<f32>>();
        self.register_type::<SimpleAny<f64>>();
        self.register_type::<SimpleAny<i8>>();
        self.register_type::<SimpleAny<i16>>();
        self.register_type::<SimpleAny<i32>>();
        self.register_type::<SimpleAny<i64>>();
        self.register_type::<SimpleAny<u8>>();
        self.register_type::<SimpleAny<u16>>();
        self.register_type::<SimpleAny<u32>>();
        self.register_type::<SimpleAny<u64>>();
        self.register_type::<SimpleAny<bool>>();
        self.register_type::<SimpleAny<String>>();
    }
}

impl IVelk for Velk {
    fn register_factory(&self, factory: Rc<dyn IObjectFactory>) -> ReturnValue {
        Velk::register_factory(self, factory)
    }

    fn unregister_factory(&self, uid: Uid) -> ReturnValue {
        Velk::unregister_factory(self, uid)
    }

    fn create(&self, uid: Uid) -> Option<Ref<dyn IInterface>> {
        Velk::create(self, uid)
    }

    fn create_any(&self, uid: Uid) -> Option<Ref<dyn IAny>> {
        Velk::create_any(self, uid)
    }

    fn create_property(
        &self,
        type_uid: Uid,
        initial: Option<Ref<dyn IAny>>,
    ) -> Option<Ref<dyn IProperty>> {
        Velk::create_property(self, type_uid, initial)
    }

    fn class_info(&self, uid: Uid) -> Option<ClassInfo> {
        Velk::class_info(self, uid)
    }

    fn queue_deferred_tasks(&self, tasks: &[DeferredTask]) -> ReturnValue {
        Velk::queue_deferred_tasks(self, tasks)
    }

    fn update(&self) {
        Velk::update(self)
    }

    fn type_registry(&self) -> &TypeRegistry {
        Velk::type_registry(self)
    }
}

thread_local! {
    static ROOT: OnceCell<&'static Velk> = const { OnceCell::new() };
}

/// The calling thread's runtime root, created on first use.
pub fn instance() -> &'static Velk {
    ROOT.with(|cell| {
        *cell.get_or_init(|| {
            let handle = create_boxed::<Velk>();
            let root = handle
                .get()
                .as_any()
                .downcast_ref::<Velk>()
                .expect("root class") as *const Velk;
            // The root lives for the rest of the thread; its strong
            // handle is intentionally leaked.
            std::mem::forget(handle);
            let root: &'static Velk = unsafe { &*root };
            root.register_builtins();
            root
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::any::{any_get, ValueType};
    use crate::function::callback;
    use crate::interface::InterfaceExt;

    #[test]
    fn test_builtins_registered() {
        let velk = instance();
        assert!(velk.class_info(PropertyObject::CLASS_UID).is_some());
        assert!(velk.class_info(<f32 as ValueType>::UID).is_some());
        assert!(velk.class_info(<String as ValueType>::UID).is_some());
        assert!(velk.class_info(Uid::from_name("velk.NoSuchClass")).is_none());
        assert!(velk.create(Uid::from_name("velk.NoSuchClass")).is_none());
    }

    #[test]
    fn test_create_any_by_type_uid() {
        let any = instance().create_any(<i32 as ValueType>::UID).unwrap();
        assert_eq!(any_get::<i32>(any.get()), Some(0));
    }

    #[test]
    fn test_root_exposes_ivelk() {
        let velk = instance();
        assert!(velk.interface::<dyn IVelk>().is_some());
        assert!(velk
            .get_interface(<dyn IVelk as crate::interface::InterfaceInfo>::UID)
            .is_some());
    }

    #[test]
    fn test_update_drains_fifo_and_requeues() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let velk = instance();
        let order = Rc::new(RefCell::new(Vec::new()));

        let log = order.clone();
        let second = callback(move |_| {
            log.borrow_mut().push("second");
            ReturnValue::Success
        });
        let log = order.clone();
        let requeued = second.clone();
        let first = callback(move |_| {
            log.borrow_mut().push("first");
            // Queued mid-drain: must land in the next drain.
            instance().queue_deferred_tasks(&[DeferredTask::new(requeued.clone())]);
            ReturnValue::Success
        });

        velk.queue_deferred_tasks(&[DeferredTask::new(first)]);
        velk.update();
        assert_eq!(*order.borrow(), vec!["first"]);

        velk.update();
        assert_eq!(*order.borrow(), vec!["first", "second"]);
    }
}
