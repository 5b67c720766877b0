//! End-to-end object, metadata and scheduler scenarios.

use std::cell::Cell;
use std::rc::Rc;

use velk_core::{
    any_get, any_set, callback, default_value, instance, read_state, write_state,
    write_state_with, FnArgs, IFunction, IInterface, IMetadata, IProperty, IPropertyState,
    InterfaceExt, InterfaceInfo, InterfaceState, InvokeType, MemberDefault, MemberDesc,
    MemberKind, Notification, ObjectClass, ObjectCore, ReturnValue, StateCell, Uid, ValueType,
    Velk,
};

fn reset_thunk(object: &dyn IInterface, args: FnArgs<'_>) -> ReturnValue {
    match object.interface::<dyn IWidget>() {
        Some(widget) => widget.fn_reset(args),
        None => ReturnValue::Fail,
    }
}

fn serialize_thunk(object: &dyn IInterface, args: FnArgs<'_>) -> ReturnValue {
    match object.interface::<dyn ISerializable>() {
        Some(serializable) => serializable.fn_serialize(args),
        None => ReturnValue::Fail,
    }
}

velk_core::interface! {
    /// A clickable widget with a couple of reflected members.
    pub trait IWidget: IInterface {
        fn fn_reset(&self, args: FnArgs<'_>) -> ReturnValue;
    }
    members = &[
        MemberDesc::property("width", Self::UID, <f32 as ValueType>::UID, MemberDefault::F32(100.0)),
        MemberDesc::property("height", Self::UID, <f32 as ValueType>::UID, MemberDefault::F32(50.0)),
        MemberDesc::event("on_clicked", Self::UID),
        MemberDesc::function("reset", Self::UID, reset_thunk),
    ];
}

velk_core::interface! {
    pub trait ISerializable: IInterface {
        fn fn_serialize(&self, args: FnArgs<'_>) -> ReturnValue;
    }
    members = &[
        MemberDesc::property("version", Self::UID, <i32 as ValueType>::UID, MemberDefault::I32(1)),
        MemberDesc::function("serialize", Self::UID, serialize_thunk),
    ];
}

#[derive(Default)]
pub struct TestWidget {
    core: ObjectCore,
    reset_calls: Cell<u32>,
    serialize_calls: Cell<u32>,
}

velk_core::object_class! {
    pub class TestWidget {
        name: "velk.test.Widget",
        core: core,
        metadata,
        implements: [IWidget, ISerializable],
    }
}

impl IWidget for TestWidget {
    fn fn_reset(&self, _args: FnArgs<'_>) -> ReturnValue {
        self.reset_calls.set(self.reset_calls.get() + 1);
        ReturnValue::Success
    }
}

impl ISerializable for TestWidget {
    fn fn_serialize(&self, _args: FnArgs<'_>) -> ReturnValue {
        self.serialize_calls.set(self.serialize_calls.get() + 1);
        ReturnValue::Success
    }
}

fn runtime() -> &'static Velk {
    let velk = instance();
    velk.register_type::<TestWidget>();
    velk.register_type::<RectObject>();
    velk
}

#[test]
fn test_metadata_collection_law() {
    let members = TestWidget::members();
    let widget = <dyn IWidget as InterfaceInfo>::MEMBERS;
    let serializable = <dyn ISerializable as InterfaceInfo>::MEMBERS;

    assert_eq!(members.len(), widget.len() + serializable.len());
    let names: Vec<&str> = members.iter().map(|desc| desc.name).collect();
    assert_eq!(
        names,
        vec!["width", "height", "on_clicked", "reset", "version", "serialize"]
    );
}

#[test]
fn test_register_and_create_widget() {
    let velk = runtime();
    let object = velk.create(TestWidget::CLASS_UID).expect("registered class");

    assert!(object.get().interface::<dyn IWidget>().is_some());
    assert!(object.get().interface::<dyn ISerializable>().is_some());
    assert!(object.get().interface::<dyn IMetadata>().is_some());
    // The widget is not the runtime root.
    assert!(object.get().interface::<dyn velk_core::IVelk>().is_none());
}

#[test]
fn test_metadata_lookup_and_defaults() {
    let velk = runtime();
    let object = velk.create(TestWidget::CLASS_UID).unwrap();
    let meta = object.get().interface::<dyn IMetadata>().unwrap();

    let width = meta.get_property("width").expect("declared property");
    assert_eq!(any_get::<f32>(width.get_value().unwrap().get()), Some(100.0));
    let height = meta.get_property("height").expect("declared property");
    assert_eq!(any_get::<f32>(height.get_value().unwrap().get()), Some(50.0));
    let version = meta.get_property("version").expect("declared property");
    assert_eq!(any_get::<i32>(version.get_value().unwrap().get()), Some(1));

    assert!(meta.get_event("on_clicked").is_some());
    assert!(meta.get_function("reset").is_some());
    assert!(meta.get_function("serialize").is_some());

    assert!(meta.get_property("unknown").is_none());
    assert!(meta.get_event("unknown").is_none());
    assert!(meta.get_function("unknown").is_none());
}

#[test]
fn test_metadata_lookup_is_cached() {
    let velk = runtime();
    let object = velk.create(TestWidget::CLASS_UID).unwrap();
    let meta = object.get().interface::<dyn IMetadata>().unwrap();

    let first = meta.get_property("width").unwrap();
    let second = meta.get_property("width").unwrap();
    assert!(first.ptr_eq(&second));

    let width = velk_core::new_any(42.0f32);
    first.set_value(width.get(), InvokeType::Immediate);
    assert_eq!(any_get::<f32>(second.get_value().unwrap().get()), Some(42.0));
}

#[test]
fn test_declared_function_dispatches_to_object() {
    let velk = runtime();
    let object = velk.create(TestWidget::CLASS_UID).unwrap();
    let meta = object.get().interface::<dyn IMetadata>().unwrap();

    let reset = meta.get_function("reset").unwrap();
    assert_eq!(reset.invoke(&[], InvokeType::Immediate), ReturnValue::Success);
    assert_eq!(reset.invoke(&[], InvokeType::Immediate), ReturnValue::Success);

    let widget: &TestWidget = object.get().as_any().downcast_ref().unwrap();
    assert_eq!(widget.reset_calls.get(), 2);
    assert_eq!(widget.serialize_calls.get(), 0);
}

#[test]
fn test_default_value_accessor() {
    let desc = TestWidget::members()
        .iter()
        .find(|desc| desc.name == "width")
        .unwrap();
    assert_eq!(default_value::<f32>(desc), Some(100.0));
    assert_eq!(default_value::<i32>(desc), None);
}

#[test]
fn test_cross_property_batch() {
    let velk = runtime();
    let object = velk.create(TestWidget::CLASS_UID).unwrap();
    let meta = object.get().interface::<dyn IMetadata>().unwrap();

    let width = meta.get_property("width").unwrap();
    let height = meta.get_property("height").unwrap();

    let seen_height = Rc::new(Cell::new(0.0f32));
    let seen = seen_height.clone();
    let height_probe = height.clone();
    let handler = callback(move |_| {
        if let Some(value) = height_probe
            .get_value()
            .and_then(|any| any_get::<f32>(any.get()))
        {
            seen.set(value);
        }
        ReturnValue::Success
    });
    width
        .on_changed()
        .add_handler(&handler, InvokeType::Immediate);

    let w = velk_core::new_any(10.0f32);
    let h = velk_core::new_any(20.0f32);
    assert_eq!(width.set_value(w.get(), InvokeType::Deferred), ReturnValue::Success);
    assert_eq!(height.set_value(h.get(), InvokeType::Deferred), ReturnValue::Success);

    velk.update();

    // Both commits landed before the width handler observed them.
    assert_eq!(any_get::<f32>(width.get_value().unwrap().get()), Some(10.0));
    assert_eq!(seen_height.get(), 20.0);
}

#[test]
fn test_deferred_handler_argument_isolation() {
    let velk = runtime();
    let event = velk
        .create(velk_core::EventObject::CLASS_UID)
        .unwrap()
        .cast::<dyn velk_core::IFunction>()
        .unwrap();

    let seen = Rc::new(Cell::new(0i32));
    let observed = seen.clone();
    let handler = callback(move |args: FnArgs<'_>| {
        if let Some(value) = args.first().and_then(|any| any_get::<i32>(*any)) {
            observed.set(value);
        }
        ReturnValue::Success
    });
    event.add_handler(&handler, InvokeType::Deferred);

    let argument = velk_core::new_any(41i32);
    assert_eq!(event.invoke(&[argument.get()], InvokeType::Immediate), ReturnValue::Success);

    // Clobber the caller's argument before the drain; the queued
    // delivery must see the original bytes.
    any_set(argument.get(), &0i32);
    velk.update();
    assert_eq!(seen.get(), 41);
}

#[test]
fn test_deferred_handlers_run_in_registration_order() {
    let velk = runtime();
    let event = velk
        .create(velk_core::EventObject::CLASS_UID)
        .unwrap()
        .cast::<dyn velk_core::IFunction>()
        .unwrap();

    let order = Rc::new(std::cell::RefCell::new(Vec::new()));
    for name in ["a", "b", "c"] {
        let log = order.clone();
        let handler = callback(move |_| {
            log.borrow_mut().push(name);
            ReturnValue::Success
        });
        event.add_handler(&handler, InvokeType::Deferred);
    }

    event.invoke(&[], InvokeType::Immediate);
    assert!(order.borrow().is_empty());
    velk.update();
    assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
}

// --- Typed state access ---

velk_core::interface! {
    /// Geometry expressed as a plain state struct.
    pub trait IRect: IInterface {}
    members = &[
        MemberDesc::property("area", Self::UID, <f32 as ValueType>::UID, MemberDefault::F32(0.0)),
    ];
}

#[derive(Default)]
pub struct RectState {
    pub width: f32,
    pub height: f32,
}

impl InterfaceState for dyn IRect {
    type State = RectState;
}

#[derive(Default)]
pub struct RectObject {
    core: ObjectCore,
    rect: StateCell<RectState>,
}

velk_core::object_class! {
    pub class RectObject {
        name: "velk.test.Rect",
        core: core,
        metadata,
        implements: [IRect, velk_core::IPropertyState],
    }
}

impl IRect for RectObject {}

impl IPropertyState for RectObject {
    fn property_state(&self, interface_uid: Uid) -> Option<&dyn std::any::Any> {
        (interface_uid == <dyn IRect as InterfaceInfo>::UID)
            .then_some(&self.rect as &dyn std::any::Any)
    }
}

#[test]
fn test_state_reader_and_writer() {
    let velk = runtime();
    let object = velk.create(RectObject::CLASS_UID).unwrap();
    let meta = object.get().interface::<dyn IMetadata>().unwrap();

    let notified = Rc::new(Cell::new(0u32));
    let count = notified.clone();
    let observer = callback(move |_| {
        count.set(count.get() + 1);
        ReturnValue::Success
    });
    meta.observe(
        MemberKind::Property,
        <dyn IRect as InterfaceInfo>::UID,
        &observer,
    );

    {
        let mut rect = write_state::<dyn IRect>(object.get()).expect("state present");
        rect.width = 4.0;
        rect.height = 2.5;
        // Nothing fires while the writer is live.
        assert_eq!(notified.get(), 0);
    }
    assert_eq!(notified.get(), 1);

    let rect = read_state::<dyn IRect>(object.get()).expect("state present");
    assert_eq!(rect.width, 4.0);
    assert_eq!(rect.height, 2.5);
}

#[test]
fn test_deferred_state_write() {
    let velk = runtime();
    let object = velk.create(RectObject::CLASS_UID).unwrap();

    write_state_with::<dyn IRect, _>(
        object.get(),
        |rect| {
            rect.width = 9.0;
        },
        InvokeType::Deferred,
    );
    assert_eq!(read_state::<dyn IRect>(object.get()).unwrap().width, 0.0);

    velk.update();
    assert_eq!(read_state::<dyn IRect>(object.get()).unwrap().width, 9.0);
}

#[test]
fn test_deferred_state_write_after_drop_is_silent() {
    let velk = runtime();
    let object = velk.create(RectObject::CLASS_UID).unwrap();

    write_state_with::<dyn IRect, _>(
        object.get(),
        |rect| {
            rect.width = 9.0;
        },
        InvokeType::Deferred,
    );
    drop(object);
    velk.update();
}

#[test]
fn test_notify_fires_materialized_property_events() {
    let velk = runtime();
    let object = velk.create(RectObject::CLASS_UID).unwrap();
    let meta = object.get().interface::<dyn IMetadata>().unwrap();

    let area = meta.get_property("area").unwrap();
    let fired = Rc::new(Cell::new(0u32));
    let count = fired.clone();
    let handler = callback(move |_| {
        count.set(count.get() + 1);
        ReturnValue::Success
    });
    area.on_changed().add_handler(&handler, InvokeType::Immediate);

    meta.notify(
        MemberKind::Property,
        <dyn IRect as InterfaceInfo>::UID,
        Notification::Changed,
    );
    assert_eq!(fired.get(), 1);

    // Notifications for other interfaces leave it alone.
    meta.notify(
        MemberKind::Property,
        <dyn IWidget as InterfaceInfo>::UID,
        Notification::Changed,
    );
    assert_eq!(fired.get(), 1);
}
