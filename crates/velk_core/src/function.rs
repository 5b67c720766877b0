//! Function and event objects
//!
//! A function object carries an optional primary target (a free
//! function, a closure, or a weak-bound interface trampoline) plus a
//! handler list stored as one vector partitioned at `deferred_begin`:
//! handlers before the boundary run inline, handlers after it are queued
//! to the scheduler with cloned arguments. An event is a function in
//! handler mode: invoking it fans out to every registered handler.

use std::cell::RefCell;
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::warn;

use crate::any::IAny;
use crate::interface::{IInterface, InterfaceExt};
use crate::object::{create_boxed, ObjectCore};
use crate::ptr::{Ref, WeakRef};
use crate::scheduler::DeferredTask;
use crate::types::{InvokeType, ReturnValue};

/// Arguments of one invocation.
pub type FnArgs<'a> = &'a [&'a dyn IAny];

/// Free-function primary target.
pub type CallableFn = fn(FnArgs<'_>) -> ReturnValue;

/// Interface-method trampoline: receives the bound object and dispatches
/// to the declared `fn_*` method.
pub type BoundFn = fn(&dyn IInterface, FnArgs<'_>) -> ReturnValue;

crate::interface! {
    /// An invocable object with a partitioned handler list.
    pub trait IFunction: IInterface {
        /// Invokes the primary target, then the immediate handlers in
        /// registration order; deferred handlers are queued with cloned
        /// arguments. Returns the primary's result when one is set,
        /// otherwise `Success` if any handler was dispatched, otherwise
        /// `NothingToDo`.
        fn invoke(&self, args: FnArgs<'_>, invoke: InvokeType) -> ReturnValue;

        /// Registers a handler. `NothingToDo` when already registered
        /// (pointer identity).
        fn add_handler(&self, handler: &Ref<dyn IFunction>, invoke: InvokeType) -> ReturnValue;

        /// Unregisters a handler. `NothingToDo` when not registered.
        fn remove_handler(&self, handler: &Ref<dyn IFunction>) -> ReturnValue;

        fn has_handlers(&self) -> bool;
    }
}

crate::interface! {
    /// A function in handler mode; invoking it fans out to all handlers.
    pub trait IEvent: IFunction {}
}

crate::interface! {
    /// Configuration interface for a function's primary target.
    pub trait IFunctionInternal: IInterface {
        /// Targets a free function.
        fn set_invoke_callback(&self, callback: CallableFn) -> ReturnValue;

        /// Targets a closure.
        fn set_invoke_closure(
            &self,
            closure: Rc<dyn Fn(FnArgs<'_>) -> ReturnValue>,
        ) -> ReturnValue;

        /// Targets an interface method: `thunk` dispatches on the object
        /// behind `target`. An expired target makes the primary count as
        /// absent.
        fn bind(&self, target: WeakRef<dyn IInterface>, thunk: BoundFn) -> ReturnValue;
    }
}

enum PrimaryTarget {
    None,
    Callable(CallableFn),
    Closure(Rc<dyn Fn(FnArgs<'_>) -> ReturnValue>),
    Bound {
        target: WeakRef<dyn IInterface>,
        thunk: BoundFn,
    },
}

impl Default for PrimaryTarget {
    fn default() -> Self {
        PrimaryTarget::None
    }
}

#[derive(Default)]
struct HandlerList {
    items: SmallVec<[Ref<dyn IFunction>; 4]>,
    /// Partition boundary: `[0, deferred_begin)` immediate,
    /// `[deferred_begin, len)` deferred.
    deferred_begin: usize,
}

/// Shared dispatch state of [`FunctionObject`] and [`EventObject`].
#[derive(Default)]
pub(crate) struct FunctionCore {
    primary: RefCell<PrimaryTarget>,
    handlers: RefCell<HandlerList>,
}

/// Clones every argument for deferred delivery; one shared vector backs
/// all tasks spawned by the invocation.
fn clone_args(args: FnArgs<'_>) -> Option<Rc<[Ref<dyn IAny>]>> {
    let mut cloned = Vec::with_capacity(args.len());
    for arg in args {
        match arg.clone_any() {
            Some(clone) => cloned.push(clone),
            None => {
                warn!(uid = %arg.type_uid(), "deferred argument clone failed, dropping task");
                return None;
            }
        }
    }
    Some(Rc::from(cloned))
}

impl FunctionCore {
    fn invoke_now(&self, args: FnArgs<'_>) -> ReturnValue {
        // Snapshot the primary so handlers may reconfigure it mid-call.
        enum Primary {
            None,
            Callable(CallableFn),
            Closure(Rc<dyn Fn(FnArgs<'_>) -> ReturnValue>),
            Bound(Option<Ref<dyn IInterface>>, BoundFn),
        }
        let primary = {
            match &*self.primary.borrow() {
                PrimaryTarget::None => Primary::None,
                PrimaryTarget::Callable(f) => Primary::Callable(*f),
                PrimaryTarget::Closure(f) => Primary::Closure(f.clone()),
                PrimaryTarget::Bound { target, thunk } => {
                    Primary::Bound(target.upgrade(), *thunk)
                }
            }
        };
        let primary_result = match primary {
            Primary::None | Primary::Bound(None, _) => None,
            Primary::Callable(f) => Some(f(args)),
            Primary::Closure(f) => Some(f(args)),
            Primary::Bound(Some(target), thunk) => Some(thunk(target.get(), args)),
        };

        // Snapshot the partitions so handlers may add/remove handlers
        // while the list is being dispatched.
        let (immediate, deferred): (Vec<_>, Vec<_>) = {
            let handlers = self.handlers.borrow();
            (
                handlers.items[..handlers.deferred_begin].to_vec(),
                handlers.items[handlers.deferred_begin..].to_vec(),
            )
        };
        let dispatched = !immediate.is_empty() || !deferred.is_empty();

        for handler in &immediate {
            handler.invoke(args, InvokeType::Immediate);
        }

        if !deferred.is_empty() {
            if let Some(shared) = clone_args(args) {
                let tasks: Vec<DeferredTask> = deferred
                    .iter()
                    .map(|handler| DeferredTask {
                        callable: handler.clone(),
                        args: shared.clone(),
                    })
                    .collect();
                crate::runtime::instance().queue_deferred_tasks(&tasks);
            }
        }

        match primary_result {
            Some(result) => result,
            None if dispatched => ReturnValue::Success,
            None => ReturnValue::NothingToDo,
        }
    }

    /// Queues the whole invocation as one scheduler task.
    fn invoke_deferred(
        &self,
        self_weak: Option<WeakRef<dyn IInterface>>,
        args: FnArgs<'_>,
    ) -> ReturnValue {
        let callable = self_weak
            .and_then(|weak| weak.upgrade())
            .and_then(|strong| strong.cast::<dyn IFunction>());
        let Some(callable) = callable else {
            return ReturnValue::Fail;
        };
        let Some(shared) = clone_args(args) else {
            return ReturnValue::Fail;
        };
        crate::runtime::instance().queue_deferred_tasks(&[DeferredTask {
            callable,
            args: shared,
        }]);
        ReturnValue::Success
    }

    fn add_handler(&self, handler: &Ref<dyn IFunction>, invoke: InvokeType) -> ReturnValue {
        let mut handlers = self.handlers.borrow_mut();
        if handlers.items.iter().any(|known| known.ptr_eq(handler)) {
            return ReturnValue::NothingToDo;
        }
        match invoke {
            InvokeType::Immediate => {
                let at = handlers.deferred_begin;
                handlers.items.insert(at, handler.clone());
                handlers.deferred_begin += 1;
            }
            InvokeType::Deferred => handlers.items.push(handler.clone()),
        }
        ReturnValue::Success
    }

    fn remove_handler(&self, handler: &Ref<dyn IFunction>) -> ReturnValue {
        let mut handlers = self.handlers.borrow_mut();
        let Some(index) = handlers.items.iter().position(|known| known.ptr_eq(handler)) else {
            return ReturnValue::NothingToDo;
        };
        handlers.items.remove(index);
        if index < handlers.deferred_begin {
            handlers.deferred_begin -= 1;
        }
        ReturnValue::Success
    }

    fn has_handlers(&self) -> bool {
        !self.handlers.borrow().items.is_empty()
    }

    fn set_callback(&self, callback: CallableFn) -> ReturnValue {
        *self.primary.borrow_mut() = PrimaryTarget::Callable(callback);
        ReturnValue::Success
    }

    fn set_closure(&self, closure: Rc<dyn Fn(FnArgs<'_>) -> ReturnValue>) -> ReturnValue {
        *self.primary.borrow_mut() = PrimaryTarget::Closure(closure);
        ReturnValue::Success
    }

    fn bind(&self, target: WeakRef<dyn IInterface>, thunk: BoundFn) -> ReturnValue {
        *self.primary.borrow_mut() = PrimaryTarget::Bound { target, thunk };
        ReturnValue::Success
    }

    #[cfg(test)]
    fn deferred_begin(&self) -> usize {
        self.handlers.borrow().deferred_begin
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.handlers.borrow().items.len()
    }
}

macro_rules! delegate_function_impls {
    ($ty:ident) => {
        impl IFunction for $ty {
            fn invoke(&self, args: FnArgs<'_>, invoke: InvokeType) -> ReturnValue {
                match invoke {
                    InvokeType::Immediate => self.fx.invoke_now(args),
                    InvokeType::Deferred => self.fx.invoke_deferred(self.core.self_weak(), args),
                }
            }

            fn add_handler(
                &self,
                handler: &Ref<dyn IFunction>,
                invoke: InvokeType,
            ) -> ReturnValue {
                self.fx.add_handler(handler, invoke)
            }

            fn remove_handler(&self, handler: &Ref<dyn IFunction>) -> ReturnValue {
                self.fx.remove_handler(handler)
            }

            fn has_handlers(&self) -> bool {
                self.fx.has_handlers()
            }
        }

        impl IFunctionInternal for $ty {
            fn set_invoke_callback(&self, callback: CallableFn) -> ReturnValue {
                self.fx.set_callback(callback)
            }

            fn set_invoke_closure(
                &self,
                closure: Rc<dyn Fn(FnArgs<'_>) -> ReturnValue>,
            ) -> ReturnValue {
                self.fx.set_closure(closure)
            }

            fn bind(&self, target: WeakRef<dyn IInterface>, thunk: BoundFn) -> ReturnValue {
                self.fx.bind(target, thunk)
            }
        }
    };
}

/// Runtime function instance.
#[derive(Default)]
pub struct FunctionObject {
    core: ObjectCore,
    fx: FunctionCore,
}

crate::object_class! {
    pub class FunctionObject {
        name: "velk.Function",
        core: core,
        implements: [
            crate::function::IFunction,
            crate::function::IFunctionInternal,
        ],
    }
}

delegate_function_impls!(FunctionObject);

/// Runtime event instance: a function in handler mode.
#[derive(Default)]
pub struct EventObject {
    core: ObjectCore,
    fx: FunctionCore,
}

crate::object_class! {
    pub class EventObject {
        name: "velk.Event",
        core: core,
        implements: [
            crate::function::IFunction,
            crate::function::IEvent,
            crate::function::IFunctionInternal,
        ],
    }
}

delegate_function_impls!(EventObject);

impl IEvent for EventObject {}

/// Wraps a closure as a standalone function object, ready to be used as
/// a handler or scheduler callback.
pub fn callback<F>(f: F) -> Ref<dyn IFunction>
where
    F: Fn(FnArgs<'_>) -> ReturnValue + 'static,
{
    let object = create_boxed::<FunctionObject>();
    let function = object
        .cast::<dyn IFunction>()
        .expect("FunctionObject exposes IFunction");
    function
        .get()
        .interface::<dyn IFunctionInternal>()
        .expect("FunctionObject exposes IFunctionInternal")
        .set_invoke_closure(Rc::new(f));
    function
}
