//! Deferred task queue
//!
//! A single FIFO queue drained by an explicit `update()` call on the
//! runtime root. Each task pairs a function with the cloned arguments of
//! its originating invocation; tasks queued while a drain is running
//! join the next drain. A task whose weak captures have expired is a
//! silent no-op.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::trace;

use crate::any::IAny;
use crate::function::IFunction;
use crate::ptr::Ref;
use crate::types::InvokeType;

/// One queued invocation.
#[derive(Clone)]
pub struct DeferredTask {
    pub callable: Ref<dyn IFunction>,
    /// Cloned arguments, shared by every task spawned from the same
    /// invocation.
    pub args: Rc<[Ref<dyn IAny>]>,
}

impl DeferredTask {
    /// A task with no arguments.
    pub fn new(callable: Ref<dyn IFunction>) -> DeferredTask {
        DeferredTask {
            callable,
            args: Rc::from(Vec::new()),
        }
    }
}

/// The runtime root's cooperative task queue.
#[derive(Default)]
pub(crate) struct DeferredQueue {
    tasks: RefCell<Vec<DeferredTask>>,
    /// Change notifications raised by tasks of the running drain; fired
    /// after every task has run, so handlers observe all commits.
    post: RefCell<Vec<DeferredTask>>,
}

impl DeferredQueue {
    pub fn queue(&self, tasks: &[DeferredTask]) {
        self.tasks.borrow_mut().extend_from_slice(tasks);
    }

    /// Defers a notification to the end of the running drain.
    pub fn queue_post(&self, task: DeferredTask) {
        self.post.borrow_mut().push(task);
    }

    /// Snapshots and drains the queue in FIFO order, then fires the
    /// notifications the drain raised. Tasks enqueued by the drained
    /// callbacks land in the live queue for the next drain.
    pub fn update(&self) {
        let drained = std::mem::take(&mut *self.tasks.borrow_mut());
        if drained.is_empty() {
            return;
        }
        trace!(tasks = drained.len(), "draining deferred queue");
        for task in drained {
            invoke_task(&task);
        }
        let notifications = std::mem::take(&mut *self.post.borrow_mut());
        for task in notifications {
            invoke_task(&task);
        }
    }
}

fn invoke_task(task: &DeferredTask) {
    let args: Vec<&dyn IAny> = task.args.iter().map(|any| any.get()).collect();
    task.callable.invoke(&args, InvokeType::Immediate);
}
