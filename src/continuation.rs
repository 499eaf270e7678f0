//! Callback targets bound to an execution context.
//!
//! A [`Continuation`] pairs a client callback with the place it wants to be
//! called from. Internal code never invokes a client callback directly; it
//! goes through `dispatch`.

use std::sync::Arc;

use crate::executor::{Job, SerialExecutor};

/// Something that can run a job in a chosen context.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, job: Job);
}

impl Dispatcher for SerialExecutor {
    fn dispatch(&self, job: Job) {
        self.submit(job);
    }
}

/// Where a continuation's callback runs.
#[derive(Clone)]
pub enum DispatchTarget {
    /// On whichever internal thread delivers the event.
    Inline,
    /// On the given serial executor.
    Executor(SerialExecutor),
    /// On a client-supplied dispatcher.
    Custom(Arc<dyn Dispatcher>),
}

/// A callback plus the context it must be invoked in.
pub struct Continuation<T: ?Sized> {
    target: Arc<T>,
    dispatcher: DispatchTarget,
}

impl<T: ?Sized> Clone for Continuation<T> {
    fn clone(&self) -> Self {
        Self {
            target: Arc::clone(&self.target),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for Continuation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let target = match &self.dispatcher {
            DispatchTarget::Inline => "inline",
            DispatchTarget::Executor(_) => "executor",
            DispatchTarget::Custom(_) => "custom",
        };
        f.debug_struct("Continuation")
            .field("dispatch", &target)
            .finish_non_exhaustive()
    }
}

impl<T: ?Sized + Send + Sync + 'static> Continuation<T> {
    pub fn new(target: Arc<T>, dispatcher: DispatchTarget) -> Self {
        Self { target, dispatcher }
    }

    pub fn inline(target: Arc<T>) -> Self {
        Self::new(target, DispatchTarget::Inline)
    }

    pub fn on_executor(target: Arc<T>, executor: SerialExecutor) -> Self {
        Self::new(target, DispatchTarget::Executor(executor))
    }

    pub fn target(&self) -> &Arc<T> {
        &self.target
    }

    /// Run `f` against the callback in its dispatch context.
    pub fn dispatch<F>(&self, f: F)
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let target = Arc::clone(&self.target);
        match &self.dispatcher {
            DispatchTarget::Inline => f(&target),
            DispatchTarget::Executor(exec) => {
                if !exec.submit(move || f(&target)) {
                    log::warn!("Callback dropped: executor {} is shut down", exec.name());
                }
            }
            DispatchTarget::Custom(dispatcher) => dispatcher.dispatch(Box::new(move || f(&target))),
        }
    }
}
