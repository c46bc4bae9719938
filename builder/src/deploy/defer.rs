//! Deferred actions run on every exit path of a pipeline
//!
//! Actions are registered while the pipeline runs and unwound once it
//! finishes, last registered first. Each receives the pipeline's error, if
//! any, so a finalizer can classify the outcome.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::errors::BuildError;

type DeferredAction = Box<dyn FnOnce(Option<Arc<BuildError>>) -> BoxFuture<'static, ()> + Send>;

/// Stack of deferred async actions
#[derive(Default)]
pub struct DeferStack {
    actions: Vec<(&'static str, DeferredAction)>,
}

impl DeferStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Register `action` to run when the stack unwinds
    pub fn defer<F, Fut>(&mut self, label: &'static str, action: F)
    where
        F: FnOnce(Option<Arc<BuildError>>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.actions
            .push((label, Box::new(move |err| action(err).boxed())));
    }

    /// Run every action, last registered first. A panicking action is
    /// logged and does not stop the remaining ones.
    pub async fn unwind(mut self, error: Option<Arc<BuildError>>) {
        while let Some((label, action)) = self.actions.pop() {
            debug!("Running deferred action: {}", label);
            let result = AssertUnwindSafe(action(error.clone())).catch_unwind().await;
            if let Err(panic) = result {
                error!("Deferred action {} panicked: {}", label, panic_message(&panic));
            }
        }
    }
}

impl Drop for DeferStack {
    fn drop(&mut self) {
        if !self.actions.is_empty() {
            warn!(
                "Dropping {} deferred actions without running them",
                self.actions.len()
            );
        }
    }
}

/// Await `fut`, turning a panic into [`BuildError::Internal`]
pub async fn catch_panic<T, Fut>(fut: Fut) -> Result<T, BuildError>
where
    Fut: Future<Output = Result<T, BuildError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(BuildError::Internal(format!(
            "pipeline panicked: {}",
            panic_message(&panic)
        ))),
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
