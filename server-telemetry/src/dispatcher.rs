use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use tracing::error;

use crate::{
    snapshot::Snapshot,
    target::{Target, TargetError},
    util::panic_message,
};

/// Fans a snapshot out to every registered target.
///
/// Targets are invoked one after another, in registration order, with the same snapshot. A target that fails,
/// or panics, is reported and skipped; the remaining targets still run. A target whose consumer has disconnected
/// (a broken pipe) is skipped without a report, since that only happens while the host is shutting down.
///
/// Targets are never deduplicated: registering the same target twice invokes it twice per tick.
#[derive(Clone, Default)]
pub struct Dispatcher {
    targets: Vec<Arc<dyn Target>>,
}

impl Dispatcher {
    /// Creates an empty `Dispatcher`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a target.
    pub fn add_target<T>(&mut self, target: T)
    where
        T: Target + 'static,
    {
        self.targets.push(Arc::new(target));
    }

    /// Appends a target that may also be held elsewhere.
    pub fn add_shared_target(&mut self, target: Arc<dyn Target>) {
        self.targets.push(target);
    }

    /// Returns the number of registered targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Returns `true` if no targets are registered.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Returns the kinds of the registered targets, in invocation order.
    pub fn target_kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.targets.iter().map(|t| t.kind())
    }

    /// Publishes the snapshot to every target.
    ///
    /// Returns the number of targets that failed.
    pub fn dispatch(&self, snapshot: &Snapshot) -> usize {
        let mut failures = 0;

        for target in &self.targets {
            let result = panic::catch_unwind(AssertUnwindSafe(|| target.publish(snapshot)));
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_broken_pipe() => {}
                Ok(Err(e)) => {
                    failures += 1;
                    report(target.kind(), &e);
                }
                Err(payload) => {
                    failures += 1;
                    error!(
                        plugin = "telemetry",
                        output = target.kind(),
                        err = "panic",
                        msg = panic_message(&*payload),
                        "Target panicked."
                    );
                }
            }
        }

        failures
    }
}

fn report(kind: &'static str, e: &TargetError) {
    error!(plugin = "telemetry", output = kind, err = e.kind(), msg = %e, "Target failed.");
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.target_kinds()).finish()
    }
}
