use std::{error::Error as StdError, fmt, io, sync::Arc};

use thiserror::Error;

use crate::snapshot::Snapshot;

/// Errors that could occur while publishing a snapshot to a target.
#[derive(Debug, Error)]
pub enum TargetError {
    /// Writing to the target's output failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Flushing the target's metrics pipeline failed.
    #[error("failed to flush metrics pipeline: {reason}")]
    Flush {
        /// Details about the flush failure.
        reason: String,
    },

    /// A user-supplied target failed.
    #[error("{0}")]
    Custom(Box<dyn StdError + Send + Sync>),
}

impl TargetError {
    /// Creates a `TargetError` from an arbitrary error.
    pub fn custom<E>(error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        TargetError::Custom(error.into())
    }

    /// Returns `true` if the target's consumer has disconnected.
    ///
    /// This is expected while the host is shutting down and is not reported.
    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, TargetError::Io(e) if e.kind() == io::ErrorKind::BrokenPipe)
    }

    /// Returns a short, stable identifier for the kind of error.
    pub fn kind(&self) -> &'static str {
        match self {
            TargetError::Io(_) => "io",
            TargetError::Flush { .. } => "flush",
            TargetError::Custom(_) => "custom",
        }
    }
}

/// An output sink that receives a snapshot on every tick.
///
/// Targets are invoked sequentially from the publisher's background thread, but the same target may be shared
/// between publishers, so implementations must tolerate concurrent calls. A target must accept snapshots holding
/// any subset of the known metrics, including none.
pub trait Target: Send + Sync {
    /// Publishes a snapshot.
    ///
    /// # Errors
    ///
    /// Errors are reported by the dispatcher and never stop other targets or future ticks.
    fn publish(&self, snapshot: &Snapshot) -> Result<(), TargetError>;

    /// Short name of the target, used in diagnostics.
    fn kind(&self) -> &'static str {
        "custom"
    }
}

impl<T> Target for Arc<T>
where
    T: Target + ?Sized,
{
    fn publish(&self, snapshot: &Snapshot) -> Result<(), TargetError> {
        (**self).publish(snapshot)
    }

    fn kind(&self) -> &'static str {
        (**self).kind()
    }
}

impl<T> Target for Box<T>
where
    T: Target + ?Sized,
{
    fn publish(&self, snapshot: &Snapshot) -> Result<(), TargetError> {
        (**self).publish(snapshot)
    }

    fn kind(&self) -> &'static str {
        (**self).kind()
    }
}

/// A target backed by a closure.
///
/// Created with [`from_fn`].
pub struct FnTarget<F> {
    f: F,
}

impl<F> fmt::Debug for FnTarget<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTarget").finish_non_exhaustive()
    }
}

impl<F> Target for FnTarget<F>
where
    F: Fn(&Snapshot) -> Result<(), TargetError> + Send + Sync,
{
    fn publish(&self, snapshot: &Snapshot) -> Result<(), TargetError> {
        (self.f)(snapshot)
    }
}

/// Creates a target from a closure.
///
/// ```
/// # use server_telemetry::{from_fn, Target};
/// let target = from_fn(|snapshot| {
///     println!("telemetry={snapshot}");
///     Ok(())
/// });
/// assert_eq!(target.kind(), "custom");
/// ```
pub fn from_fn<F>(f: F) -> FnTarget<F>
where
    F: Fn(&Snapshot) -> Result<(), TargetError> + Send + Sync,
{
    FnTarget { f }
}
