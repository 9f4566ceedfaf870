//! Acquisition lifecycle state and completion signals.
//!
//! # State Machine
//!
//! ```text
//! ┌───────┐ start() ┌─────────┐  pause()  ┌────────┐
//! │ Ready │────────▶│ Running │──────────▶│ Paused │
//! └───────┘         └────┬────┘◀──────────└───┬────┘
//!                        │        resume()    │
//!                        │ abort()            │ abort()
//!                        │    ┌──────────┐    │
//!                        │    │ Aborting │◀───┘
//!                        │    └────┬─────┘
//!        streams drained ▼         ▼
//!                   ┌───────────┐  sink done  ┌──────────┐
//!                   │ Finishing │────────────▶│ Complete │
//!                   └───────────┘             └──────────┘
//! ```
//!
//! Every transition goes through a `watch` channel, so tasks can await a
//! state (`wait_for`) instead of polling it.

use std::sync::Arc;

use acq_core::{AcqError, AcqResult};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

/// Acquisition lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Created, collaborators may still be registered
    Ready,
    /// Generating events and executing them on the hardware
    Running,
    /// No new hardware work is issued; queues keep draining
    Paused,
    /// Remaining events are being discarded
    Aborting,
    /// Event generation has stopped; the pipeline is draining
    Finishing,
    /// The sink has processed the completion sentinel
    Complete,
}

impl LifecycleState {
    pub fn has_started(self) -> bool {
        self != LifecycleState::Ready
    }

    /// Whether event generation can still issue hardware work.
    pub fn is_active(self) -> bool {
        matches!(self, LifecycleState::Running | LifecycleState::Paused)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Ready => write!(f, "ready"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Paused => write!(f, "paused"),
            LifecycleState::Aborting => write!(f, "aborting"),
            LifecycleState::Finishing => write!(f, "finishing"),
            LifecycleState::Complete => write!(f, "complete"),
        }
    }
}

/// Shared lifecycle state of one acquisition.
#[derive(Debug)]
pub struct Lifecycle {
    tx: watch::Sender<LifecycleState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LifecycleState::Ready);
        Self { tx }
    }

    pub fn state(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }

    /// Apply `f` to the current state atomically.
    ///
    /// `f` returns the next state, or `None` if `operation` is not allowed
    /// from the current one.
    pub fn transition<F>(&self, operation: &'static str, f: F) -> AcqResult<LifecycleState>
    where
        F: FnOnce(LifecycleState) -> Option<LifecycleState>,
    {
        let mut outcome = Ok(LifecycleState::Ready);
        self.tx.send_if_modified(|state| match f(*state) {
            Some(next) => {
                let changed = next != *state;
                if changed {
                    debug!(from = %state, to = %next, operation, "lifecycle transition");
                }
                *state = next;
                outcome = Ok(next);
                changed
            }
            None => {
                outcome = Err(AcqError::InvalidState {
                    operation,
                    state: state.to_string(),
                });
                false
            }
        });
        outcome
    }

    pub(crate) fn start(&self) -> AcqResult<()> {
        self.transition("start", |state| {
            (state == LifecycleState::Ready).then_some(LifecycleState::Running)
        })
        .map(|_| ())
        .map_err(|_| AcqError::AlreadyStarted("start".into()))
    }

    pub(crate) fn pause(&self) -> AcqResult<LifecycleState> {
        self.transition("pause", |state| match state {
            LifecycleState::Running | LifecycleState::Paused => Some(LifecycleState::Paused),
            _ => None,
        })
    }

    pub(crate) fn resume(&self) -> AcqResult<LifecycleState> {
        self.transition("resume", |state| match state {
            LifecycleState::Running | LifecycleState::Paused => Some(LifecycleState::Running),
            _ => None,
        })
    }

    pub(crate) fn toggle_paused(&self) -> AcqResult<LifecycleState> {
        self.transition("toggle pause", |state| match state {
            LifecycleState::Running => Some(LifecycleState::Paused),
            LifecycleState::Paused => Some(LifecycleState::Running),
            _ => None,
        })
    }

    /// Move an active acquisition to `Aborting`. Later states are kept:
    /// aborting twice, or after generation stopped, is a no-op.
    pub(crate) fn abort(&self) -> AcqResult<LifecycleState> {
        self.transition("abort", |state| match state {
            LifecycleState::Ready => None,
            LifecycleState::Running | LifecycleState::Paused => Some(LifecycleState::Aborting),
            other => Some(other),
        })
    }

    pub(crate) fn finishing(&self) {
        let _ = self.transition("finish generation", |state| match state {
            LifecycleState::Complete => Some(LifecycleState::Complete),
            _ => Some(LifecycleState::Finishing),
        });
    }

    pub(crate) fn complete(&self) {
        let _ = self.transition("complete", |_| Some(LifecycleState::Complete));
    }
}

/// Resolves a [`Completion`]. Only the first result is kept.
#[derive(Debug)]
pub struct CompletionSetter {
    tx: watch::Sender<Option<AcqResult<()>>>,
}

impl CompletionSetter {
    /// Returns `false` if the completion was already resolved.
    pub fn resolve(&self, result: AcqResult<()>) -> bool {
        let mut result = Some(result);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = result.take();
            true
        })
    }
}

/// A one-shot result that any number of waiters can observe.
#[derive(Debug, Clone)]
pub struct Completion {
    rx: watch::Receiver<Option<AcqResult<()>>>,
}

/// Create a linked setter/completion pair.
pub fn completion() -> (CompletionSetter, Completion) {
    let (tx, rx) = watch::channel(None);
    (CompletionSetter { tx }, Completion { rx })
}

impl Completion {
    pub fn is_done(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// The result, if already resolved.
    pub fn result(&self) -> Option<AcqResult<()>> {
        (*self.rx.borrow()).clone()
    }

    /// Wait until resolved.
    pub async fn wait(&self) -> AcqResult<()> {
        let mut rx = self.rx.clone();
        let resolved = rx
            .wait_for(Option::is_some)
            .await
            .map(|slot| (*slot).clone());
        match resolved {
            Ok(Some(result)) => result,
            Ok(None) | Err(_) => Err(AcqError::PipelineClosed(
                "completion dropped before it resolved".into(),
            )),
        }
    }
}

/// Read-only view of a running acquisition, handed to sinks and hooks.
#[derive(Debug, Clone)]
pub struct AcquisitionHandle {
    id: Uuid,
    name: Arc<str>,
    state: watch::Receiver<LifecycleState>,
}

impl AcquisitionHandle {
    pub(crate) fn new(name: &str, lifecycle: &Lifecycle) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: Arc::from(name),
            state: lifecycle.subscribe(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_only_from_ready() {
        let lifecycle = Lifecycle::new();
        lifecycle.start().unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Running);
        assert_eq!(
            lifecycle.start(),
            Err(AcqError::AlreadyStarted("start".into()))
        );
    }

    #[test]
    fn pause_toggles_and_abort_unpauses() {
        let lifecycle = Lifecycle::new();
        assert!(matches!(
            lifecycle.toggle_paused(),
            Err(AcqError::InvalidState { .. })
        ));
        lifecycle.start().unwrap();
        assert_eq!(lifecycle.toggle_paused().unwrap(), LifecycleState::Paused);
        assert_eq!(lifecycle.toggle_paused().unwrap(), LifecycleState::Running);
        lifecycle.pause().unwrap();
        assert_eq!(lifecycle.abort().unwrap(), LifecycleState::Aborting);
        assert_eq!(lifecycle.abort().unwrap(), LifecycleState::Aborting);
        assert!(lifecycle.resume().is_err());
        lifecycle.finishing();
        lifecycle.complete();
        assert_eq!(lifecycle.abort().unwrap(), LifecycleState::Complete);
    }

    #[test]
    fn abort_before_start_is_rejected() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.abort().is_err());
        assert_eq!(lifecycle.state(), LifecycleState::Ready);
    }

    #[tokio::test]
    async fn completion_keeps_first_result() {
        let (setter, done) = completion();
        assert!(!done.is_done());
        let waiter = {
            let done = done.clone();
            tokio::spawn(async move { done.wait().await })
        };
        assert!(setter.resolve(Err(AcqError::Hardware("stage fault".into()))));
        assert!(!setter.resolve(Ok(())));
        assert_eq!(
            waiter.await.unwrap(),
            Err(AcqError::Hardware("stage fault".into()))
        );
        assert_eq!(done.result(), Some(Err(AcqError::Hardware("stage fault".into()))));
    }

    #[tokio::test]
    async fn dropped_setter_does_not_hang() {
        let (setter, done) = completion();
        drop(setter);
        assert!(matches!(
            done.wait().await,
            Err(AcqError::PipelineClosed(_))
        ));
    }
}
