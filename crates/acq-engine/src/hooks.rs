//! Hooks around hardware execution and after storage.

use acq_core::{AcqResult, AcquisitionEvent, TaggedImage};
use async_trait::async_trait;

use crate::lifecycle::AcquisitionHandle;

/// Where an [`AcquisitionHook`] runs relative to hardware execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    BeforeHardware,
    AfterHardware,
}

impl std::fmt::Display for HookStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookStage::BeforeHardware => write!(f, "before_hardware"),
            HookStage::AfterHardware => write!(f, "after_hardware"),
        }
    }
}

/// Inspects and optionally replaces an event.
///
/// Returning `Ok(None)` deletes the event: it is not executed (before
/// hardware) or its frames are discarded (after hardware). An error aborts
/// the acquisition like a hardware failure.
#[async_trait]
pub trait AcquisitionHook: Send {
    async fn run(&mut self, event: AcquisitionEvent) -> AcqResult<Option<AcquisitionEvent>>;

    /// Called once when the acquisition stops generating events.
    async fn close(&mut self) {}
}

/// Hook built from a closure.
pub struct FnHook<F> {
    f: F,
}

impl<F> FnHook<F>
where
    F: FnMut(AcquisitionEvent) -> Option<AcquisitionEvent> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> AcquisitionHook for FnHook<F>
where
    F: FnMut(AcquisitionEvent) -> Option<AcquisitionEvent> + Send,
{
    async fn run(&mut self, event: AcquisitionEvent) -> AcqResult<Option<AcquisitionEvent>> {
        Ok((self.f)(event))
    }
}

/// Read-only notification after an image is durably stored.
pub trait ImageSavedHook: Send + Sync {
    fn after_save(&self, acquisition: &AcquisitionHandle, image: &TaggedImage);
}

impl<F> ImageSavedHook for F
where
    F: Fn(&AcquisitionHandle, &TaggedImage) + Send + Sync,
{
    fn after_save(&self, acquisition: &AcquisitionHandle, image: &TaggedImage) {
        self(acquisition, image)
    }
}
