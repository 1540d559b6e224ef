use crate::{Error, MonitorKind, MonitorOrchestrator};
use crash_report::CrashEvent;
use std::sync::{
    Weak,
    atomic::{AtomicBool, Ordering},
};

/// A failure detector or information source managed by a
/// [`MonitorOrchestrator`].
///
/// Monitors are shared between the orchestrator and whatever feeds them, so
/// every method takes `&self`.
pub trait Monitor: Send + Sync {
    /// The single kind this monitor implements
    fn kind(&self) -> MonitorKind;

    fn is_enabled(&self) -> bool;

    /// Turns the monitor on or off. A monitor that can't be enabled on the
    /// current platform stays disabled, which the orchestrator observes
    /// through [`Self::is_enabled`].
    ///
    /// This is also called with `false` from a crashed context.
    fn set_enabled(&self, enabled: bool);

    /// Adds what this monitor knows to an event that is about to be written.
    ///
    /// Failing here only loses this monitor's contribution.
    fn add_contextual_info(&self, _event: &mut CrashEvent<'_>) -> Result<(), Error> {
        Ok(())
    }

    /// Called once when the orchestrator owning this monitor is created, for
    /// monitors that raise events themselves
    fn attach(&self, _orchestrator: Weak<MonitorOrchestrator>) {}
}

/// The enabled state of a monitor that needs no work to turn on or off
#[derive(Debug, Default)]
pub struct EnabledFlag(AtomicBool);

impl EnabledFlag {
    #[inline]
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns the previous state
    #[inline]
    pub fn set(&self, enabled: bool) -> bool {
        self.0.swap(enabled, Ordering::AcqRel)
    }
}
