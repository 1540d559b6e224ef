use crate::MonitorKind;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Where the handler is in its lifecycle.
///
/// ```text
/// Idle --fatal--> Handling --done--> Disabled
///  ^                 |  |
///  +----user done----+  +--second fatal--> Recrashed
/// ```
///
/// `Disabled` and `Recrashed` are terminal, reports are only written once
/// per process apart from user reported ones.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HandlerPhase {
    Idle,
    Handling,
    /// A fatal event arrived while another one was being handled
    Recrashed,
    /// A fatal event has been handled and every monitor was disabled
    Disabled,
}

/// A consistent copy of the flags of a [`HandlerState`]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SafetyState {
    pub handling_fatal: bool,
    /// Implies `handling_fatal`
    pub crashed_during_handling: bool,
    /// Never goes back to false once set
    pub requires_async_safety: bool,
}

/// The process wide state of crash handling.
///
/// Only atomics are used so that it can be updated from any context,
/// including one thread crashing while another is writing a report. It lives
/// for the rest of the process once created, usually inside the
/// [`crate::MonitorOrchestrator`] that is shared with the fault sources.
#[derive(Debug, Default)]
pub struct HandlerState {
    handling_fatal: AtomicBool,
    crashed_during_handling: AtomicBool,
    requires_async_safety: AtomicBool,
    disabled: AtomicBool,
    active: AtomicU32,
}

impl HandlerState {
    pub const fn new() -> Self {
        Self {
            handling_fatal: AtomicBool::new(false),
            crashed_during_handling: AtomicBool::new(false),
            requires_async_safety: AtomicBool::new(false),
            disabled: AtomicBool::new(false),
            active: AtomicU32::new(0),
        }
    }

    /// Records that a fatal event was captured, returning true if one was
    /// already being handled
    pub fn notify_fatal(&self, requires_async_safety: bool) -> bool {
        if requires_async_safety {
            self.requires_async_safety.store(true, Ordering::Release);
        }

        if self.handling_fatal.swap(true, Ordering::AcqRel) {
            self.crashed_during_handling.store(true, Ordering::Release);
        }

        self.crashed_during_handling.load(Ordering::Acquire)
    }

    /// Records that an event was handled, returning true if this ends crash
    /// handling for the process and every monitor must be disabled
    pub fn finish(&self, user_reported: bool) -> bool {
        if user_reported {
            self.handling_fatal.store(false, Ordering::Release);
            return false;
        }

        if self.handling_fatal.load(Ordering::Acquire)
            && !self.crashed_during_handling.load(Ordering::Acquire)
        {
            self.disabled.store(true, Ordering::Release);
            return true;
        }

        false
    }

    pub fn safety(&self) -> SafetyState {
        SafetyState {
            handling_fatal: self.handling_fatal.load(Ordering::Acquire),
            crashed_during_handling: self.crashed_during_handling.load(Ordering::Acquire),
            requires_async_safety: self.requires_async_safety.load(Ordering::Acquire),
        }
    }

    #[inline]
    pub fn requires_async_safety(&self) -> bool {
        self.requires_async_safety.load(Ordering::Acquire)
    }

    #[inline]
    pub fn crashed_during_handling(&self) -> bool {
        self.crashed_during_handling.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> HandlerPhase {
        let safety = self.safety();
        if safety.crashed_during_handling {
            HandlerPhase::Recrashed
        } else if self.disabled.load(Ordering::Acquire) {
            HandlerPhase::Disabled
        } else if safety.handling_fatal {
            HandlerPhase::Handling
        } else {
            HandlerPhase::Idle
        }
    }

    #[inline]
    pub fn active(&self) -> MonitorKind {
        MonitorKind::from_bits_retain(self.active.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_active(&self, kinds: MonitorKind) {
        self.active.store(kinds.bits(), Ordering::Release);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn second_fatal_is_a_recrash() {
        let state = HandlerState::new();
        assert_eq!(state.phase(), HandlerPhase::Idle);

        assert!(!state.notify_fatal(false));
        assert_eq!(state.phase(), HandlerPhase::Handling);

        assert!(state.notify_fatal(false));
        assert_eq!(state.phase(), HandlerPhase::Recrashed);

        let safety = state.safety();
        assert!(safety.handling_fatal && safety.crashed_during_handling);

        // The recrash report doesn't disable anything, that already happened
        assert!(!state.finish(false));
        assert_eq!(state.phase(), HandlerPhase::Recrashed);
    }

    #[test]
    fn async_safety_is_sticky() {
        let state = HandlerState::new();
        state.notify_fatal(true);
        assert!(state.requires_async_safety());
        state.finish(true);

        state.notify_fatal(false);
        assert!(state.requires_async_safety());
        assert!(state.safety().requires_async_safety);
    }

    #[test]
    fn user_reports_return_to_idle() {
        let state = HandlerState::new();

        for _ in 0..3 {
            assert!(!state.notify_fatal(false));
            assert!(!state.finish(true));
            assert_eq!(state.phase(), HandlerPhase::Idle);
        }

        assert!(!state.notify_fatal(false));
        assert!(state.finish(false));
        assert_eq!(state.phase(), HandlerPhase::Disabled);
    }
}
