use crate::{EnabledFlag, Error, Monitor, MonitorKind};
use crash_report::{CrashEvent, DanglingObject};
use parking_lot::Mutex;
use std::sync::Arc;

/// Holds the last exception object a language runtime deallocated, which is
/// added to reports as `last_dealloced_nsexception`.
///
/// Tracking deallocations is up to the runtime integration, which hands
/// every record to [`Self::record`].
#[derive(Debug, Default)]
pub struct ZombieMonitor {
    enabled: EnabledFlag,
    last: Mutex<Option<Arc<DanglingObject>>>,
}

impl ZombieMonitor {
    /// Replaces the last dangling object, ignored while the monitor is
    /// disabled
    pub fn record(&self, object: DanglingObject) {
        if !self.enabled.get() {
            return;
        }
        *self.last.lock() = Some(Arc::new(object));
    }

    pub fn last(&self) -> Option<Arc<DanglingObject>> {
        self.last.lock().clone()
    }
}

impl Monitor for ZombieMonitor {
    fn kind(&self) -> MonitorKind {
        MonitorKind::ZOMBIE
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn set_enabled(&self, enabled: bool) {
        if !self.enabled.set(enabled) && enabled {
            // Records from a previous enabled period are stale
            if let Some(mut last) = self.last.try_lock() {
                *last = None;
            }
        }
    }

    fn add_contextual_info(&self, event: &mut CrashEvent<'_>) -> Result<(), Error> {
        let last = self
            .last
            .try_lock()
            .ok_or(Error::StateLocked(MonitorKind::ZOMBIE))?;
        event.dangling = last.clone();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crash_report::EventKind;

    #[test]
    fn attaches_last_record() {
        let zombie = ZombieMonitor::default();
        let object = |name: &str| DanglingObject {
            address: 0x1000,
            name: name.to_owned(),
            reason: "released".to_owned(),
        };

        zombie.record(object("ignored"));
        assert!(zombie.last().is_none());

        zombie.set_enabled(true);
        zombie.record(object("first"));
        zombie.record(object("second"));

        let mut event = CrashEvent::new(EventKind::Deadlock);
        zombie.add_contextual_info(&mut event).unwrap();
        assert_eq!(event.dangling.unwrap().name, "second");

        let _guard = zombie.last.lock();
        let mut event = CrashEvent::new(EventKind::Deadlock);
        assert!(zombie.add_contextual_info(&mut event).is_err());
        assert!(event.dangling.is_none());
    }
}
