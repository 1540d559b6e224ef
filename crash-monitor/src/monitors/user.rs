use crate::{EnabledFlag, Monitor, MonitorKind};

/// Gates [`crate::MonitorOrchestrator::report_user_exception`], reports are
/// only written while this monitor is active
#[derive(Debug, Default)]
pub struct UserReportedMonitor {
    enabled: EnabledFlag,
}

impl Monitor for UserReportedMonitor {
    fn kind(&self) -> MonitorKind {
        MonitorKind::USER_REPORTED
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }
}
