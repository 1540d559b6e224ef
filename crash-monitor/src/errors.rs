use crate::MonitorKind;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Report(#[from] crash_report::Error),
    #[error(transparent)]
    Threads(#[from] machine_context::Error),
    #[error(transparent)]
    Decode(#[from] report_json::DecodeError),
    #[error(transparent)]
    Json(#[from] report_json::JsonError),
    /// The operation needs a monitor that isn't active
    #[error("the {0} monitor is not active")]
    MonitorInactive(MonitorKind),
    /// A monitor's state is locked by a thread that was interrupted
    #[error("the state of the {0} monitor is locked")]
    StateLocked(MonitorKind),
}
