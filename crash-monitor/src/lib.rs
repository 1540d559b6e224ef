//! [`MonitorOrchestrator`] decides which crash monitors are active and turns
//! the events they detect into crash reports.
//!
//! # Monitors
//!
//! Every [`Monitor`] implements one [`MonitorKind`]. Some detect failures and
//! raise events, others only add information to events raised by someone
//! else. The built-in monitors are
//!
//! * [`UserReportedMonitor`], which gates
//!   [`MonitorOrchestrator::report_user_exception`]
//! * [`SystemMonitor`], which adds facts about the system and process
//! * [`AppStateMonitor`], which tracks launches, sessions, and active time
//!   across launches
//! * [`ZombieMonitor`], which adds the last deallocated exception object
//!   reported by a language runtime
//! * [`DeadlockWatchdog`], which reports a thread that stops sending
//!   heartbeats
//!
//! Fault sources such as signal handlers are not part of this crate, they
//! are registered as monitors of their kind and call into the orchestrator
//! when a fault is delivered.
//!
//! # Safety masking
//!
//! Monitors that handle the same faults a debugger does are never enabled
//! while a debugger is attached, and once a fault source reports that it is
//! running in an async-signal-unsafe context only async-safe monitors can be
//! enabled for the rest of the process.
//!
//! # Crashing while handling a crash
//!
//! A fatal event that arrives while another one is being handled disables
//! every monitor, and the report that was being written is replaced by a
//! minimal one that embeds whatever made it to disk.

#![allow(unsafe_code)]

mod debugger;
mod errors;
mod kind;
mod monitor;
mod monitors;
mod orchestrator;
mod paths;
mod state;

pub use debugger::{DebuggerCheck, ProcessDebuggerCheck};
pub use errors::Error;
pub use kind::MonitorKind;
pub use monitor::{EnabledFlag, Monitor};
pub use monitors::{
    AppIdentity, AppStateMonitor, DeadlockWatchdog, SystemMonitor, UserReportedMonitor,
    ZombieMonitor,
};
pub use orchestrator::{MAX_USER_FRAMES, MonitorOrchestrator, OrchestratorBuilder};
pub use paths::{DirectoryPaths, ReportPathProvider};
pub use state::{HandlerPhase, HandlerState, SafetyState};

pub use crash_report::{CrashEvent, EventKind, ReportConfig, UserReport};
