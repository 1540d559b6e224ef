//! Writes crash reports as JSON.
//!
//! A report is streamed section by section through a [`ReportWriter`], with
//! the output flushed to disk after every top level section so that a report
//! cut short by a second crash is still usable. [`write_standard_report`]
//! produces the full report for a [`CrashEvent`], [`write_recrash_report`]
//! replaces a report that was being written when the process crashed again
//! with a minimal one that embeds whatever made it to disk.
//!
//! The data written comes from the crashed thread's
//! [`machine_context::MachineContext`] and a handful of collaborators bundled
//! in a [`ReportEnvironment`], all of which have production implementations.

#![allow(unsafe_code)]

mod config;
mod console;
pub mod describe;
mod errors;
mod event;
pub mod fields;
mod images;
mod introspect;
mod report;
pub mod signals;
mod sink;
mod writer;

pub use config::{IntrospectionRules, ReportConfig, UserSectionCallback};
pub use console::{ConsoleLog, FileConsoleLog, MAX_LINE_LENGTH};
pub use describe::ObjectDescriber;
pub use errors::Error;
pub use event::{
    AppStateSnapshot, CrashEvent, DanglingObject, EventKind, MachInfo, MemoryStats, SignalInfo,
    SystemFacts, UserReport,
};
pub use images::{BinaryImage, ImageEnumerator, LoadedImages};
pub use introspect::DEFAULT_MEMORY_SEARCH_DEPTH;
pub use report::{
    REPORT_VERSION, ReportEnvironment, recrash_backup_path, write_recrash_report,
    write_standard_report, write_standard_sections,
};
pub use sink::{BufferedFileSink, SINK_BUFFER_SIZE};
pub use writer::{JsonReportWriter, ReportWriter};
