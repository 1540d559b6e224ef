use crate::{ConsoleLog, FileConsoleLog, ObjectDescriber, ReportWriter};
use parking_lot::Mutex;
use std::path::PathBuf;

/// Writes additional data into the `user` section of a report.
///
/// This is called while the process is in a crashed state, so it must avoid
/// anything that isn't safe to do from a signal handler.
pub type UserSectionCallback = Box<dyn Fn(&mut dyn ReportWriter) + Send + Sync>;

/// Controls how much memory around the crashed thread is inspected
#[derive(Clone, Debug, Default)]
pub struct IntrospectionRules {
    pub enabled: bool,
    /// Classes whose contents are never written, only their names
    pub restricted_classes: Vec<String>,
}

impl IntrospectionRules {
    #[inline]
    pub fn is_restricted(&self, class_name: &str) -> bool {
        self.restricted_classes.iter().any(|c| c == class_name)
    }
}

/// Settings shared by every report written by a process
pub struct ReportConfig {
    pub introspection: IntrospectionRules,
    pub user_section: Option<UserSectionCallback>,
    /// A log file whose lines are added to the `debug` section
    pub console_log_path: Option<PathBuf>,
    pub pretty_print: bool,
    pub describer: Option<Box<dyn ObjectDescriber>>,
    pub console_log: Box<dyn ConsoleLog>,
    user_info: Mutex<Option<Vec<u8>>>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            introspection: IntrospectionRules::default(),
            user_section: None,
            console_log_path: None,
            pretty_print: false,
            describer: None,
            console_log: Box::new(FileConsoleLog),
            user_info: Mutex::new(None),
        }
    }
}

impl ReportConfig {
    /// Sets the JSON document added as the `user` section of every report,
    /// `None` removes it.
    ///
    /// This must not be called from a crash handler.
    pub fn set_user_info_json(&self, json: Option<&str>) {
        *self.user_info.lock() = json.map(|j| j.as_bytes().to_vec());
    }

    /// Calls `f` with the current user info.
    ///
    /// The crashed process may have been interrupted while holding the lock,
    /// in which case the user info is skipped rather than waited for.
    pub fn with_user_info<R>(&self, f: impl FnOnce(Option<&[u8]>) -> R) -> R {
        match self.user_info.try_lock() {
            Some(info) => f(info.as_deref()),
            None => {
                log::warn!("user info is locked, skipping it");
                f(None)
            }
        }
    }
}

impl std::fmt::Debug for ReportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportConfig")
            .field("introspection", &self.introspection)
            .field("user_section", &self.user_section.is_some())
            .field("console_log_path", &self.console_log_path)
            .field("pretty_print", &self.pretty_print)
            .field("describer", &self.describer.is_some())
            .finish_non_exhaustive()
    }
}
