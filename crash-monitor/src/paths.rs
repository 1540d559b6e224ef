use crash_report::CrashEvent;
use std::path::{Path, PathBuf};

/// Decides where reports are written
pub trait ReportPathProvider: Send + Sync {
    /// The path of the report for `event`, called once per report
    fn next_report_path(&self, event: &CrashEvent<'_>) -> PathBuf;
}

/// Writes every report into one directory as
/// `<app_name>-report-<event id>.json`
#[derive(Clone, Debug)]
pub struct DirectoryPaths {
    dir: PathBuf,
    app_name: String,
}

impl DirectoryPaths {
    /// Creates `dir` if it doesn't exist yet
    pub fn new(dir: impl Into<PathBuf>, app_name: impl Into<String>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            app_name: app_name.into(),
        })
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The paths of every report currently in the directory, oldest first
    pub fn reports(&self) -> std::io::Result<Vec<PathBuf>> {
        let prefix = format!("{}-report-", self.app_name);

        let mut reports = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let is_report = entry.file_name().to_str().is_some_and(|name| {
                name.starts_with(&prefix) && name.ends_with(".json")
            });
            if is_report {
                let modified = entry.metadata()?.modified()?;
                reports.push((modified, entry.path()));
            }
        }

        reports.sort();
        Ok(reports.into_iter().map(|(_, path)| path).collect())
    }
}

impl ReportPathProvider for DirectoryPaths {
    fn next_report_path(&self, event: &CrashEvent<'_>) -> PathBuf {
        self.dir
            .join(format!("{}-report-{}.json", self.app_name, event.id.hyphenated()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crash_report::EventKind;

    #[test]
    fn names_reports_after_events() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DirectoryPaths::new(dir.path().join("reports"), "app").unwrap();
        assert!(paths.dir().is_dir());

        let event = CrashEvent::new(EventKind::Deadlock);
        let path = paths.next_report_path(&event);
        assert_eq!(path.parent().unwrap(), paths.dir());
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            format!("app-report-{}.json", event.id.hyphenated())
        );

        std::fs::write(&path, "{}").unwrap();
        std::fs::write(paths.dir().join("other.json"), "{}").unwrap();
        assert_eq!(paths.reports().unwrap(), [path]);
    }
}
