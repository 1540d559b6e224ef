cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        pub mod fault;
        pub mod raise;
    }
}

use std::{
    fmt,
    path::{Path, PathBuf},
    process::Output,
};

/// The application name reports are written under
pub const APP_NAME: &str = "crash-monitor-test";

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    Abort,
    Bus,
    Fpe,
    Illegal,
    Segv,
    Trap,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Abort => "abort",
            Self::Bus => "bus",
            Self::Fpe => "fpe",
            Self::Illegal => "illegal",
            Self::Segv => "segv",
            Self::Trap => "trap",
        })
    }
}

impl Signal {
    /// The name the report gives the signal
    pub fn report_name(self) -> &'static str {
        match self {
            Self::Abort => "SIGABRT",
            Self::Bus => "SIGBUS",
            Self::Fpe => "SIGFPE",
            Self::Illegal => "SIGILL",
            Self::Segv => "SIGSEGV",
            Self::Trap => "SIGTRAP",
        }
    }
}

#[inline]
fn make_report_dir(id: &str) -> PathBuf {
    PathBuf::from(".reports").join(id)
}

fn harness_path() -> PathBuf {
    use std::env;

    // Adapted from
    // https://github.com/rust-lang/cargo/blob/485670b3983b52289a2f353d589c57fae2f60f82/tests/testsuite/support/mod.rs#L507
    let mut cmd_path = env::current_exe().expect("failed to get exe path");
    cmd_path.pop();
    if cmd_path.ends_with("deps") {
        cmd_path.pop();
    }

    cmd_path.push(APP_NAME);
    if !env::consts::EXE_SUFFIX.is_empty() {
        cmd_path.set_extension(env::consts::EXE_SUFFIX);
    }
    cmd_path
}

/// Runs the harness binary with `args`, writing reports into `dir`
pub fn run_harness(dir: &Path, args: &[&str]) -> Output {
    let mut cmd = std::process::Command::new(harness_path());
    cmd.stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    cmd.arg("--dir").arg(dir).args(args);

    let child = cmd.spawn().expect("failed to run the harness");
    let output = child.wait_with_output().expect("failed to wait for output");

    println!("{}", String::from_utf8_lossy(&output.stdout));
    eprintln!("{}", String::from_utf8_lossy(&output.stderr));

    output
}

/// Creates an empty report directory for the test `id`
pub fn fresh_report_dir(id: &str) -> PathBuf {
    let dir = make_report_dir(id);
    if dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            panic!("failed to remove existing reports in {}: {e}", dir.display());
        }
    }
    dir
}

/// Reads the only report in `dir`
pub fn read_single_report(dir: &Path) -> serde_json::Value {
    let paths = crash_monitor::DirectoryPaths::new(dir, APP_NAME).expect("invalid report dir");
    let reports = paths.reports().expect("failed to list reports");
    assert_eq!(reports.len(), 1, "expected exactly one report in {}", dir.display());

    let buf = match std::fs::read(&reports[0]) {
        Ok(buf) => buf,
        Err(e) => panic!("failed to read report {}: {e}", reports[0].display()),
    };
    report_json::validate(&buf).expect("the report is not valid JSON");
    serde_json::from_slice(&buf).expect("failed to parse the report")
}

/// Crashes the harness with `signal` and returns the report it wrote
pub fn generate_report(id: &str, signal: Signal, use_thread: bool) -> serde_json::Value {
    capture_output();

    let dir = fresh_report_dir(id);
    let sig = signal.to_string();
    let mut args = vec!["--signal", sig.as_str()];
    if use_thread {
        args.push("--use-thread");
    }

    let output = run_harness(&dir, &args);
    // Ensure it was killed by the signal rather than exiting
    assert!(output.status.code().is_none());

    read_single_report(&dir)
}

pub fn assert_report(report: &serde_json::Value, signal: Signal) {
    assert_eq!(report["report"]["type"], "standard");
    // The kernel truncates process names
    let process_name = report["report"]["process_name"].as_str().unwrap_or_default();
    assert!(APP_NAME.starts_with(process_name) && !process_name.is_empty());

    let error = &report["crash"]["error"];
    assert_eq!(error["type"], "signal");
    assert_eq!(error["signal"]["name"], signal.report_name());

    #[cfg(target_arch = "x86_64")]
    {
        let code = match signal {
            Signal::Bus => Some("BUS_ADRERR"),
            Signal::Fpe => Some("FPE_INTDIV"),
            Signal::Illegal => Some("ILL_ILLOPN"),
            Signal::Segv => Some("SEGV_MAPERR"),
            Signal::Abort | Signal::Trap => None,
        };
        if let Some(code) = code {
            assert_eq!(error["signal"]["code_name"], code);
        }
    }

    let threads = report["crash"]["threads"]
        .as_array()
        .expect("threads were not written");
    let crashed: Vec<_> = threads.iter().filter(|t| t["crashed"] == true).collect();
    assert_eq!(crashed.len(), 1);
    assert!(crashed[0]["registers"]["basic"].is_object());

    assert!(report["system"]["system_name"].is_string());
    let stats = &report["system"]["application_stats"];
    assert_eq!(stats["application_active"], true);
    assert!(stats["launches_since_last_crash"].as_i64().unwrap() >= 1);
}

#[inline]
pub fn run_test(signal: Signal, counter: u32, use_thread: bool) -> serde_json::Value {
    let id = format!(
        "{}-{}-{}",
        signal,
        counter,
        if use_thread { "threaded" } else { "simple" }
    );
    let report = generate_report(&id, signal, use_thread);
    assert_report(&report, signal);
    report
}

/// Prints an indented outline of a JSON document as it is decoded
pub fn outline(data: &[u8]) -> Result<String, report_json::DecodeError> {
    use report_json::{DecodeCallbacks, JsonError};
    use std::fmt::Write;

    struct Outline {
        out: String,
        depth: usize,
    }

    impl Outline {
        fn line(&mut self, name: Option<&str>, value: fmt::Arguments<'_>) {
            let _ = writeln!(
                self.out,
                "{:indent$}{}{value}",
                "",
                name.map(|n| format!("{n}: ")).unwrap_or_default(),
                indent = self.depth * 2
            );
        }
    }

    impl DecodeCallbacks for Outline {
        fn on_boolean(&mut self, name: Option<&str>, value: bool) -> Result<(), JsonError> {
            self.line(name, format_args!("{value}"));
            Ok(())
        }

        fn on_integer(&mut self, name: Option<&str>, value: i64) -> Result<(), JsonError> {
            self.line(name, format_args!("{value}"));
            Ok(())
        }

        fn on_unsigned_integer(&mut self, name: Option<&str>, value: u64) -> Result<(), JsonError> {
            self.line(name, format_args!("{value}"));
            Ok(())
        }

        fn on_floating_point(&mut self, name: Option<&str>, value: f64) -> Result<(), JsonError> {
            self.line(name, format_args!("{value}"));
            Ok(())
        }

        fn on_null(&mut self, name: Option<&str>) -> Result<(), JsonError> {
            self.line(name, format_args!("null"));
            Ok(())
        }

        fn on_string(&mut self, name: Option<&str>, value: &str) -> Result<(), JsonError> {
            self.line(name, format_args!("{value:?}"));
            Ok(())
        }

        fn on_begin_object(&mut self, name: Option<&str>) -> Result<(), JsonError> {
            self.line(name, format_args!("{{"));
            self.depth += 1;
            Ok(())
        }

        fn on_begin_array(&mut self, name: Option<&str>) -> Result<(), JsonError> {
            self.line(name, format_args!("["));
            self.depth += 1;
            Ok(())
        }

        fn on_end_container(&mut self) -> Result<(), JsonError> {
            self.depth = self.depth.saturating_sub(1);
            Ok(())
        }
    }

    let mut outline = Outline {
        out: String::new(),
        depth: 0,
    };
    let mut buffer = vec![0u8; 64 * 1024];
    report_json::decode(data, &mut buffer, &mut outline)?;
    Ok(outline.out)
}

#[inline]
pub fn capture_output() {
    static SUB: std::sync::Once = std::sync::Once::new();

    SUB.call_once(|| {
        tracing_subscriber::fmt().with_test_writer().init();
    })
}
