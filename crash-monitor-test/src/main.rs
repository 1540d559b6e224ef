use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use crash_monitor_test::*;

#[derive(Parser)]
struct Command {
    /// The signal to raise
    #[clap(long, value_enum)]
    signal: Option<Signal>,
    /// Raises the signal on a separate thread rather than the main thread
    #[clap(long)]
    use_thread: bool,
    /// Reports a user exception with this name instead of crashing
    #[clap(long)]
    user: Option<String>,
    /// The directory reports and application state are written to
    #[clap(long, default_value = ".reports")]
    dir: PathBuf,
    /// Prints an outline of a report rather than crashing
    #[clap(long)]
    decode: Option<PathBuf>,
    /// Lists the signals that can be raised
    #[clap(long)]
    list: bool,
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        use crash_monitor::{
            AppIdentity, AppStateMonitor, MonitorKind, MonitorOrchestrator, OrchestratorBuilder,
            SystemMonitor, UserReport, UserReportedMonitor,
        };
        use std::sync::Arc;

        fn attach(dir: &std::path::Path) -> anyhow::Result<Arc<MonitorOrchestrator>> {
            let paths = crash_monitor::DirectoryPaths::new(dir, APP_NAME)?;
            let identity = AppIdentity {
                bundle_name: Some(APP_NAME.to_owned()),
                bundle_version: Some(env!("CARGO_PKG_VERSION").to_owned()),
                ..Default::default()
            };

            let orchestrator = OrchestratorBuilder::new(paths)
                .monitor(Arc::new(fault::SignalSource::default()))
                .monitor(Arc::new(UserReportedMonitor::default()))
                .monitor(Arc::new(SystemMonitor::with_identity(identity)))
                .monitor(Arc::new(AppStateMonitor::launch(dir.join("app-state.json"))))
                .build()?;

            let active = orchestrator.set_active_monitors(MonitorKind::PRODUCTION_SAFE_MINIMAL);
            log::info!("active monitors: {active}");
            anyhow::ensure!(
                active.contains(MonitorKind::SIGNAL | MonitorKind::USER_REPORTED),
                "the fault monitors are not active ({active}), is a debugger attached?"
            );

            Ok(orchestrator)
        }

        fn report_user(dir: &std::path::Path, name: &str) -> anyhow::Result<()> {
            let orchestrator = attach(dir)?;
            orchestrator.report_user_exception(
                UserReport {
                    name,
                    language: Some("rust"),
                    line_of_code: Some(concat!(file!(), ":", line!())),
                    custom_backtrace_json: None,
                },
                Some("reported by the test harness"),
                false,
            )?;
            Ok(())
        }

        fn crash(dir: &std::path::Path, signal: Signal, use_thread: bool) -> anyhow::Result<()> {
            let _orchestrator = attach(dir)?;
            let bus_path = dir.join("bus");

            let raise_signal = move || {
                // SAFETY: we're about to intentionally crash ourselves, none of
                // this is safe
                unsafe {
                    // Alternate stacks are per thread, the one installed when
                    // the monitors were enabled only covers the main thread
                    if let Err(err) = fault::install_sigaltstack() {
                        eprintln!("unable to install an alternate signal stack: {err}");
                    }

                    match signal {
                        Signal::Abort => raise::abort(),
                        Signal::Bus => {
                            if let Err(err) = raise::bus(&bus_path) {
                                eprintln!("unable to map {}: {err}", bus_path.display());
                            }
                        }
                        Signal::Fpe => raise::floating_point_exception(),
                        Signal::Illegal => raise::illegal_instruction(),
                        Signal::Segv => raise::segfault(),
                        Signal::Trap => raise::trap(),
                    }
                }
            };

            // Give the report some other threads to list
            for _ in 0..4 {
                std::thread::spawn(|| std::thread::sleep(std::time::Duration::MAX));
            }

            if use_thread {
                std::thread::spawn(raise_signal)
                    .join()
                    .map_err(|_panic| anyhow::anyhow!("the crashing thread panicked"))?;
            } else {
                raise_signal();
            }

            anyhow::bail!("we should have raised a signal and exited");
        }
    } else {
        fn report_user(_dir: &std::path::Path, _name: &str) -> anyhow::Result<()> {
            anyhow::bail!("fault capture is only implemented for Linux");
        }

        fn crash(_dir: &std::path::Path, _signal: Signal, _use_thread: bool) -> anyhow::Result<()> {
            anyhow::bail!("fault capture is only implemented for Linux");
        }
    }
}

fn real_main() -> anyhow::Result<()> {
    let cmd = Command::parse();

    if cmd.list {
        for variant in Signal::value_variants() {
            println!("{variant}");
        }
    } else if let Some(path) = &cmd.decode {
        let data = std::fs::read(path)?;
        print!("{}", outline(&data)?);
    } else if let Some(name) = &cmd.user {
        report_user(&cmd.dir, name)?;
    } else if let Some(signal) = cmd.signal {
        println!("pid: {}", std::process::id());
        crash(&cmd.dir, signal, cmd.use_thread)?;
    } else {
        anyhow::bail!("must pass --signal, --user, or --decode (see available signals with --list)");
    }

    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // A crash is expected to kill us, errors that prevent that from happening
    // need an exit code so the tests fail
    if let Err(e) = real_main() {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}
