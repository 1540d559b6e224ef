#![cfg(any(target_os = "linux", target_os = "android"))]

use crash_monitor_test::*;

fn run_threaded_test(signal: Signal, count: u32) {
    std::thread::scope(|s| {
        for i in 0..count {
            s.spawn(move || run_test(signal, i, true));
        }
    });
}

#[test]
fn abort_simple() {
    run_test(Signal::Abort, 0, false);
}

#[test]
fn abort_threaded() {
    run_threaded_test(Signal::Abort, 4);
}

#[test]
fn bus_simple() {
    run_test(Signal::Bus, 0, false);
}

#[test]
fn bus_threaded() {
    run_threaded_test(Signal::Bus, 4);
}

#[test]
fn fpe_simple() {
    run_test(Signal::Fpe, 0, false);
}

#[test]
fn fpe_threaded() {
    run_threaded_test(Signal::Fpe, 4);
}

#[test]
fn illegal_simple() {
    run_test(Signal::Illegal, 0, false);
}

#[test]
fn illegal_threaded() {
    run_threaded_test(Signal::Illegal, 4);
}

#[test]
fn segfault_simple() {
    run_test(Signal::Segv, 0, false);
}

#[test]
fn segfault_threaded() {
    run_threaded_test(Signal::Segv, 4);
}

#[test]
fn trap_simple() {
    run_test(Signal::Trap, 0, false);
}

#[test]
fn trap_threaded() {
    run_threaded_test(Signal::Trap, 4);
}

/// Every other thread of the process is listed after the crashed one
#[test]
fn other_threads_are_listed() {
    let report = run_test(Signal::Segv, 100, true);
    let threads = report["crash"]["threads"].as_array().unwrap();
    assert!(threads.len() > 1);

    assert_eq!(threads[0]["crashed"], true);
    assert!(threads[1..].iter().all(|t| t["crashed"] == false));
}

/// The fault comes from the load itself, not a panic on the way there
#[test]
fn segfault_reads_address_zero() {
    use std::os::unix::process::ExitStatusExt;

    capture_output();
    let dir = fresh_report_dir("segv-address");
    let output = run_harness(&dir, &["--signal", "segv"]);
    assert_eq!(output.status.signal(), Some(libc::SIGSEGV));
    assert!(!String::from_utf8_lossy(&output.stderr).contains("panicked"));

    let report = read_single_report(&dir);
    assert_report(&report, Signal::Segv);
    if cfg!(any(target_arch = "x86_64", target_arch = "aarch64")) {
        assert_eq!(report["crash"]["error"]["address"], 0);
    }
}
