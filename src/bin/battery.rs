//! Battery: sample harness for the vanos shim.
//!
//! `run` (default) bootstraps, starts a worker that releases a semaphore the
//! main thread is suspended on, then tears everything down. `idle` waits for
//! `SIGINT` so the interrupt trap can be observed. `fault` enters a mutex
//! that was never initialized.

use clap::{Parser, ValueEnum};
use std::io::{self, Write};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vanos::{
    MutexHandle, OsConfig, SemaphoreHandle, ThreadHandle, ThreadPriority, os_init,
};

#[derive(Parser, Debug)]
#[command(name = "battery", version, about = "vanos sample harness")]
struct Cli {
    /// What to exercise
    #[arg(value_enum, default_value_t = Mode::Run)]
    mode: Mode,

    /// Apply SCHED_RR with the worker's priority (needs CAP_SYS_NICE)
    #[arg(long)]
    realtime: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Suspend main on a semaphore until the worker releases it
    Run,
    /// Print `ready` and wait for SIGINT
    Idle,
    /// Enter an uninitialized mutex
    Fault,
}

fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    match cli.mode {
        Mode::Run => run(cli.realtime),
        Mode::Idle => idle(),
        Mode::Fault => fault(),
    }
}

fn run(realtime: bool) {
    let os = vanos::Os::builder()
        .config(OsConfig::default().realtime_scheduling(realtime))
        .build();

    let suspend = Arc::new(SemaphoreHandle::new(&os));
    suspend.init(0);

    let bat = ThreadHandle::new(&os);
    let resume = Arc::clone(&suspend);
    os.thread_start(&bat, "bat", ThreadPriority::Foreground, move || {
        println!("[bat,exit]");
        resume.release();
    });

    println!("[main,suspend]");
    suspend.wait();
    println!("[main,resume]");

    bat.destroy();
    suspend.destroy();
    os.exit();
}

fn idle() {
    let _os = os_init();
    let mut stdout = io::stdout().lock();
    // The parent test waits on this line before sending SIGINT.
    let _ = writeln!(stdout, "ready");
    let _ = stdout.flush();
    drop(stdout);
    loop {
        std::thread::park();
    }
}

fn fault() {
    let os = os_init();
    let cs = MutexHandle::new(&os);
    cs.enter();
}
