//! Run-time ceiling and guaranteed process termination.
//!
//! The [`Watchdog`] runs on its own OS thread so it fires even if the async
//! runtime is wedged. [`exit_process`] escalates from a runtime shutdown to
//! `process::exit` to killing the process from the outside.

use anyhow::{Context, Result};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

/// How long tasks get to wind down when the runtime is dropped.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How long `process::exit` gets before the process kills itself.
const EXIT_GRACE: Duration = Duration::from_secs(10);

/// Terminates the process if it is still running after a time limit.
///
/// Dropping or disarming the watchdog cancels it.
pub struct Watchdog {
    disarm: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Force-exit the process with status 1 once `limit` has elapsed.
    pub fn arm(limit: Duration) -> Result<Self> {
        Self::arm_with(limit, move || {
            tracing::error!(
                "Maximum runtime of {}s exceeded, terminating process",
                limit.as_secs()
            );
            force_exit(1)
        })
    }

    /// Run `on_expiry` once `limit` has elapsed unless disarmed first.
    pub fn arm_with<F>(limit: Duration, on_expiry: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(limit) {
                    on_expiry();
                }
            })
            .context("Failed to start watchdog thread")?;

        tracing::info!("Watchdog armed: {}s maximum runtime", limit.as_secs());
        Ok(Self {
            disarm: Some(tx),
            thread: Some(thread),
        })
    }

    /// Cancel the watchdog and wait for its thread.
    pub fn disarm(mut self) {
        self.cancel();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    fn cancel(&mut self) {
        // Disconnecting the channel wakes the thread
        self.disarm.take();
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Shut the runtime down and exit with `code`, escalating if that stalls.
pub fn exit_process(runtime: tokio::runtime::Runtime, code: i32) -> ! {
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    force_exit(code)
}

/// `process::exit`, backed by a thread that kills the process if exit hangs.
pub fn force_exit(code: i32) -> ! {
    let _ = std::thread::Builder::new()
        .name("exit-backstop".to_string())
        .spawn(|| {
            std::thread::sleep(EXIT_GRACE);
            kill_self()
        });

    std::process::exit(code)
}

fn kill_self() -> ! {
    let pid = std::process::id().to_string();

    #[cfg(windows)]
    let status = std::process::Command::new("taskkill")
        .args(["/F", "/PID", &pid])
        .status();
    #[cfg(not(windows))]
    let status = std::process::Command::new("kill")
        .args(["-KILL", &pid])
        .status();

    if let Err(e) = status {
        eprintln!("Failed to kill process {}: {}", pid, e);
    }
    std::process::abort()
}
