//! Periodic run-loop with cooperative shutdown.

use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TryRecvError};
use tracing::{error, info, warn};

use crate::sync::engine::SyncEngine;

/// Requests shutdown of a run-loop. Dropping the handle also triggers it.
#[derive(Debug)]
pub struct ShutdownHandle {
    sender: Option<Sender<()>>,
}

impl ShutdownHandle {
    pub fn trigger(&mut self) {
        // Disconnecting the channel wakes every waiting receiver.
        self.sender.take();
    }
}

impl Drop for ShutdownHandle {
    fn drop(&mut self) {
        self.trigger();
    }
}

/// Observes a [`ShutdownHandle`].
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    receiver: Receiver<()>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }
}

pub fn shutdown_channel() -> (ShutdownHandle, ShutdownSignal) {
    let (sender, receiver) = bounded(0);
    (
        ShutdownHandle {
            sender: Some(sender),
        },
        ShutdownSignal { receiver },
    )
}

/// Run one cycle now and then one per `interval` until shutdown.
///
/// Ticks missed while a cycle runs collapse into a single pending tick.
/// Failed cycles are logged and the loop keeps going. Returns the number
/// of cycles started.
pub fn run_periodic(engine: &SyncEngine, interval: Duration, shutdown: &ShutdownSignal) -> usize {
    let ticker = tick(interval);
    let mut cycles = 0;

    loop {
        cycles += 1;
        match engine.run_cycle() {
            Ok(report) if report.is_success() => {}
            Ok(report) => warn!(
                failed = report.uploads.failed(),
                "sync cycle finished with failures"
            ),
            Err(e) => error!(error = %e, "sync cycle failed"),
        }

        if shutdown.is_triggered() {
            break;
        }

        info!(interval_secs = interval.as_secs(), "waiting for next cycle");
        select! {
            recv(shutdown.receiver) -> _ => break,
            recv(ticker) -> _ => {}
        }
    }

    info!(cycles, "run loop stopped");
    cycles
}
