// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};

use crate::cancel::Cancellation;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Why a supervised worker was asked to stop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Interruption {
    Cancelled,
    Timeout(Duration),
}

#[derive(Debug)]
pub struct Supervised<T> {
    /// Worker result. `None` if the worker did not finish within the grace period.
    pub output: Option<T>,

    pub interrupted: Option<Interruption>,
}

/// Run `function` on a worker thread, and wait for it here.
///
/// On cancellation or timeout `on_interrupt` is called once, and the worker gets `grace`
/// more time to return before it is abandoned.
pub fn supervise<F, T>(
    function: F,
    timeout: Option<Duration>,
    grace: Duration,
    cancellation: &Cancellation,
    mut on_interrupt: impl FnMut(Interruption),
) -> Result<Supervised<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (worker_sender, receiver) = mpsc::channel();

    let _worker = thread::Builder::new()
        .name("coverage-worker".into())
        .spawn(move || {
            let out = function();
            let _ = worker_sender.send(out);
        })?;

    let start = Instant::now();
    let mut interrupted = None;
    let mut abandon_at = None;

    loop {
        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(out) => {
                return Ok(Supervised {
                    output: Some(out),
                    interrupted,
                });
            }
            Err(RecvTimeoutError::Disconnected) => {
                bail!("coverage worker thread exited without a result");
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        if let Some(abandon_at) = abandon_at {
            if Instant::now() >= abandon_at {
                warn!("worker did not stop within {grace:?}, abandoning it");
                return Ok(Supervised {
                    output: None,
                    interrupted,
                });
            }

            continue;
        }

        let reason = if cancellation.is_cancelled() {
            Some(Interruption::Cancelled)
        } else {
            timeout
                .filter(|timeout| start.elapsed() >= *timeout)
                .map(Interruption::Timeout)
        };

        if let Some(reason) = reason {
            info!("stopping worker: {reason:?}");
            on_interrupt(reason);

            interrupted = Some(reason);
            abandon_at = Some(Instant::now() + grace);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use anyhow::Result;

    use super::*;

    const GRACE: Duration = Duration::from_secs(5);

    // Worker that runs until told to stop.
    fn stoppable() -> (Arc<AtomicBool>, impl FnOnce() -> u32 + Send + 'static) {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();

        let worker = move || {
            while !flag.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
            7
        };

        (stop, worker)
    }

    #[test]
    fn test_finished_worker() -> Result<()> {
        let supervised = supervise(|| 42, None, GRACE, &Cancellation::new(), |_| {})?;

        assert_eq!(supervised.output, Some(42));
        assert_eq!(supervised.interrupted, None);

        Ok(())
    }

    #[test]
    fn test_timeout_interrupts_worker() -> Result<()> {
        let (stop, worker) = stoppable();
        let timeout = Duration::from_millis(100);

        let supervised = supervise(worker, Some(timeout), GRACE, &Cancellation::new(), |_| {
            stop.store(true, Ordering::SeqCst)
        })?;

        assert_eq!(supervised.output, Some(7));
        assert_eq!(supervised.interrupted, Some(Interruption::Timeout(timeout)));

        Ok(())
    }

    #[test]
    fn test_cancellation_interrupts_worker() -> Result<()> {
        let (stop, worker) = stoppable();
        let cancellation = Cancellation::new();
        cancellation.cancel();

        let supervised = supervise(worker, None, GRACE, &cancellation, |reason| {
            assert_eq!(reason, Interruption::Cancelled);
            stop.store(true, Ordering::SeqCst)
        })?;

        assert_eq!(supervised.output, Some(7));
        assert_eq!(supervised.interrupted, Some(Interruption::Cancelled));

        Ok(())
    }

    #[test]
    fn test_unresponsive_worker_is_abandoned() -> Result<()> {
        let (stop, worker) = stoppable();
        let timeout = Duration::from_millis(50);
        let grace = Duration::from_millis(100);

        let supervised = supervise(worker, Some(timeout), grace, &Cancellation::new(), |_| {})?;

        assert_eq!(supervised.output, None);
        assert_eq!(supervised.interrupted, Some(Interruption::Timeout(timeout)));

        // Let the worker thread exit.
        stop.store(true, Ordering::SeqCst);

        Ok(())
    }

    #[test]
    fn test_panicking_worker() {
        let result = supervise(
            || -> u32 { panic!("worker failed") },
            None,
            GRACE,
            &Cancellation::new(),
            |_| {},
        );

        assert!(result.is_err());
    }
}
