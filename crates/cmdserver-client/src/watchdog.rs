use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::launcher::Terminate;

/// Terminates a server if a blocking operation outlives its deadline.
///
/// Blocking pipe reads cannot be cancelled, so expiry is enforced by
/// killing the server: the pending read then fails and the caller checks
/// [`Watchdog::disarm`] to tell a timeout apart from a real fault.
pub(crate) struct Watchdog {
    done: Option<mpsc::Sender<()>>,
    fired: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    budget: Duration,
}

impl Watchdog {
    /// Arm a watchdog that fires at `deadline`.
    pub(crate) fn arm(deadline: Instant, terminator: Arc<dyn Terminate>) -> Self {
        let budget = deadline.saturating_duration_since(Instant::now());
        let (done, expired) = mpsc::channel::<()>();
        let fired = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&fired);
        let handle = thread::Builder::new()
            .name("cmdserver-watchdog".to_string())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = expired.recv_timeout(budget) {
                    warn!(?budget, "deadline expired, terminating command server");
                    flag.store(true, Ordering::SeqCst);
                    terminator.terminate();
                }
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(error = %err, "failed to spawn watchdog thread; deadline not enforced");
                None
            }
        };

        Self {
            done: Some(done),
            fired,
            handle,
            budget,
        }
    }

    /// Stop the watchdog. Returns true if it fired.
    pub(crate) fn disarm(&mut self) -> bool {
        self.done.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.fired.load(Ordering::SeqCst)
    }

    /// The time allowed when the watchdog was armed.
    pub(crate) fn budget(&self) -> Duration {
        self.budget
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[derive(Default)]
    struct CountingTerminator(AtomicUsize);

    impl Terminate for CountingTerminator {
        fn terminate(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn fires_after_deadline() {
        let terminator = Arc::new(CountingTerminator::default());
        let mut watchdog = Watchdog::arm(
            Instant::now() + Duration::from_millis(20),
            terminator.clone(),
        );
        thread::sleep(Duration::from_millis(200));
        assert!(watchdog.disarm());
        assert_eq!(terminator.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disarm_before_deadline_does_not_fire() {
        let terminator = Arc::new(CountingTerminator::default());
        let mut watchdog = Watchdog::arm(
            Instant::now() + Duration::from_secs(30),
            terminator.clone(),
        );
        assert!(!watchdog.disarm());
        assert_eq!(terminator.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn past_deadline_fires_immediately() {
        let terminator = Arc::new(CountingTerminator::default());
        let mut watchdog = Watchdog::arm(Instant::now(), terminator.clone());
        assert_eq!(watchdog.budget(), Duration::ZERO);
        thread::sleep(Duration::from_millis(100));
        assert!(watchdog.disarm());
        assert_eq!(terminator.0.load(Ordering::SeqCst), 1);
    }
}
