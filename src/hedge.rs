//! Hedged execution: races redundant attempts with staggered starts to
//! reduce tail latency.
//!
//! Racing genuinely concurrent attempts means real OS threads and real
//! wall-clock scheduling; `clock::freeze` governs the breaker's own
//! admission/threshold logic but cannot meaningfully govern staggered
//! thread starts, so this module reads `std::time::Instant` directly.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A best-effort, cooperative stop signal shared by every attempt in one
/// race. Attempts must poll it at their own checkpoints; the executor never
/// kills a thread.
#[derive(Debug, Default)]
pub struct CancelToken(AtomicBool);

impl CancelToken {
    fn new() -> Self {
        CancelToken(AtomicBool::new(false))
    }

    /// Whether the attempt holding this token should stop at its next
    /// checkpoint.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// The result of racing a set of hedged attempts.
pub enum HedgeOutcome<T, E> {
    /// The first success observed, in arrival order.
    Success(T),
    /// Every attempt returned an error; carries the last one observed.
    AllFailed(E),
    /// The call-wide deadline elapsed before any attempt succeeded.
    TimedOut,
}

impl<T, E> fmt::Debug for HedgeOutcome<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HedgeOutcome::Success(_) => f.write_str("Success(..)"),
            HedgeOutcome::AllFailed(_) => f.write_str("AllFailed(..)"),
            HedgeOutcome::TimedOut => f.write_str("TimedOut"),
        }
    }
}

/// One attempt in a race: either the same operation invoked `max_requests`
/// times, or a distinct backend per attempt.
pub type Attempt<T, E> = Arc<dyn Fn(&CancelToken) -> Result<T, E> + Send + Sync>;

/// Races `attempts` with staggered starts, `delay` apart, under an optional
/// overall `deadline`. Returns the first success observed (not necessarily
/// the first started); ties are broken by arrival order since that's the
/// order `recv` naturally returns messages in.
pub fn race<T, E>(attempts: Vec<Attempt<T, E>>, delay: Duration, deadline: Option<Duration>) -> HedgeOutcome<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    if attempts.is_empty() {
        return HedgeOutcome::TimedOut;
    }

    let cancel = Arc::new(CancelToken::new());
    let (tx, rx) = mpsc::channel();
    let start = Instant::now();
    let deadline_at = deadline.map(|d| start + d);

    let spawn = |index: usize,
                 attempts: &[Attempt<T, E>],
                 tx: &mpsc::Sender<Result<T, E>>,
                 cancel: &Arc<CancelToken>| {
        let op = attempts[index].clone();
        let tx = tx.clone();
        let cancel = cancel.clone();
        std::thread::spawn(move || {
            let result = op(&cancel);
            let _ = tx.send(result);
        });
    };

    let mut spawned = 0usize;
    let mut outstanding = 0usize;
    spawn(0, &attempts, &tx, &cancel);
    spawned += 1;
    outstanding += 1;
    let mut next_spawn_due = start + delay;
    let mut last_err = None;

    loop {
        let now = Instant::now();
        if let Some(at) = deadline_at {
            if now >= at {
                cancel.cancel();
                return HedgeOutcome::TimedOut;
            }
        }

        let spawn_wait = if spawned < attempts.len() {
            next_spawn_due.saturating_duration_since(now)
        } else {
            Duration::from_secs(3600)
        };
        let deadline_wait = deadline_at
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or(Duration::from_secs(3600));
        let wait = spawn_wait.min(deadline_wait);

        match rx.recv_timeout(wait) {
            Ok(Ok(value)) => {
                cancel.cancel();
                return HedgeOutcome::Success(value);
            }
            Ok(Err(err)) => {
                outstanding -= 1;
                last_err = Some(err);
                if outstanding == 0 && spawned >= attempts.len() {
                    return match last_err {
                        Some(err) => HedgeOutcome::AllFailed(err),
                        None => HedgeOutcome::TimedOut,
                    };
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if spawned < attempts.len() && Instant::now() >= next_spawn_due {
                    spawn(spawned, &attempts, &tx, &cancel);
                    spawned += 1;
                    outstanding += 1;
                    next_spawn_due = start + delay * (spawned as u32);
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                return match last_err {
                    Some(err) => HedgeOutcome::AllFailed(err),
                    None => HedgeOutcome::TimedOut,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt<T, E>(value: Result<T, E>, after: Duration) -> Attempt<T, E>
    where
        T: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        Arc::new(move |_cancel: &CancelToken| {
            std::thread::sleep(after);
            value.clone()
        })
    }

    #[test]
    fn first_success_by_arrival_wins() {
        let attempts = vec![
            attempt::<&str, &str>(Ok("slow"), Duration::from_millis(200)),
            attempt::<&str, &str>(Ok("mid"), Duration::from_millis(80)),
            attempt::<&str, &str>(Ok("fast"), Duration::from_millis(40)),
        ];
        match race(attempts, Duration::from_millis(50), Some(Duration::from_secs(2))) {
            HedgeOutcome::Success(value) => assert_eq!("fast", value),
            _ => panic!("expected success"),
        }
    }

    #[test]
    fn all_failing_reports_last_error() {
        let attempts: Vec<Attempt<i32, &str>> = vec![
            attempt(Err("one"), Duration::from_millis(5)),
            attempt(Err("two"), Duration::from_millis(5)),
        ];
        match race(attempts, Duration::from_millis(10), Some(Duration::from_secs(1))) {
            HedgeOutcome::AllFailed(_) => {}
            _ => panic!("expected all-failed"),
        }
    }

    #[test]
    fn deadline_expiry_times_out() {
        let attempts: Vec<Attempt<i32, &str>> = vec![attempt(Ok(1), Duration::from_millis(500))];
        match race(attempts, Duration::from_millis(50), Some(Duration::from_millis(20))) {
            HedgeOutcome::TimedOut => {}
            _ => panic!("expected timeout"),
        }
    }
}
