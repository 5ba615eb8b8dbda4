use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    /// Rolling window of recent outcomes, `true` meaning "counted failure".
    window: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    half_open_probe_in_flight: bool,
}

/// Per-endpoint failure counter and open/half-open/closed state machine,
/// tracking error rate over a sliding window.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    window_len: Duration,
    min_samples: usize,
    error_threshold: f64,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        CircuitBreaker {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window: VecDeque::with_capacity(32),
                opened_at: None,
                half_open_probe_in_flight: false,
            }),
            window_len: Duration::from_secs(2),
            min_samples: 20,
            error_threshold: 0.5,
            cooldown: Duration::from_secs(5),
        }
    }

    /// Whether a new request may be dispatched right now. In `HalfOpen`
    /// state, at most one caller is told `true`; subsequent callers are
    /// refused until that probe resolves.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if inner.opened_at.map_or(false, |t| t.elapsed() >= self.cooldown) {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_probe_in_flight {
                    false
                } else {
                    inner.half_open_probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.push(&mut inner, false);
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.half_open_probe_in_flight = false;
                inner.window.clear();
            }
            _ => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.push(&mut inner, true);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_probe_in_flight = false;
            }
            CircuitState::Closed => {
                let total = inner.window.len();
                let failures = inner.window.iter().filter(|(_, failed)| *failed).count();
                if total >= self.min_samples
                    && (failures as f64 / total as f64) >= self.error_threshold
                {
                    tracing::warn!(total, failures, "circuit breaker tripping open");
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    fn push(&self, inner: &mut Inner, failed: bool) {
        let now = Instant::now();
        inner.window.push_back((now, failed));
        while let Some((t, _)) = inner.window.front() {
            if now.duration_since(*t) > self.window_len {
                inner.window.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        CircuitBreaker::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_open_after_error_threshold_and_probes_after_cooldown() {
        let breaker = CircuitBreaker {
            cooldown: Duration::from_millis(1),
            ..CircuitBreaker::new()
        };
        for _ in 0..20 {
            assert!(breaker.allow_request());
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());

        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(!breaker.allow_request(), "only one probe permitted while half-open");
    }

    #[test]
    fn half_open_success_closes_the_circuit() {
        let breaker = CircuitBreaker {
            cooldown: Duration::from_millis(1),
            ..CircuitBreaker::new()
        };
        for _ in 0..20 {
            breaker.allow_request();
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.allow_request());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
