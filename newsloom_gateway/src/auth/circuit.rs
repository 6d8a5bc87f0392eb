use std::sync::Mutex;
use std::time::{Duration, Instant};

use newsloom_core::observability::metrics::AuthPlaneMetrics;
use tracing::warn;

const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
  Closed,
  Open,
  HalfOpen,
}

impl CircuitState {
  fn as_str(&self) -> &'static str {
    match self {
      CircuitState::Closed => "closed",
      CircuitState::Open => "open",
      CircuitState::HalfOpen => "half_open",
    }
  }
}

#[derive(Debug)]
enum Inner {
  Closed { consecutive_failures: u32 },
  Open { until: Instant },
  HalfOpen,
}

/// Consecutive-failure circuit breaker for the auth service transport.
///
/// Open means validation calls fail immediately with a transport-class
/// error instead of waiting out another timeout, which keeps hybrid
/// fallback fast while the auth service is down. One probe is let through
/// per cooldown window.
pub struct CircuitBreaker {
  component: &'static str,
  failure_threshold: u32,
  cooldown: Duration,
  inner: Mutex<Inner>,
}

impl CircuitBreaker {
  pub fn new(component: &'static str) -> Self {
    Self::with_settings(component, DEFAULT_FAILURE_THRESHOLD, DEFAULT_COOLDOWN)
  }

  pub fn with_settings(
    component: &'static str,
    failure_threshold: u32,
    cooldown: Duration,
  ) -> Self {
    Self {
      component,
      failure_threshold,
      cooldown,
      inner: Mutex::new(Inner::Closed {
        consecutive_failures: 0,
      }),
    }
  }

  pub fn state(&self) -> CircuitState {
    match *self.inner.lock().expect("circuit mutex poisoned") {
      Inner::Closed { .. } => CircuitState::Closed,
      Inner::Open { .. } => CircuitState::Open,
      Inner::HalfOpen => CircuitState::HalfOpen,
    }
  }

  /// Whether a call may proceed. An expired open window admits exactly
  /// one probe by moving to half-open.
  pub fn allow(&self) -> bool {
    let mut inner = self.inner.lock().expect("circuit mutex poisoned");
    match *inner {
      Inner::Closed { .. } | Inner::HalfOpen => true,
      Inner::Open { until } => {
        if Instant::now() >= until {
          *inner = Inner::HalfOpen;
          self.transitioned(CircuitState::HalfOpen);
          true
        } else {
          false
        }
      }
    }
  }

  /// The call reached the service (any verdict, including 401).
  pub fn record_success(&self) {
    let mut inner = self.inner.lock().expect("circuit mutex poisoned");
    match *inner {
      Inner::Closed {
        consecutive_failures: 0,
      } => {}
      _ => {
        *inner = Inner::Closed {
          consecutive_failures: 0,
        };
        self.transitioned(CircuitState::Closed);
      }
    }
  }

  /// The call failed at the transport level.
  pub fn record_failure(&self) {
    let mut inner = self.inner.lock().expect("circuit mutex poisoned");
    let next = match *inner {
      Inner::Closed {
        consecutive_failures,
      } => {
        let failures = consecutive_failures + 1;
        if failures >= self.failure_threshold {
          Some(Inner::Open {
            until: Instant::now() + self.cooldown,
          })
        } else {
          *inner = Inner::Closed {
            consecutive_failures: failures,
          };
          None
        }
      }
      // A failed probe re-arms the full cooldown.
      Inner::HalfOpen => Some(Inner::Open {
        until: Instant::now() + self.cooldown,
      }),
      Inner::Open { .. } => None,
    };
    if let Some(open) = next {
      *inner = open;
      warn!(component = self.component, "circuit opened");
      self.transitioned(CircuitState::Open);
    }
  }

  fn transitioned(&self, to: CircuitState) {
    AuthPlaneMetrics::circuit_transition(self.component, to.as_str());
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn breaker() -> CircuitBreaker {
    CircuitBreaker::with_settings("auth_client", 3, Duration::from_millis(50))
  }

  #[test]
  fn opens_after_threshold_consecutive_failures() {
    let breaker = breaker();
    breaker.record_failure();
    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(breaker.allow());

    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!breaker.allow());
  }

  #[test]
  fn success_resets_the_failure_count() {
    let breaker = breaker();
    breaker.record_failure();
    breaker.record_failure();
    breaker.record_success();
    breaker.record_failure();
    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Closed);
  }

  #[test]
  fn cooldown_admits_one_probe_then_reopens_or_closes() {
    let breaker = breaker();
    for _ in 0..3 {
      breaker.record_failure();
    }
    assert!(!breaker.allow());

    std::thread::sleep(Duration::from_millis(60));
    assert!(breaker.allow());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    // Failed probe re-opens immediately.
    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!breaker.allow());

    std::thread::sleep(Duration::from_millis(60));
    assert!(breaker.allow());
    breaker.record_success();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(breaker.allow());
  }

  #[test]
  fn reaching_the_service_counts_as_success_even_when_unauthorized() {
    // A 401 proves the transport works; only transport failures trip the
    // breaker. The caller encodes that by recording success for verdicts.
    let breaker = breaker();
    for _ in 0..10 {
      breaker.record_success();
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
  }
}
