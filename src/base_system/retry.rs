//! 有界重试：固定间隔、最多 N 次尝试。

use std::fmt::Display;
use std::thread;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero behaves like one.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

/// Runs `op` until it succeeds or the policy's attempts are exhausted; the
/// last error is returned. `op` receives the 1-based attempt number.
pub fn retry_with_backoff<T, E, F>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(v) => return Ok(v),
            Err(err) if attempt < attempts => {
                warn!("{what} 第 {attempt}/{attempts} 次失败: {err}，{:?} 后重试", policy.delay);
                if !policy.delay.is_zero() {
                    thread::sleep(policy.delay);
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::ZERO)
    }

    #[test]
    fn returns_first_success() {
        let mut calls = 0;
        let out: Result<u32, String> = retry_with_backoff(quick(5), "op", |n| {
            calls += 1;
            if n < 3 { Err(format!("fail {n}")) } else { Ok(n) }
        });
        assert_eq!(out.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn gives_up_with_last_error() {
        let mut calls = 0;
        let out: Result<(), String> = retry_with_backoff(quick(2), "op", |n| {
            calls += 1;
            Err(format!("fail {n}"))
        });
        assert_eq!(out.unwrap_err(), "fail 2");
        assert_eq!(calls, 2);
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let mut calls = 0;
        let _: Result<(), &str> = retry_with_backoff(quick(0), "op", |_| {
            calls += 1;
            Err("nope")
        });
        assert_eq!(calls, 1);
    }
}
