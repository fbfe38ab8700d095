use std::thread::sleep;
use std::time::Duration;

/// Runs `f` up to `max_attempts` times, sleeping `interval` between attempts.
/// Returns the first success or the last error. `max_attempts` below one is
/// treated as one.
pub fn retry<F, T, E>(max_attempts: usize, interval: Duration, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
{
    let attempts = max_attempts.max(1);
    let mut last_err = None;
    for attempt in 0..attempts {
        match f() {
            Ok(result) => return Ok(result),
            Err(err) => {
                last_err = Some(err);
                if attempt + 1 < attempts {
                    sleep(interval);
                }
            }
        }
    }
    Err(last_err.expect("at least one attempt has run"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_success() {
        let result: Result<&str, &str> = retry(3, Duration::from_millis(1), || Ok("success"));
        assert_eq!(result, Ok("success"));
    }

    #[test]
    fn test_retry_exhausts_attempts() {
        let mut attempts = 0;
        let result: Result<(), &str> = retry(3, Duration::from_millis(1), || {
            attempts += 1;
            Err("failure")
        });
        assert_eq!(result, Err("failure"));
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_retry_recovers() {
        let mut attempts = 0;
        let result = retry(3, Duration::from_millis(1), || {
            attempts += 1;
            if attempts < 3 {
                Err("try again")
            } else {
                Ok("finally succeeded")
            }
        });
        assert_eq!(result, Ok("finally succeeded"));
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let result: Result<&str, &str> = retry(0, Duration::ZERO, || Ok("ran"));
        assert_eq!(result, Ok("ran"));
    }
}
