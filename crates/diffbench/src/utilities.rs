use crate::errors::BenchResult;
use std::process::Child;
use std::time::Instant;

/// Call `f` once to warm up, then once more under the clock.
/// Returns the measured call's wall time in seconds.
pub fn benchmark_fn<F>(mut f: F) -> BenchResult<f64>
where
    F: FnMut() -> BenchResult<()>,
{
    f()?;
    let start = Instant::now();
    f()?;
    Ok(start.elapsed().as_secs_f64())
}

/// Wait for a child process, returning whether it exited successfully
pub fn await_process_exit(child: &mut Child) -> bool {
    match child.wait() {
        Ok(status) => {
            tracing::debug!("Child exited with status: {}", status);
            status.success()
        }
        Err(e) => {
            tracing::error!("Error waiting for child: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BenchError;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_benchmark_fn_times_second_call() {
        let mut calls = 0;
        let secs = benchmark_fn(|| {
            calls += 1;
            if calls == 2 {
                thread::sleep(Duration::from_millis(20));
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(calls, 2);
        assert!(secs >= 0.02);
    }

    #[test]
    fn test_benchmark_fn_stops_on_warmup_failure() {
        let mut calls = 0;
        let result = benchmark_fn(|| {
            calls += 1;
            Err(BenchError::OutOfMemory("warm-up".to_string()))
        });
        assert!(matches!(result, Err(BenchError::OutOfMemory(_))));
        assert_eq!(calls, 1);
    }
}
