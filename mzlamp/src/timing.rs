//! Scoped elapsed-time measurement.
use std::time::{Duration, Instant};

use tracing::info;

/// A value together with the time it took to compute
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timed<T> {
    pub value: T,
    pub elapsed: Duration,
}

impl<T> Timed<T> {
    pub fn into_inner(self) -> T {
        self.value
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Timed<U> {
        Timed {
            value: f(self.value),
            elapsed: self.elapsed,
        }
    }
}

/// Run `f`, measuring how long it takes
pub fn timed<T>(f: impl FnOnce() -> T) -> Timed<T> {
    let start = Instant::now();
    let value = f();
    Timed {
        value,
        elapsed: start.elapsed(),
    }
}

/// Run `f` and log its elapsed time under `stage`
pub fn timed_stage<T>(stage: &str, f: impl FnOnce() -> T) -> Timed<T> {
    let result = timed(f);
    info!("{stage} Elapsed Time: {:0.3?}", result.elapsed);
    result
}
