//! Cross-crate integration tests for limn: real loopback-TCP replication and
//! property tests for the framing layer. See `tests/`.

use std::{
    thread,
    time::{Duration, Instant},
};

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}
