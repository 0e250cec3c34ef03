use std::{
    thread,
    time::{Duration, Instant, SystemTime},
};

pub fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Sleeps until `next_deadline`, then moves it one `period` ahead.
/// A loop that is already late restarts its schedule from now.
pub fn pace(next_deadline: &mut Instant, period: Duration) {
    let now = Instant::now();
    if now < *next_deadline {
        thread::sleep(*next_deadline - now);
        *next_deadline += period;
    } else {
        *next_deadline = now + period;
    }
}
