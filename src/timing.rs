use std::time::Duration;

/// Multiple of the settle interval waited after a session fault.
pub const BACKOFF_SCALE: u32 = 3;

/// A-priori duration of resolving `chapter_count` chapters.
pub fn estimate(chapter_count: usize, settle: Duration) -> Duration {
    let chapters = u32::try_from(chapter_count).unwrap_or(u32::MAX);
    settle.saturating_mul(chapters).saturating_mul(2)
}

pub fn backoff(settle: Duration) -> Duration {
    settle.saturating_mul(BACKOFF_SCALE)
}

/// Delay between two chapters.
pub fn pacing(settle: Duration) -> Duration {
    settle / 10
}

pub fn pretty_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    match (hours, minutes) {
        (0, 0) => format!("{secs} seconds"),
        (0, 1) => format!("1 minute {secs} seconds"),
        (0, _) => format!("{minutes} minutes {secs} seconds"),
        (1, _) => format!("1 hour {minutes} minutes {secs} seconds"),
        _ => format!("{hours} hours {minutes} minutes {secs} seconds"),
    }
}

/// Human summary of elapsed time against the estimate.
pub fn schedule_report(elapsed: Duration, estimate: Duration) -> String {
    if elapsed <= estimate {
        format!("ahead of schedule by {}", pretty_duration(estimate - elapsed))
    } else {
        format!("behind schedule by {}", pretty_duration(elapsed - estimate))
    }
}
