//! Human-readable duration formatting for run summaries and logs

use std::time::Duration;

/// Format selection thresholds (seconds)
const SHORT_FORMAT_MAX: f64 = 100.0; // < 100s → X.XXs
const MEDIUM_FORMAT_MAX: f64 = 6000.0; // < 100m → M:SS.Xs
const LONG_FORMAT_MAX: f64 = 90000.0; // < 25h → H:MM:SS
                                       // >= 25h → X.XXd

/// Format an elapsed duration, picking the format by magnitude
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use catsync_common::human_time::format_elapsed;
///
/// assert_eq!(format_elapsed(Duration::from_millis(4_250)), "4.25s");
/// assert_eq!(format_elapsed(Duration::from_secs(330)), "5:30.0s");
/// assert_eq!(format_elapsed(Duration::from_secs(3661 * 2)), "2:02:02");
/// assert_eq!(format_elapsed(Duration::from_secs(86_400 * 2)), "2d");
/// ```
pub fn format_elapsed(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs_f64();

    if seconds < SHORT_FORMAT_MAX {
        format!("{:.2}s", seconds)
    } else if seconds < MEDIUM_FORMAT_MAX {
        let minutes = (seconds / 60.0).floor() as u64;
        let secs = seconds - (minutes as f64 * 60.0);
        format!("{}:{:04.1}s", minutes, secs)
    } else if seconds < LONG_FORMAT_MAX {
        let whole = seconds as u64;
        format!("{}:{:02}:{:02}", whole / 3600, (whole % 3600) / 60, whole % 60)
    } else {
        let days = seconds / 86400.0;
        let rounded = (days * 100.0).round() / 100.0;
        if (rounded - rounded.floor()).abs() < 0.001 {
            format!("{:.0}d", rounded)
        } else {
            format!("{:.2}d", rounded)
        }
    }
}
