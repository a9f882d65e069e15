//! Time conversion helpers

/// Convert a `chrono::Duration` into fractional seconds.
///
/// Returns `None` if the number of nanoseconds in the duration overflows.
pub fn duration_to_seconds(duration: chrono::Duration) -> Option<f64> {
    duration.num_nanoseconds().map(|ns| ns as f64 * 1e-9)
}
