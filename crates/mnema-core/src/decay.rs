//! Decay & Scoring Primitives
//!
//! Edge importance decays exponentially against the *newest* edge timestamp
//! in the memory group rather than wall-clock now, so a dormant group does
//! not rot while nobody writes to it.
//!
//! All time is ms-precision integer unix time.

/// Milliseconds per day
pub const MS_PER_DAY: f64 = 86_400_000.0;

/// Current unix time in milliseconds.
#[inline]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Convert a half-life in days to milliseconds.
#[inline]
pub fn days_to_ms(days: f64) -> f64 {
    days * MS_PER_DAY
}

/// Decay constant λ for a half-life given in days.
///
/// `half_life_days == 0.0` disables decay (λ = 0).
#[inline]
pub fn lambda(half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return 0.0;
    }
    std::f64::consts::LN_2 / days_to_ms(half_life_days)
}

/// Decay-adjusted edge importance: `w·c·exp(−λ·max(0, max_unix − unix))`.
///
/// `max_unix` is the latest edge timestamp within the memory group (0 when
/// the group has no edges). Future-dated edges clamp to Δt = 0 instead of
/// amplifying.
#[inline]
pub fn thickness(weight: f64, confidence: f64, edge_unix: i64, max_unix: i64, lambda: f64) -> f64 {
    let dt_ms = (max_unix - edge_unix).max(0) as f64;
    weight * confidence * (-lambda * dt_ms).exp()
}
