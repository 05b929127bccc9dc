//! Posting-window expiry checks
//!
//! Reservations may declare a textual window such as "17:00-21:00". The
//! window's end instant is computed in the account's local civil day, which
//! is a fixed UTC+9 offset. A reservation whose window end has passed is
//! expired instead of posted.
//!
//! Malformed window strings degrade to "no expiry check" rather than failing
//! the batch.

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};

use crate::types::ScheduledPost;

/// Accounts post in a fixed UTC+9 civil day
pub const LOCAL_UTC_OFFSET_HOURS: i32 = 9;

fn local_offset() -> FixedOffset {
    // 9 hours is always a valid offset
    FixedOffset::east_opt(LOCAL_UTC_OFFSET_HOURS * 3600).expect("fixed offset in range")
}

/// Parse a "HH:MM-HH:MM" window into (start, end) times.
///
/// Returns None for anything malformed.
pub fn parse_time_range(range: &str) -> Option<(NaiveTime, NaiveTime)> {
    let (start_str, end_str) = range.split_once('-')?;
    let start = NaiveTime::parse_from_str(start_str.trim(), "%H:%M").ok()?;
    let end = NaiveTime::parse_from_str(end_str.trim(), "%H:%M").ok()?;
    Some((start, end))
}

/// The epoch second at which the reservation's window closes, if it has a
/// well-formed window.
///
/// The window is anchored to the civil day of `scheduled_at` in the local
/// offset. An end that is not after the start is taken to cross midnight and
/// lands on the next civil day.
pub fn window_end_epoch(scheduled_at: i64, range: &str) -> Option<i64> {
    let (start, end) = parse_time_range(range)?;

    let offset = local_offset();
    let scheduled: DateTime<FixedOffset> =
        offset.timestamp_opt(scheduled_at, 0).single()?;
    let civil_day = scheduled.date_naive();

    let mut end_local = civil_day.and_time(end);
    if end <= start {
        end_local = end_local + Duration::days(1);
    }

    let end_instant = offset.from_local_datetime(&end_local).single()?;
    Some(end_instant.with_timezone(&Utc).timestamp())
}

/// Whether the reservation's posting window has already closed at `now`.
///
/// Reservations without a window, or with a malformed one, never expire here.
pub fn window_elapsed(post: &ScheduledPost, now: i64) -> bool {
    let Some(range) = post.time_range.as_deref() else {
        return false;
    };

    match window_end_epoch(post.scheduled_at, range) {
        Some(end) => now > end,
        None => {
            tracing::debug!(
                account_id = %post.account_id,
                slot_key = %post.slot_key,
                range,
                "unparseable time range, skipping expiry check"
            );
            false
        }
    }
}
