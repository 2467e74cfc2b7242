//! Lock-token arithmetic.

use jiff::{SignedDuration, Timestamp};

/// Next value for an `updated_at` lock token: the current time, pushed
/// just past the previous token when the clock has not advanced. Tokens
/// stay strictly increasing even under a frozen test clock, which is what
/// makes the optimistic-lock comparison sound.
pub fn next_token(prev: Timestamp, now: Timestamp) -> Timestamp {
    if now > prev {
        now
    } else {
        prev + SignedDuration::from_nanos(1)
    }
}
