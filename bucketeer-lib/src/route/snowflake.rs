use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds between the Unix epoch and the first second of 2015, the
/// origin of every Discord snowflake timestamp
pub const DISCORD_EPOCH: u64 = 1_420_070_400_000;

/// Bits below the timestamp in a snowflake (worker, process, increment)
const TIMESTAMP_SHIFT: u32 = 22;

/// The creation time embedded in a snowflake id
#[must_use]
pub fn snowflake_timestamp(id: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis((id >> TIMESTAMP_SHIFT) + DISCORD_EPOCH)
}

/// The smallest snowflake created at `time`.
///
/// Times before the Discord epoch map to `0`.
#[must_use]
pub fn snowflake_at(time: SystemTime) -> u64 {
    let millis = time
        .duration_since(UNIX_EPOCH)
        .map_or(0, |since| u64::try_from(since.as_millis()).unwrap_or(u64::MAX));
    millis.saturating_sub(DISCORD_EPOCH) << TIMESTAMP_SHIFT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_snowflake() {
        // Example from the Discord developer documentation
        let time = snowflake_timestamp(175_928_847_299_117_063);
        let millis = time.duration_since(UNIX_EPOCH).unwrap().as_millis();
        assert_eq!(millis, 1_462_015_105_796);
    }

    #[test]
    fn test_snowflake_at_inverts_timestamp() {
        let time = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        assert_eq!(snowflake_timestamp(snowflake_at(time)), time);
    }

    #[test]
    fn test_snowflake_before_epoch() {
        assert_eq!(snowflake_at(UNIX_EPOCH), 0);
    }
}
