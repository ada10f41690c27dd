//! Unix timestamp type for time-related devices

use defmt::Format;
use time::{OffsetDateTime, UtcOffset};

/// Seconds between the NTP era (1900-01-01) and the Unix epoch (1970-01-01).
pub const NTP_TO_UNIX_SECONDS: i64 = 2_208_988_800;
/// Length of one NTP era (2^32 seconds).
const NTP_ERA_SECONDS: i64 = 1 << 32;

/// Units-safe wrapper for Unix timestamps (seconds since 1970-01-01 00:00:00 UTC)
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Format)]
pub struct UnixSeconds(pub i64);

impl UnixSeconds {
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Convert NTP seconds to Unix seconds.
    ///
    /// Values with the top bit clear are read as era 1 (after 2036-02-07), so the result
    /// covers 1968 through 2104.
    #[must_use]
    #[expect(clippy::cast_lossless, reason = "i64::from is not const")]
    pub const fn from_ntp_seconds(ntp: u32) -> Self {
        let seconds = ntp as i64;
        let since_1900 = if ntp & 0x8000_0000 == 0 {
            seconds.wrapping_add(NTP_ERA_SECONDS)
        } else {
            seconds
        };
        Self(since_1900.wrapping_sub(NTP_TO_UNIX_SECONDS))
    }

    /// Convert to a calendar date and time at `offset`.
    #[must_use]
    pub fn to_offset_datetime(self, offset: UtcOffset) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp(self.as_i64())
            .ok()
            .map(|date_time| date_time.to_offset(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn era_zero_converts_to_unix() {
        // 2024-01-01T00:00:00Z
        assert_eq!(
            UnixSeconds::from_ntp_seconds(3_913_056_000),
            UnixSeconds(1_704_067_200)
        );
        assert_eq!(
            UnixSeconds::from_ntp_seconds(2_208_988_800),
            UnixSeconds(0)
        );
    }

    #[test]
    fn era_one_continues_after_rollover() {
        // One second after the 2036 rollover the counter reads 1.
        let after = UnixSeconds::from_ntp_seconds(1);
        let before = UnixSeconds::from_ntp_seconds(u32::MAX);
        assert_eq!(after.0 - before.0, 2);
        assert_eq!(after, UnixSeconds(2_085_978_497));
    }

    #[test]
    fn calendar_conversion_applies_offset() {
        let tokyo = UtcOffset::from_hms(9, 0, 0).unwrap();
        let local = UnixSeconds(1_704_067_200).to_offset_datetime(tokyo).unwrap();
        assert_eq!((local.hour(), local.minute()), (9, 0));
    }
}
