//! Process-wide time of day, kept as "Unix time at boot" plus uptime.
//!
//! Only time sync writes it; the display reads it on every sweep. Storing the boot instant
//! instead of the current time means readers never need a lock and the clock keeps running
//! between syncs.

use embassy_time::Duration;
use portable_atomic::{AtomicI64, Ordering};
use time::{OffsetDateTime, UtcOffset};

use crate::clock_text::{Text, UNSYNCED_TEXT, hours_minutes};
use crate::unix_seconds::UnixSeconds;

const UNSYNCED: i64 = i64::MIN;

/// Wall-clock time derived from uptime and the last successful sync.
pub struct WallClock {
    boot_unix_millis: AtomicI64,
    offset_minutes: i32,
}

impl WallClock {
    /// A clock that reports no time until [`set`](Self::set) is called.
    #[must_use]
    pub const fn new(offset_minutes: i32) -> Self {
        Self {
            boot_unix_millis: AtomicI64::new(UNSYNCED),
            offset_minutes,
        }
    }

    /// Record that it was `now` when the uptime counter read `uptime`.
    pub fn set(&self, now: UnixSeconds, uptime: Duration) {
        let boot = now
            .as_i64()
            .saturating_mul(1000)
            .saturating_sub(millis(uptime));
        self.boot_unix_millis.store(boot, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.boot_unix_millis.load(Ordering::Relaxed) != UNSYNCED
    }

    /// UTC time at `uptime`, or `None` before the first sync.
    #[must_use]
    pub fn unix_at(&self, uptime: Duration) -> Option<UnixSeconds> {
        let boot = self.boot_unix_millis.load(Ordering::Relaxed);
        if boot == UNSYNCED {
            return None;
        }
        Some(UnixSeconds(
            boot.saturating_add(millis(uptime)).div_euclid(1000),
        ))
    }

    /// Local calendar time at `uptime`, or `None` before the first sync.
    #[must_use]
    pub fn local_at(&self, uptime: Duration) -> Option<OffsetDateTime> {
        self.unix_at(uptime)?.to_offset_datetime(self.offset())
    }

    /// What the display should show at `uptime`.
    #[must_use]
    pub fn text_at(&self, uptime: Duration) -> Text {
        self.local_at(uptime).map_or(UNSYNCED_TEXT, |local| {
            hours_minutes(local.hour(), local.minute())
        })
    }

    /// The configured offset, falling back to UTC if it is out of range.
    #[must_use]
    pub fn offset(&self) -> UtcOffset {
        self.offset_minutes
            .checked_mul(60)
            .and_then(|seconds| UtcOffset::from_whole_seconds(seconds).ok())
            .unwrap_or(UtcOffset::UTC)
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(not(feature = "host"))]
mod device {
    use embassy_time::{Duration, Instant};
    use time::OffsetDateTime;

    use super::WallClock;
    use crate::clock_text::Text;
    use crate::unix_seconds::UnixSeconds;

    /// Time since boot.
    #[must_use]
    pub fn uptime() -> Duration {
        Duration::from_ticks(Instant::now().as_ticks())
    }

    impl WallClock {
        pub fn set_now(&self, now: UnixSeconds) {
            self.set(now, uptime());
        }

        #[must_use]
        pub fn now_local(&self) -> Option<OffsetDateTime> {
            self.local_at(uptime())
        }

        #[must_use]
        pub fn text_now(&self) -> Text {
            self.text_at(uptime())
        }
    }
}

#[cfg(not(feature = "host"))]
pub use device::uptime;

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-01-01T00:00:00Z
    const NEW_YEAR_UTC: UnixSeconds = UnixSeconds(1_704_067_200);

    #[test]
    fn unsynced_clock_shows_dashes() {
        let clock = WallClock::new(540);
        assert!(!clock.is_synced());
        assert_eq!(clock.text_at(Duration::from_secs(10)), ['-'; 4]);
    }

    #[test]
    fn clock_runs_forward_from_sync_point() {
        let clock = WallClock::new(0);
        clock.set(NEW_YEAR_UTC, Duration::from_secs(100));
        assert_eq!(
            clock.unix_at(Duration::from_secs(100)),
            Some(NEW_YEAR_UTC)
        );
        assert_eq!(
            clock.unix_at(Duration::from_secs(190)),
            Some(UnixSeconds(NEW_YEAR_UTC.0 + 90))
        );
    }

    #[test]
    fn offset_applies_to_displayed_text() {
        let clock = WallClock::new(540);
        clock.set(NEW_YEAR_UTC, Duration::from_secs(0));
        assert_eq!(clock.text_at(Duration::from_secs(0)), [' ', '9', '0', '0']);
        // 15 h later it is one minute past local midnight.
        assert_eq!(
            clock.text_at(Duration::from_secs(15 * 3600 + 61)),
            [' ', '0', '0', '1']
        );
    }

    #[test]
    fn out_of_range_offset_falls_back_to_utc() {
        let clock = WallClock::new(100 * 60);
        assert_eq!(clock.offset(), UtcOffset::UTC);
    }
}
