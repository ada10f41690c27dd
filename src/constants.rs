//! Timing, network and build-time configuration shared by the clock tasks.

use embassy_time::Duration;

/// Digit positions on the display, lit one at a time.
pub const CELL_COUNT: usize = 4;
/// Segment lines (A..G) wired to cathodes. The decimal point has no line on this board.
pub const SEGMENT_COUNT: usize = 7;

/// Time each digit stays lit before the next one takes over.
pub const MULTIPLEX_TICK: Duration = Duration::from_millis(2);

/// Short colon flashes per cycle.
pub const COLON_PULSE_COUNT: u16 = 50;
pub const COLON_ON: Duration = Duration::from_millis(1);
pub const COLON_OFF: Duration = Duration::from_millis(9);
/// Dark gap after the burst of pulses.
pub const COLON_PAUSE: Duration = Duration::from_millis(500);

pub const RESYNC_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const NTP_PORT: u16 = 123;
pub const NTP_TIMEOUT: Duration = Duration::from_secs(5);
/// Time servers, highest priority first.
pub const NTP_SERVERS: [&str; 3] = ["ntp.jst.mfeed.ad.jp", "ntp.nict.jp", "pool.ntp.org"];

/// Name the clock registers with the network (DHCP option 12).
pub const HOSTNAME: &str = "AKI-TOKEI";
pub const OTA_PORT: u16 = 3232;
pub const OTA_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How long a connected uploader may stay silent before the session is dropped.
pub const OTA_SOCKET_TIMEOUT: Duration = Duration::from_secs(10);
/// Grace period between the OTA reply and the reset, so tasks can blank their outputs.
pub const RESET_DELAY: Duration = Duration::from_millis(500);

/// Open access point served while provisioning.
pub const AP_SSID: &str = "AKI-TOKEI-SETUP";
pub const AP_CHANNEL: u8 = 1;
pub const AP_ADDRESS: [u8; 4] = [192, 168, 4, 1];
pub const AP_PREFIX_LEN: u8 = 24;
/// First address handed out by the portal DHCP server.
pub const AP_POOL_START: [u8; 4] = [192, 168, 4, 2];
pub const AP_POOL_SIZE: u8 = 253;
pub const PORTAL_PORT: u16 = 80;

pub const BUTTON_DEBOUNCE_DELAY: Duration = Duration::from_millis(10);
pub const PROVISIONING_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const WIFI_JOIN_TIMEOUT: Duration = Duration::from_secs(20);
pub const DHCP_TIMEOUT: Duration = Duration::from_secs(15);

/// Credentials seeded into flash on first boot (empty means provision with the button).
pub const WIFI_SSID: &str = env!("WIFI_SSID");
pub const WIFI_PASS: &str = env!("WIFI_PASS");

/// Local time offset from UTC, in minutes. Set with `UTC_OFFSET_MINUTES` at build time.
pub const UTC_OFFSET_MINUTES: i32 = match parse_offset_minutes(env!("UTC_OFFSET_MINUTES")) {
    Some(minutes) => minutes,
    None => 0,
};

/// Largest offset `time::UtcOffset` accepts, rounded down to whole minutes.
const MAX_OFFSET_MINUTES: i32 = 25 * 60 + 59;

/// Parse a signed decimal minute count such as `540`, `+540` or `-300`.
///
/// Returns `None` for anything else, including offsets beyond ±25:59.
#[must_use]
pub const fn parse_offset_minutes(text: &str) -> Option<i32> {
    let (negative, mut rest) = match text.as_bytes() {
        [b'-', tail @ ..] => (true, tail),
        [b'+', tail @ ..] => (false, tail),
        bytes => (false, bytes),
    };
    if rest.is_empty() {
        return None;
    }

    let mut value: i32 = 0;
    while let [digit, tail @ ..] = rest {
        if !digit.is_ascii_digit() {
            return None;
        }
        value = match value.checked_mul(10) {
            Some(shifted) => match shifted.checked_add(digit.wrapping_sub(b'0') as i32) {
                Some(sum) => sum,
                None => return None,
            },
            None => return None,
        };
        rest = tail;
    }

    if value > MAX_OFFSET_MINUTES {
        return None;
    }
    if negative { Some(value.wrapping_neg()) } else { Some(value) }
}

/// Settings the tasks read instead of reaching for globals.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClockConfig {
    pub utc_offset_minutes: i32,
    pub ntp_servers: &'static [&'static str],
    pub hostname: &'static str,
    pub ota_port: u16,
}

impl ClockConfig {
    /// Configuration baked in at build time.
    #[must_use]
    pub const fn from_build_env() -> Self {
        Self {
            utc_offset_minutes: UTC_OFFSET_MINUTES,
            ntp_servers: &NTP_SERVERS,
            hostname: HOSTNAME,
            ota_port: OTA_PORT,
        }
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self::from_build_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_parse_with_optional_sign() {
        assert_eq!(parse_offset_minutes("540"), Some(540));
        assert_eq!(parse_offset_minutes("+540"), Some(540));
        assert_eq!(parse_offset_minutes("-300"), Some(-300));
        assert_eq!(parse_offset_minutes("0"), Some(0));
    }

    #[test]
    fn offsets_reject_junk_and_out_of_range() {
        assert_eq!(parse_offset_minutes(""), None);
        assert_eq!(parse_offset_minutes("-"), None);
        assert_eq!(parse_offset_minutes("9h"), None);
        assert_eq!(parse_offset_minutes("1560"), None);
        assert_eq!(parse_offset_minutes("99999999999"), None);
    }

    #[test]
    fn default_config_uses_clock_servers_and_hostname() {
        let config = ClockConfig::default();
        assert_eq!(config.hostname, "AKI-TOKEI");
        assert_eq!(config.ntp_servers.first(), Some(&"ntp.jst.mfeed.ad.jp"));
        assert_eq!(config.ntp_servers.len(), 3);
        assert_eq!(config.ota_port, 3232);
    }
}
