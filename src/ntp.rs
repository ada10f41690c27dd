//! Simple Network Time Protocol (SNTP) packets: just enough to ask a server for the time.

use crate::unix_seconds::UnixSeconds;
use crate::{Error, Result};

/// Size of an NTP header without extensions.
pub const PACKET_LEN: usize = 48;

/// LI = 0 (no warning), VN = 3, Mode = 3 (client).
const CLIENT_REQUEST_FLAGS: u8 = 0x1B;
/// Offset of the integer seconds of the server's transmit timestamp.
const TRANSMIT_SECONDS_OFFSET: usize = 40;

/// Build a client request. Every field other than the flags is zero.
#[must_use]
pub const fn request() -> [u8; PACKET_LEN] {
    let mut packet = [0; PACKET_LEN];
    packet[0] = CLIENT_REQUEST_FLAGS;
    packet
}

/// Extract the server's transmit time from a response.
///
/// # Errors
///
/// Returns [`Error::NtpResponseTooShort`] for truncated packets and
/// [`Error::NtpTimestampMissing`] when the timestamp is zero (a "kiss of death" or
/// unsynchronized server).
pub fn parse_response(response: &[u8]) -> Result<UnixSeconds> {
    let Some((_, transmit)) = response
        .first_chunk::<PACKET_LEN>()
        .and_then(|packet| packet.split_at_checked(TRANSMIT_SECONDS_OFFSET))
    else {
        return Err(Error::NtpResponseTooShort(response.len()));
    };
    let Some(&seconds) = transmit.first_chunk::<4>() else {
        return Err(Error::NtpResponseTooShort(response.len()));
    };

    match u32::from_be_bytes(seconds) {
        0 => Err(Error::NtpTimestampMissing),
        ntp_seconds => Ok(UnixSeconds::from_ntp_seconds(ntp_seconds)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with_seconds(seconds: u32) -> [u8; PACKET_LEN] {
        let mut packet = [0; PACKET_LEN];
        packet[0] = 0x1C;
        packet[40..44].copy_from_slice(&seconds.to_be_bytes());
        packet
    }

    #[test]
    fn request_is_sntp_v3_client() {
        let packet = request();
        assert_eq!(packet[0], 0x1B);
        assert!(packet[1..].iter().all(|byte| *byte == 0));
    }

    #[test]
    fn response_transmit_time_becomes_unix_time() {
        let response = response_with_seconds(3_913_056_000);
        assert_eq!(parse_response(&response).unwrap(), UnixSeconds(1_704_067_200));
    }

    #[test]
    fn short_response_is_rejected() {
        let response = response_with_seconds(3_913_056_000);
        assert!(matches!(
            parse_response(&response[..47]),
            Err(Error::NtpResponseTooShort(47))
        ));
    }

    #[test]
    fn zero_timestamp_is_rejected() {
        assert!(matches!(
            parse_response(&response_with_seconds(0)),
            Err(Error::NtpTimestampMissing)
        ));
    }
}
