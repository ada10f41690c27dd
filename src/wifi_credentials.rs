//! WiFi network credentials and the form encoding the provisioning portal submits them in.

use heapless::{String, Vec};

use crate::{Error, Result};

/// Longest SSID allowed by 802.11.
pub const SSID_CAPACITY: usize = 32;
/// Longest WPA2 passphrase.
pub const PASSWORD_CAPACITY: usize = 64;

/// WiFi network credentials (SSID and password).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WifiCredentials {
    pub ssid: String<SSID_CAPACITY>,
    /// Empty for open networks.
    pub password: String<PASSWORD_CAPACITY>,
}

impl WifiCredentials {
    /// # Errors
    ///
    /// Returns [`Error::FormMissingSsid`] for an empty SSID and [`Error::FormFieldTooLong`]
    /// when either value exceeds its capacity.
    pub fn new(ssid: &str, password: &str) -> Result<Self> {
        if ssid.is_empty() {
            return Err(Error::FormMissingSsid);
        }
        Ok(Self {
            ssid: String::try_from(ssid).map_err(|()| Error::FormFieldTooLong)?,
            password: String::try_from(password).map_err(|()| Error::FormFieldTooLong)?,
        })
    }

    /// Parse an `application/x-www-form-urlencoded` body with `ssid` and `password` fields.
    ///
    /// Unknown fields are ignored. A missing password means an open network.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FormMissingSsid`] when no non-empty SSID is present,
    /// [`Error::FormFieldTooLong`] when a value does not fit, and [`Error::FormatError`] when
    /// a value does not decode to UTF-8.
    pub fn from_form(body: &str) -> Result<Self> {
        let mut ssid = None;
        let mut password = String::new();
        for pair in body.trim_end_matches(['\r', '\n', '\0']).split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "ssid" => ssid = Some(url_decode::<SSID_CAPACITY>(value)?),
                "password" => password = url_decode::<PASSWORD_CAPACITY>(value)?,
                _ => {}
            }
        }
        let ssid = ssid.filter(|ssid| !ssid.is_empty()).ok_or(Error::FormMissingSsid)?;
        Ok(Self { ssid, password })
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}

/// What a reconnect does once it holds the radio.
///
/// Decided only after the radio lock is taken: a join that finished while the reconnect was
/// waiting for the lock is kept, along with the network it joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconnect {
    /// The station link is already up.
    Keep,
    Join(WifiCredentials),
}

impl Reconnect {
    /// # Errors
    ///
    /// Returns [`Error::WifiBusy`] while the access point is up and [`Error::NoCredentials`]
    /// if no network is known.
    pub fn plan(
        access_point: bool,
        connected: bool,
        current: Option<WifiCredentials>,
    ) -> Result<Self> {
        if access_point {
            return Err(Error::WifiBusy);
        }
        if connected {
            return Ok(Self::Keep);
        }
        current.map(Self::Join).ok_or(Error::NoCredentials)
    }
}

/// Decode `+` and `%XX` escapes. Multi-byte UTF-8 sequences survive intact; a `%` that is not
/// followed by two hex digits is kept literally.
///
/// # Errors
///
/// Returns [`Error::FormFieldTooLong`] when the decoded value exceeds `N` bytes and
/// [`Error::FormatError`] when the bytes are not valid UTF-8.
pub fn url_decode<const N: usize>(encoded: &str) -> Result<String<N>> {
    let mut bytes: Vec<u8, N> = Vec::new();
    let mut rest = encoded.as_bytes();
    while let [first, tail @ ..] = rest {
        let (byte, remaining) = match (first, tail) {
            (b'+', _) => (b' ', tail),
            (b'%', [high, low, after @ ..]) => match (hex_value(*high), hex_value(*low)) {
                (Some(high), Some(low)) => (high.wrapping_shl(4) | low, after),
                _ => (b'%', tail),
            },
            (other, _) => (*other, tail),
        };
        bytes.push(byte).map_err(|_| Error::FormFieldTooLong)?;
        rest = remaining;
    }
    String::from_utf8(bytes).map_err(|_| Error::FormatError)
}

const fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit.wrapping_sub(b'0')),
        b'a'..=b'f' => Some(digit.wrapping_sub(b'a').wrapping_add(10)),
        b'A'..=b'F' => Some(digit.wrapping_sub(b'A').wrapping_add(10)),
        _ => None,
    }
}

/// Escape text for use inside HTML attribute values. Output that does not fit in `N` bytes is
/// truncated at a character boundary.
#[must_use]
pub fn escape_html<const N: usize>(value: &str) -> String<N> {
    let mut escaped = String::<N>::new();
    for ch in value.chars() {
        let pushed = match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        };
        if pushed.is_err() {
            break;
        }
    }
    escaped
}
