use core::convert::Infallible;

use derive_more::derive::{Display, Error};

/// A specialized `Result` where the error is this crate's `Error` type.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Define a unified error type for this crate.
#[expect(missing_docs, reason = "The variants are self-explanatory.")]
#[derive(Debug, Display, Error)]
pub enum Error {
    // `#[error(not(source))]` below tells `derive_more` that `embassy_executor::SpawnError` does
    // not implement Rust's `core::error::Error` trait.
    #[display("{_0:?}")]
    TaskSpawn(#[error(not(source))] embassy_executor::SpawnError),

    #[display("Error setting output state")]
    CannotSetOutputState,

    #[display("Index out of bounds")]
    IndexOutOfBounds,

    #[display("Format error")]
    FormatError,

    #[cfg(not(feature = "host"))]
    #[display("Flash operation failed: {_0:?}")]
    Flash(#[error(not(source))] embassy_rp::flash::Error),

    #[display("Static resources were already initialized")]
    AlreadyInitialized,

    #[display("Stored data is corrupted")]
    StorageCorrupted,

    #[display("All shutdown listeners are taken")]
    ShutdownListenersExhausted,

    #[display("No time servers configured")]
    NoTimeServers,

    #[display("NTP response too short: {_0} bytes")]
    NtpResponseTooShort(#[error(not(source))] usize),

    #[display("NTP response carries no transmit timestamp")]
    NtpTimestampMissing,

    #[display("NTP server did not answer in time")]
    NtpTimeout,

    #[display("DNS lookup returned no addresses")]
    DnsNoAddress,

    #[cfg(all(feature = "wifi", not(feature = "host")))]
    #[display("DNS lookup failed: {_0:?}")]
    Dns(#[error(not(source))] embassy_net::dns::Error),

    #[cfg(all(feature = "wifi", not(feature = "host")))]
    #[display("UDP bind failed: {_0:?}")]
    UdpBind(#[error(not(source))] embassy_net::udp::BindError),

    #[cfg(all(feature = "wifi", not(feature = "host")))]
    #[display("UDP send failed: {_0:?}")]
    UdpSend(#[error(not(source))] embassy_net::udp::SendError),

    #[cfg(all(feature = "wifi", not(feature = "host")))]
    #[display("UDP receive failed: {_0:?}")]
    UdpRecv(#[error(not(source))] embassy_net::udp::RecvError),

    #[cfg(all(feature = "wifi", not(feature = "host")))]
    #[display("TCP accept failed: {_0:?}")]
    TcpAccept(#[error(not(source))] embassy_net::tcp::AcceptError),

    #[cfg(all(feature = "wifi", not(feature = "host")))]
    #[display("TCP transfer failed: {_0:?}")]
    Tcp(#[error(not(source))] embassy_net::tcp::Error),

    #[display("No WiFi credentials stored")]
    NoCredentials,

    #[display("WiFi radio is serving the provisioning portal")]
    WifiBusy,

    #[display("WiFi join failed with status {_0}")]
    WifiJoin(#[error(not(source))] u32),

    #[display("WiFi join timed out")]
    WifiJoinTimeout,

    #[display("DHCP did not configure the interface in time")]
    DhcpTimeout,

    #[display("Form is missing the SSID")]
    FormMissingSsid,

    #[display("Form field is too long")]
    FormFieldTooLong,

    #[display("Firmware image header has a bad magic")]
    OtaBadMagic,

    #[display("Firmware image is empty")]
    OtaEmptyImage,

    #[display("Firmware image of {len} bytes exceeds {capacity} byte slot")]
    OtaImageTooLarge { len: u32, capacity: u32 },

    #[display("Firmware checksum mismatch: expected {expected:#010x}, computed {actual:#010x}")]
    OtaChecksumMismatch { expected: u32, actual: u32 },

    #[display("Firmware stream carries bytes past the declared length")]
    OtaTrailingBytes,

    #[display("Firmware stream ended after {received} of {expected} bytes")]
    OtaIncomplete { received: u32, expected: u32 },

    #[display("Firmware slot bounds {start:#x}..{end:#x} are unusable")]
    OtaSlotBounds { start: usize, end: usize },

    #[display("Firmware slot flash operation failed: {_0:?}")]
    FlashSlot(#[error(not(source))] embedded_storage::nor_flash::NorFlashErrorKind),

    #[cfg(all(feature = "wifi", not(feature = "host")))]
    #[display("Firmware updater failed: {_0:?}")]
    Firmware(#[error(not(source))] embassy_boot_rp::FirmwareUpdaterError),
}

impl From<Infallible> for Error {
    fn from(_: Infallible) -> Self {
        Self::CannotSetOutputState
    }
}

impl From<embassy_executor::SpawnError> for Error {
    fn from(err: embassy_executor::SpawnError) -> Self {
        Self::TaskSpawn(err)
    }
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
impl From<embassy_boot_rp::FirmwareUpdaterError> for Error {
    fn from(err: embassy_boot_rp::FirmwareUpdaterError) -> Self {
        Self::Firmware(err)
    }
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
impl From<embassy_net::tcp::Error> for Error {
    fn from(err: embassy_net::tcp::Error) -> Self {
        Self::Tcp(err)
    }
}
