//! Over-the-air firmware updates.
//!
//! A client connects to the OTA port and streams a framed image:
//!
//! | bytes | field |
//! |-------|-------|
//! | 0..4  | magic `OTA1` |
//! | 4..8  | image length, u32 little-endian |
//! | 8..12 | CRC-32 of the image, u32 little-endian |
//! | 12..  | image |
//!
//! [`OtaSession`] checks the framing and writes the image page by page into a [`FirmwareSink`].
//! Only once the last byte has arrived and the checksum matches is the image committed, so a
//! broken transfer never reaches the bootloader.

use crc32fast::Hasher;
use embedded_storage::nor_flash::{NorFlash, NorFlashError};

use crate::{Error, Result};

pub const OTA_MAGIC: [u8; 4] = *b"OTA1";
pub const HEADER_LEN: usize = 12;
/// Write granularity. Matches the flash erase size.
pub const PAGE_SIZE: usize = 4096;
const PAGE_BYTES: u32 = 4096;
const ERASED: u8 = 0xFF;

/// Where image pages go.
pub trait FirmwareSink {
    /// Write one page at byte `offset` of the update slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the page cannot be written.
    fn write_page(&mut self, offset: u32, page: &[u8; PAGE_SIZE]) -> Result<()>;

    /// Mark the written image for installation on next boot.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be marked.
    fn commit(&mut self) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, defmt::Format)]
pub enum OtaProgress {
    NeedMore,
    /// The image was verified and committed.
    Complete { len: u32 },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Phase {
    Header { filled: usize },
    Image { len: u32, expected_crc: u32, received: u32 },
    Done { len: u32 },
}

/// Receive state for one update transfer.
pub struct OtaSession {
    capacity: u32,
    phase: Phase,
    header: [u8; HEADER_LEN],
    page: [u8; PAGE_SIZE],
    page_fill: usize,
    page_offset: u32,
    hasher: Hasher,
}

impl OtaSession {
    /// A session for an update slot of `capacity` bytes.
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            phase: Phase::Header { filled: 0 },
            header: [0; HEADER_LEN],
            page: [ERASED; PAGE_SIZE],
            page_fill: 0,
            page_offset: 0,
            hasher: Hasher::new(),
        }
    }

    /// Forget any partial transfer.
    pub fn reset(&mut self) {
        self.phase = Phase::Header { filled: 0 };
        self.page_fill = 0;
        self.page_offset = 0;
        self.hasher = Hasher::new();
    }

    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self.phase, Phase::Done { .. })
    }

    /// Image bytes received so far.
    #[must_use]
    pub const fn received(&self) -> u32 {
        match self.phase {
            Phase::Header { .. } => 0,
            Phase::Image { received, .. } => received,
            Phase::Done { len } => len,
        }
    }

    /// Consume the next bytes of the stream.
    ///
    /// Any error resets the session and nothing is committed.
    ///
    /// # Errors
    ///
    /// Returns an error for a bad header, an image that does not fit, bytes past the declared
    /// length, a checksum mismatch, or a failing sink.
    pub fn feed<S: FirmwareSink>(&mut self, sink: &mut S, bytes: &[u8]) -> Result<OtaProgress> {
        let result = self.consume(sink, bytes);
        if result.is_err() {
            self.reset();
        }
        result
    }

    /// The error to report when the stream ends before the image is complete.
    #[must_use]
    pub const fn incomplete(&self) -> Error {
        match self.phase {
            Phase::Header { .. } => Error::OtaIncomplete { received: 0, expected: 0 },
            Phase::Image { len, received, .. } => Error::OtaIncomplete { received, expected: len },
            Phase::Done { len } => Error::OtaIncomplete { received: len, expected: len },
        }
    }

    fn consume<S: FirmwareSink>(&mut self, sink: &mut S, bytes: &[u8]) -> Result<OtaProgress> {
        let mut rest = bytes;
        loop {
            match self.phase {
                Phase::Header { filled } => {
                    if rest.is_empty() {
                        return Ok(OtaProgress::NeedMore);
                    }
                    let take = rest.len().min(HEADER_LEN.saturating_sub(filled));
                    let (taken, after) = rest.split_at(take);
                    let end = filled.saturating_add(take);
                    self.header
                        .get_mut(filled..end)
                        .ok_or(Error::IndexOutOfBounds)?
                        .copy_from_slice(taken);
                    rest = after;
                    self.phase = if end == HEADER_LEN {
                        self.parse_header()?
                    } else {
                        Phase::Header { filled: end }
                    };
                }
                Phase::Image { len, expected_crc, received } if received == len => {
                    if !rest.is_empty() {
                        return Err(Error::OtaTrailingBytes);
                    }
                    self.finish(sink, expected_crc)?;
                    self.phase = Phase::Done { len };
                    return Ok(OtaProgress::Complete { len });
                }
                Phase::Image { len, expected_crc, received } => {
                    if rest.is_empty() {
                        return Ok(OtaProgress::NeedMore);
                    }
                    let remaining = usize::try_from(len.saturating_sub(received))
                        .map_err(|_| Error::IndexOutOfBounds)?;
                    let room = PAGE_SIZE.saturating_sub(self.page_fill);
                    let take = rest.len().min(remaining).min(room);
                    let (taken, after) = rest.split_at(take);
                    let end = self.page_fill.saturating_add(take);
                    self.page
                        .get_mut(self.page_fill..end)
                        .ok_or(Error::IndexOutOfBounds)?
                        .copy_from_slice(taken);
                    self.hasher.update(taken);
                    self.page_fill = end;
                    rest = after;

                    let taken_len = u32::try_from(take).map_err(|_| Error::IndexOutOfBounds)?;
                    self.phase = Phase::Image {
                        len,
                        expected_crc,
                        received: received.saturating_add(taken_len),
                    };
                    if self.page_fill == PAGE_SIZE {
                        self.flush_page(sink)?;
                    }
                }
                Phase::Done { len } => {
                    return if rest.is_empty() {
                        Ok(OtaProgress::Complete { len })
                    } else {
                        Err(Error::OtaTrailingBytes)
                    };
                }
            }
        }
    }

    fn parse_header(&self) -> Result<Phase> {
        let [m0, m1, m2, m3, l0, l1, l2, l3, c0, c1, c2, c3] = self.header;
        if [m0, m1, m2, m3] != OTA_MAGIC {
            return Err(Error::OtaBadMagic);
        }
        let len = u32::from_le_bytes([l0, l1, l2, l3]);
        if len == 0 {
            return Err(Error::OtaEmptyImage);
        }
        // Pages are written whole, so the padded image must fit.
        let fits = len
            .checked_next_multiple_of(PAGE_BYTES)
            .is_some_and(|padded| padded <= self.capacity);
        if !fits {
            return Err(Error::OtaImageTooLarge { len, capacity: self.capacity });
        }
        Ok(Phase::Image {
            len,
            expected_crc: u32::from_le_bytes([c0, c1, c2, c3]),
            received: 0,
        })
    }

    fn flush_page<S: FirmwareSink>(&mut self, sink: &mut S) -> Result<()> {
        sink.write_page(self.page_offset, &self.page)?;
        self.page_offset = self.page_offset.saturating_add(PAGE_BYTES);
        self.page_fill = 0;
        self.page.fill(ERASED);
        Ok(())
    }

    fn finish<S: FirmwareSink>(&mut self, sink: &mut S, expected: u32) -> Result<()> {
        if self.page_fill > 0 {
            self.flush_page(sink)?;
        }
        let actual = self.hasher.clone().finalize();
        if actual != expected {
            return Err(Error::OtaChecksumMismatch { expected, actual });
        }
        sink.commit()
    }
}

/// A flash partition, as a byte range from the start of flash.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SlotBounds {
    pub offset: u32,
    pub len: u32,
}

impl SlotBounds {
    /// Bounds from a partition's `start..end` linker symbol addresses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OtaSlotBounds`] if the range is empty, reversed, or beyond 32 bits.
    pub fn from_symbols(start: usize, end: usize) -> Result<Self> {
        let bad = || Error::OtaSlotBounds { start, end };
        let len = end.checked_sub(start).filter(|len| *len > 0).ok_or_else(bad)?;
        let offset = u32::try_from(start).map_err(|_| bad())?;
        let len = u32::try_from(len).map_err(|_| bad())?;
        offset.checked_add(len).ok_or_else(bad)?;
        Ok(Self { offset, len })
    }
}

/// Writes image pages into a NOR flash update slot.
///
/// Each page is erased right before it is written. Nothing left in the slot by an earlier
/// transfer survives into the new image, however that transfer ended.
pub struct SlotWriter<F, C> {
    slot: F,
    mark_updated: C,
}

impl<F, C> SlotWriter<F, C>
where
    F: NorFlash,
    C: FnMut() -> Result<()>,
{
    /// `mark_updated` runs once a verified image is completely written.
    #[must_use]
    pub const fn new(slot: F, mark_updated: C) -> Self {
        Self { slot, mark_updated }
    }
}

impl<F, C> FirmwareSink for SlotWriter<F, C>
where
    F: NorFlash,
    C: FnMut() -> Result<()>,
{
    fn write_page(&mut self, offset: u32, page: &[u8; PAGE_SIZE]) -> Result<()> {
        let end = offset.checked_add(PAGE_BYTES).ok_or(Error::IndexOutOfBounds)?;
        self.slot.erase(offset, end).map_err(|err| Error::FlashSlot(err.kind()))?;
        self.slot.write(offset, page).map_err(|err| Error::FlashSlot(err.kind()))?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        (self.mark_updated)()
    }
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
mod device {
    #![allow(clippy::future_not_send, reason = "single-threaded")]

    use core::ptr;

    use defmt::{Display2Format, error, info, warn};
    use embassy_boot_rp::{
        AlignedBuffer, BlockingFirmwareUpdater, FirmwareUpdaterConfig, FirmwareUpdaterError,
    };
    use embassy_embedded_hal::flash::partition::BlockingPartition;
    use embassy_futures::select::{Either, Either3, select, select3};
    use embassy_net::tcp::TcpSocket;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embassy_time::Timer;
    use embedded_io_async::Write;

    use super::{FirmwareSink, OtaProgress, OtaSession, PAGE_BYTES, SlotBounds, SlotWriter};
    use crate::constants::{ClockConfig, OTA_POLL_INTERVAL, OTA_SOCKET_TIMEOUT, RESET_DELAY};
    use crate::flash_store::{FlashDriver, FlashStore};
    use crate::shutdown::{Shutdown, ShutdownListener};
    use crate::wifi::Wifi;
    use crate::{Error, Result};

    const SOCKET_BUFFER: usize = 2048;

    type Partition = BlockingPartition<'static, CriticalSectionRawMutex, FlashDriver>;
    type Updater<'a> = BlockingFirmwareUpdater<'a, Partition, Partition>;

    #[derive(Clone, Copy)]
    struct Slots {
        state: SlotBounds,
        dfu: SlotBounds,
    }

    #[expect(unsafe_code, reason = "the partition bounds come from linker symbols")]
    fn linker_slots() -> Result<Slots> {
        unsafe extern "C" {
            static __bootloader_state_start: u32;
            static __bootloader_state_end: u32;
            static __bootloader_dfu_start: u32;
            static __bootloader_dfu_end: u32;
        }

        // SAFETY: only the symbol addresses are taken; nothing is read through them.
        let [state_start, state_end, dfu_start, dfu_end] = unsafe {
            [
                ptr::from_ref(&__bootloader_state_start).addr(),
                ptr::from_ref(&__bootloader_state_end).addr(),
                ptr::from_ref(&__bootloader_dfu_start).addr(),
                ptr::from_ref(&__bootloader_dfu_end).addr(),
            ]
        };
        Ok(Slots {
            state: SlotBounds::from_symbols(state_start, state_end)?,
            dfu: SlotBounds::from_symbols(dfu_start, dfu_end)?,
        })
    }

    fn partition(flash: &'static FlashStore, bounds: SlotBounds) -> Partition {
        BlockingPartition::new(flash.shared(), bounds.offset, bounds.len)
    }

    /// Run `op` on an updater built for this call alone.
    fn with_updater(
        flash: &'static FlashStore,
        slots: Slots,
        op: impl FnOnce(&mut Updater<'_>) -> core::result::Result<(), FirmwareUpdaterError>,
    ) -> Result<()> {
        let config = FirmwareUpdaterConfig {
            dfu: partition(flash, slots.dfu),
            state: partition(flash, slots.state),
        };
        let mut aligned = AlignedBuffer([0; 1]);
        let mut updater = BlockingFirmwareUpdater::new(config, &mut aligned.0);
        op(&mut updater)?;
        Ok(())
    }

    /// Accept firmware images on the OTA port while the station link is up.
    ///
    /// A verified image is committed, the other tasks are shut down, and the chip resets into
    /// the bootloader, which swaps the image in.
    #[embassy_executor::task]
    pub async fn ota_task(
        wifi: &'static Wifi,
        flash: &'static FlashStore,
        config: &'static ClockConfig,
        shutdown: &'static Shutdown,
        mut listener: ShutdownListener<'static>,
    ) {
        let slots = match linker_slots() {
            Ok(slots) => slots,
            Err(err) => {
                error!("OTA: disabled: {}", Display2Format(&err));
                return;
            }
        };
        // The DFU slot is one erase page larger than the active slot it swaps with.
        let capacity = slots.dfu.len.saturating_sub(PAGE_BYTES);
        match with_updater(flash, slots, |updater| updater.mark_booted()) {
            Ok(()) => info!("OTA: running image marked good"),
            Err(err) => warn!("OTA: could not mark image booted: {}", Display2Format(&err)),
        }

        let mut session = OtaSession::new(capacity);
        let mut rx_buffer = [0; SOCKET_BUFFER];
        let mut tx_buffer = [0; 64];
        let mut chunk = [0; 1024];
        info!(
            "OTA: {}:{} accepts images up to {} bytes",
            config.hostname, config.ota_port, capacity
        );

        loop {
            while !wifi.is_connected() {
                if let Either::Second(()) = select(Timer::after(OTA_POLL_INTERVAL), listener.wait()).await {
                    return;
                }
            }

            let mut socket = TcpSocket::new(wifi.stack(), &mut rx_buffer, &mut tx_buffer);
            socket.set_timeout(Some(OTA_SOCKET_TIMEOUT));
            match select3(socket.accept(config.ota_port), link_lost(wifi), listener.wait()).await {
                Either3::First(Ok(())) => {}
                Either3::First(Err(err)) => {
                    warn!("OTA: accept failed: {:?}", err);
                    continue;
                }
                Either3::Second(()) => continue,
                Either3::Third(()) => return,
            }
            info!("OTA: connection from {:?}", socket.remote_endpoint());

            session.reset();
            let mut sink = SlotWriter::new(partition(flash, slots.dfu), move || {
                with_updater(flash, slots, |updater| updater.mark_updated())
            });
            match receive(&mut socket, &mut session, &mut sink, &mut chunk).await {
                Ok(len) => {
                    info!("OTA: {} byte image verified; restarting", len);
                    reply(&mut socket, b"OK\n").await;
                    shutdown.request();
                    Timer::after(RESET_DELAY).await;
                    cortex_m::peripheral::SCB::sys_reset();
                }
                Err(err) => {
                    warn!("OTA: update failed: {}", Display2Format(&err));
                    reply(&mut socket, b"ERR\n").await;
                }
            }
        }
    }

    async fn receive<S: FirmwareSink>(
        socket: &mut TcpSocket<'_>,
        session: &mut OtaSession,
        sink: &mut S,
        chunk: &mut [u8],
    ) -> Result<u32> {
        loop {
            let read = socket.read(chunk).await?;
            if read == 0 {
                return Err(session.incomplete());
            }
            let bytes = chunk.get(..read).ok_or(Error::IndexOutOfBounds)?;
            if let OtaProgress::Complete { len } = session.feed(sink, bytes)? {
                return Ok(len);
            }
        }
    }

    /// Send the one-line verdict and close the connection.
    async fn reply(socket: &mut TcpSocket<'_>, verdict: &[u8]) {
        if let Err(err) = socket.write_all(verdict).await {
            warn!("OTA: client missed the reply: {:?}", err);
        } else if let Err(err) = socket.flush().await {
            warn!("OTA: reply flush failed: {:?}", err);
        }
        socket.close();
    }

    /// Resolves once the station link has been down at a poll.
    async fn link_lost(wifi: &Wifi) {
        loop {
            Timer::after(OTA_POLL_INTERVAL).await;
            if !wifi.is_connected() {
                return;
            }
        }
    }
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
pub use device::ota_task;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct PageLog {
        offsets: Vec<u32>,
        committed: bool,
    }

    impl FirmwareSink for PageLog {
        fn write_page(&mut self, offset: u32, _page: &[u8; PAGE_SIZE]) -> Result<()> {
            self.offsets.push(offset);
            Ok(())
        }

        fn commit(&mut self) -> Result<()> {
            self.committed = true;
            Ok(())
        }
    }

    fn header(len: u32, crc: u32) -> Vec<u8> {
        let mut bytes = OTA_MAGIC.to_vec();
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes
    }

    #[test]
    fn header_may_arrive_in_pieces() {
        let image = [7_u8; 10];
        let mut stream = header(10, crc32fast::hash(&image));
        stream.extend_from_slice(&image);

        let mut session = OtaSession::new(8 * PAGE_BYTES);
        let mut sink = PageLog::default();
        for byte in &stream[..stream.len() - 1] {
            assert_eq!(session.feed(&mut sink, &[*byte]).unwrap(), OtaProgress::NeedMore);
        }
        assert_eq!(
            session.feed(&mut sink, &stream[stream.len() - 1..]).unwrap(),
            OtaProgress::Complete { len: 10 }
        );
        assert!(sink.committed);
        assert_eq!(sink.offsets, [0]);
    }

    #[test]
    fn zero_length_is_rejected() {
        let mut session = OtaSession::new(PAGE_BYTES);
        let result = session.feed(&mut PageLog::default(), &header(0, 0));
        assert!(matches!(result, Err(Error::OtaEmptyImage)));
    }

    #[test]
    fn error_resets_session() {
        let mut session = OtaSession::new(PAGE_BYTES);
        let mut sink = PageLog::default();
        assert!(session.feed(&mut sink, b"NOPE").is_ok());
        assert!(session.feed(&mut sink, &[0; 8]).is_err());
        assert_eq!(session.received(), 0);
        assert!(matches!(
            session.incomplete(),
            Error::OtaIncomplete { received: 0, expected: 0 }
        ));
    }

    #[test]
    fn slot_bounds_come_from_linker_symbols() {
        // Pico 1 layout: state at 24 KiB, DFU at 796 KiB, both relative to the start of flash.
        assert_eq!(
            SlotBounds::from_symbols(0x6000, 0x7000).unwrap(),
            SlotBounds { offset: 0x6000, len: 0x1000 }
        );
        assert_eq!(
            SlotBounds::from_symbols(0xC_7000, 0x18_8000).unwrap(),
            SlotBounds { offset: 0xC_7000, len: 772 * 1024 }
        );
    }

    #[test]
    fn reversed_or_empty_slot_bounds_are_rejected() {
        assert!(matches!(
            SlotBounds::from_symbols(0x7000, 0x6000),
            Err(Error::OtaSlotBounds { start: 0x7000, end: 0x6000 })
        ));
        assert!(matches!(
            SlotBounds::from_symbols(0x6000, 0x6000),
            Err(Error::OtaSlotBounds { .. })
        ));
    }
}
