//! Internal flash shared between settings storage and the firmware updater.
//!
//! The flash driver sits behind one blocking mutex. [`FlashStore::shared`] hands that mutex to
//! `embassy-boot`, and [`FlashStore::reserve`] carves erase blocks off the end of flash for
//! typed records.
//!
//! A record is `postcard`-serialized and framed as
//! `magic | type hash | payload length | payload | crc32`. Reading a block written with a
//! different type, or never written, yields `None`.
//!
//! ⚠️ Blocks come from the top of flash, above the DFU slot in `memory.x`. Reserving more blocks
//! than that gap holds would overwrite the update slot.

use core::array;
use core::cell::RefCell;

use crc32fast::Hasher;
use defmt::{error, info};
use embassy_rp::Peri;
use embassy_rp::flash::{Blocking, ERASE_SIZE, Flash};
use embassy_rp::peripherals::FLASH;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use portable_atomic::{AtomicU32, Ordering};
use serde::{Deserialize, Serialize};
use static_cell::StaticCell;

use crate::{Error, Result};

#[cfg(feature = "pico2")]
pub const FLASH_SIZE: usize = 4 * 1024 * 1024;
#[cfg(not(feature = "pico2"))]
pub const FLASH_SIZE: usize = 2 * 1024 * 1024;

pub type FlashDriver = Flash<'static, FLASH, Blocking, FLASH_SIZE>;
/// The form `embassy-boot` partitions borrow.
pub type SharedFlash = Mutex<CriticalSectionRawMutex, RefCell<FlashDriver>>;

const MAGIC: u32 = 0x4B4C_4F43; // 'CLOK'
const HEADER_SIZE: usize = 4 + 4 + 2;
const CRC_SIZE: usize = 4;
const MAX_PAYLOAD_SIZE: usize = ERASE_SIZE - HEADER_SIZE - CRC_SIZE;
#[expect(clippy::cast_possible_truncation, reason = "flash sizes fit in u32")]
const ERASE_BYTES: u32 = ERASE_SIZE as u32;
#[expect(clippy::cast_possible_truncation, reason = "flash sizes fit in u32")]
const TOTAL_BLOCKS: u32 = (FLASH_SIZE / ERASE_SIZE) as u32;

/// Owner of the flash driver.
pub struct FlashStore {
    flash: SharedFlash,
    next_block: AtomicU32,
}

/// Static storage for [`FlashStore::new`].
pub struct FlashStoreStatic(StaticCell<FlashStore>);

impl FlashStore {
    #[must_use]
    pub const fn new_static() -> FlashStoreStatic {
        FlashStoreStatic(StaticCell::new())
    }

    /// Take the flash peripheral.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyInitialized`] if `flash_static` was already used.
    pub fn new(
        flash_static: &'static FlashStoreStatic,
        peripheral: Peri<'static, FLASH>,
    ) -> Result<&'static Self> {
        let store = flash_static
            .0
            .try_init(Self {
                flash: Mutex::new(RefCell::new(Flash::new_blocking(peripheral))),
                next_block: AtomicU32::new(0),
            })
            .ok_or(Error::AlreadyInitialized)?;
        Ok(store)
    }

    /// The driver mutex, for code that needs raw flash access.
    #[must_use]
    pub const fn shared(&self) -> &SharedFlash {
        &self.flash
    }

    /// Reserve the next `N` blocks counting down from the end of flash.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfBounds`] if flash has no `N` blocks left.
    pub fn reserve<const N: usize>(&'static self) -> Result<[FlashBlock; N]> {
        let count = u32::try_from(N).map_err(|_| Error::IndexOutOfBounds)?;
        let start = self
            .next_block
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| {
                next.checked_add(count).filter(|end| *end <= TOTAL_BLOCKS)
            })
            .map_err(|_| Error::IndexOutOfBounds)?;
        let mut block = start;
        Ok(array::from_fn(|_| {
            let handle = FlashBlock { store: self, block };
            block = block.saturating_add(1);
            handle
        }))
    }

    fn with_flash<R>(&self, op: impl FnOnce(&mut FlashDriver) -> Result<R>) -> Result<R> {
        self.flash.lock(|flash| op(&mut flash.borrow_mut()))
    }
}

/// One reserved erase block.
pub struct FlashBlock {
    store: &'static FlashStore,
    block: u32,
}

impl FlashBlock {
    /// Read the record in this block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageCorrupted`] when a record of type `T` is present but damaged.
    pub fn load<T>(&mut self) -> Result<Option<T>>
    where
        T: Serialize + for<'de> Deserialize<'de>,
    {
        let offset = self.offset()?;
        let mut buffer = [0_u8; ERASE_SIZE];
        self.store.with_flash(|flash| {
            flash.blocking_read(offset, &mut buffer).map_err(Error::Flash)
        })?;

        let Some((header, body)) = buffer.split_first_chunk::<HEADER_SIZE>() else {
            return Err(Error::IndexOutOfBounds);
        };
        let [m0, m1, m2, m3, t0, t1, t2, t3, l0, l1] = *header;
        if u32::from_le_bytes([m0, m1, m2, m3]) != MAGIC {
            info!("Flash: block {} is empty", self.block);
            return Ok(None);
        }
        if u32::from_le_bytes([t0, t1, t2, t3]) != type_hash::<T>() {
            info!("Flash: block {} holds another type", self.block);
            return Ok(None);
        }

        let payload_len = usize::from(u16::from_le_bytes([l0, l1]));
        let (Some(payload), Some(stored_crc)) = (
            body.get(..payload_len),
            body.get(payload_len..payload_len.saturating_add(CRC_SIZE))
                .and_then(|bytes| <[u8; CRC_SIZE]>::try_from(bytes).ok()),
        ) else {
            error!("Flash: bad payload length {} in block {}", payload_len, self.block);
            return Err(Error::StorageCorrupted);
        };
        let framed = buffer
            .get(..HEADER_SIZE.saturating_add(payload_len))
            .ok_or(Error::StorageCorrupted)?;
        if crc(framed) != u32::from_le_bytes(stored_crc) {
            error!("Flash: CRC mismatch in block {}", self.block);
            return Err(Error::StorageCorrupted);
        }

        let value = postcard::from_bytes(payload).map_err(|_| {
            error!("Flash: cannot decode block {}", self.block);
            Error::StorageCorrupted
        })?;
        info!("Flash: loaded block {}", self.block);
        Ok(Some(value))
    }

    /// Erase the block and write `value` to it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FormatError`] if `value` does not fit in one block and
    /// [`Error::Flash`] if the flash operation fails.
    pub fn save<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + for<'de> Deserialize<'de>,
    {
        let mut buffer = [0xFF_u8; ERASE_SIZE];
        let (header, body) = buffer
            .split_first_chunk_mut::<HEADER_SIZE>()
            .ok_or(Error::IndexOutOfBounds)?;
        let payload_area = body.get_mut(..MAX_PAYLOAD_SIZE).ok_or(Error::IndexOutOfBounds)?;
        let payload_len = postcard::to_slice(value, payload_area)
            .map_err(|_| {
                error!("Flash: record exceeds {} bytes", MAX_PAYLOAD_SIZE);
                Error::FormatError
            })?
            .len();
        let len_bytes = u16::try_from(payload_len)
            .map_err(|_| Error::FormatError)?
            .to_le_bytes();
        let mut fields = MAGIC
            .to_le_bytes()
            .into_iter()
            .chain(type_hash::<T>().to_le_bytes())
            .chain(len_bytes);
        header.fill_with(|| fields.next().unwrap_or(0));

        let crc_offset = HEADER_SIZE.saturating_add(payload_len);
        let checksum = crc(buffer.get(..crc_offset).ok_or(Error::IndexOutOfBounds)?);
        buffer
            .get_mut(crc_offset..crc_offset.saturating_add(CRC_SIZE))
            .ok_or(Error::IndexOutOfBounds)?
            .copy_from_slice(&checksum.to_le_bytes());

        self.erase_then(|flash, offset| {
            flash.blocking_write(offset, &buffer).map_err(Error::Flash)
        })?;
        info!("Flash: saved {} bytes to block {}", payload_len, self.block);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`Error::Flash`] if the erase fails.
    pub fn clear(&mut self) -> Result<()> {
        self.erase_then(|_, _| Ok(()))?;
        info!("Flash: cleared block {}", self.block);
        Ok(())
    }

    fn erase_then(&self, op: impl FnOnce(&mut FlashDriver, u32) -> Result<()>) -> Result<()> {
        let offset = self.offset()?;
        let end = offset.checked_add(ERASE_BYTES).ok_or(Error::IndexOutOfBounds)?;
        self.store.with_flash(|flash| {
            flash.blocking_erase(offset, end).map_err(Error::Flash)?;
            op(flash, offset)
        })
    }

    fn offset(&self) -> Result<u32> {
        TOTAL_BLOCKS
            .checked_sub(self.block.saturating_add(1))
            .and_then(|index| index.checked_mul(ERASE_BYTES))
            .ok_or(Error::IndexOutOfBounds)
    }
}

/// FNV-1a hash of the type name, so a block read as the wrong type reads as empty.
fn type_hash<T>() -> u32 {
    core::any::type_name::<T>()
        .bytes()
        .fold(2_166_136_261, |hash, byte| (hash ^ u32::from(byte)).wrapping_mul(16_777_619))
}

fn crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
