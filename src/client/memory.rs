//! Memory and configuration operations

use crate::command::{self, Block, Lock, PublicKey, Serial, Word};
use crate::error::{Error, ErrorKind, Status};
use crate::memory::{Address, ConfigZone, Size, Slot, Zone};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal::delay::DelayNs;
use heapless::Vec;

use super::{AtCaClient, Inner};

// A public key slot holds 4 pad bytes, X, 4 pad bytes and Y.
const PUBKEY_SLOT_SIZE: usize = 72;
const PUBKEY_PAD: usize = 4;
const COORDINATE: usize = 32;

/// Memory zones consists of config, OTP and data.
pub struct Memory<'a, M: RawMutex, PHY, D> {
    pub(crate) atca: &'a AtCaClient<M, PHY, D>,
}

impl<PHY, D> Inner<PHY, D>
where
    PHY: embedded_hal::i2c::I2c,
    D: DelayNs,
{
    fn read(&mut self, address: Address, size: Size) -> Result<Vec<u8, 32>, Error> {
        let packet = command::Read::new(self.packet_builder()).read(address, size)?;
        let response = self.execute(packet)?;
        Vec::from_slice(response.as_ref()).map_err(|()| ErrorKind::SmallBuffer.into())
    }

    fn write(&mut self, address: Address, data: &[u8]) -> Result<(), Error> {
        let zone = address.zone();
        if zone == Zone::Config {
            self.invalidate_config_zone();
        }
        let packet = command::Write::new(self.packet_builder()).write(address, data)?;
        let result = self.execute(packet).map(drop);
        result.map_err(|err| self.refusal_as_locked(err, zone))
    }

    fn lock_word(&mut self) -> Result<Word, Error> {
        let (block, offset) = ConfigZone::lock_word();
        let word = self.read(Address::config(block, offset)?, Size::Word)?;
        Word::try_from(word.as_slice())
    }

    fn slot_locked_bits(&mut self) -> Result<u16, Error> {
        let (block, offset) = ConfigZone::slot_locked_word();
        let word = self.read(Address::config(block, offset)?, Size::Word)?;
        Ok(u16::from_le_bytes([word[0], word[1]]))
    }

    /// The device answers with an execution error when the zone is locked,
    /// but also for read-only bytes and for locks issued out of order. Only
    /// the lock word turns the status into a locked zone error.
    fn refusal_as_locked(&mut self, err: Error, zone: Zone) -> Error {
        if err.status() != Some(Status::Execution) {
            return err;
        }
        match self.lock_word() {
            Ok(word) if ConfigZone::lock_word_is_locked(word.as_ref(), zone) => {
                warn!("{:?} zone refused the request", zone);
                zone.locked_error().into()
            }
            _ => err,
        }
    }

    fn refusal_as_slot_locked(&mut self, err: Error, slot: Slot) -> Error {
        if err.status() != Some(Status::Execution) {
            return err;
        }
        match self.slot_locked_bits() {
            Ok(bits) if bits & (0x01u16 << slot as u32) == 0x00 => {
                warn!("slot {:?} is locked already", slot);
                ErrorKind::DataZoneLocked.into()
            }
            _ => err,
        }
    }

    fn read_config_zone(&mut self) -> Result<ConfigZone, Error> {
        let mut bytes = [0x00u8; ConfigZone::SIZE];
        for (block, chunk) in bytes.chunks_mut(Size::Block.len()).enumerate() {
            let data = self.read(Address::config(block as u8, 0)?, Size::Block)?;
            chunk.copy_from_slice(data.as_slice());
        }
        let config_zone = ConfigZone::new(bytes);
        self.cache_config_zone(config_zone);
        Ok(config_zone)
    }
}

// Only expose the highest level APIs.
impl<'a, M, PHY, D> Memory<'a, M, PHY, D>
where
    PHY: embedded_hal::i2c::I2c,
    D: DelayNs,
    M: RawMutex,
{
    /// Read a word or a block.
    pub fn read(&self, address: Address, size: Size) -> Result<Vec<u8, 32>, Error> {
        self.atca.lock_inner()?.read(address, size)
    }

    /// Write a word or a block. The size is taken from `data`.
    pub fn write(&self, address: Address, data: &[u8]) -> Result<(), Error> {
        self.atca.lock_inner()?.write(address, data)
    }

    pub fn serial_number(&self) -> Result<Serial, Error> {
        let data = self.read(Address::config(0, 0)?, Size::Block)?;
        Serial::try_from(data.as_slice())
    }

    /// Cached snapshot of the config zone. Read from the device on first use
    /// and after every write or lock.
    pub fn read_config_zone(&self) -> Result<ConfigZone, Error> {
        let mut inner = self.atca.lock_inner()?;
        match inner.cached_config_zone() {
            Some(config_zone) => Ok(config_zone),
            None => inner.read_config_zone(),
        }
    }

    /// Read the config zone from the device regardless of the cache.
    pub fn refresh_config_zone(&self) -> Result<ConfigZone, Error> {
        self.atca.lock_inner()?.read_config_zone()
    }

    /// Always asks the device.
    pub fn is_locked(&self, zone: Zone) -> Result<bool, Error> {
        let word = self.atca.lock_inner()?.lock_word()?;
        Ok(ConfigZone::lock_word_is_locked(word.as_ref(), zone))
    }

    pub fn is_slot_locked(&self, slot: Slot) -> Result<bool, Error> {
        let slot_locked_bits = self.atca.lock_inner()?.slot_locked_bits()?;
        Ok(slot_locked_bits & (0x01u16 << slot as u32) == 0x00)
    }

    /// Irreversibly lock `zone`. `Zone::Data` covers the OTP zone as well.
    /// A zone that is locked already reports the matching locked zone error.
    pub fn lock(&self, zone: Zone) -> Result<(), Error> {
        let mut inner = self.atca.lock_inner()?;
        inner.invalidate_config_zone();
        let packet = Lock::new(inner.packet_builder()).zone(zone, None)?;
        info!("locking {:?} zone", zone);
        let result = inner.execute(packet).map(drop);
        result.map_err(|err| inner.refusal_as_locked(err, zone))
    }

    /// Lock `zone` only if its content matches `crc`. A mismatch and an
    /// already locked zone both surface as `Status::Execution`; query
    /// `is_locked` to tell them apart.
    pub fn lock_crc(&self, zone: Zone, crc: u16) -> Result<(), Error> {
        let mut inner = self.atca.lock_inner()?;
        inner.invalidate_config_zone();
        let packet = Lock::new(inner.packet_builder()).zone(zone, Some(crc))?;
        info!("locking {:?} zone, crc {:x}", zone, crc);
        inner.execute(packet).map(drop)
    }

    pub fn lock_config(&self) -> Result<(), Error> {
        self.lock(Zone::Config)
    }

    pub fn lock_data_and_otp(&self) -> Result<(), Error> {
        self.lock(Zone::Data)
    }

    pub fn lock_slot(&self, slot: Slot) -> Result<(), Error> {
        let mut inner = self.atca.lock_inner()?;
        inner.invalidate_config_zone();
        let packet = Lock::new(inner.packet_builder()).slot(slot)?;
        info!("locking slot {:?}", slot);
        let result = inner.execute(packet).map(drop);
        result.map_err(|err| inner.refusal_as_slot_locked(err, slot))
    }

    /// Read a whole block of a slot.
    pub fn read_slot(&self, slot: Slot, block: u8) -> Result<Block, Error> {
        check_whole_block(slot, block)?;
        let data = self.read(Address::slot(slot, block, 0)?, Size::Block)?;
        Block::try_from(data.as_slice())
    }

    /// Write a whole block of a slot.
    pub fn write_slot(&self, slot: Slot, block: u8, data: &Block) -> Result<(), Error> {
        check_whole_block(slot, block)?;
        self.write(Address::slot(slot, block, 0)?, data.as_ref())
    }

    /// Public key stored in a slot of at least 72 bytes.
    pub fn pubkey(&self, slot: Slot) -> Result<PublicKey, Error> {
        let mut raw = [0x00u8; PUBKEY_SLOT_SIZE];
        let mut inner = self.atca.lock_inner()?;
        for (address, size, range) in pubkey_layout(slot)? {
            let data = inner.read(address, size)?;
            raw[range].copy_from_slice(data.as_slice());
        }

        let mut pubkey = PublicKey::default();
        let (x, y) = pubkey.as_mut().split_at_mut(COORDINATE);
        x.copy_from_slice(&raw[PUBKEY_PAD..PUBKEY_PAD + COORDINATE]);
        y.copy_from_slice(&raw[PUBKEY_SLOT_SIZE - COORDINATE..]);
        Ok(pubkey)
    }

    pub fn write_pubkey(&self, slot: Slot, pubkey: &PublicKey) -> Result<(), Error> {
        let mut raw = [0x00u8; PUBKEY_SLOT_SIZE];
        raw[PUBKEY_PAD..PUBKEY_PAD + COORDINATE].copy_from_slice(pubkey.x());
        raw[PUBKEY_SLOT_SIZE - COORDINATE..].copy_from_slice(pubkey.y());

        let mut inner = self.atca.lock_inner()?;
        for (address, _, range) in pubkey_layout(slot)? {
            inner.write(address, &raw[range])?;
        }
        Ok(())
    }
}

fn check_whole_block(slot: Slot, block: u8) -> Result<(), Error> {
    if (block as usize + 1) * Size::Block.len() > slot.size() {
        return Err(ErrorKind::BadParam.into());
    }
    Ok(())
}

/// Accesses covering the 72 bytes of a public key slot: two blocks, then the
/// tail of the third block word by word.
fn pubkey_layout(slot: Slot) -> Result<[(Address, Size, core::ops::Range<usize>); 4], Error> {
    if slot.size() < PUBKEY_SLOT_SIZE {
        return Err(ErrorKind::BadParam.into());
    }
    Ok([
        (Address::slot(slot, 0, 0)?, Size::Block, 0..32),
        (Address::slot(slot, 1, 0)?, Size::Block, 32..64),
        (Address::slot(slot, 2, 0)?, Size::Word, 64..68),
        (Address::slot(slot, 2, 1)?, Size::Word, 68..72),
    ])
}
