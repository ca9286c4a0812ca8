use crate::error::{Error, ErrorKind};
use crate::packet::CRC16;
use bitfield_struct::bitfield;
use core::convert::TryFrom;

/// Zone bit 7 set: Access 32 bytes, otherwise 4 bytes.
const ZONE_READWRITE_32: u8 = 0x80;

/// A unit of data exchange is either 4 or 32 bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Size {
    Word = 0x04,
    Block = 0x20,
}

impl Size {
    pub const fn len(&self) -> usize {
        *self as usize
    }
}

impl TryFrom<usize> for Size {
    type Error = Error;
    fn try_from(length: usize) -> Result<Self, Self::Error> {
        match length {
            0x04 => Ok(Size::Word),
            0x20 => Ok(Size::Block),
            _ => Err(ErrorKind::BadParam.into()),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Zone {
    Config = 0x00,
    Otp = 0x01,
    Data = 0x02,
}

impl Zone {
    /// Number of 32-byte blocks in the config zone.
    pub const CONFIG_BLOCKS: u8 = 4;
    /// Number of 32-byte blocks in the OTP zone.
    pub const OTP_BLOCKS: u8 = 2;

    pub(crate) fn encode(&self, size: Size) -> u8 {
        match size {
            Size::Word => *self as u8,
            Size::Block => *self as u8 | ZONE_READWRITE_32,
        }
    }

    /// Error reported when the chip refuses a write into this zone.
    /// Data and OTP zones are locked together.
    pub(crate) fn locked_error(&self) -> ErrorKind {
        match self {
            Self::Config => ErrorKind::ConfigZoneLocked,
            Self::Otp | Self::Data => ErrorKind::DataZoneLocked,
        }
    }
}

/// Location of a word or a block inside one of the zones, encoded the way
/// `Read` and `Write` expect it in `param2`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Address {
    zone: Zone,
    value: u16,
    offset: u8,
}

impl Address {
    /// Word `offset` (0-7) inside 32-byte `block` of the config zone.
    pub fn config(block: u8, offset: u8) -> Result<Self, Error> {
        Self::linear(Zone::Config, Zone::CONFIG_BLOCKS, block, offset)
    }

    /// Word `offset` (0-7) inside 32-byte `block` of the OTP zone.
    pub fn otp(block: u8, offset: u8) -> Result<Self, Error> {
        Self::linear(Zone::Otp, Zone::OTP_BLOCKS, block, offset)
    }

    /// Word `offset` (0-7) inside 32-byte `block` of a data zone slot.
    pub fn slot(slot: Slot, block: u8, offset: u8) -> Result<Self, Error> {
        if block >= slot.block_count() || offset > 0x07 {
            return Err(ErrorKind::BadParam.into());
        }
        let value = (block as u16) << 8 | (slot as u16) << 3 | offset as u16;
        Ok(Self {
            zone: Zone::Data,
            value,
            offset,
        })
    }

    fn linear(zone: Zone, blocks: u8, block: u8, offset: u8) -> Result<Self, Error> {
        if block >= blocks || offset > 0x07 {
            return Err(ErrorKind::BadParam.into());
        }
        let value = (block as u16) << 3 | offset as u16;
        Ok(Self {
            zone,
            value,
            offset,
        })
    }

    pub fn zone(&self) -> Zone {
        self.zone
    }

    /// A block access must start at word offset 0.
    pub(crate) fn check(&self, size: Size) -> Result<u16, Error> {
        match size {
            Size::Block if self.offset != 0 => Err(ErrorKind::BadParam.into()),
            _ => Ok(self.value),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Slot {
    /// PrivateKey0x contains 36 bytes, taking 2 block reads.
    PrivateKey00 = 0x00,
    PrivateKey01 = 0x01,
    PrivateKey02 = 0x02,
    PrivateKey03 = 0x03,
    PrivateKey04 = 0x04,
    PrivateKey05 = 0x05,
    PrivateKey06 = 0x06,
    PrivateKey07 = 0x07,
    /// Data08 contains 416 bytes, taking 13 block reads.
    Data08 = 0x08,
    /// Certificate0x contains 72 bytes, taking 3 block reads.
    Certificate09 = 0x09,
    Certificate0a = 0x0a,
    Certificate0b = 0x0b,
    Certificate0c = 0x0c,
    Certificate0d = 0x0d,
    Certificate0e = 0x0e,
    Certificate0f = 0x0f,
}

impl Slot {
    /// Check if a slot can contain private keys.
    pub fn is_private_key(&self) -> bool {
        *self as u16 <= Self::PrivateKey07 as u16
    }

    /// Check if a slot can contain certificates or public keys.
    pub fn is_certificate(&self) -> bool {
        Self::Certificate09 as u16 <= *self as u16
    }

    /// Slot capacity in bytes.
    pub fn size(&self) -> usize {
        match self {
            slot if slot.is_private_key() => 36,
            Self::Data08 => 416,
            _ => 72,
        }
    }

    /// Number of 32-byte blocks needed to cover the slot.
    pub fn block_count(&self) -> u8 {
        ((self.size() + Size::Block.len() - 1) / Size::Block.len()) as u8
    }
}

impl TryFrom<u8> for Slot {
    type Error = Error;
    fn try_from(index: u8) -> Result<Self, Self::Error> {
        use Slot::*;
        const SLOTS: [Slot; 16] = [
            PrivateKey00,
            PrivateKey01,
            PrivateKey02,
            PrivateKey03,
            PrivateKey04,
            PrivateKey05,
            PrivateKey06,
            PrivateKey07,
            Data08,
            Certificate09,
            Certificate0a,
            Certificate0b,
            Certificate0c,
            Certificate0d,
            Certificate0e,
            Certificate0f,
        ];
        SLOTS
            .get(index as usize)
            .copied()
            .ok_or(ErrorKind::BadParam.into())
    }
}

/// Access policy of a slot, two bytes per slot at config offset 20.
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct SlotConfig {
    #[bits(4)]
    pub read_key: u8,
    pub no_mac: bool,
    pub limited_use: bool,
    pub encrypt_read: bool,
    pub is_secret: bool,
    #[bits(4)]
    pub write_key: u8,
    #[bits(4)]
    pub write_config: u8,
}

/// Key type and usage restrictions of a slot, two bytes per slot at config
/// offset 96.
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct KeyConfig {
    pub private: bool,
    pub pub_info: bool,
    #[bits(3)]
    pub key_type: u8,
    pub lockable: bool,
    pub req_random: bool,
    pub req_auth: bool,
    #[bits(4)]
    pub auth_key: u8,
    pub persistent_disable: bool,
    pub rfu: bool,
    #[bits(2)]
    pub x509_id: u8,
}

/// Snapshot of the 128-byte configuration zone.
///
/// The chip owns the authoritative copy. A snapshot is stale as soon as the
/// zone is written to or locked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigZone {
    bytes: [u8; ConfigZone::SIZE],
}

impl ConfigZone {
    pub const SIZE: usize = 128;

    const REVISION_INDEX: usize = 4;
    const I2C_ADDRESS_INDEX: usize = 16;
    const OTP_MODE_INDEX: usize = 18;
    const CHIP_MODE_INDEX: usize = 19;
    const SLOT_CONFIG_INDEX: usize = 20;
    const LOCK_VALUE_INDEX: usize = 86;
    const LOCK_CONFIG_INDEX: usize = 87;
    const SLOT_LOCKED_INDEX: usize = 88;
    const KEY_CONFIG_INDEX: usize = 96;
    /// Lock bytes hold this value while the zone is still writable.
    const UNLOCKED: u8 = 0x55;

    pub fn new(bytes: [u8; Self::SIZE]) -> Self {
        Self { bytes }
    }

    /// Nine serial number bytes, scattered across block 0.
    pub fn serial_number(&self) -> [u8; 9] {
        let mut serial = [0x00; 9];
        serial[0..4].copy_from_slice(&self.bytes[0..4]);
        serial[4..9].copy_from_slice(&self.bytes[8..13]);
        serial
    }

    pub fn revision(&self) -> [u8; 4] {
        let mut revision = [0x00; 4];
        revision.copy_from_slice(&self.bytes[Self::REVISION_INDEX..Self::REVISION_INDEX + 4]);
        revision
    }

    /// I2C address byte as stored on chip, i.e. the 7-bit address shifted
    /// left by one.
    pub fn i2c_address(&self) -> u8 {
        self.bytes[Self::I2C_ADDRESS_INDEX]
    }

    pub fn otp_mode(&self) -> u8 {
        self.bytes[Self::OTP_MODE_INDEX]
    }

    pub fn chip_mode(&self) -> u8 {
        self.bytes[Self::CHIP_MODE_INDEX]
    }

    pub fn slot_config(&self, slot: Slot) -> SlotConfig {
        SlotConfig::from_bits(self.u16_at(Self::SLOT_CONFIG_INDEX + slot as usize * 2))
    }

    pub fn key_config(&self, slot: Slot) -> KeyConfig {
        KeyConfig::from_bits(self.u16_at(Self::KEY_CONFIG_INDEX + slot as usize * 2))
    }

    pub fn is_locked(&self, zone: Zone) -> bool {
        match zone {
            Zone::Config => self.bytes[Self::LOCK_CONFIG_INDEX] != Self::UNLOCKED,
            Zone::Otp | Zone::Data => self.bytes[Self::LOCK_VALUE_INDEX] != Self::UNLOCKED,
        }
    }

    /// A cleared bit in SlotLocked means the slot is locked.
    pub fn is_slot_locked(&self, slot: Slot) -> bool {
        self.u16_at(Self::SLOT_LOCKED_INDEX) & (0x01u16 << slot as u32) == 0x00
    }

    /// Checksum over the whole zone, as expected by `Lock` with CRC check.
    pub fn crc(&self) -> u16 {
        CRC16.checksum(&self.bytes)
    }

    fn u16_at(&self, index: usize) -> u16 {
        u16::from_le_bytes([self.bytes[index], self.bytes[index + 1]])
    }

    /// Position of a config byte: (block, word offset, byte in word).
    pub(crate) fn locate_index(index: usize) -> (u8, u8, usize) {
        let block = (index / Size::Block.len()) as u8;
        let offset = ((index % Size::Block.len()) / Size::Word.len()) as u8;
        let position = index % Size::Word.len();
        (block, offset, position)
    }

    pub(crate) fn lock_word() -> (u8, u8) {
        let (block, offset, _) = Self::locate_index(Self::LOCK_VALUE_INDEX);
        (block, offset)
    }

    pub(crate) fn slot_locked_word() -> (u8, u8) {
        let (block, offset, _) = Self::locate_index(Self::SLOT_LOCKED_INDEX);
        (block, offset)
    }

    /// Interpret the word returned for `lock_word`.
    pub(crate) fn lock_word_is_locked(word: &[u8], zone: Zone) -> bool {
        let (_, _, lock_value) = Self::locate_index(Self::LOCK_VALUE_INDEX);
        let (_, _, lock_config) = Self::locate_index(Self::LOCK_CONFIG_INDEX);
        match zone {
            Zone::Config => word[lock_config] != Self::UNLOCKED,
            Zone::Otp | Zone::Data => word[lock_value] != Self::UNLOCKED,
        }
    }
}

impl AsRef<[u8]> for ConfigZone {
    fn as_ref(&self) -> &[u8] {
        self.bytes.as_ref()
    }
}

impl TryFrom<&[u8]> for ConfigZone {
    type Error = Error;
    fn try_from(buffer: &[u8]) -> Result<Self, Self::Error> {
        let bytes = buffer
            .try_into()
            .map_err(|_| Error::from(ErrorKind::InvalidSize))?;
        Ok(Self::new(bytes))
    }
}
