// Command builders and the fixed-size values they carry. Each builder wraps
// a `PacketBuilder` and knows the mode bits of a single opcode.
use crate::error::{Error, ErrorKind};
use crate::memory::{Address, Size, Slot, Zone};
use crate::packet::{Packet, PacketBuilder};
use core::convert::TryFrom;
use generic_array::typenum::{U32, U4, U64, U9};
use generic_array::GenericArray;

// Encapsulates raw 4 bytes. When it is a return value of `info`, it contains
// the device's revision number.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Word {
    value: GenericArray<u8, U4>,
}

impl TryFrom<&[u8]> for Word {
    type Error = Error;
    fn try_from(buffer: &[u8]) -> Result<Self, Self::Error> {
        if buffer.len() != Size::Word.len() {
            return Err(ErrorKind::InvalidSize.into());
        }

        let mut value = Self::default();
        value.as_mut().copy_from_slice(buffer);
        Ok(value)
    }
}

impl AsRef<[u8]> for Word {
    fn as_ref(&self) -> &[u8] {
        self.value.as_ref()
    }
}

impl AsMut<[u8]> for Word {
    fn as_mut(&mut self) -> &mut [u8] {
        self.value.as_mut()
    }
}

// Encapsulates raw 32 bytes. Random numbers, nonce inputs and slot blocks
// travel in this form.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Block {
    value: GenericArray<u8, U32>,
}

impl TryFrom<&[u8]> for Block {
    type Error = Error;
    fn try_from(buffer: &[u8]) -> Result<Self, Self::Error> {
        if buffer.len() != Size::Block.len() {
            return Err(ErrorKind::InvalidSize.into());
        }

        let mut value = Self::default();
        value.as_mut().copy_from_slice(buffer);
        Ok(value)
    }
}

impl From<[u8; 32]> for Block {
    fn from(bytes: [u8; 32]) -> Self {
        Self {
            value: bytes.into(),
        }
    }
}

impl AsRef<[u8]> for Block {
    fn as_ref(&self) -> &[u8] {
        self.value.as_ref()
    }
}

impl AsMut<[u8]> for Block {
    fn as_mut(&mut self) -> &mut [u8] {
        self.value.as_mut()
    }
}

// Represents a serial number consisting of 9 bytes. Its uniqueness is
// guaranteed. A return type of API `serial_number`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Serial {
    value: GenericArray<u8, U9>,
}

impl TryFrom<&[u8]> for Serial {
    type Error = Error;
    fn try_from(buffer: &[u8]) -> Result<Self, Self::Error> {
        if buffer.len() != Size::Block.len() {
            return Err(ErrorKind::InvalidSize.into());
        }

        let mut value = [0x00; 9];
        value[0..4].as_mut().copy_from_slice(&buffer[0..4]);
        value[4..9].as_mut().copy_from_slice(&buffer[8..13]);
        Ok(Self {
            value: value.into(),
        })
    }
}

impl AsRef<[u8]> for Serial {
    fn as_ref(&self) -> &[u8] {
        self.value.as_ref()
    }
}

/// Uncompressed P-256 public key, X coordinate followed by Y.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublicKey {
    pub(crate) value: GenericArray<u8, U64>,
}

impl PublicKey {
    pub fn x(&self) -> &[u8] {
        &self.value[..32]
    }

    pub fn y(&self) -> &[u8] {
        &self.value[32..]
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        self.value.as_ref()
    }
}

impl AsMut<[u8]> for PublicKey {
    fn as_mut(&mut self) -> &mut [u8] {
        self.value.as_mut()
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = Error;
    fn try_from(buffer: &[u8]) -> Result<Self, Self::Error> {
        if buffer.len() != 0x40 {
            return Err(ErrorKind::InvalidSize.into());
        }

        let mut value = Self::default();
        value.as_mut().copy_from_slice(buffer);
        Ok(value)
    }
}

impl From<&PublicKey> for p256::EncodedPoint {
    fn from(public_key: &PublicKey) -> Self {
        p256::EncodedPoint::from_untagged_bytes(&public_key.value)
    }
}

// A digest yielded from the SHA engine of the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Digest {
    pub(crate) value: GenericArray<u8, U32>,
}

impl TryFrom<&[u8]> for Digest {
    type Error = Error;
    fn try_from(buffer: &[u8]) -> Result<Self, Self::Error> {
        if buffer.len() != 32 {
            return Err(ErrorKind::InvalidSize.into());
        }

        let mut value = Self::default();
        value.as_mut().copy_from_slice(buffer);
        Ok(value)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        self.value.as_ref()
    }
}

impl AsMut<[u8]> for Digest {
    fn as_mut(&mut self) -> &mut [u8] {
        self.value.as_mut()
    }
}

/// 32-byte response of the MAC command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Mac {
    value: GenericArray<u8, U32>,
}

impl Mac {
    /// Compare without an early exit on the first differing byte.
    pub fn matches(&self, other: &Mac) -> bool {
        self.value
            .iter()
            .zip(other.value.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl TryFrom<&[u8]> for Mac {
    type Error = Error;
    fn try_from(buffer: &[u8]) -> Result<Self, Self::Error> {
        if buffer.len() != 32 {
            return Err(ErrorKind::InvalidSize.into());
        }

        let mut value = Self::default();
        value.as_mut().copy_from_slice(buffer);
        Ok(value)
    }
}

impl From<[u8; 32]> for Mac {
    fn from(bytes: [u8; 32]) -> Self {
        Self {
            value: bytes.into(),
        }
    }
}

impl AsRef<[u8]> for Mac {
    fn as_ref(&self) -> &[u8] {
        self.value.as_ref()
    }
}

impl AsMut<[u8]> for Mac {
    fn as_mut(&mut self) -> &mut [u8] {
        self.value.as_mut()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum OpCode {
    /// CheckMac command op-code
    CheckMac = 0x28,
    /// GenKey command op-code
    GenKey = 0x40,
    /// Info command op-code
    Info = 0x30,
    /// Lock command op-code
    Lock = 0x17,
    /// MAC command op-code
    Mac = 0x08,
    /// Nonce command op-code
    Nonce = 0x16,
    /// Random command op-code
    Random = 0x1B,
    /// Read command op-code
    Read = 0x02,
    /// SHA command op-code
    Sha = 0x47,
    /// Write command op-code
    Write = 0x12,
}

/// What GenKey should produce in the given slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KeyGenMode {
    /// Generate a new private key and return its public key.
    Private = 0x04,
    /// Recompute the public key of the private key stored in the slot.
    Public = 0x00,
    /// Fold a digest of the slot's public key into TempKey. Nothing is
    /// returned but a status.
    PubKeyDigest = 0x10,
}

impl KeyGenMode {
    pub(crate) fn returns_public_key(&self) -> bool {
        !matches!(self, Self::PubKeyDigest)
    }
}

/// Input of the Nonce command.
#[derive(Clone, Copy, Debug)]
pub enum NonceMode<'a> {
    /// Load 32 bytes from the host into TempKey unchanged.
    Passthrough(&'a Block),
    /// Combine 20 host bytes with the chip's RNG output. The chip hands
    /// back its 32-byte random contribution.
    Random(&'a [u8; 20]),
}

/// Origin of TempKey content, mirrored in mode bit 2 of MAC and CheckMac.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TempKeySource {
    Random,
    Input,
}

impl TempKeySource {
    const MODE_SOURCE_INPUT: u8 = 0x04;

    fn mode_bit(&self) -> u8 {
        match self {
            Self::Random => 0x00,
            Self::Input => Self::MODE_SOURCE_INPUT,
        }
    }
}

pub(crate) struct CheckMac<'a>(PacketBuilder<'a>);
pub(crate) struct GenKey<'a>(PacketBuilder<'a>);
pub(crate) struct Info<'a>(PacketBuilder<'a>);
pub(crate) struct Lock<'a>(PacketBuilder<'a>);
pub(crate) struct MacCmd<'a>(PacketBuilder<'a>);
pub(crate) struct NonceCtx<'a>(PacketBuilder<'a>);
pub(crate) struct Random<'a>(PacketBuilder<'a>);
pub(crate) struct Read<'a>(PacketBuilder<'a>);
pub(crate) struct Sha<'a>(PacketBuilder<'a>);
pub(crate) struct Write<'a>(PacketBuilder<'a>);

/// CheckMac
impl<'a> CheckMac<'a> {
    /// Second 32 bytes of the SHA message come from TempKey.
    const MODE_TEMPKEY_CHALLENGE: u8 = 0x01;
    const CLIENT_CHALLENGE_SIZE: usize = 32;
    const OTHER_DATA_SIZE: usize = 13;

    pub(crate) fn new(builder: PacketBuilder<'a>) -> Self {
        Self(builder)
    }

    /// Ask the device whether `response` is the MAC that `MacCmd::tempkey`
    /// would produce for the same slot and TempKey.
    pub(crate) fn tempkey(
        &mut self,
        key_id: Slot,
        source: TempKeySource,
        response: &Mac,
    ) -> Result<Packet, Error> {
        let mode = Self::MODE_TEMPKEY_CHALLENGE | source.mode_bit();
        // OtherData replays the opcode, mode and key id the MAC was computed
        // with. OTP and serial number bytes are not included.
        let mut other_data = [0x00u8; Self::OTHER_DATA_SIZE];
        other_data[0] = OpCode::Mac as u8;
        other_data[1] = MacCmd::mode(source);
        other_data[2..4].copy_from_slice(&(key_id as u16).to_le_bytes());

        let mut data = [0x00u8; Self::CLIENT_CHALLENGE_SIZE + 32 + Self::OTHER_DATA_SIZE];
        let (_challenge, rest) = data.split_at_mut(Self::CLIENT_CHALLENGE_SIZE);
        let (client_response, other) = rest.split_at_mut(32);
        client_response.copy_from_slice(response.as_ref());
        other.copy_from_slice(&other_data);

        let packet = self
            .0
            .opcode(OpCode::CheckMac)
            .mode(mode)
            .param2(key_id as u16)
            .pdu_data(data)
            .build()?;
        Ok(packet)
    }
}

/// GenKey
impl<'a> GenKey<'a> {
    pub(crate) fn new(builder: PacketBuilder<'a>) -> Self {
        Self(builder)
    }

    pub(crate) fn generate(&mut self, key_id: Slot, mode: KeyGenMode) -> Result<Packet, Error> {
        // Key pairs live in slots 0-7 only.
        if !key_id.is_private_key() {
            return Err(ErrorKind::BadParam.into());
        }

        let builder = self
            .0
            .opcode(OpCode::GenKey)
            .mode(mode as u8)
            .param2(key_id as u16);
        if mode.returns_public_key() {
            builder.response_length(0x40);
        }
        builder.build()
    }

    pub(crate) fn private_key(&mut self, key_id: Slot) -> Result<Packet, Error> {
        self.generate(key_id, KeyGenMode::Private)
    }

    pub(crate) fn public_key(&mut self, key_id: Slot) -> Result<Packet, Error> {
        self.generate(key_id, KeyGenMode::Public)
    }
}

impl<'a> Info<'a> {
    // Info mode Revision
    const MODE_REVISION: u8 = 0x00;

    pub(crate) fn new(builder: PacketBuilder<'a>) -> Self {
        Self(builder)
    }

    /// Command execution will return a word containing the revision.
    pub(crate) fn revision(&mut self) -> Result<Packet, Error> {
        let packet = self
            .0
            .opcode(OpCode::Info)
            .mode(Self::MODE_REVISION)
            .response_length(Size::Word.len())
            .build()?;
        Ok(packet)
    }
}

impl<'a> Lock<'a> {
    const LOCK_ZONE_NO_CRC: u8 = 0x80;
    const LOCK_ZONE_DATA_AND_OTP: u8 = 0x01;
    const LOCK_SLOT: u8 = 0x02;

    pub(crate) fn new(builder: PacketBuilder<'a>) -> Self {
        Self(builder)
    }

    /// `Zone::Data` locks the data and OTP zones together. OTP cannot be
    /// locked on its own.
    pub(crate) fn zone(&mut self, zone: Zone, crc: Option<u16>) -> Result<Packet, Error> {
        let zone_mode = match zone {
            Zone::Config => 0x00,
            Zone::Data => Self::LOCK_ZONE_DATA_AND_OTP,
            Zone::Otp => return Err(ErrorKind::BadParam.into()),
        };

        let packet = match crc {
            None => self
                .0
                .opcode(OpCode::Lock)
                .mode(Self::LOCK_ZONE_NO_CRC | zone_mode)
                .build()?,
            Some(crc) => self
                .0
                .opcode(OpCode::Lock)
                .mode(zone_mode)
                .param2(crc)
                .build()?,
        };

        Ok(packet)
    }

    pub(crate) fn slot(&mut self, key_id: Slot) -> Result<Packet, Error> {
        let mode = (key_id as u8) << 2 | Self::LOCK_SLOT | Self::LOCK_ZONE_NO_CRC;
        let packet = self.0.opcode(OpCode::Lock).mode(mode).build()?;
        Ok(packet)
    }
}

/// MAC
impl<'a> MacCmd<'a> {
    /// Second 32 bytes of the SHA message come from TempKey.
    const MODE_TEMPKEY_CHALLENGE: u8 = 0x01;

    pub(crate) fn new(builder: PacketBuilder<'a>) -> Self {
        Self(builder)
    }

    pub(crate) fn mode(source: TempKeySource) -> u8 {
        Self::MODE_TEMPKEY_CHALLENGE | source.mode_bit()
    }

    /// Digest of the key in `key_id` and the current TempKey.
    pub(crate) fn tempkey(&mut self, key_id: Slot, source: TempKeySource) -> Result<Packet, Error> {
        let packet = self
            .0
            .opcode(OpCode::Mac)
            .mode(Self::mode(source))
            .param2(key_id as u16)
            .response_length(32)
            .build()?;
        Ok(packet)
    }
}

/// Nonce
impl<'a> NonceCtx<'a> {
    const MODE_SEED_UPDATE: u8 = 0x00; // Nonce mode: update seed
    const MODE_PASSTHROUGH: u8 = 0x03; // Nonce mode: pass-through
    const MODE_TARGET_TEMPKEY: u8 = 0x00; // Nonce mode: target is TempKey

    pub(crate) fn new(builder: PacketBuilder<'a>) -> Self {
        Self(builder)
    }

    pub(crate) fn load(&mut self, input: NonceMode<'_>) -> Result<Packet, Error> {
        match input {
            NonceMode::Passthrough(block) => self
                .0
                .opcode(OpCode::Nonce)
                .mode(Self::MODE_PASSTHROUGH | Self::MODE_TARGET_TEMPKEY)
                .pdu_data(block)
                .build(),
            NonceMode::Random(num_in) => self
                .0
                .opcode(OpCode::Nonce)
                .mode(Self::MODE_SEED_UPDATE)
                .pdu_data(num_in)
                .response_length(32)
                .build(),
        }
    }
}

/// Random
impl<'a> Random<'a> {
    const MODE_SEED_UPDATE: u8 = 0x00;

    pub(crate) fn new(builder: PacketBuilder<'a>) -> Self {
        Self(builder)
    }

    pub(crate) fn random(&mut self) -> Result<Packet, Error> {
        let packet = self
            .0
            .opcode(OpCode::Random)
            .mode(Self::MODE_SEED_UPDATE)
            .response_length(Size::Block.len())
            .build()?;
        Ok(packet)
    }
}

/// Read
impl<'a> Read<'a> {
    pub(crate) fn new(builder: PacketBuilder<'a>) -> Self {
        Self(builder)
    }

    pub(crate) fn read(&mut self, address: Address, size: Size) -> Result<Packet, Error> {
        let addr = address.check(size)?;
        let mode = address.zone().encode(size);
        let packet = self
            .0
            .opcode(OpCode::Read)
            .mode(mode)
            .param2(addr)
            .response_length(size.len())
            .build()?;
        Ok(packet)
    }
}

impl<'a> Sha<'a> {
    /// Initialization, does not accept a message
    const MODE_SHA256_START: u8 = 0x00;
    /// Add 64 bytes in the meesage to the SHA context
    const MODE_SHA256_UPDATE: u8 = 0x01;
    /// Complete the calculation and return the digest
    const MODE_SHA256_END: u8 = 0x02;

    pub(crate) const BLOCK_SIZE: usize = 64;

    pub(crate) fn new(builder: PacketBuilder<'a>) -> Self {
        Self(builder)
    }

    pub(crate) fn start(&mut self) -> Result<Packet, Error> {
        let packet = self
            .0
            .opcode(OpCode::Sha)
            .mode(Self::MODE_SHA256_START)
            .build()?;
        Ok(packet)
    }

    /// Data length should be exactly 64 bytes.
    pub(crate) fn update(&mut self, data: impl AsRef<[u8]>) -> Result<Packet, Error> {
        let length = data.as_ref().len();
        if length != Self::BLOCK_SIZE {
            return Err(ErrorKind::BadParam.into());
        }

        let packet = self
            .0
            .opcode(OpCode::Sha)
            .mode(Self::MODE_SHA256_UPDATE)
            .param2(length as u16)
            .pdu_data(data)
            .build()?;
        Ok(packet)
    }

    /// Command execution will return a digest of Block size.
    pub(crate) fn end(&mut self, data: impl AsRef<[u8]>) -> Result<Packet, Error> {
        let length = data.as_ref().len();
        if length >= Self::BLOCK_SIZE {
            return Err(ErrorKind::BadParam.into());
        }

        let packet = self
            .0
            .opcode(OpCode::Sha)
            .mode(Self::MODE_SHA256_END)
            .param2(length as u16)
            .pdu_data(data)
            .response_length(32)
            .build()?;
        Ok(packet)
    }
}

/// Write
impl<'a> Write<'a> {
    pub(crate) fn new(builder: PacketBuilder<'a>) -> Self {
        Self(builder)
    }

    /// Size is taken from the data, which must be a word or a block.
    pub(crate) fn write(&mut self, address: Address, data: &[u8]) -> Result<Packet, Error> {
        let size = Size::try_from(data.len())?;
        let addr = address.check(size)?;
        let mode = address.zone().encode(size);
        let packet = self
            .0
            .opcode(OpCode::Write)
            .mode(mode)
            .param2(addr)
            .pdu_data(data)
            .build()?;
        Ok(packet)
    }
}
