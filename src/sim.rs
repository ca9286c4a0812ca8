//! A device model for host tests. Speaks the I2C protocol of the ATECC508A
//! closely enough to run the client end to end, with hooks for injecting
//! faults. Key generation returns random bytes, not curve points.

extern crate std;

use crate::command::{OpCode, TempKeySource};
use crate::datalink::PowerState;
use crate::error::Status;
use crate::memory::{ConfigZone, Slot};
use crate::packet::{checksum, CommandFrame, CRC16};
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{ErrorKind, ErrorType, NoAcknowledgeSource, Operation};
use sha2::{Digest, Sha256};
use std::cell::RefCell;
use std::rc::Rc;
use std::vec;
use std::vec::Vec;

const ADDRESS: u8 = 0x60;
const WAKE_TOKEN: [u8; 4] = [0x04, 0x11, 0x33, 0x43];
const SELF_TEST_FAILED: [u8; 4] = [0x04, 0x07, 0xc4, 0x40];
const LOCK_VALUE: usize = 86;
const LOCK_CONFIG: usize = 87;
const SLOT_LOCKED: usize = 88;
const OTP_SIZE: usize = 64;

type Outcome = Result<Vec<u8>, Status>;

/// Sums up every requested delay.
#[derive(Debug, Default)]
pub(crate) struct RecordingDelay {
    ns: u64,
}

impl RecordingDelay {
    pub(crate) fn us_total(&self) -> u64 {
        self.ns / 1000
    }
}

impl DelayNs for RecordingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.ns += ns as u64;
    }
}

/// Handle to a simulated device. Clones share the same device so a test can
/// keep one while the client owns another.
#[derive(Clone)]
pub(crate) struct SimulatedChip {
    chip: Rc<RefCell<Chip>>,
}

struct Chip {
    power: PowerState,
    config: [u8; ConfigZone::SIZE],
    otp: [u8; OTP_SIZE],
    slots: Vec<Vec<u8>>,
    public_keys: [Option<[u8; 64]>; 8],
    tempkey: Option<([u8; 32], TempKeySource)>,
    sha: Option<Sha256>,
    rng: u64,
    output: Vec<u8>,
    read_pos: usize,
    busy: usize,
    busy_polls: usize,
    self_test_failed: bool,
    corrupt_next: bool,
    misreport_next: Option<u8>,
    fail_next: Option<Status>,
    wakes: usize,
    commands: usize,
}

impl SimulatedChip {
    pub(crate) const SERIAL: [u8; 9] = [0x01, 0x23, 0x9a, 0x3b, 0x8c, 0x5e, 0x21, 0x44, 0xee];
    pub(crate) const REVISION: [u8; 4] = [0x00, 0x00, 0x50, 0x00];

    pub(crate) fn new() -> Self {
        let mut config = [0x00u8; ConfigZone::SIZE];
        config[0..4].copy_from_slice(&Self::SERIAL[0..4]);
        config[4..8].copy_from_slice(&Self::REVISION);
        config[8..13].copy_from_slice(&Self::SERIAL[4..9]);
        config[16] = ADDRESS << 1;
        config[18] = 0x55;
        config[LOCK_VALUE] = 0x55;
        config[LOCK_CONFIG] = 0x55;
        config[SLOT_LOCKED] = 0xff;
        config[SLOT_LOCKED + 1] = 0xff;

        let slots = (0..16u8)
            .filter_map(|index| Slot::try_from(index).ok())
            .map(|slot| vec![0x00; slot.size()])
            .collect();

        let chip = Chip {
            power: PowerState::Sleep,
            config,
            otp: [0xff; OTP_SIZE],
            slots,
            public_keys: [None; 8],
            tempkey: None,
            sha: None,
            rng: 0x9e37_79b9_7f4a_7c15,
            output: Vec::new(),
            read_pos: 0,
            busy: 0,
            busy_polls: 0,
            self_test_failed: false,
            corrupt_next: false,
            misreport_next: None,
            fail_next: None,
            wakes: 0,
            commands: 0,
        };
        Self {
            chip: Rc::new(RefCell::new(chip)),
        }
    }

    /// Number of wake tokens handed out.
    pub(crate) fn wake_count(&self) -> usize {
        self.chip.borrow().wakes
    }

    pub(crate) fn commands_executed(&self) -> usize {
        self.chip.borrow().commands
    }

    pub(crate) fn fail_self_test(&self) {
        self.chip.borrow_mut().self_test_failed = true;
    }

    /// NACK this many completion polls after every command.
    pub(crate) fn stay_busy_for(&self, polls: usize) {
        self.chip.borrow_mut().busy_polls = polls;
    }

    /// Flip a payload bit of the next response after its checksum is computed.
    pub(crate) fn corrupt_next_response(&self) {
        self.chip.borrow_mut().corrupt_next = true;
    }

    pub(crate) fn misreport_next_count(&self, count: u8) {
        self.chip.borrow_mut().misreport_next = Some(count);
    }

    pub(crate) fn fail_next_command(&self, status: Status) {
        self.chip.borrow_mut().fail_next = Some(status);
    }

    /// Put a 32-byte symmetric key at the start of a slot.
    pub(crate) fn store_key(&self, slot: Slot, key: &[u8; 32]) {
        self.chip.borrow_mut().slots[slot as usize][..32].copy_from_slice(key);
    }
}

impl ErrorType for SimulatedChip {
    type Error = ErrorKind;
}

impl embedded_hal::i2c::I2c for SimulatedChip {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut chip = self.chip.borrow_mut();
        if address != ADDRESS {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }
        for operation in operations {
            match operation {
                Operation::Write(bytes) => chip.on_write(bytes)?,
                Operation::Read(buffer) => chip.on_read(buffer)?,
            }
        }
        Ok(())
    }
}

const NACK: ErrorKind = ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address);

impl Chip {
    fn on_write(&mut self, bytes: &[u8]) -> Result<(), ErrorKind> {
        if self.power != PowerState::Awake {
            // Any traffic is a wake pulse. The address itself goes unanswered.
            self.power = PowerState::Awake;
            self.wakes += 1;
            self.busy = 0;
            self.read_pos = 0;
            self.output = match self.self_test_failed {
                true => SELF_TEST_FAILED.to_vec(),
                false => WAKE_TOKEN.to_vec(),
            };
            return Err(NACK);
        }
        if self.busy > 0 {
            self.busy -= 1;
            return Err(NACK);
        }

        match bytes.first() {
            Some(0x00) => self.read_pos = 0,
            Some(0x01) => {
                self.power = PowerState::Sleep;
                self.tempkey = None;
                self.sha = None;
            }
            Some(0x02) => self.power = PowerState::Idle,
            Some(0x03) => self.on_command(&bytes[1..]),
            _ => return Err(ErrorKind::Other),
        }
        Ok(())
    }

    fn on_read(&mut self, buffer: &mut [u8]) -> Result<(), ErrorKind> {
        if self.power != PowerState::Awake || self.busy > 0 {
            return Err(NACK);
        }
        for byte in buffer.iter_mut() {
            *byte = self.output.get(self.read_pos).copied().unwrap_or(0xff);
            self.read_pos += 1;
        }
        Ok(())
    }

    fn on_command(&mut self, bytes: &[u8]) {
        self.commands += 1;
        self.busy = self.busy_polls;
        self.read_pos = 0;

        let outcome = match (CommandFrame::parse(bytes), self.fail_next.take()) {
            (_, Some(status)) => Err(status),
            (Ok(frame), None) => self.execute(&frame),
            (Err(err), None) if err.kind() == Some(crate::error::ErrorKind::RxCrcError) => {
                Err(Status::Crc)
            }
            (Err(_), None) => Err(Status::Parse),
        };

        let payload = match outcome {
            Ok(payload) if payload.is_empty() => vec![0x00],
            Ok(payload) => payload,
            Err(status) => vec![status as u8],
        };
        let mut frame = vec![(payload.len() + 3) as u8];
        frame.extend_from_slice(&payload);
        let crc = checksum(&frame);
        frame.extend_from_slice(&crc);

        if core::mem::take(&mut self.corrupt_next) {
            frame[1] ^= 0x01;
        }
        if let Some(count) = self.misreport_next.take() {
            frame[0] = count;
        }
        self.output = frame;
    }

    fn execute(&mut self, frame: &CommandFrame<'_>) -> Outcome {
        use OpCode::*;
        let opcodes = [CheckMac, GenKey, Info, Lock, Mac, Nonce, Random, Read, Sha, Write];
        let opcode = opcodes
            .into_iter()
            .find(|opcode| *opcode as u8 == frame.opcode)
            .ok_or(Status::Parse)?;

        match opcode {
            Info => Ok(SimulatedChip::REVISION.to_vec()),
            Random => Ok(self.random_bytes(32)),
            Read => self.read(frame),
            Write => self.write(frame),
            Lock => self.lock(frame),
            Nonce => self.nonce(frame),
            Mac => self.mac(frame),
            CheckMac => self.check_mac(frame),
            GenKey => self.gen_key(frame),
            Sha => self.sha(frame),
        }
    }

    fn random_bytes(&mut self, length: usize) -> Vec<u8> {
        (0..length)
            .map(|_| {
                // xorshift64
                self.rng ^= self.rng << 13;
                self.rng ^= self.rng >> 7;
                self.rng ^= self.rng << 17;
                (self.rng >> 24) as u8
            })
            .collect()
    }

    fn is_config_locked(&self) -> bool {
        self.config[LOCK_CONFIG] != 0x55
    }

    fn is_data_locked(&self) -> bool {
        self.config[LOCK_VALUE] != 0x55
    }

    /// Backing storage, first byte and length of an access.
    fn locate(&mut self, zone: u8, param2: u16, length: usize) -> Result<(&mut [u8], usize), Status> {
        let offset = (param2 & 0x07) as usize * 4;
        let (memory, start): (&mut [u8], usize) = match zone {
            0x00 => (&mut self.config[..], ((param2 >> 3) & 0x03) as usize * 32 + offset),
            0x01 => (&mut self.otp[..], ((param2 >> 3) & 0x01) as usize * 32 + offset),
            0x02 => {
                let slot = ((param2 >> 3) & 0x0f) as usize;
                let block = (param2 >> 8) as usize;
                (&mut self.slots[slot][..], block * 32 + offset)
            }
            _ => return Err(Status::Parse),
        };
        if start + length > memory.len() {
            return Err(Status::Parse);
        }
        Ok((memory, start))
    }

    fn access_length(param1: u8) -> usize {
        match param1 & 0x80 {
            0 => 4,
            _ => 32,
        }
    }

    fn read(&mut self, frame: &CommandFrame<'_>) -> Outcome {
        let length = Self::access_length(frame.param1);
        let (memory, start) = self.locate(frame.param1 & 0x03, frame.param2, length)?;
        Ok(memory[start..start + length].to_vec())
    }

    fn write(&mut self, frame: &CommandFrame<'_>) -> Outcome {
        let length = Self::access_length(frame.param1);
        if frame.data.len() != length {
            return Err(Status::Parse);
        }
        let zone = frame.param1 & 0x03;
        let refused = match zone {
            0x00 => self.is_config_locked(),
            _ => self.is_data_locked(),
        };
        let (memory, start) = self.locate(zone, frame.param2, length)?;
        // Serial number, revision and the lock bytes are never writable.
        let read_only = zone == 0x00 && (start < 16 || (start < 88 && start + length > 84));
        if refused || read_only {
            return Err(Status::Execution);
        }
        memory[start..start + length].copy_from_slice(frame.data);
        Ok(Vec::new())
    }

    fn lock(&mut self, frame: &CommandFrame<'_>) -> Outcome {
        let skip_crc = frame.param1 & 0x80 != 0;
        match frame.param1 & 0x03 {
            0x00 => {
                if self.is_config_locked() {
                    return Err(Status::Execution);
                }
                if !skip_crc && CRC16.checksum(&self.config) != frame.param2 {
                    return Err(Status::Execution);
                }
                self.config[LOCK_CONFIG] = 0x00;
            }
            0x01 => {
                if !self.is_config_locked() || self.is_data_locked() {
                    return Err(Status::Execution);
                }
                let mut contents = self.slots.concat();
                contents.extend_from_slice(&self.otp);
                if !skip_crc && CRC16.checksum(&contents) != frame.param2 {
                    return Err(Status::Execution);
                }
                self.config[LOCK_VALUE] = 0x00;
            }
            0x02 => {
                let slot = (frame.param1 >> 2) & 0x0f;
                let mut slot_locked =
                    u16::from_le_bytes([self.config[SLOT_LOCKED], self.config[SLOT_LOCKED + 1]]);
                if !self.is_data_locked() || slot_locked & (1 << slot) == 0 {
                    return Err(Status::Execution);
                }
                slot_locked &= !(1 << slot);
                self.config[SLOT_LOCKED..SLOT_LOCKED + 2].copy_from_slice(&slot_locked.to_le_bytes());
            }
            _ => return Err(Status::Parse),
        }
        Ok(Vec::new())
    }

    fn nonce(&mut self, frame: &CommandFrame<'_>) -> Outcome {
        self.tempkey = None;
        self.sha = None;
        match (frame.param1 & 0x03, frame.data.len()) {
            (0x03, 32) => {
                let mut value = [0x00u8; 32];
                value.copy_from_slice(frame.data);
                self.tempkey = Some((value, TempKeySource::Input));
                Ok(Vec::new())
            }
            (0x00 | 0x01, 20) => {
                let rand_out = self.random_bytes(32);
                let mut sha = Sha256::new();
                sha.update(&rand_out);
                sha.update(frame.data);
                sha.update([OpCode::Nonce as u8, frame.param1, frame.param2 as u8]);
                self.tempkey = Some((sha.finalize().into(), TempKeySource::Random));
                Ok(rand_out)
            }
            _ => Err(Status::Parse),
        }
    }

    /// TempKey for a command whose mode bit 0 selects it, checked against the
    /// source flag in mode bit 2. Reading TempKey clears it.
    fn take_tempkey(&mut self, mode: u8) -> Result<[u8; 32], Status> {
        let (value, source) = self.tempkey.take().ok_or(Status::Execution)?;
        let input = mode & 0x04 != 0;
        if input != (source == TempKeySource::Input) {
            return Err(Status::Execution);
        }
        Ok(value)
    }

    fn key(&self, param2: u16) -> [u8; 32] {
        let mut key = [0x00u8; 32];
        key.copy_from_slice(&self.slots[(param2 & 0x0f) as usize][..32]);
        key
    }

    /// SHA-256 message shared by MAC and CheckMac, OTP and optional serial
    /// number bytes left out.
    fn mac_digest(&self, first: &[u8], second: &[u8], other_data: &[u8; 13]) -> [u8; 32] {
        let mut sha = Sha256::new();
        sha.update(first);
        sha.update(second);
        sha.update(&other_data[0..4]);
        sha.update([0x00; 8]);
        sha.update(&other_data[4..7]);
        sha.update([SimulatedChip::SERIAL[8]]);
        sha.update(&other_data[7..11]);
        sha.update(&SimulatedChip::SERIAL[0..2]);
        sha.update(&other_data[11..13]);
        sha.finalize().into()
    }

    fn mac(&mut self, frame: &CommandFrame<'_>) -> Outcome {
        let challenge = match frame.param1 & 0x01 {
            0 if frame.data.len() == 32 => {
                let mut challenge = [0x00u8; 32];
                challenge.copy_from_slice(frame.data);
                challenge
            }
            0 => return Err(Status::Parse),
            _ => self.take_tempkey(frame.param1)?,
        };
        let mut other_data = [0x00u8; 13];
        other_data[0] = OpCode::Mac as u8;
        other_data[1] = frame.param1;
        other_data[2..4].copy_from_slice(&frame.param2.to_le_bytes());
        Ok(self
            .mac_digest(&self.key(frame.param2), &challenge, &other_data)
            .to_vec())
    }

    fn check_mac(&mut self, frame: &CommandFrame<'_>) -> Outcome {
        if frame.data.len() != 77 {
            return Err(Status::Parse);
        }
        let (client_challenge, rest) = frame.data.split_at(32);
        let (client_response, other) = rest.split_at(32);
        let mut other_data = [0x00u8; 13];
        other_data.copy_from_slice(other);

        let tempkey = match frame.param1 & 0x03 {
            0 => None,
            _ => Some(self.take_tempkey(frame.param1)?),
        };
        let key = self.key(frame.param2);
        let first: &[u8] = match (frame.param1 & 0x02, &tempkey) {
            (0x02, Some(tempkey)) => &tempkey[..],
            _ => &key[..],
        };
        let second: &[u8] = match (frame.param1 & 0x01, &tempkey) {
            (0x01, Some(tempkey)) => &tempkey[..],
            _ => client_challenge,
        };

        match self.mac_digest(first, second, &other_data).as_ref() == client_response {
            true => Ok(Vec::new()),
            false => Err(Status::CheckmacVerifyFailed),
        }
    }

    fn gen_key(&mut self, frame: &CommandFrame<'_>) -> Outcome {
        let slot = frame.param2 as usize;
        if slot >= self.public_keys.len() {
            return Err(Status::Execution);
        }
        match frame.param1 {
            0x04 => {
                let mut public_key = [0x00u8; 64];
                public_key.copy_from_slice(&self.random_bytes(64));
                self.public_keys[slot] = Some(public_key);
                Ok(public_key.to_vec())
            }
            0x00 => self.public_keys[slot]
                .map(|public_key| public_key.to_vec())
                .ok_or(Status::Execution),
            0x10 => {
                let public_key = self.public_keys[slot].ok_or(Status::Execution)?;
                let (tempkey, source) = self.tempkey.take().ok_or(Status::Execution)?;
                let mut sha = Sha256::new();
                sha.update(tempkey);
                sha.update(public_key);
                self.tempkey = Some((sha.finalize().into(), source));
                Ok(Vec::new())
            }
            _ => Err(Status::Parse),
        }
    }

    fn sha(&mut self, frame: &CommandFrame<'_>) -> Outcome {
        // The running hash occupies TempKey.
        self.tempkey = None;
        match frame.param1 {
            0x00 => {
                self.sha = Some(Sha256::new());
                Ok(Vec::new())
            }
            0x01 if frame.data.len() == 64 => {
                self.sha.as_mut().ok_or(Status::Execution)?.update(frame.data);
                Ok(Vec::new())
            }
            0x02 if frame.data.len() < 64 => {
                let mut sha = self.sha.take().ok_or(Status::Execution)?;
                sha.update(frame.data);
                let digest: [u8; 32] = sha.finalize().into();
                Ok(digest.to_vec())
            }
            _ => Err(Status::Parse),
        }
    }
}
