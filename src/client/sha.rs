//! SHA-256 hashing operations

use crate::command::{self, Digest};
use crate::error::{Error, ErrorKind};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal::delay::DelayNs;
use heapless::Vec;

use super::AtCaClient;

const BLOCK_SIZE: usize = command::Sha::BLOCK_SIZE;

/// SHA-256 computed by the device. The context lives in TempKey: it survives
/// idle, but not sleep, and it replaces any nonce loaded before.
pub struct Sha<'a, M: RawMutex, PHY, D> {
    pub(crate) atca: &'a AtCaClient<M, PHY, D>,
    pub(crate) remaining_bytes: Vec<u8, BLOCK_SIZE>,
    started: bool,
}

impl<'a, M: RawMutex, PHY, D> Sha<'a, M, PHY, D> {
    pub(crate) fn new(atca: &'a AtCaClient<M, PHY, D>) -> Self {
        Self {
            atca,
            remaining_bytes: Vec::new(),
            started: false,
        }
    }
}

// Only expose the highest level APIs.
impl<'a, M, PHY, D> Sha<'a, M, PHY, D>
where
    PHY: embedded_hal::i2c::I2c,
    D: DelayNs,
    M: RawMutex,
{
    pub fn init(&mut self) -> Result<(), Error> {
        let mut inner = self.atca.lock_inner()?;
        // The SHA engine keeps its running state in TempKey.
        inner.invalidate_tempkey();
        let packet = command::Sha::new(inner.packet_builder()).start()?;
        inner.execute(packet)?;
        self.remaining_bytes.clear();
        self.started = true;
        Ok(())
    }

    /// Feed the device with whole 64-byte blocks and keep the rest.
    pub fn update(&mut self, mut data: &[u8]) -> Result<(), Error> {
        if !self.started {
            return Err(ErrorKind::BadParam.into());
        }

        let mut inner = self.atca.lock_inner()?;
        inner.invalidate_tempkey();
        while !data.is_empty() {
            let room = BLOCK_SIZE - self.remaining_bytes.len();
            let (head, tail) = data.split_at(room.min(data.len()));
            self.remaining_bytes
                .extend_from_slice(head)
                .unwrap_or_else(|()| unreachable!("Never more than the room left."));
            data = tail;

            if self.remaining_bytes.is_full() {
                let packet =
                    command::Sha::new(inner.packet_builder()).update(&self.remaining_bytes)?;
                inner.execute(packet)?;
                self.remaining_bytes.clear();
            }
        }
        Ok(())
    }

    pub fn finalize(&mut self) -> Result<Digest, Error> {
        if !self.started {
            return Err(ErrorKind::BadParam.into());
        }

        let mut inner = self.atca.lock_inner()?;
        inner.invalidate_tempkey();
        let packet = command::Sha::new(inner.packet_builder()).end(&self.remaining_bytes)?;
        self.remaining_bytes.clear();
        self.started = false;
        inner.execute(packet)?.as_ref().try_into()
    }

    /// Digest of `data` in one go.
    pub fn digest(&mut self, data: &[u8]) -> Result<Digest, Error> {
        self.init()?;
        self.update(data)?;
        self.finalize()
    }
}
