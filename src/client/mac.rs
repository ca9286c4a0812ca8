//! Challenge/response authentication with a symmetric key held in a slot

use crate::command::{self, Block, Mac, NonceMode};
use crate::error::{Error, Status};
use crate::memory::Slot;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal::delay::DelayNs;

use super::{AtCaClient, Inner, TempKey};

/// Where a received MAC gets verified.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MacCheck {
    /// CheckMac command, the device answers match or mismatch.
    OnChip,
    /// Compute the MAC again and compare on the host.
    Recompute,
}

pub struct MacKey<'a, M: RawMutex, PHY, D> {
    pub(crate) atca: &'a AtCaClient<M, PHY, D>,
    pub(crate) key_id: Slot,
}

impl<PHY, D> Inner<PHY, D>
where
    PHY: embedded_hal::i2c::I2c,
    D: DelayNs,
{
    fn mac(&mut self, key_id: Slot, tempkey: &TempKey) -> Result<Mac, Error> {
        let source = self.consume_tempkey(tempkey)?;
        let packet = command::MacCmd::new(self.packet_builder()).tempkey(key_id, source)?;
        self.execute(packet)?.as_ref().try_into()
    }

    fn check_mac(&mut self, key_id: Slot, tempkey: &TempKey, mac: &Mac) -> Result<bool, Error> {
        let source = self.consume_tempkey(tempkey)?;
        let packet = command::CheckMac::new(self.packet_builder()).tempkey(key_id, source, mac)?;
        match self.execute(packet) {
            Ok(_) => Ok(true),
            Err(err) if err.status() == Some(Status::CheckmacVerifyFailed) => {
                debug!("mac mismatch for slot {:?}", key_id);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

impl<'a, M, PHY, D> MacKey<'a, M, PHY, D>
where
    PHY: embedded_hal::i2c::I2c,
    D: DelayNs,
    M: RawMutex,
{
    /// MAC over the slot key and the TempKey loaded by `tempkey`.
    pub fn create(&self, tempkey: &TempKey) -> Result<Mac, Error> {
        self.atca.lock_inner()?.mac(self.key_id, tempkey)
    }

    /// Let the device compare `mac` with its own computation.
    pub fn check(&self, tempkey: &TempKey, mac: &Mac) -> Result<bool, Error> {
        self.atca.lock_inner()?.check_mac(self.key_id, tempkey, mac)
    }

    /// MAC over the slot key and a 32-byte message.
    pub fn create_mac(&self, message: &Block) -> Result<Mac, Error> {
        let mut inner = self.atca.lock_inner()?;
        let tempkey = inner.nonce(NonceMode::Passthrough(message))?;
        inner.mac(self.key_id, &tempkey)
    }

    /// Whether `received` is the MAC of `message` under the slot key. A
    /// mismatch is `Ok(false)`.
    pub fn verify_mac(&self, message: &Block, received: &Mac, check: MacCheck) -> Result<bool, Error> {
        let mut inner = self.atca.lock_inner()?;
        let tempkey = inner.nonce(NonceMode::Passthrough(message))?;
        match check {
            MacCheck::OnChip => inner.check_mac(self.key_id, &tempkey, received),
            MacCheck::Recompute => inner
                .mac(self.key_id, &tempkey)
                .map(|expected| expected.matches(received)),
        }
    }
}
