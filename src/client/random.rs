//! Random number generation

use crate::command::{self, Block};
use crate::error::Error;
use core::num::NonZeroU32;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal::delay::DelayNs;
use signature::rand_core;

use super::AtCaClient;

/// Numbers drawn from the device's RNG. Nothing is generated or seeded on the
/// host side.
pub struct Random<'a, M: RawMutex, PHY, D> {
    pub(crate) atca: &'a AtCaClient<M, PHY, D>,
}

impl<'a, M: RawMutex, PHY, D> Random<'a, M, PHY, D> {
    pub fn new(atca: &'a AtCaClient<M, PHY, D>) -> Self {
        Self { atca }
    }
}

impl<'a, M, PHY, D> Random<'a, M, PHY, D>
where
    PHY: embedded_hal::i2c::I2c,
    D: DelayNs,
    M: RawMutex,
{
    /// 32 fresh random bytes.
    pub fn get_random(&mut self) -> Result<Block, Error> {
        let mut inner = self.atca.lock_inner()?;
        let packet = command::Random::new(inner.packet_builder()).random()?;
        inner.execute(packet)?.as_ref().try_into()
    }

    pub fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        let mut inner = self.atca.lock_inner()?;

        for c in dest.chunks_mut(32) {
            let packet = command::Random::new(inner.packet_builder()).random()?;
            let resp = inner.execute(packet)?;
            let len = c.len().min(resp.as_ref().len());
            c[..len].copy_from_slice(&resp.as_ref()[..len]);
        }
        Ok(())
    }

    pub fn random_u8(&mut self) -> Result<u8, Error> {
        let block = self.get_random()?;
        Ok(block.as_ref()[0])
    }

    pub fn random_u32(&mut self) -> Result<u32, Error> {
        let mut bytes = [0x00u8; 4];
        self.try_fill_bytes(&mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn random_u64(&mut self) -> Result<u64, Error> {
        let mut bytes = [0x00u8; 8];
        self.try_fill_bytes(&mut bytes)?;
        Ok(u64::from_le_bytes(bytes))
    }
}

impl<'a, M, PHY, D> rand_core::RngCore for Random<'a, M, PHY, D>
where
    PHY: embedded_hal::i2c::I2c,
    D: DelayNs,
    M: RawMutex,
{
    fn next_u32(&mut self) -> u32 {
        rand_core::impls::next_u32_via_fill(self)
    }

    fn next_u64(&mut self) -> u64 {
        rand_core::impls::next_u64_via_fill(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        if let Err(err) = Random::try_fill_bytes(self, dest) {
            panic!("random number generation failed: {}", err);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        Random::try_fill_bytes(self, dest).map_err(|err| {
            let code = NonZeroU32::new(rand_core::Error::CUSTOM_START + err.code())
                .unwrap_or(NonZeroU32::MIN);
            rand_core::Error::from(code)
        })
    }
}

impl<'a, M, PHY, D> rand_core::CryptoRng for Random<'a, M, PHY, D>
where
    PHY: embedded_hal::i2c::I2c,
    D: DelayNs,
    M: RawMutex,
{
}
