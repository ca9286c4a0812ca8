//! Client module for ATECC508A/608A communication.
//!
//! The [`AtCaClient`] is the main entry point for interacting with the device.
//! It owns the bus, serializes commands and tracks the device's power state.
//!
//! ## Sub-modules
//!
//! Specialized operations are organized into sub-modules accessible via client methods:
//!
//! - [`Memory`]: Zone read/write/lock via [`AtCaClient::memory`]
//! - [`Random`]: Random number generation via [`AtCaClient::random`]
//! - [`MacKey`]: Challenge/response MAC with a slot key via [`AtCaClient::mac`]
//! - [`Sha`]: SHA-256 hashing via [`AtCaClient::sha`]
//!
//! Every operation is blocking. A caller that finds the device in use by
//! another caller gets [`ErrorKind::MutexLocked`] instead of waiting.

mod mac;
mod memory;
mod random;
mod sha;

pub use mac::{MacCheck, MacKey};
pub use memory::Memory;
pub use random::Random;
pub use sha::Sha;

use crate::command::{Block, GenKey, Info, KeyGenMode, NonceCtx, NonceMode, PublicKey};
use crate::command::{TempKeySource, Word};
use crate::datalink::{I2c, I2cConfig, PowerState};
use crate::error::{Error, ErrorKind};
use crate::memory::{ConfigZone, Slot};
use crate::packet::{Packet, PacketBuilder, Response};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embedded_hal::delay::DelayNs;
use heapless::Vec;

/// Proof that a nonce was loaded into the device's TempKey register.
///
/// Commands that read TempKey take the token and fail with
/// [`ErrorKind::TempKeyInvalid`] once it went stale: another nonce was loaded,
/// the device went to sleep, or a command consumed TempKey.
#[derive(Debug, PartialEq, Eq)]
pub struct TempKey {
    generation: u32,
    source: TempKeySource,
    rand_out: Option<Block>,
}

impl TempKey {
    pub fn source(&self) -> TempKeySource {
        self.source
    }

    /// Random contribution of the device, present for `NonceMode::Random`.
    pub fn rand_out(&self) -> Option<&Block> {
        self.rand_out.as_ref()
    }
}

pub(crate) struct Inner<PHY, D> {
    pub i2c: I2c<PHY, D>,
    pub buffer: Vec<u8, 192>,
    config_zone: Option<ConfigZone>,
    generation: u32,
    tempkey: Option<u32>,
}

impl<PHY, D> Inner<PHY, D> {
    pub(crate) fn packet_builder(&mut self) -> PacketBuilder<'_> {
        let capacity = self.buffer.capacity();
        self.buffer.clear();
        self.buffer
            .resize(capacity, 0x00u8)
            .unwrap_or_else(|()| unreachable!("Input length equals to the current capacity."));
        PacketBuilder::new(&mut self.buffer)
    }

    pub(crate) fn cached_config_zone(&self) -> Option<ConfigZone> {
        self.config_zone
    }

    pub(crate) fn cache_config_zone(&mut self, config_zone: ConfigZone) {
        self.config_zone.replace(config_zone);
    }

    pub(crate) fn invalidate_config_zone(&mut self) {
        self.config_zone.take();
    }

    fn issue_tempkey(&mut self, source: TempKeySource, rand_out: Option<Block>) -> TempKey {
        self.generation = self.generation.wrapping_add(1);
        self.tempkey.replace(self.generation);
        TempKey {
            generation: self.generation,
            source,
            rand_out,
        }
    }

    /// Check the token against the device's TempKey and mark it used.
    pub(crate) fn consume_tempkey(&mut self, tempkey: &TempKey) -> Result<TempKeySource, Error> {
        match self.tempkey {
            Some(generation) if generation == tempkey.generation => {
                self.tempkey = None;
                Ok(tempkey.source)
            }
            _ => Err(ErrorKind::TempKeyInvalid.into()),
        }
    }

    pub(crate) fn invalidate_tempkey(&mut self) {
        self.tempkey.take();
    }
}

impl<PHY, D> Inner<PHY, D>
where
    PHY: embedded_hal::i2c::I2c,
    D: DelayNs,
{
    pub(crate) fn execute(&mut self, packet: Packet) -> Result<Response<'_>, Error> {
        if self.i2c.power_state() == PowerState::Sleep {
            // Waking from sleep starts with an empty TempKey.
            self.invalidate_tempkey();
        }
        self.i2c.execute(&mut self.buffer, packet)
    }

    pub(crate) fn nonce(&mut self, mode: NonceMode<'_>) -> Result<TempKey, Error> {
        // Whatever happens below, the previous content is gone.
        self.invalidate_tempkey();
        let packet = NonceCtx::new(self.packet_builder()).load(mode)?;
        let response = self.execute(packet)?;
        let tempkey = match mode {
            NonceMode::Passthrough(_) => self.issue_tempkey(TempKeySource::Input, None),
            NonceMode::Random(_) => {
                let rand_out = Block::try_from(response.as_ref())?;
                self.issue_tempkey(TempKeySource::Random, Some(rand_out))
            }
        };
        Ok(tempkey)
    }
}

pub struct AtCaClient<M: RawMutex, PHY, D> {
    pub(crate) inner: Mutex<M, Inner<PHY, D>>,
}

impl<M: RawMutex, PHY, D> AtCaClient<M, PHY, D> {
    /// Create a new client with default I2C configuration
    pub fn new(phy: PHY, delay: D) -> Self {
        Self::with_config(phy, delay, I2cConfig::default())
    }

    /// Create a new client with custom I2C configuration
    pub fn with_config(phy: PHY, delay: D, config: I2cConfig) -> Self {
        let i2c = I2c::new(phy, delay, config);
        let buffer = Vec::new();

        Self {
            inner: Mutex::new(Inner {
                i2c,
                buffer,
                config_zone: None,
                generation: 0,
                tempkey: None,
            }),
        }
    }

    /// Give back the bus and the delay provider.
    pub fn release(self) -> (PHY, D) {
        self.inner.into_inner().i2c.release()
    }

    pub(crate) fn lock_inner(&self) -> Result<MutexGuard<'_, M, Inner<PHY, D>>, Error> {
        self.inner
            .try_lock()
            .map_err(|_| Error::from(ErrorKind::MutexLocked))
    }

    /// Power state as last observed on the bus.
    pub fn power_state(&self) -> Result<PowerState, Error> {
        Ok(self.lock_inner()?.i2c.power_state())
    }

    pub fn memory(&self) -> Memory<'_, M, PHY, D> {
        Memory { atca: self }
    }

    pub fn random(&self) -> Random<'_, M, PHY, D> {
        Random::new(self)
    }

    pub fn mac(&self, key_id: Slot) -> MacKey<'_, M, PHY, D> {
        MacKey { atca: self, key_id }
    }

    pub fn sha(&self) -> Sha<'_, M, PHY, D> {
        Sha::new(self)
    }
}

impl<M, PHY, D> AtCaClient<M, PHY, D>
where
    PHY: embedded_hal::i2c::I2c,
    D: DelayNs,
    M: RawMutex,
{
    pub fn wake(&self) -> Result<(), Error> {
        let mut inner = self.lock_inner()?;
        if inner.i2c.power_state() == PowerState::Sleep {
            inner.invalidate_tempkey();
        }
        inner.i2c.wake()
    }

    /// Enter idle mode. TempKey is retained.
    pub fn idle(&self) -> Result<(), Error> {
        self.lock_inner()?.i2c.idle()
    }

    /// Enter sleep mode. TempKey is lost.
    pub fn sleep(&self) -> Result<(), Error> {
        let mut inner = self.lock_inner()?;
        inner.invalidate_tempkey();
        inner.i2c.sleep()
    }

    /// Device revision.
    pub fn info(&self) -> Result<Word, Error> {
        let mut inner = self.lock_inner()?;
        let packet = Info::new(inner.packet_builder()).revision()?;
        inner.execute(packet)?.as_ref().try_into()
    }

    /// Load TempKey. The returned token is needed by MAC related commands.
    pub fn nonce(&self, mode: NonceMode<'_>) -> Result<TempKey, Error> {
        self.lock_inner()?.nonce(mode)
    }

    /// Run GenKey on a private key slot. Public key digest mode leaves its
    /// result in TempKey and returns `None`.
    pub fn gen_key(&self, key_id: Slot, mode: KeyGenMode) -> Result<Option<PublicKey>, Error> {
        let mut inner = self.lock_inner()?;
        let packet = GenKey::new(inner.packet_builder()).generate(key_id, mode)?;
        if mode == KeyGenMode::PubKeyDigest {
            inner.invalidate_tempkey();
            return inner.execute(packet).map(|_| None);
        }
        let public_key = inner.execute(packet)?.as_ref().try_into()?;
        Ok(Some(public_key))
    }

    /// Create private key and output its public key
    pub fn create_private_key(&self, key_id: Slot) -> Result<PublicKey, Error> {
        let mut inner = self.lock_inner()?;
        let packet = GenKey::new(inner.packet_builder()).private_key(key_id)?;
        inner.execute(packet)?.as_ref().try_into()
    }

    /// Given a private key created and stored in advance, calculate its public key
    pub fn generate_pubkey(&self, key_id: Slot) -> Result<PublicKey, Error> {
        let mut inner = self.lock_inner()?;
        let packet = GenKey::new(inner.packet_builder()).public_key(key_id)?;
        inner.execute(packet)?.as_ref().try_into()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::command::Mac;
    use crate::error::Status;
    use crate::sim::{RecordingDelay, SimulatedChip};
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    pub(crate) type Client = AtCaClient<NoopRawMutex, SimulatedChip, RecordingDelay>;

    pub(crate) fn client() -> Client {
        AtCaClient::new(SimulatedChip::new(), RecordingDelay::default())
    }

    pub(crate) fn client_with(chip: SimulatedChip) -> Client {
        AtCaClient::new(chip, RecordingDelay::default())
    }

    #[test]
    fn wake_and_info() {
        let atca = client();
        assert_eq!(atca.power_state().unwrap(), PowerState::Sleep);
        atca.wake().unwrap();
        assert_eq!(atca.power_state().unwrap(), PowerState::Awake);
        let revision = atca.info().unwrap();
        assert_eq!(revision.as_ref(), &SimulatedChip::REVISION);
        assert_eq!(atca.power_state().unwrap(), PowerState::Idle);

        let (chip, delay) = atca.release();
        assert_eq!(chip.wake_count(), 1);
        // Wake settle time, then Info execution time.
        assert!(delay.us_total() >= 1500 + 5000);
    }

    #[test]
    fn wake_is_idempotent() {
        let atca = client();
        atca.wake().unwrap();
        atca.wake().unwrap();
        assert_eq!(atca.power_state().unwrap(), PowerState::Awake);
    }

    #[test]
    fn wake_failure_is_reported() {
        let chip = SimulatedChip::new();
        chip.fail_self_test();
        let atca = client_with(chip);
        assert_eq!(atca.wake().unwrap_err(), ErrorKind::WakeFailed.into());
        assert_eq!(atca.info().unwrap_err(), ErrorKind::WakeFailed.into());
    }

    #[test]
    fn command_from_sleep_wakes_first() {
        let atca = client();
        atca.info().unwrap();
        atca.sleep().unwrap();
        assert_eq!(atca.power_state().unwrap(), PowerState::Sleep);
        atca.info().unwrap();
        let (chip, _) = atca.release();
        // First command, the sleep request out of idle, the second command.
        assert_eq!(chip.wake_count(), 3);
    }

    #[test]
    fn busy_device_is_polled() {
        let chip = SimulatedChip::new();
        chip.stay_busy_for(3);
        let atca = client_with(chip);
        atca.info().unwrap();
    }

    #[test]
    fn unresponsive_device_gives_up() {
        let chip = SimulatedChip::new();
        chip.stay_busy_for(usize::MAX);
        let config = I2cConfig::default().with_retries(5);
        let atca: Client = AtCaClient::with_config(chip, RecordingDelay::default(), config);
        assert_eq!(
            atca.info().unwrap_err(),
            ErrorKind::TooManyCommRetries.into()
        );
    }

    #[test]
    fn corrupted_response_is_rejected() {
        let chip = SimulatedChip::new();
        chip.corrupt_next_response();
        let atca = client_with(chip);
        assert_eq!(atca.info().unwrap_err(), ErrorKind::RxCrcError.into());
        // The device itself is fine.
        atca.info().unwrap();
    }

    #[test]
    fn truncated_response_is_rejected() {
        let chip = SimulatedChip::new();
        chip.misreport_next_count(0x0a);
        let atca = client_with(chip);
        assert_eq!(atca.info().unwrap_err(), ErrorKind::CountMismatch.into());
    }

    #[test]
    fn concurrent_access_is_refused() {
        let atca = client();
        let _guard = atca.lock_inner().unwrap();
        assert_eq!(atca.info().unwrap_err(), ErrorKind::MutexLocked.into());
    }

    #[test]
    fn keys_from_gen_key() {
        let atca = client();
        let public_key = atca.create_private_key(Slot::PrivateKey02).unwrap();
        assert_eq!(atca.generate_pubkey(Slot::PrivateKey02).unwrap(), public_key);
        assert_eq!(
            atca.gen_key(Slot::PrivateKey02, KeyGenMode::Public).unwrap(),
            Some(public_key)
        );

        let fresh = atca
            .gen_key(Slot::PrivateKey02, KeyGenMode::Private)
            .unwrap()
            .unwrap();
        assert_ne!(fresh, public_key);
        assert!(atca.create_private_key(Slot::Certificate09).is_err());
    }

    #[test]
    fn gen_key_digest_uses_tempkey() {
        let atca = client();
        atca.create_private_key(Slot::PrivateKey00).unwrap();
        let tempkey = atca.nonce(NonceMode::Passthrough(&Block::default())).unwrap();
        assert_eq!(
            atca.gen_key(Slot::PrivateKey00, KeyGenMode::PubKeyDigest)
                .unwrap(),
            None
        );
        let err = atca.mac(Slot::PrivateKey00).create(&tempkey).unwrap_err();
        assert_eq!(err, ErrorKind::TempKeyInvalid.into());
    }

    #[test]
    fn gen_key_digest_without_nonce_fails_on_chip() {
        let atca = client();
        let err = atca
            .gen_key(Slot::PrivateKey00, KeyGenMode::PubKeyDigest)
            .unwrap_err();
        assert_eq!(err.status(), Some(Status::Execution));
    }

    #[test]
    fn nonce_random_returns_rand_out() {
        let atca = client();
        let tempkey = atca.nonce(NonceMode::Random(&[0x42; 20])).unwrap();
        assert_eq!(tempkey.source(), TempKeySource::Random);
        let rand_out = tempkey.rand_out().unwrap();
        assert_ne!(rand_out, &Block::default());

        let tempkey = atca.nonce(NonceMode::Passthrough(&Block::default())).unwrap();
        assert_eq!(tempkey.source(), TempKeySource::Input);
        assert!(tempkey.rand_out().is_none());
    }

    #[test]
    fn tempkey_survives_idle_but_not_sleep() {
        let atca = client();
        let message = Block::from([0x33; 32]);

        let tempkey = atca.nonce(NonceMode::Passthrough(&message)).unwrap();
        atca.idle().unwrap();
        let mac = atca.mac(Slot::PrivateKey01).create(&tempkey).unwrap();
        assert_ne!(mac, Mac::default());

        let tempkey = atca.nonce(NonceMode::Passthrough(&message)).unwrap();
        atca.sleep().unwrap();
        let err = atca.mac(Slot::PrivateKey01).create(&tempkey).unwrap_err();
        assert_eq!(err, ErrorKind::TempKeyInvalid.into());
    }

    #[test]
    fn newer_nonce_replaces_older() {
        let atca = client();
        let older = atca.nonce(NonceMode::Passthrough(&Block::default())).unwrap();
        let newer = atca.nonce(NonceMode::Random(&[0x00; 20])).unwrap();
        let mac_key = atca.mac(Slot::PrivateKey03);
        assert_eq!(
            mac_key.create(&older).unwrap_err(),
            ErrorKind::TempKeyInvalid.into()
        );
        mac_key.create(&newer).unwrap();
    }
}
