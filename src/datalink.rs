// for this implementation of I2C with CryptoAuth chips, txdata is assumed to
// have ATCAPacket format Devices such as ATECCx08A require a word address value
// pre-pended to the packet txdata[0] is using _reserved byte of the ATCAPacket
use crate::clock_divider::ClockDivider;
use crate::error::{Error, ErrorKind};
use crate::packet::{Packet, Response, RSP_SIZE_MIN};
use core::slice::from_ref;
use embedded_hal::delay::DelayNs;

const WAKE_RESPONSE_EXPECTED: &[u8] = &[0x04, 0x11, 0x33, 0x43];
const WAKE_SELFTEST_FAILED: &[u8] = &[0x04, 0x07, 0xC4, 0x40];

/// Default I2C address of ATECC508A/608A
const ADDRESS: u8 = 0xc0 >> 1;
/// Default time in us that takes for the device to wake up.
const WAKE_DELAY_US: u32 = 1500;
/// Time in us the bus needs to settle before a sleep request.
const SLEEP_DELAY_US: u32 = 30;
// Attempts to catch an ACK while the device is still busy. Linux HALs need far
// more room than a bare-metal bus, GenKey in particular.
#[cfg(target_os = "none")]
const RETRY: usize = 20;
#[cfg(not(target_os = "none"))]
const RETRY: usize = 20 * 15;
const POLL_INTERVAL_US: u32 = 500;

/// So-called "word address".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Transaction {
    Reset = 0x00,
    Sleep = 0x01,
    Idle = 0x02,
    Command = 0x03,
}

/// Power state of the device as last observed by the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
    /// Lowest power. TempKey and all volatile state are lost.
    Sleep,
    /// Clocks stopped. TempKey survives.
    Idle,
    /// Ready to accept a command.
    Awake,
}

/// Bus parameters of a single device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct I2cConfig {
    /// 7-bit I2C address.
    pub address: u8,
    /// Wait between the wake pulse and reading the wake token.
    pub wake_delay_us: u32,
    /// Upper bound of attempts when the device does not ACK.
    pub retries: usize,
    /// Back-off between two such attempts.
    pub poll_interval_us: u32,
    /// Selects the column of the execution time table.
    pub clock_divider: ClockDivider,
    /// Put the device into idle after every response.
    pub idle_after_command: bool,
}

impl Default for I2cConfig {
    fn default() -> Self {
        Self {
            address: ADDRESS,
            wake_delay_us: WAKE_DELAY_US,
            retries: RETRY,
            poll_interval_us: POLL_INTERVAL_US,
            clock_divider: ClockDivider::Zero,
            idle_after_command: true,
        }
    }
}

impl I2cConfig {
    pub fn with_address(self, address: u8) -> Self {
        Self { address, ..self }
    }

    pub fn with_wake_delay_us(self, wake_delay_us: u32) -> Self {
        Self {
            wake_delay_us,
            ..self
        }
    }

    pub fn with_retries(self, retries: usize) -> Self {
        Self { retries, ..self }
    }

    pub fn with_poll_interval_us(self, poll_interval_us: u32) -> Self {
        Self {
            poll_interval_us,
            ..self
        }
    }

    pub fn with_clock_divider(self, clock_divider: ClockDivider) -> Self {
        Self {
            clock_divider,
            ..self
        }
    }

    pub fn with_idle_after_command(self, idle_after_command: bool) -> Self {
        Self {
            idle_after_command,
            ..self
        }
    }
}

pub(crate) struct I2c<PHY, D> {
    phy: PHY,
    delay: D,
    config: I2cConfig,
    state: PowerState,
}

impl<PHY, D> I2c<PHY, D> {
    pub(crate) fn new(phy: PHY, delay: D, config: I2cConfig) -> Self {
        // Nothing is known about the device before the first wake.
        Self {
            phy,
            delay,
            config,
            state: PowerState::Sleep,
        }
    }

    pub(crate) fn power_state(&self) -> PowerState {
        self.state
    }

    pub(crate) fn release(self) -> (PHY, D) {
        (self.phy, self.delay)
    }
}

impl<PHY, D> I2c<PHY, D>
where
    PHY: embedded_hal::i2c::I2c,
    D: DelayNs,
{
    /// Wakes up device if needed, sends the packet, waits for command
    /// completion, receives response, and puts the device into the idle state.
    pub(crate) fn execute<'a>(
        &mut self,
        buffer: &'a mut [u8],
        packet: Packet,
    ) -> Result<Response<'a>, Error> {
        if self.state != PowerState::Awake {
            self.wake()?;
        }

        let exec_time = self.config.clock_divider.execution_time(packet.opcode());
        trace!("command {:?}, waiting {} ms", packet.opcode(), exec_time);
        let expected = packet.response_size();
        self.send(&packet.buffer(buffer))
            .and_then(|()| {
                // Wait for the device to finish its job.
                self.delay.delay_ms(exec_time);
                self.receive(buffer, expected)
            })
            .and_then(|response| {
                if self.config.idle_after_command {
                    self.idle()?;
                }
                Response::new(response)
            })
            .map_err(|err| {
                warn!("command {:?} failed: {:?}", packet.opcode(), err);
                if err.kind().is_some() {
                    // The bus misbehaved. Send the device to sleep, if it
                    // listens, so the next command starts from a fresh wake.
                    if self.state == PowerState::Awake {
                        let word_address = Transaction::Sleep as u8;
                        self.phy.write(self.config.address, from_ref(&word_address)).ok();
                    }
                    self.state = PowerState::Sleep;
                }
                err
            })
    }

    /// A refused frame never reached the device, resending it is harmless.
    fn send<T>(&mut self, bytes: &T) -> Result<(), Error>
    where
        T: AsRef<[u8]>,
    {
        let mut count = 0;
        while self.phy.write(self.config.address, bytes.as_ref()).is_err() {
            if count >= self.config.retries {
                return Err(ErrorKind::TxFail.into());
            }
            count += 1;
            trace!("command write refused, attempt {}", count);
            self.delay.delay_us(self.config.poll_interval_us);
        }
        Ok(())
    }

    /// Returns response buffer for later processing.
    fn receive<'a>(&mut self, buffer: &'a mut [u8], expected: usize) -> Result<&'a [u8], Error> {
        self.poll()?;

        self.phy
            .read(self.config.address, &mut buffer[0..1])
            .map_err(|_| Error::from(ErrorKind::RxFail))?;

        let length_to_read = match buffer[0] as usize {
            // Buffer cannot contain the response to come. Abort.
            length if buffer.len() < length => return Err(ErrorKind::CommFail.into()),
            // The coming response is malformed. Abort.
            length if length < RSP_SIZE_MIN => return Err(ErrorKind::CommFail.into()),
            // Neither a status nor the payload the command produces.
            length if length != RSP_SIZE_MIN && length != expected => {
                debug!("expected {} bytes, device announced {}", expected, length);
                return Err(ErrorKind::CountMismatch.into());
            }
            length => length,
        };

        self.phy
            .read(self.config.address, buffer[1..length_to_read].as_mut())
            .map_err(|_| Error::from(ErrorKind::RxFail))?;
        let buffer: &'a [u8] = buffer;
        Ok(&buffer[..length_to_read])
    }

    /// The device NACKs its address until the command completes. Reset word
    /// address also rewinds the output buffer to its count byte.
    fn poll(&mut self) -> Result<(), Error> {
        let word_address = Transaction::Reset as u8;
        for attempt in 0..self.config.retries {
            if self
                .phy
                .write(self.config.address, from_ref(&word_address))
                .is_ok()
            {
                return Ok(());
            }
            trace!("device busy, attempt {}", attempt);
            self.delay.delay_us(self.config.poll_interval_us);
        }
        error!("device did not respond after {} attempts", self.config.retries);
        Err(ErrorKind::TooManyCommRetries.into())
    }

    pub(crate) fn wake(&mut self) -> Result<(), Error> {
        // Send a single null byte. Holding SDA low through the address phase
        // is the wake pulse.
        //
        // Ignore errors as this will error if the device is not awake yet.
        self.phy.write(self.config.address, from_ref(&0x00)).ok();

        // Wait for the device to wake up.
        self.delay.delay_us(self.config.wake_delay_us);

        let buffer = &mut [0x00, 0x00, 0x00, 0x00];
        let mut count = 0;
        while self.phy.read(self.config.address, buffer.as_mut()).is_err() {
            if count >= self.config.retries {
                return Err(ErrorKind::RxFail.into());
            }
            count += 1;
            self.delay.delay_us(self.config.poll_interval_us);
        }

        match buffer.as_ref() {
            WAKE_RESPONSE_EXPECTED => {
                debug!("device awake");
                self.state = PowerState::Awake;
                Ok(())
            }
            WAKE_SELFTEST_FAILED => {
                error!("device failed its self test on wake");
                Err(ErrorKind::WakeFailed.into())
            }
            _ => {
                warn!("unexpected wake token {:?}", buffer);
                Err(ErrorKind::WakeFailed.into())
            }
        }
    }

    /// A device that is not awake ignores the bus, nothing is sent then.
    pub(crate) fn idle(&mut self) -> Result<(), Error> {
        if self.state != PowerState::Awake {
            return Ok(());
        }
        let word_address = Transaction::Idle as u8;
        self.phy
            .write(self.config.address, from_ref(&word_address))
            .map_err(|_| Error::from(ErrorKind::TxFail))?;
        trace!("device idle");
        self.state = PowerState::Idle;
        Ok(())
    }

    /// An idle device has to be woken up before it accepts the request.
    pub(crate) fn sleep(&mut self) -> Result<(), Error> {
        match self.state {
            PowerState::Sleep => return Ok(()),
            PowerState::Idle => self.wake()?,
            PowerState::Awake => {}
        }
        let word_address = Transaction::Sleep as u8;
        // Wait for the I2C bus to be ready.
        self.delay.delay_us(SLEEP_DELAY_US);
        self.phy
            .write(self.config.address, from_ref(&word_address))
            .map_err(|_| Error::from(ErrorKind::TxFail))?;
        debug!("device asleep");
        self.state = PowerState::Sleep;
        Ok(())
    }
}
