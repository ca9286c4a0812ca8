use core::fmt;

/// An error type representing ATECCx08A's erroneous conditions.
///
/// Either the driver detected something wrong on its side of the bus
/// ([`ErrorKind`]) or the chip answered with a non-zero status byte
/// ([`Status`]).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Error {
    repr: Repr,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Repr {
    // Decoded status and the byte the chip sent.
    Device(Status, u8),
    Simple(ErrorKind),
}

impl Error {
    /// Driver-side cause, if any.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self.repr {
            Repr::Simple(kind) => Some(kind),
            Repr::Device(..) => None,
        }
    }

    /// Status byte reported by the chip, if any.
    pub fn status(&self) -> Option<Status> {
        match self.repr {
            Repr::Device(status, _) => Some(status),
            Repr::Simple(_) => None,
        }
    }

    /// Numeric code. Chip statuses keep their status byte, driver errors use
    /// the 0xD0..0xFF range of CryptoAuthLib.
    pub fn code(&self) -> u32 {
        match self.repr {
            Repr::Device(_, code) => code as u32,
            Repr::Simple(kind) => kind as u32,
        }
    }

    /// Whether reissuing the same command is safe and may succeed.
    ///
    /// Integrity failures on received data and lock violations are final from
    /// the driver's point of view; the caller decides how to proceed.
    pub fn is_retryable(&self) -> bool {
        match self.repr {
            Repr::Device(status, _) => matches!(
                status,
                Status::Crc | Status::WatchdogAboutToExpire | Status::AfterWake
            ),
            Repr::Simple(kind) => matches!(
                kind,
                ErrorKind::TxFail
                    | ErrorKind::RxFail
                    | ErrorKind::TooManyCommRetries
                    | ErrorKind::WakeFailed
                    | ErrorKind::MutexLocked
            ),
        }
    }

    /// The zone named in the error was found locked.
    pub fn is_locked_zone(&self) -> bool {
        matches!(
            self.repr,
            Repr::Simple(ErrorKind::ConfigZoneLocked | ErrorKind::DataZoneLocked)
        )
    }
}

impl Error {
    /// Error for a non-zero status byte. Undocumented bytes decode to
    /// `Status::Unknown` and stay available through `code`.
    pub(crate) fn from_status_byte(byte: u8) -> Option<Self> {
        Status::from_u8(byte).map(|status| Error {
            repr: Repr::Device(status, byte),
        })
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            repr: Repr::Simple(kind),
        }
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Error {
        Error {
            repr: Repr::Device(status, status as u8),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Device(status, _) => write!(fmt, "{}", status.as_str()),
            Repr::Simple(kind) => write!(fmt, "{}", kind.as_str()),
        }
    }
}

/// Status byte carried by a 4-byte response.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    /// response status byte indicates CheckMac or Verify miscompare (status
    /// byte = 0x01)
    CheckmacVerifyFailed = 0x01,
    /// response status byte indicates parsing error (status byte = 0x03)
    Parse = 0x03,
    /// response status byte is Ecc fault (status byte = 0x05)
    Ecc = 0x05,
    /// response status byte is Self Test Error, chip in failure mode (status
    /// byte = 0x07)
    SelfTest = 0x07,
    /// random number generator health test error
    HealthTest = 0x08,
    /// chip was in a state where it could not execute the command, response
    /// status byte indicates command execution error (status byte = 0x0F)
    Execution = 0x0F,
    /// no command has run since wake up, there is no data to return
    AfterWake = 0x11,
    /// watchdog timer will expire before the command could complete
    WatchdogAboutToExpire = 0xEE,
    /// response status byte indicates Device did not receive data properly
    /// (status byte = 0xFF)
    Crc = 0xFF,
    /// response status byte is unknown
    Unknown = 0xD5,
}

impl Status {
    /// Decode a status byte. `0x00` means success and yields `None`.
    pub fn from_u8(status: u8) -> Option<Self> {
        use Status::*;
        match status {
            0x00 => None,
            x if x == CheckmacVerifyFailed as u8 => CheckmacVerifyFailed.into(),
            x if x == Parse as u8 => Parse.into(),
            x if x == Ecc as u8 => Ecc.into(),
            x if x == SelfTest as u8 => SelfTest.into(),
            x if x == HealthTest as u8 => HealthTest.into(),
            x if x == Execution as u8 => Execution.into(),
            x if x == AfterWake as u8 => AfterWake.into(),
            x if x == WatchdogAboutToExpire as u8 => WatchdogAboutToExpire.into(),
            x if x == Crc as u8 => Crc.into(),
            _ => Unknown.into(),
        }
    }

    fn as_str(&self) -> &'static str {
        use Status::*;
        match self {
            AfterWake => "no command executed since wake up, no data available",
            CheckmacVerifyFailed => "checkmac or verify failed",
            Crc => "bad crc found (command not properly received by device) or other comm error",
            Ecc => "computation error during ECC processing causing invalid results",
            Execution => "chip can't execute the command",
            HealthTest => "random number generator health test error",
            Parse => "command received byte length, opcode or parameter was illegal",
            SelfTest => "chip is in self test failure mode",
            Unknown => "response contains unknown non-zero status byte",
            WatchdogAboutToExpire => "watchdog is about to expire, put the device to sleep",
        }
    }
}

/// A list of specific error causes. Each kind is converted into `Error` type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorKind {
    /// Write or lock refused because the config zone is locked
    ConfigZoneLocked = 0x01,
    /// Write or lock refused because the data and OTP zones are locked
    DataZoneLocked = 0x04,
    /// Device did not respond to wake call as expected
    WakeFailed = 0xD0,
    /// Declared response length disagrees with the bytes received
    CountMismatch = 0xD8,
    /// Nonce context was never loaded or has been invalidated since
    TempKeyInvalid = 0xD9,
    /// Another caller holds the device
    MutexLocked = 0xDA,
    /// bad argument (out of range, null pointer, etc.)
    BadParam = 0xE2,
    /// Count value is out of range or greater than buffer size.
    InvalidSize = 0xE4,
    /// Crc error in data received from device
    RxCrcError = 0xE5,
    /// Timed out while waiting for response. Number of bytes received is > 0.
    RxFail = 0xE6,
    /// Device did not respond too many times during a transmission. Could
    /// indicate no device present.
    TooManyCommRetries = 0xEC,
    /// Supplied buffer is too small for data required
    SmallBuffer = 0xED,
    /// Communication with device failed. Same as in hardware dependent modules.
    CommFail = 0xF0,
    /// Failed to write
    TxFail = 0xF7,
}

impl ErrorKind {
    fn as_str(&self) -> &'static str {
        use ErrorKind::*;
        match self {
            BadParam => "bad argument (out of range, null pointer, etc.)",
            CommFail => "communication with device failed",
            ConfigZoneLocked => "config zone is locked",
            CountMismatch => "response count byte disagrees with received length",
            DataZoneLocked => "data and OTP zones are locked",
            InvalidSize => "count value is out of range or greater than buffer size",
            MutexLocked => "device is busy serving another caller",
            RxCrcError => "crc error in data received from device",
            RxFail => "failed to read from device",
            SmallBuffer => "supplied buffer is too small for data required",
            TempKeyInvalid => "nonce context is missing or stale",
            TooManyCommRetries => {
                "device did not respond too many times, indicating no device present"
            }
            TxFail => "failed to write",
            WakeFailed => "device did not respond to wake call as expected",
        }
    }
}
