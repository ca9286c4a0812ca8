use crate::command::OpCode;

// Typical execution times in ms for ChipMode clock divider {M0, M1, M2}.
const EXEC_TIME_CHECKMAC: [u32; 3] = [40, 40, 40];
const EXEC_TIME_GENKEY: [u32; 3] = [115, 215, 653];
const EXEC_TIME_INFO: [u32; 3] = [5, 5, 5];
const EXEC_TIME_LOCK: [u32; 3] = [35, 35, 35];
const EXEC_TIME_MAC: [u32; 3] = [55, 55, 55];
const EXEC_TIME_NONCE: [u32; 3] = [20, 20, 20];
const EXEC_TIME_RANDOM: [u32; 3] = [23, 23, 23];
const EXEC_TIME_READ: [u32; 3] = [5, 5, 5];
const EXEC_TIME_SHA: [u32; 3] = [36, 42, 75];
const EXEC_TIME_WRITE: [u32; 3] = [45, 45, 45];

/// ChipMode clock divider {M0, M1, M2}
///
/// Must match bits 3-7 of the ChipMode config byte. A slower internal clock
/// stretches the execution time of the computation heavy commands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockDivider {
    #[default]
    Zero = 0,
    One = 1,
    Two = 2,
}

impl ClockDivider {
    /// Get the typical execution time in milliseconds for the given command.
    pub(crate) fn execution_time(&self, opcode: &OpCode) -> u32 {
        use OpCode::*;
        let index = *self as usize;
        match opcode {
            CheckMac => EXEC_TIME_CHECKMAC[index],
            GenKey => EXEC_TIME_GENKEY[index],
            Info => EXEC_TIME_INFO[index],
            Lock => EXEC_TIME_LOCK[index],
            Mac => EXEC_TIME_MAC[index],
            Nonce => EXEC_TIME_NONCE[index],
            Random => EXEC_TIME_RANDOM[index],
            Read => EXEC_TIME_READ[index],
            Sha => EXEC_TIME_SHA[index],
            Write => EXEC_TIME_WRITE[index],
        }
    }
}
