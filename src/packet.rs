use crate::command::OpCode;
use crate::datalink::Transaction;
use crate::error::{Error, ErrorKind};
use core::convert::TryInto;
use core::mem::size_of;
use core::ops::RangeTo;
use crc::{Algorithm, Crc};

// Offset by word_address (1 byte)
const PACKET_OFFSET: usize = 1;
// PACKET_OFFSET + length (1 byte), opcode (1 byte), p1 (1 byte), p2 (2 bytes)
const PDU_OFFSET: usize = 6;
// Length (1 byte), opcode (1 byte), p1 (1 byte), p2 (2 bytes), crc (2 bytes)
pub(crate) const CMD_SIZE_MIN: usize = 7;
// Length (1 byte), status (1 byte), crc (2 bytes)
pub(crate) const RSP_SIZE_MIN: usize = 4;
// Length (1 byte) and crc (2 bytes) around a response payload.
pub(crate) const RSP_OVERHEAD: usize = 3;

// Parameters to calculate CRC. The device shifts each byte in starting from
// its least significant bit while the register itself is not reflected.
const CUSTOM_ALG: Algorithm<u16> = Algorithm {
    width: 16,
    poly: 0x8005,
    init: 0x0000,
    refin: true,
    refout: false,
    xorout: 0x0000,
    check: 0xbcdd,
    residue: 0x0000,
};

// CRC memoise table
pub const CRC16: Crc<u16> = Crc::<u16>::new(&CUSTOM_ALG);

/// Checksum of `bytes` in wire order (little endian).
pub fn checksum(bytes: &[u8]) -> [u8; 2] {
    CRC16.checksum(bytes).to_le_bytes()
}

#[derive(Debug)]
pub(crate) struct PacketBuilder<'a> {
    buffer: &'a mut [u8],
    pdu_length: Option<usize>,
    opcode: Option<OpCode>,
    mode: Option<u8>,
    param2: Option<u16>,
    response_length: Option<usize>,
    overflow: bool,
}

impl<'a> PacketBuilder<'a> {
    pub(crate) fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            pdu_length: None,
            opcode: None,
            mode: None,
            param2: None,
            response_length: None,
            overflow: false,
        }
    }

    pub(crate) fn opcode(&mut self, opcode: OpCode) -> &mut Self {
        self.opcode.replace(opcode);
        self
    }

    /// Mode parameter also referred as `param1`.
    pub(crate) fn mode(&mut self, mode: u8) -> &mut Self {
        self.mode.replace(mode);
        self
    }

    /// Key ID or address
    pub(crate) fn param2(&mut self, param2: u16) -> &mut Self {
        self.param2.replace(param2);
        self
    }

    pub(crate) fn pdu_data(&mut self, data: impl AsRef<[u8]>) -> &mut Self {
        let data_length = data.as_ref().len();
        match self.buffer.get_mut(PDU_OFFSET..PDU_OFFSET + data_length) {
            Some(pdu) => pdu.copy_from_slice(data.as_ref()),
            None => self.overflow = true,
        }
        self.pdu_length.replace(data_length);
        self
    }

    /// Number of payload bytes a successful response carries. Commands that
    /// answer with a bare status byte leave it unset.
    pub(crate) fn response_length(&mut self, length: usize) -> &mut Self {
        self.response_length.replace(length);
        self
    }

    pub(crate) fn packet_buffer(&mut self) -> &mut [u8] {
        self.buffer[PACKET_OFFSET..].as_mut()
    }

    pub(crate) fn build(&mut self) -> Result<Packet, Error> {
        let packet_length = self
            .pdu_length
            .iter()
            .fold(CMD_SIZE_MIN, |min, pdu_len| min + pdu_len);
        if self.overflow || packet_length + PACKET_OFFSET > self.buffer.len() {
            return Err(ErrorKind::SmallBuffer.into());
        }
        if packet_length > u8::MAX as usize {
            return Err(ErrorKind::InvalidSize.into());
        }
        let opcode = self.opcode.ok_or(Error::from(ErrorKind::BadParam))?;
        let mode = self.mode.unwrap_or_default();
        let param2 = self.param2.unwrap_or_default();
        let response_length = self.response_length.unwrap_or(1);

        self.buffer[0] = Transaction::Command as u8;
        let packet = self.packet_buffer();
        packet[0] = packet_length as u8;
        packet[1] = opcode as u8;
        packet[2] = mode;
        packet[3..5]
            .as_mut()
            .copy_from_slice(param2.to_le_bytes().as_ref());

        let crc_offset = packet_length - size_of::<u16>();
        let crc = checksum(&packet[..crc_offset]);
        packet[crc_offset..packet_length]
            .as_mut()
            .copy_from_slice(crc.as_ref());
        Ok(Packet {
            opcode,
            range: (..packet_length + PACKET_OFFSET),
            response_length,
        })
    }
}

/// Assuming buffer is alocated elsewhere, `Packet` designates subslice in use.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Packet {
    opcode: OpCode,
    range: RangeTo<usize>,
    response_length: usize,
}

impl Packet {
    pub(crate) fn opcode(&self) -> &OpCode {
        &self.opcode
    }

    /// Expected size of the whole response frame on success.
    pub(crate) fn response_size(&self) -> usize {
        self.response_length + RSP_OVERHEAD
    }

    pub(crate) fn buffer(self, buffer: &[u8]) -> &[u8] {
        buffer[self.range].as_ref()
    }
}

/// A command frame as it travels on the bus after the word address byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandFrame<'a> {
    pub opcode: u8,
    pub param1: u8,
    pub param2: u16,
    pub data: &'a [u8],
}

impl<'a> CommandFrame<'a> {
    /// Decode and validate a command packet (`count` through `crc`).
    pub fn parse(bytes: &'a [u8]) -> Result<Self, Error> {
        if bytes.len() < CMD_SIZE_MIN {
            return Err(ErrorKind::InvalidSize.into());
        }
        if bytes[0] as usize != bytes.len() {
            return Err(ErrorKind::CountMismatch.into());
        }
        let (body, crc) = bytes.split_at(bytes.len() - size_of::<u16>());
        if crc != checksum(body) {
            return Err(ErrorKind::RxCrcError.into());
        }
        Ok(Self {
            opcode: body[1],
            param1: body[2],
            param2: u16::from_le_bytes([body[3], body[4]]),
            data: &body[5..],
        })
    }
}

/// A validated response. Holds the payload between the count byte and the
/// checksum.
#[derive(Clone, Copy, Debug)]
pub struct Response<'a> {
    pdu: &'a [u8],
}

impl<'a> Response<'a> {
    /// Check if the response indicates an error. The received data is expected
    /// to be in the form of a CA device response frame. Count and checksum
    /// are verified before the payload is looked at.
    pub fn new(buffer: &'a [u8]) -> Result<Self, Error> {
        if buffer.len() < RSP_SIZE_MIN {
            return Err(ErrorKind::InvalidSize.into());
        }

        if buffer[0] as usize != buffer.len() {
            return Err(ErrorKind::CountMismatch.into());
        }

        // Check CRC.
        let (payload, crc_bytes) = buffer.split_at(buffer.len() - size_of::<u16>());
        let crc = crc_bytes
            .try_into()
            .map(u16::from_le_bytes)
            .unwrap_or_else(|_| unreachable!());
        if crc != CRC16.checksum(payload) {
            return Err(ErrorKind::RxCrcError.into());
        }

        // Check error status. Status packets are always 4 bytes long.
        let (header, pdu) = payload.split_at(1);
        if header[0] as usize == RSP_SIZE_MIN {
            if let Some(err) = Error::from_status_byte(pdu[0]) {
                return Err(err);
            }
        }

        Ok(Self { pdu })
    }
}

impl<'a> AsRef<[u8]> for Response<'a> {
    fn as_ref(&self) -> &[u8] {
        self.pdu
    }
}
