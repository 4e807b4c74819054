//! BM13xx wire protocol: command frames out, register responses in.
//!
//! Outbound frames are `[55 aa] flags len chip reg payload crc`. The length
//! byte counts everything after the preamble, checksum included. Control
//! commands end in a CRC5 byte, job frames in a big-endian CRC16.
//!
//! Inbound frames are `[aa 55] value(4, BE) chip reg crc5`.

use bitvec::prelude::*;
use bytes::{Buf, BufMut, BytesMut};
use std::fmt;
use tokio_util::codec::{Decoder, Encoder};

use super::crc::{crc16, crc5, crc5_is_valid};
use super::error::{Error, FramingFault, Result};
use super::register::RegisterAddress;
use crate::tracing::prelude::*;

const TX_PREAMBLE: [u8; 2] = [0x55, 0xaa];
const RX_PREAMBLE: [u8; 2] = [0xaa, 0x55];

/// Response length without preamble: value(4) + chip(1) + reg(1) + crc(1).
pub const RESPONSE_LEN: usize = 7;

/// Number of bytes in one SHA-256 midstate.
pub const MIDSTATE_LEN: usize = 32;

/// A job carries at most this many midstates.
pub const MAX_MIDSTATES: usize = 4;

/// Wrapper for formatting byte slices as space-separated hex.
pub struct HexBytes<'a>(pub &'a [u8]);

impl fmt::Display for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[repr(u8)]
enum CommandFlagsType {
    Job = 1,
    Command = 2,
}

#[repr(u8)]
enum CommandFlagsCmd {
    SetChipAddress = 0,
    WriteRegisterOrJob = 1,
    ReadRegister = 2,
    ChainInactive = 3,
}

pub type Midstate = [u8; MIDSTATE_LEN];

/// A unit of work for the chain.
///
/// The header fields are sent little-endian. Only the last four bytes of the
/// merkle root travel with the job; the midstates cover the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub job_id: u8,
    pub starting_nonce: u32,
    pub nbits: u32,
    pub ntime: u32,
    pub merkle_root: u32,
    pub midstates: Vec<Midstate>,
}

impl Job {
    /// Reject jobs whose midstate count the frame cannot carry.
    pub fn validate(&self) -> Result<()> {
        let count = self.midstates.len();
        if count == 0 || count > MAX_MIDSTATES {
            return Err(Error::range("midstate count", count as u64, MAX_MIDSTATES as u64));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Assign a bus address to the first chip still at address 0.
    SetChipAddress { chip_address: u8 },
    /// Put every chip back into the addressable state.
    ChainInactive,
    ReadRegister {
        broadcast: bool,
        chip_address: u8,
        register_address: RegisterAddress,
    },
    WriteRegister {
        broadcast: bool,
        chip_address: u8,
        register_address: RegisterAddress,
        value: u32,
    },
    /// Job submission. The job id rides in the chip address byte and the
    /// midstate count in the register address byte.
    Job(Job),
}

impl Command {
    fn build_flags(typ: CommandFlagsType, broadcast: bool, cmd: CommandFlagsCmd) -> u8 {
        let mut flags = 0u8;
        let field = flags.view_bits_mut::<Lsb0>();
        field[5..7].store(typ as u8);
        field[4..5].store(broadcast as u8);
        field[0..4].store(cmd as u8);
        flags
    }

    fn is_job(&self) -> bool {
        matches!(self, Command::Job(_))
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        const FLAGS_LEN: u8 = 1;
        const LENGTH_FIELD_LEN: u8 = 1;
        const CHIP_ADDR_LEN: u8 = 1;
        const REG_ADDR_LEN: u8 = 1;
        const HEADER_LEN: u8 = FLAGS_LEN + LENGTH_FIELD_LEN + CHIP_ADDR_LEN + REG_ADDR_LEN;
        const CRC5_LEN: u8 = 1;

        match self {
            Command::SetChipAddress { chip_address } => {
                dst.put_u8(Self::build_flags(
                    CommandFlagsType::Command,
                    false, // Never broadcast
                    CommandFlagsCmd::SetChipAddress,
                ));
                dst.put_u8(HEADER_LEN + CRC5_LEN);
                dst.put_u8(*chip_address);
                dst.put_u8(0x00);
            }
            Command::ChainInactive => {
                dst.put_u8(Self::build_flags(
                    CommandFlagsType::Command,
                    true, // Always broadcast
                    CommandFlagsCmd::ChainInactive,
                ));
                dst.put_u8(HEADER_LEN + CRC5_LEN);
                dst.put_u8(0x00);
                dst.put_u8(0x00);
            }
            Command::ReadRegister {
                broadcast,
                chip_address,
                register_address,
            } => {
                dst.put_u8(Self::build_flags(
                    CommandFlagsType::Command,
                    *broadcast,
                    CommandFlagsCmd::ReadRegister,
                ));
                dst.put_u8(HEADER_LEN + CRC5_LEN);
                dst.put_u8(*chip_address);
                dst.put_u8(u8::from(*register_address));
            }
            Command::WriteRegister {
                broadcast,
                chip_address,
                register_address,
                value,
            } => {
                const REG_DATA_LEN: u8 = 4;

                dst.put_u8(Self::build_flags(
                    CommandFlagsType::Command,
                    *broadcast,
                    CommandFlagsCmd::WriteRegisterOrJob,
                ));
                dst.put_u8(HEADER_LEN + REG_DATA_LEN + CRC5_LEN);
                dst.put_u8(*chip_address);
                dst.put_u8(u8::from(*register_address));
                dst.put_u32(*value);
            }
            Command::Job(job) => {
                // starting_nonce, nbits, ntime, merkle_root
                const FIELDS_LEN: usize = 16;
                const CRC16_LEN: usize = 2;

                job.validate()?;
                let len = HEADER_LEN as usize
                    + FIELDS_LEN
                    + job.midstates.len() * MIDSTATE_LEN
                    + CRC16_LEN;

                dst.put_u8(Self::build_flags(
                    CommandFlagsType::Job,
                    false, // Jobs are never broadcast
                    CommandFlagsCmd::WriteRegisterOrJob,
                ));
                // At most 4 + 16 + 4 * 32 + 2 = 150
                dst.put_u8(len as u8);
                dst.put_u8(job.job_id);
                dst.put_u8(job.midstates.len() as u8);
                dst.put_u32_le(job.starting_nonce);
                dst.put_u32_le(job.nbits);
                dst.put_u32_le(job.ntime);
                dst.put_u32_le(job.merkle_root);
                for midstate in &job.midstates {
                    dst.put_slice(midstate);
                }
            }
        }
        Ok(())
    }
}

/// A register read response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub value: u32,
    pub chip_address: u8,
    /// Raw echoed register address; chips may echo addresses this crate
    /// has no name for.
    pub register_address: u8,
}

impl Response {
    /// The echoed register, if it is one we know.
    pub fn register(&self) -> Option<RegisterAddress> {
        RegisterAddress::from_repr(self.register_address)
    }

    fn decode(bytes: &mut BytesMut) -> Response {
        let value = bytes.get_u32();
        let chip_address = bytes.get_u8();
        let register_address = bytes.get_u8();
        // CRC already validated
        Response {
            value,
            chip_address,
            register_address,
        }
    }
}

/// Codec for one chain. Chains of the later chip generations wrap every
/// frame in a two byte preamble; older ones send bare frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    preamble: bool,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self { preamble: true }
    }
}

impl FrameCodec {
    pub fn new(preamble: bool) -> Self {
        Self { preamble }
    }

    pub fn preamble(&self) -> bool {
        self.preamble
    }

    /// Exact number of bytes one response occupies on the wire.
    pub fn response_len(&self) -> usize {
        if self.preamble {
            RX_PREAMBLE.len() + RESPONSE_LEN
        } else {
            RESPONSE_LEN
        }
    }
}

impl Encoder<Command> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, command: Command, dst: &mut BytesMut) -> Result<()> {
        let frame_start = dst.len();
        if self.preamble {
            dst.put_slice(&TX_PREAMBLE);
        }

        let start_pos = dst.len();
        if let Err(err) = command.encode(dst) {
            dst.truncate(frame_start);
            return Err(err);
        }

        // Jobs use CRC16, other commands use CRC5, both over everything
        // after the preamble
        if command.is_job() {
            let crc = crc16(&dst[start_pos..]);
            dst.put_u16(crc);
        } else {
            let crc = crc5(&dst[start_pos..]);
            dst.put_u8(crc);
        }

        trace!(
            cmd = ?command,
            bytes = dst.len() - frame_start,
            frame = %HexBytes(&dst[frame_start..]),
            "TX BM13xx"
        );

        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Response;
    type Error = Error;

    /// Decode exactly one response from the front of `src`.
    ///
    /// The chain reads responses one fixed-size frame at a time, so unlike a
    /// streaming decoder this does not hunt for sync: a bad preamble or
    /// checksum consumes the frame and fails.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Response>> {
        let frame_len = self.response_len();
        if src.len() < frame_len {
            return Ok(None);
        }

        let mut frame = src.split_to(frame_len);
        let frame_bytes = frame.clone();

        if self.preamble {
            let found = [frame[0], frame[1]];
            if found != RX_PREAMBLE {
                debug!(frame = %HexBytes(&frame_bytes), "RX BM13xx bad preamble");
                return Err(Error::Framing(FramingFault::Preamble(found)));
            }
            frame.advance(RX_PREAMBLE.len());
        }

        if !crc5_is_valid(&frame) {
            debug!(frame = %HexBytes(&frame_bytes), "RX BM13xx bad CRC5");
            return Err(Error::Checksum);
        }

        let response = Response::decode(&mut frame);
        trace!(
            resp = ?response,
            bytes = frame_len,
            frame = %HexBytes(&frame_bytes),
            "RX BM13xx"
        );
        Ok(Some(response))
    }
}

/// Decode a frame the transport handed back, checking its length first.
pub fn decode_response(codec: &mut FrameCodec, bytes: &[u8]) -> Result<Response> {
    let expected = codec.response_len();
    if bytes.len() != expected {
        return Err(Error::Framing(FramingFault::Length {
            expected,
            actual: bytes.len(),
        }));
    }

    let mut buf = BytesMut::from(bytes);
    codec.decode(&mut buf)?.ok_or(Error::Framing(FramingFault::Length {
        expected,
        actual: bytes.len(),
    }))
}
