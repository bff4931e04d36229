//! SPI packet framing.
//!
//! Every exchange with the chip starts with a 5 byte transport header. Commands
//! and events carry a 4 byte payload header, data frames a 5 byte one. All of
//! the functions here are pure: they fill or inspect a byte slice and never
//! touch the bus.

use nom::{
    bytes::complete::take,
    number::complete::{be_u16, be_u8 as byte, le_u16},
    IResult,
};

use crate::adapter::Error;

pub const BUFFER_SIZE: usize = 1500 + 200;

pub const SPI_HEADER_LEN: usize = 5;
pub const COMMAND_HEADER_LEN: usize = 4;
pub const DATA_HEADER_LEN: usize = 5;

/// Operation byte of the transport header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PacketType {
    Write = 0x01,
    Reply = 0x02,
    Read = 0x03,
}

/// Tag byte leading every payload.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadType {
    Command,
    Data,
    Event,
    Unknown(u8),
}

impl From<u8> for PayloadType {
    fn from(tag: u8) -> Self {
        match tag {
            0x01 => PayloadType::Command,
            0x02 => PayloadType::Data,
            0x04 => PayloadType::Event,
            other => PayloadType::Unknown(other),
        }
    }
}

impl PayloadType {
    pub fn tag(self) -> u8 {
        match self {
            PayloadType::Command => 0x01,
            PayloadType::Data => 0x02,
            PayloadType::Event => 0x04,
            PayloadType::Unknown(tag) => tag,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SpiHeader {
    pub packet_type: u8,
    pub length: u16,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CommandHeader {
    pub payload_type: PayloadType,
    pub opcode: u16,
    pub argument_length: u8,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DataHeader {
    pub opcode: u8,
    pub argument_length: u8,
    pub payload_length: u16,
}

/// Payload length after the even-length rule is applied.
pub fn padded_length(payload_length: usize) -> usize {
    if (SPI_HEADER_LEN + payload_length) % 2 != 0 {
        payload_length + 1
    } else {
        payload_length
    }
}

/// Writes a transport write header for `payload_length` bytes and returns the
/// total number of bytes to clock out. The length travels MSB first.
pub fn write_header(buffer: &mut [u8], payload_length: usize) -> usize {
    let length = padded_length(payload_length);
    buffer[0] = PacketType::Write as u8;
    buffer[1..3].copy_from_slice(&(length as u16).to_be_bytes());
    buffer[3] = 0;
    buffer[4] = 0;
    if length != payload_length {
        buffer[SPI_HEADER_LEN + payload_length] = 0;
    }
    SPI_HEADER_LEN + length
}

/// Writes the header the host clocks out to read a pending packet.
pub fn read_header(buffer: &mut [u8]) {
    buffer[0] = PacketType::Read as u8;
    for b in buffer[1..SPI_HEADER_LEN].iter_mut() {
        *b = 0;
    }
}

/// Frames a command with its arguments into `buffer`.
pub fn command(buffer: &mut [u8], opcode: u16, args: &[u8]) -> Result<usize, Error> {
    if args.len() > u8::MAX as usize {
        return Err(Error::Invalid);
    }
    let payload_length = COMMAND_HEADER_LEN + args.len();
    if SPI_HEADER_LEN + padded_length(payload_length) > buffer.len() {
        return Err(Error::Invalid);
    }

    let header = &mut buffer[SPI_HEADER_LEN..SPI_HEADER_LEN + COMMAND_HEADER_LEN];
    header[0] = PayloadType::Command.tag();
    header[1..3].copy_from_slice(&opcode.to_le_bytes());
    header[3] = args.len() as u8;

    let start = SPI_HEADER_LEN + COMMAND_HEADER_LEN;
    buffer[start..start + args.len()].copy_from_slice(args);

    Ok(write_header(buffer, payload_length))
}

/// Frames a data transfer: arguments, then payload, then footer.
pub fn data(
    buffer: &mut [u8],
    opcode: u8,
    args: &[u8],
    payload: &[u8],
    footer: &[u8],
) -> Result<usize, Error> {
    if args.len() > u8::MAX as usize {
        return Err(Error::Invalid);
    }
    // the header's length counts arguments, payload and footer
    let body = args.len() + payload.len() + footer.len();
    if body > u16::MAX as usize {
        return Err(Error::Invalid);
    }
    let payload_length = DATA_HEADER_LEN + body;
    if SPI_HEADER_LEN + padded_length(payload_length) > buffer.len() {
        return Err(Error::Invalid);
    }

    let header = &mut buffer[SPI_HEADER_LEN..SPI_HEADER_LEN + DATA_HEADER_LEN];
    header[0] = PayloadType::Data.tag();
    header[1] = opcode;
    header[2] = args.len() as u8;
    header[3..5].copy_from_slice(&(body as u16).to_le_bytes());

    let mut pos = SPI_HEADER_LEN + DATA_HEADER_LEN;
    for part in [args, payload, footer].iter() {
        buffer[pos..pos + part.len()].copy_from_slice(part);
        pos += part.len();
    }

    Ok(write_header(buffer, payload_length))
}

/// Transmit header as produced by [`write_header`].
pub fn spi_write_header(input: &[u8]) -> IResult<&[u8], SpiHeader> {
    let (input, packet_type) = byte(input)?;
    let (input, length) = be_u16(input)?;
    let (input, _busy) = take(2usize)(input)?;
    Ok((input, SpiHeader { packet_type, length }))
}

/// Header of a packet clocked in from the chip: type, two busy bytes, length.
pub fn spi_reply_header(input: &[u8]) -> IResult<&[u8], SpiHeader> {
    let (input, packet_type) = byte(input)?;
    let (input, _busy) = take(2usize)(input)?;
    let (input, length) = be_u16(input)?;
    Ok((input, SpiHeader { packet_type, length }))
}

pub fn command_header(input: &[u8]) -> IResult<&[u8], CommandHeader> {
    let (input, tag) = byte(input)?;
    let (input, opcode) = le_u16(input)?;
    let (input, argument_length) = byte(input)?;
    Ok((
        input,
        CommandHeader {
            payload_type: PayloadType::from(tag),
            opcode,
            argument_length,
        },
    ))
}

/// Data header without its leading tag byte.
pub fn data_header(input: &[u8]) -> IResult<&[u8], DataHeader> {
    let (input, opcode) = byte(input)?;
    let (input, argument_length) = byte(input)?;
    let (input, payload_length) = le_u16(input)?;
    Ok((
        input,
        DataHeader {
            opcode,
            argument_length,
            payload_length,
        },
    ))
}
