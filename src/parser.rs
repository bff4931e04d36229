//! Parsers for the argument blocks of replies and events.
//!
//! Every event argument block starts with a status byte which is skipped here.

use core::net::Ipv4Addr;

use nom::{
    number::complete::{be_u8, le_i32, le_u16, le_u32},
    IResult,
};

use crate::protocol::{IpConfig, WlanStatus};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BufferSize {
    pub count: u8,
    pub size: u16,
}

/// Reply of a socket command carrying a single signed result.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SocketResult(pub i32);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RecvReply {
    pub descriptor: i32,
    pub length: i32,
    pub flags: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SelectReply {
    pub result: i32,
    pub read: u32,
    pub write: u32,
    pub except: u32,
}

/// Leading argument block of a received data frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DataArgs {
    pub descriptor: i32,
    pub payload_length: u32,
}

fn status(input: &[u8]) -> IResult<&[u8], u8> {
    be_u8(input)
}

fn ipv4(input: &[u8]) -> IResult<&[u8], Ipv4Addr> {
    // address bytes arrive least significant first
    let (input, raw) = le_u32(input)?;
    Ok((input, Ipv4Addr::from(raw)))
}

pub fn buffer_size(input: &[u8]) -> IResult<&[u8], BufferSize> {
    let (input, _) = status(input)?;
    let (input, count) = be_u8(input)?;
    let (input, size) = le_u16(input)?;
    Ok((input, BufferSize { count, size }))
}

pub fn wlan_status(input: &[u8]) -> IResult<&[u8], WlanStatus> {
    let (input, _) = status(input)?;
    let (input, raw) = le_u32(input)?;
    Ok((input, WlanStatus::from(raw)))
}

pub fn dhcp(input: &[u8]) -> IResult<&[u8], IpConfig> {
    let (input, _) = status(input)?;
    let (input, ip) = ipv4(input)?;
    let (input, netmask) = ipv4(input)?;
    let (input, gateway) = ipv4(input)?;
    let (input, dhcp_server) = ipv4(input)?;
    let (input, dns_server) = ipv4(input)?;
    Ok((
        input,
        IpConfig {
            ip,
            netmask,
            gateway,
            dhcp_server,
            dns_server,
        },
    ))
}

pub fn socket_result(input: &[u8]) -> IResult<&[u8], SocketResult> {
    let (input, _) = status(input)?;
    let (input, result) = le_i32(input)?;
    Ok((input, SocketResult(result)))
}

/// Accept reply: the listening descriptor, then the result (the accepted
/// descriptor, or negative while nobody is waiting), then the peer address.
pub fn accept(input: &[u8]) -> IResult<&[u8], SocketResult> {
    let (input, _) = status(input)?;
    let (input, _listening) = le_i32(input)?;
    let (input, result) = le_i32(input)?;
    Ok((input, SocketResult(result)))
}

pub fn recv(input: &[u8]) -> IResult<&[u8], RecvReply> {
    let (input, _) = status(input)?;
    let (input, descriptor) = le_i32(input)?;
    let (input, length) = le_i32(input)?;
    let (input, flags) = le_u32(input)?;
    Ok((
        input,
        RecvReply {
            descriptor,
            length,
            flags,
        },
    ))
}

pub fn select(input: &[u8]) -> IResult<&[u8], SelectReply> {
    let (input, _) = status(input)?;
    let (input, result) = le_i32(input)?;
    let (input, read) = le_u32(input)?;
    let (input, write) = le_u32(input)?;
    let (input, except) = le_u32(input)?;
    Ok((
        input,
        SelectReply {
            result,
            read,
            write,
            except,
        },
    ))
}

/// Close-wait carries the descriptor the peer closed.
pub fn close_wait(input: &[u8]) -> IResult<&[u8], i32> {
    let (input, _) = status(input)?;
    le_i32(input)
}

/// Free-buffer notification: total number of buffers returned across all handles.
pub fn free_buffers(input: &[u8]) -> IResult<&[u8], u16> {
    let (mut input, _) = status(input)?;
    let (rest, handles) = le_u16(input)?;
    input = rest;

    let mut freed = 0u16;
    for _ in 0..handles {
        let (rest, _descriptor) = le_u16(input)?;
        let (rest, count) = le_u16(rest)?;
        freed = freed.saturating_add(count);
        input = rest;
    }
    Ok((input, freed))
}

pub fn data_args(input: &[u8]) -> IResult<&[u8], DataArgs> {
    let (input, descriptor) = le_i32(input)?;
    let (input, _offset) = le_u32(input)?;
    let (input, payload_length) = le_u32(input)?;
    Ok((
        input,
        DataArgs {
            descriptor,
            payload_length,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_dhcp() {
        let raw = [
            0x00, // status
            10, 1, 168, 192, // ip
            0, 255, 255, 255, // netmask
            1, 1, 168, 192, // gateway
            1, 1, 168, 192, // dhcp
            8, 8, 8, 8, // dns
        ];
        let (_, config) = dhcp(&raw).unwrap();
        assert_eq!(config.ip, Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(config.netmask, Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(config.gateway, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(config.dns_server, Ipv4Addr::new(8, 8, 8, 8));
    }

    #[test]
    fn parse_socket_result() {
        let (_, result) = socket_result(&[0x00, 0xFF, 0xFF, 0xFF, 0xFF]).unwrap();
        assert_eq!(result, SocketResult(-1));
        let (_, result) = socket_result(&[0x00, 0x03, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(result, SocketResult(3));
    }

    #[test]
    fn parse_accept_skips_listening_descriptor() {
        let raw = [0x00, 0x04, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x00, 0x02, 0x00, 0x1F, 0x90, 10, 0, 0, 2];
        let (_, result) = accept(&raw).unwrap();
        assert_eq!(result, SocketResult(7));
        assert!(accept(&raw[..5]).is_err());
    }

    #[test]
    fn truncated_reply_fails() {
        assert!(socket_result(&[0x00, 0x03]).is_err());
        assert!(wlan_status(&[]).is_err());
    }

    #[test]
    fn parse_free_buffers() {
        let raw = [0x00, 0x02, 0x00, 0x01, 0x00, 0x02, 0x00, 0x02, 0x00, 0x01, 0x00];
        let (_, freed) = free_buffers(&raw).unwrap();
        assert_eq!(freed, 3);
    }

    #[test]
    fn parse_select() {
        let mut raw = [0u8; 17];
        raw[1] = 1;
        raw[5] = 0b1000;
        let (_, reply) = select(&raw).unwrap();
        assert_eq!(reply.result, 1);
        assert_eq!(reply.read, 0b1000);
        assert_eq!(reply.except, 0);
    }
}
