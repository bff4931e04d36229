use core::net::{Ipv4Addr, SocketAddrV4};
use heapless::{consts::*, String, Vec};

use crate::adapter::{Error, JoinError};

pub const AF_INET: u32 = 2;

pub const SOCK_STREAM: u32 = 1;
pub const SOCK_DGRAM: u32 = 2;

pub const IPPROTO_TCP: u32 = 6;
pub const IPPROTO_UDP: u32 = 17;

pub const SSID_MAX: usize = 32;
pub const KEY_MAX: usize = 64;

pub(crate) const SOCKADDR_LEN: usize = 8;

/// Arguments of a single command, assembled on the stack.
pub(crate) type Args = Vec<u8, U128>;

pub(crate) trait PutLe {
    fn put_u16(&mut self, value: u16) -> Result<(), Error>;
    fn put_u32(&mut self, value: u32) -> Result<(), Error>;
    fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), Error>;
}

impl PutLe for Args {
    fn put_u16(&mut self, value: u16) -> Result<(), Error> {
        self.put_bytes(&value.to_le_bytes())
    }

    fn put_u32(&mut self, value: u32) -> Result<(), Error> {
        self.put_bytes(&value.to_le_bytes())
    }

    fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.extend_from_slice(bytes).map_err(|_| Error::Invalid)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Security {
    Open = 0,
    Wep = 1,
    Wpa = 2,
    Wpa2 = 3,
}

/// Access point credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinInfo {
    pub security: Security,
    pub ssid: String<U32>,
    pub key: String<U64>,
}

impl JoinInfo {
    pub fn open(ssid: &str) -> Result<Self, JoinError> {
        Self::new(Security::Open, ssid, "")
    }

    pub fn wep(ssid: &str, key: &str) -> Result<Self, JoinError> {
        Self::new(Security::Wep, ssid, key)
    }

    pub fn wpa(ssid: &str, key: &str) -> Result<Self, JoinError> {
        Self::new(Security::Wpa, ssid, key)
    }

    pub fn wpa2(ssid: &str, key: &str) -> Result<Self, JoinError> {
        Self::new(Security::Wpa2, ssid, key)
    }

    pub fn new(security: Security, ssid: &str, key: &str) -> Result<Self, JoinError> {
        if ssid.is_empty() || ssid.len() > SSID_MAX {
            return Err(JoinError::InvalidSsid);
        }
        if key.len() > KEY_MAX || (security != Security::Open && key.is_empty()) {
            return Err(JoinError::InvalidPassword);
        }

        let mut info = JoinInfo {
            security,
            ssid: String::new(),
            key: String::new(),
        };
        info.ssid.push_str(ssid).map_err(|_| JoinError::InvalidSsid)?;
        info.key.push_str(key).map_err(|_| JoinError::InvalidPassword)?;
        Ok(info)
    }
}

/// `sockaddr_in` as the chip expects it: family, port in network order, address.
pub(crate) fn sockaddr(address: &SocketAddrV4) -> [u8; SOCKADDR_LEN] {
    let mut raw = [0u8; SOCKADDR_LEN];
    raw[0..2].copy_from_slice(&(AF_INET as u16).to_le_bytes());
    raw[2..4].copy_from_slice(&address.port().to_be_bytes());
    raw[4..8].copy_from_slice(&address.ip().octets());
    raw
}

pub(crate) fn simple_link_start() -> Result<Args, Error> {
    let mut args = Args::new();
    // no patches loaded from the host
    args.put_bytes(&[0])?;
    Ok(args)
}

pub(crate) fn wlan_connect(info: &JoinInfo) -> Result<Args, Error> {
    let ssid = info.ssid.as_bytes();
    let key = info.key.as_bytes();

    let mut args = Args::new();
    args.put_u32(0x1C)?;
    args.put_u32(ssid.len() as u32)?;
    args.put_u32(info.security as u32)?;
    args.put_u32(0x10 + ssid.len() as u32)?;
    args.put_u32(key.len() as u32)?;
    args.put_u16(0)?;
    // any BSSID
    args.put_bytes(&[0; 6])?;
    args.put_bytes(ssid)?;
    args.put_bytes(key)?;
    Ok(args)
}

pub(crate) fn socket(family: u32, socket_type: u32, protocol: u32) -> Result<Args, Error> {
    let mut args = Args::new();
    args.put_u32(family)?;
    args.put_u32(socket_type)?;
    args.put_u32(protocol)?;
    Ok(args)
}

/// Shared layout of connect and bind.
pub(crate) fn address_command(descriptor: i32, address: &SocketAddrV4) -> Result<Args, Error> {
    let mut args = Args::new();
    args.put_u32(descriptor as u32)?;
    args.put_u32(0x08)?;
    args.put_u32(SOCKADDR_LEN as u32)?;
    args.put_bytes(&sockaddr(address))?;
    Ok(args)
}

pub(crate) fn listen(descriptor: i32, backlog: u32) -> Result<Args, Error> {
    let mut args = Args::new();
    args.put_u32(descriptor as u32)?;
    args.put_u32(backlog)?;
    Ok(args)
}

pub(crate) fn descriptor_only(descriptor: i32) -> Result<Args, Error> {
    let mut args = Args::new();
    args.put_u32(descriptor as u32)?;
    Ok(args)
}

pub(crate) fn recv(descriptor: i32, length: u16) -> Result<Args, Error> {
    let mut args = Args::new();
    args.put_u32(descriptor as u32)?;
    args.put_u32(length as u32)?;
    // flags
    args.put_u32(0)?;
    Ok(args)
}

/// Non-blocking select over the given descriptor sets.
pub(crate) fn select(nfds: u32, read: u32, write: u32, except: u32) -> Result<Args, Error> {
    let mut args = Args::new();
    args.put_u32(nfds)?;
    for _ in 0..4 {
        args.put_u32(0x14)?;
    }
    // non-blocking
    args.put_u32(1)?;
    args.put_u32(read)?;
    args.put_u32(write)?;
    args.put_u32(except)?;
    // timeout: 5ms
    args.put_u32(0)?;
    args.put_u32(5000)?;
    Ok(args)
}

pub(crate) fn send_args(descriptor: i32, payload_length: usize) -> Result<Args, Error> {
    let mut args = Args::new();
    args.put_u32(descriptor as u32)?;
    args.put_u32(0x0C)?;
    args.put_u32(payload_length as u32)?;
    args.put_u32(0)?;
    Ok(args)
}

pub(crate) fn send_to_args(descriptor: i32, payload_length: usize) -> Result<Args, Error> {
    let mut args = Args::new();
    args.put_u32(descriptor as u32)?;
    args.put_u32(0x14)?;
    args.put_u32(payload_length as u32)?;
    args.put_u32(0)?;
    args.put_u32(payload_length as u32 + 8)?;
    args.put_u32(SOCKADDR_LEN as u32)?;
    Ok(args)
}

/// Address configuration delivered with the DHCP event.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IpConfig {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dhcp_server: Ipv4Addr,
    pub dns_server: Ipv4Addr,
}

impl Default for IpConfig {
    fn default() -> Self {
        Self {
            ip: Ipv4Addr::UNSPECIFIED,
            netmask: Ipv4Addr::UNSPECIFIED,
            gateway: Ipv4Addr::UNSPECIFIED,
            dhcp_server: Ipv4Addr::UNSPECIFIED,
            dns_server: Ipv4Addr::UNSPECIFIED,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WlanStatus {
    Disconnected,
    Scanning,
    Connecting,
    Connected,
    Unknown(u32),
}

impl From<u32> for WlanStatus {
    fn from(status: u32) -> Self {
        match status {
            0 => WlanStatus::Disconnected,
            1 => WlanStatus::Scanning,
            2 => WlanStatus::Connecting,
            3 => WlanStatus::Connected,
            other => WlanStatus::Unknown(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_are_validated() {
        assert!(JoinInfo::wpa2("drogue", "rodney").is_ok());
        assert_eq!(
            JoinInfo::wpa2("this-ssid-is-far-too-long-for-the-chip", "x").unwrap_err(),
            JoinError::InvalidSsid
        );
        assert_eq!(JoinInfo::wep("drogue", "").unwrap_err(), JoinError::InvalidPassword);
        assert!(JoinInfo::open("drogue").is_ok());
    }

    #[test]
    fn wlan_connect_layout() {
        let info = JoinInfo::wpa2("ap", "secret").unwrap();
        let args = wlan_connect(&info).unwrap();

        assert_eq!(args.len(), 28 + 2 + 6);
        assert_eq!(&args[0..4], &[0x1C, 0, 0, 0]);
        assert_eq!(&args[4..8], &[2, 0, 0, 0]);
        assert_eq!(&args[8..12], &[3, 0, 0, 0]);
        assert_eq!(&args[12..16], &[0x12, 0, 0, 0]);
        assert_eq!(&args[16..20], &[6, 0, 0, 0]);
        assert_eq!(&args[28..30], b"ap");
        assert_eq!(&args[30..], b"secret");
    }

    #[test]
    fn sockaddr_layout() {
        let raw = sockaddr(&SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 10), 8080));
        assert_eq!(raw, [2, 0, 0x1F, 0x90, 192, 168, 1, 10]);
    }

    #[test]
    fn connect_layout() {
        let args = address_command(3, &SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 80)).unwrap();
        assert_eq!(args.len(), 20);
        assert_eq!(&args[0..4], &[3, 0, 0, 0]);
        assert_eq!(&args[8..12], &[8, 0, 0, 0]);
        assert_eq!(&args[12..], &[2, 0, 0, 80, 10, 0, 0, 1]);
    }
}
