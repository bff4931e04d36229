//! Opcodes exchanged with the chip.

/// Opcodes at or above this value are unsolicited notifications.
pub const UNSOLICITED_THRESHOLD: u16 = 0x4100;

/// Commands the host may issue. Each is answered by exactly one reply
/// carrying the same opcode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Command {
    WlanConnect = 0x0001,
    WlanDisconnect = 0x0002,
    SetConnectionPolicy = 0x0004,
    SetEventMask = 0x0008,
    StatusGet = 0x0009,
    Socket = 0x1001,
    Bind = 0x1002,
    Recv = 0x1004,
    Accept = 0x1005,
    Listen = 0x1006,
    Connect = 0x1007,
    Select = 0x1008,
    SetSockOpt = 0x1009,
    GetSockOpt = 0x100A,
    Close = 0x100B,
    RecvFrom = 0x100D,
    Dhcp = 0x2001,
    GetIpConfig = 0x2005,
    SimpleLinkStart = 0x4000,
    ReadBufferSize = 0x400B,
}

impl Command {
    pub fn opcode(self) -> u16 {
        self as u16
    }

    fn from_opcode(opcode: u16) -> Option<Self> {
        let command = match opcode {
            0x0001 => Command::WlanConnect,
            0x0002 => Command::WlanDisconnect,
            0x0004 => Command::SetConnectionPolicy,
            0x0008 => Command::SetEventMask,
            0x0009 => Command::StatusGet,
            0x1001 => Command::Socket,
            0x1002 => Command::Bind,
            0x1004 => Command::Recv,
            0x1005 => Command::Accept,
            0x1006 => Command::Listen,
            0x1007 => Command::Connect,
            0x1008 => Command::Select,
            0x1009 => Command::SetSockOpt,
            0x100A => Command::GetSockOpt,
            0x100B => Command::Close,
            0x100D => Command::RecvFrom,
            0x2001 => Command::Dhcp,
            0x2005 => Command::GetIpConfig,
            0x4000 => Command::SimpleLinkStart,
            0x400B => Command::ReadBufferSize,
            _ => return None,
        };
        Some(command)
    }
}

/// Notifications the chip raises on its own.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Unsolicited {
    FreeBuffer = 0x4100,
    WlanConnect = 0x8001,
    WlanDisconnect = 0x8002,
    Dhcp = 0x8010,
    Keepalive = 0x8200,
    TcpCloseWait = 0x8800,
}

impl Unsolicited {
    fn from_opcode(opcode: u16) -> Option<Self> {
        let event = match opcode {
            0x4100 => Unsolicited::FreeBuffer,
            0x8001 => Unsolicited::WlanConnect,
            0x8002 => Unsolicited::WlanDisconnect,
            0x8010 => Unsolicited::Dhcp,
            0x8200 => Unsolicited::Keepalive,
            0x8800 => Unsolicited::TcpCloseWait,
            _ => return None,
        };
        Some(event)
    }
}

/// Decoded opcode of an event packet.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Opcode {
    Reply(Command),
    Unsolicited(Unsolicited),
    Unrecognized(u16),
}

impl From<u16> for Opcode {
    fn from(opcode: u16) -> Self {
        if let Some(command) = Command::from_opcode(opcode) {
            Opcode::Reply(command)
        } else if let Some(event) = Unsolicited::from_opcode(opcode) {
            Opcode::Unsolicited(event)
        } else {
            Opcode::Unrecognized(opcode)
        }
    }
}

impl Opcode {
    pub fn value(self) -> u16 {
        match self {
            Opcode::Reply(command) => command as u16,
            Opcode::Unsolicited(event) => event as u16,
            Opcode::Unrecognized(opcode) => opcode,
        }
    }

    /// Classification goes by numeric range, so unrecognized opcodes still
    /// land on the right side.
    pub fn is_unsolicited(self) -> bool {
        self.value() >= UNSOLICITED_THRESHOLD
    }
}

/// Opcodes of data frames.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataOpcode {
    Send,
    Recv,
    SendTo,
    RecvFrom,
    Unrecognized(u8),
}

impl From<u8> for DataOpcode {
    fn from(opcode: u8) -> Self {
        match opcode {
            0x81 => DataOpcode::Send,
            0x82 => DataOpcode::Recv,
            0x83 => DataOpcode::SendTo,
            0x84 => DataOpcode::RecvFrom,
            other => DataOpcode::Unrecognized(other),
        }
    }
}

impl DataOpcode {
    pub fn value(self) -> u8 {
        match self {
            DataOpcode::Send => 0x81,
            DataOpcode::Recv => 0x82,
            DataOpcode::SendTo => 0x83,
            DataOpcode::RecvFrom => 0x84,
            DataOpcode::Unrecognized(opcode) => opcode,
        }
    }
}
