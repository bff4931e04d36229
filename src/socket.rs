use core::net::SocketAddrV4;

use crate::protocol::{AF_INET, IPPROTO_TCP, IPPROTO_UDP, SOCK_DGRAM, SOCK_STREAM};

/// Lifecycle of a managed socket.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    Init,
    /// Waiting for the chip to hand out a descriptor.
    Creating,
    /// Descriptor is valid.
    Created,
    Binding,
    Bound,
    Listening,
    Accepting,
    Connecting,
    Ready,
    /// The peer closed its side; a close is due.
    CloseWait,
    Closing,
    /// Waiting out `retry_timeout` before starting over.
    Failed,
}

/// What a socket does once it has a descriptor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    /// Stream socket connecting to `address`.
    Client,
    /// Stream socket bound to `address`, accepting one peer.
    Listener,
    Datagram,
}

/// Index of a socket in the table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SocketHandle(pub(crate) usize);

#[derive(Debug, Clone)]
pub struct Socket {
    pub(crate) state: State,
    pub(crate) descriptor: Option<i32>,
    pub(crate) listen_descriptor: Option<i32>,
    pub(crate) family: u32,
    pub(crate) socket_type: u32,
    pub(crate) protocol: u32,
    pub(crate) role: Role,
    pub(crate) address: SocketAddrV4,
    pub(crate) retry_timeout: u32,
    pub(crate) readable: bool,
    pub(crate) parked: bool,
    pub(crate) rx_count: u32,
    pub(crate) rx_bytes: u32,
}

impl Socket {
    pub fn new(family: u32, socket_type: u32, protocol: u32, role: Role, address: SocketAddrV4) -> Self {
        Self {
            state: State::Init,
            descriptor: None,
            listen_descriptor: None,
            family,
            socket_type,
            protocol,
            role,
            address,
            retry_timeout: 0,
            readable: false,
            parked: false,
            rx_count: 0,
            rx_bytes: 0,
        }
    }

    /// TCP client connecting to `remote`.
    pub fn stream(remote: SocketAddrV4) -> Self {
        Self::new(AF_INET, SOCK_STREAM, IPPROTO_TCP, Role::Client, remote)
    }

    /// TCP server listening on `local`.
    pub fn listener(local: SocketAddrV4) -> Self {
        Self::new(AF_INET, SOCK_STREAM, IPPROTO_TCP, Role::Listener, local)
    }

    /// UDP socket; `address` is the default destination.
    pub fn datagram(address: SocketAddrV4) -> Self {
        Self::new(AF_INET, SOCK_DGRAM, IPPROTO_UDP, Role::Datagram, address)
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The chip-assigned descriptor, once creation has completed.
    pub fn descriptor(&self) -> Option<i32> {
        match self.state {
            State::Init | State::Creating => None,
            _ => self.descriptor,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn address(&self) -> SocketAddrV4 {
        self.address
    }

    pub fn retry_timeout(&self) -> u32 {
        self.retry_timeout
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready)
    }

    pub fn is_parked(&self) -> bool {
        self.parked
    }

    pub fn rx_count(&self) -> u32 {
        self.rx_count
    }

    pub fn rx_bytes(&self) -> u32 {
        self.rx_bytes
    }

    pub(crate) fn is_stream(&self) -> bool {
        self.socket_type == SOCK_STREAM
    }

    pub(crate) fn fail(&mut self, retry_timeout: u32) {
        self.retry_timeout = retry_timeout;
        self.readable = false;
        self.state = State::Failed;
    }

    /// Back to the initial state, forgetting the chip-side descriptors.
    pub(crate) fn reset(&mut self) {
        self.state = State::Init;
        self.descriptor = None;
        self.listen_descriptor = None;
        self.readable = false;
        self.retry_timeout = 0;
    }
}
