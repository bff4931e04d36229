use core::net::SocketAddrV4;

use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::digital::v2::{InputPin, OutputPin};
use embedded_time::duration::Milliseconds;

use crate::arbiter::{Arbiter, State, Statistics};
use crate::irq::InterruptControl;
use crate::observer::Observer;
use crate::opcode::{Command, DataOpcode};
use crate::protocol::{self, IpConfig, JoinInfo, WlanStatus};
use crate::socket::{Socket, SocketHandle};
use crate::socket_manager::SocketManager;
use crate::transport::Transport;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The engine cannot take this right now; retry later.
    Busy,
    /// A precondition of the call was violated, or the chip sent garbage.
    Invalid,
    /// Not possible in the current state.
    InvalidState,
    /// The SPI bus reported a failure.
    Transport,
    /// A control line could not be driven.
    Pin,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JoinError {
    InvalidSsid,
    InvalidPassword,
}

/// Driver tuning.
#[derive(Clone)]
pub struct Config {
    /// How often a status-get is issued while idle.
    pub status_interval: Milliseconds,
    /// Delay before a failed socket starts over.
    pub retry_timeout: Milliseconds,
    /// Length requested by each managed receive.
    pub recv_chunk: u16,
    /// Abandon a command whose reply has not arrived after this long.
    pub command_timeout: Option<Milliseconds>,
    /// Network to join whenever the chip reports it is disconnected.
    pub join: Option<JoinInfo>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            status_interval: Milliseconds(2_000u32),
            retry_timeout: Milliseconds(1_000u32),
            recv_chunk: 1000,
            command_timeout: None,
            join: None,
        }
    }
}

/// Driver context: the protocol engine, the socket table and what the chip
/// has told us about the network.
///
/// `on_interrupt`, `on_transport_complete` and `poll` are the only entry
/// points that move the protocol along. The host must not let them re-enter
/// each other.
pub struct Adapter<Spi, ChipSelectPin, IrqPin, EnablePin, Delay, Obs = ()>
    where
        Spi: Transport,
        ChipSelectPin: OutputPin,
        IrqPin: InputPin + InterruptControl,
        EnablePin: OutputPin,
        Delay: DelayUs<u32>,
        Obs: Observer,
{
    pub(crate) arbiter: Arbiter<Spi, ChipSelectPin, IrqPin, EnablePin, Delay, Obs>,
    pub(crate) sockets: SocketManager,
    pub(crate) config: Config,
    pub(crate) wlan_status: WlanStatus,
    pub(crate) dhcp_complete: bool,
    pub(crate) ip_config: IpConfig,
    pub(crate) buffers: u8,
    pub(crate) buffer_size: u16,
    /// Read-buffer-size still has to be issued after start.
    pub(crate) buffer_size_due: bool,
    since_status: u32,
}

impl<Spi, ChipSelectPin, IrqPin, EnablePin, Delay> Adapter<Spi, ChipSelectPin, IrqPin, EnablePin, Delay, ()>
    where
        Spi: Transport,
        ChipSelectPin: OutputPin,
        IrqPin: InputPin + InterruptControl,
        EnablePin: OutputPin,
        Delay: DelayUs<u32>,
{
    pub fn new(
        spi: Spi,
        cs: ChipSelectPin,
        irq: IrqPin,
        enable: EnablePin,
        delay: Delay,
        config: Config,
    ) -> Self {
        Self::with_observer(spi, cs, irq, enable, delay, config, ())
    }
}

impl<Spi, ChipSelectPin, IrqPin, EnablePin, Delay, Obs> Adapter<Spi, ChipSelectPin, IrqPin, EnablePin, Delay, Obs>
    where
        Spi: Transport,
        ChipSelectPin: OutputPin,
        IrqPin: InputPin + InterruptControl,
        EnablePin: OutputPin,
        Delay: DelayUs<u32>,
        Obs: Observer,
{
    pub fn with_observer(
        spi: Spi,
        cs: ChipSelectPin,
        irq: IrqPin,
        enable: EnablePin,
        delay: Delay,
        config: Config,
        observer: Obs,
    ) -> Self {
        let arbiter = Arbiter::new(
            spi,
            cs,
            irq,
            enable,
            delay,
            observer,
        );

        Self {
            arbiter,
            sockets: SocketManager::new(config.retry_timeout.0, config.recv_chunk),
            config,
            wlan_status: WlanStatus::Disconnected,
            dhcp_complete: false,
            ip_config: IpConfig::default(),
            buffers: 0,
            buffer_size: 0,
            buffer_size_due: false,
            since_status: 0,
        }
    }

    // ------------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------------

    /// Powers up the chip and sends the start sequence. Blocks until the chip
    /// first signals it is ready.
    pub fn start(&mut self) -> Result<(), Error> {
        self.arbiter.start()
    }

    /// Call on every falling edge of the IRQ line while interrupts are enabled.
    pub fn on_interrupt(&mut self) -> Result<(), Error> {
        let result = self.arbiter.on_interrupt();
        self.reconcile();
        result
    }

    /// Call when a transfer that returned `WouldBlock` has finished. May be
    /// invoked from a DMA completion handler.
    pub fn on_transport_complete(&mut self) -> Result<(), Error> {
        let result = self.arbiter.on_transport_complete();
        self.reconcile();
        result
    }

    /// Bytes of the transfer in flight, for transports that complete later.
    pub fn transfer_window(&mut self) -> &mut [u8] {
        self.arbiter.transfer_window()
    }

    /// Cooperative housekeeping. `elapsed` is the time since the previous call.
    pub fn poll(&mut self, elapsed: Milliseconds) -> Result<(), Error> {
        let elapsed = elapsed.0;

        if self.arbiter.state() == State::EventReady {
            if let Err(e) = self.dispatch() {
                log::warn!("dispatch failed: {:?}", e);
            }
        }

        let drained = self.arbiter.drain_interrupt();
        self.reconcile();
        drained?;

        let timeout = self.config.command_timeout.map(|timeout| timeout.0);
        if self.arbiter.watchdog(elapsed, timeout) {
            self.reconcile();
        }

        self.read_buffer_size();

        self.since_status = self.since_status.saturating_add(elapsed);
        if self.arbiter.is_idle() && self.since_status >= self.config.status_interval.0 {
            if self.arbiter.issue_command(Command::StatusGet, &[]).is_ok() {
                self.since_status = 0;
            }
        }

        if self.wlan_status == WlanStatus::Connected && self.dhcp_complete {
            self.sockets.poll(&mut self.arbiter, elapsed);
        }

        Ok(())
    }

    /// Issues the read-buffer-size owed since start, once the engine is free.
    pub(crate) fn read_buffer_size(&mut self) {
        if !self.buffer_size_due || !self.arbiter.is_idle() {
            return;
        }
        match self.arbiter.issue_command(Command::ReadBufferSize, &[]) {
            Ok(()) => self.buffer_size_due = false,
            Err(e) => log::debug!("read buffer size deferred: {:?}", e),
        }
    }

    /// Fails whatever socket was waiting on a command the engine dropped.
    fn reconcile(&mut self) {
        if let Some(command) = self.arbiter.take_abandoned() {
            log::warn!("abandoned {:?}", command);
            self.sockets.abandon(command);
        }
    }

    // ------------------------------------------------------------------------
    // Sockets
    // ------------------------------------------------------------------------

    /// Registers a socket with the manager, which drives it from then on.
    pub fn add_socket(&mut self, socket: Socket) -> Result<SocketHandle, Error> {
        self.sockets.add(socket)
    }

    pub fn socket(&self, handle: SocketHandle) -> Option<&Socket> {
        self.sockets.get(handle)
    }

    pub fn sockets(&self) -> &SocketManager {
        &self.sockets
    }

    /// Closes a managed socket and keeps it closed until `reopen`.
    pub fn shutdown(&mut self, handle: SocketHandle) -> Result<(), Error> {
        self.sockets.shutdown(handle)
    }

    pub fn reopen(&mut self, handle: SocketHandle) -> Result<(), Error> {
        self.sockets.reopen(handle)
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    pub fn join(&mut self, info: &JoinInfo) -> Result<(), Error> {
        let args = protocol::wlan_connect(info)?;
        self.arbiter.issue_command(Command::WlanConnect, &args)
    }

    pub fn create_socket(&mut self, family: u32, socket_type: u32, protocol: u32) -> Result<(), Error> {
        let args = protocol::socket(family, socket_type, protocol)?;
        self.arbiter.issue_command(Command::Socket, &args)
    }

    pub fn connect(&mut self, descriptor: i32, remote: SocketAddrV4) -> Result<(), Error> {
        let args = protocol::address_command(descriptor, &remote)?;
        self.arbiter.issue_command(Command::Connect, &args)
    }

    pub fn close(&mut self, descriptor: i32) -> Result<(), Error> {
        let args = protocol::descriptor_only(descriptor)?;
        self.arbiter.issue_command(Command::Close, &args)
    }

    pub fn recv(&mut self, descriptor: i32, length: u16) -> Result<(), Error> {
        let args = protocol::recv(descriptor, length)?;
        self.arbiter.issue_command(Command::Recv, &args)
    }

    /// Sends on a connected stream socket.
    pub fn send(&mut self, descriptor: i32, payload: &[u8]) -> Result<(), Error> {
        self.claim_buffer()?;
        let args = protocol::send_args(descriptor, payload.len())?;
        self.arbiter.issue_data(DataOpcode::Send, &args, payload, &[])?;
        self.buffers -= 1;
        Ok(())
    }

    pub fn send_to(&mut self, descriptor: i32, payload: &[u8], remote: SocketAddrV4) -> Result<(), Error> {
        self.claim_buffer()?;
        let args = protocol::send_to_args(descriptor, payload.len())?;
        let footer = protocol::sockaddr(&remote);
        self.arbiter.issue_data(DataOpcode::SendTo, &args, payload, &footer)?;
        self.buffers -= 1;
        Ok(())
    }

    fn claim_buffer(&self) -> Result<(), Error> {
        if self.buffers == 0 {
            return Err(Error::Busy);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    pub fn state(&self) -> State {
        self.arbiter.state()
    }

    pub fn pending_command(&self) -> Option<Command> {
        self.arbiter.pending_command()
    }

    pub fn wlan_status(&self) -> WlanStatus {
        self.wlan_status
    }

    pub fn dhcp_complete(&self) -> bool {
        self.dhcp_complete
    }

    pub fn ip_config(&self) -> &IpConfig {
        &self.ip_config
    }

    /// Free transmit buffers on the chip.
    pub fn buffers(&self) -> u8 {
        self.buffers
    }

    pub fn buffer_size(&self) -> u16 {
        self.buffer_size
    }

    pub fn statistics(&self) -> &Statistics {
        self.arbiter.statistics()
    }

    pub fn observer(&self) -> &Obs {
        self.arbiter.observer()
    }

    pub fn observer_mut(&mut self) -> &mut Obs {
        self.arbiter.observer_mut()
    }
}
