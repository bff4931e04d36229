use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::digital::v2::{InputPin, OutputPin};

use crate::adapter::Error;
use crate::chip_select::ChipSelect;
use crate::irq::{InterruptControl, Irq};
use crate::observer::Observer;
use crate::opcode::{Command, DataOpcode};
use crate::packet::{self, PacketType, BUFFER_SIZE, SPI_HEADER_LEN};
use crate::protocol;
use crate::transport::Transport;

/// SPI protocol state of the driver.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    /// Before the start sequence.
    Init,
    /// Simple link start was clocked out, waiting for its reply.
    StartSequence,
    /// CS asserted, waiting for the chip to signal it is ready for a command.
    CommandRequest,
    /// Command transaction in flight.
    SendingCommand,
    /// Command sent, waiting for its reply.
    AwaitingReply,
    Idle,
    ReadingHeader,
    ReadingPayload,
    /// A complete packet sits in the receive buffer.
    EventReady,
    /// CS asserted, waiting for the chip to accept a data frame.
    DataRequest,
    SendingData,
    /// A receive was acknowledged, the data frame follows.
    ReceivingData,
}

/// Counters for diagnostics. They never influence the protocol.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Statistics {
    pub interrupts: u32,
    pub unhandled_interrupts: u32,
    pub spi_done: u32,
    pub commands: u32,
    pub events: u32,
    pub unsolicited: u32,
    pub data_frames: u32,
    pub socket_writes: u32,
    pub socket_reads: u32,
    pub tx: u32,
    pub rx: u32,
}

#[derive(Debug, Copy, Clone)]
struct Window {
    rx: bool,
    start: usize,
    end: usize,
}

/// Something that accepts commands for the chip.
pub(crate) trait Issue {
    fn issue(&mut self, command: Command, args: &[u8]) -> Result<(), Error>;
}

/// The SPI protocol engine.
///
/// Owns the bus, the control lines and the transmit/receive buffers. Only one
/// transaction is ever in flight and only one command ever awaits its reply;
/// both are enforced by `state` and `pending_command`.
pub struct Arbiter<Spi, ChipSelectPin, IrqPin, EnablePin, Delay, Obs>
    where
        Spi: Transport,
        ChipSelectPin: OutputPin,
        IrqPin: InputPin + InterruptControl,
        EnablePin: OutputPin,
        Delay: DelayUs<u32>,
        Obs: Observer,
{
    spi: Spi,
    cs: ChipSelect<ChipSelectPin>,
    irq: Irq<IrqPin>,
    enable: EnablePin,
    delay: Delay,
    observer: Obs,

    state: State,
    pending_command: Option<Command>,
    pending_elapsed: u32,
    abandoned: Option<Command>,

    interrupt_pending: bool,
    unhandled_state: Option<State>,

    tx_buffer: [u8; BUFFER_SIZE],
    rx_buffer: [u8; BUFFER_SIZE],
    tx_length: usize,
    rx_length: usize,
    window: Window,

    statistics: Statistics,
}

impl<Spi, ChipSelectPin, IrqPin, EnablePin, Delay, Obs> Arbiter<Spi, ChipSelectPin, IrqPin, EnablePin, Delay, Obs>
    where
        Spi: Transport,
        ChipSelectPin: OutputPin,
        IrqPin: InputPin + InterruptControl,
        EnablePin: OutputPin,
        Delay: DelayUs<u32>,
        Obs: Observer,
{
    pub fn new(spi: Spi,
               cs: ChipSelectPin,
               irq: IrqPin,
               enable: EnablePin,
               delay: Delay,
               observer: Obs,
    ) -> Self {
        Self {
            spi,
            cs: ChipSelect::new(cs),
            irq: Irq::new(irq),
            enable,
            delay,
            observer,
            state: State::Init,
            pending_command: None,
            pending_elapsed: 0,
            abandoned: None,
            interrupt_pending: false,
            unhandled_state: None,
            tx_buffer: [0; BUFFER_SIZE],
            rx_buffer: [0; BUFFER_SIZE],
            tx_length: 0,
            rx_length: 0,
            window: Window { rx: true, start: 0, end: 0 },
            statistics: Statistics::default(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn pending_command(&self) -> Option<Command> {
        self.pending_command
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn interrupt_pending(&self) -> bool {
        self.interrupt_pending
    }

    /// State the engine was in when the last unhandled interrupt arrived.
    pub fn unhandled_state(&self) -> Option<State> {
        self.unhandled_state
    }

    pub fn observer(&self) -> &Obs {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut Obs {
        &mut self.observer
    }

    /// Ready to take a new command or data frame.
    pub fn is_idle(&self) -> bool {
        self.state == State::Idle && self.pending_command.is_none()
    }

    pub(crate) fn is_selected(&self) -> bool {
        self.cs.is_selected()
    }

    pub(crate) fn interrupts_enabled(&self) -> bool {
        self.irq.is_enabled()
    }

    pub(crate) fn transmitted(&self) -> &[u8] {
        &self.tx_buffer[..self.tx_length]
    }

    /// Bytes of the transaction currently in flight.
    pub fn transfer_window(&mut self) -> &mut [u8] {
        let Window { rx, start, end } = self.window;
        if rx {
            &mut self.rx_buffer[start..end]
        } else {
            &mut self.tx_buffer[start..end]
        }
    }

    fn transition(&mut self, to: State) {
        let from = self.state;
        if from != to {
            log::debug!("{:?} -> {:?}", from, to);
            self.observer.on_transition(from, to);
        }
        self.state = to;
    }

    /// Where the engine rests when no transaction is in flight.
    fn resting_state(&self) -> State {
        if self.pending_command.is_some() {
            State::AwaitingReply
        } else {
            State::Idle
        }
    }

    // ------------------------------------------------------------------------
    // Start sequence
    // ------------------------------------------------------------------------

    /// Powers the chip up and clocks out simple link start.
    ///
    /// Busy-waits for the chip's first ready signal. Both halves of the first
    /// write are expected to finish before the 50µs guard delays elapse.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.state != State::Init {
            return Err(Error::InvalidState);
        }

        self.irq.disable();
        self.enable.set_low().map_err(|_| Error::Pin)?;
        self.delay.delay_us(1000);
        self.enable.set_high().map_err(|_| Error::Pin)?;

        while !self.irq.is_asserted() {
            continue;
        }

        let args = protocol::simple_link_start()?;
        self.tx_length = packet::command(&mut self.tx_buffer, Command::SimpleLinkStart.opcode(), &args)?;
        self.pending_command = Some(Command::SimpleLinkStart);
        self.pending_elapsed = 0;
        self.observer.on_command(Command::SimpleLinkStart.opcode(), &args);
        self.transition(State::StartSequence);

        let result = {
            let mut selected = self.cs.select(&mut self.delay)?;
            selected.delay.delay_us(50);
            let first = self.spi.transfer(&mut self.tx_buffer[..4]);
            selected.delay.delay_us(50);
            let rest = match first {
                Err(nb::Error::Other(e)) => Err(nb::Error::Other(e)),
                _ => self.spi.transfer(&mut self.tx_buffer[4..self.tx_length]),
            };
            selected.delay.delay_us(50);
            rest
        };

        if let Err(nb::Error::Other(e)) = result {
            log::error!("simple link start failed: {:?}", e);
            self.pending_command = None;
            self.transition(State::Init);
            return Err(Error::Transport);
        }

        self.statistics.commands += 1;
        self.statistics.tx += self.tx_length as u32;
        self.irq.enable();
        log::info!("simple link start sent");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    /// Claims the engine for an outbound transaction. Fails with `Busy` if a
    /// command is pending, the engine is not idle, or the chip already has
    /// something to say.
    fn claim(&mut self) -> Result<(), Error> {
        if self.pending_command.is_some() || self.state != State::Idle {
            return Err(Error::Busy);
        }
        self.irq.disable();
        if self.irq.is_asserted() {
            self.irq.enable();
            return Err(Error::Busy);
        }
        Ok(())
    }

    /// Frames `command` and requests the bus. The command is clocked out once
    /// the chip signals it is ready.
    pub fn issue_command(&mut self, command: Command, args: &[u8]) -> Result<(), Error> {
        self.claim()?;

        match packet::command(&mut self.tx_buffer, command.opcode(), args) {
            Ok(length) => self.tx_length = length,
            Err(e) => {
                self.irq.enable();
                return Err(e);
            }
        }

        self.pending_command = Some(command);
        self.pending_elapsed = 0;
        log::debug!("command {:?}", command);
        self.observer.on_command(command.opcode(), args);
        self.request(State::CommandRequest)
    }

    /// Frames a data frame and requests the bus. Data frames have no reply.
    pub fn issue_data(&mut self, opcode: DataOpcode, args: &[u8], payload: &[u8], footer: &[u8]) -> Result<(), Error> {
        self.claim()?;

        match packet::data(&mut self.tx_buffer, opcode.value(), args, payload, footer) {
            Ok(length) => self.tx_length = length,
            Err(e) => {
                self.irq.enable();
                return Err(e);
            }
        }

        log::debug!("data {:?} {} bytes", opcode, payload.len());
        self.request(State::DataRequest)
    }

    fn request(&mut self, state: State) -> Result<(), Error> {
        self.transition(state);
        if let Err(e) = self.cs.assert() {
            self.recover();
            return Err(e);
        }
        self.irq.enable();
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Interrupt and completion handling
    // ------------------------------------------------------------------------

    /// Falling edge on the chip's IRQ line.
    pub fn on_interrupt(&mut self) -> Result<(), Error> {
        self.statistics.interrupts += 1;

        match self.state {
            State::CommandRequest => {
                self.irq.disable();
                self.transition(State::SendingCommand);
                self.transfer(false, 0, self.tx_length)
            }
            State::DataRequest => {
                self.irq.disable();
                self.transition(State::SendingData);
                self.transfer(false, 0, self.tx_length)
            }
            State::StartSequence | State::AwaitingReply | State::Idle | State::ReceivingData => {
                self.begin_read()
            }
            state => {
                log::warn!("unhandled interrupt in {:?}", state);
                self.statistics.unhandled_interrupts += 1;
                self.unhandled_state = Some(state);
                self.interrupt_pending = true;
                Ok(())
            }
        }
    }

    /// The transaction started by the engine has finished.
    pub fn on_transport_complete(&mut self) -> Result<(), Error> {
        self.statistics.spi_done += 1;

        match self.state {
            State::ReadingHeader => {
                let header = packet::spi_reply_header(&self.rx_buffer[..SPI_HEADER_LEN])
                    .ok()
                    .map(|(_, header)| header)
                    .filter(|header| header.packet_type == PacketType::Reply as u8);

                let length = match header {
                    Some(header) => header.length as usize,
                    None => {
                        log::warn!("invalid transport header {:?}", &self.rx_buffer[..SPI_HEADER_LEN]);
                        self.discard_read();
                        return Err(Error::Invalid);
                    }
                };

                if SPI_HEADER_LEN + length > BUFFER_SIZE {
                    log::warn!("packet of {} bytes does not fit", length);
                    self.discard_read();
                    return Err(Error::Invalid);
                }

                if length == 0 {
                    self.finish_read();
                    return Ok(());
                }

                self.rx_length = SPI_HEADER_LEN + length;
                for b in self.rx_buffer[SPI_HEADER_LEN..self.rx_length].iter_mut() {
                    *b = 0;
                }
                self.transition(State::ReadingPayload);
                self.transfer(true, SPI_HEADER_LEN, self.rx_length)
            }
            State::ReadingPayload => {
                self.finish_read();
                Ok(())
            }
            State::SendingCommand => {
                let released = self.cs.deassert();
                self.statistics.commands += 1;
                self.statistics.tx += self.tx_length as u32;
                self.transition(State::AwaitingReply);
                self.irq.enable();
                released
            }
            State::SendingData => {
                let released = self.cs.deassert();
                self.statistics.socket_writes += 1;
                self.statistics.tx += self.tx_length as u32;
                self.transition(State::Idle);
                self.irq.enable();
                released
            }
            // deferred completion of the start sequence, CS is already released
            State::StartSequence => Ok(()),
            state => {
                log::warn!("transport completion in {:?}", state);
                Err(Error::InvalidState)
            }
        }
    }

    fn begin_read(&mut self) -> Result<(), Error> {
        self.irq.disable();
        if let Err(e) = self.cs.assert() {
            self.irq.enable();
            return Err(e);
        }
        packet::read_header(&mut self.rx_buffer);
        self.rx_length = SPI_HEADER_LEN;
        self.transition(State::ReadingHeader);
        self.transfer(true, 0, SPI_HEADER_LEN)
    }

    fn transfer(&mut self, rx: bool, start: usize, end: usize) -> Result<(), Error> {
        self.window = Window { rx, start, end };
        let buffer = if rx {
            &mut self.rx_buffer[start..end]
        } else {
            &mut self.tx_buffer[start..end]
        };

        match self.spi.transfer(buffer) {
            Ok(()) => self.on_transport_complete(),
            Err(nb::Error::WouldBlock) => Ok(()),
            Err(nb::Error::Other(e)) => {
                log::error!("transfer failed in {:?}: {:?}", self.state, e);
                self.recover();
                Err(Error::Transport)
            }
        }
    }

    fn finish_read(&mut self) {
        self.cs.deassert().ok();
        self.statistics.rx += self.rx_length as u32;
        self.transition(State::EventReady);
        self.irq.enable();
    }

    fn discard_read(&mut self) {
        self.cs.deassert().ok();
        self.rx_length = 0;
        let resting = self.resting_state();
        self.transition(resting);
        self.irq.enable();
    }

    /// Drops whatever was in flight and returns to `Idle`.
    fn recover(&mut self) {
        self.cs.deassert().ok();
        if let Some(command) = self.pending_command.take() {
            self.abandoned = Some(command);
        }
        self.transition(State::Idle);
        self.irq.enable();
    }

    /// Command dropped by a transport failure or the watchdog, if any.
    pub(crate) fn take_abandoned(&mut self) -> Option<Command> {
        self.abandoned.take()
    }

    // ------------------------------------------------------------------------
    // Polling support
    // ------------------------------------------------------------------------

    /// Re-issues a header read for an interrupt that arrived while the engine
    /// could not service it.
    pub(crate) fn drain_interrupt(&mut self) -> Result<(), Error> {
        if !self.interrupt_pending {
            return Ok(());
        }
        match self.state {
            State::Idle | State::AwaitingReply | State::ReceivingData => {
                self.interrupt_pending = false;
                log::debug!("servicing latched interrupt");
                self.begin_read()
            }
            _ => Ok(()),
        }
    }

    /// Advances the age of the pending command; returns `true` and abandons it
    /// once it reaches `timeout`.
    pub(crate) fn watchdog(&mut self, elapsed: u32, timeout: Option<u32>) -> bool {
        if self.pending_command.is_none() {
            return false;
        }
        self.pending_elapsed = self.pending_elapsed.saturating_add(elapsed);

        let timeout = match timeout {
            Some(timeout) => timeout,
            None => return false,
        };

        let stuck = matches!(
            self.state,
            State::CommandRequest | State::SendingCommand | State::AwaitingReply
        );
        if stuck && self.pending_elapsed >= timeout {
            log::error!("no reply to {:?} after {}ms", self.pending_command, self.pending_elapsed);
            self.recover();
            return true;
        }
        false
    }

    // ------------------------------------------------------------------------
    // Dispatch support
    // ------------------------------------------------------------------------

    /// Payload of the packet waiting for dispatch.
    pub(crate) fn received(&self) -> Option<&[u8]> {
        if self.state == State::EventReady {
            Some(&self.rx_buffer[SPI_HEADER_LEN..self.rx_length])
        } else {
            None
        }
    }

    pub(crate) fn statistics_mut(&mut self) -> &mut Statistics {
        &mut self.statistics
    }

    /// Clears the pending command if `opcode` answers it.
    pub(crate) fn complete_reply(&mut self, opcode: u16) -> bool {
        match self.pending_command {
            Some(command) if command.opcode() == opcode => {
                self.pending_command = None;
                self.pending_elapsed = 0;
                true
            }
            _ => false,
        }
    }

    /// Leaves `EventReady` once the packet has been handled.
    pub(crate) fn settle(&mut self) {
        let resting = self.resting_state();
        self.transition(resting);
    }

    /// A receive was acknowledged with data to follow.
    pub(crate) fn expect_data(&mut self) {
        if self.state == State::Idle {
            self.transition(State::ReceivingData);
        }
    }

    pub(crate) fn notify_event(&mut self, opcode: u16, start: usize, end: usize) {
        let base = SPI_HEADER_LEN;
        self.observer.on_event(opcode, &self.rx_buffer[base + start..base + end]);
    }

    pub(crate) fn notify_data(&mut self, descriptor: i32, start: usize, end: usize) {
        let base = SPI_HEADER_LEN;
        self.observer.on_data(descriptor, &self.rx_buffer[base + start..base + end]);
    }
}

impl<Spi, ChipSelectPin, IrqPin, EnablePin, Delay, Obs> Issue for Arbiter<Spi, ChipSelectPin, IrqPin, EnablePin, Delay, Obs>
    where
        Spi: Transport,
        ChipSelectPin: OutputPin,
        IrqPin: InputPin + InterruptControl,
        EnablePin: OutputPin,
        Delay: DelayUs<u32>,
        Obs: Observer,
{
    fn issue(&mut self, command: Command, args: &[u8]) -> Result<(), Error> {
        self.issue_command(command, args)
    }
}
