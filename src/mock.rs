//! Scripted CC3000 for tests.
//!
//! All mock pins and the transport share one `Wire`. Packets queued with
//! [`send`] are clocked out to the driver on its next header read; every
//! write is recorded.

extern crate std;

use core::cell::RefCell;
use core::convert::Infallible;
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec;
use std::vec::Vec;

use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::digital::v2::{InputPin, OutputPin};
use embedded_time::duration::Milliseconds;

use crate::adapter::{Adapter, Config};
use crate::arbiter::State;
use crate::irq::InterruptControl;
use crate::observer::Observer;
use crate::transport::Transport;

#[derive(Default)]
pub struct Wire {
    pub cs_low: bool,
    pub irq_low: bool,
    pub irq_armed: bool,
    pub chip_enabled: bool,
    pub written: Vec<Vec<u8>>,
    pub queued: VecDeque<Vec<u8>>,
    incoming: Vec<u8>,
    /// Transfers report `WouldBlock` instead of completing.
    pub deferred: bool,
    pub fail: bool,
}

pub type Shared = Rc<RefCell<Wire>>;

pub struct Spi(pub Shared);

impl Transport for Spi {
    type Error = ();

    fn transfer(&mut self, buffer: &mut [u8]) -> nb::Result<(), ()> {
        let mut wire = self.0.borrow_mut();
        if wire.fail {
            return Err(nb::Error::Other(()));
        }

        if wire.incoming.is_empty() && buffer.len() == 5 && buffer[0] == 0x03 {
            let packet = wire.queued.pop_front().unwrap_or_else(|| vec![0x02, 0, 0, 0, 0]);
            buffer.copy_from_slice(&packet[..5]);
            wire.incoming = packet[5..].to_vec();
            if wire.incoming.is_empty() {
                wire.irq_low = !wire.queued.is_empty();
            }
        } else if !wire.incoming.is_empty() {
            let n = buffer.len().min(wire.incoming.len());
            buffer[..n].copy_from_slice(&wire.incoming[..n]);
            wire.incoming.drain(..n);
            wire.irq_low = !wire.queued.is_empty();
        } else {
            wire.written.push(buffer.to_vec());
            wire.irq_low = false;
        }

        if wire.deferred {
            Err(nb::Error::WouldBlock)
        } else {
            Ok(())
        }
    }
}

pub struct Cs(pub Shared);

impl OutputPin for Cs {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().cs_low = true;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().cs_low = false;
        Ok(())
    }
}

/// Chip enable. Powering up makes the chip signal ready.
pub struct Enable(pub Shared);

impl OutputPin for Enable {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Infallible> {
        let mut wire = self.0.borrow_mut();
        wire.chip_enabled = false;
        wire.irq_low = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        let mut wire = self.0.borrow_mut();
        wire.chip_enabled = true;
        wire.irq_low = true;
        Ok(())
    }
}

pub struct IrqLine(pub Shared);

impl InputPin for IrqLine {
    type Error = Infallible;

    fn is_high(&self) -> Result<bool, Infallible> {
        Ok(!self.0.borrow().irq_low)
    }

    fn is_low(&self) -> Result<bool, Infallible> {
        Ok(self.0.borrow().irq_low)
    }
}

impl InterruptControl for IrqLine {
    fn enable_interrupt(&mut self) {
        self.0.borrow_mut().irq_armed = true;
    }

    fn disable_interrupt(&mut self) {
        self.0.borrow_mut().irq_armed = false;
    }
}

pub struct Delay;

impl DelayUs<u32> for Delay {
    fn delay_us(&mut self, _us: u32) {}
}

#[derive(Default)]
pub struct Recorder {
    pub transitions: Vec<(State, State)>,
    pub commands: Vec<u16>,
    pub events: Vec<u16>,
    pub data: Vec<(i32, Vec<u8>)>,
}

impl Observer for Recorder {
    fn on_transition(&mut self, from: State, to: State) {
        self.transitions.push((from, to));
    }

    fn on_command(&mut self, opcode: u16, _args: &[u8]) {
        self.commands.push(opcode);
    }

    fn on_event(&mut self, opcode: u16, _args: &[u8]) {
        self.events.push(opcode);
    }

    fn on_data(&mut self, descriptor: i32, payload: &[u8]) {
        self.data.push((descriptor, payload.to_vec()));
    }
}

pub type TestAdapter = Adapter<Spi, Cs, IrqLine, Enable, Delay, Recorder>;

pub fn adapter(config: Config) -> (TestAdapter, Shared) {
    let wire = Shared::default();
    let adapter = Adapter::with_observer(
        Spi(wire.clone()),
        Cs(wire.clone()),
        IrqLine(wire.clone()),
        Enable(wire.clone()),
        Delay,
        config,
        Recorder::default(),
    );
    (adapter, wire)
}

/// Event packet as the chip clocks it out, reply header included.
pub fn event(opcode: u16, args: &[u8]) -> Vec<u8> {
    let mut payload = vec![0x04];
    payload.extend_from_slice(&opcode.to_le_bytes());
    payload.push(args.len() as u8);
    payload.extend_from_slice(args);
    framed(payload)
}

/// Reply carrying a status byte followed by `result`.
pub fn result(opcode: u16, result: i32) -> Vec<u8> {
    let mut args = vec![0];
    args.extend_from_slice(&result.to_le_bytes());
    event(opcode, &args)
}

pub fn data(opcode: u8, descriptor: i32, bytes: &[u8]) -> Vec<u8> {
    let mut args = Vec::new();
    args.extend_from_slice(&descriptor.to_le_bytes());
    args.extend_from_slice(&0x0Cu32.to_le_bytes());
    args.extend_from_slice(&(bytes.len() as u32).to_le_bytes());

    let mut payload = vec![0x02, opcode, args.len() as u8];
    payload.extend_from_slice(&((args.len() + bytes.len()) as u16).to_le_bytes());
    payload.extend_from_slice(&args);
    payload.extend_from_slice(bytes);
    framed(payload)
}

fn framed(payload: Vec<u8>) -> Vec<u8> {
    let length = payload.len() as u16;
    let mut packet = vec![0x02, 0, 0];
    packet.extend_from_slice(&length.to_be_bytes());
    packet.extend_from_slice(&payload);
    packet
}

/// The chip pulls IRQ low to say it is ready for the requested command.
pub fn ready(adapter: &mut TestAdapter, wire: &Shared) {
    wire.borrow_mut().irq_low = true;
    adapter.on_interrupt().unwrap();
}

/// The chip has a packet for the driver and raises its interrupt.
pub fn send(adapter: &mut TestAdapter, wire: &Shared, packet: Vec<u8>) {
    {
        let mut wire = wire.borrow_mut();
        wire.queued.push_back(packet);
        wire.irq_low = true;
    }
    adapter.on_interrupt().unwrap();
}

pub fn poll(adapter: &mut TestAdapter) {
    adapter.poll(Milliseconds(0u32)).unwrap();
}

/// Last command opcode the driver clocked out.
pub fn last_opcode(wire: &Shared) -> u16 {
    let wire = wire.borrow();
    let frame = wire.written.last().expect("nothing written");
    u16::from_le_bytes([frame[6], frame[7]])
}

/// Started, buffers read, associated and with an address.
pub fn online(config: Config) -> (TestAdapter, Shared) {
    let (mut adapter, wire) = adapter(config);
    adapter.start().unwrap();

    send(&mut adapter, &wire, event(0x4000, &[0]));
    poll(&mut adapter);
    ready(&mut adapter, &wire);
    send(&mut adapter, &wire, event(0x400B, &[0, 6, 0xDC, 0x05]));
    poll(&mut adapter);

    send(&mut adapter, &wire, event(0x8001, &[0]));
    poll(&mut adapter);
    let mut dhcp = vec![0];
    for address in [[10u8, 1, 168, 192], [0, 255, 255, 255], [1, 1, 168, 192], [1, 1, 168, 192], [1, 1, 168, 192]].iter() {
        dhcp.extend_from_slice(address);
    }
    send(&mut adapter, &wire, event(0x8010, &dhcp));
    // the socket manager runs from here on
    adapter.dispatch().unwrap();

    (adapter, wire)
}
