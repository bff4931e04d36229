//! Classification and dispatch of packets received from the chip.

use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::digital::v2::{InputPin, OutputPin};

use crate::adapter::{Adapter, Error};
use crate::irq::InterruptControl;
use crate::observer::Observer;
use crate::opcode::{Command, DataOpcode, Opcode, Unsolicited};
use crate::packet::{self, PayloadType, COMMAND_HEADER_LEN, DATA_HEADER_LEN};
use crate::parser::{self, BufferSize, RecvReply, SelectReply};
use crate::protocol::{IpConfig, WlanStatus};
use crate::transport::Transport;

/// A received packet, with argument and payload positions relative to the
/// start of the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Packet {
    Event {
        opcode: Opcode,
        args: (usize, usize),
    },
    Data {
        opcode: DataOpcode,
        descriptor: i32,
        payload: (usize, usize),
    },
}

/// Decoded arguments of an event.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Message {
    BufferSize(BufferSize),
    Status(WlanStatus),
    Dhcp(IpConfig),
    Result(i32),
    Recv(RecvReply),
    Select(SelectReply),
    CloseWait(i32),
    FreeBuffers(u16),
    None,
}

pub(crate) fn classify(payload: &[u8]) -> Result<Packet, Error> {
    let tag = payload.first().copied().ok_or(Error::Invalid)?;

    match PayloadType::from(tag) {
        PayloadType::Event => {
            let (_, header) = packet::command_header(payload).map_err(|_| Error::Invalid)?;
            let start = COMMAND_HEADER_LEN;
            let end = start + header.argument_length as usize;
            if end > payload.len() {
                return Err(Error::Invalid);
            }
            Ok(Packet::Event {
                opcode: Opcode::from(header.opcode),
                args: (start, end),
            })
        }
        PayloadType::Data => {
            let (_, header) = packet::data_header(&payload[1..]).map_err(|_| Error::Invalid)?;
            let args_start = DATA_HEADER_LEN;
            let args_end = args_start + header.argument_length as usize;
            let (_, args) = parser::data_args(payload.get(args_start..args_end).ok_or(Error::Invalid)?)
                .map_err(|_| Error::Invalid)?;
            let length = (args.payload_length as usize).min(header.payload_length as usize);
            if length > payload.len() - args_end {
                return Err(Error::Invalid);
            }
            Ok(Packet::Data {
                opcode: DataOpcode::from(header.opcode),
                descriptor: args.descriptor,
                payload: (args_end, args_end + length),
            })
        }
        other => {
            log::warn!("unrecognized payload type {:?}", other);
            Err(Error::Invalid)
        }
    }
}

pub(crate) fn decode(opcode: Opcode, args: &[u8]) -> Result<Message, Error> {
    let message = match opcode {
        Opcode::Reply(Command::ReadBufferSize) => parser::buffer_size(args).map(|(_, m)| Message::BufferSize(m)),
        Opcode::Reply(Command::StatusGet) => parser::wlan_status(args).map(|(_, m)| Message::Status(m)),
        Opcode::Reply(Command::Socket)
        | Opcode::Reply(Command::Bind)
        | Opcode::Reply(Command::Listen)
        | Opcode::Reply(Command::Connect)
        | Opcode::Reply(Command::Close) => parser::socket_result(args).map(|(_, m)| Message::Result(m.0)),
        Opcode::Reply(Command::Accept) => parser::accept(args).map(|(_, m)| Message::Result(m.0)),
        Opcode::Reply(Command::Recv) | Opcode::Reply(Command::RecvFrom) => {
            parser::recv(args).map(|(_, m)| Message::Recv(m))
        }
        Opcode::Reply(Command::Select) => parser::select(args).map(|(_, m)| Message::Select(m)),
        Opcode::Unsolicited(Unsolicited::Dhcp) => parser::dhcp(args).map(|(_, m)| Message::Dhcp(m)),
        Opcode::Unsolicited(Unsolicited::TcpCloseWait) => parser::close_wait(args).map(|(_, m)| Message::CloseWait(m)),
        Opcode::Unsolicited(Unsolicited::FreeBuffer) => parser::free_buffers(args).map(|(_, m)| Message::FreeBuffers(m)),
        _ => return Ok(Message::None),
    };
    message.map_err(|_| Error::Invalid)
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
    /// Consumes the packet waiting in the receive buffer.
    pub(crate) fn dispatch(&mut self) -> Result<(), Error> {
        let classified = match self.arbiter.received() {
            Some(payload) => classify(payload),
            None => return Err(Error::InvalidState),
        };

        let packet = match classified {
            Ok(packet) => packet,
            Err(e) => {
                self.arbiter.settle();
                return Err(e);
            }
        };

        match packet {
            Packet::Event { opcode, args } => self.dispatch_event(opcode, args),
            Packet::Data { opcode, descriptor, payload } => {
                let length = (payload.1 - payload.0) as u32;
                log::debug!("data {:?} for {}: {} bytes", opcode, descriptor, length);
                let statistics = self.arbiter.statistics_mut();
                statistics.data_frames += 1;
                statistics.socket_reads += 1;
                self.sockets.on_data(descriptor, length);
                self.arbiter.notify_data(descriptor, payload.0, payload.1);
                self.arbiter.settle();
                Ok(())
            }
        }
    }

    fn dispatch_event(&mut self, opcode: Opcode, args: (usize, usize)) -> Result<(), Error> {
        log::debug!("event {:?}", opcode);
        self.arbiter.statistics_mut().events += 1;
        self.arbiter.notify_event(opcode.value(), args.0, args.1);

        let message = match self.arbiter.received() {
            Some(payload) => decode(opcode, &payload[args.0..args.1]),
            None => Err(Error::InvalidState),
        };

        if opcode.is_unsolicited() {
            self.arbiter.statistics_mut().unsolicited += 1;
            self.arbiter.settle();
            let message = message?;
            return self.unsolicited(opcode, message);
        }

        if !self.arbiter.complete_reply(opcode.value()) {
            log::warn!("unexpected reply {:?} while waiting for {:?}", opcode, self.arbiter.pending_command());
            self.arbiter.settle();
            return Err(Error::Invalid);
        }
        self.arbiter.settle();

        let message = match message {
            Ok(message) => message,
            Err(e) => {
                if let Opcode::Reply(command) = opcode {
                    self.sockets.abandon(command);
                }
                return Err(e);
            }
        };
        self.reply(opcode, message)
    }

    fn reply(&mut self, opcode: Opcode, message: Message) -> Result<(), Error> {
        let command = match opcode {
            Opcode::Reply(command) => command,
            _ => return Ok(()),
        };

        match (command, message) {
            (Command::SimpleLinkStart, _) => {
                log::info!("CC3000 is up");
                self.buffer_size_due = true;
                self.read_buffer_size();
                Ok(())
            }
            (Command::ReadBufferSize, Message::BufferSize(info)) => {
                log::info!("{} buffers of {} bytes", info.count, info.size);
                self.buffers = info.count;
                self.buffer_size = info.size;
                Ok(())
            }
            (Command::StatusGet, Message::Status(status)) => {
                if status != self.wlan_status {
                    log::info!("wlan status {:?}", status);
                }
                self.wlan_status = status;
                if status == WlanStatus::Disconnected {
                    self.dhcp_complete = false;
                    if let Some(info) = self.config.join.clone() {
                        log::info!("joining {}", info.ssid);
                        return self.join(&info);
                    }
                }
                Ok(())
            }
            (Command::Socket, Message::Result(result)) => self.sockets.on_socket(result),
            (Command::Bind, Message::Result(result)) => self.sockets.on_bind(result),
            (Command::Listen, Message::Result(result)) => self.sockets.on_listen(result),
            (Command::Accept, Message::Result(result)) => self.sockets.on_accept(result),
            (Command::Connect, Message::Result(result)) => self.sockets.on_connect(result),
            (Command::Close, Message::Result(result)) => self.sockets.on_close(result),
            (Command::Recv, Message::Recv(reply)) | (Command::RecvFrom, Message::Recv(reply)) => {
                let more = self.sockets.on_recv(command, &reply);
                if reply.length > 0 {
                    self.arbiter.expect_data();
                }
                more.map(|_| ())
            }
            (Command::Select, Message::Select(reply)) => {
                self.sockets.on_select(&reply);
                Ok(())
            }
            (command, _) => {
                log::debug!("reply to {:?}", command);
                Ok(())
            }
        }
    }

    fn unsolicited(&mut self, opcode: Opcode, message: Message) -> Result<(), Error> {
        match (opcode, message) {
            (Opcode::Unsolicited(Unsolicited::FreeBuffer), Message::FreeBuffers(freed)) => {
                self.buffers = self.buffers.saturating_add(freed.min(u8::MAX as u16) as u8);
                Ok(())
            }
            (Opcode::Unsolicited(Unsolicited::WlanConnect), _) => {
                log::info!("wlan connected");
                self.wlan_status = WlanStatus::Connected;
                Ok(())
            }
            (Opcode::Unsolicited(Unsolicited::WlanDisconnect), _) => {
                log::info!("wlan disconnected");
                self.wlan_status = WlanStatus::Disconnected;
                self.dhcp_complete = false;
                Ok(())
            }
            (Opcode::Unsolicited(Unsolicited::Dhcp), Message::Dhcp(config)) => {
                log::info!("dhcp: ip {} gateway {} dns {}", config.ip, config.gateway, config.dns_server);
                self.ip_config = config;
                self.dhcp_complete = true;
                Ok(())
            }
            (Opcode::Unsolicited(Unsolicited::TcpCloseWait), Message::CloseWait(descriptor)) => {
                self.sockets.on_close_wait(descriptor)
            }
            (Opcode::Unsolicited(Unsolicited::Keepalive), _) => Ok(()),
            (opcode, _) => {
                log::warn!("unhandled event {:?}", opcode);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_event() {
        let payload = [0x04, 0x01, 0x10, 0x05, 0x00, 0x03, 0x00, 0x00, 0x00];
        let packet = classify(&payload).unwrap();
        assert_eq!(
            packet,
            Packet::Event {
                opcode: Opcode::Reply(Command::Socket),
                args: (4, 9),
            }
        );
    }

    #[test]
    fn classify_rejects_unknown_tag() {
        assert_eq!(classify(&[0x07, 0x00, 0x00, 0x00]), Err(Error::Invalid));
        assert_eq!(classify(&[]), Err(Error::Invalid));
    }

    #[test]
    fn classify_rejects_truncated_args() {
        assert_eq!(classify(&[0x04, 0x01, 0x10, 0x05, 0x00]), Err(Error::Invalid));
    }

    #[test]
    fn classify_data() {
        let mut payload = [0u8; 5 + 12 + 3];
        payload[0] = 0x02;
        payload[1] = 0x82;
        payload[2] = 12;
        payload[3] = 15;
        payload[5] = 2; // descriptor
        payload[13] = 3; // payload length
        payload[17..].copy_from_slice(b"abc");

        let packet = classify(&payload).unwrap();
        assert_eq!(
            packet,
            Packet::Data {
                opcode: DataOpcode::Recv,
                descriptor: 2,
                payload: (17, 20),
            }
        );
    }

    #[test]
    fn classify_rejects_oversized_data_length() {
        let mut payload = [0u8; 5 + 12 + 3];
        payload[0] = 0x02;
        payload[1] = 0x82;
        payload[2] = 12;
        payload[3] = 0xFF;
        payload[4] = 0xFF;
        payload[13..17].copy_from_slice(&u32::MAX.to_le_bytes());

        assert_eq!(classify(&payload), Err(Error::Invalid));
    }

    #[test]
    fn accept_result_is_the_new_descriptor() {
        let mut args = [0u8; 1 + 4 + 4 + 8];
        args[1] = 4; // listening descriptor
        args[5..9].copy_from_slice(&(-57i32).to_le_bytes());
        assert_eq!(decode(Opcode::Reply(Command::Accept), &args), Ok(Message::Result(-57)));

        args[5..9].copy_from_slice(&6i32.to_le_bytes());
        assert_eq!(decode(Opcode::Reply(Command::Accept), &args), Ok(Message::Result(6)));
    }

    #[test]
    fn decode_unrecognized_is_empty() {
        assert_eq!(decode(Opcode::from(0x8040), &[1, 2, 3]), Ok(Message::None));
        assert_eq!(decode(Opcode::Reply(Command::Socket), &[0]), Err(Error::Invalid));
    }
}
