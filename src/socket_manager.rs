//! Socket table and the per-socket state machine.
//!
//! Sockets advance from the polling loop and from command replies. Commands
//! are strictly serialized: `current` names the socket whose command is
//! outstanding, and `select_pending` guards the single aggregated select.

use heapless::{consts::*, Vec};

use crate::adapter::Error;
use crate::arbiter::Issue;
use crate::opcode::Command;
use crate::parser::{RecvReply, SelectReply};
use crate::protocol;
use crate::socket::{Role, Socket, SocketHandle, State};

pub const MAX_SOCKETS: usize = 8;

pub struct SocketManager {
    sockets: Vec<Socket, U8>,
    current: Option<usize>,
    select_pending: bool,
    retry_timeout: u32,
    recv_chunk: u16,
}

impl SocketManager {
    pub fn new(retry_timeout: u32, recv_chunk: u16) -> Self {
        Self {
            sockets: Vec::new(),
            current: None,
            select_pending: false,
            retry_timeout,
            recv_chunk,
        }
    }

    /// Registers a socket. Fails with `Invalid` once the table is full.
    pub fn add(&mut self, socket: Socket) -> Result<SocketHandle, Error> {
        let index = self.sockets.len();
        self.sockets.push(socket).map_err(|_| Error::Invalid)?;
        Ok(SocketHandle(index))
    }

    pub fn get(&self, handle: SocketHandle) -> Option<&Socket> {
        self.sockets.get(handle.0)
    }

    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Socket> {
        self.sockets.iter()
    }

    pub fn current(&self) -> Option<SocketHandle> {
        self.current.map(SocketHandle)
    }

    pub fn select_pending(&self) -> bool {
        self.select_pending
    }

    fn find(&mut self, descriptor: i32) -> Option<&mut Socket> {
        self.sockets
            .iter_mut()
            .find(|socket| socket.descriptor == Some(descriptor))
    }

    /// Parks a socket: closes it if the chip knows it and keeps it from being
    /// re-created.
    ///
    /// A socket with a command outstanding is only marked; it is closed once
    /// the reply has landed.
    pub fn shutdown(&mut self, handle: SocketHandle) -> Result<(), Error> {
        let in_flight = self.current == Some(handle.0);
        let socket = self.sockets.get_mut(handle.0).ok_or(Error::Invalid)?;
        socket.parked = true;
        if socket.state == State::Failed {
            socket.reset();
        } else if !in_flight {
            close_parked(socket);
        }
        Ok(())
    }

    pub fn reopen(&mut self, handle: SocketHandle) -> Result<(), Error> {
        let socket = self.sockets.get_mut(handle.0).ok_or(Error::Invalid)?;
        socket.parked = false;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Polling
    // ------------------------------------------------------------------------

    /// Advances every socket, then issues one select over the ready ones.
    pub(crate) fn poll<E: Issue>(&mut self, engine: &mut E, elapsed: u32) {
        for index in 0..self.sockets.len() {
            self.update(index, engine, elapsed);
        }

        if self.select_pending {
            return;
        }

        let mut read = 0u32;
        let mut except = 0u32;
        let mut max = 0i32;
        let mut count = 0;

        for socket in self.sockets.iter().filter(|socket| socket.is_ready()) {
            if let Some(descriptor) = socket.descriptor.filter(|d| (0..32).contains(d)) {
                read |= 1 << descriptor;
                except |= 1 << descriptor;
                max = max.max(descriptor);
                count += 1;
            }
        }

        if count == 0 {
            return;
        }

        let args = match protocol::select(max as u32 + 1, read, 0, except) {
            Ok(args) => args,
            Err(_) => return,
        };
        if engine.issue(Command::Select, &args).is_ok() {
            self.select_pending = true;
        }
    }

    fn update<E: Issue>(&mut self, index: usize, engine: &mut E, elapsed: u32) {
        let idle = self.current.is_none();
        let in_flight = self.current == Some(index);
        let socket = &mut self.sockets[index];
        if !in_flight {
            close_parked(socket);
        }

        match socket.state {
            State::Init => {
                if idle && !socket.parked {
                    let issued = protocol::socket(socket.family, socket.socket_type, socket.protocol)
                        .and_then(|args| engine.issue(Command::Socket, &args));
                    if issued.is_ok() {
                        socket.state = State::Creating;
                        self.current = Some(index);
                    }
                }
            }
            State::Created => {
                if !idle {
                    return;
                }
                match socket.role {
                    Role::Datagram => {
                        log::info!("socket {:?} ready", socket.descriptor);
                        socket.state = State::Ready;
                    }
                    Role::Client => {
                        if issue_address(engine, Command::Connect, socket).is_ok() {
                            socket.state = State::Connecting;
                            self.current = Some(index);
                        }
                    }
                    Role::Listener => {
                        if issue_address(engine, Command::Bind, socket).is_ok() {
                            socket.state = State::Binding;
                            self.current = Some(index);
                        }
                    }
                }
            }
            State::Bound => {
                if idle && issue_descriptor(engine, Command::Listen, socket).is_ok() {
                    socket.state = State::Listening;
                    self.current = Some(index);
                }
            }
            State::Accepting => {
                if idle && issue_descriptor(engine, Command::Accept, socket).is_ok() {
                    self.current = Some(index);
                }
            }
            State::Ready => {
                if idle && socket.readable {
                    let command = if socket.is_stream() {
                        Command::Recv
                    } else {
                        Command::RecvFrom
                    };
                    let descriptor = socket.descriptor.unwrap_or(-1);
                    let issued = protocol::recv(descriptor, self.recv_chunk)
                        .and_then(|args| engine.issue(command, &args));
                    if issued.is_ok() {
                        socket.readable = false;
                        self.current = Some(index);
                    }
                }
            }
            State::Failed => {
                if socket.retry_timeout == 0 {
                    log::info!("retrying socket {}", index);
                    socket.reset();
                } else {
                    socket.retry_timeout = socket.retry_timeout.saturating_sub(elapsed);
                }
            }
            State::CloseWait => {
                if idle && issue_descriptor(engine, Command::Close, socket).is_ok() {
                    socket.state = State::Closing;
                    self.current = Some(index);
                }
            }
            State::Creating | State::Binding | State::Listening | State::Connecting | State::Closing => {}
        }
    }

    // ------------------------------------------------------------------------
    // Replies
    // ------------------------------------------------------------------------

    fn take_current(&mut self, command: Command) -> Result<&mut Socket, Error> {
        match self.current.take() {
            Some(index) => Ok(&mut self.sockets[index]),
            None => {
                log::warn!("{:?} reply without a socket", command);
                Err(Error::InvalidState)
            }
        }
    }

    pub(crate) fn on_socket(&mut self, result: i32) -> Result<(), Error> {
        let retry = self.retry_timeout;
        let socket = self.take_current(Command::Socket)?;
        if result < 0 {
            log::warn!("socket creation failed: {}", result);
            socket.fail(retry);
        } else {
            log::info!("socket {} created", result);
            socket.descriptor = Some(result);
            socket.state = State::Created;
        }
        Ok(())
    }

    pub(crate) fn on_connect(&mut self, result: i32) -> Result<(), Error> {
        let retry = self.retry_timeout;
        let socket = self.take_current(Command::Connect)?;
        if result == 0 {
            log::info!("socket {:?} connected to {}", socket.descriptor, socket.address);
            socket.state = State::Ready;
        } else {
            log::warn!("socket {:?} connection failed: {}", socket.descriptor, result);
            socket.fail(retry);
        }
        Ok(())
    }

    pub(crate) fn on_bind(&mut self, result: i32) -> Result<(), Error> {
        let retry = self.retry_timeout;
        let socket = self.take_current(Command::Bind)?;
        if result == 0 {
            socket.state = State::Bound;
        } else {
            log::warn!("socket {:?} bind failed: {}", socket.descriptor, result);
            socket.fail(retry);
        }
        Ok(())
    }

    pub(crate) fn on_listen(&mut self, result: i32) -> Result<(), Error> {
        let retry = self.retry_timeout;
        let socket = self.take_current(Command::Listen)?;
        if result == 0 {
            log::info!("socket {:?} listening on {}", socket.descriptor, socket.address);
            socket.state = State::Accepting;
        } else {
            log::warn!("socket {:?} listen failed: {}", socket.descriptor, result);
            socket.fail(retry);
        }
        Ok(())
    }

    /// A negative result means nobody is waiting yet; the accept is re-issued
    /// on a later poll.
    pub(crate) fn on_accept(&mut self, result: i32) -> Result<(), Error> {
        let socket = self.take_current(Command::Accept)?;
        if result >= 0 {
            log::info!("socket {:?} accepted {}", socket.descriptor, result);
            socket.listen_descriptor = socket.descriptor;
            socket.descriptor = Some(result);
            socket.state = State::Ready;
        }
        Ok(())
    }

    pub(crate) fn on_close(&mut self, result: i32) -> Result<(), Error> {
        let socket = self.take_current(Command::Close)?;
        log::info!("socket {:?} closed: {}", socket.descriptor, result);
        socket.reset();
        Ok(())
    }

    /// Returns `true` when a data frame follows.
    pub(crate) fn on_recv(&mut self, command: Command, reply: &RecvReply) -> Result<bool, Error> {
        let socket = self.take_current(command)?;
        if socket.descriptor != Some(reply.descriptor) {
            log::warn!("receive reply for {} on socket {:?}", reply.descriptor, socket.descriptor);
        }
        Ok(reply.length > 0)
    }

    /// Marks ready sockets with pending data readable. Bit `n` of each set
    /// stands for descriptor `n`.
    pub(crate) fn on_select(&mut self, reply: &SelectReply) {
        self.select_pending = false;
        if reply.result <= 0 {
            return;
        }

        for socket in self.sockets.iter_mut().filter(|socket| socket.is_ready()) {
            let bit = match socket.descriptor.filter(|d| (0..32).contains(d)) {
                Some(descriptor) => 1u32 << descriptor,
                None => continue,
            };
            if reply.read & bit != 0 {
                socket.readable = true;
            }
            if reply.except & bit != 0 {
                log::warn!("socket {:?} reported an exception", socket.descriptor);
            }
        }
    }

    pub(crate) fn on_close_wait(&mut self, descriptor: i32) -> Result<(), Error> {
        let socket = self.find(descriptor).ok_or(Error::Invalid)?;
        log::info!("socket {} closed by peer", descriptor);
        socket.readable = false;
        socket.state = State::CloseWait;
        Ok(())
    }

    pub(crate) fn on_data(&mut self, descriptor: i32, length: u32) {
        if let Some(socket) = self.find(descriptor) {
            socket.rx_count += 1;
            socket.rx_bytes += length;
        }
    }

    /// A command went unanswered; whoever issued it starts over.
    pub(crate) fn abandon(&mut self, command: Command) {
        if command == Command::Select {
            self.select_pending = false;
        }
        let retry = self.retry_timeout;
        if let Some(index) = self.current.take() {
            self.sockets[index].fail(retry);
        }
    }
}

/// Sends a parked socket that holds a descriptor, and has nothing in
/// flight, towards close.
fn close_parked(socket: &mut Socket) {
    if !socket.parked || socket.descriptor.is_none() {
        return;
    }
    if let State::Created | State::Bound | State::Accepting | State::Ready = socket.state {
        socket.readable = false;
        socket.state = State::CloseWait;
    }
}

fn issue_address<E: Issue>(engine: &mut E, command: Command, socket: &Socket) -> Result<(), Error> {
    let args = protocol::address_command(socket.descriptor.unwrap_or(-1), &socket.address)?;
    engine.issue(command, &args)
}

fn issue_descriptor<E: Issue>(engine: &mut E, command: Command, socket: &Socket) -> Result<(), Error> {
    let args = match command {
        Command::Listen => protocol::listen(socket.descriptor.unwrap_or(-1), 1)?,
        _ => protocol::descriptor_only(socket.descriptor.unwrap_or(-1))?,
    };
    engine.issue(command, &args)
}
