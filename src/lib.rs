#![no_std]

pub mod adapter;
pub mod arbiter;
mod chip_select;
mod event;
pub mod irq;
pub mod observer;
pub mod opcode;
pub mod packet;
pub mod parser;
pub mod protocol;
pub mod socket;
pub mod socket_manager;
pub mod transport;

#[cfg(test)]
mod mock;

pub use adapter::{Adapter, Config, Error, JoinError};
pub use arbiter::{State, Statistics};
pub use irq::InterruptControl;
pub use observer::Observer;
pub use opcode::{Command, DataOpcode};
pub use protocol::{IpConfig, JoinInfo, Security, WlanStatus};
pub use socket::{Role, Socket, SocketHandle};
pub use transport::{Blocking, Transport};
