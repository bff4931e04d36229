use crate::arbiter::State;

/// Diagnostic hooks invoked by the driver. All methods default to doing nothing.
pub trait Observer {
    fn on_transition(&mut self, _from: State, _to: State) {}

    fn on_command(&mut self, _opcode: u16, _args: &[u8]) {}

    fn on_event(&mut self, _opcode: u16, _args: &[u8]) {}

    /// Payload of a data frame received for `descriptor`.
    fn on_data(&mut self, _descriptor: i32, _payload: &[u8]) {}
}

impl Observer for () {}
