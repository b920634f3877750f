//! The boundary between a [`DeviceSession`](crate::session::DeviceSession)
//! and the transport that actually talks to the pad.

use crate::error::Result;
use bytes::Bytes;
use std::fmt;

pub const SERIAL_SIZE: usize = 16;

/// Identity reported by the pad once the transport has read it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: [u8; SERIAL_SIZE],
    pub firmware_version: u16,
    /// Whether the pad is jumpered as the second player's pad.
    pub is_player2: bool,
}

/// Work to run once the transport confirms a command was written.
///
/// Completions are handed back from [`Connection::update`] and resolved by
/// the session during the same tick, on the driving thread, with the device
/// lock held. They are resolved even when that pass later fails.
pub enum Completion {
    /// The `w` command finished; another write may be sent.
    ConfigWritten,
    /// The `g` following a factory reset finished.
    FactoryResetReadback,
    /// Caller-supplied hook for a raw command. It runs with the device lock
    /// held and must not call back into any session.
    Callback(Box<dyn FnOnce() + Send>),
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::ConfigWritten => write!(f, "ConfigWritten"),
            Completion::FactoryResetReadback => write!(f, "FactoryResetReadback"),
            Completion::Callback(_) => write!(f, "Callback(..)"),
        }
    }
}

/// Packet-level access to one pad.
///
/// Implementations own the physical link. Every method except
/// [`update`](Connection::update) must return without blocking.
pub trait Connection: Send {
    /// Opaque handle to the underlying device.
    type Handle: Clone + Send;

    fn open(&mut self, handle: Self::Handle) -> Result<()>;

    /// Close the link, dropping queued commands and their completions.
    /// Resets the active flag.
    fn close(&mut self);

    fn device_handle(&self) -> Option<Self::Handle>;

    fn is_connected(&self) -> bool;

    /// Connected and the pad's identity has been read.
    fn is_connected_with_device_info(&self) -> bool;

    fn device_info(&self) -> DeviceInfo;

    /// Set once per connection, the first time the session activates it.
    fn is_active(&self) -> bool;
    fn set_active(&mut self, active: bool);

    /// Queue a command for the next [`update`](Connection::update).
    fn send_command(&mut self, command: Bytes, completion: Option<Completion>);

    /// Take the next received packet.
    ///
    /// Each call yields exactly one complete logical packet, so a packet
    /// that fails to parse is consumed rather than left in a buffer.
    fn read_packet(&mut self) -> Option<Bytes>;

    /// Bitmask of the panels currently pressed.
    fn input_state(&self) -> u16;

    /// Perform pending reads and writes.
    ///
    /// The completion of every command the transport finished writing is
    /// pushed to `completed`, including those written before an error ended
    /// the pass.
    fn update(&mut self, completed: &mut Vec<Completion>) -> Result<()>;
}
