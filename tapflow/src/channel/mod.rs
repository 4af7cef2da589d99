//! Device command channel over a pub/sub transport

pub mod command;
pub mod discovery;
pub mod protocol;
pub mod topics;
pub mod transport;

pub use command::{ChannelOptions, CommandChannel};
pub use discovery::StreamStatus;
pub use protocol::{CommandKind, CommandResponse};
pub use transport::{MemoryTransport, Message, Transport};
