pub mod codec;
pub mod handshake;
pub mod packet;
pub mod resultset;

pub use codec::PacketCodec;
pub use handshake::{scramble_native_password, HandshakeResponse, ServerError, ServerGreeting};
pub use packet::{capabilities, Packet};
pub use resultset::Row;
