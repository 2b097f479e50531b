//! wp-protocol: Wire vocabulary for the waypost coordinator
//!
//! This crate defines what travels between the coordinator and its agents:
//! command envelopes and their correlation ids, the framed messages used on
//! agent connections, the datagram framing used inside UDP tunnel legs, and
//! the shell-like command lines that agents interpret.

pub mod codec;
pub mod command;
pub mod error;
pub mod frame;
pub mod message;
pub mod tokenize;

pub use codec::{read_frame, write_frame, DatagramCodec, FrameCodec, MAX_DATAGRAM_SIZE};
pub use command::{
    CommandId, CommandLine, Envelope, VERB_CUSTOM_MODULE, VERB_DELETE_PORT_FWD, VERB_PORT_FWD,
    VERB_PROXY,
};
pub use error::ProtocolError;
pub use frame::{FrameHeader, FRAME_MAGIC, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use message::{AgentHello, Message, MessageType, PROTOCOL_VERSION};
pub use tokenize::{parse_cmd, parse_flags, quote_arg, ParsedCommand};
