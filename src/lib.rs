#![forbid(unsafe_code)]
#![allow(non_shorthand_field_patterns)]

extern crate byteorder;
extern crate hex;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
extern crate rand;
extern crate sha2;
extern crate snow;

#[cfg(test)]
extern crate crossbeam;

mod error;
mod packet;
mod field;
mod cipher_state;
mod half_conn;
mod stream;
mod negotiation;
mod connection;
pub mod tcp_communication;

#[cfg(test)]
mod test_tcp_communication;

pub use self::error::Error;
pub use self::field::{
    parse_message_fields, Field, MESSAGE_TYPE_CUSTOM_CERT, MESSAGE_TYPE_DATA,
    MESSAGE_TYPE_MAX_PACKET_SIZE, MESSAGE_TYPE_PADDING, MESSAGE_TYPE_SIGNATURE,
};
pub use self::negotiation::catalog::{standard_catalog, Catalog, HandshakeConfig, Pattern};
pub use self::negotiation::Strategy;
pub use self::connection::{Config, Conn, VerifyCallback};
pub use self::stream::ByteStream;
pub use self::tcp_communication::{dial, generate_keypair, Listener};
