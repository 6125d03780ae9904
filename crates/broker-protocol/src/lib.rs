//! Wire framing, record encoding, command codes and payload shapes shared
//! between the broker server and its clients.

pub mod command;
pub mod error;
pub mod frame;
pub mod payload;
pub mod record;

pub use command::Command;
pub use error::{BrokerErrorCode, WireError};
pub use frame::{decode_request, decode_response, encode_request, encode_response, RequestHeader};
pub use record::Record;
