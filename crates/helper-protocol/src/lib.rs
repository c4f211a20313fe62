//! Contract between the control core and the privileged local helper.
//!
//! The helper is a separate root-owned process that performs OS-level
//! mutations on request: creating service accounts, writing resource limits,
//! verifying system passwords. The core never performs these itself.
//!
//! Messages are JSON, framed with a 4-byte big-endian length prefix, over a
//! unix socket. One request is sent per connection.

pub mod client;
pub mod errors;
mod framing;
pub mod protocol;
pub mod server;

pub use client::HelperClient;
pub use errors::HelperProtocolError;
pub use protocol::{
    HelperCommand, HelperOutcome, HelperRequest, HelperResponse, ResourceLimits, ServiceAccount,
    MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
};
pub use server::{HelperHandler, HelperServer};
