//! Identity types shared across the gateway.

mod request_id;

pub use request_id::RequestId;
