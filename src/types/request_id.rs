//! Session identifiers.
//!
//! Each stream session gets a TypeID such as `req_01h455vb4pex5vsknk084sn02q`
//! that tags its log span and its summary.

use mti::prelude::*;
use std::fmt;

/// Identifier of one stream session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(MagicTypeId);

impl RequestId {
    /// The TypeID prefix for request identifiers.
    pub const PREFIX: &'static str = "req";

    /// Creates a time-sortable (UUIDv7) request ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Self::PREFIX.create_type_id::<V7>())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_the_session_prefix() {
        let id = RequestId::generate().to_string();
        assert!(id.starts_with("req_"));
        assert_eq!(id.len(), "req_".len() + 26);
    }

    #[test]
    fn every_session_gets_its_own_id() {
        assert_ne!(RequestId::generate(), RequestId::generate());
    }
}
