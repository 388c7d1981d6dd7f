//! Strongly-typed identifier wrappers over `Uuid`.
//!
//! Every id in the graph (envelope/event/node/role/service) is a 128-bit
//! UUID rendered as 32 hex characters on the wire. Wrapping them keeps
//! `EnvelopeId` and `EventId` from being accidentally swapped at a call site.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(u: Uuid) -> Self {
                Self(u)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

id_type!(EnvelopeId);
id_type!(EventId);
id_type!(NodeId);
id_type!(RoleId);
id_type!(ServiceId);
id_type!(EventTypeId);
id_type!(EmitterId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_string() {
        let id = EnvelopeId::new();
        let parsed = EnvelopeId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_malformed_uuid() {
        assert!(EnvelopeId::parse("not-a-uuid").is_err());
    }
}
