//! Strongly-typed identifiers used across the domain.

use uuid::Uuid;

/// Declare a UUID-backed identifier newtype.
///
/// Generates `new` (UUIDv7, time-ordered), `from_uuid`/`as_uuid`, `Display`,
/// `FromStr` (parse failures map to [`DomainError::InvalidId`]) and the
/// `Uuid` conversions. Domain crates use it for their own identifiers so every
/// id in the workspace behaves the same way.
///
/// [`DomainError::InvalidId`]: crate::DomainError::InvalidId
#[macro_export]
macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $vis:vis struct $t:ident;) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Copy,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize,
        )]
        #[serde(transparent)]
        $vis struct $t(::uuid::Uuid);

        impl $t {
            /// Create a new identifier (UUIDv7). Tests that need determinism
            /// should build ids with `from_uuid`.
            pub fn new() -> Self {
                Self(::uuid::Uuid::now_v7())
            }

            pub fn from_uuid(uuid: ::uuid::Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &::uuid::Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<::uuid::Uuid> for $t {
            fn from(value: ::uuid::Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for ::uuid::Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl core::str::FromStr for $t {
            type Err = $crate::DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = <::uuid::Uuid as core::str::FromStr>::from_str(s).map_err(|e| {
                    $crate::DomainError::invalid_id(format!("{}: {}", stringify!($t), e))
                })?;
                Ok(Self(uuid))
            }
        }
    };
}

uuid_newtype! {
    /// Identifier of a tenant (multi-tenant boundary).
    pub struct TenantId;
}

uuid_newtype! {
    /// Identifier of a user: session owners, attendees, scanners, finance managers.
    pub struct UserId;
}

uuid_newtype! {
    /// Identifier of an aggregate stream.
    pub struct AggregateId;
}

impl AggregateId {
    /// Reinterpret another UUID-backed identifier as a stream id.
    pub fn of(id: impl Into<Uuid>) -> Self {
        Self(id.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DomainError;
    use core::str::FromStr;

    #[test]
    fn parse_round_trips_display() {
        let id = UserId::new();
        let parsed = UserId::from_str(&id.to_string()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn parse_failure_is_invalid_id() {
        let err = TenantId::from_str("not-a-uuid").unwrap_err();
        match err {
            DomainError::InvalidId(msg) if msg.starts_with("TenantId:") => {}
            other => panic!("Expected InvalidId, got {other:?}"),
        }
    }

    #[test]
    fn aggregate_id_of_keeps_the_uuid() {
        let user = UserId::new();
        assert_eq!(AggregateId::of(user).as_uuid(), user.as_uuid());
    }
}
