//! Macros for defining typed numeric IDs.

/// Macro to define a typed numeric ID assigned by Grafana.
///
/// This generates a newtype wrapper around `i64` with:
/// - A `KIND` constant used in error messages
/// - `new()` and `value()`
/// - `Display` and `FromStr` implementations
/// - `Serialize` and `Deserialize` as a bare integer
/// - `Ord`, `Hash`, and other standard traits
///
/// # Example
///
/// ```ignore
/// define_numeric_id!(OrgId, "organization");
///
/// let org_id = OrgId::new(3);
/// let parsed: OrgId = "3".parse()?;
/// ```
#[macro_export]
macro_rules! define_numeric_id {
    ($name:ident, $kind:literal) => {
        /// A typed numeric ID for this resource type.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(i64);

        impl $name {
            /// Human readable resource kind, used in error messages.
            pub const KIND: &'static str = $kind;

            /// Wraps a raw ID returned by the API.
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Returns the underlying integer.
            #[must_use]
            pub const fn value(&self) -> i64 {
                self.0
            }

            /// Parses an ID from its decimal string form.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                let s = s.trim();
                if s.is_empty() {
                    return Err($crate::IdError::Empty);
                }

                s.parse::<i64>()
                    .map(Self)
                    .map_err(|_| $crate::IdError::NotNumeric {
                        kind: Self::KIND,
                        actual: s.to_string(),
                    })
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_i64(self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let id = i64::deserialize(deserializer)?;
                Ok(Self(id))
            }
        }
    };
}
