//! Macros for defining typed ID types.

/// Macro to define a typed ESI identifier.
///
/// This generates a newtype wrapper around `i64` with:
/// - A `KIND` constant used in error messages
/// - `new()` to wrap a raw value (validated with `try_new()`)
/// - `parse()` to parse from a decimal string
/// - `Display` and `FromStr` implementations
/// - `Serialize` and `Deserialize` as JSON numbers
/// - `Ord`, `Hash`, and other standard traits
///
/// # Example
///
/// ```ignore
/// define_esi_id!(CorporationId, "corporation");
///
/// let corp = CorporationId::new(98633922);
/// let parsed: CorporationId = "98633922".parse()?;
/// ```
#[macro_export]
macro_rules! define_esi_id {
    ($name:ident, $kind:literal) => {
        /// A typed ESI identifier for this entity type.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(i64);

        impl $name {
            /// Entity kind, used in error messages.
            pub const KIND: &'static str = $kind;

            /// Wraps a raw ESI id without validation.
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Wraps a raw ESI id, rejecting non-positive values.
            pub fn try_new(id: i64) -> Result<Self, $crate::IdError> {
                if id <= 0 {
                    return Err($crate::IdError::NotPositive {
                        kind: Self::KIND,
                        value: id,
                    });
                }
                Ok(Self(id))
            }

            /// Returns the underlying i64 value.
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

                let id = s
                    .parse::<i64>()
                    .map_err(|_| $crate::IdError::NotAnInteger {
                        kind: Self::KIND,
                        actual: s.to_string(),
                    })?;

                Self::try_new(id)
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
