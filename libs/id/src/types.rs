//! Typed ID definitions for the ESI entities corpwatch tracks.

use crate::define_esi_id;

define_esi_id!(CorporationId, "corporation");
define_esi_id!(AllianceId, "alliance");

/// Discord channel (snowflake) id a notifier posts to.
///
/// Snowflakes are unsigned 64-bit values and travel as strings in the
/// Discord API, so this does not share the ESI representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Creates a new ChannelId from a raw snowflake.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying snowflake.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ChannelId {
    type Err = crate::IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(crate::IdError::Empty);
        }
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| crate::IdError::NotAnInteger {
                kind: "channel",
                actual: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_corporation_id_parse() {
        let id: CorporationId = "98633922".parse().unwrap();
        assert_eq!(id.value(), 98633922);
        assert_eq!(id.to_string(), "98633922");
    }

    #[test]
    fn test_id_parse_trims_whitespace() {
        let id: AllianceId = " 99010468\n".parse().unwrap();
        assert_eq!(id, AllianceId::new(99010468));
    }

    #[test]
    fn test_id_empty() {
        let result: Result<AllianceId, _> = "".parse();
        assert!(result.unwrap_err().is_empty());
    }

    #[test]
    fn test_id_not_an_integer() {
        let result: Result<CorporationId, _> = "corp_123".parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::NotAnInteger {
                kind: "corporation",
                ..
            }
        ));
    }

    #[test]
    fn test_id_not_positive() {
        assert!(matches!(
            AllianceId::try_new(0).unwrap_err(),
            crate::IdError::NotPositive { value: 0, .. }
        ));
        assert!("-5".parse::<CorporationId>().is_err());
    }

    #[test]
    fn test_id_serializes_as_number() {
        let id = CorporationId::new(98000001);
        assert_eq!(serde_json::to_string(&id).unwrap(), "98000001");

        let ids: Vec<CorporationId> = serde_json::from_str("[3, 1, 2]").unwrap();
        assert_eq!(ids[0], CorporationId::new(3));
    }

    #[test]
    fn test_channel_id_parse() {
        let id: ChannelId = "1187264587321139220".parse().unwrap();
        assert_eq!(id.value(), 1187264587321139220);
        assert!("abc".parse::<ChannelId>().is_err());
    }

    proptest! {
        #[test]
        fn prop_display_parse_roundtrip(raw in 1i64..i64::MAX) {
            let id = CorporationId::new(raw);
            let parsed: CorporationId = id.to_string().parse().unwrap();
            prop_assert_eq!(id, parsed);
        }
    }
}
