//! Enum-to-integer code tables used at the storage boundary.
//!
//! Every enum that is persisted in the journal is written as the small
//! integer listed here, never by variant name or `as u8` casts scattered
//! through the code. Code `0` is reserved for "unknown" in every table and
//! is never written; reading it (or any unlisted code) is a format error.
//!
//! | enum            | 0       | 1       | 2       | 3      | 4      |
//! |-----------------|---------|---------|---------|--------|--------|
//! | `MutationType`  | unknown | CREATE  | UPDATE  | DELETE | RELOAD |
//! | `MutationState` | unknown | PENDING | FAILED  |        |        |
//! | `EntityState`   | unknown | DEFAULT | DELETED |        |        |

use crate::entity::EntityState;
use crate::error::{CoreError, CoreResult};
use crate::mutation::{MutationState, MutationType};

/// An enum with a fixed persisted code per variant.
pub trait CodeTable: Sized + Copy + PartialEq + 'static {
    /// Name used in error messages.
    const NAME: &'static str;
    /// Variant/code pairs.
    const CODES: &'static [(Self, u8)];

    /// Returns the persisted code for this variant.
    fn to_code(self) -> u8 {
        Self::CODES
            .iter()
            .find(|(variant, _)| *variant == self)
            .map(|(_, code)| *code)
            .unwrap_or(0)
    }

    /// Looks up the variant for a persisted code.
    fn from_code(code: u8) -> Option<Self> {
        Self::CODES
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(variant, _)| *variant)
    }
}

impl CodeTable for MutationType {
    const NAME: &'static str = "mutation type";
    const CODES: &'static [(Self, u8)] = &[
        (MutationType::Create, 1),
        (MutationType::Update, 2),
        (MutationType::Delete, 3),
        (MutationType::Reload, 4),
    ];
}

impl CodeTable for MutationState {
    const NAME: &'static str = "mutation state";
    const CODES: &'static [(Self, u8)] = &[(MutationState::Pending, 1), (MutationState::Failed, 2)];
}

impl CodeTable for EntityState {
    const NAME: &'static str = "entity state";
    const CODES: &'static [(Self, u8)] = &[(EntityState::Default, 1), (EntityState::Deleted, 2)];
}

/// Decodes a persisted code, failing on unknown values.
pub fn decode<T: CodeTable>(code: u8) -> CoreResult<T> {
    T::from_code(code)
        .ok_or_else(|| CoreError::invalid_format(format!("unknown {} code {}", T::NAME, code)))
}

/// Serde adapter writing a [`CodeTable`] enum as its integer code.
///
/// Use with `#[serde(with = "codes::as_code")]`.
pub mod as_code {
    use super::CodeTable;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes the variant's code.
    pub fn serialize<T: CodeTable, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(value.to_code())
    }

    /// Deserializes a code back into its variant.
    pub fn deserialize<'de, T: CodeTable, D: Deserializer<'de>>(deserializer: D) -> Result<T, D::Error> {
        let code = u8::deserialize(deserializer)?;
        T::from_code(code)
            .ok_or_else(|| D::Error::custom(format!("unknown {} code {}", T::NAME, code)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_type_codes() {
        assert_eq!(MutationType::Create.to_code(), 1);
        assert_eq!(MutationType::Update.to_code(), 2);
        assert_eq!(MutationType::Delete.to_code(), 3);
        assert_eq!(MutationType::Reload.to_code(), 4);
        assert_eq!(MutationType::from_code(4), Some(MutationType::Reload));
        assert_eq!(MutationType::from_code(0), None);
    }

    #[test]
    fn state_codes() {
        assert_eq!(MutationState::Pending.to_code(), 1);
        assert_eq!(MutationState::Failed.to_code(), 2);
        assert_eq!(EntityState::Default.to_code(), 1);
        assert_eq!(EntityState::Deleted.to_code(), 2);
    }

    #[test]
    fn unknown_code_is_format_error() {
        let err = decode::<EntityState>(9).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFormat { .. }));
        assert!(err.to_string().contains("entity state"));
        assert_eq!(decode::<MutationState>(2).unwrap(), MutationState::Failed);
    }

    #[test]
    fn codes_are_unique_per_table() {
        fn assert_unique<T: CodeTable>() {
            let mut seen: Vec<u8> = T::CODES.iter().map(|(_, c)| *c).collect();
            seen.sort_unstable();
            seen.dedup();
            assert_eq!(seen.len(), T::CODES.len(), "{}", T::NAME);
            assert!(!seen.contains(&0), "{} uses reserved code 0", T::NAME);
        }
        assert_unique::<MutationType>();
        assert_unique::<MutationState>();
        assert_unique::<EntityState>();
    }
}
