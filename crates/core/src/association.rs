//! Association fingerprints.
//!
//! An association identifies one attempt at an encounter: the set of
//! participating entities plus the zone it took place in. Two uploads that
//! describe the same fight produce the same association no matter how the
//! client ordered or repeated the participant list.
//!
//! The canonical form is `"<participants>|<zone>"` where participants are
//! deduplicated, sorted lexicographically and joined with `,`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

const PARTICIPANT_SEPARATOR: char = ',';
const ZONE_SEPARATOR: char = '|';

/// Deduplication key for an uploaded encounter.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Association {
    key: String,
    zone_id: i32,
    /// Byte offset of the zone separator inside `key`.
    split: usize,
}

impl Association {
    /// Build an association from a zone and an unordered list of entity ids.
    ///
    /// Duplicates are collapsed and the remaining ids sorted, so every
    /// permutation of the same set yields an identical association.
    pub fn build<I, S>(zone_id: i32, entity_ids: I) -> crate::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: Vec<S> = entity_ids.into_iter().collect();
        let mut unique = BTreeSet::new();
        for id in &ids {
            let id = id.as_ref();
            validate_entity_id(id)?;
            unique.insert(id);
        }

        if unique.is_empty() {
            return Err(crate::Error::InvalidAssociation(
                "at least one participant is required".to_string(),
            ));
        }

        let participants = unique.into_iter().collect::<Vec<_>>().join(",");
        let split = participants.len();
        Ok(Self {
            key: format!("{participants}{ZONE_SEPARATOR}{zone_id}"),
            zone_id,
            split,
        })
    }

    /// Parse an association from its canonical string form.
    ///
    /// Only canonical keys are accepted, which keeps `parse(a.key()) == a`
    /// and `parse(s).key() == s` both true.
    pub fn parse(key: &str) -> crate::Result<Self> {
        let (participants, zone) = key.rsplit_once(ZONE_SEPARATOR).ok_or_else(|| {
            crate::Error::InvalidAssociation(format!("missing zone separator in {key:?}"))
        })?;
        let zone_id: i32 = zone.parse().map_err(|e| {
            crate::Error::InvalidAssociation(format!("invalid zone id {zone:?}: {e}"))
        })?;

        let parsed = Self::build(zone_id, participants.split(PARTICIPANT_SEPARATOR))?;
        if parsed.key != key {
            return Err(crate::Error::InvalidAssociation(format!(
                "{key:?} is not in canonical form (expected {:?})",
                parsed.key
            )));
        }
        Ok(parsed)
    }

    /// The canonical `"<participants>|<zone>"` string.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn zone_id(&self) -> i32 {
        self.zone_id
    }

    /// The deterministic participants segment of the key.
    pub fn participants_key(&self) -> &str {
        &self.key[..self.split]
    }

    /// Iterate participants in canonical order.
    pub fn participants(&self) -> impl Iterator<Item = &str> {
        self.participants_key().split(PARTICIPANT_SEPARATOR)
    }
}

fn validate_entity_id(id: &str) -> crate::Result<()> {
    if id.is_empty() {
        return Err(crate::Error::InvalidAssociation(
            "participant id cannot be empty".to_string(),
        ));
    }
    if id.contains(PARTICIPANT_SEPARATOR) || id.contains(ZONE_SEPARATOR) {
        return Err(crate::Error::InvalidAssociation(format!(
            "participant id {id:?} contains a reserved separator"
        )));
    }
    Ok(())
}

impl PartialEq for Association {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Association {}

impl Hash for Association {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Debug for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Association({})", self.key)
    }
}

impl fmt::Display for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl TryFrom<String> for Association {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<Association> for String {
    fn from(value: Association) -> Self {
        value.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_is_order_independent() {
        let orderings: [&[&str]; 6] = [
            &["ana", "bo", "cy"],
            &["ana", "cy", "bo"],
            &["bo", "ana", "cy"],
            &["bo", "cy", "ana"],
            &["cy", "ana", "bo"],
            &["cy", "bo", "ana"],
        ];
        let expected = Association::build(42, ["ana", "bo", "cy"]).unwrap();
        for ids in orderings {
            let association = Association::build(42, ids.iter()).unwrap();
            assert_eq!(association, expected);
            assert_eq!(association.key(), "ana,bo,cy|42");
        }
    }

    #[test]
    fn test_build_deduplicates() {
        let association = Association::build(7, ["p2", "p1", "p2", "p1"]).unwrap();
        assert_eq!(association.key(), "p1,p2|7");
        assert_eq!(association.participants().collect::<Vec<_>>(), ["p1", "p2"]);
    }

    #[test]
    fn test_zone_distinguishes_associations() {
        let a = Association::build(1, ["x"]).unwrap();
        let b = Association::build(2, ["x"]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_roundtrip() {
        for association in [
            Association::build(0, ["Player-1"]).unwrap(),
            Association::build(-15, ["b", "a"]).unwrap(),
            Association::build(i32::MAX, ["Creature-0-1", "Player-9"]).unwrap(),
        ] {
            let parsed = Association::parse(association.key()).unwrap();
            assert_eq!(parsed, association);
            assert_eq!(parsed.zone_id(), association.zone_id());
            assert_eq!(parsed.participants_key(), association.participants_key());
        }
    }

    #[test]
    fn test_parse_rejects_non_canonical() {
        assert!(Association::parse("b,a|1").is_err());
        assert!(Association::parse("a,a|1").is_err());
        assert!(Association::parse("a|01").is_err());
        assert!(Association::parse("a|zone").is_err());
        assert!(Association::parse("a").is_err());
        assert!(Association::parse("|1").is_err());
    }

    #[test]
    fn test_build_rejects_reserved_characters() {
        assert!(Association::build(1, ["a,b"]).is_err());
        assert!(Association::build(1, ["a|b"]).is_err());
        assert!(Association::build(1, [""]).is_err());
        assert!(Association::build(1, Vec::<String>::new()).is_err());
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let association = Association::build(3, ["z", "y"]).unwrap();
        let json = serde_json::to_string(&association).unwrap();
        assert_eq!(json, "\"y,z|3\"");
        let decoded: Association = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, association);
    }
}
