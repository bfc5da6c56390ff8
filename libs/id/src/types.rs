//! Concrete ID types for Grafana resources.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::define_numeric_id;
use crate::IdError;

define_numeric_id!(OrgId, "organization");
define_numeric_id!(UserId, "user");
define_numeric_id!(DataSourceId, "data source");
define_numeric_id!(FolderId, "folder");
define_numeric_id!(DashboardId, "dashboard");

/// Opaque string UID assigned by Grafana to folders, dashboards and data sources.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Uid(String);

impl Uid {
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Uid {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Uid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Uid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Uid::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A UID qualified by the organization that owns it, rendered as `org:uid`.
///
/// Folders and dashboards record this composite as their external identity
/// because a UID is only unique within one organization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopedUid {
    pub org: OrgId,
    pub uid: Uid,
}

impl ScopedUid {
    pub fn new(org: OrgId, uid: Uid) -> Self {
        Self { org, uid }
    }

    /// Parses `org:uid`. The UID part may itself contain colons.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IdError::Empty);
        }

        let (org, uid) = s
            .split_once(':')
            .ok_or_else(|| IdError::MissingSeparator(s.to_string()))?;

        Ok(Self {
            org: OrgId::parse(org)?,
            uid: Uid::parse(uid)?,
        })
    }
}

impl fmt::Display for ScopedUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.org, self.uid)
    }
}

impl FromStr for ScopedUid {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ScopedUid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ScopedUid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ScopedUid::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Reference to a folder by numeric ID or by UID.
///
/// Dashboard searches filter with `folderIds` for the former and
/// `folderUIDs` for the latter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FolderSelector {
    Id(FolderId),
    Uid(Uid),
}

impl FolderSelector {
    /// Parses an integer as a folder ID, anything else as a UID.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        match s.parse::<i64>() {
            Ok(id) => Ok(Self::Id(FolderId::new(id))),
            Err(_) => Ok(Self::Uid(Uid::parse(s)?)),
        }
    }
}

impl fmt::Display for FolderSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Uid(uid) => write!(f, "{uid}"),
        }
    }
}

impl FromStr for FolderSelector {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for FolderSelector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Id(id) => id.serialize(serializer),
            Self::Uid(uid) => uid.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for FolderSelector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(id) => Ok(Self::Id(FolderId::new(id))),
            Raw::Str(s) => FolderSelector::parse(&s).map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_id_parse_and_display() {
        let id: OrgId = "42".parse().unwrap();
        assert_eq!(id.value(), 42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(OrgId::parse(" 7 ").unwrap(), OrgId::new(7));
    }

    #[test]
    fn test_numeric_id_rejects_garbage() {
        assert_eq!(OrgId::parse(""), Err(IdError::Empty));
        let err = DataSourceId::parse("abc").unwrap_err();
        assert!(err.to_string().contains("data source"));
    }

    #[test]
    fn test_numeric_id_serde_is_bare_integer() {
        let id = UserId::new(5);
        assert_eq!(serde_json::to_string(&id).unwrap(), "5");
        let back: UserId = serde_json::from_str("5").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_uid_rejects_empty() {
        assert!(Uid::parse("  ").unwrap_err().is_empty());
        assert!(serde_json::from_str::<Uid>("\"\"").is_err());
    }

    #[test]
    fn test_scoped_uid_format() {
        let scoped = ScopedUid::new(OrgId::new(3), Uid::parse("abc").unwrap());
        assert_eq!(scoped.to_string(), "3:abc");

        let parsed = ScopedUid::parse("3:abc").unwrap();
        assert_eq!(parsed, scoped);
    }

    #[test]
    fn test_scoped_uid_keeps_colons_in_uid() {
        let parsed = ScopedUid::parse("1:a:b").unwrap();
        assert_eq!(parsed.org, OrgId::new(1));
        assert_eq!(parsed.uid.as_str(), "a:b");
    }

    #[test]
    fn test_scoped_uid_errors() {
        assert!(matches!(
            ScopedUid::parse("nocolon"),
            Err(IdError::MissingSeparator(_))
        ));
        assert!(matches!(
            ScopedUid::parse("x:abc"),
            Err(IdError::NotNumeric { .. })
        ));
        assert_eq!(ScopedUid::parse("1:"), Err(IdError::Empty));
    }

    #[test]
    fn test_folder_selector_prefers_integer() {
        assert_eq!(
            FolderSelector::parse("12").unwrap(),
            FolderSelector::Id(FolderId::new(12))
        );
        assert_eq!(
            FolderSelector::parse("general-x").unwrap(),
            FolderSelector::Uid(Uid::parse("general-x").unwrap())
        );
    }

    #[test]
    fn test_folder_selector_serde_accepts_both_forms() {
        let by_id: FolderSelector = serde_json::from_str("9").unwrap();
        assert_eq!(by_id, FolderSelector::Id(FolderId::new(9)));

        let by_str_int: FolderSelector = serde_json::from_str("\"9\"").unwrap();
        assert_eq!(by_str_int, by_id);

        let by_uid: FolderSelector = serde_json::from_str("\"ops\"").unwrap();
        assert_eq!(serde_json::to_string(&by_uid).unwrap(), "\"ops\"");
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn scoped_uid_display_parse(org in any::<i64>(), uid in "[A-Za-z0-9_:-]{1,40}") {
                let scoped = ScopedUid::new(OrgId::new(org), Uid::parse(&uid).unwrap());
                let parsed = ScopedUid::parse(&scoped.to_string()).unwrap();
                prop_assert_eq!(parsed, scoped);
            }
        }
    }
}
