use serde::{Deserialize, Serialize};

use crate::ChannelId;

/// One alliance a community accepts applications for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alliance {
    pub name: String,
    /// Channel where leaders review new applications.
    #[serde(with = "crate::events::snowflake")]
    pub review_channel: ChannelId,
    /// Role granted on approval. Defaults to the alliance name.
    #[serde(default)]
    pub role: Option<String>,
}

impl Alliance {
    pub fn member_role(&self) -> &str {
        self.role.as_deref().unwrap_or(&self.name)
    }
}

/// The closed set of alliance names commands may reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllianceSet {
    alliances: Vec<Alliance>,
}

impl AllianceSet {
    pub fn new(alliances: Vec<Alliance>) -> Self {
        let alliances = alliances
            .into_iter()
            .map(|mut a| {
                a.name = a.name.trim().to_uppercase();
                a
            })
            .collect();
        Self { alliances }
    }

    /// Case-insensitive lookup. `None` means the value is outside the enumeration.
    pub fn resolve(&self, name: &str) -> Option<&Alliance> {
        let name = name.trim();
        self.alliances
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.alliances.iter().map(|a| a.name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.alliances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> AllianceSet {
        AllianceSet::new(vec![
            Alliance { name: "nona".into(), review_channel: 10, role: None },
            Alliance { name: "WOLF".into(), review_channel: 11, role: Some("Wolfpack".into()) },
        ])
    }

    #[test]
    fn names_are_uppercased_and_resolved_case_insensitively() {
        let set = set();
        assert_eq!(set.resolve("Nona").map(|a| a.name.as_str()), Some("NONA"));
        assert_eq!(set.resolve(" wolf ").map(|a| a.review_channel), Some(11));
        assert!(set.resolve("BEAR").is_none());
    }

    #[test]
    fn member_role_falls_back_to_name() {
        let set = set();
        assert_eq!(set.resolve("NONA").unwrap().member_role(), "NONA");
        assert_eq!(set.resolve("WOLF").unwrap().member_role(), "Wolfpack");
    }
}
