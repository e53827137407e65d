//! Required-group authorization.
//!
//! A principal is authorized iff it holds *every* configured group.  Group
//! names are compared by exact string match.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupName(String);

impl GroupName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The set of groups a principal must fully hold.  Empty authorizes everyone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequiredGroups(BTreeSet<GroupName>);

impl RequiredGroups {
    pub fn from_list<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            names
                .into_iter()
                .map(Into::into)
                .filter(|name: &String| !name.is_empty())
                .map(GroupName)
                .collect(),
        )
    }

    /// Parse a comma separated list, skipping empty segments.
    pub fn from_csv(csv: &str) -> Self {
        Self::from_list(csv.split(',').map(str::trim))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GroupName> {
        self.0.iter()
    }

    /// First required group not present in `user_groups`.  `None` means the
    /// user holds every required group.
    pub fn missing<S: AsRef<str>>(&self, user_groups: &[S]) -> Option<&GroupName> {
        self.0
            .iter()
            .find(|required| !user_groups.iter().any(|g| g.as_ref() == required.as_str()))
    }
}
