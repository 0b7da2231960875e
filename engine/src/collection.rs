//! The finite set of collections a mutation can target.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A remote collection holding one kind of finance entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Expenses,
    Subscriptions,
    /// The user's budget document(s)
    Budget,
}

impl Collection {
    /// Every collection, in refresh order.
    pub const ALL: [Collection; 3] = [
        Collection::Expenses,
        Collection::Subscriptions,
        Collection::Budget,
    ];

    /// Name used on the wire and in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Expenses => "expenses",
            Collection::Subscriptions => "subscriptions",
            Collection::Budget => "budget",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "expenses" => Ok(Collection::Expenses),
            "subscriptions" => Ok(Collection::Subscriptions),
            "budget" => Ok(Collection::Budget),
            other => Err(Error::UnknownCollection(other.to_string())),
        }
    }
}
