//! The rights lattice: `reader < updater < admin`, and `Mright` which adds `member` below them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SgroupsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Right {
    Reader,
    Updater,
    Admin,
}

/// "member or right"
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mright {
    Member,
    Reader,
    Updater,
    Admin,
}

impl Right {
    /// Best right first
    pub const ALL: [Right; 3] = [Right::Admin, Right::Updater, Right::Reader];

    /// Rights at least as strong as `self`, best first
    pub fn allowed_rights(self) -> Vec<Right> {
        Right::ALL.into_iter().filter(|r| *r >= self).collect()
    }

    /// `None` is the bottom element
    pub fn max(a: Option<Right>, b: Option<Right>) -> Option<Right> {
        a.max(b)
    }

    pub fn to_mright(self) -> Mright {
        match self {
            Right::Reader => Mright::Reader,
            Right::Updater => Mright::Updater,
            Right::Admin => Mright::Admin,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.to_mright().as_str()
    }
}

impl Mright {
    pub const ALL: [Mright; 4] = [Mright::Member, Mright::Reader, Mright::Updater, Mright::Admin];

    pub fn to_right(self) -> Option<Right> {
        match self {
            Mright::Member => None,
            Mright::Reader => Some(Right::Reader),
            Mright::Updater => Some(Right::Updater),
            Mright::Admin => Some(Right::Admin),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mright::Member => "member",
            Mright::Reader => "reader",
            Mright::Updater => "updater",
            Mright::Admin => "admin",
        }
    }
}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Mright {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mright {
    type Err = SgroupsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mright::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| SgroupsError::InvalidAttrs(format!("unknown mright {:?}", s)))
    }
}

impl FromStr for Right {
    type Err = SgroupsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Mright>()?
            .to_right()
            .ok_or_else(|| SgroupsError::InvalidAttrs(format!("unknown right {:?}", s)))
    }
}
