//! Types returned by the rights resolver.

use serde::{Deserialize, Serialize};
use sgroups::{GroupId, MonoAttrs, Right};

/// An sgroup with the right of the current user on it
///
/// For ancestors, `right` includes what is inherited from the stems above.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SgroupAndRight {
    pub sgroup_id: GroupId,
    pub attrs: MonoAttrs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right: Option<Right>,
}
