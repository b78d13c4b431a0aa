use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use authz::SgroupAndRight;
use remote_query::RemoteQuery;
use sgroups::{DirectOptions, GroupId, MonoAttrs, Periodicity, Right, SubjectId};

/// A subject (person or sgroup) with its displayed attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectAttrs {
    pub attrs: MonoAttrs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sgroup_id: Option<GroupId>,
    pub options: DirectOptions,
}

pub type Subjects = BTreeMap<SubjectId, SubjectAttrs>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectsAndCount {
    /// Number of flattened subjects, before any search or size limit
    pub count: usize,
    pub subjects: Subjects,
}

pub type SgroupsWithAttrs = BTreeMap<GroupId, MonoAttrs>;

/// Remote query of a synchronized group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteQueryDef {
    #[serde(flatten)]
    pub query: RemoteQuery,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forced_periodicity: Option<Periodicity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SgroupOutMore {
    Stem { children: SgroupsWithAttrs },
    Group { direct_members: Subjects },
    SynchronizedGroup { remote_query: RemoteQueryDef },
}

/// An sgroup as displayed: attributes, right of the user, parents, and content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SgroupAndMoreOut {
    pub attrs: MonoAttrs,
    pub right: Right,
    pub parents: Vec<SgroupAndRight>,
    #[serde(flatten)]
    pub more: SgroupOutMore,
}
