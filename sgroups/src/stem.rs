//! Hierarchy of sgroup identifiers.
//!
//! With separator `.` and root `""`: `a.b.c` is a group whose parents are `a.b.`, `a.` and the
//! root stem `""`.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SgroupsError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StemConfig {
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default)]
    pub root_id: String,
}

fn default_separator() -> String {
    ".".to_string()
}

impl Default for StemConfig {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            root_id: String::new(),
        }
    }
}

impl StemConfig {
    pub fn is_stem(&self, id: &str) -> bool {
        id == self.root_id || id.ends_with(&self.separator)
    }

    pub fn validate_sgroup_id(&self, id: &str) -> Result<()> {
        if id == self.root_id {
            return Ok(());
        }
        let invalid = |reason: &str| SgroupsError::InvalidId {
            id: id.to_string(),
            reason: reason.to_string(),
        };
        let id_ = id.strip_suffix(self.separator.as_str()).unwrap_or(id);
        for segment in id_.split(self.separator.as_str()) {
            if segment.is_empty() {
                return Err(invalid("empty segment"));
            }
            if let Some(c) = segment
                .chars()
                .find(|c| !(c.is_alphanumeric() || *c == '_' || *c == '-'))
            {
                return Err(invalid(&format!("invalid character {:?}", c)));
            }
        }
        Ok(())
    }

    /// `None` only for the root stem
    pub fn parent_stem(&self, id: &str) -> Option<String> {
        if id == self.root_id {
            return None;
        }
        let id_ = id.strip_suffix(self.separator.as_str()).unwrap_or(id);
        Some(match id_.rfind(self.separator.as_str()) {
            Some(pos) => id_[..pos + self.separator.len()].to_string(),
            None => self.root_id.clone(),
        })
    }

    /// Nearest parent first, root last
    pub fn parent_stems(&self, id: &str) -> Vec<String> {
        let mut stems = Vec::new();
        let mut current = id.to_string();
        while let Some(parent) = self.parent_stem(&current) {
            stems.push(parent.clone());
            current = parent;
        }
        stems
    }

    /// Whether `id` is below `stem` with at least one stem in between
    pub fn is_grandchild(&self, stem: &str, id: &str) -> bool {
        match id.strip_prefix(stem) {
            Some(sub) => {
                let sub = sub.strip_suffix(self.separator.as_str()).unwrap_or(sub);
                sub.contains(self.separator.as_str())
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn dot() -> StemConfig {
        StemConfig::default()
    }

    #[rstest]
    #[case("a.b.c", Some("a.b."))]
    #[case("a.b.c.", Some("a.b."))]
    #[case("a", Some(""))]
    #[case("a.", Some(""))]
    #[case("", None)]
    fn test_parent_stem(#[case] id: &str, #[case] expected: Option<&str>) {
        assert_eq!(dot().parent_stem(id).as_deref(), expected);
    }

    #[test]
    fn test_parent_stems() {
        assert_eq!(dot().parent_stems("a.b.c"), vec!["a.b.", "a.", ""]);
        assert_eq!(dot().parent_stems("a."), vec![""]);
        assert!(dot().parent_stems("").is_empty());
    }

    #[test]
    fn test_other_separator() {
        let stem = StemConfig {
            separator: ":".to_string(),
            root_id: String::new(),
        };
        assert_eq!(stem.parent_stem("a:b:c").as_deref(), Some("a:b:"));
        assert_eq!(stem.parent_stems("a:b:c:"), vec!["a:", ""]);
        assert!(stem.is_stem("a:"));
        assert!(!stem.is_stem("a.b"));
        assert!(stem.validate_sgroup_id("a:b-c").is_ok());
        assert!(stem.validate_sgroup_id("a.b").is_err());
    }

    #[test]
    fn test_parent_stems_shrink_to_root() {
        let stem = dot();
        for id in ["a", "a.", "a.b", "a.b.", "x.y.z.t", "x.y.z.t."] {
            let parents = stem.parent_stems(id);
            assert_eq!(parents.last().map(|s| s.as_str()), Some(""));
            let mut previous = id.len();
            for parent in &parents {
                assert!(parent.len() < previous);
                assert!(id.starts_with(parent.as_str()));
                previous = parent.len();
            }
        }
    }

    #[rstest]
    #[case("a.b.c")]
    #[case("a.b.c.")]
    #[case("a")]
    #[case("a.")]
    #[case("")]
    #[case("a.b-c_D")]
    fn test_validate_ok(#[case] id: &str) {
        assert!(dot().validate_sgroup_id(id).is_ok());
    }

    #[rstest]
    #[case(".a")]
    #[case(".")]
    #[case("a..b")]
    #[case("a[")]
    #[case("a,")]
    fn test_validate_err(#[case] id: &str) {
        let err = dot().validate_sgroup_id(id).unwrap_err();
        assert!(matches!(err, SgroupsError::InvalidId { .. }));
    }

    #[test]
    fn test_is_grandchild() {
        let stem = dot();
        assert!(stem.is_grandchild("a.", "a.b.c"));
        assert!(!stem.is_grandchild("a.", "a.b"));
        assert!(!stem.is_grandchild("a.", "a.b."));
        assert!(stem.is_grandchild("", "a.b"));
        assert!(!stem.is_grandchild("", "b."));
    }

    #[test]
    fn test_is_stem() {
        assert!(dot().is_stem(""));
        assert!(dot().is_stem("a."));
        assert!(!dot().is_stem("a.b"));
    }
}
