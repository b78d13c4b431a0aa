use directory::Entry;

use crate::config::Config;
use crate::ids::GroupId;
use crate::MonoAttrs;

impl Config {
    pub fn sgroup_attr_names(&self) -> Vec<&str> {
        self.sgroup_attrs.keys().map(|k| k.as_str()).collect()
    }

    /// Displayed attributes of an sgroup entry
    pub fn sgroup_mono_attrs(&self, id: &GroupId, entry: &Entry) -> MonoAttrs {
        let mut attrs: MonoAttrs = self
            .sgroup_attrs
            .keys()
            .filter_map(|name| Some((name.clone(), entry.first(name)?.to_string())))
            .collect();
        if id.as_str() == self.stem.root_id {
            attrs.insert("ou".to_string(), "Racine".to_string());
        } else if let Some(ou) = attrs.get_mut("ou") {
            // hierarchical names are "Parent:Child"
            if let Some((_, last)) = ou.rsplit_once(':') {
                *ou = last.to_string();
            }
        }
        attrs
    }
}
