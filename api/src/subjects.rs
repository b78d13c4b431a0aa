//! Displayed attributes of subjects: people from the subject sources, and sgroups.

use directory::{Entry, Filter, ENTRY_DN};
use sgroups::{DirectOptions, DnsOpts, Result, SubjectId};
use std::collections::BTreeMap;
use tracing::debug;

use crate::models::{SubjectAttrs, Subjects};
use crate::SgroupsService;

/// DNs are looked up by batches
const CHUNK_SIZE: usize = 10;

fn parent_dn(dn: &str) -> Option<&str> {
    dn.split_once(',').map(|(_, parent)| parent)
}

impl SgroupsService {
    fn to_subject(&self, entry: Entry, options: DirectOptions) -> (SubjectId, SubjectAttrs) {
        let dn = SubjectId::from(entry.dn.clone());
        let sgroup_id = self.config.dn_to_sgroup_id(&entry.dn);
        let attrs = match &sgroup_id {
            Some(id) => self.config.sgroup_mono_attrs(id, &entry),
            None => entry
                .attrs
                .into_iter()
                .filter_map(|(name, values)| Some((name, values.into_iter().next()?)))
                .collect(),
        };
        (
            dn,
            SubjectAttrs {
                attrs,
                sgroup_id,
                options,
            },
        )
    }

    /// Search filter and displayed attributes of the branch holding `parent_dn`
    fn branch_search(&self, parent_dn: &str, search_token: Option<&str>) -> Result<Option<(Option<Filter>, Vec<String>)>> {
        if parent_dn == self.config.directory.groups_dn {
            let filter = search_token
                .map(|term| self.sgroup_term_filter(term))
                .transpose()?;
            let attrs = self.config.sgroup_attr_names().into_iter().map(String::from).collect();
            return Ok(Some((filter, attrs)));
        }
        let Some(sscfg) = self.config.subject_source(parent_dn) else {
            return Ok(None);
        };
        let filter = search_token
            .map(|term| Filter::parse(&sscfg.search_filter_(term)))
            .transpose()?;
        Ok(Some((filter, sscfg.display_attrs.clone())))
    }

    /// Displayed attributes of the subjects. Subjects outside the subject sources are omitted.
    ///
    /// `size_limit` applies to each branch.
    pub async fn get_subjects(
        &self,
        dns: &DnsOpts,
        search_token: Option<&str>,
        size_limit: Option<usize>,
    ) -> Result<Subjects> {
        let mut by_parent: BTreeMap<&str, Vec<&SubjectId>> = BTreeMap::new();
        for dn in dns.keys() {
            if let Some(parent) = parent_dn(dn.as_str()) {
                by_parent.entry(parent).or_default().push(dn);
            }
        }

        let mut subjects = Subjects::new();
        for (parent, dns_) in by_parent {
            let Some((term_filter, attrs)) = self.branch_search(parent, search_token)? else {
                debug!("no subject source for {}", parent);
                continue;
            };
            let attrs: Vec<&str> = attrs.iter().map(|a| a.as_str()).collect();
            let mut count = 0;
            for chunk in dns_.chunks(CHUNK_SIZE) {
                let dns_filter = Filter::or(
                    chunk
                        .iter()
                        .map(|dn| Filter::eq(ENTRY_DN, dn.as_str()))
                        .collect(),
                );
                let filter = match &term_filter {
                    Some(term_filter) => Filter::and2(dns_filter, term_filter.clone()),
                    None => dns_filter,
                };
                for entry in self.store.search(parent, &filter, &attrs, None).await? {
                    let options = dns.get(entry.dn.as_str()).cloned().unwrap_or_default();
                    let (dn, subject) = self.to_subject(entry, options);
                    subjects.insert(dn, subject);
                    count += 1;
                }
                if size_limit.is_some_and(|limit| count >= limit) {
                    break;
                }
            }
        }
        Ok(subjects)
    }

    /// Subjects matching `term` in each subject source (or only in `source_dn`)
    pub async fn search_subjects(
        &self,
        term: &str,
        size_limit: Option<usize>,
        source_dn: Option<&str>,
    ) -> Result<BTreeMap<String, Subjects>> {
        let mut result = BTreeMap::new();
        for sscfg in &self.config.subject_sources {
            if source_dn.is_some_and(|dn| dn != sscfg.dn) {
                continue;
            }
            let filter = Filter::parse(&sscfg.search_filter_(term))?;
            let attrs: Vec<&str> = sscfg.display_attrs.iter().map(|a| a.as_str()).collect();
            let subjects = self
                .store
                .search(&sscfg.dn, &filter, &attrs, size_limit)
                .await?
                .into_iter()
                .map(|entry| self.to_subject(entry, DirectOptions::default()))
                .collect();
            result.insert(sscfg.dn.clone(), subjects);
        }
        Ok(result)
    }
}
