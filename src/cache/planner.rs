//! Invalidation plan generation.
//!
//! Turns one completed mutation into the minimal set of purge targets,
//! consulting a static table of cross-resource dependencies.

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

use crate::domain::types::{Operation, ResourceId, ResourceType, SiteId};

use super::keys::Purge;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidationError {
    #[error("{operation} on {resource} requires a resource id")]
    MissingId {
        resource: ResourceType,
        operation: Operation,
    },
}

/// A mutation that has been acknowledged by the upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationEvent {
    pub site: SiteId,
    pub resource: ResourceType,
    pub operation: Operation,
    pub id: Option<ResourceId>,
}

impl MutationEvent {
    pub fn new(
        site: SiteId,
        resource: ResourceType,
        operation: Operation,
        id: Option<ResourceId>,
    ) -> Self {
        Self {
            site,
            resource,
            operation,
            id,
        }
    }
}

/// Resource types whose cached views embed `resource` and therefore go stale
/// when it changes.
pub fn dependents(resource: ResourceType) -> &'static [ResourceType] {
    match resource {
        // Term counts shift when a post gains or loses terms.
        ResourceType::Post => &[ResourceType::Category, ResourceType::Tag],
        ResourceType::Page => &[],
        // Featured media is embedded in post and page views.
        ResourceType::Media => &[ResourceType::Post, ResourceType::Page],
        // Author data is embedded in content and comment views.
        ResourceType::User => &[ResourceType::Post, ResourceType::Page, ResourceType::Comment],
        ResourceType::Comment => &[ResourceType::Post],
        ResourceType::Category | ResourceType::Tag => &[ResourceType::Post],
        ResourceType::Settings => &[],
    }
}

/// Targets to purge for one mutation, ordered and de-duplicated.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InvalidationPlan {
    purges: BTreeSet<Purge>,
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (index, purge) in self.purges.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{purge}")?;
        }
        f.write_str("]")
    }
}

impl InvalidationPlan {
    /// Compute the purge set for a mutation. Pure.
    ///
    /// - `update`/`delete`: the item, every list of its type, every dependent type
    /// - `create`: every list of its type, nothing else
    /// - singletons: the whole resource type on any operation
    pub fn for_mutation(event: &MutationEvent) -> Result<Self, InvalidationError> {
        let MutationEvent {
            site,
            resource,
            operation,
            id,
        } = event;
        let mut plan = Self::default();

        if resource.is_singleton() {
            plan.purges.insert(Purge::resource(site, *resource));
            return Ok(plan);
        }

        plan.purges.insert(Purge::collection(site, *resource));
        if *operation == Operation::Create {
            return Ok(plan);
        }

        let id = id.as_ref().ok_or(InvalidationError::MissingId {
            resource: *resource,
            operation: *operation,
        })?;
        plan.purges.insert(Purge::item(site, *resource, id));
        for dependent in dependents(*resource) {
            plan.purges.insert(Purge::resource(site, *dependent));
        }

        Ok(plan)
    }

    /// Fallback plan when the precise set cannot be computed.
    pub fn whole_site(site: &SiteId) -> Self {
        Self {
            purges: BTreeSet::from([Purge::Site(site.clone())]),
        }
    }

    pub fn purges(&self) -> impl Iterator<Item = &Purge> {
        self.purges.iter()
    }

    pub fn contains(&self, purge: &Purge) -> bool {
        self.purges.contains(purge)
    }

    pub fn len(&self) -> usize {
        self.purges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.purges.is_empty()
    }

    pub fn into_vec(self) -> Vec<Purge> {
        self.purges.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(name: &str) -> SiteId {
        SiteId::new(name).expect("valid site")
    }

    fn event(resource: ResourceType, operation: Operation, id: Option<u64>) -> MutationEvent {
        MutationEvent::new(site("blog"), resource, operation, id.map(ResourceId::from))
    }

    #[test]
    fn create_purges_only_collections() {
        let plan = InvalidationPlan::for_mutation(&event(ResourceType::Post, Operation::Create, None))
            .expect("plan");
        let rendered: Vec<String> = plan.purges().map(ToString::to_string).collect();

        assert_eq!(rendered, vec!["blog:post:list:*".to_string()]);
    }

    #[test]
    fn update_purges_item_lists_and_dependents() {
        let blog = site("blog");
        let plan =
            InvalidationPlan::for_mutation(&event(ResourceType::Post, Operation::Update, Some(42)))
                .expect("plan");

        assert!(plan.contains(&Purge::item(&blog, ResourceType::Post, &ResourceId::from(42))));
        assert!(plan.contains(&Purge::collection(&blog, ResourceType::Post)));
        assert!(plan.contains(&Purge::resource(&blog, ResourceType::Category)));
        assert!(plan.contains(&Purge::resource(&blog, ResourceType::Tag)));
        assert_eq!(plan.len(), 4);
    }

    #[test]
    fn delete_matches_update() {
        let update =
            InvalidationPlan::for_mutation(&event(ResourceType::Media, Operation::Update, Some(7)))
                .expect("plan");
        let delete =
            InvalidationPlan::for_mutation(&event(ResourceType::Media, Operation::Delete, Some(7)))
                .expect("plan");
        assert_eq!(update, delete);
    }

    #[test]
    fn every_purge_stays_on_the_mutated_site() {
        for resource in ResourceType::ALL {
            let plan = InvalidationPlan::for_mutation(&event(resource, Operation::Update, Some(1)))
                .expect("plan");
            assert!(plan.purges().all(|purge| purge.site() == &site("blog")));
        }
    }

    #[test]
    fn update_without_id_is_a_fault() {
        let err = InvalidationPlan::for_mutation(&event(ResourceType::Page, Operation::Delete, None))
            .unwrap_err();
        assert_eq!(
            err,
            InvalidationError::MissingId {
                resource: ResourceType::Page,
                operation: Operation::Delete,
            }
        );
    }

    #[test]
    fn singleton_changes_purge_the_whole_type() {
        let blog = site("blog");
        let plan = InvalidationPlan::for_mutation(&event(ResourceType::Settings, Operation::Update, None))
            .expect("plan");
        assert_eq!(plan.into_vec(), vec![Purge::resource(&blog, ResourceType::Settings)]);
    }

    #[test]
    fn user_changes_reach_embedded_author_views() {
        let blog = site("blog");
        let plan = InvalidationPlan::for_mutation(&event(ResourceType::User, Operation::Update, Some(3)))
            .expect("plan");
        for dependent in [ResourceType::Post, ResourceType::Page, ResourceType::Comment] {
            assert!(plan.contains(&Purge::resource(&blog, dependent)));
        }
    }

    #[test]
    fn display_lists_targets() {
        let plan = InvalidationPlan::whole_site(&site("blog"));
        assert_eq!(plan.to_string(), "[blog:*]");
    }
}
