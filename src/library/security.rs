//! Access-control decisions.
//!
//! ACLs are maps from resource id to the set of principal ids allowed.
//! Lookup order: the resource's own ACL wins outright; under the collection
//! namespace an undeclared resource inherits the nearest declared ancestor;
//! anything still undecided is permitted. Administrators and a principal
//! that controls the resource (it lies inside their own subtree) pass any
//! declared ACL. Parent-library policy is applied by the caller and binds
//! before any of this.

use std::collections::{BTreeMap, BTreeSet};

use crate::library::thing::ThingId;

/// The identity a query runs as.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Principal {
    pub id: Option<ThingId>,
    pub groups: BTreeSet<ThingId>,
    pub administrator: bool,
}

impl Principal {
    /// No identity at all. Passes only undeclared resources.
    pub fn anonymous() -> Principal {
        Principal::default()
    }

    pub fn user(id: &str) -> Principal {
        Principal {
            id: Some(ThingId::new(id)),
            ..Principal::default()
        }
    }

    pub fn administrator() -> Principal {
        Principal {
            administrator: true,
            ..Principal::default()
        }
    }

    pub fn with_group(mut self, id: &str) -> Principal {
        self.groups.insert(ThingId::new(id));
        self
    }

    /// A principal controls every resource inside their own subtree.
    pub fn controls(&self, resource: &ThingId) -> bool {
        match &self.id {
            Some(id) => resource.is_under(id),
            None => false,
        }
    }

    fn member_of(&self, acl: &BTreeSet<ThingId>) -> bool {
        if let Some(id) = &self.id {
            if acl.contains(id) {
                return true;
            }
        }
        self.groups.iter().any(|g| acl.contains(g))
    }
}

pub(crate) type AclMap = BTreeMap<ThingId, BTreeSet<ThingId>>;

/// Resolve one ACL map against a resource.
///
/// `Some(granted)` when an ACL in the chain decided, `None` when nothing
/// declares one (the caller's default is permit).
pub(crate) fn decide(
    acls: &AclMap,
    collections_root: &ThingId,
    resource: &ThingId,
    principal: &Principal,
) -> Option<bool> {
    if let Some(acl) = acls.get(resource) {
        return Some(passes(acl, resource, principal));
    }
    if resource.is_under(collections_root) {
        let mut cursor = resource.parent();
        while let Some(id) = cursor {
            if !id.is_under(collections_root) {
                break;
            }
            if let Some(acl) = acls.get(&id) {
                return Some(passes(acl, resource, principal));
            }
            cursor = id.parent();
        }
    }
    None
}

fn passes(acl: &BTreeSet<ThingId>, resource: &ThingId, principal: &Principal) -> bool {
    principal.administrator || principal.controls(resource) || principal.member_of(acl)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acl_map(entries: &[(&str, &[&str])]) -> AclMap {
        entries
            .iter()
            .map(|(resource, members)| {
                (
                    ThingId::new(resource),
                    members.iter().map(|m| ThingId::new(m)).collect(),
                )
            })
            .collect()
    }

    fn collections() -> ThingId {
        ThingId::new("/collections")
    }

    #[test]
    fn own_acl_admits_members_only() {
        let acls = acl_map(&[("/types/books/x", &["/people/alice"])]);
        let resource = ThingId::new("/types/books/x");

        let alice = Principal::user("/people/alice");
        let bob = Principal::user("/people/bob");
        assert_eq!(decide(&acls, &collections(), &resource, &alice), Some(true));
        assert_eq!(decide(&acls, &collections(), &resource, &bob), Some(false));
        assert_eq!(
            decide(&acls, &collections(), &resource, &Principal::anonymous()),
            Some(false)
        );
    }

    #[test]
    fn group_membership_admits() {
        let acls = acl_map(&[("/types/books/x", &["/groups/readers"])]);
        let resource = ThingId::new("/types/books/x");
        let carol = Principal::user("/people/carol").with_group("/groups/readers");
        assert_eq!(decide(&acls, &collections(), &resource, &carol), Some(true));
    }

    #[test]
    fn administrator_passes_any_acl() {
        let acls = acl_map(&[("/types/books/x", &["/people/alice"])]);
        let resource = ThingId::new("/types/books/x");
        assert_eq!(
            decide(&acls, &collections(), &resource, &Principal::administrator()),
            Some(true)
        );
    }

    #[test]
    fn controlling_principal_passes_any_acl() {
        let acls = acl_map(&[("/people/alice/notes", &["/people/bob"])]);
        let resource = ThingId::new("/people/alice/notes");
        let alice = Principal::user("/people/alice");
        assert_eq!(decide(&acls, &collections(), &resource, &alice), Some(true));
    }

    #[test]
    fn collection_descendants_inherit_nearest_ancestor() {
        let acls = acl_map(&[("/collections/family", &["/people/alice"])]);
        let nested = ThingId::new("/collections/family/photos/summer");

        let alice = Principal::user("/people/alice");
        let bob = Principal::user("/people/bob");
        assert_eq!(decide(&acls, &collections(), &nested, &alice), Some(true));
        assert_eq!(decide(&acls, &collections(), &nested, &bob), Some(false));
    }

    #[test]
    fn own_acl_shadows_ancestors() {
        let acls = acl_map(&[
            ("/collections/family", &["/people/alice"]),
            ("/collections/family/public", &["/people/bob"]),
        ]);
        let resource = ThingId::new("/collections/family/public");

        let bob = Principal::user("/people/bob");
        let alice = Principal::user("/people/alice");
        assert_eq!(decide(&acls, &collections(), &resource, &bob), Some(true));
        assert_eq!(decide(&acls, &collections(), &resource, &alice), Some(false));
    }

    #[test]
    fn inheritance_stops_outside_the_collection_namespace() {
        let acls = acl_map(&[("/types", &["/people/alice"])]);
        let resource = ThingId::new("/types/books/x");
        let bob = Principal::user("/people/bob");
        // No own ACL and not under /collections, so nothing decides.
        assert_eq!(decide(&acls, &collections(), &resource, &bob), None);
    }

    #[test]
    fn undeclared_resources_are_undecided() {
        let acls = AclMap::new();
        assert_eq!(
            decide(
                &acls,
                &collections(),
                &ThingId::new("/anything"),
                &Principal::anonymous()
            ),
            None
        );
    }
}
