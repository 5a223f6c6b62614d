//! Pure diffing of desired against current endpoints.
//!
//! [`plan`] is a side-effect-free function from two endpoint sets to the
//! triple of creates, updates, and deletes that converges current onto
//! desired. Output order is deterministic so that provider calls replay
//! identically for identical inputs.

use std::collections::HashMap;

use crate::endpoint::{Endpoint, EndpointKey};

/// A single planned mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Create all records behind the endpoint.
    Create(Endpoint),
    /// Rewrite the records behind the key to this endpoint's shape.
    UpdateTo(Endpoint),
    /// Remove all records behind the endpoint.
    Delete(Endpoint),
}

/// Ordered triple of creates, updates, and deletes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Endpoints present in desired but not in current.
    pub creates: Vec<Endpoint>,
    /// Endpoints present in both whose comparable tuple differs; these are
    /// the desired (target) shapes.
    pub updates: Vec<Endpoint>,
    /// Endpoints present in current but not in desired; these carry the
    /// observed (owned) shapes.
    pub deletes: Vec<Endpoint>,
}

impl Plan {
    /// A plan that only deletes the given endpoints.
    pub fn deletion_only(deletes: Vec<Endpoint>) -> Self {
        let mut plan = Plan {
            deletes,
            ..Default::default()
        };
        sort_endpoints(&mut plan.deletes);
        plan
    }

    /// True when nothing needs to change.
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Total number of planned changes.
    pub fn len(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len()
    }

    /// Iterate changes in apply order: creates, then updates, then deletes.
    pub fn changes(&self) -> impl Iterator<Item = Change> + '_ {
        self.creates
            .iter()
            .cloned()
            .map(Change::Create)
            .chain(self.updates.iter().cloned().map(Change::UpdateTo))
            .chain(self.deletes.iter().cloned().map(Change::Delete))
    }
}

fn sort_endpoints(endpoints: &mut [Endpoint]) {
    endpoints.sort_by(|a, b| a.key().cmp(&b.key()));
}

/// Compute the changes that converge `current` onto `desired`.
///
/// Keys are `(dns_name lowercased, record_type)`. An endpoint in both sets
/// becomes an update only when [`Endpoint::needs_update`] says its
/// comparable tuple differs. All three lists come back sorted by key.
pub fn plan(desired: &[Endpoint], current: &[Endpoint]) -> Plan {
    let current_by_key: HashMap<EndpointKey, &Endpoint> =
        current.iter().map(|ep| (ep.key(), ep)).collect();
    let desired_by_key: HashMap<EndpointKey, &Endpoint> =
        desired.iter().map(|ep| (ep.key(), ep)).collect();

    let mut plan = Plan::default();

    for ep in desired {
        match current_by_key.get(&ep.key()) {
            None => plan.creates.push(ep.clone()),
            Some(cur) if cur.needs_update(ep) => plan.updates.push(ep.clone()),
            Some(_) => {}
        }
    }

    for ep in current {
        if !desired_by_key.contains_key(&ep.key()) {
            plan.deletes.push(ep.clone());
        }
    }

    sort_endpoints(&mut plan.creates);
    sort_endpoints(&mut plan.updates);
    sort_endpoints(&mut plan.deletes);
    plan
}
