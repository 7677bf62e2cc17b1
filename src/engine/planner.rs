//! System ordering.
//!
//! The planner turns registered systems and groups into a tree of ordered
//! groups, which is flattened depth-first into the execution order used by
//! the [`crate::SystemProcessor`].
//!
//! ## Ordering rules (per group)
//! 1. **Explicit** `before` / `after` declarations are strict edges. A cycle
//!    among them is a [`BuildError::OrderingCycle`].
//! 2. **Inferred** edges come from the members' registered queries: a member
//!    that reads a component sorts before a member that writes it. An
//!    inferred edge is dropped if it would contradict an existing edge or
//!    close a cycle.
//! 3. Members whose writes overlap with no order between them keep
//!    registration order; this is logged at `warn`.
//! 4. Ties break by registration order, so the result is stable.
//!
//! A label in `before` / `after` may name any system or group. Within a
//! group, a constraint declared anywhere in a member's subtree applies to
//! that member and to the sibling whose subtree contains the label.
//! Constraints whose label resolves inside the same member are settled at a
//! deeper level.
//!
//! Queries may only be registered while a system is inside its `init`
//! phase; the access they declare feeds rule 2.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::engine::error::BuildError;
use crate::engine::query::{QueryDescriptor, SystemQuery};
use crate::engine::store::EntityStore;
use crate::engine::systems::{GroupDescriptor, SystemDescriptor};
use crate::engine::types::{Access, AccessSets, SystemID};


/// Name of the implicit top-level group.
pub const ROOT_GROUP: &str = "root";

/// One node of the planned tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlanNode {
    System(SystemID),
    Group(PlanGroup),
}

/// An ordered group of systems and nested groups.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanGroup {
    pub name: String,
    pub members: Vec<PlanNode>,
}

impl PlanGroup {
    /// Depth-first execution order.
    pub fn flatten(&self) -> Vec<SystemID> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(&self, out: &mut Vec<SystemID>) {
        for member in &self.members {
            match member {
                PlanNode::System(id) => out.push(*id),
                PlanNode::Group(group) => group.flatten_into(out),
            }
        }
    }
}

struct PlannedSystem {
    descriptor: SystemDescriptor,
    order: usize,
    access: AccessSets,
    queries: Vec<SystemQuery>,
}

struct PlannedGroup {
    descriptor: GroupDescriptor,
    order: usize,
}

#[derive(Default)]
struct Subtree<'p> {
    labels: HashSet<&'p str>,
    access: AccessSets,
    before: Vec<&'p str>,
    after: Vec<&'p str>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Member {
    System(usize),
    Group(usize),
}

/// Collects systems, groups and their query access, then orders them.

#[derive(Default)]
pub struct Planner {
    systems: Vec<PlannedSystem>,
    groups: Vec<PlannedGroup>,
    next_order: usize,
    initializing: Option<SystemID>,
}

impl Planner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a system and returns its id.
    ///
    /// ## Panics
    /// Panics if a system or group with the same name exists.

    pub fn add_system(&mut self, descriptor: SystemDescriptor) -> SystemID {
        assert!(!self.label_exists(&descriptor.name), "system `{}` registered twice", descriptor.name);
        let id = self.systems.len() as SystemID;
        self.systems.push(PlannedSystem {
            descriptor,
            order: self.next_order,
            access: AccessSets::default(),
            queries: Vec::new(),
        });
        self.next_order += 1;
        id
    }

    /// Adds a group.
    ///
    /// ## Panics
    /// Panics if a system or group with the same name exists, or if the
    /// name is the reserved root name.

    pub fn add_group(&mut self, descriptor: GroupDescriptor) {
        assert!(descriptor.name != ROOT_GROUP, "`{ROOT_GROUP}` is reserved");
        assert!(!self.label_exists(&descriptor.name), "group `{}` registered twice", descriptor.name);
        self.groups.push(PlannedGroup { descriptor, order: self.next_order });
        self.next_order += 1;
    }

    fn label_exists(&self, label: &str) -> bool {
        self.systems.iter().any(|s| s.descriptor.name == label)
            || self.groups.iter().any(|g| g.descriptor.name == label)
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    pub fn system_name(&self, system: SystemID) -> &str {
        &self.systems[system as usize].descriptor.name
    }

    pub fn descriptor(&self, system: SystemID) -> &SystemDescriptor {
        &self.systems[system as usize].descriptor
    }

    /// Union of the access declared by `system`'s queries.
    pub fn access_of(&self, system: SystemID) -> &AccessSets {
        &self.systems[system as usize].access
    }

    pub fn queries_of(&self, system: SystemID) -> &[SystemQuery] {
        &self.systems[system as usize].queries
    }

    /// Opens the init phase of `system`; queries may be registered until [`end_init`](Self::end_init).
    pub fn begin_init(&mut self, system: SystemID) {
        self.initializing = Some(system);
    }

    pub fn end_init(&mut self) {
        self.initializing = None;
    }

    /// Registers a query on behalf of `system`.
    ///
    /// ## Panics
    /// Panics unless `system` is currently inside its `init` phase.

    pub fn register_system_query(
        &mut self,
        system: SystemID,
        descriptor: &QueryDescriptor,
        store: &mut EntityStore,
    ) -> SystemQuery {
        assert_eq!(
            self.initializing,
            Some(system),
            "queries can only be registered during the init phase of the owning system"
        );
        let id = store.register_query(descriptor);
        let access: Arc<[Access]> = descriptor.access().into();

        let planned = &mut self.systems[system as usize];
        for entry in access.iter() {
            planned.access.insert(*entry);
        }
        let query = SystemQuery { id, access };
        planned.queries.push(query.clone());
        query
    }

    fn group_index(&self, name: &str) -> Option<usize> {
        self.groups.iter().position(|g| g.descriptor.name == name)
    }

    fn validate(&self) -> Result<(), BuildError> {
        for group in &self.groups {
            if let Some(parent) = &group.descriptor.parent {
                if parent != ROOT_GROUP && self.group_index(parent).is_none() {
                    return Err(BuildError::UnknownLabel {
                        owner: group.descriptor.name.clone(),
                        label: parent.clone(),
                    });
                }
            }
        }

        for (index, group) in self.groups.iter().enumerate() {
            let mut cursor = group.descriptor.parent.as_deref();
            let mut hops = 0;
            while let Some(parent) = cursor.filter(|p| *p != ROOT_GROUP) {
                let Some(parent_index) = self.group_index(parent) else { break };
                hops += 1;
                if parent_index == index || hops > self.groups.len() {
                    return Err(BuildError::GroupCycle(group.descriptor.name.clone()));
                }
                cursor = self.groups[parent_index].descriptor.parent.as_deref();
            }
        }

        for system in &self.systems {
            if let Some(group) = &system.descriptor.group {
                if group != ROOT_GROUP && self.group_index(group).is_none() {
                    return Err(BuildError::UnknownLabel {
                        owner: system.descriptor.name.clone(),
                        label: group.clone(),
                    });
                }
            }
        }

        let declarations = self
            .systems
            .iter()
            .map(|s| (&s.descriptor.name, &s.descriptor.before, &s.descriptor.after))
            .chain(self.groups.iter().map(|g| (&g.descriptor.name, &g.descriptor.before, &g.descriptor.after)));
        for (owner, before, after) in declarations {
            for label in before.iter().chain(after.iter()) {
                if !self.label_exists(label) {
                    return Err(BuildError::UnknownLabel { owner: owner.clone(), label: label.clone() });
                }
            }
        }
        Ok(())
    }

    fn parent_matches(declared: Option<&str>, group: Option<usize>, groups: &[PlannedGroup]) -> bool {
        let declared = declared.filter(|name| *name != ROOT_GROUP);
        match (declared, group) {
            (None, None) => true,
            (Some(name), Some(index)) => groups[index].descriptor.name == name,
            _ => false,
        }
    }

    fn members_of(&self, group: Option<usize>) -> Vec<Member> {
        let mut members: Vec<(usize, Member)> = Vec::new();
        for (index, system) in self.systems.iter().enumerate() {
            if Self::parent_matches(system.descriptor.group.as_deref(), group, &self.groups) {
                members.push((system.order, Member::System(index)));
            }
        }
        for (index, planned) in self.groups.iter().enumerate() {
            if Self::parent_matches(planned.descriptor.parent.as_deref(), group, &self.groups) {
                members.push((planned.order, Member::Group(index)));
            }
        }
        members.sort_by_key(|(order, _)| *order);
        members.into_iter().map(|(_, member)| member).collect()
    }

    fn label_of(&self, member: Member) -> &str {
        match member {
            Member::System(index) => &self.systems[index].descriptor.name,
            Member::Group(index) => &self.groups[index].descriptor.name,
        }
    }

    fn constraints_of(&self, member: Member) -> (&[String], &[String]) {
        match member {
            Member::System(index) => {
                let d = &self.systems[index].descriptor;
                (&d.before, &d.after)
            }
            Member::Group(index) => {
                let d = &self.groups[index].descriptor;
                (&d.before, &d.after)
            }
        }
    }

    /// Labels, merged access and every before/after constraint under `member`.
    fn subtree<'p>(&'p self, member: Member, summary: &mut Subtree<'p>) {
        summary.labels.insert(self.label_of(member));
        let (before, after) = self.constraints_of(member);
        summary.before.extend(before.iter().map(String::as_str));
        summary.after.extend(after.iter().map(String::as_str));
        match member {
            Member::System(index) => summary.access.merge(&self.systems[index].access),
            Member::Group(index) => {
                for child in self.members_of(Some(index)) {
                    self.subtree(child, summary);
                }
            }
        }
    }

    /// Groups and sorts every registered system.
    ///
    /// ## Errors
    /// Unknown labels or parents, nested group cycles, and cycles among
    /// explicit before/after declarations.

    pub fn create_system_root(&self) -> Result<PlanGroup, BuildError> {
        self.validate()?;
        let root = self.plan_group(None)?;
        tracing::debug!(
            order = ?root.flatten().iter().map(|&id| self.system_name(id)).collect::<Vec<_>>(),
            "planned system order"
        );
        Ok(root)
    }

    fn plan_group(&self, group: Option<usize>) -> Result<PlanGroup, BuildError> {
        let group_name = group.map_or(ROOT_GROUP, |index| self.groups[index].descriptor.name.as_str());
        let members = self.members_of(group);
        let count = members.len();

        let summaries: Vec<Subtree<'_>> = members
            .iter()
            .map(|&member| {
                let mut summary = Subtree::default();
                self.subtree(member, &mut summary);
                summary
            })
            .collect();
        let resolve = |label: &str| summaries.iter().position(|s| s.labels.contains(label));
        let access: Vec<AccessSets> = summaries.iter().map(|s| s.access).collect();

        let mut graph = Graph::new(count);
        for (i, summary) in summaries.iter().enumerate() {
            for j in summary.before.iter().filter_map(|l| resolve(l)).filter(|&j| j != i) {
                graph.add(i, j);
            }
            for j in summary.after.iter().filter_map(|l| resolve(l)).filter(|&j| j != i) {
                graph.add(j, i);
            }
        }

        if let Err(stuck) = graph.sort() {
            return Err(BuildError::OrderingCycle {
                group: group_name.to_owned(),
                members: stuck.into_iter().map(|i| self.label_of(members[i]).to_owned()).collect(),
            });
        }

        for i in 0..count {
            for j in (i + 1)..count {
                if access[i].reads_what_is_written_by(&access[j]) && !graph.reaches(j, i) {
                    graph.add(i, j);
                }
                if access[j].reads_what_is_written_by(&access[i]) && !graph.reaches(i, j) {
                    graph.add(j, i);
                }
            }
        }

        for i in 0..count {
            for j in (i + 1)..count {
                if access[i].writes_overlap(&access[j]) && !graph.reaches(i, j) && !graph.reaches(j, i) {
                    tracing::warn!(
                        group = group_name,
                        first = self.label_of(members[i]),
                        second = self.label_of(members[j]),
                        "unordered write/write overlap; keeping registration order"
                    );
                }
            }
        }

        let order = match graph.sort() {
            Ok(order) => order,
            Err(stuck) => {
                return Err(BuildError::OrderingCycle {
                    group: group_name.to_owned(),
                    members: stuck.into_iter().map(|i| self.label_of(members[i]).to_owned()).collect(),
                })
            }
        };

        let mut nodes = Vec::with_capacity(count);
        for index in order {
            nodes.push(match members[index] {
                Member::System(system) => PlanNode::System(system as SystemID),
                Member::Group(child) => PlanNode::Group(self.plan_group(Some(child))?),
            });
        }
        Ok(PlanGroup { name: group_name.to_owned(), members: nodes })
    }
}

/// Small adjacency-list DAG over member indices.
struct Graph {
    edges: Vec<BTreeSet<usize>>,
}

impl Graph {
    fn new(nodes: usize) -> Self {
        Self { edges: vec![BTreeSet::new(); nodes] }
    }

    fn add(&mut self, from: usize, to: usize) {
        self.edges[from].insert(to);
    }

    fn reaches(&self, from: usize, to: usize) -> bool {
        let mut seen = vec![false; self.edges.len()];
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if std::mem::replace(&mut seen[node], true) {
                continue;
            }
            stack.extend(self.edges[node].iter().copied());
        }
        false
    }

    /// Kahn's algorithm, always taking the lowest ready index.
    ///
    /// On a cycle, returns the nodes that could not be ordered.
    fn sort(&self) -> Result<Vec<usize>, Vec<usize>> {
        let mut in_degree = vec![0usize; self.edges.len()];
        for targets in &self.edges {
            for &target in targets {
                in_degree[target] += 1;
            }
        }
        let mut ready: BTreeSet<usize> = (0..self.edges.len()).filter(|&n| in_degree[n] == 0).collect();
        let mut order = Vec::with_capacity(self.edges.len());

        while let Some(node) = ready.pop_first() {
            order.push(node);
            for &target in &self.edges[node] {
                in_degree[target] -= 1;
                if in_degree[target] == 0 {
                    ready.insert(target);
                }
            }
        }

        if order.len() == self.edges.len() {
            Ok(order)
        } else {
            Err((0..self.edges.len()).filter(|n| !order.contains(n)).collect())
        }
    }
}
