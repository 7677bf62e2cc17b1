mod common;

use chunk_ecs::{BuildError, EntityStore, GroupDescriptor, PlanNode, Planner, QueryDescriptor, SystemDescriptor, SystemID};

use common::store;

struct Fixture {
    planner: Planner,
    store: EntityStore,
}

impl Fixture {
    fn new() -> Self {
        let (store, _) = store();
        Self { planner: Planner::new(), store }
    }

    fn system(&mut self, descriptor: SystemDescriptor, query: Option<QueryDescriptor>) -> SystemID {
        let id = self.planner.add_system(descriptor);
        if let Some(query) = query {
            self.planner.begin_init(id);
            self.planner.register_system_query(id, &query, &mut self.store);
            self.planner.end_init();
        }
        id
    }

    fn order(&self) -> Result<Vec<String>, BuildError> {
        let root = self.planner.create_system_root()?;
        Ok(root.flatten().into_iter().map(|id| self.planner.system_name(id).to_owned()).collect())
    }
}

#[test]
fn registration_order_is_kept_without_constraints() {
    let mut f = Fixture::new();
    for name in ["a", "b", "c"] {
        f.system(SystemDescriptor::new(name), None);
    }
    assert_eq!(f.order().unwrap(), ["a", "b", "c"]);
}

#[test]
fn explicit_constraints_reorder_systems() {
    let mut f = Fixture::new();
    f.system(SystemDescriptor::new("render").after("physics"), None);
    f.system(SystemDescriptor::new("physics"), None);
    f.system(SystemDescriptor::new("input").before("physics"), None);

    assert_eq!(f.order().unwrap(), ["input", "physics", "render"]);
}

#[test]
fn readers_sort_before_writers() {
    let (_, ids) = store();
    let mut f = Fixture::new();
    f.system(SystemDescriptor::new("heal"), Some(QueryDescriptor::new().write(ids.health)));
    f.system(SystemDescriptor::new("report"), Some(QueryDescriptor::new().read(ids.health)));

    assert_eq!(f.order().unwrap(), ["report", "heal"]);
}

#[test]
fn explicit_order_wins_over_inferred_order() {
    let (_, ids) = store();
    let mut f = Fixture::new();
    f.system(SystemDescriptor::new("heal"), Some(QueryDescriptor::new().write(ids.health)));
    f.system(
        SystemDescriptor::new("report").after("heal"),
        Some(QueryDescriptor::new().read(ids.health)),
    );

    assert_eq!(f.order().unwrap(), ["heal", "report"]);
}

#[test]
fn inferred_edges_that_would_close_a_cycle_are_dropped() {
    let (_, ids) = store();
    let mut f = Fixture::new();
    // a reads X and writes Y; b reads Y and writes X. Both inferred edges
    // cannot hold, so the first pair's edge is kept.
    f.system(
        SystemDescriptor::new("a"),
        Some(QueryDescriptor::new().read(ids.a).write(ids.b)),
    );
    f.system(
        SystemDescriptor::new("b"),
        Some(QueryDescriptor::new().read(ids.b).write(ids.a)),
    );

    assert_eq!(f.order().unwrap(), ["a", "b"]);
}

#[test]
fn unordered_writers_keep_registration_order() {
    let (_, ids) = store();
    let mut f = Fixture::new();
    f.system(SystemDescriptor::new("second_writer"), Some(QueryDescriptor::new().write(ids.position)));
    f.system(SystemDescriptor::new("first_writer"), Some(QueryDescriptor::new().write(ids.position)));

    assert_eq!(f.order().unwrap(), ["second_writer", "first_writer"]);
}

#[test]
fn explicit_cycles_are_build_errors() {
    let mut f = Fixture::new();
    f.system(SystemDescriptor::new("a").before("b"), None);
    f.system(SystemDescriptor::new("b").before("c"), None);
    f.system(SystemDescriptor::new("c").before("a"), None);
    f.system(SystemDescriptor::new("free"), None);

    match f.order() {
        Err(BuildError::OrderingCycle { group, mut members }) => {
            members.sort();
            assert_eq!(group, "root");
            assert_eq!(members, ["a", "b", "c"]);
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
}

#[test]
fn unknown_labels_are_build_errors() {
    let mut f = Fixture::new();
    f.system(SystemDescriptor::new("a").after("ghost"), None);

    assert_eq!(
        f.order(),
        Err(BuildError::UnknownLabel { owner: "a".into(), label: "ghost".into() })
    );
}

#[test]
fn unknown_groups_are_build_errors() {
    let mut f = Fixture::new();
    f.system(SystemDescriptor::new("a").in_group("missing"), None);
    assert!(matches!(f.order(), Err(BuildError::UnknownLabel { .. })));

    let mut f = Fixture::new();
    f.planner.add_group(GroupDescriptor::new("child").in_group("missing"));
    assert!(matches!(f.order(), Err(BuildError::UnknownLabel { .. })));
}

#[test]
fn nested_group_cycles_are_build_errors() {
    let mut f = Fixture::new();
    f.planner.add_group(GroupDescriptor::new("x").in_group("y"));
    f.planner.add_group(GroupDescriptor::new("y").in_group("x"));

    assert!(matches!(f.order(), Err(BuildError::GroupCycle(_))));
}

#[test]
fn groups_order_as_units_and_flatten_depth_first() {
    let mut f = Fixture::new();
    f.planner.add_group(GroupDescriptor::new("simulation"));
    f.planner.add_group(GroupDescriptor::new("presentation"));
    f.planner.add_group(GroupDescriptor::new("physics").in_group("simulation"));

    f.system(SystemDescriptor::new("draw").in_group("presentation"), None);
    f.system(SystemDescriptor::new("collide").in_group("physics").after("integrate"), None);
    f.system(SystemDescriptor::new("integrate").in_group("physics"), None);
    f.system(SystemDescriptor::new("ai").in_group("simulation").before("physics"), None);
    f.system(SystemDescriptor::new("input").before("simulation"), None);

    // `audio` must precede `presentation`, so its whole group does.
    f.planner.add_group(GroupDescriptor::new("late"));
    f.system(SystemDescriptor::new("audio").in_group("late").before("presentation"), None);

    assert_eq!(
        f.order().unwrap(),
        ["input", "ai", "integrate", "collide", "audio", "draw"]
    );
}

#[test]
fn plan_tree_mirrors_groups() {
    let mut f = Fixture::new();
    f.planner.add_group(GroupDescriptor::new("g"));
    let inner = f.system(SystemDescriptor::new("inner").in_group("g"), None);
    let outer = f.system(SystemDescriptor::new("outer"), None);

    let root = f.planner.create_system_root().unwrap();
    assert_eq!(root.name, "root");
    assert_eq!(root.members.len(), 2);
    match &root.members[0] {
        PlanNode::Group(group) => {
            assert_eq!(group.name, "g");
            assert_eq!(group.members, vec![PlanNode::System(inner)]);
        }
        other => panic!("expected group, got {other:?}"),
    }
    assert_eq!(root.members[1], PlanNode::System(outer));
}

#[test]
fn group_access_is_the_union_of_its_members() {
    let (_, ids) = store();
    let mut f = Fixture::new();
    f.planner.add_group(GroupDescriptor::new("writers"));
    f.system(SystemDescriptor::new("w").in_group("writers"), Some(QueryDescriptor::new().write(ids.velocity)));
    f.system(SystemDescriptor::new("r"), Some(QueryDescriptor::new().read(ids.velocity)));

    assert_eq!(f.order().unwrap(), ["r", "w"]);
}

#[test]
#[should_panic(expected = "registered twice")]
fn duplicate_names_panic() {
    let mut planner = Planner::new();
    planner.add_system(SystemDescriptor::new("same"));
    planner.add_system(SystemDescriptor::new("same"));
}

#[test]
#[should_panic(expected = "init phase")]
fn queries_outside_init_panic() {
    let (mut store, ids) = store();
    let mut planner = Planner::new();
    let id = planner.add_system(SystemDescriptor::new("late"));
    planner.register_system_query(id, &QueryDescriptor::new().read(ids.a), &mut store);
}

#[test]
fn system_access_is_recorded() {
    let (_, ids) = store();
    let mut f = Fixture::new();
    let id = f.system(
        SystemDescriptor::new("mover"),
        Some(QueryDescriptor::new().write(ids.position).read(ids.velocity)),
    );

    assert_eq!(f.planner.queries_of(id).len(), 1);
    let access = f.planner.access_of(id);
    assert!(access.write.has(ids.position));
    assert!(access.read.has(ids.velocity));
}
