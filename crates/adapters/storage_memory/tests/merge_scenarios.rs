//! End-to-end merge, delete and commit behaviour over the in-memory engine.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use unitwork_adapter_storage_memory::MemoryEngine;
use unitwork_app::ports::ReadRepository;
use unitwork_app::{
    Cancellation, ConflictPolicy, EngineReadRepository, UnitOfWork, UnitOfWorkOptions,
    UnitOfWorkState,
};
use unitwork_domain::audit::{Audit, Auditable};
use unitwork_domain::change_set::ChangeSet;
use unitwork_domain::entity::DomainEntity;
use unitwork_domain::error::{MappingError, PersistenceError};
use unitwork_domain::graph::{Collection, Node};
use unitwork_domain::id::{EntityKind, GlobalId, RecordId};
use unitwork_domain::mapping::MappingRegistry;

macro_rules! identity {
    ($ty:ty) => {
        impl Auditable for $ty {
            fn audit(&self) -> &Audit {
                &self.audit
            }

            fn audit_mut(&mut self) -> &mut Audit {
                &mut self.audit
            }
        }
    };
}

macro_rules! ids {
    () => {
        fn id(&self) -> RecordId {
            self.id
        }

        fn set_id(&mut self, id: RecordId) {
            self.id = id;
        }

        fn global_id(&self) -> GlobalId {
            self.global_id
        }

        fn set_global_id(&mut self, global_id: GlobalId) {
            self.global_id = global_id;
        }
    };
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Order {
    #[serde(skip)]
    id: RecordId,
    #[serde(skip)]
    global_id: GlobalId,
    #[serde(skip)]
    audit: Audit,
    customer: String,
    #[serde(skip)]
    lines: Vec<OrderLine>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct OrderLine {
    #[serde(skip)]
    id: RecordId,
    #[serde(skip)]
    global_id: GlobalId,
    #[serde(skip)]
    audit: Audit,
    sku: String,
    quantity: u32,
    #[serde(skip)]
    notes: Vec<LineNote>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LineNote {
    #[serde(skip)]
    id: RecordId,
    #[serde(skip)]
    global_id: GlobalId,
    #[serde(skip)]
    audit: Audit,
    text: String,
}

identity!(Order);
identity!(OrderLine);
identity!(LineNote);

impl DomainEntity for Order {
    const KIND: EntityKind = EntityKind::new("order");
    const CHILD_KINDS: &'static [EntityKind] = &[OrderLine::KIND];

    ids!();

    fn collections(&self) -> Result<Vec<Collection>, MappingError> {
        Ok(vec![Collection::of(&self.lines)?])
    }

    fn adopt(&mut self, collection: Collection) -> Result<(), MappingError> {
        self.lines = collection.into_entities()?;
        Ok(())
    }
}

impl DomainEntity for OrderLine {
    const KIND: EntityKind = EntityKind::new("order_line");
    const CHILD_KINDS: &'static [EntityKind] = &[LineNote::KIND];

    ids!();

    fn collections(&self) -> Result<Vec<Collection>, MappingError> {
        Ok(vec![Collection::of(&self.notes)?])
    }

    fn adopt(&mut self, collection: Collection) -> Result<(), MappingError> {
        self.notes = collection.into_entities()?;
        Ok(())
    }
}

impl DomainEntity for LineNote {
    const KIND: EntityKind = EntityKind::new("line_note");

    ids!();
}

fn order(customer: &str, lines: Vec<OrderLine>) -> Order {
    Order {
        customer: customer.to_string(),
        lines,
        ..Order::default()
    }
}

fn line(sku: &str, notes: &[&str]) -> OrderLine {
    OrderLine {
        sku: sku.to_string(),
        quantity: 1,
        notes: notes
            .iter()
            .map(|text| LineNote {
                text: (*text).to_string(),
                ..LineNote::default()
            })
            .collect(),
        ..OrderLine::default()
    }
}

fn registry() -> Arc<MappingRegistry> {
    Arc::new(
        MappingRegistry::new()
            .with::<Order>()
            .with::<OrderLine>()
            .with::<LineNote>(),
    )
}

fn unit_of_work(engine: &MemoryEngine) -> UnitOfWork<MemoryEngine> {
    UnitOfWork::new(engine.clone(), registry())
}

fn detecting(engine: &MemoryEngine) -> UnitOfWork<MemoryEngine> {
    unit_of_work(engine).with_options(UnitOfWorkOptions {
        conflict_policy: ConflictPolicy::DetectConflicts,
    })
}

async fn merge_and_commit(engine: &MemoryEngine, graph: &mut Order, committer: &str) {
    let uow = unit_of_work(engine);
    let repo = uow.repository::<Order>().await.unwrap();
    repo.merge(graph, &Cancellation::none()).await.unwrap();
    uow.commit(committer, &Cancellation::none()).await.unwrap();
}

async fn reload(engine: &MemoryEngine, global_id: GlobalId) -> Option<Order> {
    EngineReadRepository::<_, Order>::new(engine.clone(), registry())
        .read_by_global_id(global_id, &Cancellation::none())
        .await
        .unwrap()
}

fn same_graph(a: &Order, b: &Order) -> bool {
    let a = Node::from_entity(a).unwrap();
    let b = Node::from_entity(b).unwrap();
    a.same_value(&b)
}

#[tokio::test]
async fn should_reload_merged_graph_unchanged() {
    let engine = MemoryEngine::new();
    let mut graph = order(
        "ACME",
        vec![line("A-1", &["fragile", "gift"]), line("B-2", &[])],
    );

    merge_and_commit(&engine, &mut graph, "alice").await;

    let stored = reload(&engine, graph.global_id).await.unwrap();
    assert!(same_graph(&stored, &graph));
    assert_eq!(stored.lines[0].notes.len(), 2);
    assert_eq!(engine.len().await, 5);
}

#[tokio::test]
async fn should_plan_no_changes_when_same_graph_merged_twice() {
    let engine = MemoryEngine::new();
    let mut graph = order("ACME", vec![line("A-1", &["fragile"])]);
    merge_and_commit(&engine, &mut graph, "alice").await;
    let stored = reload(&engine, graph.global_id).await.unwrap();

    let registry = registry();
    let change_set = ChangeSet::for_root(
        &registry,
        &Node::from_entity(&graph).unwrap(),
        Some(&Node::from_entity(&stored).unwrap()),
    )
    .unwrap();
    assert_eq!(change_set.inserts(), 0);
    assert_eq!(change_set.deletes(), 0);
    assert_eq!(change_set.value_changes(), 0);

    let uow = unit_of_work(&engine);
    uow.repository::<Order>()
        .await
        .unwrap()
        .merge(&mut graph, &Cancellation::none())
        .await
        .unwrap();
    let summary = uow.commit("bob", &Cancellation::none()).await.unwrap();
    assert_eq!((summary.inserted, summary.deleted), (0, 0));
    assert!(same_graph(&reload(&engine, graph.global_id).await.unwrap(), &graph));
}

#[tokio::test]
async fn should_reconcile_children_when_graph_changes() {
    let engine = MemoryEngine::new();
    let mut graph = order("ACME", vec![line("X", &[]), line("Y", &["keep dry"])]);
    merge_and_commit(&engine, &mut graph, "alice").await;
    let before = reload(&engine, graph.global_id).await.unwrap();
    let (x, y) = (&before.lines[0], &before.lines[1]);

    graph.lines.retain(|l| l.sku == "X");
    graph.lines.push(line("Z", &[]));
    let uow = unit_of_work(&engine);
    uow.repository::<Order>()
        .await
        .unwrap()
        .merge(&mut graph, &Cancellation::none())
        .await
        .unwrap();
    let summary = uow.commit("bob", &Cancellation::none()).await.unwrap();

    // A and X updated, Z inserted, Y and its note deleted.
    assert_eq!(summary.updated, 2);
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.deleted, 2);

    let after = reload(&engine, graph.global_id).await.unwrap();
    let skus: Vec<_> = after.lines.iter().map(|l| l.sku.as_str()).collect();
    assert_eq!(skus, vec!["X", "Z"]);
    assert_eq!(after.lines[0].id, x.id);
    assert_eq!(after.lines[0].global_id, x.global_id);
    assert!(after.lines[1].id > y.id);
    assert!(after.lines.iter().all(|l| l.global_id != y.global_id));
    assert_eq!(after.audit.created_by, "alice");
    assert_eq!(after.audit.modified_by, "bob");
    assert!(
        EngineReadRepository::<_, LineNote>::new(engine.clone(), registry())
            .read_all(&Cancellation::none())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn should_keep_child_under_its_owner_when_merged_through_its_own_repository() {
    let engine = MemoryEngine::new();
    let mut graph = order("ACME", vec![line("L1", &["fragile"])]);
    merge_and_commit(&engine, &mut graph, "alice").await;
    let before = reload(&engine, graph.global_id).await.unwrap();

    let mut renamed = before.lines[0].clone();
    renamed.sku = "renamed".to_string();
    let uow = unit_of_work(&engine);
    uow.repository::<OrderLine>()
        .await
        .unwrap()
        .merge(&mut renamed, &Cancellation::none())
        .await
        .unwrap();
    let summary = uow.commit("bob", &Cancellation::none()).await.unwrap();
    assert_eq!((summary.inserted, summary.updated, summary.deleted), (0, 2, 0));

    let after = reload(&engine, graph.global_id).await.unwrap();
    assert_eq!(after.lines.len(), 1);
    assert_eq!(after.lines[0].sku, "renamed");
    assert_eq!(after.lines[0].id, before.lines[0].id);
    assert_eq!(after.lines[0].notes.len(), 1);

    let mut owner = after.clone();
    let uow = unit_of_work(&engine);
    uow.repository::<Order>()
        .await
        .unwrap()
        .merge(&mut owner, &Cancellation::none())
        .await
        .unwrap();
    let summary = uow.commit("carol", &Cancellation::none()).await.unwrap();
    assert_eq!((summary.inserted, summary.deleted), (0, 0));
    assert!(same_graph(&reload(&engine, graph.global_id).await.unwrap(), &after));
}

#[tokio::test]
async fn should_move_child_between_owners_without_recreating_it() {
    let engine = MemoryEngine::new();
    let mut graph = order("ACME", vec![line("L1", &["n"]), line("L2", &[])]);
    merge_and_commit(&engine, &mut graph, "alice").await;
    let before = reload(&engine, graph.global_id).await.unwrap();
    let note = before.lines[0].notes[0].clone();

    let mut moved = before.clone();
    let taken = moved.lines[0].notes.remove(0);
    moved.lines[1].notes.push(taken);
    let uow = unit_of_work(&engine);
    uow.repository::<Order>()
        .await
        .unwrap()
        .merge(&mut moved, &Cancellation::none())
        .await
        .unwrap();
    let summary = uow.commit("bob", &Cancellation::none()).await.unwrap();

    assert_eq!((summary.inserted, summary.updated, summary.deleted), (0, 4, 0));
    let after = reload(&engine, graph.global_id).await.unwrap();
    assert!(after.lines[0].notes.is_empty());
    assert_eq!(after.lines[1].notes.len(), 1);
    assert_eq!(after.lines[1].notes[0].id, note.id);
    assert_eq!(after.lines[1].notes[0].global_id, note.global_id);
    assert_eq!(after.lines[1].notes[0].audit.created_by, "alice");
    assert_eq!(engine.len().await, 4);
}

#[tokio::test]
async fn should_remove_every_descendant_when_deleting_root() {
    let engine = MemoryEngine::new();
    let mut graph = order("ACME", vec![line("A-1", &["n1", "n2"]), line("B-2", &["n3"])]);
    merge_and_commit(&engine, &mut graph, "alice").await;

    // The in-memory children are irrelevant to a delete.
    graph.lines.clear();
    let uow = unit_of_work(&engine);
    let queued = uow
        .repository::<Order>()
        .await
        .unwrap()
        .delete(&graph, &Cancellation::none())
        .await
        .unwrap();
    uow.commit("alice", &Cancellation::none()).await.unwrap();

    assert_eq!(queued, 6);
    assert!(engine.is_empty().await);
    assert!(reload(&engine, graph.global_id).await.is_none());
}

#[tokio::test]
async fn should_stamp_creation_equal_to_modification_on_insert() {
    let engine = MemoryEngine::new();
    let mut root = order("ACME", vec![]);
    let uow = unit_of_work(&engine);
    uow.repository::<Order>()
        .await
        .unwrap()
        .insert(&mut root, &Cancellation::none())
        .await
        .unwrap();
    let summary = uow.commit("alice", &Cancellation::none()).await.unwrap();

    let stored = reload(&engine, root.global_id).await.unwrap();
    assert!(stored.id.is_assigned());
    assert_eq!(stored.audit.created_at, stored.audit.modified_at);
    assert_eq!(stored.audit.created_at, summary.committed_at);
    assert_eq!(stored.audit.created_by, "alice");
}

#[tokio::test]
async fn should_leave_store_untouched_when_last_operation_fails() {
    let engine = MemoryEngine::new();
    let mut graph = order("ACME", vec![line("A-1", &[]), line("B-2", &[])]);
    merge_and_commit(&engine, &mut graph, "alice").await;
    let before = reload(&engine, graph.global_id).await.unwrap();

    graph.customer = "Globex".to_string();
    for l in &mut graph.lines {
        l.quantity = 9;
    }
    let uow = unit_of_work(&engine);
    let queued = uow
        .repository::<Order>()
        .await
        .unwrap()
        .merge(&mut graph, &Cancellation::none())
        .await
        .unwrap();
    assert_eq!(queued, 3);
    engine.fail_on_write(3);

    let result = uow.commit("bob", &Cancellation::none()).await;

    assert!(matches!(result, Err(PersistenceError::Storage(_))));
    assert_eq!(uow.state().await, UnitOfWorkState::RolledBack);
    let after = reload(&engine, graph.global_id).await.unwrap();
    assert!(same_graph(&after, &before));
    assert_eq!(after.audit.modified_by, "alice");
}

#[tokio::test]
async fn should_let_one_of_two_concurrent_inserts_win() {
    let engine = MemoryEngine::new();
    let global_id = GlobalId::new();
    let mut first = order("first", vec![line("A-1", &[])]);
    first.global_id = global_id;
    let mut second = order("second", vec![line("B-1", &[])]);
    second.global_id = global_id;

    let (a, b) = (unit_of_work(&engine), unit_of_work(&engine));
    let cancel = Cancellation::none();
    a.repository::<Order>().await.unwrap().merge(&mut first, &cancel).await.unwrap();
    b.repository::<Order>().await.unwrap().merge(&mut second, &cancel).await.unwrap();

    let (ra, rb) = tokio::join!(a.commit("a", &cancel), b.commit("b", &cancel));

    let failures: Vec<_> = [&ra, &rb].into_iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].is_conflict());
    let stored = reload(&engine, global_id).await.unwrap();
    let winner = if ra.is_ok() { &first } else { &second };
    assert!(same_graph(&stored, winner));
}

#[tokio::test]
async fn should_apply_last_writer_when_concurrent_merges_do_not_collide() {
    let engine = MemoryEngine::new();
    let mut base = order("ACME", vec![line("A-1", &[])]);
    merge_and_commit(&engine, &mut base, "seed").await;

    let mut early = base.clone();
    early.customer = "early".to_string();
    let mut late = base.clone();
    late.customer = "late".to_string();
    late.lines[0].quantity = 7;

    let (a, b) = (unit_of_work(&engine), unit_of_work(&engine));
    let cancel = Cancellation::none();
    a.repository::<Order>().await.unwrap().merge(&mut early, &cancel).await.unwrap();
    b.repository::<Order>().await.unwrap().merge(&mut late, &cancel).await.unwrap();
    a.commit("a", &cancel).await.unwrap();
    b.commit("b", &cancel).await.unwrap();

    let stored = reload(&engine, base.global_id).await.unwrap();
    assert!(same_graph(&stored, &late));
    assert_eq!(stored.audit.modified_by, "b");
}

#[tokio::test]
async fn should_fail_loser_when_concurrent_merges_remove_same_child() {
    let engine = MemoryEngine::new();
    let mut base = order("ACME", vec![line("X", &[]), line("Y", &[])]);
    merge_and_commit(&engine, &mut base, "seed").await;

    let mut with_z1 = base.clone();
    with_z1.lines.truncate(1);
    with_z1.lines.push(line("Z1", &[]));
    let mut with_z2 = base.clone();
    with_z2.lines.truncate(1);
    with_z2.lines.push(line("Z2", &[]));

    let (a, b) = (unit_of_work(&engine), unit_of_work(&engine));
    let cancel = Cancellation::none();
    a.repository::<Order>().await.unwrap().merge(&mut with_z1, &cancel).await.unwrap();
    b.repository::<Order>().await.unwrap().merge(&mut with_z2, &cancel).await.unwrap();
    a.commit("a", &cancel).await.unwrap();

    let result = b.commit("b", &cancel).await;

    assert!(result.as_ref().is_err_and(PersistenceError::is_conflict));
    let stored = reload(&engine, base.global_id).await.unwrap();
    assert!(same_graph(&stored, &with_z1));
}

#[tokio::test]
async fn should_detect_conflict_when_policy_requires_it() {
    let engine = MemoryEngine::new();
    let mut base = order("ACME", vec![line("A-1", &[])]);
    merge_and_commit(&engine, &mut base, "seed").await;

    let mut early = base.clone();
    early.customer = "early".to_string();
    let mut late = base.clone();
    late.customer = "late".to_string();

    let (a, b) = (detecting(&engine), detecting(&engine));
    let cancel = Cancellation::none();
    a.repository::<Order>().await.unwrap().merge(&mut early, &cancel).await.unwrap();
    b.repository::<Order>().await.unwrap().merge(&mut late, &cancel).await.unwrap();
    a.commit("a", &cancel).await.unwrap();

    let result = b.commit("b", &cancel).await;

    assert!(matches!(result, Err(PersistenceError::Conflict(_))));
    let stored = reload(&engine, base.global_id).await.unwrap();
    assert_eq!(stored.customer, "early");
}

#[tokio::test]
async fn should_write_nothing_when_cancelled_before_commit() {
    let engine = MemoryEngine::new();
    let mut graph = order("ACME", vec![line("A-1", &[])]);
    let uow = unit_of_work(&engine);
    uow.repository::<Order>()
        .await
        .unwrap()
        .merge(&mut graph, &Cancellation::none())
        .await
        .unwrap();
    let (trigger, cancel) = Cancellation::channel();
    trigger.send(true).unwrap();

    let result = uow.commit("alice", &cancel).await;

    assert!(matches!(result, Err(PersistenceError::Cancelled)));
    assert!(engine.is_empty().await);
}

#[tokio::test]
async fn should_write_nothing_when_unit_of_work_dropped() {
    let engine = MemoryEngine::new();
    {
        let uow = unit_of_work(&engine);
        let mut graph = order("ACME", vec![line("A-1", &[])]);
        uow.repository::<Order>()
            .await
            .unwrap()
            .merge(&mut graph, &Cancellation::none())
            .await
            .unwrap();
    }
    assert!(engine.is_empty().await);
}
