//! Loading persisted subtrees through the mapping registry.

use std::future::Future;
use std::pin::Pin;

use unitwork_domain::error::PersistenceError;
use unitwork_domain::graph::{Collection, Node};
use unitwork_domain::id::EntityKind;
use unitwork_domain::mapping::MappingRegistry;

use crate::cancellation::Cancellation;
use crate::ports::{Filter, StorageEngine};

type LoadFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<Node>, PersistenceError>> + Send + 'a>>;

/// Load the records of `kind` selected by `filter`, each with every
/// collection its kind declares, recursively.
pub(crate) fn load<'a, E: StorageEngine>(
    engine: &'a E,
    registry: &'a MappingRegistry,
    kind: EntityKind,
    filter: Filter,
    cancel: &'a Cancellation,
) -> LoadFuture<'a> {
    Box::pin(async move {
        cancel.check()?;
        let children = registry.child_kinds(kind)?;
        let records = engine.find(kind, filter).await?;

        let mut nodes = Vec::with_capacity(records.len());
        for record in records {
            let mut collections = Vec::with_capacity(children.len());
            for &child in children {
                let owned = Filter::ByParent(record.as_parent());
                let members = load(engine, registry, child, owned, cancel).await?;
                collections.push(Collection {
                    kind: child,
                    nodes: members,
                });
            }
            nodes.push(Node {
                record,
                collections,
            });
        }
        Ok(nodes)
    })
}

/// Load at most one subtree.
pub(crate) async fn load_one<E: StorageEngine>(
    engine: &E,
    registry: &MappingRegistry,
    kind: EntityKind,
    filter: Filter,
    cancel: &Cancellation,
) -> Result<Option<Node>, PersistenceError> {
    let nodes = load(engine, registry, kind, filter, cancel).await?;
    Ok(nodes.into_iter().next())
}
