//! Declarative transactions and atomic batches.
//!
//! [`with_transaction`] wraps an operation: it begins a transaction (or joins
//! the one already open on the context), commits when the operation returns
//! `Ok` and rolls back when it returns `Err`.

use super::context::{DaoContext, IsolationLevel};
use crate::entity::Entity;
use crate::error::{DbError, DbResult};
use crate::meta::Catalog;
use futures_util::future::BoxFuture;
use tracing::{debug, warn};

/// Run `op` inside a transaction on `ctx`.
///
/// When `ctx` is already in a transaction, `op` runs inside it and the outer
/// owner decides the outcome.
///
/// ```ignore
/// let id = with_transaction(&mut ctx, IsolationLevel::Unspecified, async |ctx| {
///     ctx.insert(&catalog, &mut order).await?;
///     ctx.update(&catalog, &stock).await?;
///     Ok(order.id)
/// })
/// .await?;
/// ```
pub async fn with_transaction<T, F>(
    ctx: &mut DaoContext,
    isolation: IsolationLevel,
    op: F,
) -> DbResult<T>
where
    F: AsyncFnOnce(&mut DaoContext) -> DbResult<T>,
{
    if ctx.in_transaction() {
        debug!(context_id = %ctx.id(), "Joining open transaction");
        return op(ctx).await;
    }

    if !ctx.begin_transaction(isolation).await? {
        return Err(DbError::internal("transaction could not be started"));
    }

    match op(ctx).await {
        Ok(value) => {
            ctx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = ctx.rollback().await {
                warn!(
                    context_id = %ctx.id(),
                    error = %rollback_err,
                    "Rollback after failed operation also failed"
                );
            }
            Err(e)
        }
    }
}

/// A pending write on one entity.
#[derive(Debug)]
pub enum EntityOperation<T: Entity> {
    Insert(T),
    Update(T),
    Delete(T),
    /// Placeholder that does nothing; keeps batch positions stable.
    Nothing,
}

impl<T: Entity> EntityOperation<T> {
    /// The entity, after `apply` has run (an insert carries its new identity).
    pub fn into_inner(self) -> Option<T> {
        match self {
            Self::Insert(item) | Self::Update(item) | Self::Delete(item) => Some(item),
            Self::Nothing => None,
        }
    }
}

/// Type-erased batch member, so operations on different entities can share
/// one batch.
pub trait BatchOperation: Send {
    /// Apply the operation, returning the affected row count.
    fn apply<'a>(
        &'a mut self,
        ctx: &'a mut DaoContext,
        catalog: &'a Catalog,
    ) -> BoxFuture<'a, DbResult<u64>>;

    fn describe(&self) -> String;
}

impl<T: Entity> BatchOperation for EntityOperation<T> {
    fn apply<'a>(
        &'a mut self,
        ctx: &'a mut DaoContext,
        catalog: &'a Catalog,
    ) -> BoxFuture<'a, DbResult<u64>> {
        Box::pin(async move {
            match self {
                Self::Insert(item) => ctx.insert(catalog, item).await,
                Self::Update(item) => ctx.update(catalog, item).await,
                Self::Delete(item) => ctx.delete(catalog, item).await,
                Self::Nothing => Ok(0),
            }
        })
    }

    fn describe(&self) -> String {
        let kind = match self {
            Self::Insert(_) => "insert",
            Self::Update(_) => "update",
            Self::Delete(_) => "delete",
            Self::Nothing => "nothing",
        };
        format!("{} {}", kind, T::ENTITY.name)
    }
}

/// Apply every operation in one transaction. The first failure rolls the
/// whole batch back and is returned.
pub async fn execute_batch(
    ctx: &mut DaoContext,
    catalog: &Catalog,
    operations: &mut [Box<dyn BatchOperation>],
) -> DbResult<u64> {
    with_transaction(ctx, IsolationLevel::Unspecified, async |ctx| {
        let mut affected = 0;
        for operation in operations.iter_mut() {
            debug!(context_id = %ctx.id(), operation = %operation.describe(), "Applying batch operation");
            affected += operation.apply(ctx, catalog).await?;
        }
        Ok(affected)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataSourceConfig;
    use crate::error::ValueError;
    use crate::expr::Value;
    use crate::meta::{ColumnDescriptor, EntityDescriptor, EntityRef, ValueType};
    use crate::sql::SqlGen;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct Note {
        id: i64,
        body: String,
    }

    fn note() -> EntityDescriptor {
        EntityDescriptor::new("Note", "Notes")
            .column(ColumnDescriptor::new("Id", ValueType::BigInt).identity())
            .column(ColumnDescriptor::new("Body", ValueType::Text))
    }

    const NOTE: EntityRef = EntityRef::new("Note", note);

    impl Entity for Note {
        const ENTITY: EntityRef = NOTE;

        fn get(&self, property: &str) -> Option<Value> {
            match property {
                "Id" => Some(self.id.into()),
                "Body" => Some(self.body.clone().into()),
                _ => None,
            }
        }

        fn set(&mut self, property: &str, value: Value) -> Result<(), ValueError> {
            match property {
                "Id" => self.id = value.try_into()?,
                "Body" => self.body = value.try_into()?,
                _ => {}
            }
            Ok(())
        }
    }

    /// Mapped to a table that is never created.
    #[derive(Debug, Default)]
    struct Orphan {
        id: i64,
        label: String,
    }

    fn orphan() -> EntityDescriptor {
        EntityDescriptor::new("Orphan", "Orphans")
            .column(ColumnDescriptor::new("Id", ValueType::BigInt).primary_key())
            .column(ColumnDescriptor::new("Label", ValueType::Text))
    }

    impl Entity for Orphan {
        const ENTITY: EntityRef = EntityRef::new("Orphan", orphan);

        fn get(&self, property: &str) -> Option<Value> {
            match property {
                "Id" => Some(self.id.into()),
                "Label" => Some(self.label.clone().into()),
                _ => None,
            }
        }

        fn set(&mut self, property: &str, value: Value) -> Result<(), ValueError> {
            match property {
                "Id" => self.id = value.try_into()?,
                "Label" => self.label = value.try_into()?,
                _ => {}
            }
            Ok(())
        }
    }

    async fn setup(dir: &tempfile::TempDir, catalog: &Catalog) -> DaoContext {
        let url = format!("sqlite:{}", dir.path().join("tx.db").display());
        let mut ctx = DaoContext::new(Arc::new(DataSourceConfig::parse(&url).unwrap()));
        let table = catalog.table_definition(NOTE).unwrap();
        let ddl = SqlGen::new(catalog, ctx.dialect()).create_table(&table);
        ctx.execute(&ddl).await.unwrap();
        ctx
    }

    async fn note_count(ctx: &mut DaoContext, catalog: &Catalog) -> i64 {
        ctx.count(catalog, NOTE, None).await.unwrap()
    }

    #[tokio::test]
    async fn test_with_transaction_commits_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::new();
        let mut ctx = setup(&dir, &catalog).await;

        let id = with_transaction(&mut ctx, IsolationLevel::Unspecified, async |ctx| {
            let mut item = Note {
                id: 0,
                body: "first".into(),
            };
            ctx.insert(&catalog, &mut item).await?;
            Ok(item.id)
        })
        .await
        .unwrap();

        assert_eq!(id, 1);
        assert!(!ctx.in_transaction());
        assert_eq!(note_count(&mut ctx, &catalog).await, 1);
    }

    #[tokio::test]
    async fn test_with_transaction_rolls_back_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::new();
        let mut ctx = setup(&dir, &catalog).await;

        let result: DbResult<()> =
            with_transaction(&mut ctx, IsolationLevel::Unspecified, async |ctx| {
                ctx.insert(&catalog, &mut Note::default()).await?;
                Err(DbError::invalid_input("abort"))
            })
        .await;

        assert!(matches!(result, Err(DbError::InvalidInput { .. })));
        assert!(!ctx.in_transaction());
        assert_eq!(note_count(&mut ctx, &catalog).await, 0);
    }

    #[tokio::test]
    async fn test_nested_call_joins_outer_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::new();
        let mut ctx = setup(&dir, &catalog).await;

        assert!(ctx.begin_transaction(IsolationLevel::Unspecified).await.unwrap());
        with_transaction(&mut ctx, IsolationLevel::Serializable, async |ctx| {
            ctx.insert(&catalog, &mut Note::default()).await?;
            Ok(())
        })
        .await
        .unwrap();

        // The inner call must not have committed.
        assert!(ctx.in_transaction());
        assert!(ctx.rollback().await.unwrap());
        assert_eq!(note_count(&mut ctx, &catalog).await, 0);
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::new();
        let mut ctx = setup(&dir, &catalog).await;

        let mut ops: Vec<Box<dyn BatchOperation>> = vec![
            Box::new(EntityOperation::Insert(Note {
                id: 0,
                body: "kept?".into(),
            })),
            Box::new(EntityOperation::Insert(Orphan {
                id: 1,
                ..Default::default()
            })),
        ];
        let err = execute_batch(&mut ctx, &catalog, &mut ops).await.unwrap_err();
        assert!(matches!(err, DbError::Database { .. }));
        assert!(!ctx.in_transaction());
        assert_eq!(note_count(&mut ctx, &catalog).await, 0);

        let mut ops: Vec<Box<dyn BatchOperation>> = vec![
            Box::new(EntityOperation::Insert(Note {
                id: 0,
                body: "a".into(),
            })),
            Box::new(EntityOperation::<Note>::Nothing),
            Box::new(EntityOperation::Insert(Note {
                id: 0,
                body: "b".into(),
            })),
        ];
        assert_eq!(execute_batch(&mut ctx, &catalog, &mut ops).await.unwrap(), 2);
        assert_eq!(ops[1].describe(), "nothing Note");
        assert_eq!(note_count(&mut ctx, &catalog).await, 2);
    }

    #[tokio::test]
    async fn test_failing_middle_operation_stops_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::new();
        let mut ctx = setup(&dir, &catalog).await;

        let mut kept = Note {
            id: 0,
            body: "kept".into(),
        };
        ctx.insert(&catalog, &mut kept).await.unwrap();
        let kept_id = kept.id;

        let mut ops: Vec<Box<dyn BatchOperation>> = vec![
            Box::new(EntityOperation::Insert(Note {
                id: 0,
                body: "new".into(),
            })),
            // Orphans does not exist, so the update fails inside the batch.
            Box::new(EntityOperation::Update(Orphan {
                id: 1,
                label: "x".into(),
            })),
            Box::new(EntityOperation::Delete(kept)),
        ];
        let err = execute_batch(&mut ctx, &catalog, &mut ops).await.unwrap_err();

        assert!(matches!(err, DbError::Database { .. }));
        assert!(!ctx.in_transaction());
        assert_eq!(note_count(&mut ctx, &catalog).await, 1);
        let survivor: Note = ctx
            .fetch_by_keys(&catalog, &[Value::from(kept_id)])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(survivor.body, "kept");
    }

    #[test]
    fn test_into_inner() {
        let op = EntityOperation::Update(Note {
            id: 3,
            body: "x".into(),
        });
        assert_eq!(op.into_inner().map(|n| n.id), Some(3));
        assert!(EntityOperation::<Note>::Nothing.into_inner().is_none());
    }
}
