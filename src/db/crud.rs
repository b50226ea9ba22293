//! Entity-level operations on a context.
//!
//! Each call generates SQL for the context's dialect, executes it and, for
//! reads, materializes rows through [`Entity::set`].

use super::context::DaoContext;
use crate::entity::Entity;
use crate::error::{DbError, DbResult};
use crate::expr::{Expr, SelectExpr, Value};
use crate::meta::{Catalog, EntityRef};
use crate::sql::SqlGen;

impl DaoContext {
    /// Insert `item`; a generated identity is written back into it.
    pub async fn insert<T: Entity>(&mut self, catalog: &Catalog, item: &mut T) -> DbResult<u64> {
        let insert = SqlGen::new(catalog, self.dialect()).insert(&*item)?;
        let identity = self.insert_returning_identity(&insert).await?;
        if let (Some(property), Some(value)) = (&insert.identity_property, identity) {
            item.set(property, value)
                .map_err(|e| DbError::property_assignment(T::ENTITY.name, property.as_str(), e))?;
        }
        Ok(1)
    }

    /// Update every updatable column of `item`, located by its keys.
    pub async fn update<T: Entity>(&mut self, catalog: &Catalog, item: &T) -> DbResult<u64> {
        let statement = SqlGen::new(catalog, self.dialect()).update(item)?;
        self.execute(&statement).await
    }

    pub async fn delete<T: Entity>(&mut self, catalog: &Catalog, item: &T) -> DbResult<u64> {
        let statement = SqlGen::new(catalog, self.dialect()).delete(item)?;
        self.execute(&statement).await
    }

    pub async fn update_where(
        &mut self,
        catalog: &Catalog,
        entity: EntityRef,
        assignments: &[(&str, Expr)],
        filter: &Expr,
    ) -> DbResult<u64> {
        let statement =
            SqlGen::new(catalog, self.dialect()).update_where(entity, assignments, filter)?;
        self.execute(&statement).await
    }

    pub async fn delete_where(
        &mut self,
        catalog: &Catalog,
        entity: EntityRef,
        filter: &Expr,
    ) -> DbResult<u64> {
        let statement = SqlGen::new(catalog, self.dialect()).delete_where(entity, filter)?;
        self.execute(&statement).await
    }

    /// Run a query and materialize each row as `T`.
    pub async fn fetch<T: Entity>(&mut self, catalog: &Catalog, query: &SelectExpr) -> DbResult<Vec<T>> {
        let statement = SqlGen::new(catalog, self.dialect()).select(query)?;
        self.query(&statement)
            .await?
            .into_iter()
            .map(|record| record.into_entity())
            .collect()
    }

    pub async fn fetch_by_keys<T: Entity>(
        &mut self,
        catalog: &Catalog,
        keys: &[Value],
    ) -> DbResult<Option<T>> {
        let statement = SqlGen::new(catalog, self.dialect()).select_by_keys(T::ENTITY, keys)?;
        match self.query(&statement).await?.into_iter().next() {
            Some(record) => record.into_entity().map(Some),
            None => Ok(None),
        }
    }

    pub async fn count(
        &mut self,
        catalog: &Catalog,
        entity: EntityRef,
        filter: Option<&Expr>,
    ) -> DbResult<i64> {
        let statement = SqlGen::new(catalog, self.dialect()).count(entity, filter)?;
        let value = self.query_scalar(&statement).await?.unwrap_or(Value::Int(0));
        i64::try_from(value).map_err(|e| DbError::internal(format!("COUNT returned {}", e)))
    }
}
