//! The bridge between host structs and the metadata catalog.

use crate::error::ValueError;
use crate::expr::Value;
use crate::meta::EntityRef;

/// A host type mapped to a table.
///
/// Implementations expose their fields by property name. `get` returns `None`
/// for properties the type does not carry; `set` ignores them.
///
/// ```ignore
/// impl Entity for User {
///     const ENTITY: EntityRef = USER;
///
///     fn get(&self, property: &str) -> Option<Value> {
///         match property {
///             "Id" => Some(self.id.into()),
///             "Name" => Some(self.name.clone().into()),
///             _ => None,
///         }
///     }
///
///     fn set(&mut self, property: &str, value: Value) -> Result<(), ValueError> {
///         match property {
///             "Id" => self.id = value.try_into()?,
///             "Name" => self.name = value.try_into()?,
///             _ => {}
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Entity: Default + Send + Sync + 'static {
    const ENTITY: EntityRef;

    fn get(&self, property: &str) -> Option<Value>;

    fn set(&mut self, property: &str, value: Value) -> Result<(), ValueError>;
}
