//! Shared fixtures: a small country / city / person model and SQLite helpers.

#![allow(dead_code)]

use liteorm_core::config::DataSourceConfig;
use liteorm_core::entity::Entity;
use liteorm_core::error::ValueError;
use liteorm_core::expr::Value;
use liteorm_core::meta::{
    ColumnDescriptor, EntityDescriptor, EntityRef, ForeignColumnDescriptor, ValueType,
};
use std::path::Path;

// =============================================================================
// Model
// =============================================================================

fn country() -> EntityDescriptor {
    EntityDescriptor::new("Country", "Countries")
        .column(ColumnDescriptor::new("Id", ValueType::BigInt).identity())
        .column(ColumnDescriptor::new("Name", ValueType::Text).length(80).unique())
}

fn city() -> EntityDescriptor {
    EntityDescriptor::new("City", "Cities")
        .column(ColumnDescriptor::new("Id", ValueType::BigInt).identity())
        .column(ColumnDescriptor::new("Name", ValueType::Text).length(80))
        .column(ColumnDescriptor::new("CountryId", ValueType::BigInt).foreign_as(COUNTRY, "N"))
        .foreign_column(ForeignColumnDescriptor::new("CountryName", "N", "Name"))
}

fn person() -> EntityDescriptor {
    EntityDescriptor::new("Person", "People")
        .column(ColumnDescriptor::new("Id", ValueType::BigInt).identity())
        .column(ColumnDescriptor::new("Name", ValueType::Text).length(100).index())
        .column(ColumnDescriptor::new("Age", ValueType::Int))
        .column(
            ColumnDescriptor::new("CityId", ValueType::BigInt)
                .nullable()
                .foreign_as(CITY, "C"),
        )
        .foreign_column(ForeignColumnDescriptor::new("CityName", "C", "Name"))
        .foreign_column(ForeignColumnDescriptor::new("CountryName", "C", "CountryName"))
}

pub const COUNTRY: EntityRef = EntityRef::new("Country", country);
pub const CITY: EntityRef = EntityRef::new("City", city);
pub const PERSON: EntityRef = EntityRef::new("Person", person);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Country {
    pub id: i64,
    pub name: String,
}

impl Country {
    pub fn named(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
        }
    }
}

impl Entity for Country {
    const ENTITY: EntityRef = COUNTRY;

    fn get(&self, property: &str) -> Option<Value> {
        match property {
            "Id" => Some(self.id.into()),
            "Name" => Some(self.name.clone().into()),
            _ => None,
        }
    }

    fn set(&mut self, property: &str, value: Value) -> Result<(), ValueError> {
        match property {
            "Id" => self.id = value.try_into()?,
            "Name" => self.name = value.try_into()?,
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct City {
    pub id: i64,
    pub name: String,
    pub country_id: i64,
    pub country_name: Option<String>,
}

impl Entity for City {
    const ENTITY: EntityRef = CITY;

    fn get(&self, property: &str) -> Option<Value> {
        match property {
            "Id" => Some(self.id.into()),
            "Name" => Some(self.name.clone().into()),
            "CountryId" => Some(self.country_id.into()),
            "CountryName" => Some(self.country_name.clone().into()),
            _ => None,
        }
    }

    fn set(&mut self, property: &str, value: Value) -> Result<(), ValueError> {
        match property {
            "Id" => self.id = value.try_into()?,
            "Name" => self.name = value.try_into()?,
            "CountryId" => self.country_id = value.try_into()?,
            "CountryName" => self.country_name = value.try_into_option()?,
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub age: i32,
    pub city_id: Option<i64>,
    pub city_name: Option<String>,
    pub country_name: Option<String>,
}

impl Person {
    pub fn new(name: &str, age: i32, city_id: Option<i64>) -> Self {
        Self {
            name: name.to_string(),
            age,
            city_id,
            ..Default::default()
        }
    }
}

impl Entity for Person {
    const ENTITY: EntityRef = PERSON;

    fn get(&self, property: &str) -> Option<Value> {
        match property {
            "Id" => Some(self.id.into()),
            "Name" => Some(self.name.clone().into()),
            "Age" => Some(self.age.into()),
            "CityId" => Some(self.city_id.into()),
            "CityName" => Some(self.city_name.clone().into()),
            "CountryName" => Some(self.country_name.clone().into()),
            _ => None,
        }
    }

    fn set(&mut self, property: &str, value: Value) -> Result<(), ValueError> {
        match property {
            "Id" => self.id = value.try_into()?,
            "Name" => self.name = value.try_into()?,
            "Age" => self.age = value.try_into()?,
            "CityId" => self.city_id = value.try_into_option()?,
            "CityName" => self.city_name = value.try_into_option()?,
            "CountryName" => self.country_name = value.try_into_option()?,
            _ => {}
        }
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// `name=sqlite:<dir>/<file>` plus extra options (`"sync_schema=true"`, ...).
pub fn sqlite_source(dir: &Path, name: &str, options: &str) -> DataSourceConfig {
    let mut spec = format!("{}=sqlite:{}", name, dir.join(format!("{name}.db")).display());
    if !options.is_empty() {
        spec.push('?');
        spec.push_str(options);
    }
    DataSourceConfig::parse(&spec).unwrap()
}
