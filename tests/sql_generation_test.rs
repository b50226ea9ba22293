//! SQL generation across dialects.

mod common;

use common::{CITY, COUNTRY, Country, PERSON, Person};
use liteorm_core::expr::{Expr, Orderable, Selectable, TableExpr, Value};
use liteorm_core::meta::Catalog;
use liteorm_core::sql::{Dialect, IdentityFetch, SqlGen, SqlGenResult};

const EXECUTABLE: [Dialect; 3] = [Dialect::SQLite, Dialect::PostgreSql, Dialect::MySql];
const ALL: [Dialect; 4] = [
    Dialect::SQLite,
    Dialect::PostgreSql,
    Dialect::MySql,
    Dialect::SqlServer,
];

fn placeholder_count(dialect: Dialect, sql: &str) -> usize {
    match dialect {
        Dialect::SQLite | Dialect::MySql => sql.matches('?').count(),
        Dialect::PostgreSql => sql.matches('$').count(),
        Dialect::SqlServer => sql.matches("@p").count(),
    }
}

fn assert_params_match(dialect: Dialect, result: &SqlGenResult) {
    assert_eq!(
        placeholder_count(dialect, &result.sql),
        result.params.len(),
        "{dialect}: {}",
        result.sql
    );
    for (i, (name, _)) in result.params.iter().enumerate() {
        assert_eq!(name, &format!("p{i}"));
    }
}

fn filtered_people() -> Expr {
    Expr::prop("Name")
        .starts_with("A")
        .and(Expr::prop("Age").in_list([20, 30, 40]))
        .and(Expr::prop("CountryName").ne("Nowhere"))
        .and(Expr::prop("CityId").is_not_null())
}

#[test]
fn test_view_select_on_sqlite() {
    let catalog = Catalog::new();
    let query = TableExpr::view(PERSON)
        .filter(Expr::prop("Age").gt(25))
        .order_by(Expr::prop("Name").asc())
        .select_all();

    let result = SqlGen::new(&catalog, Dialect::SQLite).select(&query).unwrap();
    assert_eq!(
        result.sql,
        "SELECT \"People\".\"Id\" AS \"Id\", \"People\".\"Name\" AS \"Name\", \
         \"People\".\"Age\" AS \"Age\", \"People\".\"CityId\" AS \"CityId\", \
         \"C\".\"Name\" AS \"CityName\", \"C_N\".\"Name\" AS \"CountryName\" \
         FROM \"People\" \
         LEFT JOIN \"Cities\" \"C\" ON \"C\".\"Id\" = \"People\".\"CityId\" \
         LEFT JOIN \"Countries\" \"C_N\" ON \"C_N\".\"Id\" = \"C\".\"CountryId\" \
         WHERE \"People\".\"Age\" > ?1 \
         ORDER BY \"People\".\"Name\""
    );
    assert_eq!(result.params, vec![("p0".to_string(), Value::Int(25))]);
    result.check_syntax(Dialect::SQLite).unwrap();
}

#[test]
fn test_placeholders_match_params_in_every_dialect() {
    let catalog = Catalog::new();
    let query = TableExpr::view(PERSON)
        .filter(filtered_people())
        .order_by(Expr::prop("Age").desc())
        .section(20, 10)
        .select_all();

    for dialect in ALL {
        let result = SqlGen::new(&catalog, dialect).select(&query).unwrap();
        assert_params_match(dialect, &result);
        // "A", 20, 30, 40, "Nowhere"
        assert_eq!(result.params.len(), 5);
        assert!(result.sql.contains("IS NOT NULL"), "{}", result.sql);
    }
}

#[test]
fn test_pagination_forms() {
    let catalog = Catalog::new();
    let query = TableExpr::view(COUNTRY)
        .order_by(Expr::prop("Name").asc())
        .section(20, 10)
        .select([Expr::prop("Name")]);

    let sql = |dialect| SqlGen::new(&catalog, dialect).select(&query).unwrap().sql;
    assert!(sql(Dialect::SQLite).ends_with("LIMIT 20,10"));
    assert!(sql(Dialect::MySql).ends_with("LIMIT 20,10"));
    assert!(sql(Dialect::PostgreSql).ends_with("LIMIT 10 OFFSET 20"));
    assert!(sql(Dialect::SqlServer).ends_with("WHERE Row_Number > 20 AND Row_Number <= 30"));
}

#[test]
fn test_generated_sql_parses() {
    let catalog = Catalog::new();
    let query = TableExpr::view(PERSON)
        .filter(filtered_people())
        .order_by(Expr::prop("Name").asc())
        .section(0, 25)
        .select_all();

    for dialect in [Dialect::PostgreSql, Dialect::MySql] {
        SqlGen::new(&catalog, dialect)
            .select(&query)
            .unwrap()
            .check_syntax(dialect)
            .unwrap();
    }

    let unpaged = TableExpr::view(PERSON).filter(filtered_people()).select_all();
    for dialect in EXECUTABLE {
        SqlGen::new(&catalog, dialect)
            .select(&unpaged)
            .unwrap()
            .check_syntax(dialect)
            .unwrap();
    }
}

#[test]
fn test_subquery_uses_fresh_alias() {
    let catalog = Catalog::new();
    let big_cities = TableExpr::table(CITY)
        .filter(Expr::prop("Name").like("%burg"))
        .select([Expr::prop("Id")]);
    let query = TableExpr::view(PERSON)
        .filter(Expr::prop("CityId").in_query(big_cities).and(Expr::prop("Age").lt(50)))
        .select([Expr::prop("Name")]);

    let result = SqlGen::new(&catalog, Dialect::PostgreSql).select(&query).unwrap();
    assert!(
        result.sql.contains("IN (SELECT \"Id\" AS \"Id\" FROM \"Cities\" \"T1\" WHERE \"Name\" LIKE $1)"),
        "{}",
        result.sql
    );
    assert!(result.sql.ends_with("\"People\".\"Age\" < $2)"), "{}", result.sql);
    assert_params_match(Dialect::PostgreSql, &result);
}

#[test]
fn test_empty_in_list() {
    let catalog = Catalog::new();
    let generator = SqlGen::new(&catalog, Dialect::SQLite);

    let none = generator
        .to_sql(PERSON, &Expr::prop("Age").in_list(Vec::<i64>::new()))
        .unwrap();
    assert_eq!(none.sql, "1=0");
    assert!(none.params.is_empty());

    let all = generator
        .to_sql(PERSON, &Expr::prop("Age").in_list(Vec::<i64>::new()).negate())
        .unwrap();
    assert_eq!(all.sql, "1=1");
}

#[test]
fn test_unknown_property_is_rejected() {
    let catalog = Catalog::new();
    let query = TableExpr::view(PERSON)
        .filter(Expr::prop("Salary").gt(1))
        .select_all();
    assert!(SqlGen::new(&catalog, Dialect::MySql).select(&query).is_err());
}

#[test]
fn test_insert_skips_identity_and_reports_fetch() {
    let catalog = Catalog::new();
    let item = Person::new("Ann", 30, Some(4));

    let sqlite = SqlGen::new(&catalog, Dialect::SQLite).insert(&item).unwrap();
    assert_eq!(
        sqlite.statement.sql,
        "INSERT INTO \"People\" (\"Name\", \"Age\", \"CityId\") VALUES (?1, ?2, ?3)"
    );
    assert_eq!(sqlite.identity, IdentityFetch::Query("SELECT last_insert_rowid()"));
    assert_eq!(sqlite.identity_property.as_deref(), Some("Id"));

    let pg = SqlGen::new(&catalog, Dialect::PostgreSql).insert(&item).unwrap();
    assert!(pg.statement.sql.ends_with("VALUES ($1, $2, $3) RETURNING \"Id\""));
    assert_eq!(pg.identity, IdentityFetch::Returning);

    let mysql = SqlGen::new(&catalog, Dialect::MySql).insert(&item).unwrap();
    assert_eq!(
        mysql.statement.sql,
        "INSERT INTO `People` (`Name`, `Age`, `CityId`) VALUES (?, ?, ?)"
    );

    let mssql = SqlGen::new(&catalog, Dialect::SqlServer).insert(&item).unwrap();
    assert!(mssql.statement.sql.ends_with("VALUES (@p0, @p1, @p2)"));
    assert_eq!(mssql.identity, IdentityFetch::Query("SELECT @@IDENTITY"));
}

#[test]
fn test_update_and_delete_by_keys() {
    let catalog = Catalog::new();
    let mut item = Country::named("France");
    item.id = 7;

    let update = SqlGen::new(&catalog, Dialect::PostgreSql).update(&item).unwrap();
    assert_eq!(
        update.sql,
        "UPDATE \"Countries\" SET \"Name\" = $1 WHERE \"Id\" = $2"
    );
    assert_eq!(
        update.values().cloned().collect::<Vec<_>>(),
        vec![Value::from("France"), Value::Int(7)]
    );

    let delete = SqlGen::new(&catalog, Dialect::MySql).delete(&item).unwrap();
    assert_eq!(delete.sql, "DELETE FROM `Countries` WHERE `Id` = ?");
    assert_eq!(delete.params.len(), 1);

    let wrong_arity = SqlGen::new(&catalog, Dialect::MySql)
        .delete_by_keys(COUNTRY, &[Value::Int(1), Value::Int(2)]);
    assert!(wrong_arity.is_err());
}

#[test]
fn test_update_where_renders_expressions() {
    let catalog = Catalog::new();
    let result = SqlGen::new(&catalog, Dialect::SQLite)
        .update_where(
            PERSON,
            &[("Age", Expr::prop("Age").add(1))],
            &Expr::prop("Name").eq("Ann"),
        )
        .unwrap();
    assert_eq!(
        result.sql,
        "UPDATE \"People\" SET \"Age\" = (\"Age\" + ?1) WHERE \"Name\" = ?2"
    );
    assert_params_match(Dialect::SQLite, &result);

    let identity = SqlGen::new(&catalog, Dialect::SQLite).update_where(
        PERSON,
        &[("Id", Expr::value(1))],
        &Expr::prop("Name").eq("Ann"),
    );
    assert!(identity.is_err());
}

#[test]
fn test_count_with_foreign_filter() {
    let catalog = Catalog::new();
    let filter = Expr::prop("CountryName").eq("France");
    let result = SqlGen::new(&catalog, Dialect::MySql)
        .count(PERSON, Some(&filter))
        .unwrap();
    assert!(result.sql.starts_with("SELECT COUNT(*) AS `Count` FROM `People` LEFT JOIN"));
    assert!(result.sql.ends_with("WHERE `C_N`.`Name` = ?"));
    result.check_syntax(Dialect::MySql).unwrap();
}

#[test]
fn test_ddl() {
    let catalog = Catalog::new();
    let people = catalog.table_definition(PERSON).unwrap();

    let sqlite = SqlGen::new(&catalog, Dialect::SQLite).create_table(&people);
    assert_eq!(
        sqlite.sql,
        "CREATE TABLE \"People\" (\"Id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
         \"Name\" TEXT NOT NULL, \"Age\" INTEGER NOT NULL, \"CityId\" INTEGER)"
    );
    sqlite.check_syntax(Dialect::SQLite).unwrap();

    let pg = SqlGen::new(&catalog, Dialect::PostgreSql).create_table(&people);
    assert!(pg.sql.contains("\"Id\" BIGINT GENERATED BY DEFAULT AS IDENTITY NOT NULL"));
    assert!(pg.sql.ends_with("PRIMARY KEY (\"Id\"))"));
    pg.check_syntax(Dialect::PostgreSql).unwrap();

    let name = people.column("Name").unwrap();
    let mysql = SqlGen::new(&catalog, Dialect::MySql);
    assert_eq!(
        mysql.add_column(&people, name).sql,
        "ALTER TABLE `People` ADD COLUMN `Name` VARCHAR(100)"
    );
    assert_eq!(
        mysql.create_index(&people, name).sql,
        "CREATE INDEX `IX_People_Name` ON `People` (`Name`)"
    );

    let countries = catalog.table_definition(COUNTRY).unwrap();
    let unique = countries.column("Name").unwrap();
    assert!(
        SqlGen::new(&catalog, Dialect::SqlServer)
            .create_index(&countries, unique)
            .sql
            .starts_with("CREATE UNIQUE INDEX [IX_Countries_Name]")
    );
}
