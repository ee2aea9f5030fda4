use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection};
use tracing::info;

/// Current Unix time in milliseconds, as an SQLite expression.
pub const DEFAULT_TIMESTAMP_MS: &str = "(cast(unixepoch('subsec') * 1000 as int))";

/// Offset added to schema versions before they are written to `PRAGMA user_version`,
/// so a database created by this crate can be told apart from a foreign one.
pub const BASE_DB_VERSION: usize = 70000;

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            #[allow(unused_mut)]
            let mut column = Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                non_null: false,
                default_value: None,
                foreign_key: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SqlType {
    Text,
    Integer,
}

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
        }
    }

    fn parse(declared: &str) -> Option<Self> {
        match declared {
            "TEXT" => Some(SqlType::Text),
            "INTEGER" => Some(SqlType::Integer),
            _ => None,
        }
    }
}

#[allow(unused)]
pub enum ForeignKeyOnChange {
    Restrict,
    SetNull,
    Cascade,
}

impl ForeignKeyOnChange {
    fn as_sql(&self) -> &'static str {
        match self {
            ForeignKeyOnChange::Restrict => "RESTRICT",
            ForeignKeyOnChange::SetNull => "SET NULL",
            ForeignKeyOnChange::Cascade => "CASCADE",
        }
    }
}

pub struct ForeignKey {
    pub foreign_table: &'static str,
    pub foreign_column: &'static str,
    pub on_delete: ForeignKeyOnChange,
}

pub struct Column {
    pub name: &'static str,
    pub sql_type: &'static SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
    pub default_value: Option<&'static str>,
    pub foreign_key: Option<&'static ForeignKey>,
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub indices: &'static [(&'static str, &'static str)],
    pub unique_constraints: &'static [&'static [&'static str]],
}

impl Table {
    fn create_sql(&self) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|column| {
                let mut def = format!("{} {}", column.name, column.sql_type.as_sql());
                if column.is_primary_key {
                    def.push_str(" PRIMARY KEY");
                }
                if column.non_null {
                    def.push_str(" NOT NULL");
                }
                if let Some(default_value) = column.default_value {
                    def.push_str(&format!(" DEFAULT {}", default_value));
                }
                if let Some(fk) = column.foreign_key {
                    def.push_str(&format!(
                        " REFERENCES {}({}) ON DELETE {}",
                        fk.foreign_table,
                        fk.foreign_column,
                        fk.on_delete.as_sql()
                    ));
                }
                def
            })
            .collect();
        for unique in self.unique_constraints {
            parts.push(format!("UNIQUE ({})", unique.join(", ")));
        }
        format!("CREATE TABLE {} ({});", self.name, parts.join(", "))
    }

    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute(&self.create_sql(), params![])
            .with_context(|| format!("Failed to create table {}", self.name))?;
        for (index_name, column_name) in self.indices {
            conn.execute(
                &format!("CREATE INDEX {} ON {}({});", index_name, self.name, column_name),
                params![],
            )?;
        }
        Ok(())
    }

    fn validate_columns(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", self.name))?;
        // (name, declared type, not null, is pk)
        let actual: Vec<(String, String, bool, bool)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i32>(3)? == 1,
                    row.get::<_, i32>(5)? >= 1,
                ))
            })?
            .collect::<rusqlite::Result<_>>()?;

        if actual.len() != self.columns.len() {
            bail!(
                "Table {} has {} columns, expected {} ({})",
                self.name,
                actual.len(),
                self.columns.len(),
                self.columns
                    .iter()
                    .map(|c| c.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        for ((name, declared, non_null, is_pk), expected) in actual.iter().zip(self.columns) {
            if name != expected.name {
                bail!(
                    "Table {} column name mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    name
                );
            }
            if SqlType::parse(declared) != Some(*expected.sql_type) {
                bail!(
                    "Table {} column {} type mismatch: expected {:?}, got {}",
                    self.name,
                    name,
                    expected.sql_type,
                    declared
                );
            }
            if *non_null != expected.non_null || *is_pk != expected.is_primary_key {
                bail!(
                    "Table {} column {} constraint mismatch (not null: {}, primary key: {})",
                    self.name,
                    name,
                    non_null,
                    is_pk
                );
            }
        }
        Ok(())
    }

    fn validate_indices(&self, conn: &Connection) -> Result<()> {
        for (index_name, _) in self.indices {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type='index' AND name=?1 AND tbl_name=?2",
                    params![index_name, self.name],
                    |_| Ok(()),
                )
                .is_ok();
            if !exists {
                bail!("Table {} is missing index '{}'", self.name, index_name);
            }
        }

        if self.unique_constraints.is_empty() {
            return Ok(());
        }

        let mut list_stmt = conn.prepare(&format!("PRAGMA index_list({})", self.name))?;
        let unique_indices: Vec<String> = list_stmt
            .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, i32>(2)?)))?
            .filter_map(|r| r.ok())
            .filter(|(_, unique)| *unique == 1)
            .map(|(name, _)| name)
            .collect();

        let mut column_sets: Vec<Vec<String>> = Vec::with_capacity(unique_indices.len());
        for index_name in &unique_indices {
            let mut info_stmt = conn.prepare(&format!("PRAGMA index_info({})", index_name))?;
            let mut cols: Vec<String> = info_stmt
                .query_map([], |row| row.get::<_, String>(2))?
                .filter_map(|r| r.ok())
                .collect();
            cols.sort();
            column_sets.push(cols);
        }

        for expected in self.unique_constraints {
            let mut wanted: Vec<&str> = expected.to_vec();
            wanted.sort();
            let found = column_sets
                .iter()
                .any(|cols| cols.iter().map(String::as_str).eq(wanted.iter().copied()));
            if !found {
                bail!(
                    "Table {} is missing unique constraint on columns ({})",
                    self.name,
                    expected.join(", ")
                );
            }
        }
        Ok(())
    }
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute("PRAGMA foreign_keys = ON;", params![])?;
        for table in self.tables {
            table.create(conn)?;
        }
        conn.pragma_update(None, "user_version", BASE_DB_VERSION + self.version)?;
        Ok(())
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.validate_columns(conn)?;
            table.validate_indices(conn)?;
        }
        Ok(())
    }
}

/// Brings `conn` up to the latest entry of `schemas`.
///
/// A database without tables gets the latest schema directly. Otherwise pending
/// migrations run inside one transaction and the result is validated.
pub fn migrate_if_needed(
    conn: &mut Connection,
    schemas: &'static [VersionedSchema],
    label: &str,
) -> Result<()> {
    let latest = schemas
        .last()
        .context("At least one schema version is required")?;

    let table_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |r| r.get(0),
    )?;

    if table_count == 0 {
        info!("Creating {} db schema at version {}", label, latest.version);
        latest.create(conn)?;
        return Ok(());
    }

    let db_version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    if db_version < BASE_DB_VERSION as i64 {
        bail!(
            "{} db has user_version {}, which was not written by this server",
            label,
            db_version
        );
    }
    let mut current_version = (db_version - BASE_DB_VERSION as i64) as usize;

    if current_version < latest.version {
        let from_version = current_version;
        let tx = conn.transaction()?;
        for schema in schemas.iter().filter(|s| s.version > from_version) {
            if let Some(migration_fn) = schema.migration {
                info!(
                    "Migrating {} db from version {} to {}",
                    label, current_version, schema.version
                );
                migration_fn(&tx)?;
            }
            current_version = schema.version;
        }
        tx.pragma_update(None, "user_version", BASE_DB_VERSION + current_version)?;
        tx.commit()?;
    }

    conn.execute("PRAGMA foreign_keys = ON;", params![])?;
    latest
        .validate(conn)
        .with_context(|| format!("{} db schema validation failed", label))
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER_FK: ForeignKey = ForeignKey {
        foreign_table: "owners",
        foreign_column: "id",
        on_delete: ForeignKeyOnChange::Cascade,
    };

    const OWNERS: Table = Table {
        name: "owners",
        columns: &[
            sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
            sqlite_column!("digest", &SqlType::Text, non_null = true),
        ],
        indices: &[],
        unique_constraints: &[&["digest"]],
    };

    const ITEMS: Table = Table {
        name: "items",
        columns: &[
            sqlite_column!("owner_id", &SqlType::Integer, non_null = true, foreign_key = Some(&OWNER_FK)),
            sqlite_column!("label", &SqlType::Text, non_null = true),
            sqlite_column!(
                "created_at",
                &SqlType::Integer,
                non_null = true,
                default_value = Some(DEFAULT_TIMESTAMP_MS)
            ),
        ],
        indices: &[("idx_items_owner", "owner_id")],
        unique_constraints: &[&["owner_id", "label"]],
    };

    const SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
        version: 0,
        tables: &[OWNERS, ITEMS],
        migration: None,
    }];

    #[test]
    fn test_create_then_validate() {
        let conn = Connection::open_in_memory().unwrap();
        SCHEMAS[0].create(&conn).unwrap();
        SCHEMAS[0].validate(&conn).unwrap();

        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, BASE_DB_VERSION as i64);
    }

    #[test]
    fn test_unique_constraint_is_enforced() {
        let conn = Connection::open_in_memory().unwrap();
        SCHEMAS[0].create(&conn).unwrap();

        conn.execute("INSERT INTO owners (digest) VALUES ('abc')", [])
            .unwrap();
        let err = conn
            .execute("INSERT INTO owners (digest) VALUES ('abc')", [])
            .unwrap_err();
        assert!(err.to_string().contains("UNIQUE constraint failed: owners.digest"));
    }

    #[test]
    fn test_default_timestamp_is_filled() {
        let conn = Connection::open_in_memory().unwrap();
        SCHEMAS[0].create(&conn).unwrap();
        conn.execute("INSERT INTO owners (digest) VALUES ('abc')", [])
            .unwrap();
        conn.execute("INSERT INTO items (owner_id, label) VALUES (1, 'x')", [])
            .unwrap();
        let created_at: i64 = conn
            .query_row("SELECT created_at FROM items", [], |r| r.get(0))
            .unwrap();
        // Sometime after 2020-01-01, in milliseconds
        assert!(created_at > 1_577_836_800_000);
    }

    #[test]
    fn test_validate_detects_missing_unique_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE owners (id INTEGER PRIMARY KEY, digest TEXT NOT NULL)",
            [],
        )
        .unwrap();

        let err = OWNERS.validate_indices(&conn).unwrap_err().to_string();
        assert!(err.contains("missing unique constraint"));
        assert!(err.contains("digest"));
    }

    #[test]
    fn test_validate_detects_missing_index() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE items (owner_id INTEGER NOT NULL, label TEXT NOT NULL, created_at INTEGER NOT NULL, UNIQUE (label, owner_id))",
            [],
        )
        .unwrap();

        let err = ITEMS.validate_indices(&conn).unwrap_err().to_string();
        assert!(err.contains("missing index 'idx_items_owner'"));
    }

    #[test]
    fn test_validate_detects_column_type_mismatch() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE owners (id INTEGER PRIMARY KEY, digest INTEGER NOT NULL UNIQUE)",
            [],
        )
        .unwrap();

        let err = OWNERS.validate_columns(&conn).unwrap_err().to_string();
        assert!(err.contains("type mismatch"));
    }

    #[test]
    fn test_migrate_if_needed_creates_then_reopens() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("test.db");

        let mut conn = Connection::open(&path).unwrap();
        migrate_if_needed(&mut conn, SCHEMAS, "test").unwrap();
        drop(conn);

        let mut conn = Connection::open(&path).unwrap();
        migrate_if_needed(&mut conn, SCHEMAS, "test").unwrap();
    }

    fn add_item_note(conn: &Connection) -> Result<()> {
        conn.execute("ALTER TABLE items ADD COLUMN note TEXT", [])?;
        Ok(())
    }

    const ITEMS_V1: Table = Table {
        name: "items",
        columns: &[
            sqlite_column!("owner_id", &SqlType::Integer, non_null = true, foreign_key = Some(&OWNER_FK)),
            sqlite_column!("label", &SqlType::Text, non_null = true),
            sqlite_column!(
                "created_at",
                &SqlType::Integer,
                non_null = true,
                default_value = Some(DEFAULT_TIMESTAMP_MS)
            ),
            sqlite_column!("note", &SqlType::Text),
        ],
        indices: &[("idx_items_owner", "owner_id")],
        unique_constraints: &[&["owner_id", "label"]],
    };

    const SCHEMAS_V1: &[VersionedSchema] = &[
        VersionedSchema {
            version: 0,
            tables: &[OWNERS, ITEMS],
            migration: None,
        },
        VersionedSchema {
            version: 1,
            tables: &[OWNERS, ITEMS_V1],
            migration: Some(add_item_note),
        },
    ];

    #[test]
    fn test_migrate_if_needed_runs_pending_migrations() {
        let mut conn = Connection::open_in_memory().unwrap();
        SCHEMAS_V1[0].create(&conn).unwrap();
        conn.execute("INSERT INTO owners (digest) VALUES ('abc')", [])
            .unwrap();
        conn.execute("INSERT INTO items (owner_id, label) VALUES (1, 'x')", [])
            .unwrap();

        migrate_if_needed(&mut conn, SCHEMAS_V1, "test").unwrap();

        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, BASE_DB_VERSION as i64 + 1);

        conn.execute("UPDATE items SET note = 'kept' WHERE label = 'x'", [])
            .unwrap();
        let note: String = conn
            .query_row("SELECT note FROM items WHERE label = 'x'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(note, "kept");

        // Already at the latest version, so nothing runs twice
        migrate_if_needed(&mut conn, SCHEMAS_V1, "test").unwrap();
    }

    #[test]
    fn test_migrate_if_needed_rejects_foreign_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE something (id INTEGER)", [])
            .unwrap();

        let err = migrate_if_needed(&mut conn, SCHEMAS, "test")
            .unwrap_err()
            .to_string();
        assert!(err.contains("not written by this server"));
    }
}
