use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::filter::{Filter, ENTRY_DN};
use crate::{Attrs, DirectoryError, DirectoryStore, Entry, ModOp, Modification, Result, NO_ATTRS};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS entries (dn TEXT PRIMARY KEY NOT NULL)",
    r#"CREATE TABLE IF NOT EXISTS entry_attrs (
        dn TEXT NOT NULL REFERENCES entries(dn) ON DELETE CASCADE,
        name TEXT NOT NULL,
        value TEXT NOT NULL,
        UNIQUE (dn, name, value)
    )"#,
    "CREATE INDEX IF NOT EXISTS entry_attrs_name_value ON entry_attrs (name, value)",
];

/// Directory entries stored in SQLite, one row per attribute value
#[derive(Debug, Clone)]
pub struct SqliteDirectory {
    pool: Pool<Sqlite>,
}

impl SqliteDirectory {
    /// Open (and create if needed) a directory database
    pub async fn connect(database_path: &str) -> Result<Self> {
        let connection_string = if database_path.starts_with("sqlite:") {
            database_path.to_string()
        } else {
            if let Some(parent) = Path::new(database_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            format!("sqlite://{}", database_path)
        };
        info!("Connecting to directory database at: {}", connection_string);

        let options = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let directory = Self { pool };
        directory.create_tables().await?;
        Ok(directory)
    }

    /// Private in-memory directory. A single connection keeps every query on the same database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let directory = Self { pool };
        directory.create_tables().await?;
        Ok(directory)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn create_tables(&self) -> Result<()> {
        for sql in SCHEMA {
            sqlx::query(sql).execute(&self.pool).await?;
        }
        debug!("Directory tables ready");
        Ok(())
    }

    async fn exists(&self, dn: &str) -> Result<bool> {
        let row = sqlx::query("SELECT dn FROM entries WHERE dn = ?")
            .bind(dn)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn read_attrs(&self, dn: &str, attrs: &[&str]) -> Result<Attrs> {
        let mut result = Attrs::new();
        if attrs == [NO_ATTRS] {
            return Ok(result);
        }
        let mut sql = String::from("SELECT name, value FROM entry_attrs WHERE dn = ?");
        if !attrs.is_empty() {
            sql.push_str(&format!(" AND name IN ({})", placeholders(attrs.len())));
        }
        sql.push_str(" ORDER BY rowid");

        let mut query = sqlx::query(&sql).bind(dn);
        for attr in attrs {
            query = query.bind(*attr);
        }
        for row in query.fetch_all(&self.pool).await? {
            let name: String = row.try_get("name")?;
            let value: String = row.try_get("value")?;
            result.entry(name).or_default().push(value);
        }
        Ok(result)
    }
}

#[async_trait]
impl DirectoryStore for SqliteDirectory {
    async fn read(&self, dn: &str, attrs: &[&str]) -> Result<Option<Entry>> {
        if !self.exists(dn).await? {
            return Ok(None);
        }
        let attrs = self.read_attrs(dn, attrs).await?;
        Ok(Some(Entry {
            dn: dn.to_string(),
            attrs,
        }))
    }

    async fn search(
        &self,
        base: &str,
        filter: &Filter,
        attrs: &[&str],
        size_limit: Option<usize>,
    ) -> Result<Vec<Entry>> {
        let mut sql = String::from("SELECT e.dn FROM entries e WHERE ");
        let mut binds = Vec::new();
        if !base.is_empty() {
            sql.push_str("(e.dn = ? OR e.dn LIKE ? ESCAPE '\\') AND ");
            binds.push(base.to_string());
            binds.push(format!("%,{}", escape_like(base)));
        }
        push_filter(filter, &mut sql, &mut binds);
        sql.push_str(" ORDER BY e.dn");
        if let Some(limit) = size_limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        debug!("search {} {} => {}", base, filter, sql);

        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let dn: String = row.try_get("dn")?;
            let attrs = self.read_attrs(&dn, attrs).await?;
            entries.push(Entry { dn, attrs });
        }
        Ok(entries)
    }

    async fn add(&self, dn: &str, attrs: Attrs) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query("INSERT OR IGNORE INTO entries (dn) VALUES (?)")
            .bind(dn)
            .execute(&mut *tx)
            .await?;
        if inserted.rows_affected() == 0 {
            return Err(DirectoryError::EntryExists(dn.to_string()));
        }
        for (name, values) in &attrs {
            for value in values {
                sqlx::query("INSERT OR IGNORE INTO entry_attrs (dn, name, value) VALUES (?, ?, ?)")
                    .bind(dn)
                    .bind(name)
                    .bind(value)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        info!("Added entry {}", dn);
        Ok(())
    }

    async fn delete(&self, dn: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM entry_attrs WHERE dn = ?")
            .bind(dn)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM entries WHERE dn = ?")
            .bind(dn)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(DirectoryError::EntryNotFound(dn.to_string()));
        }
        tx.commit().await?;
        info!("Deleted entry {}", dn);
        Ok(())
    }

    async fn modify(&self, dn: &str, mods: &[Modification]) -> Result<()> {
        if !self.exists(dn).await? {
            return Err(DirectoryError::EntryNotFound(dn.to_string()));
        }
        let mut tx = self.pool.begin().await?;
        for m in mods {
            debug!("modify {}: {:?} {} {:?}", dn, m.op, m.attr, m.values);
            if m.op == ModOp::Replace || (m.op == ModOp::Delete && m.values.is_empty()) {
                sqlx::query("DELETE FROM entry_attrs WHERE dn = ? AND name = ?")
                    .bind(dn)
                    .bind(&m.attr)
                    .execute(&mut *tx)
                    .await?;
            }
            match m.op {
                ModOp::Add | ModOp::Replace => {
                    for value in &m.values {
                        sqlx::query(
                            "INSERT OR IGNORE INTO entry_attrs (dn, name, value) VALUES (?, ?, ?)",
                        )
                        .bind(dn)
                        .bind(&m.attr)
                        .bind(value)
                        .execute(&mut *tx)
                        .await?;
                    }
                }
                ModOp::Delete => {
                    for value in &m.values {
                        sqlx::query("DELETE FROM entry_attrs WHERE dn = ? AND name = ? AND value = ?")
                            .bind(dn)
                            .bind(&m.attr)
                            .bind(value)
                            .execute(&mut *tx)
                            .await?;
                    }
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn escape_like(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn attr_exists(condition: &str) -> String {
    format!(
        "EXISTS (SELECT 1 FROM entry_attrs a WHERE a.dn = e.dn AND a.name = ? AND {})",
        condition
    )
}

/// Compile a filter to a SQL condition on `entries e`
fn push_filter(filter: &Filter, sql: &mut String, binds: &mut Vec<String>) {
    match filter {
        Filter::And(filters) | Filter::Or(filters) if filters.is_empty() => {
            let always = matches!(filter, Filter::And(_));
            sql.push_str(if always { "1=1" } else { "1=0" });
        }
        Filter::And(filters) | Filter::Or(filters) => {
            let op = if matches!(filter, Filter::And(_)) { " AND " } else { " OR " };
            sql.push('(');
            for (i, sub) in filters.iter().enumerate() {
                if i > 0 {
                    sql.push_str(op);
                }
                push_filter(sub, sql, binds);
            }
            sql.push(')');
        }
        Filter::Not(sub) => {
            sql.push_str("NOT (");
            push_filter(sub, sql, binds);
            sql.push(')');
        }
        Filter::Equality { attr, value } if attr == ENTRY_DN => {
            sql.push_str("e.dn = ?");
            binds.push(value.clone());
        }
        Filter::Equality { attr, value } => {
            sql.push_str(&attr_exists("a.value = ?"));
            binds.push(attr.clone());
            binds.push(value.clone());
        }
        Filter::Present { attr } if attr == ENTRY_DN => sql.push_str("1=1"),
        Filter::Present { attr } => {
            sql.push_str(&attr_exists("1=1"));
            binds.push(attr.clone());
        }
        Filter::Substring { attr, parts } => {
            let pattern: Vec<String> = parts.iter().map(|p| escape_like(p)).collect();
            let pattern = pattern.join("%");
            if attr == ENTRY_DN {
                sql.push_str("e.dn LIKE ? ESCAPE '\\'");
            } else {
                sql.push_str(&attr_exists("a.value LIKE ? ESCAPE '\\'"));
                binds.push(attr.clone());
            }
            binds.push(pattern);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &[&str])]) -> Attrs {
        pairs
            .iter()
            .map(|(name, values)| {
                (
                    name.to_string(),
                    values.iter().map(|v| v.to_string()).collect(),
                )
            })
            .collect()
    }

    async fn populated() -> SqliteDirectory {
        let dir = SqliteDirectory::in_memory().await.unwrap();
        dir.add("ou=groups,dc=nodomain", attrs(&[("ou", &["groups"])]))
            .await
            .unwrap();
        dir.add(
            "cn=a.b,ou=groups,dc=nodomain",
            attrs(&[("cn", &["a.b"]), ("member", &["uid=u1,ou=people,dc=nodomain", "uid=u2,ou=people,dc=nodomain"])]),
        )
        .await
        .unwrap();
        dir.add(
            "cn=a.c,ou=groups,dc=nodomain",
            attrs(&[("cn", &["a.c"]), ("description", &["Collaboration Foo"])]),
        )
        .await
        .unwrap();
        dir.add("uid=u1,ou=people,dc=nodomain", attrs(&[("uid", &["u1"])]))
            .await
            .unwrap();
        dir
    }

    #[tokio::test]
    async fn test_read_entry() {
        let dir = populated().await;
        let entry = dir
            .read("cn=a.b,ou=groups,dc=nodomain", &["member"])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.values("member").len(), 2);
        assert!(!entry.has("cn"));

        let entry = dir
            .read("cn=a.b,ou=groups,dc=nodomain", &[NO_ATTRS])
            .await
            .unwrap()
            .unwrap();
        assert!(entry.attrs.is_empty());

        assert!(dir.read("cn=zz,ou=groups,dc=nodomain", &[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_with_base_and_filter() {
        let dir = populated().await;

        let found = dir
            .search("ou=groups,dc=nodomain", &Filter::prefix("cn", "a."), &[NO_ATTRS], None)
            .await
            .unwrap();
        let dns: Vec<_> = found.iter().map(|e| e.dn.as_str()).collect();
        assert_eq!(dns, vec!["cn=a.b,ou=groups,dc=nodomain", "cn=a.c,ou=groups,dc=nodomain"]);

        let found = dir
            .search(
                "ou=people,dc=nodomain",
                &Filter::present("cn"),
                &[],
                None,
            )
            .await
            .unwrap();
        assert!(found.is_empty());

        let filter = Filter::parse("(description=*foo*)").unwrap();
        let found = dir.search("", &filter, &[], Some(10)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].first("cn"), Some("a.c"));

        let filter = Filter::and2(
            Filter::present("cn"),
            Filter::negate(Filter::eq("member", "uid=u1,ou=people,dc=nodomain")),
        );
        let found = dir.search("", &filter, &[NO_ATTRS], None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].dn, "cn=a.c,ou=groups,dc=nodomain");

        let filter = Filter::eq(ENTRY_DN, "ou=groups,dc=nodomain");
        let found = dir.search("", &filter, &["ou"], None).await.unwrap();
        assert_eq!(found[0].first("ou"), Some("groups"));
    }

    #[tokio::test]
    async fn test_size_limit() {
        let dir = populated().await;
        let found = dir
            .search("", &Filter::And(vec![]), &[NO_ATTRS], Some(2))
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_modify() {
        let dir = populated().await;
        let dn = "cn=a.b,ou=groups,dc=nodomain";
        dir.modify(
            dn,
            &[
                Modification::add("member", vec!["uid=u3,ou=people,dc=nodomain".to_string()]),
                Modification::delete("member", vec!["uid=u1,ou=people,dc=nodomain".to_string()]),
                Modification::replace("description", vec!["new".to_string()]),
            ],
        )
        .await
        .unwrap();

        let entry = dir.read(dn, &[]).await.unwrap().unwrap();
        assert_eq!(
            entry.values("member"),
            &["uid=u2,ou=people,dc=nodomain".to_string(), "uid=u3,ou=people,dc=nodomain".to_string()]
        );
        assert_eq!(entry.first("description"), Some("new"));

        dir.modify(dn, &[Modification::delete("member", vec![])]).await.unwrap();
        let entry = dir.read(dn, &[]).await.unwrap().unwrap();
        assert!(!entry.has("member"));
    }

    #[tokio::test]
    async fn test_add_delete_errors() {
        let dir = populated().await;
        let err = dir
            .add("cn=a.b,ou=groups,dc=nodomain", Attrs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::EntryExists(_)));

        dir.delete("cn=a.b,ou=groups,dc=nodomain").await.unwrap();
        let err = dir.delete("cn=a.b,ou=groups,dc=nodomain").await.unwrap_err();
        assert!(matches!(err, DirectoryError::EntryNotFound(_)));

        let err = dir
            .modify("cn=a.b,ou=groups,dc=nodomain", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::EntryNotFound(_)));
    }

    #[tokio::test]
    async fn test_file_database() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("data").join("directory.db");
        let dir = SqliteDirectory::connect(path.to_str().unwrap()).await.unwrap();
        dir.add("dc=nodomain", Attrs::new()).await.unwrap();
        drop(dir);

        let dir = SqliteDirectory::connect(path.to_str().unwrap()).await.unwrap();
        assert!(dir.read("dc=nodomain", &[]).await.unwrap().is_some());
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("a_b%c\\"), "a\\_b\\%c\\\\");
    }
}
