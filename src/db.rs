use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::cities::is_valid_slug;
use crate::error::{Result, ScrapeError};

/// One fully-populated listing. Built only by the detail extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct ApartmentRecord {
    pub district: String,
    pub longitude: f64,
    pub latitude: f64,
    pub area: f64,
    pub price: f64,
    pub price_per_meter: f64,
}

/// Where a run writes its rows. One table per city slug.
pub trait StorageSink {
    /// Idempotent.
    fn create_table(&mut self, slug: &str) -> Result<()>;
    /// Fails if the table does not exist.
    fn drop_table(&mut self, slug: &str) -> Result<()>;
    fn insert(&mut self, slug: &str, record: &ApartmentRecord) -> Result<()>;
    /// Commit everything inserted since the last commit.
    fn commit(&mut self) -> Result<()>;
}

pub struct SqliteStorage {
    conn: Connection,
    in_tx: bool,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self { conn, in_tx: false })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            in_tx: false,
        })
    }

    /// Make sure every known city has a table, so the first run has one to drop.
    pub fn init_schema<'a>(&mut self, slugs: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for slug in slugs {
            self.create_table(slug)?;
        }
        Ok(())
    }

    // ── Read helpers for the CLI ──

    pub fn creation_date(&self, slug: &str) -> Result<Option<String>> {
        let table = table_ident(slug)?;
        let date = self
            .conn
            .query_row(&format!("SELECT creation_date FROM {} LIMIT 1", table), [], |r| r.get(0))
            .optional()?;
        Ok(date)
    }

    pub fn row_count(&self, slug: &str) -> Result<usize> {
        let table = table_ident(slug)?;
        let n: usize = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?;
        Ok(n)
    }
}

impl StorageSink for SqliteStorage {
    fn create_table(&mut self, slug: &str) -> Result<()> {
        let table = table_ident(slug)?;
        let today = chrono::Local::now().format("%Y-%m-%d");
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id              INTEGER PRIMARY KEY,
                district        TEXT NOT NULL,
                longitude       REAL NOT NULL,
                latitude        REAL NOT NULL,
                area            REAL NOT NULL,
                price           REAL NOT NULL,
                price_per_meter REAL NOT NULL,
                creation_date   TEXT NOT NULL DEFAULT '{today}'
            );"
        ))?;
        Ok(())
    }

    fn drop_table(&mut self, slug: &str) -> Result<()> {
        let table = table_ident(slug)?;
        self.conn.execute_batch(&format!("DROP TABLE {};", table))?;
        Ok(())
    }

    fn insert(&mut self, slug: &str, record: &ApartmentRecord) -> Result<()> {
        let table = table_ident(slug)?;
        if !self.in_tx {
            self.conn.execute_batch("BEGIN TRANSACTION")?;
            self.in_tx = true;
        }
        let mut stmt = self.conn.prepare_cached(&format!(
            "INSERT INTO {} (district, longitude, latitude, area, price, price_per_meter)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            table
        ))?;
        stmt.execute(params![
            record.district,
            record.longitude,
            record.latitude,
            record.area,
            record.price,
            record.price_per_meter,
        ])?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.in_tx {
            self.conn.execute_batch("COMMIT")?;
            self.in_tx = false;
        }
        Ok(())
    }
}

fn table_ident(slug: &str) -> Result<String> {
    if !is_valid_slug(slug) {
        return Err(ScrapeError::InvalidTableName(slug.to_string()));
    }
    Ok(format!("\"{}\"", slug))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(district: &str) -> ApartmentRecord {
        ApartmentRecord {
            district: district.into(),
            longitude: 60.6,
            latitude: 56.8,
            area: 42.5,
            price: 5_000_000.0,
            price_per_meter: 117_647.0,
        }
    }

    #[test]
    fn create_is_idempotent() {
        let mut s = SqliteStorage::open_in_memory().unwrap();
        s.create_table("moscow").unwrap();
        s.create_table("moscow").unwrap();
        assert_eq!(s.row_count("moscow").unwrap(), 0);
    }

    #[test]
    fn drop_missing_table_fails() {
        let mut s = SqliteStorage::open_in_memory().unwrap();
        assert!(matches!(s.drop_table("moscow"), Err(ScrapeError::Storage(_))));
    }

    #[test]
    fn insert_commit_and_read_back() {
        let mut s = SqliteStorage::open_in_memory().unwrap();
        s.init_schema(["ekaterinburg", "moscow"]).unwrap();
        s.insert("ekaterinburg", &record("Leninsky")).unwrap();
        s.insert("ekaterinburg", &record("Kirovsky")).unwrap();
        s.commit().unwrap();
        // second commit with nothing pending is a no-op
        s.commit().unwrap();

        assert_eq!(s.row_count("ekaterinburg").unwrap(), 2);
        assert_eq!(s.row_count("moscow").unwrap(), 0);

        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        assert_eq!(s.creation_date("ekaterinburg").unwrap(), Some(today));
        assert_eq!(s.creation_date("moscow").unwrap(), None);
    }

    #[test]
    fn drop_then_create_empties_table() {
        let mut s = SqliteStorage::open_in_memory().unwrap();
        s.create_table("moscow").unwrap();
        s.insert("moscow", &record("Central")).unwrap();
        s.commit().unwrap();
        s.drop_table("moscow").unwrap();
        s.create_table("moscow").unwrap();
        assert_eq!(s.row_count("moscow").unwrap(), 0);
    }

    #[test]
    fn bad_slug_never_reaches_sql() {
        let mut s = SqliteStorage::open_in_memory().unwrap();
        assert!(matches!(
            s.create_table("x\"; DROP TABLE y; --"),
            Err(ScrapeError::InvalidTableName(_))
        ));
    }
}
