//! SQLite-backed peer directory.
//!
//! Two tables: `peers` keyed by name, and `files` keyed by
//! (peer_name, file_name) with a cascading foreign key. Every mutating
//! operation runs inside one transaction so a failed de-register never
//! leaves orphaned file rows behind.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use rdv_core::PeerRecord;

use crate::directory::{Directory, DirectoryError};

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;
    CREATE TABLE IF NOT EXISTS peers (
        name     TEXT PRIMARY KEY,
        ip       TEXT NOT NULL,
        udp_port INTEGER NOT NULL,
        tcp_port INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS files (
        peer_name TEXT NOT NULL REFERENCES peers (name) ON DELETE CASCADE,
        file_name TEXT NOT NULL,
        PRIMARY KEY (peer_name, file_name)
    );
    CREATE INDEX IF NOT EXISTS files_by_name ON files (file_name);
";

impl From<rusqlite::Error> for DirectoryError {
    fn from(e: rusqlite::Error) -> Self {
        DirectoryError::Storage(e.to_string())
    }
}

/// Directory persisted to an SQLite database file.
pub struct SqliteDirectory {
    conn: Mutex<Connection>,
}

impl SqliteDirectory {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        Self::with_connection(Connection::open(path)?)
    }

    /// A private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, DirectoryError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DirectoryError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DirectoryError> {
        self.conn
            .lock()
            .map_err(|_| DirectoryError::Storage("database lock poisoned".into()))
    }
}

fn is_registered(conn: &Connection, name: &str) -> Result<bool, DirectoryError> {
    Ok(conn
        .query_row("SELECT 1 FROM peers WHERE name = ?1", [name], |_| Ok(()))
        .optional()?
        .is_some())
}

fn require_registered(conn: &Connection, name: &str) -> Result<(), DirectoryError> {
    if is_registered(conn, name)? {
        Ok(())
    } else {
        Err(DirectoryError::NotRegistered(name.to_string()))
    }
}

fn load_files(conn: &Connection, name: &str) -> Result<BTreeSet<String>, DirectoryError> {
    let mut stmt = conn.prepare("SELECT file_name FROM files WHERE peer_name = ?1")?;
    let files = stmt
        .query_map([name], |row| row.get::<_, String>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(files)
}

fn load_record(conn: &Connection, name: &str) -> Result<Option<PeerRecord>, DirectoryError> {
    let row = conn
        .query_row(
            "SELECT name, ip, udp_port, tcp_port FROM peers WHERE name = ?1",
            [name],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u16>(2)?,
                    row.get::<_, u16>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((name, ip, udp_port, tcp_port)) = row else {
        return Ok(None);
    };
    let ip: IpAddr = ip
        .parse()
        .map_err(|_| DirectoryError::Storage(format!("corrupt address {ip:?} for {name}")))?;
    let files = load_files(conn, &name)?;

    Ok(Some(PeerRecord {
        name,
        ip,
        udp_port,
        tcp_port,
        files,
    }))
}

fn load_many(conn: &Connection, names: Vec<String>) -> Result<Vec<PeerRecord>, DirectoryError> {
    let mut records = Vec::with_capacity(names.len());
    for name in names {
        if let Some(record) = load_record(conn, &name)? {
            records.push(record);
        }
    }
    Ok(records)
}

impl Directory for SqliteDirectory {
    fn register(
        &self,
        name: &str,
        ip: IpAddr,
        udp_port: u16,
        tcp_port: u16,
    ) -> Result<(), DirectoryError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if is_registered(&tx, name)? {
            return Err(DirectoryError::AlreadyExists(name.to_string()));
        }
        tx.execute(
            "INSERT INTO peers (name, ip, udp_port, tcp_port) VALUES (?1, ?2, ?3, ?4)",
            params![name, ip.to_string(), udp_port, tcp_port],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn deregister(&self, name: &str) -> Result<(), DirectoryError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM files WHERE peer_name = ?1", [name])?;
        let removed = tx.execute("DELETE FROM peers WHERE name = ?1", [name])?;
        if removed == 0 {
            // Dropping the transaction rolls back the file delete.
            return Err(DirectoryError::NotRegistered(name.to_string()));
        }
        tx.commit()?;
        Ok(())
    }

    fn publish(&self, name: &str, files: &[String]) -> Result<(), DirectoryError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        require_registered(&tx, name)?;
        {
            let mut insert = tx
                .prepare("INSERT OR IGNORE INTO files (peer_name, file_name) VALUES (?1, ?2)")?;
            for file in files {
                insert.execute(params![name, file])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn remove(&self, name: &str, files: &[String]) -> Result<(), DirectoryError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        require_registered(&tx, name)?;

        let published = load_files(&tx, name)?;
        let missing: Vec<String> = files
            .iter()
            .filter(|f| !published.contains(*f))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(DirectoryError::FilesNotFound(missing));
        }

        {
            let mut delete =
                tx.prepare("DELETE FROM files WHERE peer_name = ?1 AND file_name = ?2")?;
            for file in files {
                delete.execute(params![name, file])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn list_all(&self, requester: &str) -> Result<Vec<PeerRecord>, DirectoryError> {
        let conn = self.conn()?;
        require_registered(&conn, requester)?;
        let names = {
            let mut stmt = conn.prepare("SELECT name FROM peers ORDER BY name")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            names
        };
        load_many(&conn, names)
    }

    fn lookup(&self, requester: &str, target: &str) -> Result<PeerRecord, DirectoryError> {
        let conn = self.conn()?;
        require_registered(&conn, requester)?;
        load_record(&conn, target)?.ok_or_else(|| DirectoryError::NotRegistered(target.to_string()))
    }

    fn update_contact(
        &self,
        name: &str,
        ip: IpAddr,
        udp_port: u16,
        tcp_port: u16,
    ) -> Result<(), DirectoryError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE peers SET ip = ?2, udp_port = ?3, tcp_port = ?4 WHERE name = ?1",
            params![name, ip.to_string(), udp_port, tcp_port],
        )?;
        if updated == 0 {
            return Err(DirectoryError::NotRegistered(name.to_string()));
        }
        Ok(())
    }

    fn find_file(&self, requester: &str, file: &str) -> Result<Vec<PeerRecord>, DirectoryError> {
        let conn = self.conn()?;
        require_registered(&conn, requester)?;
        let names = {
            let mut stmt = conn.prepare(
                "SELECT peer_name FROM files WHERE file_name = ?1 ORDER BY peer_name",
            )?;
            let names = stmt
                .query_map([file], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            names
        };
        if names.is_empty() {
            return Err(DirectoryError::NoSuchFile(file.to_string()));
        }
        load_many(&conn, names)
    }
}
