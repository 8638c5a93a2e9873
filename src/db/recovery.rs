//! Database recovery through the SQLite shell.
//!
//! Damage below the document layer is delegated to the `sqlite3` shell's
//! `.recover` command: its SQL output is replayed line by line into a
//! fresh database at the writable sibling path. Rows the shell could
//! only rescue into `lost_and_found` are rewritten back into
//! `sampleblocks` on the way through. Partial success is the whole
//! point here, so individual statements that fail to apply are logged
//! and skipped rather than aborting the stream.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use rusqlite::Connection;
use tracing::{info, warn};

use super::{ProjectDatabase, PROJECT_APPLICATION_ID};
use crate::common::{Error, Result};

impl ProjectDatabase {
    /// Rebuild the writable copy from the damaged original via the
    /// recovery shell. No-op when this database already is a recovery
    /// product.
    pub fn recover_database(&mut self, ignore_freelist: bool) -> Result<()> {
        if self.recovered {
            return Ok(());
        }

        self.conn = run_recovery(
            &self.project_path,
            &self.writable_path,
            self.version,
            ignore_freelist,
        )?;
        self.read_only = false;
        self.recovered = true;
        Ok(())
    }

    /// Constructor for stores too damaged to open normally: recover
    /// first, then hand back a writable database on the recovered copy.
    pub fn recover(path: &Path, ignore_freelist: bool) -> Result<Self> {
        let (project_path, writable_path, data_path) = Self::derive_paths(path);

        let version = read_version_best_effort(&project_path);
        let conn = run_recovery(&project_path, &writable_path, version, ignore_freelist)?;

        Ok(Self {
            conn,
            project_path,
            writable_path,
            data_path,
            version,
            read_only: false,
            recovered: true,
        })
    }
}

fn run_recovery(
    project_path: &Path,
    writable_path: &Path,
    version: u32,
    ignore_freelist: bool,
) -> Result<Connection> {
    super::remove_stale_files(writable_path)?;

    let conn = Connection::open(writable_path)?;
    conn.execute_batch(
        "PRAGMA page_size = 65536;
         PRAGMA busy_timeout = 5000;
         PRAGMA locking_mode = EXCLUSIVE;
         PRAGMA synchronous = OFF;
         PRAGMA journal_mode = WAL;
         PRAGMA wal_autocheckpoint = 1000;
         VACUUM;",
    )?;

    let shell = locate_recovery_shell();
    info!("using '{}' for recovery", shell.display());

    let mut child = Command::new(&shell)
        .arg(project_path)
        .arg(if ignore_freelist {
            ".recover --ignore-freelist"
        } else {
            ".recover"
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Recovery("recovery shell has no stdout".into()))?;

    let mut recovered_blocks = 0i64;

    for line in BufReader::new(stdout).lines() {
        let line = line?;

        let Some((sql, rewritten)) = prepare_recovery_line(&line)? else {
            continue;
        };

        if rewritten {
            recovered_blocks += 1;
        }

        if let Err(err) = conn.execute_batch(&sql) {
            warn!("skipping recovery statement: {err}");
        }
    }

    let status = child.wait()?;

    if !status.success() {
        let mut stderr_text = String::new();
        if let Some(mut stderr) = child.stderr.take() {
            stderr.read_to_string(&mut stderr_text)?;
        }
        return Err(Error::Recovery(stderr_text.trim().to_owned()));
    }

    conn.execute_batch(
        "PRAGMA locking_mode = NORMAL;
         PRAGMA synchronous = NORMAL;",
    )?;
    conn.pragma_update(None, "application_id", PROJECT_APPLICATION_ID)?;
    conn.pragma_update(None, "user_version", version as i64)?;
    conn.execute_batch("VACUUM;")?;

    if recovered_blocks > 0 {
        info!("recovered {recovered_blocks} sample blocks from the database");
    }

    Ok(conn)
}

/// A `sqlite3` shell shipped next to this binary wins over whatever is
/// on `PATH`.
fn locate_recovery_shell() -> PathBuf {
    let name = if cfg!(windows) { "sqlite3.exe" } else { "sqlite3" };

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join(name);
            if sibling.exists() {
                return sibling;
            }
        }
    }

    PathBuf::from(name)
}

fn read_version_best_effort(path: &Path) -> u32 {
    let read = || -> Result<u32> {
        let conn = Connection::open_with_flags(path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        Ok(version as u32)
    };

    match read() {
        Ok(version) => version,
        Err(err) => {
            warn!("could not read user_version from damaged store: {err}");
            0
        }
    }
}

/// Classify one line of `.recover` output.
///
/// Returns the SQL to execute plus whether it was a rewritten
/// `lost_and_found` row, or `None` for lines that must be dropped.
fn prepare_recovery_line(line: &str) -> Result<Option<(String, bool)>> {
    if line.is_empty() || line.contains("BEGIN") || line.contains("COMMIT") {
        return Ok(None);
    }

    if line.contains("lost_and_found") {
        if line.contains("CREATE") {
            return Ok(None);
        }

        if !line.contains("INSERT") {
            return Err(Error::Recovery(format!(
                "unsupported lost_and_found query: {line}"
            )));
        }

        return Ok(Some((rewrite_lost_and_found(line)?, true)));
    }

    Ok(Some((line.to_owned(), false)))
}

/// Rewrite a `lost_and_found` insert into a `sampleblocks` one.
///
/// The rescued row shape is
/// `VALUES(root_n, n, n_fields, rowid, NULL, sampleformat, ...)`:
/// the first two values are dropped, `n_fields` must name the eight
/// `sampleblocks` columns, `rowid` becomes the block id, and everything
/// after the `NULL` placeholder is spliced through unchanged.
fn rewrite_lost_and_found(line: &str) -> Result<String> {
    let structure =
        || Error::Recovery(format!("unexpected lost_and_found structure: {line}"));

    let open = line.find('(').ok_or_else(structure)?;
    let first_comma = find_from(line, ',', open + 1).ok_or_else(structure)?;
    let second_comma = find_from(line, ',', first_comma + 1).ok_or_else(structure)?;

    let (n_fields, fields_end) = parse_int_at(line, second_comma + 1).ok_or_else(structure)?;
    if n_fields != 8 {
        return Err(structure());
    }

    let (row_id, rowid_end) = parse_int_at(line, fields_end + 1).ok_or_else(structure)?;

    let null_at = line[rowid_end..].find("NULL,").ok_or_else(structure)? + rowid_end;
    let rest = &line[null_at + 5..];

    Ok(format!(
        "INSERT OR REPLACE INTO sampleblocks(blockid, sampleformat, summin, summax, sumrms, summary256, summary64k, samples) VALUES({row_id},{rest}"
    ))
}

fn find_from(line: &str, needle: char, from: usize) -> Option<usize> {
    line[from..].find(needle).map(|index| index + from)
}

/// Parse an integer at `from`, skipping leading whitespace. Returns the
/// value and the index just past its last digit.
fn parse_int_at(line: &str, from: usize) -> Option<(i64, usize)> {
    let bytes = line.as_bytes();
    let mut start = from;

    while start < bytes.len() && bytes[start].is_ascii_whitespace() {
        start += 1;
    }

    let mut end = start;
    if end < bytes.len() && bytes[end] == b'-' {
        end += 1;
    }
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }

    line[start..end].parse().ok().map(|value| (value, end))
}
