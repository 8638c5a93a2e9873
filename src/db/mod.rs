//! AUP3 store facade.
//!
//! An AUP3 project is a SQLite database with the project document split
//! across `dict`/`doc` blob columns and raw PCM payloads in
//! `sampleblocks`. The store is opened read-only; before any mutating
//! operation the database is copied to a `<stem>.recovered.aup3` sibling
//! and reopened read-write there. The original file is never written.

mod recovery;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, DatabaseName, OpenFlags, OptionalExtension};
use tracing::{info, warn};

use crate::codec::{self, XmlTextWriter};
use crate::common::{ChunkedBuffer, Error, Result};
use crate::wav::{SampleFormat, WaveFile};

/// `application_id` pragma of files written by the editor.
pub(crate) const PROJECT_APPLICATION_ID: i64 = 1096107097;

/// Highest `user_version` this tool understands: 3.1.3.0, encoded as
/// `(major << 24) | (minor << 16) | (patch << 8)`.
const MAX_SUPPORTED_VERSION: u32 = (3 << 24) | (1 << 16) | (3 << 8);

/// Which row of the store holds the document to operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectTable {
    Project,
    Autosave,
}

impl ProjectTable {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectTable::Project => "project",
            ProjectTable::Autosave => "autosave",
        }
    }
}

/// Open AUP3 store plus the sibling paths derived from it.
pub struct ProjectDatabase {
    conn: Connection,
    project_path: PathBuf,
    writable_path: PathBuf,
    data_path: PathBuf,
    version: u32,
    read_only: bool,
    recovered: bool,
}

impl ProjectDatabase {
    /// Open a project read-only, checking its pragmas.
    ///
    /// A foreign `application_id` is only worth a warning (damaged files
    /// often lose it), but a `user_version` above the supported ceiling
    /// is fatal: newer documents may not mean what we think they mean.
    pub fn open(path: &Path) -> Result<Self> {
        let (project_path, writable_path, data_path) = Self::derive_paths(path);

        let conn = Connection::open_with_flags(&project_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(store_error)?;

        let app_id: i64 = conn
            .query_row("PRAGMA application_id;", [], |row| row.get(0))
            .map_err(store_error)?;
        if app_id != PROJECT_APPLICATION_ID {
            warn!("unexpected application_id {app_id}: is this really an AUP3 project?");
        }

        let version = conn
            .query_row("PRAGMA user_version;", [], |row| row.get::<_, i64>(0))
            .map_err(store_error)? as u32;

        info!(
            "project requires editor {}.{}.{}",
            (version >> 24) & 0xFF,
            (version >> 16) & 0xFF,
            (version >> 8) & 0xFF
        );

        if version > MAX_SUPPORTED_VERSION {
            return Err(Error::UnsupportedVersion {
                major: ((version >> 24) & 0xFF) as u8,
                minor: ((version >> 16) & 0xFF) as u8,
                patch: ((version >> 8) & 0xFF) as u8,
            });
        }

        Ok(Self {
            conn,
            project_path,
            writable_path,
            data_path,
            version,
            read_only: true,
            recovered: false,
        })
    }

    fn derive_paths(path: &Path) -> (PathBuf, PathBuf, PathBuf) {
        let project_path = path.to_path_buf();
        let writable_path = path.with_extension("recovered.aup3");

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let data_path = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!("{stem}_data"));

        (project_path, writable_path, data_path)
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    /// Path the connection currently points at.
    pub fn current_path(&self) -> &Path {
        if self.read_only {
            &self.project_path
        } else {
            &self.writable_path
        }
    }

    /// Sibling directory extraction output goes into.
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn has_autosave(&self) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(1) FROM autosave;", [], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// Delete the autosave row, if there is one.
    pub fn drop_autosave(&mut self) -> Result<()> {
        if self.has_autosave()? {
            self.reopen_writable()?;
            self.conn.execute("DELETE FROM autosave WHERE id = 1;", [])?;
        }
        Ok(())
    }

    /// Run the store's integrity check, printing any findings.
    pub fn check_integrity(&self) -> bool {
        info!("checking database integrity");

        let run = || -> Result<bool> {
            let mut stmt = self.conn.prepare("PRAGMA integrity_check(10240);")?;
            let mut rows = stmt.query([])?;

            while let Some(row) = rows.next()? {
                let message: String = row.get(0)?;
                if message == "ok" {
                    return Ok(true);
                }
                println!("{message}");
            }

            Ok(false)
        };

        match run() {
            Ok(ok) => ok,
            Err(err) => {
                warn!("exception while checking integrity: {err}");
                false
            }
        }
    }

    /// Switch to the writable copy. The project file itself stays
    /// untouched; all writes go to the `<stem>.recovered.aup3` sibling.
    pub fn reopen_writable(&mut self) -> Result<()> {
        if !self.read_only {
            return Ok(());
        }

        info!(
            "reopening database in writable mode at {}",
            self.writable_path.display()
        );

        remove_stale_files(&self.writable_path)?;
        fs::copy(&self.project_path, &self.writable_path)?;

        self.conn =
            Connection::open_with_flags(&self.writable_path, OpenFlags::SQLITE_OPEN_READ_WRITE)?;
        self.read_only = false;
        Ok(())
    }

    /// Read the document blobs of `table`, concatenated `dict ++ doc`.
    pub fn read_project_blob(&self, table: ProjectTable) -> Result<ChunkedBuffer> {
        let mut buffer = ChunkedBuffer::new();
        self.read_column_blob(table, "dict", &mut buffer)?;
        self.read_column_blob(table, "doc", &mut buffer)?;
        Ok(buffer)
    }

    fn read_column_blob(
        &self,
        table: ProjectTable,
        column: &str,
        out: &mut ChunkedBuffer,
    ) -> Result<()> {
        let rowid: i64 = self.conn.query_row(
            &format!("SELECT ROWID FROM {} WHERE id = 1;", table.as_str()),
            [],
            |row| row.get(0),
        )?;

        let blob = self
            .conn
            .blob_open(DatabaseName::Main, table.as_str(), column, rowid, true)?;

        let mut stage = [0u8; 8 * 1024];
        let len = blob.size() as usize;
        let mut offset = 0;

        while offset < len {
            let take = stage.len().min(len - offset);
            blob.read_at_exact(&mut stage[..take], offset)?;
            out.append(&stage[..take]);
            offset += take;
        }

        Ok(())
    }

    /// Store serialized document blobs back into `table`.
    pub fn write_project_blobs(
        &mut self,
        table: ProjectTable,
        dict: &[u8],
        doc: &[u8],
    ) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {}(id, dict, doc) VALUES (1, ?1, ?2);",
                table.as_str()
            ),
            rusqlite::params![dict, doc],
        )?;
        Ok(())
    }

    /// Sample format recorded for a block row, or `None` when the row
    /// does not exist.
    pub fn block_format(&self, block_id: i64) -> Result<Option<i32>> {
        self.conn
            .query_row(
                "SELECT sampleformat FROM sampleblocks WHERE blockid = ?1;",
                [block_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Raw PCM payload of a block row.
    pub fn read_block_samples(&self, block_id: i64) -> Result<Option<Vec<u8>>> {
        self.conn
            .query_row(
                "SELECT samples FROM sampleblocks WHERE blockid = ?1;",
                [block_id],
                |row| row.get::<_, Option<Vec<u8>>>(0),
            )
            .optional()
            .map_err(Error::from)
            .map(Option::flatten)
    }

    /// All block ids present in the store.
    pub fn all_block_ids(&self) -> Result<BTreeSet<i64>> {
        let mut stmt = self.conn.prepare("SELECT blockid FROM sampleblocks;")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<BTreeSet<i64>, _>>()?;
        Ok(ids)
    }

    /// Delete the given block rows in one transaction.
    pub fn delete_blocks(&mut self, ids: &BTreeSet<i64>) -> Result<()> {
        let tx = self.conn.transaction()?;
        for &id in ids {
            tx.execute("DELETE FROM sampleblocks WHERE blockid = ?1;", [id])?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn vacuum(&self) -> Result<()> {
        self.conn.execute_batch("VACUUM;")?;
        Ok(())
    }

    /// Render the binary document of `table` as XML into a sibling file
    /// named `<original>.<table>.xml`, returning its path.
    pub fn extract_project_xml(&self, table: ProjectTable) -> Result<PathBuf> {
        info!("reading project from table {}", table.as_str());

        let blob = self.read_project_blob(table)?;
        let mut writer = XmlTextWriter::new();
        codec::parse(&blob, &mut writer)?;

        let file_name = self
            .project_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = self
            .project_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!("{file_name}.{}.xml", table.as_str()));

        fs::write(&path, writer.into_buffer().to_vec())?;
        Ok(path)
    }

    /// Write every sample block as its own mono WAV under
    /// `<data>/sampleblocks/NNN/MM/`, 32 files per inner directory and
    /// 32 inner directories per outer one.
    pub fn extract_sample_blocks(&self, format: SampleFormat, sample_rate: u32) -> Result<usize> {
        const ENTRIES_PER_DIRECTORY: usize = 32;

        let base = self.data_path.join("sampleblocks");
        let make_path = |outer: usize, inner: usize| -> Result<PathBuf> {
            let path = base.join(format!("{outer:03}")).join(format!("{inner:02}"));
            fs::create_dir_all(&path)?;
            Ok(path)
        };

        let mut outer = 0usize;
        let mut inner = 0usize;
        let mut file_index = 0usize;
        let mut directory = make_path(outer, inner)?;

        let mut stmt = self
            .conn
            .prepare("SELECT blockid, samples FROM sampleblocks;")?;
        let mut rows = stmt.query([])?;
        let mut written = 0usize;

        while let Some(row) = rows.next()? {
            let block_id: i64 = row.get(0)?;
            let samples: Vec<u8> = row.get::<_, Option<Vec<u8>>>(1)?.unwrap_or_default();

            let path = directory.join(format!("{block_id}.wav"));
            let mut wave = WaveFile::new(&path, format, sample_rate, 1);
            wave.write_block(&samples, 0);

            match wave.finalize() {
                Ok(()) => written += 1,
                Err(err) => warn!("skipping sample block {block_id}: {err}"),
            }

            file_index += 1;
            if file_index == ENTRIES_PER_DIRECTORY {
                file_index = 0;
                inner += 1;

                if inner == ENTRIES_PER_DIRECTORY {
                    outer += 1;
                    inner = 0;
                }

                directory = make_path(outer, inner)?;
            }
        }

        Ok(written)
    }

    /// Concatenate every sample block into `<data>/mono.wav` or
    /// `<data>/stereo.wav`. Stereo routes even block ids to the right
    /// channel, odd ones to the left.
    pub fn extract_track(
        &self,
        format: SampleFormat,
        sample_rate: u32,
        as_stereo: bool,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.data_path)?;

        let path = self
            .data_path
            .join(if as_stereo { "stereo.wav" } else { "mono.wav" });
        let mut wave = WaveFile::new(&path, format, sample_rate, if as_stereo { 2 } else { 1 });

        let mut stmt = self
            .conn
            .prepare("SELECT blockid, samples FROM sampleblocks;")?;
        let mut rows = stmt.query([])?;

        while let Some(row) = rows.next()? {
            let block_id: i64 = row.get(0)?;
            let samples: Vec<u8> = row.get::<_, Option<Vec<u8>>>(1)?.unwrap_or_default();

            let channel = if as_stereo && block_id % 2 == 0 { 1 } else { 0 };
            wave.write_block(&samples, channel);
        }

        wave.finalize()?;
        Ok(path)
    }
}

/// Distinguish structural corruption from other SQLite failures while
/// opening a store: a corrupt or not-a-database file is recoverable
/// through the recovery shell, everything else is surfaced as-is.
fn store_error(err: rusqlite::Error) -> Error {
    match err {
        rusqlite::Error::SqliteFailure(failure, message)
            if matches!(
                failure.code,
                rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase
            ) =>
        {
            Error::CorruptStore(message.unwrap_or_else(|| failure.to_string()))
        }
        other => Error::Database(other),
    }
}

/// Remove a stale writable copy and its WAL sidecar files.
fn remove_stale_files(writable_path: &Path) -> Result<()> {
    if writable_path.exists() {
        fs::remove_file(writable_path)?;

        for sidecar in ["aup3-wal", "aup3-shm"] {
            let path = writable_path.with_extension(sidecar);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
    }
    Ok(())
}
