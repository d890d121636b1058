//! ZIP archives streamed straight into a response body.
//!
//! A blocking producer writes the archive into a bounded channel and the
//! response body drains it. Dropping the body closes the channel, which
//! makes the producer's next write fail and stops it.

use std::collections::HashSet;
use std::io::{self, Write};
use std::path::PathBuf;

use axum::body::Bytes;
use chrono::{DateTime, Datelike, Timelike, Utc};
use futures::Stream;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

/// Bytes collected before a chunk is handed to the response.
const CHUNK_SIZE: usize = 64 * 1024;
/// Chunks in flight between producer and response.
const PIPE_DEPTH: usize = 8;

/// One file to put in the archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    pub name: String,
    pub modified: DateTime<Utc>,
}

/// Start producing an archive of `entries`. Files that cannot be read are
/// skipped with a warning.
pub fn zip_stream(entries: Vec<ArchiveEntry>) -> impl Stream<Item = io::Result<Bytes>> {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(PIPE_DEPTH);

    tokio::task::spawn_blocking(move || {
        let errors = tx.clone();
        match write_archive(ChannelWriter::new(tx), &entries) {
            Ok(written) => debug!(written, requested = entries.len(), "Archive complete"),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!("Archive reader went away, stopping");
            }
            Err(e) => {
                warn!(error = %e, "Archive aborted");
                let _ = errors.blocking_send(Err(e));
            }
        }
    });

    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
}

fn write_archive<W: Write>(out: W, entries: &[ArchiveEntry]) -> io::Result<usize> {
    let mut zip = zip::ZipWriter::new_stream(out);
    let mut names = HashSet::new();
    let mut written = 0;

    for entry in entries {
        // Read the whole member first: once an entry has started streaming
        // there is no way to take it back.
        let body = match std::fs::read(&entry.path) {
            Ok(body) => body,
            Err(e) => {
                warn!(path = %entry.path.display(), error = %e, "Skipping unreadable file");
                continue;
            }
        };
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip_time(entry.modified))
            .large_file(true);
        zip.start_file(unique_name(&mut names, &entry.name), options)
            .map_err(io::Error::other)?;
        zip.write_all(&body)?;
        written += 1;
    }

    let mut inner = zip.finish().map_err(io::Error::other)?;
    inner.flush()?;
    Ok(written)
}

/// Entry timestamps outside the DOS range fall back to 1980-01-01.
fn zip_time(at: DateTime<Utc>) -> zip::DateTime {
    u16::try_from(at.year())
        .ok()
        .and_then(|year| {
            zip::DateTime::from_date_and_time(
                year,
                at.month() as u8,
                at.day() as u8,
                at.hour() as u8,
                at.minute() as u8,
                at.second() as u8,
            )
            .ok()
        })
        .unwrap_or_default()
}

/// `name`, or `name (2)`, `name (3)`... when already taken.
fn unique_name(taken: &mut HashSet<String>, name: &str) -> String {
    if taken.insert(name.to_string()) {
        return name.to_string();
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}")),
        _ => (name, String::new()),
    };
    (2..)
        .map(|n| format!("{stem} ({n}){ext}"))
        .find(|candidate| taken.insert(candidate.clone()))
        .unwrap_or_else(|| name.to_string())
}

/// `Write` half of the pipe.
struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    buf: Vec<u8>,
}

impl ChannelWriter {
    fn new(tx: mpsc::Sender<io::Result<Bytes>>) -> Self {
        Self {
            tx,
            buf: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = Bytes::from(std::mem::replace(&mut self.buf, Vec::with_capacity(CHUNK_SIZE)));
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive reader closed"))
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.tx.is_closed() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "archive reader closed"));
        }
        self.buf.extend_from_slice(data);
        if self.buf.len() >= CHUNK_SIZE {
            self.send_buffered()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}
