use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};
use tracing::error;

use crate::model::Event;

/// All events staged by one committed transaction. Replayed all-or-nothing.
pub type CommitRecord = Vec<Event>;

/// Largest encoded commit accepted on write or on replay.
pub const MAX_RECORD_BYTES: usize = 16 * 1024 * 1024;

/// Encode one commit as `[u32 len][bincode][u32 crc32]`.
fn encode_record(writer: &mut impl Write, record: &[Event]) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_RECORD_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("commit record of {} bytes exceeds {MAX_RECORD_BYTES}", payload.len()),
        ));
    }
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Read one `[len][payload][crc]` frame. `Ok(None)` on a clean or torn end of log.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_BYTES {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    let mut crc_buf = [0u8; 4];
    for buf in [&mut payload[..], &mut crc_buf[..]] {
        match reader.read_exact(buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
    }
    if crc32fast::hash(&payload) != u32::from_le_bytes(crc_buf) {
        return Ok(None);
    }
    Ok(Some(payload))
}

/// Append-only journal of committed reservation transactions.
///
/// A torn or corrupt trailing record (crash mid-write) is discarded on replay,
/// which drops that whole transaction and nothing before it.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Buffer a commit without flushing. Follow with `flush_sync()`.
    pub fn append_buffered(&mut self, record: &[Event]) -> io::Result<()> {
        encode_record(&mut self.writer, record)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Append a group of commits and fsync once. All or nothing: on any error
    /// the file is cut back to its length before the batch.
    pub fn append_batch<'a>(&mut self, records: impl IntoIterator<Item = &'a [Event]>) -> io::Result<()> {
        self.writer.flush()?;
        let start_len = self.writer.get_ref().metadata()?.len();
        let mut appended = 0;
        let mut result = Ok(());
        for record in records {
            if let Err(e) = encode_record(&mut self.writer, record) {
                result = Err(e);
                break;
            }
            appended += 1;
        }
        let result = result.and_then(|()| self.flush_sync());
        match result {
            Ok(()) => {
                self.appends_since_compact += appended;
                Ok(())
            }
            Err(e) => {
                if let Err(truncate_err) = self.truncate_to(start_len) {
                    error!(path = %self.path.display(), "failed to roll back WAL batch: {truncate_err}");
                }
                Err(e)
            }
        }
    }

    /// Drop anything buffered or written past `len` and reopen for appends.
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        let reopened = OpenOptions::new().append(true).open(&self.path)?;
        let failed = std::mem::replace(&mut self.writer, BufWriter::new(reopened));
        // into_parts hands back the file without flushing the buffered bytes.
        let (file, _unflushed) = failed.into_parts();
        file.set_len(len)?;
        file.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write a snapshot to `<path>.tmp` and fsync it.
    pub fn write_compact_file(path: &Path, records: &[CommitRecord]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        for record in records {
            encode_record(&mut writer, record)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the log and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Every intact commit in log order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<CommitRecord>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        while let Some(payload) = read_frame(&mut reader)? {
            match bincode::deserialize::<CommitRecord>(&payload) {
                Ok(record) => records.push(record),
                Err(_) => break,
            }
        }
        Ok(records)
    }
}

// ── Group-commit writer ─────────────────────────────────────────

enum WalCommand {
    Append {
        record: CommitRecord,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        records: Vec<CommitRecord>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Cloneable handle to the task that owns the [`Wal`].
#[derive(Clone)]
pub struct WalHandle {
    tx: mpsc::Sender<WalCommand>,
}

impl WalHandle {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub fn spawn(wal: Wal) -> Self {
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(writer_loop(wal, rx));
        Self { tx }
    }

    /// Resolves once the record is fsynced.
    pub async fn append(&self, record: CommitRecord) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        self.send(WalCommand::Append { record, response }).await?;
        rx.await.map_err(|_| writer_gone())?
    }

    pub async fn compact(&self, records: Vec<CommitRecord>) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        self.send(WalCommand::Compact { records, response }).await?;
        rx.await.map_err(|_| writer_gone())?
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (response, rx) = oneshot::channel();
        if self.send(WalCommand::AppendsSinceCompact { response }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    async fn send(&self, cmd: WalCommand) -> io::Result<()> {
        self.tx.send(cmd).await.map_err(|_| writer_gone())
    }
}

fn writer_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "WAL writer shut down")
}

/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued (the batch window).
/// 3. One flush_sync for the batch, then answer every sender.
async fn writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { record, response } = cmd else {
            handle_control(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(record, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { record, response }) => batch.push((record, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = wal.append_batch(batch.iter().map(|(record, _)| record.as_slice()));
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { records, response } => {
            let result = Wal::write_compact_file(wal.path(), &records).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by writer_loop"),
    }
}
