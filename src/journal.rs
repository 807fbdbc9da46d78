//! On-disk journal of committed events.
//!
//! Each record is `[u32 len][bincode Event][u32 crc32]`, little endian, with
//! `len` counting the payload only. Opening a journal replays it and cuts the
//! file back to the end of the last intact record, so new appends never sit
//! behind a torn write where replay would not reach them.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::limits::MAX_JOURNAL_RECORD_BYTES;
use crate::model::Event;

const LEN_BYTES: u64 = 4;
const CRC_BYTES: u64 = 4;

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn write_record(out: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload = bincode::serialize(event).map_err(|e| invalid_data(e.to_string()))?;
    if payload.len() > MAX_JOURNAL_RECORD_BYTES {
        return Err(invalid_data(format!(
            "journal record of {} bytes exceeds {MAX_JOURNAL_RECORD_BYTES}",
            payload.len()
        )));
    }
    out.write_all(&(payload.len() as u32).to_le_bytes())?;
    out.write_all(&payload)?;
    out.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

enum Decoded {
    /// An intact record and its size on disk.
    Record(Event, u64),
    /// Nothing past this point can be trusted.
    Torn(&'static str),
}

/// Decode the record at the reader's position. `remaining` is the number of
/// bytes left in the file, so short reads are caught before allocating.
fn next_record(input: &mut impl Read, remaining: u64) -> io::Result<Decoded> {
    if remaining < LEN_BYTES + CRC_BYTES {
        return Ok(Decoded::Torn("partial record header"));
    }
    let mut len_buf = [0u8; 4];
    input.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_JOURNAL_RECORD_BYTES {
        return Ok(Decoded::Torn("length prefix over limit"));
    }
    let size = LEN_BYTES + len as u64 + CRC_BYTES;
    if size > remaining {
        return Ok(Decoded::Torn("record runs past end of file"));
    }

    let mut payload = vec![0u8; len];
    input.read_exact(&mut payload)?;
    let mut crc_buf = [0u8; 4];
    input.read_exact(&mut crc_buf)?;
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Decoded::Torn("checksum mismatch"));
    }
    match bincode::deserialize(&payload) {
        Ok(event) => Ok(Decoded::Record(event, size)),
        Err(_) => Ok(Decoded::Torn("undecodable payload")),
    }
}

/// What a replay found on disk.
#[derive(Debug, Default, PartialEq)]
pub struct Recovery {
    pub events: Vec<Event>,
    /// File offset just past the last intact record.
    pub valid_len: u64,
    /// Bytes after `valid_len` that could not be read back.
    pub discarded: u64,
}

/// Append-only journal file with buffered group commit.
pub struct Journal {
    out: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Journal {
    /// Replay `path`, drop any unreadable tail from the file and open it for
    /// appends. A missing file is created empty.
    pub fn open(path: &Path) -> io::Result<(Self, Recovery)> {
        let recovery = Self::replay(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if recovery.discarded > 0 {
            warn!(
                "journal {}: truncating {} unreadable bytes at offset {}",
                path.display(),
                recovery.discarded,
                recovery.valid_len
            );
            file.set_len(recovery.valid_len)?;
            file.sync_all()?;
        }
        let journal = Self {
            out: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        };
        Ok((journal, recovery))
    }

    /// Read every intact record from the start of `path`. Reading stops at
    /// the first short, oversized, corrupt or undecodable record.
    pub fn replay(path: &Path) -> io::Result<Recovery> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Recovery::default()),
            Err(e) => return Err(e),
        };
        let file_len = file.metadata()?.len();
        let mut input = BufReader::new(file);
        let mut recovery = Recovery::default();

        while recovery.valid_len < file_len {
            match next_record(&mut input, file_len - recovery.valid_len)? {
                Decoded::Record(event, size) => {
                    recovery.events.push(event);
                    recovery.valid_len += size;
                }
                Decoded::Torn(reason) => {
                    warn!("journal {}: {reason} at offset {}", path.display(), recovery.valid_len);
                    break;
                }
            }
        }
        recovery.discarded = file_len - recovery.valid_len;
        Ok(recovery)
    }

    /// Buffer one record. Nothing is durable until [`Journal::commit`].
    pub fn stage(&mut self, event: &Event) -> io::Result<()> {
        write_record(&mut self.out, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush buffered records and fsync.
    pub fn commit(&mut self) -> io::Result<()> {
        self.out.flush()?;
        self.out.get_ref().sync_all()
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.stage(event)?;
        self.commit()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn compacted_path(path: &Path) -> PathBuf {
        path.with_extension("compact")
    }

    /// First half of compaction: write `events` to a side file and fsync it.
    /// Safe to run while the live journal keeps taking appends.
    pub fn write_compacted(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(Self::compacted_path(path))?);
        for event in events {
            write_record(&mut out, event)?;
        }
        out.flush()?;
        out.get_ref().sync_all()
    }

    /// Second half: move the side file over the journal and append there.
    pub fn install_compacted(&mut self) -> io::Result<()> {
        fs::rename(Self::compacted_path(&self.path), &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.out = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Plate, SpaceStatus, VehicleCategory};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("parkd_test_journal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn space_added(code: &str) -> Event {
        Event::SpaceAdded {
            code: code.into(),
            category: VehicleCategory::Car,
            status: SpaceStatus::Available,
        }
    }

    fn checked_in(id: Ulid, space: &str) -> Event {
        Event::CheckedIn {
            id,
            plate: Plate::parse("ABC123").unwrap(),
            category: VehicleCategory::Car,
            space: space.into(),
            client: None,
            hourly_rate: 5000,
            entry: 1_700_000_000_000,
        }
    }

    fn append_raw(path: &Path, bytes: &[u8]) {
        let mut f = OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(bytes).unwrap();
    }

    #[test]
    fn records_read_back_in_order() {
        let path = tmp_path("in_order.wal");
        let events = vec![space_added("A-01"), checked_in(Ulid::new(), "A-01")];
        {
            let (mut journal, recovery) = Journal::open(&path).unwrap();
            assert_eq!(recovery, Recovery::default());
            for e in &events {
                journal.append(e).unwrap();
            }
        }

        let recovery = Journal::replay(&path).unwrap();
        assert_eq!(recovery.events, events);
        assert_eq!(recovery.valid_len, fs::metadata(&path).unwrap().len());
        assert_eq!(recovery.discarded, 0);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        assert_eq!(Journal::replay(&path).unwrap(), Recovery::default());
    }

    #[test]
    fn half_written_record_is_discarded() {
        let path = tmp_path("half_written.wal");
        let first = space_added("A-01");
        {
            let (mut journal, _) = Journal::open(&path).unwrap();
            journal.append(&first).unwrap();
        }
        let good_len = fs::metadata(&path).unwrap().len();
        // Length prefix promising 64 bytes followed by two
        append_raw(&path, &[0x40, 0, 0, 0, 1, 2]);

        let recovery = Journal::replay(&path).unwrap();
        assert_eq!(recovery.events, vec![first]);
        assert_eq!(recovery.valid_len, good_len);
        assert_eq!(recovery.discarded, 6);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn checksum_mismatch_ends_replay() {
        let path = tmp_path("bad_crc.wal");
        let good = space_added("A-01");
        {
            let (mut journal, _) = Journal::open(&path).unwrap();
            journal.append(&good).unwrap();
        }
        let payload = bincode::serialize(&Event::SpaceRemoved { code: "A-01".into() }).unwrap();
        let mut bad = (payload.len() as u32).to_le_bytes().to_vec();
        bad.extend_from_slice(&payload);
        bad.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        append_raw(&path, &bad);

        let recovery = Journal::replay(&path).unwrap();
        assert_eq!(recovery.events, vec![good]);
        assert_eq!(recovery.discarded, bad.len() as u64);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn oversized_length_prefix_is_not_allocated() {
        let path = tmp_path("oversized.wal");
        {
            let (mut journal, _) = Journal::open(&path).unwrap();
            journal.append(&space_added("A-01")).unwrap();
        }
        let mut junk = u32::MAX.to_le_bytes().to_vec();
        junk.extend_from_slice(&[0u8; 16]);
        append_raw(&path, &junk);

        let recovery = Journal::replay(&path).unwrap();
        assert_eq!(recovery.events.len(), 1);
        assert_eq!(recovery.discarded, 20);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn open_truncates_torn_tail_before_appending() {
        let path = tmp_path("truncate_on_open.wal");
        let first = space_added("A-01");
        let later = space_added("A-02");
        {
            let (mut journal, _) = Journal::open(&path).unwrap();
            journal.append(&first).unwrap();
        }
        append_raw(&path, &[0x40, 0, 0, 0, 1, 2]);

        {
            let (mut journal, recovery) = Journal::open(&path).unwrap();
            assert_eq!(recovery.events, vec![first.clone()]);
            assert_eq!(recovery.discarded, 6);
            assert_eq!(fs::metadata(&path).unwrap().len(), recovery.valid_len);
            journal.append(&later).unwrap();
        }

        let recovery = Journal::replay(&path).unwrap();
        assert_eq!(recovery.events, vec![first, later]);
        assert_eq!(recovery.discarded, 0);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compaction_replaces_history() {
        let path = tmp_path("compact.wal");
        let (mut journal, _) = Journal::open(&path).unwrap();
        journal.append(&space_added("A-01")).unwrap();
        for i in 0..20 {
            let id = Ulid::new();
            journal.append(&checked_in(id, "A-01")).unwrap();
            journal
                .append(&Event::CheckedOut {
                    id,
                    space: "A-01".into(),
                    exit: 1_700_000_000_000 + i,
                    fee: 5000,
                })
                .unwrap();
        }
        assert_eq!(journal.appends_since_compact(), 41);
        let before = fs::metadata(&path).unwrap().len();

        Journal::write_compacted(&path, &[space_added("A-01")]).unwrap();
        journal.install_compacted().unwrap();
        assert_eq!(journal.appends_since_compact(), 0);
        let late = Event::SpaceStatusChanged {
            code: "A-01".into(),
            status: SpaceStatus::Reserved,
        };
        journal.append(&late).unwrap();
        drop(journal);

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted journal should be smaller: {after} < {before}");
        assert_eq!(Journal::replay(&path).unwrap().events, vec![space_added("A-01"), late]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn staged_records_land_on_commit() {
        let path = tmp_path("staged.wal");
        let events: Vec<Event> = (0..5).map(|i| space_added(&format!("A-0{i}"))).collect();
        {
            let (mut journal, _) = Journal::open(&path).unwrap();
            for e in &events {
                journal.stage(e).unwrap();
            }
            assert_eq!(journal.appends_since_compact(), 5);
            journal.commit().unwrap();
        }
        assert_eq!(Journal::replay(&path).unwrap().events, events);
        let _ = fs::remove_file(&path);
    }
}
