use std::collections::HashMap;

use serde::Serialize;

use crate::{
    error::Error,
    fs::TableFile,
    recordio::{IndexEntry, KeyValue, RecordWriter},
};

// How often index entries are emitted while writing a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPolicy {
    // No index entries at all.
    None,
    // One entry every n records; the entry carries the full key of the
    // record that made the counter wrap.
    EveryN(usize),
    // One entry whenever the first n bytes of the key differ from the
    // previous record's; the entry carries the prefix (the whole key when
    // it is shorter than n).
    PrefixLen(usize),
}

// Appends key/value records to a table, enforcing that keys arrive in
// non-decreasing order, and maintains the optional sparse index as it
// goes. The destination can be a file or anything else implementing
// TableFile.
pub struct Writer<D, I>
where
    D: TableFile,
    I: TableFile,
{
    out: RecordWriter<D>,
    out_idx: Option<RecordWriter<I>>,
    policy: IndexPolicy,

    last_key: Vec<u8>,

    // Offset in the data stream at which the following record will begin.
    index_offset: u64,
    index_ctr: usize,
    prev_prefix: Vec<u8>,

    out_seekable: bool,
}

impl<D> Writer<D, D>
where
    D: TableFile,
{
    // A writer with no index stream; no index will be written.
    pub fn new(out: D) -> Self {
        Self::build(out, None, IndexPolicy::None)
    }
}

impl<D, I> Writer<D, I>
where
    D: TableFile,
    I: TableFile,
{
    pub fn with_index(out: D, idx: I, policy: IndexPolicy) -> Self {
        Self::build(out, Some(idx), policy)
    }

    fn build(out: D, idx: Option<I>, policy: IndexPolicy) -> Self {
        let mut out = RecordWriter::new(out);

        // Probe seek support once; start the offset cursor from the
        // stream's current position so a table can be appended to a
        // stream that is not at its beginning.
        let mut index_offset = 0;
        let out_seekable = match out.stream_mut().as_seekable() {
            Some(sk) => {
                index_offset = sk.tell().unwrap_or(0);
                true
            }
            None => false,
        };

        Writer {
            out,
            out_idx: idx.map(RecordWriter::new),
            policy,
            last_key: Vec::new(),
            index_offset,
            index_ctr: 0,
            prev_prefix: Vec::new(),
            out_seekable,
        }
    }

    // Appends one record. Fails with OrderViolation if key sorts strictly
    // before the previously written key; equal keys are accepted and
    // simply appended again.
    //
    // Errors from the streams are returned unmodified and nothing is
    // rolled back: the data record may be on disk while the index entry is
    // not, and partially written bytes are left where they landed. Treat a
    // failed write as fatal to the table.
    pub fn write(&mut self, key: &[u8], value: &[u8]) -> anyhow::Result<()> {
        if self.last_key.as_slice() > key {
            return Err(Error::OrderViolation.into());
        }

        let record = KeyValue {
            key: key.to_vec(),
            value: value.to_vec(),
        };

        let res = self.out.write_message(&record);
        self.last_key.clear();
        self.last_key.extend_from_slice(key);

        let written = match res {
            Ok(n) => n,
            Err(err) => {
                self.advance_cursor(0);
                return Err(err);
            }
        };

        let idx_res = self.maybe_write_index(key);
        self.advance_cursor(written);
        idx_res
    }

    // Serializes a structured value and appends it under the given key.
    pub fn write_json<T: Serialize>(&mut self, key: &[u8], value: &T) -> anyhow::Result<()> {
        let buf = serde_json::to_vec(value)?;
        self.write(key, &buf)
    }

    // Writes every entry of an unordered map, sorting the keys first.
    // This is the one path where callers need not pre-sort.
    pub fn write_map(&mut self, data: &HashMap<Vec<u8>, Vec<u8>>) -> anyhow::Result<()> {
        let mut keys: Vec<_> = data.keys().collect();
        keys.sort();
        for key in keys {
            self.write(key, &data[key])?;
        }
        Ok(())
    }

    pub fn write_json_map<T: Serialize>(
        &mut self,
        data: &HashMap<Vec<u8>, T>,
    ) -> anyhow::Result<()> {
        let mut keys: Vec<_> = data.keys().collect();
        keys.sort();
        for key in keys {
            self.write_json(key, &data[key])?;
        }
        Ok(())
    }

    // Applies the density policy after a successful data write. The
    // emitted offset is the one the record just written began at, i.e.
    // the cursor value from before that write.
    fn maybe_write_index(&mut self, key: &[u8]) -> anyhow::Result<()> {
        let out_idx = match &mut self.out_idx {
            Some(w) => w,
            None => return Ok(()),
        };

        match self.policy {
            IndexPolicy::None => Ok(()),
            IndexPolicy::EveryN(0) => Err(Error::UnsupportedIndexPolicy.into()),
            IndexPolicy::EveryN(n) => {
                self.index_ctr = (self.index_ctr + 1) % n;
                if self.index_ctr == 0 {
                    out_idx.write_message(&IndexEntry {
                        key: key.to_vec(),
                        offset: self.index_offset,
                    })?;
                }
                Ok(())
            }
            IndexPolicy::PrefixLen(n) => {
                let prefix = &key[..std::cmp::min(n, key.len())];
                if prefix != self.prev_prefix.as_slice() {
                    out_idx.write_message(&IndexEntry {
                        key: prefix.to_vec(),
                        offset: self.index_offset,
                    })?;
                    self.prev_prefix.clear();
                    self.prev_prefix.extend_from_slice(prefix);
                }
                Ok(())
            }
        }
    }

    // Moves the offset cursor past the record just written. The stream's
    // own position is authoritative when it can report one; otherwise we
    // assume the stream advanced by exactly the bytes we handed it, which
    // is wrong if it applies any length-altering transform (compression,
    // say).
    fn advance_cursor(&mut self, written: u64) {
        if self.out_seekable {
            if let Some(sk) = self.out.stream_mut().as_seekable() {
                if let Ok(pos) = sk.tell() {
                    self.index_offset = pos;
                    return;
                }
            }
        }
        self.index_offset += written;
    }
}
