use std::{cmp::Ordering, collections::HashMap};

use anyhow::bail;
use serde::de::DeserializeOwned;

use crate::{
    cancel::Cancel,
    error::Error,
    fs::TableFile,
    recordio::{IndexEntry, KeyValue, RecordReader},
};

// Chunk size for emulated forward seeks on streams without native seek
// support.
const SEEK_CHUNK: usize = 1024;

// Reads records back out of a table: indexed point lookups, ordered
// at-or-after lookups, plain sequential scans. The index, when present,
// only narrows where a linear scan starts; correctness never depends on
// it.
pub struct Reader<D, I>
where
    D: TableFile,
    I: TableFile,
{
    data: RecordReader<D>,
    index: Option<RecordReader<I>>,

    // Present iff a cache was requested at construction. Holds whatever
    // entries were loaded before the first error, so a reader with a
    // partially loaded cache still answers lookups, just less tightly.
    cache: Option<HashMap<Vec<u8>, u64>>,

    data_seekable: bool,
    idx_seekable: bool,
}

impl<D> Reader<D, D>
where
    D: TableFile,
{
    // A reader with no index stream; every lookup scans linearly from the
    // reader's current position.
    pub fn new(data: D) -> Self {
        let mut data = RecordReader::new(data);
        let data_seekable = data.stream_mut().as_seekable().is_some();
        Reader {
            data,
            index: None,
            cache: None,
            data_seekable,
            idx_seekable: false,
        }
    }
}

impl<D, I> Reader<D, I>
where
    D: TableFile,
    I: TableFile,
{
    // An index-assisted reader. When build_cache is set, the whole index
    // stream is drained into memory up front, checking the cancellation
    // token between entries.
    //
    // A usable reader is always returned; the accompanying result only
    // reports whether the cache loaded cleanly. On an error the cache
    // keeps the entries read so far and lookups degrade gracefully.
    pub fn with_index(data: D, idx: I, build_cache: bool, cancel: &Cancel) -> (Self, anyhow::Result<()>) {
        let mut data = RecordReader::new(data);
        let data_seekable = data.stream_mut().as_seekable().is_some();
        let mut idx = RecordReader::new(idx);
        let idx_seekable = idx.stream_mut().as_seekable().is_some();

        let mut rd = Reader {
            data,
            index: Some(idx),
            cache: None,
            data_seekable,
            idx_seekable,
        };

        if build_cache {
            rd.cache = Some(HashMap::new());
            let res = rd.build_cache(cancel);
            if let Err(err) = &res {
                tracing::warn!("failed to load index cache, lookups will degrade: {:#}", err);
            }
            return (rd, res);
        }
        (rd, Ok(()))
    }

    fn build_cache(&mut self, cancel: &Cancel) -> anyhow::Result<()> {
        let idx = match &mut self.index {
            Some(idx) => idx,
            None => return Ok(()),
        };

        if idx.pos() > 0 {
            if !self.idx_seekable {
                return Err(Error::NotSeekable.into());
            }
            if let Some(sk) = idx.stream_mut().as_seekable() {
                sk.seek_to(0)?;
            }
            idx.set_pos(0);
        }

        let mut loaded = 0;
        loop {
            cancel.check()?;
            let entry = match idx.read_message::<IndexEntry>()? {
                Some(e) => e,
                None => break,
            };
            // Keep the index cursor honest against the stream's own
            // position when it can report one.
            if self.idx_seekable {
                if let Some(sk) = idx.stream_mut().as_seekable() {
                    if let Ok(p) = sk.tell() {
                        idx.set_pos(p);
                    }
                }
            }
            if let Some(cache) = &mut self.cache {
                cache.insert(entry.key, entry.offset);
                loaded = cache.len();
            }
        }

        tracing::debug!(entries = loaded, "index cache loaded");
        Ok(())
    }

    // Floor search: the offset of the index entry with the largest key at
    // or below the target, 0 when nothing qualifies, or the current data
    // position when no index is configured at all. Entries are compared
    // exhaustively because neither the cache nor the on-disk log
    // guarantees an ordering.
    fn index_lookup(&mut self, key: &[u8]) -> anyhow::Result<u64> {
        if let Some(cache) = &self.cache {
            let mut closest_k: &[u8] = &[];
            let mut closest_v = 0;
            for (k, v) in cache {
                if key > k.as_slice() {
                    if k.as_slice() > closest_k {
                        closest_k = k.as_slice();
                        closest_v = *v;
                    }
                } else if key == k.as_slice() {
                    return Ok(*v);
                }
            }
            return Ok(closest_v);
        }

        if let Some(idx) = &mut self.index {
            // A fresh scan has to start from the front of the index.
            if idx.pos() > 0 {
                if !self.idx_seekable {
                    return Err(Error::NotSeekable.into());
                }
                if let Some(sk) = idx.stream_mut().as_seekable() {
                    sk.seek_to(0)?;
                }
                idx.set_pos(0);
            }

            let mut closest_k = Vec::new();
            let mut closest_v = 0;
            loop {
                let entry = match idx.read_message::<IndexEntry>()? {
                    Some(e) => e,
                    None => return Ok(closest_v),
                };
                if key > entry.key.as_slice() {
                    if entry.key > closest_k {
                        closest_k = entry.key;
                        closest_v = entry.offset;
                    }
                } else if key == entry.key.as_slice() {
                    return Ok(entry.offset);
                }
            }
        }

        Ok(self.data.pos())
    }

    // Positions the data stream at the given offset. Native seeks are
    // used when the stream supports them; otherwise forward motion is
    // emulated by reading and discarding bounded chunks, and backward
    // motion fails with NotSeekable without touching the stream.
    fn seek_to(&mut self, offset: u64) -> anyhow::Result<()> {
        if self.data_seekable {
            if let Some(sk) = self.data.stream_mut().as_seekable() {
                sk.seek_to(offset)?;
                self.data.set_pos(offset);
                return Ok(());
            }
        }

        if self.data.pos() > offset {
            return Err(Error::NotSeekable.into());
        }

        let mut chunk = [0_u8; SEEK_CHUNK];
        while self.data.pos() < offset {
            let want = std::cmp::min((offset - self.data.pos()) as usize, SEEK_CHUNK);
            let n = self.data.stream_mut().read(&mut chunk[..want])?;
            if n == 0 {
                bail!("stream ended while seeking forward to {}", offset);
            }
            let pos = self.data.pos();
            self.data.set_pos(pos + n as u64);
        }
        Ok(())
    }

    // Looks up the value stored under exactly the given key. Absence is
    // not an error: a table that does not contain the key yields Ok(None).
    pub fn read(&mut self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        let offset = self.index_lookup(key)?;
        self.seek_to(offset)?;

        loop {
            let record = match self.data.read_message::<KeyValue>()? {
                Some(r) => r,
                None => return Ok(None),
            };
            match record.key.as_slice().cmp(key) {
                Ordering::Less => {}
                Ordering::Equal => return Ok(Some(record.value)),
                // Keys only grow from here on, so the record cannot still
                // be ahead of us.
                Ordering::Greater => return Ok(None),
            }
        }
    }

    // Returns the first record whose key is at or after the given key;
    // the starting point of an ordered walk near a key.
    pub fn read_at_or_after(&mut self, key: &[u8]) -> anyhow::Result<Option<(Vec<u8>, Vec<u8>)>> {
        let offset = self.index_lookup(key)?;
        self.seek_to(offset)?;

        loop {
            let record = match self.data.read_message::<KeyValue>()? {
                Some(r) => r,
                None => return Ok(None),
            };
            if record.key.as_slice() >= key {
                return Ok(Some((record.key, record.value)));
            }
        }
    }

    // Reads the single next record from the current position; no index
    // involvement.
    pub fn read_next(&mut self) -> anyhow::Result<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .data
            .read_message::<KeyValue>()?
            .map(|r| (r.key, r.value)))
    }

    // Drains every record from the current position to the end of the
    // stream into the given map; duplicate keys resolve to the last
    // record. This materializes the remainder of the table in memory, so
    // it is only suitable for small tables.
    pub fn read_all(
        &mut self,
        cancel: &Cancel,
        into: &mut HashMap<Vec<u8>, Vec<u8>>,
    ) -> anyhow::Result<()> {
        loop {
            cancel.check()?;
            match self.data.read_message::<KeyValue>()? {
                Some(r) => {
                    into.insert(r.key, r.value);
                }
                None => return Ok(()),
            }
        }
    }

    // Structured-value variants: the raw payload is decoded as JSON after
    // a successful lookup. A decode failure is an error, distinct from
    // the key being absent.

    pub fn read_json<T: DeserializeOwned>(&mut self, key: &[u8]) -> anyhow::Result<Option<T>> {
        match self.read(key)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn read_json_at_or_after<T: DeserializeOwned>(
        &mut self,
        key: &[u8],
    ) -> anyhow::Result<Option<(Vec<u8>, T)>> {
        match self.read_at_or_after(key)? {
            Some((k, v)) => Ok(Some((k, serde_json::from_slice(&v)?))),
            None => Ok(None),
        }
    }

    pub fn read_next_json<T: DeserializeOwned>(&mut self) -> anyhow::Result<Option<(Vec<u8>, T)>> {
        match self.read_next()? {
            Some((k, v)) => Ok(Some((k, serde_json::from_slice(&v)?))),
            None => Ok(None),
        }
    }

    pub fn read_all_json<T: DeserializeOwned>(
        &mut self,
        cancel: &Cancel,
        into: &mut HashMap<Vec<u8>, T>,
    ) -> anyhow::Result<()> {
        loop {
            cancel.check()?;
            match self.data.read_message::<KeyValue>()? {
                Some(r) => {
                    into.insert(r.key, serde_json::from_slice(&r.value)?);
                }
                None => return Ok(()),
            }
        }
    }

    // Best-effort current position in the data stream: the stream's own
    // answer when it has one, the tracked byte count otherwise.
    pub fn tell(&mut self) -> u64 {
        let mut told = None;
        if self.data_seekable {
            if let Some(sk) = self.data.stream_mut().as_seekable() {
                told = sk.tell().ok();
            }
        }
        if let Some(pos) = told {
            self.data.set_pos(pos);
            return pos;
        }
        self.data.pos()
    }
}
