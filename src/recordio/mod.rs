use anyhow::bail;

use crate::{error::Error, fs::TableFile};

// Record streams are sequences of frames: a u32 little-endian payload
// length followed by the payload. A payload is the fields of one message,
// escaped and joined by a separator so that field boundaries survive
// arbitrary binary contents: 0x00 escapes to 0x00 0xff, fields are joined
// by 0x00 0x01.

const SEPARATOR: [u8; 2] = [0x00, 0x01];
const ESCAPED_00: [u8; 2] = [0x00, 0xff];

const FRAME_HEADER_LEN: usize = 4;

fn copy_escaped(mut from: &[u8], to: &mut Vec<u8>) {
    while !from.is_empty() {
        match from.iter().position(|x| *x == 0x00) {
            Some(idx) => {
                to.extend(&from[..idx + 1]);
                to.push(0xff);
                from = &from[(idx + 1)..];
            }
            None => {
                to.extend(from);
                return;
            }
        }
    }
}

fn copy_unescaped(mut from: &[u8], to: &mut Vec<u8>) {
    while !from.is_empty() {
        match from.windows(2).position(|w| w == ESCAPED_00) {
            Some(idx) => {
                to.extend(&from[..idx + 1]);
                from = &from[(idx + 2)..];
            }
            None => {
                to.extend(from);
                from = &from[from.len()..];
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct KeyWriter {
    buf: Vec<u8>,
}

impl KeyWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.buf.clear()
    }

    pub fn write(&mut self, buf: &[u8]) {
        copy_escaped(buf, &mut self.buf);
    }

    pub fn separator(&mut self) {
        self.buf.extend(SEPARATOR);
    }
}

#[derive(Debug, Default)]
pub struct KeyReader {
    buf: Vec<u8>,
    from: usize,
    scratch: Vec<u8>,
}

impl KeyReader {
    pub fn new() -> Self {
        Self::default()
    }

    fn buf_mut(&mut self) -> &mut Vec<u8> {
        self.scratch.clear();
        self.from = 0;
        &mut self.buf
    }

    // The next field of the loaded payload, unescaped. An empty remainder
    // is a legitimate empty field; being past the end is a malformed
    // payload.
    pub fn next(&mut self) -> anyhow::Result<&[u8]> {
        if self.from > self.buf.len() {
            bail!("record payload is missing a field");
        }
        let split_position = self.buf[self.from..]
            .windows(2)
            .position(|w| w == SEPARATOR)
            .unwrap_or(self.buf.len() - self.from);

        self.scratch.clear();
        copy_unescaped(
            &self.buf[self.from..self.from + split_position],
            &mut self.scratch,
        );
        self.from += split_position + 2;

        Ok(&self.scratch)
    }
}

pub trait Message: std::fmt::Debug + Sized {
    fn encode(&self, kw: &mut KeyWriter);
    fn decode(kr: &mut KeyReader) -> anyhow::Result<Self>;
}

// One data-stream record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Message for KeyValue {
    fn encode(&self, kw: &mut KeyWriter) {
        kw.write(&self.key);
        kw.separator();
        kw.write(&self.value);
    }

    fn decode(kr: &mut KeyReader) -> anyhow::Result<Self> {
        let key = kr.next()?.to_vec();
        let value = kr.next()?.to_vec();
        Ok(KeyValue { key, value })
    }
}

// One index-stream record: the key (or key prefix) and the offset in the
// data stream at which the associated record begins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: Vec<u8>,
    pub offset: u64,
}

impl Message for IndexEntry {
    fn encode(&self, kw: &mut KeyWriter) {
        kw.write(&self.key);
        kw.separator();
        kw.write(&self.offset.to_le_bytes());
    }

    fn decode(kr: &mut KeyReader) -> anyhow::Result<Self> {
        let key = kr.next()?.to_vec();
        let offset = u64::from_le_bytes(kr.next()?.try_into()?);
        Ok(IndexEntry { key, offset })
    }
}

pub struct RecordWriter<S>
where
    S: TableFile,
{
    out: S,
    kw: KeyWriter,
}

impl<S> RecordWriter<S>
where
    S: TableFile,
{
    pub fn new(out: S) -> Self {
        RecordWriter {
            out,
            kw: KeyWriter::new(),
        }
    }

    // Appends one framed message, returning the number of bytes the frame
    // occupies on the stream (header included).
    pub fn write_message<M: Message>(&mut self, m: &M) -> anyhow::Result<u64> {
        self.kw.clear();
        m.encode(&mut self.kw);
        self.out
            .write(&(self.kw.buf.len() as u32).to_le_bytes())?;
        self.out.write(&self.kw.buf)?;
        Ok((FRAME_HEADER_LEN + self.kw.buf.len()) as u64)
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.out
    }
}

pub struct RecordReader<S>
where
    S: TableFile,
{
    src: S,
    kr: KeyReader,
    pos: u64,
}

impl<S> RecordReader<S>
where
    S: TableFile,
{
    pub fn new(src: S) -> Self {
        RecordReader {
            src,
            kr: KeyReader::new(),
            pos: 0,
        }
    }

    // Reads the next framed message. Ok(None) is a clean end of stream,
    // hit exactly on a frame boundary; running dry inside a frame is a
    // TruncatedFrame error.
    pub fn read_message<M: Message>(&mut self) -> anyhow::Result<Option<M>> {
        let mut header = [0_u8; FRAME_HEADER_LEN];
        let mut filled = 0;
        while filled < header.len() {
            let n = self.src.read(&mut header[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(Error::TruncatedFrame.into());
            }
            filled += n;
        }
        let len = u32::from_le_bytes(header) as usize;

        let buf = self.kr.buf_mut();
        buf.clear();
        buf.resize(len, 0);
        let mut filled = 0;
        while filled < len {
            let n = self.src.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(Error::TruncatedFrame.into());
            }
            filled += n;
        }

        let m = M::decode(&mut self.kr)?;
        self.pos += (FRAME_HEADER_LEN + len) as u64;
        Ok(Some(m))
    }

    // Bytes consumed from the stream since construction (or since the
    // position was last corrected after a native seek). Exact as long as
    // the stream does not transform the bytes it carries.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn set_pos(&mut self, pos: u64) {
        self.pos = pos;
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.src
    }
}
