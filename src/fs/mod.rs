use std::{
    cell::RefCell,
    fs::File,
    io::{Read, Seek, SeekFrom, Write},
    rc::Rc,
};

// A byte stream a table can be stored in. Only sequential reads and
// appending writes are required; position queries and seeks are optional
// and discovered through `as_seekable`.
pub trait TableFile: std::fmt::Debug {
    fn read(&mut self, buf: &mut [u8]) -> anyhow::Result<usize>;
    fn write(&mut self, buf: &[u8]) -> anyhow::Result<()>;

    // Capability probe. Writers and readers call this once at construction
    // and branch on the cached answer rather than re-probing per operation.
    fn as_seekable(&mut self) -> Option<&mut dyn Seekable> {
        None
    }
}

pub trait Seekable {
    fn tell(&mut self) -> anyhow::Result<u64>;
    fn seek_to(&mut self, offset: u64) -> anyhow::Result<()>;
}

impl TableFile for File {
    fn read(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        Ok(Read::read(self, buf)?)
    }

    fn write(&mut self, buf: &[u8]) -> anyhow::Result<()> {
        self.write_all(buf)?;
        Ok(())
    }

    fn as_seekable(&mut self) -> Option<&mut dyn Seekable> {
        Some(self)
    }
}

impl Seekable for File {
    fn tell(&mut self) -> anyhow::Result<u64> {
        Ok(self.stream_position()?)
    }

    fn seek_to(&mut self, offset: u64) -> anyhow::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        Ok(())
    }
}

// Streams are owned by the caller; this lets them be lent to a writer or
// reader for its lifetime instead of moved in.
impl<T: TableFile + ?Sized> TableFile for &mut T {
    fn read(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> anyhow::Result<()> {
        (**self).write(buf)
    }

    fn as_seekable(&mut self) -> Option<&mut dyn Seekable> {
        (**self).as_seekable()
    }
}

// An in-memory stream. Handles created through `reopen` share the same
// backing buffer, so a table written through one handle can be read back
// through a fresh one positioned at the start.
#[derive(Clone, Debug, Default)]
pub struct MemFile {
    data: Rc<RefCell<Vec<u8>>>,
    pos: usize,
}

impl MemFile {
    pub fn new() -> Self {
        Self::default()
    }

    // A new handle over the same contents, positioned at zero.
    pub fn reopen(&self) -> Self {
        MemFile {
            data: self.data.clone(),
            pos: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TableFile for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        let data = self.data.borrow();
        if self.pos >= data.len() {
            return Ok(0);
        }
        let n = std::cmp::min(data.len() - self.pos, buf.len());
        buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> anyhow::Result<()> {
        let mut data = self.data.borrow_mut();
        if self.pos + buf.len() > data.len() {
            data.resize(self.pos + buf.len(), 0);
        }
        data[self.pos..self.pos + buf.len()].copy_from_slice(buf);
        self.pos += buf.len();
        Ok(())
    }

    fn as_seekable(&mut self) -> Option<&mut dyn Seekable> {
        Some(self)
    }
}

impl Seekable for MemFile {
    fn tell(&mut self) -> anyhow::Result<u64> {
        Ok(self.pos as u64)
    }

    fn seek_to(&mut self, offset: u64) -> anyhow::Result<()> {
        self.pos = offset as usize;
        Ok(())
    }
}

// Hides the inner stream's seek support, leaving reads and writes intact.
// Forces the forward-only emulation and NotSeekable paths.
#[derive(Debug)]
pub struct NoSeek<F>(pub F);

impl<F: TableFile> TableFile for NoSeek<F> {
    fn read(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        self.0.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> anyhow::Result<()> {
        self.0.write(buf)
    }
}
