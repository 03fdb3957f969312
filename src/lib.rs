pub mod cancel;
pub mod error;
pub mod fs;
pub mod recordio;
pub mod table;

pub use cancel::Cancel;
pub use error::Error;
pub use fs::{MemFile, NoSeek, Seekable, TableFile};
pub use recordio::{IndexEntry, KeyValue, RecordReader, RecordWriter};
pub use table::{IndexPolicy, Reader, Writer};
