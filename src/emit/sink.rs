//! Output destinations for emission passes.
//!
//! A file sink is opened once, before any pass runs, and buffers everything written to
//! it. The buffer reaches the file only through [`OutputSink::commit`], so an
//! invocation that fails after opening leaves an empty file behind, never a partial one.

use log::trace;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// A file opened for output plus the bytes pending for it.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: File,
    buffer: Vec<u8>,
}

#[derive(Debug)]
pub enum OutputSink {
    /// Discards everything.
    Null,
    /// Textual output (IR, assembly).
    Text(FileSink),
    /// Binary output (bitcode, object files).
    Binary(FileSink),
}

impl OutputSink {
    /// Create or truncate `path`.
    pub fn open(path: &Path, binary: bool) -> io::Result<Self> {
        let file = File::create(path)?;
        trace!(
            "opened {} for {} output",
            path.display(),
            if binary { "binary" } else { "text" }
        );
        let sink = FileSink {
            path: path.to_path_buf(),
            file,
            buffer: Vec::new(),
        };
        Ok(if binary {
            OutputSink::Binary(sink)
        } else {
            OutputSink::Text(sink)
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, OutputSink::Null)
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, OutputSink::Binary(_))
    }

    pub fn path(&self) -> Option<&Path> {
        self.file_sink().map(|s| s.path.as_path())
    }

    /// Bytes written so far and not yet committed.
    pub fn pending(&self) -> &[u8] {
        self.file_sink().map_or(&[], |s| s.buffer.as_slice())
    }

    /// Write the pending bytes to the file and flush it. Returns the byte count.
    pub fn commit(self) -> io::Result<usize> {
        match self {
            OutputSink::Null => Ok(0),
            OutputSink::Text(mut sink) | OutputSink::Binary(mut sink) => {
                sink.file.write_all(&sink.buffer)?;
                sink.file.flush()?;
                trace!("wrote {} bytes to {}", sink.buffer.len(), sink.path.display());
                Ok(sink.buffer.len())
            }
        }
    }

    fn file_sink(&self) -> Option<&FileSink> {
        match self {
            OutputSink::Null => None,
            OutputSink::Text(sink) | OutputSink::Binary(sink) => Some(sink),
        }
    }
}

impl Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputSink::Null => {}
            OutputSink::Text(sink) | OutputSink::Binary(sink) => sink.buffer.extend_from_slice(buf),
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_nothing_reaches_disk_before_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.s");
        let mut sink = OutputSink::open(&path, false).unwrap();
        write!(sink, "\t.text\n").unwrap();
        assert_eq!(sink.pending(), b"\t.text\n");
        assert_eq!(fs::read(&path).unwrap().len(), 0);

        assert_eq!(sink.commit().unwrap(), 7);
        assert_eq!(fs::read_to_string(&path).unwrap(), "\t.text\n");
    }

    #[test]
    fn test_dropped_sink_leaves_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.o");
        {
            let mut sink = OutputSink::open(&path, true).unwrap();
            assert!(sink.is_binary());
            sink.write_all(&[0x7f, b'E', b'L', b'F']).unwrap();
        }
        assert!(path.exists());
        assert_eq!(fs::read(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_open_in_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.o");
        assert!(OutputSink::open(&path, true).is_err());
    }

    #[test]
    fn test_null_sink_discards() {
        let mut sink = OutputSink::Null;
        sink.write_all(b"ignored").unwrap();
        assert!(sink.pending().is_empty());
        assert_eq!(sink.commit().unwrap(), 0);
    }
}
