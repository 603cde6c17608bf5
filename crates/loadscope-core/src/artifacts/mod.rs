//! Compressed artifact writers.
//!
//! All persisted logs share one framing discipline: a literal preamble whose
//! first element is an empty object, one `,\n`-prefixed JSON record per
//! event, and a literal suffix written at close. Readers can recover a valid
//! JSON document from a truncated file by appending the suffix themselves.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::Value;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Gzip compression level for every artifact stream.
const GZIP_LEVEL: u32 = 7;

/// A gzip stream over a buffered file.
pub type GzFile = GzEncoder<BufWriter<File>>;

/// Open a gzip artifact stream at `path`.
pub fn gz_writer(path: impl AsRef<Path>) -> io::Result<GzFile> {
    let file = File::create(path)?;
    Ok(GzEncoder::new(
        BufWriter::new(file),
        Compression::new(GZIP_LEVEL),
    ))
}

/// Finish a gzip stream, flushing the underlying file.
pub fn finish_gz(file: GzFile) -> io::Result<()> {
    let mut inner = file.finish()?;
    inner.flush()
}

/// Write one JSON value as a complete gzipped document.
pub fn write_json_gz(path: impl AsRef<Path>, value: &Value) -> io::Result<()> {
    let mut file = gz_writer(path)?;
    serde_json::to_writer(&mut file, value)?;
    finish_gz(file)
}

/// Filmstrip frame path: `<prefix><NNNNNN>.jpg` with the elapsed
/// milliseconds zero-padded to six digits.
pub fn filmstrip_path(prefix: &str, ms_elapsed: i64) -> String {
    format!("{prefix}{ms_elapsed:06}.jpg")
}

/// The devtools event log: a lazily created gzipped JSON array.
///
/// Nothing is written until the first event arrives, so runs that log no
/// events leave no file behind.
#[derive(Debug)]
pub struct EventLog {
    path: String,
    file: Option<GzFile>,
}

impl EventLog {
    /// Create a log that will write to `<path_base>_devtools.json.gz`.
    pub fn new(path_base: &str) -> Self {
        Self {
            path: format!("{path_base}_devtools.json.gz"),
            file: None,
        }
    }

    /// Append one event, opening the file with its `[{}` preamble on first
    /// use.
    pub fn append(&mut self, event: &Value) -> io::Result<()> {
        if self.file.is_none() {
            let mut file = gz_writer(&self.path)?;
            file.write_all(b"[{}")?;
            self.file = Some(file);
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(b",\n")?;
            serde_json::to_writer(&mut *file, event)?;
        }
        Ok(())
    }

    /// Close the log with its `\n]` suffix. A no-op when nothing was written.
    pub fn close(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.write_all(b"\n]")?;
            finish_gz(file)?;
        }
        Ok(())
    }

    /// Whether any event has been written.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

/// Zip archive of text response bodies.
pub struct BodyArchive {
    writer: ZipWriter<File>,
    index: u32,
}

impl BodyArchive {
    /// Create `<path_base>_bodies.zip`.
    pub fn create(path_base: &str) -> Result<Self, crate::error::CoreError> {
        let file = File::create(format!("{path_base}_bodies.zip"))?;
        Ok(Self {
            writer: ZipWriter::new(file),
            index: 0,
        })
    }

    /// Store one text body as `NNN-<request-id>-body.txt` (NNN is a 1-based
    /// counter within this archive) and return the member name.
    pub fn add_text_body(
        &mut self,
        request_id: &str,
        body: &[u8],
    ) -> Result<String, crate::error::CoreError> {
        self.index += 1;
        let name = format!("{:03}-{}-body.txt", self.index, request_id);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        self.writer.start_file(name.as_str(), options)?;
        self.writer.write_all(body)?;
        Ok(name)
    }

    /// Finalize the archive.
    pub fn finish(self) -> Result<(), crate::error::CoreError> {
        self.writer.finish()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
