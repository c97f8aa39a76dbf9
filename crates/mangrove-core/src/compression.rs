//! Compression selection from file-extension tokens, plus scoped readers and
//! writers. Writers stage into a hidden sibling file and only appear under
//! the final name once `commit` has flushed and closed everything.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use snap::read::FrameDecoder;
use snap::write::FrameEncoder;

use crate::error::{IoContext, Result};

/// zstd level used for `.zst` outputs.
const ZSTD_LEVEL: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    None,
    Gzip,
    /// Snappy frame format.
    Snappy,
    Zstd,
}

impl Compression {
    /// Inspect the dot-separated tokens of the file name after the stem:
    /// `gz`/`gzip` select gzip, `sz` snappy and `zst` zstd.
    pub fn from_path(path: &Path) -> Self {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let has = |token: &str| name.split('.').skip(1).any(|t| t.eq_ignore_ascii_case(token));
        if has("gz") || has("gzip") {
            Compression::Gzip
        } else if has("sz") {
            Compression::Snappy
        } else if has("zst") {
            Compression::Zstd
        } else {
            Compression::None
        }
    }
}

/// Open `path` for reading, decompressing according to its name.
pub fn open_reader(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).at(path)?;
    Ok(match Compression::from_path(path) {
        Compression::None => Box::new(BufReader::new(file)),
        Compression::Gzip => Box::new(BufReader::new(MultiGzDecoder::new(file))),
        Compression::Snappy => Box::new(FrameDecoder::new(BufReader::new(file))),
        Compression::Zstd => Box::new(zstd::Decoder::new(file).at(path)?),
    })
}

enum Sink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
    Snappy(FrameEncoder<BufWriter<File>>),
    Zstd(zstd::Encoder<'static, BufWriter<File>>),
}

impl Sink {
    fn finish(self) -> io::Result<File> {
        let buffered = match self {
            Sink::Plain(w) => w,
            Sink::Gzip(w) => w.finish()?,
            Sink::Snappy(w) => w
                .into_inner()
                .map_err(|e| io::Error::new(e.error().kind(), e.error().to_string()))?,
            Sink::Zstd(w) => w.finish()?,
        };
        buffered.into_inner().map_err(|e| e.into_error())
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Plain(w) => w.write(buf),
            Sink::Gzip(w) => w.write(buf),
            Sink::Snappy(w) => w.write(buf),
            Sink::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Plain(w) => w.flush(),
            Sink::Gzip(w) => w.flush(),
            Sink::Snappy(w) => w.flush(),
            Sink::Zstd(w) => w.flush(),
        }
    }
}

/// A compressed output file that is only published on `commit`.
/// Dropping it uncommitted removes the partial file.
pub struct StagedWriter {
    target: PathBuf,
    staging: PathBuf,
    sink: Option<Sink>,
}

impl StagedWriter {
    pub fn create(target: &Path) -> Result<Self> {
        if let Some(dir) = target.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).at(dir)?;
        }
        let name = target.file_name().and_then(|n| n.to_str()).unwrap_or("out");
        let staging = target.with_file_name(format!(".{name}.partial"));
        let file = File::create(&staging).at(&staging)?;
        let buffered = BufWriter::new(file);
        let sink = match Compression::from_path(target) {
            Compression::None => Sink::Plain(buffered),
            Compression::Gzip => Sink::Gzip(GzEncoder::new(buffered, flate2::Compression::default())),
            Compression::Snappy => Sink::Snappy(FrameEncoder::new(buffered)),
            Compression::Zstd => Sink::Zstd(zstd::Encoder::new(buffered, ZSTD_LEVEL).at(&staging)?),
        };
        Ok(Self {
            target: target.to_path_buf(),
            staging,
            sink: Some(sink),
        })
    }

    /// Flush, close and move the staged file into place.
    pub fn commit(mut self) -> Result<()> {
        if let Some(sink) = self.sink.take() {
            let file = sink.finish().at(&self.staging)?;
            file.sync_all().at(&self.staging)?;
            drop(file);
            fs::rename(&self.staging, &self.target).at(&self.target)?;
        }
        Ok(())
    }
}

impl Write for StagedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.sink.as_mut() {
            Some(s) => s.write(buf),
            None => Err(io::Error::new(io::ErrorKind::Other, "writer already committed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.as_mut().map_or(Ok(()), |s| s.flush())
    }
}

impl Drop for StagedWriter {
    fn drop(&mut self) {
        if self.sink.take().is_some() {
            let _ = fs::remove_file(&self.staging);
        }
    }
}
