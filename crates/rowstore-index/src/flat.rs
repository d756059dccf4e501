//! Flat dump files: fixed-width records back to back, no header.
//!
//! Paths ending in `.gz` are gzip-compressed. Dumps are written to
//! `<path>.prt` and renamed into place once complete.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rowstore_common::Result;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const BUFFER_SIZE: usize = 1024 * 1024;

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

fn partial_path(path: &Path) -> PathBuf {
    let mut partial = OsString::from(path.as_os_str());
    partial.push(".prt");
    PathBuf::from(partial)
}

enum FlatWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl FlatWriter {
    fn create(path: &Path, gzip: bool) -> io::Result<Self> {
        let file = BufWriter::with_capacity(BUFFER_SIZE, File::create(path)?);
        Ok(if gzip {
            FlatWriter::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            FlatWriter::Plain(file)
        })
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            FlatWriter::Plain(w) => w.write_all(bytes),
            FlatWriter::Gzip(w) => w.write_all(bytes),
        }
    }

    fn finish(self) -> io::Result<()> {
        let mut file = match self {
            FlatWriter::Plain(w) => w,
            FlatWriter::Gzip(w) => w.finish()?,
        };
        file.flush()?;
        file.get_ref().sync_all()
    }
}

/// Writes every record and returns how many were written.
pub(crate) fn write_records<I, R>(path: &Path, records: I) -> Result<usize>
where
    I: IntoIterator<Item = R>,
    R: AsRef<[u8]>,
{
    let partial = partial_path(path);
    let mut writer = FlatWriter::create(&partial, is_gzip(path))?;
    let mut count = 0;
    for record in records {
        writer.write_all(record.as_ref())?;
        count += 1;
    }
    writer.finish()?;
    fs::rename(&partial, path)?;
    Ok(count)
}

/// Feeds each `width`-byte record to `f` in file order. A trailing partial
/// record is ignored. Read and decoder errors propagate, so a cut-off gzip
/// stream is an error rather than a short load.
pub(crate) fn read_records<F>(path: &Path, width: usize, mut f: F) -> Result<()>
where
    F: FnMut(&[u8]) -> Result<()>,
{
    let file = BufReader::with_capacity(BUFFER_SIZE, File::open(path)?);
    let mut reader: Box<dyn Read> = if is_gzip(path) {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut record = vec![0u8; width];
    while fill(&mut reader, &mut record)? == width {
        f(&record)?;
    }
    Ok(())
}

/// Reads until `buf` is full or the source reports end of data. Returns
/// the number of bytes read.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
