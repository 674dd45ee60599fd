use cosi_schema::Sha384Hash;
use sha2::{Digest, Sha384};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

/// Writer adapter that hashes exactly the bytes accepted by the inner writer.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha384,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha384::new(),
            written: 0,
        }
    }

    /// Return the inner writer, the digest, and the byte count.
    pub fn finish(self) -> (W, Sha384Hash, u64) {
        let digest = self.hasher.finalize();
        (self.inner, Sha384Hash::from_digest(&digest), self.written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Writer adapter that counts bytes written through it.
pub struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Hash a stream to its end. Returns the byte count and the digest.
pub fn sha384_reader<R: Read>(reader: R) -> io::Result<(u64, Sha384Hash)> {
    let mut hashing = HashingWriter::new(io::sink());
    let mut reader = reader;
    io::copy(&mut reader, &mut hashing)?;
    let (_, hash, len) = hashing.finish();
    Ok((len, hash))
}

pub fn sha384_file(path: &Path) -> io::Result<(u64, Sha384Hash)> {
    sha384_reader(BufReader::new(File::open(path)?))
}
