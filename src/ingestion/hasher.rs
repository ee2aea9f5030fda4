//! Content digests used as the dedup key.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read buffer size. The hasher never holds more than this much of the input.
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Stream `reader` to its end through SHA-256 and return the lowercase hex digest.
///
/// Interrupted reads are retried, any other read failure is returned as is.
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn hash_file(path: &Path) -> io::Result<String> {
    hash_reader(File::open(path)?)
}
