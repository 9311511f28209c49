//! Content-addressed store for attachment ZIP blobs.
//!
//! Import hashes a stream while copying it to a temp file, scans the
//! result as a ZIP archive to reject unsafe entry paths, then renames
//! the temp file into place under its hex hash. Open wraps the file in
//! a reader that re-checks the hash once the stream has been read to
//! completion.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::crypto::{HashAlgorithm, SecureHash};
use crate::error::AttachmentError;

pub struct AttachmentStore {
    dir: PathBuf,
}

impl AttachmentStore {
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Hashes `reader` while copying it to a temp file, validates it as
    /// a ZIP archive, then publishes it under its hash. Re-importing
    /// bytes that already hash to a stored attachment is a no-op that
    /// returns the existing hash rather than overwriting (see
    /// `SPEC_FULL.md` §9 for why idempotent-no-op was chosen over
    /// overwrite).
    pub fn import(&self, mut reader: impl Read) -> Result<SecureHash, AttachmentError> {
        let tmp_path = self.dir.join(format!("tmp.{}", uuid7::uuid7()));
        let mut hasher = Sha256::new();
        {
            let mut tmp_file = File::create(&tmp_path)?;
            let mut buf = [0u8; 8192];
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                tmp_file.write_all(&buf[..n])?;
            }
        }
        let digest: [u8; 32] = hasher.finalize().into();
        let hash = SecureHash::from_raw(HashAlgorithm::Sha256, digest);

        if let Err(e) = Self::validate_archive(&tmp_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        let final_path = self.dir.join(hash.to_string());
        if final_path.exists() {
            fs::remove_file(&tmp_path)?;
            return Ok(hash);
        }
        fs::rename(&tmp_path, &final_path)?;
        Ok(hash)
    }

    fn validate_archive(path: &Path) -> Result<(), AttachmentError> {
        let file = File::open(path)?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| AttachmentError::Malformed {
            reason: e.to_string(),
        })?;
        for i in 0..archive.len() {
            let entry = archive.by_index(i).map_err(|e| AttachmentError::Malformed {
                reason: e.to_string(),
            })?;
            let name = entry.name();
            if name.starts_with('/') || name.contains("..") || name.contains('\\') {
                return Err(AttachmentError::Malformed {
                    reason: format!("unsafe archive entry path: {name}"),
                });
            }
        }
        Ok(())
    }

    pub fn open_stream(&self, hash: SecureHash) -> Result<HashCheckingReader<File>, AttachmentError> {
        let path = self.dir.join(hash.to_string());
        let file = File::open(&path).map_err(|_| AttachmentError::NotFound(hash))?;
        Ok(HashCheckingReader::new(file, hash))
    }

    pub fn contains(&self, hash: SecureHash) -> bool {
        self.dir.join(hash.to_string()).exists()
    }
}

/// Wraps a `Read`, hashing bytes as they pass through. [`Self::finish`]
/// checks the running hash against the expected id — but only if the
/// stream was read to exhaustion; a caller that stops early gets no
/// verdict, matching `spec.md` §4.4 ("only if the full stream was
/// consumed").
pub struct HashCheckingReader<R> {
    inner: R,
    hasher: Sha256,
    expected: SecureHash,
    exhausted: bool,
}

impl<R: Read> HashCheckingReader<R> {
    fn new(inner: R, expected: SecureHash) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            expected,
            exhausted: false,
        }
    }

    pub fn finish(self) -> Result<(), AttachmentError> {
        if !self.exhausted {
            return Ok(());
        }
        let digest: [u8; 32] = self.hasher.finalize().into();
        let actual = SecureHash::from_raw(HashAlgorithm::Sha256, digest);
        if actual != self.expected {
            return Err(AttachmentError::OnDiskHashMismatch {
                expected: self.expected,
            });
        }
        Ok(())
    }
}

impl<R: Read> Read for HashCheckingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 {
            self.exhausted = true;
        } else {
            self.hasher.update(&buf[..n]);
        }
        Ok(n)
    }
}
