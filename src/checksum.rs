//! SHA-256 sidecars and declared-digest checks for cached artifacts.
//!
//! Every successfully acquired artifact gets a `<file>.sha256` companion
//! holding the lowercase hex digest. An artifact whose sidecar matches a
//! fresh digest is considered valid and is never downloaded again.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha1::Sha1;
use sha2::digest::Digest;
use sha2::Sha256;

use crate::ext::PathExt;

pub const SIDECAR_EXTENSION: &str = "sha256";

#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    #[error("Could not read {1} for hashing")]
    Read(#[source] io::Error, PathBuf),

    #[error("Could not write checksum sidecar {1}")]
    Write(#[source] io::Error, PathBuf),
}

/// A digest declared in configuration for an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expected {
    Md5(String),
    Sha1(String),
    Sha256(String),
}

impl Expected {
    pub fn algorithm(&self) -> &'static str {
        match self {
            Expected::Md5(_) => "md5",
            Expected::Sha1(_) => "sha1",
            Expected::Sha256(_) => "sha256",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Expected::Md5(v) | Expected::Sha1(v) | Expected::Sha256(v) => v,
        }
    }

    pub fn compute(&self, path: &Path) -> Result<String, ChecksumError> {
        let digest = match self {
            Expected::Md5(_) => md5_file(path),
            Expected::Sha1(_) => digest_file::<Sha1>(path),
            Expected::Sha256(_) => digest_file::<Sha256>(path),
        };
        digest.map_err(|e| ChecksumError::Read(e, path.to_path_buf()))
    }

    /// Returns the actual digest when it differs from the declared one.
    pub fn mismatch(&self, path: &Path) -> Result<Option<String>, ChecksumError> {
        let actual = self.compute(path)?;
        if actual.eq_ignore_ascii_case(self.value().trim()) {
            Ok(None)
        } else {
            Ok(Some(actual))
        }
    }
}

fn for_each_chunk<F: FnMut(&[u8])>(path: &Path, mut f: F) -> io::Result<()> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        f(&buf[..n]);
    }
}

pub fn digest_file<D: Digest>(path: &Path) -> io::Result<String> {
    let mut hasher = D::new();
    for_each_chunk(path, |chunk| hasher.update(chunk))?;
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

fn md5_file(path: &Path) -> io::Result<String> {
    let mut ctx = md5::Context::new();
    for_each_chunk(path, |chunk| ctx.consume(chunk))?;
    Ok(format!("{:x}", ctx.compute()))
}

pub fn sidecar_path(path: &Path) -> PathBuf {
    path.sidecar()
}

/// True iff both the artifact and its sidecar exist and the recorded digest
/// matches the artifact's current contents.
pub fn verified(path: &Path) -> bool {
    let sidecar = path.sidecar();
    if !path.is_file() || !sidecar.is_file() {
        return false;
    }

    let recorded = match std::fs::read_to_string(&sidecar) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("Could not read {:?}: {}", &sidecar, e);
            return false;
        }
    };

    match digest_file::<Sha256>(path) {
        Ok(actual) => actual == recorded.trim(),
        Err(e) => {
            log::warn!("Could not hash {:?}: {}", path, e);
            false
        }
    }
}

/// Writes the artifact's SHA-256 into its sidecar, replacing any previous one.
pub fn record(path: &Path) -> Result<String, ChecksumError> {
    let digest =
        digest_file::<Sha256>(path).map_err(|e| ChecksumError::Read(e, path.to_path_buf()))?;
    let sidecar = path.sidecar();
    std::fs::write(&sidecar, &digest).map_err(|e| ChecksumError::Write(e, sidecar.clone()))?;
    log::debug!("Recorded {} for {:?}", &digest, path);
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn record_then_verify() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.bin");
        std::fs::write(&path, b"hello").unwrap();

        assert!(!verified(&path));
        let digest = record(&path).unwrap();
        assert_eq!(digest, HELLO_SHA256);
        assert!(verified(&path));

        let sidecar = std::fs::read_to_string(sidecar_path(&path)).unwrap();
        assert_eq!(sidecar, HELLO_SHA256);
    }

    #[test]
    fn mutated_byte_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.bin");
        std::fs::write(&path, b"hello").unwrap();
        record(&path).unwrap();

        std::fs::write(&path, b"jello").unwrap();
        assert!(!verified(&path));
    }

    #[test]
    fn missing_artifact_is_never_verified() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.bin");
        std::fs::write(sidecar_path(&path), HELLO_SHA256).unwrap();
        assert!(!verified(&path));
    }

    #[test]
    fn sidecar_with_trailing_newline_still_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.bin");
        std::fs::write(&path, b"hello").unwrap();
        std::fs::write(sidecar_path(&path), format!("{}\n", HELLO_SHA256)).unwrap();
        assert!(verified(&path));
    }

    #[test]
    fn digest_file_is_lowercase_hex_for_any_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.txt");
        std::fs::write(&path, b"abc").unwrap();

        assert_eq!(
            digest_file::<Sha1>(&path).unwrap(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            digest_file::<Sha256>(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(md5_file(&path).unwrap(), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn declared_digests_compare_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.bin");
        std::fs::write(&path, b"hello").unwrap();

        let md5 = Expected::Md5("5D41402ABC4B2A76B9719D911017C592".into());
        assert_eq!(md5.mismatch(&path).unwrap(), None);

        let sha1 = Expected::Sha1("aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d".into());
        assert_eq!(sha1.mismatch(&path).unwrap(), None);

        let wrong = Expected::Sha256("00".into());
        assert_eq!(wrong.mismatch(&path).unwrap().as_deref(), Some(HELLO_SHA256));
    }
}
