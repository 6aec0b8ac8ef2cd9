//! Tar + zstd packing of filesystem trees.

use ferrite_core::{Error, Result};
use std::path::{Path, PathBuf};

const ZSTD_LEVEL: i32 = 3;

/// Pack the given paths (relative to `base_dir`) into a zstd-compressed
/// tar archive. Missing paths are an error; a snapshot must contain
/// exactly what was asked for.
pub fn pack(base_dir: &Path, paths: &[PathBuf]) -> Result<Vec<u8>> {
    let mut encoder = zstd::stream::write::Encoder::new(Vec::new(), ZSTD_LEVEL)
        .map_err(|e| Error::Internal(format!("zstd init failed: {}", e)))?;
    {
        let mut builder = tar::Builder::new(&mut encoder);
        for path in paths {
            let abs = if path.is_absolute() {
                path.clone()
            } else {
                base_dir.join(path)
            };
            if !abs.exists() {
                return Err(Error::Storage(format!(
                    "path does not exist: {}",
                    abs.display()
                )));
            }
            let name = if path.is_absolute() {
                path.strip_prefix(base_dir).unwrap_or(path)
            } else {
                path.as_path()
            };
            if abs.is_dir() {
                builder
                    .append_dir_all(name, &abs)
                    .map_err(|e| Error::Storage(format!("failed to pack dir: {}", e)))?;
            } else {
                builder
                    .append_path_with_name(&abs, name)
                    .map_err(|e| Error::Storage(format!("failed to pack file: {}", e)))?;
            }
        }
        builder
            .finish()
            .map_err(|e| Error::Storage(format!("failed to finish tar: {}", e)))?;
    }
    encoder
        .finish()
        .map_err(|e| Error::Internal(format!("zstd finish failed: {}", e)))
}

/// Unpack an archive produced by [`pack`] into `dest`.
pub fn unpack(bytes: &[u8], dest: &Path) -> Result<()> {
    let decoder = zstd::stream::read::Decoder::new(bytes)
        .map_err(|e| Error::Internal(format!("zstd decoder failed: {}", e)))?;
    let mut archive = tar::Archive::new(decoder);
    archive
        .unpack(dest)
        .map_err(|e| Error::Storage(format!("failed to unpack archive: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_round_trip() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("target/release")).unwrap();
        std::fs::write(src.path().join("target/release/app"), b"binary-bytes").unwrap();
        std::fs::write(src.path().join("notes.txt"), b"hello").unwrap();

        let bytes = pack(
            src.path(),
            &[
                PathBuf::from("target/release"),
                PathBuf::from("notes.txt"),
            ],
        )
        .unwrap();

        let dest = tempfile::tempdir().unwrap();
        unpack(&bytes, dest.path()).unwrap();

        assert_eq!(
            std::fs::read(dest.path().join("target/release/app")).unwrap(),
            b"binary-bytes"
        );
        assert_eq!(std::fs::read(dest.path().join("notes.txt")).unwrap(), b"hello");
    }

    #[test]
    fn test_missing_path_is_an_error() {
        let src = tempfile::tempdir().unwrap();
        let err = pack(src.path(), &[PathBuf::from("nope")]).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
