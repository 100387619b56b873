use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::StorageError;

use super::KeyValueStore;

const FILE_EXTENSION: &str = ".json";

/// Sidecar holding the original key of a digest-named entry
const KEY_EXTENSION: &str = ".key";

/// Marks a digest-named stem; never produced by `escape_key`
const DIGEST_MARKER: char = '~';

/// Longest escaped key used as a file stem. Leaves room for the temp-file
/// decorations under the usual 255-byte name limit.
const MAX_STEM_LEN: usize = 200;

/// One file per key under a data directory.
///
/// Keys are escaped into file names reversibly (`cache:x/1` becomes
/// `cache%3Ax%2F1.json`) so `keys()` can hand back the original strings.
/// Keys whose escaped form is too long for a file name (long search
/// queries) are stored as `~<sha256>.json` with the key in `~<sha256>.key`.
pub struct FileStore {
    dir: PathBuf,
    tmp_counter: AtomicU64,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir.display().to_string(), &e))?;
        Ok(Self {
            dir,
            tmp_counter: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{}{}", stem, FILE_EXTENSION))
    }

    fn key_path_for(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{}{}", stem, KEY_EXTENSION))
    }

    /// Write through a uniquely named temp file and rename into place.
    fn write_atomic(&self, key: &str, stem: &str, path: &Path, contents: &str) -> Result<(), StorageError> {
        // Unique temp name so two writers of one key never share a temp file
        let tmp = self.dir.join(format!(
            ".{}.{}.{}.tmp",
            stem,
            std::process::id(),
            self.tmp_counter.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&tmp, contents).map_err(|e| StorageError::io(key, &e))?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(StorageError::io(key, &e));
        }
        Ok(())
    }

    /// Original key of the entry stored under `stem`.
    fn key_for_stem(&self, stem: &str) -> Option<String> {
        if !stem.starts_with(DIGEST_MARKER) {
            return unescape_key(stem);
        }
        match std::fs::read_to_string(self.key_path_for(stem)) {
            Ok(key) if stem_for(&key) == stem => Some(key),
            Ok(_) => None,
            Err(e) => {
                debug!(file = stem, error = %e, "Missing key file for digest entry");
                None
            }
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(self.path_for(&stem_for(key))) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(key, &e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let stem = stem_for(key);
        if stem.starts_with(DIGEST_MARKER) {
            // Key file first so a listed entry always resolves
            self.write_atomic(key, &stem, &self.key_path_for(&stem), key)?;
        }
        self.write_atomic(key, &stem, &self.path_for(&stem), value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let stem = stem_for(key);
        remove_if_present(key, &self.path_for(&stem))?;
        if stem.starts_with(DIGEST_MARKER) {
            remove_if_present(key, &self.key_path_for(&stem))?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let dir_key = self.dir.display().to_string();
        let entries = std::fs::read_dir(&self.dir).map_err(|e| StorageError::io(&dir_key, &e))?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&dir_key, &e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if let Some(stem) = name.strip_suffix(FILE_EXTENSION) {
                match self.key_for_stem(stem) {
                    Some(key) => keys.push(key),
                    None => debug!(file = name, "Skipping file with unrecognised name"),
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn remove_if_present(key: &str, path: &Path) -> Result<(), StorageError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::io(key, &e)),
    }
}

/// File stem for `key`: the escaped key, or a digest when that is too long.
fn stem_for(key: &str) -> String {
    let escaped = escape_key(key);
    if escaped.len() <= MAX_STEM_LEN {
        return escaped;
    }
    format!("{}{}", DIGEST_MARKER, hex::encode(Sha256::digest(key.as_bytes())))
}

fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn unescape_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
