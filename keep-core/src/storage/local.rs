/*!
Local filesystem storage plugin.
*/

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use sha2::{Digest, Sha256};

use super::{select_keys, DatabasePlugin};
use crate::{KeepError, Result};
use tracing::warn;

/// Longest hex-encoded file name; longer names are stored under a digest
const MAX_ENCODED_NAME: usize = 200;

/// Extension of the file holding the real key of a digest-named entry
const KEY_EXTENSION: &str = "key";

#[derive(Debug, Default)]
struct OpenState {
    open: bool,
    read_only: bool,
}

/// Local filesystem storage plugin
///
/// Each domain is a directory under the base directory and each key a file
/// inside it. Domain and key names are hex-encoded into file names, so any
/// string is a valid key. Names whose encoding would not fit in a file name
/// are stored under their SHA-256 digest, with the real key kept beside the
/// value in a `.key` file.
///
/// # Example
/// ```rust
/// use keep_core::storage::{DatabasePlugin, FilesystemDatabase};
///
/// # let dir = tempfile::TempDir::new().unwrap();
/// let db = FilesystemDatabase::with_base_dir(dir.path());
/// db.set_up()?;
/// db.put("configurations", "node_key", "abc")?;
/// assert_eq!(db.get("configurations", "node_key")?, "abc");
/// # Ok::<(), keep_core::KeepError>(())
/// ```
#[derive(Debug)]
pub struct FilesystemDatabase {
    /// Base directory holding one directory per domain
    base_dir: PathBuf,
    state: RwLock<OpenState>,
}

impl FilesystemDatabase {
    /// Create a filesystem plugin rooted at `base_dir`
    ///
    /// Nothing is created until [`DatabasePlugin::set_up`] runs.
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            state: RwLock::new(OpenState::default()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve the directory of a domain
    fn domain_dir(&self, domain: &str) -> PathBuf {
        self.base_dir.join(encode_name(domain))
    }

    /// Resolve the file of a key
    fn key_path(&self, domain: &str, key: &str) -> PathBuf {
        self.domain_dir(domain).join(encode_name(key))
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, OpenState>> {
        let state = self
            .state
            .read()
            .map_err(|_| KeepError::unavailable("filesystem database lock poisoned"))?;
        if !state.open {
            return Err(KeepError::unavailable(format!(
                "filesystem database at {} is not open",
                self.base_dir.display()
            )));
        }
        Ok(state)
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, OpenState>> {
        let state = self
            .state
            .write()
            .map_err(|_| KeepError::write("filesystem database lock poisoned"))?;
        if !state.open {
            return Err(KeepError::write(format!(
                "filesystem database at {} is not open",
                self.base_dir.display()
            )));
        }
        if state.read_only {
            return Err(KeepError::write(format!(
                "filesystem database at {} is read-only",
                self.base_dir.display()
            )));
        }
        Ok(state)
    }

    /// Ensure the directory exists, creating it if necessary
    fn ensure_dir(&self, dir: &Path) -> Result<()> {
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| {
                KeepError::write(format!("Failed to create directory {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}

impl DatabasePlugin for FilesystemDatabase {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn set_up(&self) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| KeepError::unavailable("filesystem database lock poisoned"))?;
        if state.open {
            return Ok(());
        }

        if !self.base_dir.exists() {
            fs::create_dir_all(&self.base_dir).map_err(|e| {
                KeepError::unavailable(format!(
                    "Failed to create database directory {}: {}",
                    self.base_dir.display(),
                    e
                ))
            })?;
        }

        let metadata = fs::metadata(&self.base_dir).map_err(|e| {
            KeepError::unavailable(format!(
                "Failed to open database directory {}: {}",
                self.base_dir.display(),
                e
            ))
        })?;
        if !metadata.is_dir() {
            return Err(KeepError::unavailable(format!(
                "Database path {} is not a directory",
                self.base_dir.display()
            )));
        }

        state.read_only = metadata.permissions().readonly();
        if state.read_only {
            warn!("Opened filesystem database {} read-only", self.base_dir.display());
        }
        state.open = true;
        Ok(())
    }

    fn tear_down(&self) {
        if let Ok(mut state) = self.state.write() {
            *state = OpenState::default();
        }
    }

    fn is_open(&self) -> bool {
        self.state.read().map(|s| s.open).unwrap_or(false)
    }

    fn is_read_only(&self) -> bool {
        self.state.read().map(|s| s.read_only).unwrap_or(false)
    }

    fn get(&self, domain: &str, key: &str) -> Result<String> {
        let _state = self.read_state()?;
        let full_path = self.key_path(domain, key);

        fs::read_to_string(&full_path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => KeepError::not_found(domain, key),
            _ => KeepError::unavailable(format!(
                "Failed to read {} from {}: {}",
                key,
                full_path.display(),
                e
            )),
        })
    }

    fn put(&self, domain: &str, key: &str, value: &str) -> Result<()> {
        let _state = self.write_state()?;
        let full_path = self.key_path(domain, key);

        self.ensure_dir(&self.domain_dir(domain))?;

        // The real key lands first so a listed digest entry can always be named
        let named = if is_digest_name(&full_path) {
            fs::write(full_path.with_extension(KEY_EXTENSION), key)
        } else {
            Ok(())
        };

        // Write beside the target then rename so readers never see a partial value
        let staging = full_path.with_extension("tmp");
        named
            .and_then(|_| fs::write(&staging, value))
            .and_then(|_| fs::rename(&staging, &full_path))
            .map_err(|e| {
                KeepError::write(format!(
                    "Failed to write {} to {}: {}",
                    key,
                    full_path.display(),
                    e
                ))
            })
    }

    fn remove(&self, domain: &str, key: &str) -> Result<()> {
        let _state = self.write_state()?;
        let full_path = self.key_path(domain, key);

        remove_if_present(&full_path)?;
        if is_digest_name(&full_path) {
            remove_if_present(&full_path.with_extension(KEY_EXTENSION))?;
        }
        Ok(())
    }

    fn scan(&self, domain: &str, prefix: &str, max: usize) -> Result<Vec<String>> {
        let _state = self.read_state()?;
        let dir = self.domain_dir(domain);

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            let key = if is_digest_name(&path) {
                match fs::read_to_string(path.with_extension(KEY_EXTENSION)) {
                    Ok(key) => Some(key),
                    Err(e) if e.kind() == ErrorKind::NotFound => None,
                    Err(e) => return Err(e.into()),
                }
            } else {
                entry.file_name().to_str().and_then(decode_name)
            };
            if let Some(key) = key {
                keys.push(key);
            }
        }
        keys.sort();

        Ok(select_keys(keys.iter().map(String::as_str), prefix, max))
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(KeepError::write(format!(
            "Failed to delete {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Hex-encode a domain or key into a portable file name
///
/// Names too long to encode become `h` followed by their SHA-256 digest.
fn encode_name(name: &str) -> String {
    if name.is_empty() {
        return "_".to_string();
    }
    if name.len() * 2 > MAX_ENCODED_NAME {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        return format!("h{:x}", hasher.finalize());
    }
    name.bytes().map(|b| format!("{b:02x}")).collect()
}

/// True for the value file of an entry named by [`encode_name`]'s digest form
fn is_digest_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_prefix('h'))
        .is_some_and(|digest| digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Decode a file name produced by [`encode_name`]; other names are ignored
fn decode_name(file_name: &str) -> Option<String> {
    if file_name == "_" {
        return Some(String::new());
    }
    if file_name.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..file_name.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(file_name.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}
