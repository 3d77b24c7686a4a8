//! Token storage
//!
//! A store holds exactly one [`TokenPair`] or nothing. It has no notion of
//! expiry and never fails at its boundary: backend errors are logged and read
//! back as "no token".

use crate::types::TokenPair;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

/// File name used by [`FileTokenStore::in_dir`]
pub const TOKEN_FILE_NAME: &str = "tokens.json";

/// Key-value surface for the access and refresh tokens
pub trait TokenStore: Send + Sync {
    /// Current access token, if any
    fn access_token(&self) -> Option<String>;

    /// Current refresh token, if any
    fn refresh_token(&self) -> Option<String>;

    /// Overwrite both tokens
    fn set_tokens(&self, tokens: &TokenPair);

    /// Remove both tokens; clearing an empty store is a no-op
    fn clear_tokens(&self);
}

/// In-process store, lost when the process exits
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<Option<TokenPair>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds a pair
    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            tokens: RwLock::new(Some(tokens)),
        }
    }

    fn read(&self) -> Option<TokenPair> {
        match self.tokens.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn write(&self, tokens: Option<TokenPair>) {
        match self.tokens.write() {
            Ok(mut guard) => *guard = tokens,
            Err(poisoned) => *poisoned.into_inner() = tokens,
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn access_token(&self) -> Option<String> {
        self.read().map(|t| t.access_token)
    }

    fn refresh_token(&self) -> Option<String> {
        self.read().map(|t| t.refresh_token)
    }

    fn set_tokens(&self, tokens: &TokenPair) {
        self.write(Some(tokens.clone()));
    }

    fn clear_tokens(&self) {
        self.write(None);
    }
}

/// Store persisted as a JSON document on disk
///
/// A store without a path stands in for "no storage medium available yet":
/// reads return `None` and writes are dropped.
#[derive(Debug)]
pub struct FileTokenStore {
    path: Option<PathBuf>,
    // Serialises read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileTokenStore {
    /// Store backed by the given file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            lock: Mutex::new(()),
        }
    }

    /// Store backed by `tokens.json` inside `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(TOKEN_FILE_NAME))
    }

    /// Store with no backing medium
    pub fn detached() -> Self {
        Self {
            path: None,
            lock: Mutex::new(()),
        }
    }

    /// Backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn load(&self) -> Option<TokenPair> {
        let path = self.path.as_ref()?;
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read token file");
                return None;
            }
        };

        match serde_json::from_str::<TokenPair>(&content) {
            Ok(tokens) => TokenPair::new(tokens.access_token, tokens.refresh_token),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring malformed token file");
                None
            }
        }
    }

    fn persist(&self, tokens: &TokenPair) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(tokens)?;
        // Write-then-rename so a crash never leaves half a token on disk.
        let tmp = path.with_extension("json.tmp");
        match fs::remove_file(&tmp) {
            Err(e) if e.kind() != ErrorKind::NotFound => return Err(e),
            _ => {}
        }
        let mut file = create_private(&tmp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, path)
    }

    fn remove(&self) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());

        match fs::remove_file(path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl TokenStore for FileTokenStore {
    fn access_token(&self) -> Option<String> {
        self.load().map(|t| t.access_token)
    }

    fn refresh_token(&self) -> Option<String> {
        self.load().map(|t| t.refresh_token)
    }

    fn set_tokens(&self, tokens: &TokenPair) {
        if let Err(e) = self.persist(tokens) {
            warn!(error = %e, "Failed to persist tokens");
        }
    }

    fn clear_tokens(&self) {
        if let Err(e) = self.remove() {
            warn!(error = %e, "Failed to remove token file");
        }
    }
}

/// Create a new file readable by the owner only, from the first byte on
#[cfg(unix)]
fn create_private(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}
