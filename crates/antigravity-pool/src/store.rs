//! Durable persistence of account pool state
//!
//! Grounded on the credential store's atomic-write discipline: every save
//! writes to a temp file in the same directory, chmods it, then renames it
//! over the target so a crash mid-write can never leave a torn file behind.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{AccountStorage, STORAGE_VERSION};

/// Load persisted pool state from `path`.
///
/// Returns `Ok(None)` — not an error — for a missing file, malformed JSON,
/// or a `version` other than [`STORAGE_VERSION`]; all three are
/// indistinguishable "treat as absent" conditions to the caller. An
/// out-of-range `activeIndex` is clamped rather than rejected.
pub async fn load(path: &Path) -> Result<Option<AccountStorage>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no account storage file, starting cold");
            return Ok(None);
        }
        Err(e) => return Err(Error::Io(format!("reading account storage: {e}"))),
    };

    let mut storage: AccountStorage = match serde_json::from_str(&contents) {
        Ok(storage) => storage,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "account storage is malformed, treating as absent");
            return Ok(None);
        }
    };

    if storage.version != STORAGE_VERSION {
        warn!(
            path = %path.display(),
            found = storage.version,
            expected = STORAGE_VERSION,
            "account storage version mismatch, treating as absent"
        );
        return Ok(None);
    }

    if !storage.accounts.is_empty() && storage.active_index >= storage.accounts.len() {
        storage.active_index = 0;
    }

    info!(path = %path.display(), accounts = storage.accounts.len(), "loaded account storage");
    Ok(Some(storage))
}

/// Persist `storage` to `path` atomically.
///
/// Creates the parent directory with mode `0700` if needed, writes pretty
/// JSON with a trailing newline to a sibling temp file at mode `0600`, then
/// renames it over the target.
pub async fn save(path: &Path, storage: &AccountStorage) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("storage path has no parent directory".into()))?;

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::Io(format!("creating state directory: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        tokio::fs::set_permissions(dir, perms)
            .await
            .map_err(|e| Error::Io(format!("setting state directory permissions: {e}")))?;
    }

    let mut json = serde_json::to_string_pretty(storage)
        .map_err(|e| Error::Io(format!("serializing account storage: {e}")))?;
    json.push('\n');

    let tmp_path: PathBuf = dir.join(format!(".accounts.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp account storage: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting account storage permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp account storage: {e}")))?;

    debug!(path = %path.display(), "persisted account storage");
    Ok(())
}
