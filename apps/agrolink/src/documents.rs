//! # Client Documents
//!
//! Uploaded documents live under `<upload_dir>/<client_id>/`. When a
//! project is cancelled the client's folder is purged. The purge runs
//! after the cancellation has been committed; a failed purge is reported
//! to the caller but never rolls the cancellation back.

use agrolink_core::ClientId;
use std::io;
use std::path::PathBuf;

/// Removes a client's stored documents.
pub trait DocumentPurger: Send + Sync {
    /// Delete everything stored for `client`.
    ///
    /// Returns `Ok(false)` when the client had nothing stored.
    fn purge_client(&self, client: ClientId) -> io::Result<bool>;
}

/// Filesystem purger rooted at the upload directory.
#[derive(Debug, Clone)]
pub struct FsDocumentPurger {
    root: PathBuf,
}

impl FsDocumentPurger {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Folder holding `client`'s documents.
    pub fn client_dir(&self, client: ClientId) -> PathBuf {
        self.root.join(client.0.to_string())
    }
}

impl DocumentPurger for FsDocumentPurger {
    fn purge_client(&self, client: ClientId) -> io::Result<bool> {
        let dir = self.client_dir(client);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purges_only_the_client_folder() {
        let root = tempfile::tempdir().expect("tempdir");
        let purger = FsDocumentPurger::new(root.path());
        let mine = purger.client_dir(ClientId(7));
        let other = purger.client_dir(ClientId(8));
        std::fs::create_dir_all(mine.join("car")).expect("mkdir");
        std::fs::write(mine.join("car").join("recibo.pdf"), b"%PDF").expect("write");
        std::fs::create_dir_all(&other).expect("mkdir");

        assert!(purger.purge_client(ClientId(7)).expect("purge"));
        assert!(!mine.exists());
        assert!(other.exists());
    }

    #[test]
    fn missing_folder_is_not_an_error() {
        let root = tempfile::tempdir().expect("tempdir");
        let purger = FsDocumentPurger::new(root.path());
        assert!(!purger.purge_client(ClientId(1)).expect("purge"));
    }
}
