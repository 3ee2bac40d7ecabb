//! Helper functions for testing the engine.

use url::Url;


/// Returns a storage URI for a fresh in-memory location.
pub fn mem_storage_uri() -> Url {
    let seed: u64 = rand::random();
    Url::parse(&format!("memory:{seed}")).unwrap()
}

/// Returns a storage URI for a directory on disk.
pub fn disk_storage_uri(dir: &std::path::Path) -> Url {
    Url::parse(&format!("local://{}", dir.display())).unwrap()
}

/// Runs the test with a fresh temporary directory.
///
/// The directory is removed when the test returns.
pub fn test_under_tmp<F>(op: F)
where
    F: FnOnce(std::path::PathBuf),
{
    let dir = tempfile::tempdir().unwrap();
    op(dir.path().into());
}
