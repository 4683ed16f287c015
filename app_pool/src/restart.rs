//! Restart detection (SPEC_FULL.md §4.5).
//!
//! `restart.txt`'s *identity* (here: modification time) is what's compared, not its
//! contents — the file is typically empty; only its presence and freshness matter.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::options::PoolOptions;

/// The last-observed identity of a group's `restart.txt`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RestartWitness(SystemTime);

fn resolve_restart_dir(app_root: &str, options: &PoolOptions) -> PathBuf {
    match &options.restart_dir {
        None => Path::new(app_root).join("tmp"),
        Some(dir) if dir.is_absolute() => dir.clone(),
        Some(dir) => Path::new(app_root).join(dir),
    }
}

fn file_identity(path: &Path) -> Option<RestartWitness> {
    std::fs::metadata(path)
        .ok()
        .and_then(|meta| meta.modified().ok())
        .map(RestartWitness)
}

/// Evaluates whether the group named by `options.app_group_name` must be torn down
/// and respawned, given the witness last recorded for it (`None` if the group is new
/// or has never been checked).
///
/// Returns `(needs_restart, current_identity)`. `current_identity` is the identity of
/// `restart.txt` *right now* (`None` if it doesn't exist) and must be stored as the
/// group's new `restart_witness` regardless of the boolean outcome: on a negative
/// check the spec calls for refreshing it; on a positive check the caller tears down
/// the old group and spawns a fresh one, whose `restart_witness` must start from this
/// same value or the very next check would see "never observed" and restart forever.
pub(crate) fn needs_restart(
    app_root: &str,
    options: &PoolOptions,
    last_witnessed: Option<RestartWitness>,
) -> (bool, Option<RestartWitness>) {
    let restart_dir = resolve_restart_dir(app_root, options);
    let current = file_identity(&restart_dir.join("restart.txt"));

    if restart_dir.join("always_restart.txt").exists() {
        return (true, current);
    }

    let needs_restart = match (current, last_witnessed) {
        (Some(_), None) => true,
        (Some(current), Some(last)) => current != last,
        (None, _) => false,
    };

    (needs_restart, current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread::sleep;
    use std::time::Duration;

    fn opts() -> PoolOptions {
        PoolOptions::new("test")
    }

    #[test]
    fn no_restart_txt_means_no_restart() {
        let dir = tempfile::tempdir().unwrap();
        let (needs, witness) = needs_restart(dir.path().to_str().unwrap(), &opts(), None);
        assert!(!needs);
        assert!(witness.is_none());
    }

    #[test]
    fn first_sighting_of_restart_txt_triggers_restart() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("tmp")).unwrap();
        fs::write(dir.path().join("tmp/restart.txt"), "").unwrap();

        let (needs, witness) = needs_restart(dir.path().to_str().unwrap(), &opts(), None);
        assert!(needs);
        assert!(witness.is_some());

        // Once the fresh group records that witness, the same file no longer triggers.
        let (needs_again, _) = needs_restart(dir.path().to_str().unwrap(), &opts(), witness);
        assert!(!needs_again);
    }

    #[test]
    fn touching_restart_txt_triggers_restart_again() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("tmp")).unwrap();
        fs::write(dir.path().join("tmp/restart.txt"), "").unwrap();
        let (_, witness) = needs_restart(dir.path().to_str().unwrap(), &opts(), None);

        sleep(Duration::from_millis(10));
        fs::write(dir.path().join("tmp/restart.txt"), "touched").unwrap();

        let (needs, new_witness) = needs_restart(dir.path().to_str().unwrap(), &opts(), witness);
        assert!(needs);
        assert_ne!(witness, new_witness);
    }

    #[test]
    fn always_restart_txt_forces_restart_unconditionally() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("tmp")).unwrap();
        fs::write(dir.path().join("tmp/always_restart.txt"), "").unwrap();

        let (_, witness) = needs_restart(dir.path().to_str().unwrap(), &opts(), None);
        let (needs, _) = needs_restart(dir.path().to_str().unwrap(), &opts(), witness);
        assert!(needs);
    }
}
