use std::path::{Path, PathBuf};

use crate::id::{ExecutorId, FrameworkId, SlaveId};

/// Resolve the root of all framework work directories. An empty configured
/// value falls back to `$HOME/work`, then `./work`.
pub fn work_directory_root(configured: &str) -> PathBuf {
    if !configured.is_empty() {
        return PathBuf::from(configured);
    }
    match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => Path::new(&home).join("work"),
        _ => PathBuf::from("./work"),
    }
}

/// Pick a unique work directory for an executor:
/// `<root>/slave-<slave_id>/fw-<framework_id>-<executor_id>/<n>` where `n` is
/// the smallest non-negative integer for which the directory does not exist.
/// Multiple executors of the same framework may run on one agent, hence the
/// numeric suffix.
pub fn unique_work_directory(
    root: &Path,
    slave_id: &SlaveId,
    framework_id: &FrameworkId,
    executor_id: &ExecutorId,
) -> PathBuf {
    let base = root
        .join(format!("slave-{slave_id}"))
        .join(format!("fw-{framework_id}-{executor_id}"));
    let mut n = 0u64;
    loop {
        let candidate = base.join(n.to_string());
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_directory_root_prefers_configured_value() {
        assert_eq!(work_directory_root("/var/lib/work"), PathBuf::from("/var/lib/work"));
    }

    #[test]
    fn test_unique_work_directory_skips_existing_runs() {
        let dir = tempfile::tempdir().unwrap();
        let slave_id = SlaveId::from("s1");
        let framework_id = FrameworkId::from("f1");
        let executor_id = ExecutorId::from("e1");

        let first = unique_work_directory(dir.path(), &slave_id, &framework_id, &executor_id);
        assert!(first.ends_with("slave-s1/fw-f1-e1/0"));

        std::fs::create_dir_all(&first).unwrap();
        let second = unique_work_directory(dir.path(), &slave_id, &framework_id, &executor_id);
        assert!(second.ends_with("slave-s1/fw-f1-e1/1"));
    }
}
