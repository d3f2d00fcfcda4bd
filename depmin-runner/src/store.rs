// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistent storage for minimization records.
//!
//! The store is a directory with this layout:
//!
//! ```text
//! <dir>/
//!   <test>-<OUTCOME>-dependencies.json   one record per (dependent test, expected outcome)
//!   locks/<test>-<OUTCOME>-dependencies.lock
//!   flaky/<test>.json                    markers for tests observed to be flaky
//! ```
//!
//! Test names that aren't safe file names are sanitized, with a hash of the name appended. A
//! stored file is only returned for the exact key it was written for.
//!
//! Records are written atomically. A per-key lock file is held while a record is loaded,
//! computed and saved, so concurrent processes minimizing the same test don't duplicate work.

use crate::{
    errors::{FlakyTestError, ResultStoreError},
    helpers::test_file_component,
    minimize::MinimizationResult,
};
use camino::{Utf8Path, Utf8PathBuf};
use debug_ignore::DebugIgnore;
use depmin_metadata::{
    FlakySummary, MINIMIZATION_FORMAT_VERSION, MinimizationSummary, Outcome, TestName,
};
use serde::{Serialize, de::DeserializeOwned};
use std::{
    fmt,
    fs::{File, TryLockError},
    io::{self, Write},
};
use tracing::{debug, info};

static LOCKS_DIR: &str = "locks";
static FLAKY_DIR: &str = "flaky";

/// Identifies a record in the store.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ResultKey {
    dependent_test: TestName,
    expected_outcome: Outcome,
}

impl ResultKey {
    /// Creates a new key.
    pub fn new(dependent_test: TestName, expected_outcome: Outcome) -> Self {
        Self {
            dependent_test,
            expected_outcome,
        }
    }

    /// Returns the key for a minimization result.
    pub fn for_result(result: &MinimizationResult) -> Self {
        Self::new(result.dependent_test().clone(), result.expected_outcome())
    }

    /// Returns the dependent test.
    pub fn dependent_test(&self) -> &TestName {
        &self.dependent_test
    }

    /// Returns the expected outcome.
    pub fn expected_outcome(&self) -> Outcome {
        self.expected_outcome
    }

    /// Returns the file name stem used for this key's record and lock.
    pub fn file_stem(&self) -> String {
        format!(
            "{}-{}-dependencies",
            test_file_component(self.dependent_test.as_str()),
            self.expected_outcome,
        )
    }

    fn matches(&self, summary: &MinimizationSummary) -> bool {
        self.dependent_test == summary.dependent_test
            && self.expected_outcome == summary.expected_outcome
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` ({})", self.dependent_test, self.expected_outcome)
    }
}

/// Whether [`result_for`] loaded a stored value or computed a new one.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CacheStatus {
    /// The value was loaded.
    Loaded,

    /// The value was computed and saved.
    Computed,
}

/// Returns the value for `key`: loaded if present, otherwise computed and then saved.
///
/// If `compute` fails, nothing is saved.
pub fn result_for<K, T, E>(
    key: &K,
    load: impl FnOnce(&K) -> Result<Option<T>, E>,
    compute: impl FnOnce(&K) -> Result<T, E>,
    save: impl FnOnce(&K, &T) -> Result<(), E>,
) -> Result<(T, CacheStatus), E> {
    if let Some(value) = load(key)? {
        return Ok((value, CacheStatus::Loaded));
    }
    let value = compute(key)?;
    save(key, &value)?;
    Ok((value, CacheStatus::Computed))
}

/// A directory of minimization records.
#[derive(Clone, Debug)]
pub struct ResultStore {
    dir: Utf8PathBuf,
}

impl ResultStore {
    /// Opens the store at `dir`, creating it if necessary.
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Result<Self, ResultStoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|error| ResultStoreError::DirCreate {
            dir: dir.clone(),
            error,
        })?;
        Ok(Self { dir })
    }

    /// Returns the store directory.
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Returns the path of the record for `key`.
    pub fn record_path(&self, key: &ResultKey) -> Utf8PathBuf {
        self.dir.join(format!("{}.json", key.file_stem()))
    }

    /// Returns the path of the flaky marker for `test`.
    pub fn flaky_marker_path(&self, test: &TestName) -> Utf8PathBuf {
        self.dir
            .join(FLAKY_DIR)
            .join(format!("{}.json", test_file_component(test.as_str())))
    }

    /// Loads the record for `key`, or returns `None` if there isn't one.
    pub fn load(&self, key: &ResultKey) -> Result<Option<MinimizationSummary>, ResultStoreError> {
        let path = self.record_path(key);
        let Some(summary) = read_json::<MinimizationSummary>(&path)? else {
            return Ok(None);
        };
        check_format_version(&path, &summary)?;
        if !key.matches(&summary) {
            let found = ResultKey::new(summary.dependent_test, summary.expected_outcome);
            return Err(ResultStoreError::KeyMismatch {
                path,
                expected: key.to_string(),
                found: found.to_string(),
            });
        }
        debug!(%path, "loaded stored record");
        Ok(Some(summary))
    }

    /// Loads a record from an arbitrary path.
    pub fn load_path(path: &Utf8Path) -> Result<MinimizationSummary, ResultStoreError> {
        let contents = std::fs::read_to_string(path).map_err(|error| ResultStoreError::Read {
            path: path.to_owned(),
            error,
        })?;
        let summary: MinimizationSummary =
            serde_json::from_str(&contents).map_err(|error| ResultStoreError::Deserialize {
                path: path.to_owned(),
                error,
            })?;
        check_format_version(path, &summary)?;
        Ok(summary)
    }

    /// Writes `summary`, replacing any existing record for the same key. Returns the path
    /// written to.
    pub fn save(&self, summary: &MinimizationSummary) -> Result<Utf8PathBuf, ResultStoreError> {
        let key = ResultKey::new(summary.dependent_test.clone(), summary.expected_outcome);
        let path = self.record_path(&key);
        write_json(&path, summary)?;
        info!(%path, "wrote minimization record");
        Ok(path)
    }

    /// Returns the flaky marker for `test`, if one was recorded.
    pub fn flaky_marker(&self, test: &TestName) -> Result<Option<FlakySummary>, ResultStoreError> {
        let path = self.flaky_marker_path(test);
        let Some(marker) = read_json::<FlakySummary>(&path)? else {
            return Ok(None);
        };
        if marker.test != *test {
            return Err(ResultStoreError::KeyMismatch {
                path,
                expected: format!("`{test}`"),
                found: format!("`{}`", marker.test),
            });
        }
        Ok(Some(marker))
    }

    /// Records that a test was observed to be flaky. Returns the path of the marker.
    pub fn record_flaky(&self, error: &FlakyTestError) -> Result<Utf8PathBuf, ResultStoreError> {
        let dir = self.dir.join(FLAKY_DIR);
        std::fs::create_dir_all(&dir)
            .map_err(|error| ResultStoreError::DirCreate { dir, error })?;

        let marker = FlakySummary {
            test: error.test().clone(),
            previous_outcome: error.previous_outcome(),
            new_outcome: error.new_outcome(),
            prefix: error.prefix().to_vec(),
        };
        let path = self.flaky_marker_path(error.test());
        write_json(&path, &marker)?;
        info!(%path, test = %error.test(), "recorded flaky test");
        Ok(path)
    }

    /// Acquires the exclusive lock for `key`, blocking until it is available.
    pub fn lock_key(&self, key: &ResultKey) -> Result<KeyLock, ResultStoreError> {
        let dir = self.dir.join(LOCKS_DIR);
        std::fs::create_dir_all(&dir)
            .map_err(|error| ResultStoreError::DirCreate { dir: dir.clone(), error })?;

        let path = dir.join(format!("{}.lock", key.file_stem()));
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|error| ResultStoreError::FileLock {
                path: path.clone(),
                error,
            })?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                info!(%path, "waiting for another process minimizing the same test");
                file.lock().map_err(|error| ResultStoreError::FileLock {
                    path: path.clone(),
                    error,
                })?;
            }
            Err(TryLockError::Error(error)) => {
                return Err(ResultStoreError::FileLock { path, error });
            }
        }

        debug!(%path, "acquired lock");
        Ok(KeyLock {
            path,
            locked_file: DebugIgnore(file),
        })
    }
}

/// An exclusive lock on one key of a [`ResultStore`]. Released on drop.
#[derive(Debug)]
pub struct KeyLock {
    path: Utf8PathBuf,
    #[expect(dead_code, reason = "held for lock duration")]
    locked_file: DebugIgnore<File>,
}

impl KeyLock {
    /// Returns the path of the lock file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

fn check_format_version(
    path: &Utf8Path,
    summary: &MinimizationSummary,
) -> Result<(), ResultStoreError> {
    if summary.format_version > MINIMIZATION_FORMAT_VERSION {
        return Err(ResultStoreError::FormatVersionTooNew {
            path: path.to_owned(),
            file_version: summary.format_version,
            max_supported_version: MINIMIZATION_FORMAT_VERSION,
        });
    }
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<Option<T>, ResultStoreError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(ResultStoreError::Read {
                path: path.to_owned(),
                error,
            });
        }
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|error| ResultStoreError::Deserialize {
            path: path.to_owned(),
            error,
        })
}

fn write_json<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), ResultStoreError> {
    let mut contents =
        serde_json::to_vec_pretty(value).map_err(|error| ResultStoreError::Serialize {
            path: path.to_owned(),
            error,
        })?;
    contents.push(b'\n');

    atomicwrites::AtomicFile::new(path, atomicwrites::AllowOverwrite)
        .write(|file| file.write_all(&contents))
        .map_err(|error| ResultStoreError::Write {
            path: path.to_owned(),
            error: match error {
                atomicwrites::Error::Internal(error) | atomicwrites::Error::User(error) => error,
            },
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::ExecutionOrder;
    use camino_tempfile::Utf8TempDir;
    use depmin_metadata::VerificationSummary;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;

    fn store() -> (Utf8TempDir, ResultStore) {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let store = ResultStore::new(dir.path().join("out")).expect("store created");
        (dir, store)
    }

    fn summary(test: &str, deps: &[&str]) -> MinimizationSummary {
        MinimizationResult::new(
            test.into(),
            Outcome::Fail,
            deps.iter().copied().map(TestName::new).collect(),
        )
        .to_summary(VerificationSummary::Verified { rounds: 10 })
    }

    #[test]
    fn record_file_name() {
        let key = ResultKey::new("pkg.FooTest.testBar".into(), Outcome::Fail);
        assert_eq!(key.file_stem(), "pkg.FooTest.testBar-FAIL-dependencies");

        let key = ResultKey::new("mod::tests::it_works".into(), Outcome::Error);
        let stem = key.file_stem();
        assert!(stem.starts_with("mod__tests__it_works-"), "{stem}");
        assert!(stem.ends_with("-ERROR-dependencies"), "{stem}");
    }

    #[test]
    fn sanitized_names_get_separate_records() {
        let (_dir, store) = store();
        let rust_style = ResultKey::new("a::b".into(), Outcome::Fail);
        let lookalike = ResultKey::new("a__b".into(), Outcome::Fail);
        assert_ne!(store.record_path(&rust_style), store.record_path(&lookalike));

        store.save(&summary("a::b", &["x"])).expect("save succeeds");
        assert_eq!(store.load(&lookalike).expect("load succeeds"), None);
        assert_eq!(
            store
                .load(&rust_style)
                .expect("load succeeds")
                .map(|summary| summary.deps),
            Some(vec![TestName::new("x")])
        );

        // Flaky markers are separate too.
        let error = FlakyTestError::new(
            "a::b".into(),
            Outcome::Pass,
            Outcome::Fail,
            ExecutionOrder::new(["a::b"]),
        );
        store.record_flaky(&error).expect("marker written");
        assert_eq!(store.flaky_marker(&"a__b".into()).expect("read succeeds"), None);
        assert!(
            store
                .flaky_marker(&"a::b".into())
                .expect("read succeeds")
                .is_some()
        );
    }

    #[test]
    fn record_for_another_key_is_rejected() {
        let (_dir, store) = store();
        let key = ResultKey::new("a__b".into(), Outcome::Fail);
        // A record for a different test sitting at this key's path.
        let other = summary("a::b", &["x"]);
        std::fs::write(
            store.record_path(&key),
            serde_json::to_string(&other).expect("serialized"),
        )
        .expect("wrote file");

        let error = store.load(&key).expect_err("record is for another test");
        assert!(
            matches!(
                &error,
                ResultStoreError::KeyMismatch { found, .. } if found == "`a::b` (FAIL)"
            ),
            "unexpected error: {error:?}"
        );

        let marker = FlakySummary {
            test: "a::b".into(),
            previous_outcome: Outcome::Pass,
            new_outcome: Outcome::Fail,
            prefix: vec!["a::b".into()],
        };
        let path = store.flaky_marker_path(&"a__b".into());
        std::fs::create_dir_all(path.parent().expect("marker has a parent")).expect("created dir");
        std::fs::write(&path, serde_json::to_string(&marker).expect("serialized"))
            .expect("wrote file");
        assert!(matches!(
            store.flaky_marker(&"a__b".into()),
            Err(ResultStoreError::KeyMismatch { .. })
        ));
    }

    #[test]
    fn save_and_load() {
        let (_dir, store) = store();
        let key = ResultKey::new("t".into(), Outcome::Fail);
        assert_eq!(store.load(&key).expect("load succeeds"), None);

        let summary = summary("t", &["a", "c"]);
        let path = store.save(&summary).expect("save succeeds");
        assert_eq!(path, store.dir().join("t-FAIL-dependencies.json"));
        assert_eq!(store.load(&key).expect("load succeeds"), Some(summary.clone()));
        assert_eq!(ResultStore::load_path(&path).expect("load succeeds"), summary);

        // Keys with a different expected outcome are separate records.
        let other = ResultKey::new("t".into(), Outcome::Error);
        assert_eq!(store.load(&other).expect("load succeeds"), None);
    }

    #[test]
    fn newer_format_version_is_rejected() {
        let (_dir, store) = store();
        let mut summary = summary("t", &["a"]);
        summary.format_version = MINIMIZATION_FORMAT_VERSION + 1;
        store.save(&summary).expect("save succeeds");

        let error = store
            .load(&ResultKey::new("t".into(), Outcome::Fail))
            .expect_err("version is too new");
        assert!(
            matches!(
                error,
                ResultStoreError::FormatVersionTooNew { file_version, .. }
                    if file_version == MINIMIZATION_FORMAT_VERSION + 1
            ),
            "unexpected error: {error:?}"
        );
    }

    #[test]
    fn corrupt_record() {
        let (_dir, store) = store();
        let key = ResultKey::new("t".into(), Outcome::Fail);
        std::fs::write(store.record_path(&key), "{not json").expect("wrote file");
        assert!(matches!(
            store.load(&key),
            Err(ResultStoreError::Deserialize { .. })
        ));
    }

    #[test]
    fn flaky_markers() {
        let (_dir, store) = store();
        let test = TestName::new("t");
        assert_eq!(store.flaky_marker(&test).expect("read succeeds"), None);

        let error = FlakyTestError::new(
            test.clone(),
            Outcome::Pass,
            Outcome::Fail,
            ExecutionOrder::new(["a", "t"]),
        );
        store.record_flaky(&error).expect("marker written");

        let marker = store
            .flaky_marker(&test)
            .expect("read succeeds")
            .expect("marker exists");
        assert_eq!(
            marker,
            FlakySummary {
                test,
                previous_outcome: Outcome::Pass,
                new_outcome: Outcome::Fail,
                prefix: vec!["a".into(), "t".into()],
            }
        );
    }

    #[test]
    fn key_lock_is_reacquirable_after_drop() {
        let (_dir, store) = store();
        let key = ResultKey::new("t".into(), Outcome::Fail);
        let lock = store.lock_key(&key).expect("lock acquired");
        assert_eq!(
            lock.path(),
            store.dir().join("locks/t-FAIL-dependencies.lock")
        );

        // A second handle to the same file can't be locked while the first is held.
        let other = File::options()
            .write(true)
            .open(lock.path())
            .expect("opened lock file");
        assert!(matches!(other.try_lock(), Err(TryLockError::WouldBlock)));

        drop(lock);
        store.lock_key(&key).expect("lock reacquired");
    }

    #[test]
    fn result_for_loads_before_computing() {
        let computed = Cell::new(0);
        let saved = Cell::new(0);
        let compute = |_: &&str| {
            computed.set(computed.get() + 1);
            Ok::<_, ()>(42)
        };
        let save = |_: &&str, _: &i32| {
            saved.set(saved.get() + 1);
            Ok(())
        };

        let (value, status) =
            result_for(&"key", |_| Ok(None), compute, save).expect("computed");
        assert_eq!((value, status), (42, CacheStatus::Computed));
        assert_eq!((computed.get(), saved.get()), (1, 1));

        let (value, status) =
            result_for(&"key", |_| Ok(Some(7)), compute, save).expect("loaded");
        assert_eq!((value, status), (7, CacheStatus::Loaded));
        assert_eq!((computed.get(), saved.get()), (1, 1), "nothing computed or saved");
    }

    #[test]
    fn result_for_does_not_save_failures() {
        let saved = Cell::new(false);
        let result = result_for(
            &"key",
            |_| Ok(None),
            |_| Err("search failed"),
            |_, _: &i32| {
                saved.set(true);
                Ok(())
            },
        );
        assert_eq!(result, Err("search failed"));
        assert!(!saved.get());
    }
}
