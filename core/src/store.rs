use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::models::{Complement, DATABASE_VERSION, Document, EntityKind, Recipe};

const BACKUP_MARKER: &str = "_backup_";
const BACKUP_STAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";

/// A keyed collection inside the document.
pub trait Entity: Clone + Serialize + DeserializeOwned {
    const KIND: EntityKind;

    fn table(doc: &Document) -> &BTreeMap<String, Self>;
    fn table_mut(doc: &mut Document) -> &mut BTreeMap<String, Self>;
    fn id(&self) -> &str;
}

impl Entity for Recipe {
    const KIND: EntityKind = EntityKind::Recipe;

    fn table(doc: &Document) -> &BTreeMap<String, Self> {
        &doc.recipes
    }

    fn table_mut(doc: &mut Document) -> &mut BTreeMap<String, Self> {
        &mut doc.recipes
    }

    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for Complement {
    const KIND: EntityKind = EntityKind::Complement;

    fn table(doc: &Document) -> &BTreeMap<String, Self> {
        &doc.complements
    }

    fn table_mut(doc: &mut Document) -> &mut BTreeMap<String, Self> {
        &mut doc.complements
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// A backup file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub taken_at: DateTime<Utc>,
}

struct Inner {
    doc: Document,
    last_backup: Option<DateTime<Utc>>,
    /// Fingerprint of the file as last read or written by this store.
    on_disk: u64,
}

/// JSON-document store. Every write goes through [`Store::snapshot_then_commit`].
pub struct Store {
    path: PathBuf,
    backup_dir: PathBuf,
    inner: RwLock<Inner>,
}

impl Store {
    pub fn open(path: &Path, backup_dir: &Path) -> Result<Self> {
        let (doc, on_disk) = read_fingerprinted(path)?;
        tracing::debug!(path = %path.display(), recipes = doc.recipes.len(), "opened store");
        Ok(Self::from_parts(path, backup_dir, doc, on_disk))
    }

    /// Open the store, writing `defaults()` as the first version when no file exists yet.
    pub fn open_or_init(
        path: &Path,
        backup_dir: &Path,
        defaults: impl FnOnce() -> Document,
    ) -> Result<Self> {
        match Self::open(path, backup_dir) {
            Err(Error::StoreMissing(_)) => {
                let doc = defaults();
                check_document(&doc)?;
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
                }
                let on_disk = write_atomic(path, &doc)?;
                tracing::info!(path = %path.display(), "initialized new store with defaults");
                Ok(Self::from_parts(path, backup_dir, doc, on_disk))
            }
            other => other,
        }
    }

    fn from_parts(path: &Path, backup_dir: &Path, doc: Document, on_disk: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            backup_dir: backup_dir.to_path_buf(),
            inner: RwLock::new(Inner {
                doc,
                last_backup: None,
                on_disk,
            }),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Consistent copy of the committed document.
    #[must_use]
    pub fn document(&self) -> Document {
        self.read(Clone::clone)
    }

    /// Run `f` against the committed document under the read lock.
    pub fn read<T>(&self, f: impl FnOnce(&Document) -> T) -> T {
        // Commits swap in a fully built document, so a poisoned lock never
        // guards a half-applied mutation.
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard.doc)
    }

    pub fn get<E: Entity>(&self, id: &str) -> Result<E> {
        self.read(|doc| E::table(doc).get(id).cloned())
            .ok_or_else(|| Error::NotFound {
                kind: E::KIND,
                id: id.to_string(),
            })
    }

    pub fn list<E: Entity>(&self, filter: impl Fn(&E) -> bool) -> Vec<E> {
        self.read(|doc| E::table(doc).values().filter(|e| filter(e)).cloned().collect())
    }

    pub fn put<E: Entity>(&self, id: &str, entity: E) -> Result<()> {
        if entity.id() != id {
            return Err(Error::InvalidDocument(vec![format!(
                "{} id '{}' does not match key '{id}'",
                E::KIND,
                entity.id()
            )]));
        }
        self.snapshot_then_commit(|doc| {
            E::table_mut(doc).insert(id.to_string(), entity);
            Ok(())
        })
    }

    /// Apply `mutation` to a draft copy, back up the committed document, persist
    /// the draft, then make it visible. Any error leaves the committed state as it
    /// was, and a rejected mutation leaves no backup behind.
    ///
    /// Fails with [`Error::StoreChanged`] when the file on disk no longer matches
    /// what this store last read or wrote.
    pub fn snapshot_then_commit<T>(
        &self,
        mutation: impl FnOnce(&mut Document) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let mut draft = guard.doc.clone();
        let out = mutation(&mut draft)?;
        check_document(&draft).map_err(|e| match e {
            Error::StorageCorrupt { reason, .. } => Error::InvalidDocument(vec![reason]),
            other => other,
        })?;
        self.ensure_unchanged(guard.on_disk)?;

        let stamp = next_stamp(guard.last_backup, Utc::now());
        let backup = self.write_backup(&guard.doc, stamp)?;
        guard.last_backup = Some(stamp);

        guard.on_disk = write_atomic(&self.path, &draft)?;
        guard.doc = draft;
        tracing::debug!(backup = %backup.display(), "committed store mutation");
        Ok(out)
    }

    fn ensure_unchanged(&self, expected: u64) -> Result<()> {
        // An unreadable file is left for the write itself to report.
        match fs::read(&self.path) {
            Ok(bytes) if fingerprint(&bytes) != expected => {
                tracing::warn!(path = %self.path.display(), "store file changed on disk since load");
                Err(Error::StoreChanged(self.path.clone()))
            }
            _ => Ok(()),
        }
    }

    fn write_backup(&self, doc: &Document, stamp: DateTime<Utc>) -> Result<PathBuf> {
        fs::create_dir_all(&self.backup_dir).map_err(|e| Error::io(&self.backup_dir, e))?;
        let path = self.backup_dir.join(format!(
            "{}{BACKUP_MARKER}{}.json",
            self.stem(),
            stamp.format(BACKUP_STAMP_FORMAT)
        ));
        let bytes = serde_json::to_vec_pretty(doc)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;
        file.write_all(&bytes)
            .and_then(|()| file.sync_all())
            .map_err(|e| Error::io(&path, e))?;
        tracing::info!(path = %path.display(), "wrote backup snapshot");
        Ok(path)
    }

    fn stem(&self) -> String {
        self.path
            .file_stem()
            .map_or_else(|| "store".to_string(), |s| s.to_string_lossy().into_owned())
    }

    /// Backups of this store, oldest first.
    pub fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        let entries = match fs::read_dir(&self.backup_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(&self.backup_dir, e)),
        };

        let prefix = format!("{}{BACKUP_MARKER}", self.stem());
        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&self.backup_dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(stamp) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".json"))
            else {
                continue;
            };
            let Ok(taken_at) = DateTime::parse_from_str(
                &format!("{} +0000", stamp.trim_end_matches('Z')),
                "%Y%m%dT%H%M%S%.6f %z",
            ) else {
                continue;
            };
            backups.push(BackupInfo {
                path: entry.path(),
                taken_at: taken_at.with_timezone(&Utc),
            });
        }
        backups.sort_by_key(|b| b.taken_at);
        Ok(backups)
    }

    pub fn load_backup(path: &Path) -> Result<Document> {
        read_document(path)
    }

    /// Replace the committed document with a backup. The replaced state is itself backed up.
    pub fn restore(&self, backup: &Path) -> Result<()> {
        let restored = read_document(backup)?;
        self.snapshot_then_commit(|doc| {
            *doc = restored;
            Ok(())
        })?;
        tracing::info!(from = %backup.display(), "restored store from backup");
        Ok(())
    }
}

/// Strictly increasing backup timestamps, even when the clock doesn't move.
fn next_stamp(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    // Backup names carry microseconds, so compare at that resolution.
    let now = now
        .with_nanosecond(now.timestamp_subsec_micros() * 1_000)
        .unwrap_or(now);
    match last {
        Some(last) if now <= last => last + Duration::microseconds(1),
        _ => now,
    }
}

fn fingerprint(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

fn read_document(path: &Path) -> Result<Document> {
    read_fingerprinted(path).map(|(doc, _)| doc)
}

fn read_fingerprinted(path: &Path) -> Result<(Document, u64)> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::StoreMissing(path.to_path_buf()));
        }
        Err(e) => return Err(Error::io(path, e)),
    };
    let doc = parse_document(path, &bytes)?;
    Ok((doc, fingerprint(&bytes)))
}

fn parse_document(path: &Path, bytes: &[u8]) -> Result<Document> {
    let raw: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| Error::StorageCorrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    // Version gate before the typed parse, so a future schema reports as such.
    let version = raw
        .get("database_version")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| Error::StorageCorrupt {
            path: path.to_path_buf(),
            reason: "missing database_version".to_string(),
        })?;
    let version = u32::try_from(version).unwrap_or(u32::MAX);
    if version > DATABASE_VERSION {
        return Err(Error::UnsupportedVersion {
            found: version,
            supported: DATABASE_VERSION,
        });
    }

    let doc: Document = serde_json::from_value(raw).map_err(|e| Error::StorageCorrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let problems = doc.problems();
    if !problems.is_empty() {
        return Err(Error::StorageCorrupt {
            path: path.to_path_buf(),
            reason: problems.join("; "),
        });
    }
    Ok(doc)
}

fn check_document(doc: &Document) -> Result<()> {
    let problems = doc.problems();
    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::InvalidDocument(problems))
    }
}

/// Write `doc` through a temp file and rename, returning the written fingerprint.
fn write_atomic(path: &Path, doc: &Document) -> Result<u64> {
    let bytes = serde_json::to_vec_pretty(doc)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let result = fs::File::create(&tmp)
        .and_then(|mut f| f.write_all(&bytes).and_then(|()| f.sync_all()))
        .and_then(|()| fs::rename(&tmp, path));
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(Error::io(path, e));
    }
    Ok(fingerprint(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecipeCategory;
    use crate::models::tests::{anchor, sample_recipe};

    fn open_temp() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_or_init(
            &dir.path().join("mealplan.json"),
            &dir.path().join("backups"),
            || Document::with_defaults(anchor()),
        )
        .unwrap();
        (dir, store)
    }

    #[test]
    fn test_open_missing_store() {
        let dir = tempfile::tempdir().unwrap();
        let err = Store::open(&dir.path().join("nope.json"), dir.path())
            .err()
            .unwrap();
        assert!(matches!(err, Error::StoreMissing(_)));
    }

    #[test]
    fn test_open_or_init_writes_defaults() {
        let (dir, store) = open_temp();
        assert!(dir.path().join("mealplan.json").exists());
        let reopened = Store::open(store.path(), store.backup_dir()).unwrap();
        assert_eq!(reopened.document(), store.document());
        // Initialization is not a mutation of existing data, so no backup yet.
        assert!(store.list_backups().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mealplan.json");
        fs::write(&path, "{ not json").unwrap();
        let err = Store::open(&path, dir.path()).err().unwrap();
        assert!(matches!(err, Error::StorageCorrupt { .. }));
    }

    #[test]
    fn test_invalid_entity_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mealplan.json");
        let mut doc = Document::with_defaults(anchor());
        let mut recipe = sample_recipe("r", RecipeCategory::Protein);
        recipe.ingredients.clear();
        doc.recipes.insert("r".to_string(), recipe);
        fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let err = Store::open(&path, dir.path()).err().unwrap();
        match err {
            Error::StorageCorrupt { reason, .. } => assert!(reason.contains("ingredient")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_future_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mealplan.json");
        let mut value = serde_json::to_value(Document::with_defaults(anchor())).unwrap();
        value["database_version"] = serde_json::json!(DATABASE_VERSION + 1);
        fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();

        let err = Store::open(&path, dir.path()).err().unwrap();
        assert!(matches!(
            err,
            Error::UnsupportedVersion { found, .. } if found == DATABASE_VERSION + 1
        ));
    }

    #[test]
    fn test_put_get_list() {
        let (_dir, store) = open_temp();
        store
            .put("chicken", sample_recipe("chicken", RecipeCategory::Protein))
            .unwrap();
        store
            .put("lentils", sample_recipe("lentils", RecipeCategory::Legume))
            .unwrap();

        let recipe: Recipe = store.get("chicken").unwrap();
        assert_eq!(recipe.category, RecipeCategory::Protein);

        let legumes = store.list::<Recipe>(|r| r.category == RecipeCategory::Legume);
        assert_eq!(legumes.len(), 1);
        assert_eq!(legumes[0].id, "lentils");

        let err = store.get::<Recipe>("missing").err().unwrap();
        assert!(matches!(err, Error::NotFound { kind: EntityKind::Recipe, .. }));
    }

    #[test]
    fn test_put_rejects_mismatched_key() {
        let (_dir, store) = open_temp();
        let err = store
            .put("other", sample_recipe("chicken", RecipeCategory::Protein))
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidDocument(_)));
        assert!(store.list_backups().unwrap().is_empty());
    }

    #[test]
    fn test_rejected_mutation_takes_no_backup() {
        let (_dir, store) = open_temp();
        let result: Result<()> =
            store.snapshot_then_commit(|_| Err(Error::InvalidWeek { week: 5, total: 4 }));
        assert!(matches!(result, Err(Error::InvalidWeek { .. })));
        let result = store.snapshot_then_commit(|doc| {
            doc.rotation.override_week = Some(9);
            Ok(())
        });
        assert!(matches!(result, Err(Error::InvalidDocument(_))));
        assert!(store.list_backups().unwrap().is_empty());
    }

    #[test]
    fn test_external_change_blocks_commit() {
        let (_dir, store) = open_temp();
        store
            .put("chicken", sample_recipe("chicken", RecipeCategory::Protein))
            .unwrap();

        // Another process commits its own version of the file.
        let other = Store::open(store.path(), store.backup_dir()).unwrap();
        other
            .put("beans", sample_recipe("beans", RecipeCategory::Legume))
            .unwrap();
        let backups = store.list_backups().unwrap().len();

        let err = store
            .put("rice", sample_recipe("rice", RecipeCategory::Base))
            .err()
            .unwrap();
        assert!(matches!(err, Error::StoreChanged(_)));
        assert_eq!(store.list_backups().unwrap().len(), backups);

        // The other writer's data survives and a fresh open can write again.
        let reopened = Store::open(store.path(), store.backup_dir()).unwrap();
        assert!(reopened.get::<Recipe>("beans").is_ok());
        reopened
            .put("rice", sample_recipe("rice", RecipeCategory::Base))
            .unwrap();
        assert_eq!(reopened.list::<Recipe>(|_| true).len(), 3);
    }

    #[test]
    fn test_every_commit_takes_a_backup() {
        let (_dir, store) = open_temp();
        let before = store.document();
        store
            .put("chicken", sample_recipe("chicken", RecipeCategory::Protein))
            .unwrap();
        store
            .put("beans", sample_recipe("beans", RecipeCategory::Legume))
            .unwrap();

        let backups = store.list_backups().unwrap();
        assert_eq!(backups.len(), 2);
        assert!(backups[0].taken_at < backups[1].taken_at);
        assert_eq!(Store::load_backup(&backups[0].path).unwrap(), before);
    }

    #[test]
    fn test_failed_mutation_leaves_state_untouched() {
        let (_dir, store) = open_temp();
        let before = store.document();

        let result: Result<()> = store.snapshot_then_commit(|doc| {
            doc.recipes
                .insert("x".to_string(), sample_recipe("x", RecipeCategory::Base));
            Err(Error::InvalidFeedback("nope".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(store.document(), before);

        let on_disk = Store::open(store.path(), store.backup_dir()).unwrap();
        assert_eq!(on_disk.document(), before);
    }

    #[test]
    fn test_invalid_draft_is_not_committed() {
        let (_dir, store) = open_temp();
        let result = store.snapshot_then_commit(|doc| {
            doc.rotation.override_week = Some(9);
            Ok(())
        });
        assert!(matches!(result, Err(Error::InvalidDocument(_))));
        assert_eq!(store.document().rotation.override_week, None);
    }

    #[test]
    fn test_io_failure_mid_commit_keeps_backup_and_state() {
        let (_dir, store) = open_temp();
        store
            .put("chicken", sample_recipe("chicken", RecipeCategory::Protein))
            .unwrap();
        let before = store.document();

        // A directory where the store file should be makes the final rename fail.
        fs::remove_file(store.path()).unwrap();
        fs::create_dir(store.path()).unwrap();

        let err = store
            .put("beans", sample_recipe("beans", RecipeCategory::Legume))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Io { .. }));

        // In-memory state never saw the failed write.
        assert_eq!(store.document(), before);

        let latest = store.list_backups().unwrap().pop().unwrap();
        assert_eq!(Store::load_backup(&latest.path).unwrap(), before);
    }

    #[test]
    fn test_restore_from_backup() {
        let (_dir, store) = open_temp();
        let original = store.document();
        store
            .put("chicken", sample_recipe("chicken", RecipeCategory::Protein))
            .unwrap();

        let first = store.list_backups().unwrap().remove(0);
        store.restore(&first.path).unwrap();
        assert_eq!(store.document(), original);
        // The restore itself was backed up.
        assert_eq!(store.list_backups().unwrap().len(), 2);
    }

    #[test]
    fn test_next_stamp_is_monotonic() {
        let now = Utc::now();
        let first = next_stamp(None, now);
        let second = next_stamp(Some(first), now);
        let third = next_stamp(Some(second), now - Duration::seconds(5));
        assert!(first < second);
        assert!(second < third);
    }
}
