//! Database handles, directory lookup, and tree flattening.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use log::{debug, info};
use shotline_math::Transform;

use crate::{DbError, DbFile, DbObject, DbRecord, Result};

/// Combination nesting beyond this depth is treated as a cycle.
const MAX_TREE_DEPTH: usize = 64;

static NEXT_DB_ID: AtomicU64 = AtomicU64::new(1);

/// Databases opened through [`Db::open_shared`], keyed by canonical path.
static OPEN_DBS: OnceLock<Mutex<HashMap<PathBuf, Weak<Db>>>> = OnceLock::new();

fn open_dbs() -> &'static Mutex<HashMap<PathBuf, Weak<Db>>> {
    OPEN_DBS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// A geometry database: named raw records plus a lazily built directory.
#[derive(Debug)]
pub struct Db {
    id: u64,
    title: String,
    path: Option<PathBuf>,
    objects: Vec<DbObject>,
    directory: OnceLock<HashMap<String, usize>>,
}

/// A primitive reached by walking a tree, with its accumulated placement.
#[derive(Debug, Clone)]
pub struct LeafSolid {
    /// Slash-separated path from the walk root, e.g. `/all/left/box.s`.
    pub path: String,
    /// Object name of the leaf.
    pub name: String,
    /// The leaf's raw record.
    pub record: DbRecord,
    /// Product of every matrix from the root down to this leaf.
    pub matrix: Transform,
}

impl Db {
    /// Create an empty in-memory database.
    pub fn new(title: impl Into<String>) -> Self {
        Self::from_file(DbFile {
            title: title.into(),
            objects: Vec::new(),
        })
    }

    /// Wrap parsed file contents.
    pub fn from_file(file: DbFile) -> Self {
        Self {
            id: NEXT_DB_ID.fetch_add(1, Ordering::Relaxed),
            title: file.title,
            path: None,
            objects: file.objects,
            directory: OnceLock::new(),
        }
    }

    /// Parse a database from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self::from_file(serde_json::from_str(json)?))
    }

    /// Serialize the database back to JSON text.
    pub fn to_json(&self) -> Result<String> {
        let file = DbFile {
            title: self.title.clone(),
            objects: self.objects.clone(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// Open and parse a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| DbError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut db = Self::from_json(&json)?;
        db.path = Some(path.to_path_buf());
        info!(
            "opened database {} ({} objects)",
            path.display(),
            db.objects.len()
        );
        Ok(db)
    }

    /// Open a database file, sharing the handle with anyone who already has
    /// the same file open.
    pub fn open_shared(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = path.as_ref();
        let key = path.canonicalize().map_err(|source| DbError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(db) = lookup_open(&key) {
            debug!("reusing open database {}", key.display());
            return Ok(db);
        }

        // Read outside the lock; a racing opener of the same file wins.
        let db = Arc::new(Self::open(&key)?);
        let mut open = open_dbs().lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = open.get(&key).and_then(Weak::upgrade) {
            return Ok(existing);
        }
        open.retain(|_, weak| weak.strong_count() > 0);
        open.insert(key, Arc::downgrade(&db));
        Ok(db)
    }

    /// Process-unique identity of this handle.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Title from the file header.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// File this database was read from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Resolve a file name relative to this database's own directory.
    pub fn resolve(&self, file: &str) -> PathBuf {
        let p = Path::new(file);
        if p.is_absolute() {
            return p.to_path_buf();
        }
        match self.path.as_ref().and_then(|dbp| dbp.parent()) {
            Some(dir) => dir.join(p),
            None => p.to_path_buf(),
        }
    }

    /// Add an object. Fails if the name is taken.
    pub fn insert(&mut self, name: impl Into<String>, record: DbRecord) -> Result<()> {
        let name = name.into();
        if self.objects.iter().any(|o| o.name == name) {
            return Err(DbError::Duplicate(name));
        }
        self.objects.push(DbObject { name, record });
        self.directory = OnceLock::new();
        Ok(())
    }

    /// Build the name directory, once. Later calls are free.
    pub fn scan(&self) -> &HashMap<String, usize> {
        self.directory.get_or_init(|| {
            debug!("scanning database '{}'", self.title);
            self.objects
                .iter()
                .enumerate()
                .map(|(i, o)| (o.name.clone(), i))
                .collect()
        })
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the database has no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Object names in file order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.objects.iter().map(|o| o.name.as_str())
    }

    /// Fetch the raw record for `name`.
    pub fn fetch(&self, name: &str) -> Result<&DbRecord> {
        self.scan()
            .get(name)
            .map(|&i| &self.objects[i].record)
            .ok_or_else(|| DbError::NotFound(name.to_string()))
    }

    /// Flatten the tree under `root` into placed leaf solids.
    ///
    /// Member matrices compose parent-first. Air combinations are skipped
    /// unless `useair` is set.
    pub fn walk(&self, root: &str, useair: bool) -> Result<Vec<LeafSolid>> {
        let mut leaves = Vec::new();
        self.walk_node(root, "", &Transform::identity(), useair, 0, &mut leaves)?;
        Ok(leaves)
    }

    fn walk_node(
        &self,
        name: &str,
        parent_path: &str,
        mat: &Transform,
        useair: bool,
        depth: usize,
        leaves: &mut Vec<LeafSolid>,
    ) -> Result<()> {
        let path = format!("{parent_path}/{name}");
        if depth > MAX_TREE_DEPTH {
            return Err(DbError::TooDeep(path));
        }

        match self.fetch(name)? {
            DbRecord::Comb { members, air } => {
                if *air && !useair {
                    debug!("skipping air combination {path}");
                    return Ok(());
                }
                for member in members {
                    let child_mat = mat.then(&member.transform());
                    self.walk_node(&member.name, &path, &child_mat, useair, depth + 1, leaves)?;
                }
            }
            record => leaves.push(LeafSolid {
                path,
                name: name.to_string(),
                record: record.clone(),
                matrix: *mat,
            }),
        }
        Ok(())
    }
}

fn lookup_open(key: &Path) -> Option<Arc<Db>> {
    let open = open_dbs().lock().unwrap_or_else(|e| e.into_inner());
    open.get(key).and_then(Weak::upgrade)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Member;
    use shotline_math::Point3;

    fn unit_arb() -> DbRecord {
        DbRecord::Arb8 {
            pts: [
                [-1.0, -1.0, -1.0],
                [1.0, -1.0, -1.0],
                [1.0, 1.0, -1.0],
                [-1.0, 1.0, -1.0],
                [-1.0, -1.0, 1.0],
                [1.0, -1.0, 1.0],
                [1.0, 1.0, 1.0],
                [-1.0, 1.0, 1.0],
            ],
        }
    }

    fn sample_db() -> Db {
        let mut db = Db::new("sample");
        db.insert("box.s", unit_arb()).unwrap();
        db.insert(
            "left",
            DbRecord::Comb {
                members: vec![Member::placed("box.s", &Transform::translation(-5.0, 0.0, 0.0))],
                air: false,
            },
        )
        .unwrap();
        db.insert(
            "vent",
            DbRecord::Comb {
                members: vec![Member::new("box.s")],
                air: true,
            },
        )
        .unwrap();
        db.insert(
            "all",
            DbRecord::Comb {
                members: vec![
                    Member::placed("left", &Transform::translation(0.0, 2.0, 0.0)),
                    Member::new("box.s"),
                    Member::new("vent"),
                ],
                air: false,
            },
        )
        .unwrap();
        db
    }

    #[test]
    fn test_fetch_and_not_found() {
        let db = sample_db();
        assert_eq!(db.fetch("box.s").unwrap().type_name(), "arb8");
        assert!(matches!(db.fetch("nope"), Err(DbError::NotFound(_))));
        assert_eq!(db.scan().len(), 4);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut db = sample_db();
        assert!(matches!(
            db.insert("box.s", unit_arb()),
            Err(DbError::Duplicate(_))
        ));
    }

    #[test]
    fn test_walk_composes_matrices() {
        let db = sample_db();
        let leaves = db.walk("all", false).unwrap();
        assert_eq!(leaves.len(), 2);
        assert_eq!(leaves[0].path, "/all/left/box.s");
        let p = leaves[0].matrix.apply_point(&Point3::origin());
        assert!((p - Point3::new(-5.0, 2.0, 0.0)).norm() < 1e-12);
        assert_eq!(leaves[1].path, "/all/box.s");
        assert!(leaves[1].matrix.is_identity());
    }

    #[test]
    fn test_walk_includes_air_when_asked() {
        let db = sample_db();
        let leaves = db.walk("all", true).unwrap();
        assert_eq!(leaves.len(), 3);
        assert_eq!(leaves[2].path, "/all/vent/box.s");
    }

    #[test]
    fn test_walk_detects_cycle() {
        let mut db = Db::new("loop");
        db.insert(
            "a",
            DbRecord::Comb {
                members: vec![Member::new("b")],
                air: false,
            },
        )
        .unwrap();
        db.insert(
            "b",
            DbRecord::Comb {
                members: vec![Member::new("a")],
                air: false,
            },
        )
        .unwrap();
        assert!(matches!(db.walk("a", false), Err(DbError::TooDeep(_))));
    }

    #[test]
    fn test_open_shared_reuses_handle() {
        let db = sample_db();
        let path = std::env::temp_dir().join(format!("shotline-db-{}.json", std::process::id()));
        std::fs::write(&path, db.to_json().unwrap()).unwrap();

        let a = Db::open_shared(&path).unwrap();
        let b = Db::open_shared(&path).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.len(), 4);
        assert_eq!(a.title(), "sample");
        assert_eq!(a.resolve("other.json"), path.parent().unwrap().join("other.json"));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_open_missing_file() {
        assert!(matches!(
            Db::open("/definitely/not/here.json"),
            Err(DbError::Io { .. })
        ));
    }
}
