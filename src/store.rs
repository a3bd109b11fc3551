//! Document store for expense collections.
//!
//! `DocumentStore` is the seam the HTTP layer talks to. `JsonFileStore`
//! keeps every document in one pretty-printed JSON file under the data
//! directory, the same way users are kept in `users.json`.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::error::{AppError, AppResult};
use crate::expense::{CollectionKind, CollectionPatch, ExpenseCollection, NewCollection};

/// CRUD over expense collection documents, scoped to an owner
///
/// A document owned by someone else reads as not found.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store a new collection in a single write and return it with its id
    async fn create(&self, owner: &str, new: NewCollection) -> AppResult<ExpenseCollection>;

    /// All of `owner`'s collections in creation order, optionally one kind only
    async fn list(
        &self,
        owner: &str,
        kind: Option<CollectionKind>,
    ) -> AppResult<Vec<ExpenseCollection>>;

    async fn get(&self, owner: &str, id: &str) -> AppResult<ExpenseCollection>;

    /// Validate and apply a patch; last writer wins
    async fn update(
        &self,
        owner: &str,
        id: &str,
        patch: CollectionPatch,
    ) -> AppResult<ExpenseCollection>;

    async fn delete(&self, owner: &str, id: &str) -> AppResult<()>;

    /// Insert or replace whole documents by id (snapshot restores)
    ///
    /// Returns how many distinct ids were written.
    async fn put_all(&self, documents: Vec<ExpenseCollection>) -> AppResult<usize>;

    /// Store imported documents for `owner` and return the ids they ended up under
    ///
    /// An id already used by another owner, or earlier in the same batch, is
    /// replaced with a fresh one. An id `owner` already has is overwritten.
    async fn import(
        &self,
        owner: &str,
        documents: Vec<ExpenseCollection>,
    ) -> AppResult<Vec<String>>;

    /// Every document of every owner, for snapshots
    async fn dump(&self) -> AppResult<Vec<ExpenseCollection>>;
}

/// JSON-file backed [`DocumentStore`]
///
/// Each write is a read-modify-write of the whole file under a mutex,
/// finished by writing a temporary file and renaming it over the original.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open the store at `path`, creating the directory and an empty file if needed
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        if !path.exists() {
            fs::write(&path, b"[]")?;
            log::info!("created document store at {}", path.display());
        }

        Ok(JsonFileStore {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> AppResult<Vec<ExpenseCollection>> {
        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&contents)
            .map_err(|e| AppError::Storage(format!("{} is unreadable: {e}", self.path.display())))
    }

    fn write_all(&self, documents: &[ExpenseCollection]) -> AppResult<()> {
        let json = serde_json::to_string_pretty(documents)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn not_found(id: &str) -> AppError {
    AppError::not_found(format!("Collection {id} was not found"))
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn create(&self, owner: &str, new: NewCollection) -> AppResult<ExpenseCollection> {
        let _guard = self.lock.lock().await;
        let mut documents = self.read_all()?;

        let document = ExpenseCollection::from_new(owner, new, Utc::now());
        documents.push(document.clone());
        self.write_all(&documents)?;

        log::info!(
            "created {} collection {} for {}",
            document.kind,
            document.id,
            owner
        );
        Ok(document)
    }

    async fn list(
        &self,
        owner: &str,
        kind: Option<CollectionKind>,
    ) -> AppResult<Vec<ExpenseCollection>> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|doc| doc.owner == owner)
            .filter(|doc| kind.is_none_or(|k| doc.kind == k))
            .collect())
    }

    async fn get(&self, owner: &str, id: &str) -> AppResult<ExpenseCollection> {
        let _guard = self.lock.lock().await;
        self.read_all()?
            .into_iter()
            .find(|doc| doc.id == id && doc.owner == owner)
            .ok_or_else(|| not_found(id))
    }

    async fn update(
        &self,
        owner: &str,
        id: &str,
        patch: CollectionPatch,
    ) -> AppResult<ExpenseCollection> {
        let _guard = self.lock.lock().await;
        let mut documents = self.read_all()?;

        let document = documents
            .iter_mut()
            .find(|doc| doc.id == id && doc.owner == owner)
            .ok_or_else(|| not_found(id))?;
        patch.apply(document, Utc::now())?;
        let updated = document.clone();

        self.write_all(&documents)?;
        log::info!("updated collection {id}");
        Ok(updated)
    }

    async fn delete(&self, owner: &str, id: &str) -> AppResult<()> {
        let _guard = self.lock.lock().await;
        let mut documents = self.read_all()?;

        let before = documents.len();
        documents.retain(|doc| !(doc.id == id && doc.owner == owner));
        if documents.len() == before {
            return Err(not_found(id));
        }

        self.write_all(&documents)?;
        log::info!("deleted collection {id}");
        Ok(())
    }

    async fn put_all(&self, incoming: Vec<ExpenseCollection>) -> AppResult<usize> {
        let _guard = self.lock.lock().await;
        let mut documents = self.read_all()?;

        let mut written = HashSet::new();
        for document in incoming {
            written.insert(document.id.clone());
            match documents.iter_mut().find(|doc| doc.id == document.id) {
                Some(existing) => *existing = document,
                None => documents.push(document),
            }
        }

        self.write_all(&documents)?;
        log::info!("stored {} collection(s) in bulk", written.len());
        Ok(written.len())
    }

    async fn import(
        &self,
        owner: &str,
        incoming: Vec<ExpenseCollection>,
    ) -> AppResult<Vec<String>> {
        let _guard = self.lock.lock().await;
        let mut documents = self.read_all()?;

        let mut ids = Vec::with_capacity(incoming.len());
        let mut batch = HashSet::new();
        for mut document in incoming {
            document.owner = owner.to_string();
            let foreign = documents
                .iter()
                .any(|doc| doc.id == document.id && doc.owner != owner);
            if foreign || batch.contains(&document.id) {
                let fresh = uuid::Uuid::new_v4().to_string();
                log::info!("imported id {} is taken, storing as {fresh}", document.id);
                document.id = fresh;
            }
            batch.insert(document.id.clone());
            ids.push(document.id.clone());

            match documents.iter_mut().find(|doc| doc.id == document.id) {
                Some(existing) => *existing = document,
                None => documents.push(document),
            }
        }

        self.write_all(&documents)?;
        log::info!("imported {} collection(s) for {owner}", ids.len());
        Ok(ids)
    }

    async fn dump(&self) -> AppResult<Vec<ExpenseCollection>> {
        let _guard = self.lock.lock().await;
        self.read_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expense::LineItem;
    use tempfile::TempDir;

    fn setup() -> (TempDir, JsonFileStore) {
        let dir = TempDir::new().expect("temp dir");
        let store = JsonFileStore::open(dir.path().join("db").join("expenses.json"))
            .expect("open store");
        (dir, store)
    }

    fn dinner() -> NewCollection {
        NewCollection {
            kind: CollectionKind::Group,
            name: "Dinner".into(),
            description: "Friday".into(),
            members: vec!["Ana".into(), "Luis".into()],
            items: vec![
                LineItem::new("Bread", "2", "3.00").assigned_to("Ana"),
                LineItem::new("Fish", "1", "10.00").assigned_to("Luis"),
            ],
        }
    }

    fn groceries() -> NewCollection {
        NewCollection {
            kind: CollectionKind::Individual,
            name: "Groceries".into(),
            description: "Week 1".into(),
            members: Vec::new(),
            items: vec![LineItem::new("Milk", "1", "1.20")],
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (_dir, store) = setup();
        let created = store.create("u1", dinner()).await.unwrap();
        assert!(!created.id.is_empty());
        assert_eq!(created.schema_version, crate::expense::SCHEMA_VERSION);

        let fetched = store.get("u1", &created.id).await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_get_is_repeatable() {
        let (_dir, store) = setup();
        let created = store.create("u1", dinner()).await.unwrap();
        let first = crate::totals::summarize(&store.get("u1", &created.id).await.unwrap());
        let second = crate::totals::summarize(&store.get("u1", &created.id).await.unwrap());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_list_filters_by_owner_and_kind() {
        let (_dir, store) = setup();
        store.create("u1", dinner()).await.unwrap();
        store.create("u1", groceries()).await.unwrap();
        store.create("u2", dinner()).await.unwrap();

        assert_eq!(store.list("u1", None).await.unwrap().len(), 2);
        let groups = store.list("u1", Some(CollectionKind::Group)).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "Dinner");
        assert_eq!(store.list("u3", None).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_other_owner_reads_not_found() {
        let (_dir, store) = setup();
        let created = store.create("u1", dinner()).await.unwrap();
        let err = store.get("u2", &created.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(store.delete("u2", &created.id).await.is_err());
    }

    #[tokio::test]
    async fn test_update_persists() {
        let (_dir, store) = setup();
        let created = store.create("u1", dinner()).await.unwrap();
        let patch = CollectionPatch {
            description: Some("Saturday".into()),
            ..Default::default()
        };
        store.update("u1", &created.id, patch).await.unwrap();

        let reopened = JsonFileStore::open(store.path()).unwrap();
        let fetched = reopened.get("u1", &created.id).await.unwrap();
        assert_eq!(fetched.description, "Saturday");
    }

    #[tokio::test]
    async fn test_invalid_update_is_not_written() {
        let (_dir, store) = setup();
        let created = store.create("u1", dinner()).await.unwrap();
        let patch = CollectionPatch {
            members: Some(vec!["".into()]),
            ..Default::default()
        };
        assert!(store.update("u1", &created.id, patch).await.is_err());
        let fetched = store.get("u1", &created.id).await.unwrap();
        assert_eq!(fetched.members, vec!["Ana", "Luis"]);
    }

    #[tokio::test]
    async fn test_delete() {
        let (_dir, store) = setup();
        let created = store.create("u1", dinner()).await.unwrap();
        store.delete("u1", &created.id).await.unwrap();
        assert!(store.get("u1", &created.id).await.is_err());
        assert!(store.delete("u1", &created.id).await.is_err());
    }

    #[tokio::test]
    async fn test_put_all_replaces_by_id() {
        let (_dir, store) = setup();
        let mut created = store.create("u1", dinner()).await.unwrap();
        created.name = "Renamed".into();
        let fresh = ExpenseCollection::from_new("u1", groceries(), Utc::now());

        let count = store.put_all(vec![created.clone(), fresh]).await.unwrap();
        assert_eq!(count, 2);

        let all = store.dump().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "Renamed");
    }

    #[tokio::test]
    async fn test_put_all_counts_distinct_ids() {
        let (_dir, store) = setup();
        let mut first = ExpenseCollection::from_new("u1", dinner(), Utc::now());
        first.id = "abc".into();
        let mut second = first.clone();
        second.name = "Later".into();

        assert_eq!(store.put_all(vec![first, second]).await.unwrap(), 1);
        let all = store.dump().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Later");
    }

    #[tokio::test]
    async fn test_import_never_replaces_another_owners_document() {
        let (_dir, store) = setup();
        let mut legacy = ExpenseCollection::from_new("u1", dinner(), Utc::now());
        legacy.id = "abc".into();

        let first = store.import("u1", vec![legacy.clone()]).await.unwrap();
        let second = store.import("u2", vec![legacy.clone()]).await.unwrap();
        assert_eq!(first, vec!["abc"]);
        assert_ne!(second[0], "abc");

        assert_eq!(store.get("u1", "abc").await.unwrap().owner, "u1");
        assert_eq!(store.get("u2", &second[0]).await.unwrap().owner, "u2");
    }

    #[tokio::test]
    async fn test_concurrent_imports_of_the_same_id_keep_both() {
        let (_dir, store) = setup();
        let mut legacy = ExpenseCollection::from_new("u1", dinner(), Utc::now());
        legacy.id = "abc".into();

        let (a, b) = tokio::join!(
            store.import("u1", vec![legacy.clone()]),
            store.import("u2", vec![legacy.clone()]),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a[0], b[0]);
        assert_eq!(store.dump().await.unwrap().len(), 2);
        assert_eq!(store.list("u1", None).await.unwrap().len(), 1);
        assert_eq!(store.list("u2", None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_import_repeated_id_in_batch() {
        let (_dir, store) = setup();
        let mut a = ExpenseCollection::from_new("u1", dinner(), Utc::now());
        a.id = "abc".into();
        let mut b = a.clone();
        b.name = "Second".into();

        let ids = store.import("u1", vec![a, b]).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], "abc");
        assert_ne!(ids[1], "abc");
        assert_eq!(store.list("u1", None).await.unwrap().len(), 2);
    }
}
