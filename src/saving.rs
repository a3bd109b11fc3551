use bincode::{deserialize_from, serialize_into};
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{AppError, AppResult};
use crate::expense::{ExpenseCollection, SCHEMA_VERSION};
use crate::store::DocumentStore;

/// A point-in-time copy of every stored collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_version: u32,
    pub taken_at: DateTime<Utc>,
    pub documents: Vec<ExpenseCollection>,
}

impl Snapshot {
    pub fn new(documents: Vec<ExpenseCollection>) -> Self {
        Snapshot {
            schema_version: SCHEMA_VERSION,
            taken_at: Utc::now(),
            documents,
        }
    }
}

pub fn write_snapshot<W: Write>(snapshot: &Snapshot, writer: W) -> AppResult<()> {
    let encoder = GzEncoder::new(writer, Compression::default());
    let mut writer = BufWriter::new(encoder);
    serialize_into(&mut writer, snapshot)?;

    let encoder = writer
        .into_inner()
        .map_err(|e| AppError::Io(e.into_error()))?;
    encoder.finish()?;
    Ok(())
}

pub fn read_snapshot<R: Read>(reader: R) -> AppResult<Snapshot> {
    let decoder = GzDecoder::new(reader);
    let mut reader = BufReader::new(decoder);
    let snapshot: Snapshot = deserialize_from(&mut reader)?;

    if snapshot.schema_version > SCHEMA_VERSION {
        return Err(AppError::BadRequest(format!(
            "snapshot schema {} is newer than supported schema {}",
            snapshot.schema_version, SCHEMA_VERSION
        )));
    }
    Ok(snapshot)
}

pub fn save_snapshot(snapshot: &Snapshot, filename: impl AsRef<Path>) -> AppResult<()> {
    let file = File::create(filename)?;
    write_snapshot(snapshot, file)
}

pub fn load_snapshot(filename: impl AsRef<Path>) -> AppResult<Snapshot> {
    let file = File::open(filename)?;
    read_snapshot(file)
}

/// Dump the whole store into a `.bin.gz` file, returning the document count
pub async fn backup_store(store: &dyn DocumentStore, filename: impl AsRef<Path>) -> AppResult<usize> {
    let snapshot = Snapshot::new(store.dump().await?);
    let count = snapshot.documents.len();
    save_snapshot(&snapshot, filename.as_ref())?;
    log::info!(
        "saved {count} collection(s) to {}",
        filename.as_ref().display()
    );
    Ok(count)
}

/// Load a `.bin.gz` file back into the store, replacing documents by id
pub async fn restore_store(store: &dyn DocumentStore, filename: impl AsRef<Path>) -> AppResult<usize> {
    let snapshot = load_snapshot(filename.as_ref())?;
    let count = store.put_all(snapshot.documents).await?;
    log::info!(
        "restored {count} collection(s) from {}",
        filename.as_ref().display()
    );
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expense::{CollectionKind, LineItem, NewCollection};
    use crate::store::JsonFileStore;
    use tempfile::TempDir;

    fn sample() -> ExpenseCollection {
        ExpenseCollection::from_new(
            "u1",
            NewCollection {
                kind: CollectionKind::Group,
                name: "Trip".into(),
                description: "Lake".into(),
                members: vec!["Ana".into()],
                items: vec![LineItem::new("Gas", "1", "40").assigned_to("Ana")],
            },
            Utc::now(),
        )
    }

    #[test]
    fn snapshot_survives_compression() {
        let snapshot = Snapshot::new(vec![sample()]);
        let mut buffer = Vec::new();
        write_snapshot(&snapshot, &mut buffer).unwrap();
        assert_eq!(&buffer[..2], &[0x1f, 0x8b]);

        let loaded = read_snapshot(buffer.as_slice()).unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(read_snapshot(&b"not a snapshot"[..]).is_err());
    }

    #[tokio::test]
    async fn backup_then_restore_into_empty_store() {
        let dir = TempDir::new().unwrap();
        let source = JsonFileStore::open(dir.path().join("a.json")).unwrap();
        source.put_all(vec![sample(), sample()]).await.unwrap();

        let file = dir.path().join("backup.bin.gz");
        assert_eq!(backup_store(&source, &file).await.unwrap(), 2);

        let target = JsonFileStore::open(dir.path().join("b.json")).unwrap();
        assert_eq!(restore_store(&target, &file).await.unwrap(), 2);
        assert_eq!(target.dump().await.unwrap(), source.dump().await.unwrap());
    }
}
