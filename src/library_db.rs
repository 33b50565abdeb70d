use std::path::Path;

use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
    WriteTransaction,
};
use serde::Serialize;

use crate::{
    doc_id::DocumentId,
    error::{Error, Result},
};

const DOCUMENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("documents");
const CHUNKS: TableDefinition<(u64, u32), &str> = TableDefinition::new("chunks");
const EMBEDDINGS: TableDefinition<(u64, u32), &[u8]> =
    TableDefinition::new("embeddings");

/// Header size: 4 bytes vector dimension.
const HEADER_SIZE: usize = 4;

/// Identifies a chunk: the owning document and the chunk's position in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkKey {
    pub document: u64,
    pub order: u32,
}

impl ChunkKey {
    fn as_tuple(self) -> (u64, u32) {
        (self.document, self.order)
    }
}

/// A stored document record.
///
/// Serialized as: `"uploaded_at\0chunk_count\0title"`, with the title last
/// so it may contain any character.
///
/// # Examples
///
/// ```
/// use docseek::{library_db::Document, DocumentId};
///
/// let doc = Document {
///     id: DocumentId::new("paper.pdf", b"..."),
///     title: "paper.pdf".to_string(),
///     uploaded_at: 1700000000,
///     chunk_count: 12,
/// };
/// let bytes = doc.serialize();
/// let restored = Document::deserialize(doc.id.numeric, &bytes).unwrap();
/// assert_eq!(doc, restored);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub uploaded_at: u64,
    pub chunk_count: u32,
}

impl Document {
    pub fn serialize(&self) -> Vec<u8> {
        format!("{}\0{}\0{}", self.uploaded_at, self.chunk_count, self.title)
            .into_bytes()
    }

    /// Deserialize from bytes. Returns `None` if the format is invalid.
    pub fn deserialize(numeric_id: u64, bytes: &[u8]) -> Option<Self> {
        let s = std::str::from_utf8(bytes).ok()?;
        let mut parts = s.splitn(3, '\0');
        let uploaded_at = parts.next()?.parse().ok()?;
        let chunk_count = parts.next()?.parse().ok()?;
        let title = parts.next()?.to_string();
        Some(Self {
            id: DocumentId::from_numeric(numeric_id),
            title,
            uploaded_at,
            chunk_count,
        })
    }

    /// The JSON shape used by the HTTP and MCP surfaces.
    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            id: self.id.hex(),
            short_id: self.id.to_string(),
            title: self.title.clone(),
            uploaded_at: self.uploaded_at,
            chunk_count: self.chunk_count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub id: String,
    pub short_id: String,
    pub title: String,
    pub uploaded_at: u64,
    pub chunk_count: u32,
}

/// A chunk ready to be written: its position, text and embedding.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub order: u32,
    pub text: String,
    pub vector: Vec<f32>,
}

/// Stores documents, their chunks, and one embedding vector per chunk.
///
/// Chunks and vectors are keyed by `(document id, order)`, so all rows of a
/// document sit in one contiguous key range and are removed with it.
///
/// Vector format per entry:
/// - 4 bytes: dimension D (u32 LE)
/// - D * 4 bytes: f32 LE values
pub struct LibraryDb {
    db: Database,
}

impl LibraryDb {
    /// Open or create a library database at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use docseek::LibraryDb;
    ///
    /// let db = LibraryDb::open(&tmp.path().join("library.redb")).unwrap();
    /// assert_eq!(db.document_count().unwrap(), 0);
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        Self::create_tables(&txn)?;
        txn.commit()?;

        Ok(Self { db })
    }

    fn create_tables(txn: &WriteTransaction) -> Result<()> {
        txn.open_table(DOCUMENTS)?;
        txn.open_table(CHUNKS)?;
        txn.open_table(EMBEDDINGS)?;
        Ok(())
    }

    /// Drop every table and recreate them empty.
    pub fn reset(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.delete_table(DOCUMENTS)?;
        txn.delete_table(CHUNKS)?;
        txn.delete_table(EMBEDDINGS)?;
        Self::create_tables(&txn)?;
        txn.commit()?;
        Ok(())
    }

    /// Insert a document with all of its chunks in a single transaction.
    ///
    /// An existing document with the same id is replaced, chunks included.
    /// Returns `true` if a document was replaced.
    pub fn insert_document(
        &self,
        document: &Document,
        chunks: &[NewChunk],
    ) -> Result<bool> {
        let doc_id = document.id.numeric;
        let txn = self.db.begin_write()?;
        let replaced = {
            let mut docs = txn.open_table(DOCUMENTS)?;
            let mut chunk_table = txn.open_table(CHUNKS)?;
            let mut vectors = txn.open_table(EMBEDDINGS)?;

            let replaced = docs.remove(doc_id)?.is_some();
            remove_document_rows(&mut chunk_table, doc_id)?;
            remove_document_rows(&mut vectors, doc_id)?;

            docs.insert(doc_id, document.serialize().as_slice())?;
            for chunk in chunks {
                let key = (doc_id, chunk.order);
                chunk_table.insert(key, chunk.text.as_str())?;
                vectors.insert(key, encode_vector(&chunk.vector).as_slice())?;
            }
            replaced
        };
        txn.commit()?;
        Ok(replaced)
    }

    pub fn get_document(&self, doc_id: u64) -> Result<Option<Document>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        Ok(table
            .get(doc_id)?
            .and_then(|v| Document::deserialize(doc_id, v.value())))
    }

    /// All documents, oldest upload first.
    pub fn list_documents(&self) -> Result<Vec<Document>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            if let Some(doc) = Document::deserialize(k.value(), v.value()) {
                result.push(doc);
            }
        }
        result.sort_by(|a, b| {
            a.uploaded_at
                .cmp(&b.uploaded_at)
                .then_with(|| a.title.cmp(&b.title))
        });
        Ok(result)
    }

    pub fn document_count(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        Ok(table.len()?)
    }

    pub fn chunk_count(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;
        Ok(table.len()?)
    }

    /// Delete a document together with its chunks and vectors.
    pub fn delete_document(&self, doc_id: u64) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut docs = txn.open_table(DOCUMENTS)?;
            let mut chunk_table = txn.open_table(CHUNKS)?;
            let mut vectors = txn.open_table(EMBEDDINGS)?;

            remove_document_rows(&mut chunk_table, doc_id)?;
            remove_document_rows(&mut vectors, doc_id)?;
            docs.remove(doc_id)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn chunk_text(&self, key: ChunkKey) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;
        Ok(table.get(key.as_tuple())?.map(|v| v.value().to_string()))
    }

    /// A document's chunks in order, as `(order, text)` pairs.
    pub fn document_chunks(&self, doc_id: u64) -> Result<Vec<(u32, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;
        let mut result = Vec::new();
        for entry in table.range((doc_id, 0)..=(doc_id, u32::MAX))? {
            let (k, v) = entry?;
            result.push((k.value().1, v.value().to_string()));
        }
        Ok(result)
    }

    /// Load every stored vector in a single read transaction.
    ///
    /// Entries with a corrupt header are skipped.
    pub fn embeddings(&self) -> Result<Vec<(ChunkKey, Vec<f32>)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(EMBEDDINGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            let (document, order) = k.value();
            if let Some(vector) = decode_vector(v.value()) {
                result.push((ChunkKey { document, order }, vector));
            }
        }
        Ok(result)
    }

    pub fn has_embeddings(&self) -> Result<bool> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(EMBEDDINGS)?;
        Ok(!table.is_empty()?)
    }

    /// Resolve a user-supplied document reference.
    ///
    /// Accepts the full hex id, a hex prefix (with or without `#`), or an
    /// exact title.
    pub fn resolve(&self, reference: &str) -> Result<Document> {
        let reference = reference.trim();
        if let Some(id) = DocumentId::parse_hex(reference)
            && let Some(doc) = self.get_document(id.numeric)?
        {
            return Ok(doc);
        }

        let documents = self.list_documents()?;
        let prefix = reference.strip_prefix('#').unwrap_or(reference);
        let is_hex = !prefix.is_empty()
            && prefix.chars().all(|c| c.is_ascii_hexdigit());

        let mut matches: Vec<&Document> = if is_hex {
            documents
                .iter()
                .filter(|d| d.id.hex().starts_with(&prefix.to_lowercase()))
                .collect()
        } else {
            Vec::new()
        };
        if matches.is_empty() {
            matches = documents.iter().filter(|d| d.title == reference).collect();
        }

        match matches.as_slice() {
            [doc] => Ok((*doc).clone()),
            [] => Err(Error::NotFound {
                kind: "document",
                name: reference.to_string(),
            }),
            _ => Err(Error::InvalidInput(format!(
                "'{reference}' matches {} documents; use a longer id",
                matches.len()
            ))),
        }
    }
}

impl std::fmt::Debug for LibraryDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryDb").finish_non_exhaustive()
    }
}

fn remove_document_rows<V: redb::Value + 'static>(
    table: &mut redb::Table<'_, (u64, u32), V>,
    doc_id: u64,
) -> Result<()> {
    let keys: Vec<(u64, u32)> = table
        .range((doc_id, 0)..=(doc_id, u32::MAX))?
        .map(|entry| entry.map(|(k, _)| k.value()))
        .collect::<std::result::Result<_, _>>()?;
    for key in keys {
        table.remove(key)?;
    }
    Ok(())
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE + size_of_val(vector));
    bytes.extend_from_slice(&(vector.len() as u32).to_le_bytes());
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    let header: [u8; HEADER_SIZE] = bytes.get(..HEADER_SIZE)?.try_into().ok()?;
    let dimension = u32::from_le_bytes(header) as usize;
    let body = &bytes[HEADER_SIZE..];
    if body.len() != dimension * 4 {
        return None;
    }
    Some(bytemuck::pod_collect_to_vec::<u8, f32>(body))
}
