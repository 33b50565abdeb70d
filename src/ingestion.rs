use std::{
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use tracing::info;

use crate::{
    chunking::{Chunk, ChunkingConfig, chunk_document},
    doc_id::DocumentId,
    embedding::{Embedder, embed_chunks},
    error::{Error, Result},
    library_db::{Document, LibraryDb, NewChunk},
    pdf::extract_upload_text,
};

/// What an upload produced.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub document: Document,
    /// The stored chunk texts, in order.
    pub chunks: Vec<String>,
    /// Whether an identical earlier upload was replaced.
    pub replaced: bool,
}

/// Reduce a client-supplied filename to its last path component.
fn document_title(filename: &str) -> String {
    Path::new(filename.trim())
        .file_name()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("untitled")
        .to_string()
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Extract, chunk, embed and store one uploaded file.
///
/// Nothing is written unless every step succeeds.
pub fn ingest_upload<E: Embedder + ?Sized>(
    library: &LibraryDb,
    embedder: &mut E,
    filename: &str,
    bytes: &[u8],
    config: &ChunkingConfig,
    progress: &mut dyn FnMut(usize, usize),
) -> Result<IngestOutcome> {
    let title = document_title(filename);
    let text = extract_upload_text(&title, bytes)?;
    let chunks = chunk_document(&text, config);
    let id = DocumentId::new(&title, bytes);
    store(library, embedder, id, title, chunks, progress)
}

/// Chunk, embed and store text that is already extracted.
pub fn ingest_text<E: Embedder + ?Sized>(
    library: &LibraryDb,
    embedder: &mut E,
    title: &str,
    text: &str,
    config: &ChunkingConfig,
) -> Result<IngestOutcome> {
    let title = document_title(title);
    let chunks = chunk_document(text, config);
    let id = DocumentId::new(&title, text.as_bytes());
    store(library, embedder, id, title, chunks, &mut |_, _| {})
}

fn store<E: Embedder + ?Sized>(
    library: &LibraryDb,
    embedder: &mut E,
    id: DocumentId,
    title: String,
    chunks: Vec<Chunk>,
    progress: &mut dyn FnMut(usize, usize),
) -> Result<IngestOutcome> {
    if chunks.is_empty() {
        return Err(Error::EmptyDocument { title });
    }

    let vectors = embed_chunks(embedder, &chunks, progress)?;

    let document = Document {
        id,
        title,
        uploaded_at: now_secs(),
        chunk_count: chunks.len() as u32,
    };
    let rows: Vec<NewChunk> = chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, vector)| NewChunk {
            order: chunk.index as u32,
            text: chunk.text,
            vector,
        })
        .collect();

    let replaced = library.insert_document(&document, &rows)?;
    info!(
        id = %document.id,
        title = %document.title,
        chunks = rows.len(),
        replaced,
        "stored document"
    );

    Ok(IngestOutcome {
        document,
        chunks: rows.into_iter().map(|row| row.text).collect(),
        replaced,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct LengthEmbedder;

    impl Embedder for LengthEmbedder {
        fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn embed(&mut self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(Error::Model("out of memory".to_string()))
        }
    }

    fn library() -> (tempfile::TempDir, LibraryDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db = LibraryDb::open(&tmp.path().join("library.redb")).unwrap();
        (tmp, db)
    }

    const TEXT: &str = "The mitochondria is the powerhouse of the cell. \
                        Cells divide by mitosis in most tissues.\n\
                        Meiosis produces gametes for reproduction.\n";

    #[test]
    fn upload_stores_document_and_chunks() {
        let (_tmp, db) = library();
        let outcome = ingest_upload(
            &db,
            &mut LengthEmbedder,
            "biology.txt",
            TEXT.as_bytes(),
            &ChunkingConfig::default(),
            &mut |_, _| {},
        )
        .unwrap();

        assert_eq!(outcome.document.title, "biology.txt");
        assert_eq!(outcome.document.chunk_count, 1);
        assert!(!outcome.replaced);
        assert_eq!(outcome.chunks.len(), 1);
        assert!(outcome.chunks[0].starts_with("The mitochondria"));

        let stored = db.get_document(outcome.document.id.numeric).unwrap();
        assert_eq!(stored, Some(outcome.document.clone()));
        assert_eq!(db.embeddings().unwrap().len(), 1);
    }

    #[test]
    fn reupload_replaces() {
        let (_tmp, db) = library();
        let config = ChunkingConfig::default();
        let first = ingest_upload(
            &db,
            &mut LengthEmbedder,
            "biology.txt",
            TEXT.as_bytes(),
            &config,
            &mut |_, _| {},
        )
        .unwrap();
        let second = ingest_upload(
            &db,
            &mut LengthEmbedder,
            "biology.txt",
            TEXT.as_bytes(),
            &config,
            &mut |_, _| {},
        )
        .unwrap();

        assert_eq!(first.document.id, second.document.id);
        assert!(second.replaced);
        assert_eq!(db.document_count().unwrap(), 1);
        assert_eq!(db.chunk_count().unwrap(), 1);
    }

    #[test]
    fn empty_document_is_rejected() {
        let (_tmp, db) = library();
        let err = ingest_upload(
            &db,
            &mut LengthEmbedder,
            "blank.txt",
            b"short\n1\n2\n",
            &ChunkingConfig::default(),
            &mut |_, _| {},
        )
        .unwrap_err();

        assert!(matches!(err, Error::EmptyDocument { ref title } if title == "blank.txt"));
        assert_eq!(db.document_count().unwrap(), 0);
    }

    #[test]
    fn embedding_failure_leaves_nothing_behind() {
        let (_tmp, db) = library();
        let result = ingest_text(
            &db,
            &mut FailingEmbedder,
            "notes.md",
            TEXT,
            &ChunkingConfig::default(),
        );

        assert!(matches!(result, Err(Error::Model(_))));
        assert_eq!(db.document_count().unwrap(), 0);
        assert_eq!(db.chunk_count().unwrap(), 0);
    }

    #[test]
    fn non_pdf_bytes_with_pdf_name_are_rejected() {
        let (_tmp, db) = library();
        let err = ingest_upload(
            &db,
            &mut LengthEmbedder,
            "fake.pdf",
            TEXT.as_bytes(),
            &ChunkingConfig::default(),
            &mut |_, _| {},
        )
        .unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn title_is_last_path_component() {
        assert_eq!(document_title("/home/user/papers/a.pdf"), "a.pdf");
        assert_eq!(document_title("a.pdf"), "a.pdf");
        assert_eq!(document_title(""), "untitled");
    }

    #[test]
    fn progress_reaches_total() {
        let (_tmp, db) = library();
        let config = ChunkingConfig {
            sentences_per_chunk: 1,
            ..ChunkingConfig::default()
        };
        let mut last = (0, 0);
        ingest_upload(
            &db,
            &mut LengthEmbedder,
            "biology.txt",
            TEXT.as_bytes(),
            &config,
            &mut |done, total| last = (done, total),
        )
        .unwrap();
        assert_eq!(last, (3, 3));
    }
}
