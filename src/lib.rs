//! docseek - semantic search over uploaded PDFs with extractive answers.
//!
//! Uploaded documents are cleaned, split into five-sentence chunks and
//! embedded with a sentence-transformer running on
//! [candle](https://github.com/huggingface/candle). A query is embedded the
//! same way, matched against every stored chunk by cosine distance, and a
//! BERT question-answering model marks the answer inside each hit.
//!
//! # Quick start
//!
//! ```no_run
//! use docseek::{DataDir, LibraryDb, ModelManager};
//! use docseek::chunking::ChunkingConfig;
//! use docseek::ingestion::ingest_upload;
//! use docseek::retrieval::{self, SearchParams};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let library = LibraryDb::open(&data_dir.library_db()).unwrap();
//! let mut models = ModelManager::resolve(None, None, None).unwrap();
//!
//! let bytes = std::fs::read("paper.pdf").unwrap();
//! ingest_upload(
//!     &library,
//!     &mut models,
//!     "paper.pdf",
//!     &bytes,
//!     &ChunkingConfig::default(),
//!     &mut |_, _| {},
//! )
//! .unwrap();
//!
//! let hits = retrieval::search(
//!     &SearchParams::new("what does the paper propose?"),
//!     &library,
//!     &mut models,
//! )
//! .unwrap();
//! for hit in &hits {
//!     println!("{} ({:.3}): {}", hit.title, hit.distance, hit.highlighted);
//! }
//! ```

pub mod answer;
pub mod chunking;
pub mod config_db;
pub mod data_dir;
pub mod doc_id;
pub mod embedding;
pub mod error;
pub mod hub;
pub mod ingestion;
pub mod library_db;
pub mod mcp;
pub mod model_manager;
pub mod pdf;
pub mod retrieval;
pub mod text_util;
pub mod vector_search;
pub mod web;

pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use doc_id::DocumentId;
pub use error::{Error, Result};
pub use library_db::LibraryDb;
pub use model_manager::ModelManager;
