use std::sync::{Arc, Mutex};

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    data_dir::DataDir,
    error,
    library_db::{DocumentSummary, LibraryDb},
    model_manager::ModelManager,
    retrieval::{self, DEFAULT_LIMIT, Hit},
};

struct DocseekState {
    library: LibraryDb,
    models: Mutex<ModelManager>,
}

#[derive(Clone)]
pub struct DocseekMcpServer {
    state: Arc<DocseekState>,
    tool_router: ToolRouter<Self>,
}

impl DocseekMcpServer {
    fn new(state: DocseekState) -> Self {
        Self {
            state: Arc::new(state),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl DocseekMcpServer {
    /// Semantic search over uploaded documents with answer extraction.
    #[tool(
        name = "docseek_search",
        description = "Semantic search over uploaded documents. Returns the closest text chunks with the extracted answer span highlighted in **bold**."
    )]
    pub async fn docseek_search(
        &self,
        params: Parameters<SearchToolParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let search_params = retrieval::SearchParams {
            query: params.query,
            limit: params.limit.unwrap_or(DEFAULT_LIMIT),
            max_distance: params.max_distance,
            answers: params.answers.unwrap_or(true),
        };

        let mut models = self.state.models.lock().map_err(|_| {
            rmcp::ErrorData::internal_error("model lock poisoned", None)
        })?;

        let hits =
            retrieval::search(&search_params, &self.state.library, &mut *models)
                .map_err(|e| {
                    if e.is_client_error() {
                        rmcp::ErrorData::invalid_params(e.to_string(), None)
                    } else {
                        mcp_error("search failed", e)
                    }
                })?;

        let summary = format_search_summary(&hits, &search_params.query);
        let structured = serde_json::to_value(SearchResponse {
            query: search_params.query,
            result_count: hits.len(),
            results: hits,
        })
        .map_err(|e| mcp_error("failed to serialize search results", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }

    /// List uploaded documents.
    #[tool(
        name = "docseek_documents",
        description = "List the uploaded documents with their ids, titles, upload times and chunk counts."
    )]
    pub async fn docseek_documents(
        &self,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let documents: Vec<DocumentSummary> = self
            .state
            .library
            .list_documents()
            .map_err(|e| mcp_error("failed to list documents", e))?
            .iter()
            .map(|d| d.summary())
            .collect();

        let summary = format_documents_summary(&documents);
        let structured = serde_json::to_value(DocumentsResponse {
            document_count: documents.len(),
            documents,
        })
        .map_err(|e| mcp_error("failed to serialize documents", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for DocseekMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("docseek", env!("CARGO_PKG_VERSION"))
                    .with_title("docseek MCP"),
            )
            .with_instructions(
                "Use docseek_search to ask questions about the uploaded PDFs. Use docseek_documents to see what is available.",
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchToolParams {
    /// Question or search query.
    pub query: String,
    /// Maximum number of results (default: 10).
    pub limit: Option<usize>,
    /// Drop results with a cosine distance above this value.
    pub max_distance: Option<f32>,
    /// Extract and highlight answers (default: true).
    pub answers: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    query: String,
    result_count: usize,
    results: Vec<Hit>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentsResponse {
    document_count: usize,
    documents: Vec<DocumentSummary>,
}

fn format_search_summary(hits: &[Hit], query: &str) -> String {
    if hits.is_empty() {
        return format!("No results found for \"{query}\"");
    }

    let mut lines = Vec::with_capacity(hits.len() * 2 + 1);
    let suffix = if hits.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} result{} for \"{query}\":",
        hits.len(),
        suffix
    ));

    for hit in hits {
        lines.push(format!(
            "{}. [{:.3}] {} (chunk {})",
            hit.rank, hit.distance, hit.title, hit.order
        ));
        if let Some(answer) = &hit.answer {
            lines.push(format!("   Answer: {answer}"));
        }
    }

    lines.join("\n")
}

fn format_documents_summary(documents: &[DocumentSummary]) -> String {
    if documents.is_empty() {
        return "No documents uploaded.".to_string();
    }

    let mut lines = Vec::with_capacity(documents.len() + 1);
    lines.push(format!("{} document(s):", documents.len()));
    for doc in documents {
        lines.push(format!(
            "{} {} ({} chunks)",
            doc.short_id, doc.title, doc.chunk_count
        ));
    }
    lines.join("\n")
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(data_dir: DataDir, models: ModelManager) -> error::Result<()> {
    let library = LibraryDb::open(&data_dir.library_db())?;

    let state = DocseekState {
        library,
        models: Mutex::new(models),
    };

    let server = DocseekMcpServer::new(state);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        doc_id::DocumentId,
        library_db::{Document, NewChunk},
    };

    fn server_with_library(library: LibraryDb) -> DocseekMcpServer {
        DocseekMcpServer::new(DocseekState {
            library,
            models: Mutex::new(ModelManager::with_model_ids(
                "/nonexistent/embed".to_string(),
                "/nonexistent/qa".to_string(),
            )),
        })
    }

    fn summary_text(result: &CallToolResult) -> String {
        result
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn documents_tool_returns_structured_list() {
        let tmp = tempfile::tempdir().unwrap();
        let library = LibraryDb::open(&tmp.path().join("library.redb")).unwrap();
        let doc = Document {
            id: DocumentId::new("paper.pdf", b"%PDF-1.7"),
            title: "paper.pdf".to_string(),
            uploaded_at: 1_700_000_000,
            chunk_count: 1,
        };
        library
            .insert_document(
                &doc,
                &[NewChunk {
                    order: 0,
                    text: "Some stored text.".to_string(),
                    vector: vec![1.0, 0.0],
                }],
            )
            .unwrap();

        let server = server_with_library(library);
        let result = server.docseek_documents().await.unwrap();

        let structured = result.structured_content.clone().expect("structured");
        assert_eq!(structured["documentCount"], 1);
        let first = &structured["documents"][0];
        assert_eq!(first["title"], "paper.pdf");
        assert_eq!(first["id"], doc.id.hex());
        assert_eq!(first["chunkCount"], 1);

        assert!(summary_text(&result).contains("paper.pdf (1 chunks)"));
    }

    #[tokio::test]
    async fn search_on_empty_library_does_not_load_models() {
        let tmp = tempfile::tempdir().unwrap();
        let library = LibraryDb::open(&tmp.path().join("library.redb")).unwrap();
        let server = server_with_library(library);

        let params = SearchToolParams {
            query: "anything".to_string(),
            limit: Some(5),
            max_distance: None,
            answers: None,
        };
        let result = server.docseek_search(Parameters(params)).await.unwrap();

        let structured = result.structured_content.clone().expect("structured");
        assert_eq!(structured["resultCount"], 0);
        assert!(summary_text(&result).contains("No results found"));
    }

    #[tokio::test]
    async fn empty_query_is_invalid_params() {
        let tmp = tempfile::tempdir().unwrap();
        let library = LibraryDb::open(&tmp.path().join("library.redb")).unwrap();
        let server = server_with_library(library);

        let params = SearchToolParams {
            query: "  ".to_string(),
            limit: None,
            max_distance: None,
            answers: None,
        };
        let err = server.docseek_search(Parameters(params)).await.unwrap_err();
        assert_eq!(err.code, rmcp::model::ErrorCode::INVALID_PARAMS);
    }
}
