use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    answer::{AnswerExtractor, highlight},
    doc_id::DocumentId,
    embedding::Embedder,
    error::{Error, Result},
    library_db::LibraryDb,
    vector_search::nearest,
};

pub const DEFAULT_LIMIT: usize = 10;

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_answers() -> bool {
    true
}

/// A retrieval request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Drop hits farther than this cosine distance.
    #[serde(default)]
    pub max_distance: Option<f32>,
    /// Run answer extraction on each hit.
    #[serde(default = "default_answers")]
    pub answers: bool,
}

impl SearchParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: DEFAULT_LIMIT,
            max_distance: None,
            answers: true,
        }
    }
}

/// One retrieved chunk.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hit {
    pub rank: usize,
    pub distance: f32,
    pub document_id: String,
    pub title: String,
    pub order: u32,
    pub text: String,
    /// The extracted answer, if one was found.
    pub answer: Option<String>,
    pub answer_score: Option<f32>,
    /// Byte range of the answer within `text`.
    pub answer_range: Option<Range<usize>>,
    /// `text` with the answer wrapped in `**`.
    pub highlighted: String,
}

/// Run the query pipeline: embed, search, then extract answers.
pub fn search<M>(
    params: &SearchParams,
    library: &LibraryDb,
    models: &mut M,
) -> Result<Vec<Hit>>
where
    M: Embedder + AnswerExtractor + ?Sized,
{
    let query = params.query.trim();
    if query.is_empty() {
        return Err(Error::InvalidInput("query must not be empty".to_string()));
    }
    if params.limit == 0 || !library.has_embeddings()? {
        return Ok(Vec::new());
    }

    let query_vector = models
        .embed(&[query.to_string()])?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Model("embedder returned no vector".to_string()))?;

    let neighbors = nearest(library, &query_vector, params.limit)?;

    let mut hits = Vec::with_capacity(neighbors.len());
    for neighbor in neighbors {
        if let Some(max) = params.max_distance
            && neighbor.distance > max
        {
            continue;
        }

        let Some(document) = library.get_document(neighbor.key.document)? else {
            warn!(
                document = neighbor.key.document,
                "skipping hit for missing document"
            );
            continue;
        };
        let Some(text) = library.chunk_text(neighbor.key)? else {
            warn!(
                document = neighbor.key.document,
                order = neighbor.key.order,
                "skipping hit for missing chunk"
            );
            continue;
        };

        let span = if params.answers {
            models.extract(query, &text).unwrap_or_else(|e| {
                warn!(
                    document = neighbor.key.document,
                    order = neighbor.key.order,
                    error = %e,
                    "answer extraction failed"
                );
                None
            })
        } else {
            None
        };
        let answer_range = span.and_then(|span| span.trimmed_range(&text));
        let (answer, answer_score, highlighted) = match (span, &answer_range) {
            (Some(span), Some(range)) => (
                Some(text[range.clone()].to_string()),
                Some(span.score),
                highlight(&text, &span),
            ),
            _ => (None, None, text.clone()),
        };

        hits.push(Hit {
            rank: hits.len() + 1,
            distance: neighbor.distance,
            document_id: DocumentId::from_numeric(neighbor.key.document).hex(),
            title: document.title,
            order: neighbor.key.order,
            text,
            answer,
            answer_score,
            answer_range,
            highlighted,
        });
    }

    info!(query, hits = hits.len(), "search complete");
    Ok(hits)
}

/// Render hits for the terminal.
pub fn format_human(hits: &[Hit]) -> String {
    if hits.is_empty() {
        return "No results found.\n".to_string();
    }

    let mut out = String::new();
    for hit in hits {
        let short = DocumentId::parse_hex(&hit.document_id)
            .map(|id| id.to_string())
            .unwrap_or_default();
        out.push_str(&format!(
            "{:>3}. Source: {} {} (chunk {})\n",
            hit.rank, hit.title, short, hit.order
        ));
        if let Some(answer) = &hit.answer {
            out.push_str(&format!("     Answer: {answer}\n"));
        }
        out.push_str(&format!("     Distance: {:.4}\n\n", hit.distance));
        out.push_str(&hit.highlighted);
        out.push_str("\n---\n");
    }
    out.push_str(&format!("{} result(s)\n", hits.len()));
    out
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse<'a> {
    query: &'a str,
    result_count: usize,
    results: &'a [Hit],
}

/// Render hits as a JSON document.
pub fn format_json(query: &str, hits: &[Hit]) -> Result<String> {
    Ok(serde_json::to_string_pretty(&SearchResponse {
        query,
        result_count: hits.len(),
        results: hits,
    })?)
}
