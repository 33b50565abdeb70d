//! Extractive question answering over retrieved passages.
//!
//! A BERT model fine-tuned for span extraction scores every passage token as
//! a possible answer start and end. The best-scoring span is mapped back to a
//! byte range of the passage and highlighted in place.

use std::ops::Range;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::Linear;
use candle_transformers::models::bert::{BertModel, Config};
use serde::Serialize;
use tokenizers::{Tokenizer, TruncationParams, TruncationStrategy};
use tracing::info;

use crate::{
    error::{Error, Result},
    hub::{ModelRepo, var_builder},
};

/// Longest answer, in tokens, the reader will return.
pub const MAX_ANSWER_TOKENS: usize = 30;

/// Longest question + passage pair fed to the reader.
pub const MAX_QA_TOKENS: usize = 512;

/// An answer located in a passage, as byte offsets into it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnswerSpan {
    pub start: usize,
    pub end: usize,
    pub score: f32,
}

impl AnswerSpan {
    /// The span within `passage` with edge whitespace removed.
    ///
    /// `None` when the span is out of bounds, not on character boundaries,
    /// or covers only whitespace.
    pub fn trimmed_range(&self, passage: &str) -> Option<Range<usize>> {
        let selected = passage.get(self.start..self.end)?;
        let trimmed = selected.trim();
        if trimmed.is_empty() {
            return None;
        }
        let start = self.start + (selected.len() - selected.trim_start().len());
        Some(start..start + trimmed.len())
    }
}

/// Finds the span of a passage that answers a question.
pub trait AnswerExtractor {
    fn extract(
        &mut self,
        question: &str,
        passage: &str,
    ) -> Result<Option<AnswerSpan>>;
}

/// Pick the best `(start, end, score)` token span from QA logits.
///
/// Only tokens flagged in `is_context` may start or end the answer. The end
/// is searched within `max_answer_tokens` of the start.
///
/// # Examples
///
/// ```
/// use docseek::answer::best_span;
///
/// let start = [9.0, 0.1, 5.0, 0.2];
/// let end = [9.0, 0.1, 0.3, 4.0];
/// let is_context = [false, true, true, true];
/// let (s, e, score) = best_span(&start, &end, &is_context, 30).unwrap();
/// assert_eq!((s, e), (2, 3));
/// assert_eq!(score, 9.0);
/// ```
pub fn best_span(
    start_logits: &[f32],
    end_logits: &[f32],
    is_context: &[bool],
    max_answer_tokens: usize,
) -> Option<(usize, usize, f32)> {
    let len = start_logits.len().min(end_logits.len()).min(is_context.len());
    let argmax = |logits: &[f32], range: std::ops::Range<usize>| {
        range
            .filter(|&i| is_context[i])
            .max_by(|&a, &b| logits[a].total_cmp(&logits[b]).then(b.cmp(&a)))
    };

    let start = argmax(start_logits, 0..len)?;
    let end_limit = start.saturating_add(max_answer_tokens.max(1)).min(len);
    let end = argmax(end_logits, start..end_limit)?;

    Some((start, end, start_logits[start] + end_logits[end]))
}

/// Wrap the answer span of `passage` in `**`.
///
/// Whitespace at the span edges stays outside the markers. Spans that are
/// empty, out of bounds or not on character boundaries leave the passage
/// unchanged.
///
/// # Examples
///
/// ```
/// use docseek::answer::{highlight, AnswerSpan};
///
/// let passage = "Paris is the capital of France.";
/// let span = AnswerSpan { start: 0, end: 6, score: 1.0 };
/// assert_eq!(highlight(passage, &span), "**Paris** is the capital of France.");
/// ```
pub fn highlight(passage: &str, span: &AnswerSpan) -> String {
    match span.trimmed_range(passage) {
        Some(range) => format!(
            "{}**{}**{}",
            &passage[..range.start],
            &passage[range.clone()],
            &passage[range.end..]
        ),
        None => passage.to_string(),
    }
}

/// A BERT reader with a span-classification head (`qa_outputs`).
pub struct AnswerReader {
    bert: BertModel,
    qa_outputs: Linear,
    tokenizer: Tokenizer,
    device: Device,
}

impl AnswerReader {
    pub fn load(model_id: &str, device: &Device) -> Result<Self> {
        let repo = ModelRepo::open(model_id)?;
        let config: Config = repo.read_json("config.json")?;

        let mut tokenizer = Tokenizer::from_file(repo.get("tokenizer.json")?)
            .map_err(|e| Error::Tokenizer(e.to_string()))?;
        tokenizer.with_padding(None);
        // Truncating only the passage fails when the question alone is too long.
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_QA_TOKENS.min(config.max_position_embeddings),
                strategy: TruncationStrategy::LongestFirst,
                ..Default::default()
            }))
            .map_err(|e| Error::Tokenizer(e.to_string()))?;

        let vb = var_builder(&repo.weights()?, device)?;
        let bert = BertModel::load(vb.pp("bert"), &config)?;
        let qa_outputs = candle_nn::linear(config.hidden_size, 2, vb.pp("qa_outputs"))?;
        info!(model = model_id, "loaded answer reader");

        Ok(Self {
            bert,
            qa_outputs,
            tokenizer,
            device: device.clone(),
        })
    }
}

impl AnswerExtractor for AnswerReader {
    fn extract(
        &mut self,
        question: &str,
        passage: &str,
    ) -> Result<Option<AnswerSpan>> {
        if question.trim().is_empty() || passage.trim().is_empty() {
            return Ok(None);
        }

        let encoding = self
            .tokenizer
            .encode((question, passage), true)
            .map_err(|e| Error::Tokenizer(e.to_string()))?;

        let ids = Tensor::new(encoding.get_ids(), &self.device)?.unsqueeze(0)?;
        let type_ids =
            Tensor::new(encoding.get_type_ids(), &self.device)?.unsqueeze(0)?;
        let mask = Tensor::new(encoding.get_attention_mask(), &self.device)?
            .unsqueeze(0)?;

        let hidden = self.bert.forward(&ids, &type_ids, Some(&mask))?;
        let logits = self
            .qa_outputs
            .forward(&hidden)?
            .squeeze(0)?
            .to_dtype(DType::F32)?
            .to_vec2::<f32>()?;
        let (start_logits, end_logits): (Vec<f32>, Vec<f32>) =
            logits.iter().map(|pair| (pair[0], pair[1])).unzip();

        let is_context: Vec<bool> = encoding
            .get_sequence_ids()
            .iter()
            .map(|seq| *seq == Some(1))
            .collect();

        let Some((start, end, score)) =
            best_span(&start_logits, &end_logits, &is_context, MAX_ANSWER_TOKENS)
        else {
            return Ok(None);
        };

        let offsets = encoding.get_offsets();
        let span = AnswerSpan {
            start: offsets[start].0,
            end: offsets[end].1,
            score,
        };
        if span.start >= span.end || passage.get(span.start..span.end).is_none() {
            return Ok(None);
        }
        Ok(Some(span))
    }
}
