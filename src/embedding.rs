use candle_core::{DType, Device, IndexOp, Tensor};
use candle_transformers::models::bert::{BertModel, Config};
use serde::Deserialize;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tracing::info;

use crate::{
    chunking::Chunk,
    error::{Error, Result},
    hub::{ModelRepo, var_builder},
};

/// Number of chunks embedded per forward pass.
pub const EMBED_BATCH_SIZE: usize = 32;

/// Turns texts into fixed-length vectors.
pub trait Embedder {
    /// Embed `texts`, returning one vector per input in input order.
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed chunk texts in batches of [`EMBED_BATCH_SIZE`].
///
/// `progress` is called with `(done, total)` after each batch.
pub fn embed_chunks<E: Embedder + ?Sized>(
    embedder: &mut E,
    chunks: &[Chunk],
    progress: &mut dyn FnMut(usize, usize),
) -> Result<Vec<Vec<f32>>> {
    let total = chunks.len();
    let mut vectors = Vec::with_capacity(total);

    for batch in chunks.chunks(EMBED_BATCH_SIZE) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embedded = embedder.embed(&texts)?;
        if embedded.len() != texts.len() {
            return Err(Error::Model(format!(
                "embedder returned {} vectors for {} texts",
                embedded.len(),
                texts.len()
            )));
        }
        vectors.extend(embedded);
        progress(vectors.len(), total);
    }

    Ok(vectors)
}

/// How token states are reduced to one vector per text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pooling {
    Cls,
    Mean,
}

#[derive(Debug, Deserialize)]
struct PoolingConfig {
    #[serde(default)]
    pooling_mode_cls_token: bool,
    #[serde(default)]
    pooling_mode_mean_tokens: bool,
}

impl From<PoolingConfig> for Pooling {
    fn from(config: PoolingConfig) -> Self {
        if config.pooling_mode_cls_token && !config.pooling_mode_mean_tokens {
            Pooling::Cls
        } else {
            Pooling::Mean
        }
    }
}

/// Average hidden states over unmasked tokens.
///
/// `hidden` is `[batch, seq, dim]`, `mask` is `[batch, seq]`.
pub fn mean_pool(hidden: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let mask = mask.to_dtype(hidden.dtype())?.unsqueeze(2)?;
    let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
    let counts = mask.sum(1)?.maximum(1e-9)?;
    Ok(summed.broadcast_div(&counts)?)
}

/// The hidden state of the first (`[CLS]`) token.
pub fn cls_pool(hidden: &Tensor) -> Result<Tensor> {
    Ok(hidden.i((.., 0))?)
}

/// Scale each row of a `[batch, dim]` tensor to unit length.
pub fn l2_normalize(v: &Tensor) -> Result<Tensor> {
    let norms = v.sqr()?.sum_keepdim(1)?.sqrt()?.maximum(1e-12)?;
    Ok(v.broadcast_div(&norms)?)
}

/// A BERT sentence-transformer running on candle.
pub struct SentenceEncoder {
    model: BertModel,
    tokenizer: Tokenizer,
    pooling: Pooling,
    device: Device,
}

impl SentenceEncoder {
    pub fn load(model_id: &str, device: &Device) -> Result<Self> {
        let repo = ModelRepo::open(model_id)?;
        let config: Config = repo.read_json("config.json")?;

        let mut tokenizer = Tokenizer::from_file(repo.get("tokenizer.json")?)
            .map_err(|e| Error::Tokenizer(e.to_string()))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: config.max_position_embeddings,
                ..Default::default()
            }))
            .map_err(|e| Error::Tokenizer(e.to_string()))?;

        let pooling = match repo.get_optional("1_Pooling/config.json") {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                serde_json::from_str::<PoolingConfig>(&raw)?.into()
            }
            None => Pooling::Mean,
        };

        let vb = var_builder(&repo.weights()?, device)?;
        let model = BertModel::load(vb, &config)?;
        info!(model = model_id, ?pooling, "loaded sentence encoder");

        Ok(Self {
            model,
            tokenizer,
            pooling,
            device: device.clone(),
        })
    }
}

impl Embedder for SentenceEncoder {
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| Error::Tokenizer(e.to_string()))?;

        let ids = encodings
            .iter()
            .map(|e| Tensor::new(e.get_ids(), &self.device))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let mask = encodings
            .iter()
            .map(|e| Tensor::new(e.get_attention_mask(), &self.device))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let ids = Tensor::stack(&ids, 0)?;
        let mask = Tensor::stack(&mask, 0)?;
        let type_ids = ids.zeros_like()?;

        let hidden = self.model.forward(&ids, &type_ids, Some(&mask))?;
        let pooled = match self.pooling {
            Pooling::Cls => cls_pool(&hidden)?,
            Pooling::Mean => mean_pool(&hidden, &mask)?,
        };
        let normalized = l2_normalize(&pooled)?;

        Ok(normalized.to_dtype(DType::F32)?.to_vec2::<f32>()?)
    }
}
