//! Locating model files, either in a local directory or on the HuggingFace
//! Hub.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use hf_hub::api::sync::{Api, ApiRepo};
use tracing::{debug, info};

use crate::error::{Error, Result};

const SAFETENSORS_WEIGHTS: &str = "model.safetensors";
const PYTORCH_WEIGHTS: &str = "pytorch_model.bin";

enum Source {
    Local(PathBuf),
    Hub(Box<ApiRepo>),
}

/// A model repository: a directory on disk or a Hub repo id.
///
/// A model id naming an existing directory is read from disk; anything else
/// is treated as a Hub repo id and downloaded into the Hub cache on first
/// use.
pub struct ModelRepo {
    id: String,
    source: Source,
}

impl ModelRepo {
    pub fn open(model_id: &str) -> Result<Self> {
        let local = Path::new(model_id);
        let source = if local.is_dir() {
            debug!(path = %local.display(), "using local model directory");
            Source::Local(local.to_path_buf())
        } else {
            let api = Api::new()?;
            Source::Hub(Box::new(api.model(model_id.to_string())))
        };
        Ok(Self {
            id: model_id.to_string(),
            source,
        })
    }

    /// Path to a file in the repo, downloading it if needed.
    pub fn get(&self, filename: &str) -> Result<PathBuf> {
        match &self.source {
            Source::Local(dir) => {
                let path = dir.join(filename);
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(Error::NotFound {
                        kind: "model file",
                        name: path.display().to_string(),
                    })
                }
            }
            Source::Hub(repo) => {
                info!(model = %self.id, file = filename, "fetching model file");
                Ok(repo.get(filename)?)
            }
        }
    }

    /// Like [`get`](Self::get), but a missing file is not an error.
    pub fn get_optional(&self, filename: &str) -> Option<PathBuf> {
        match self.get(filename) {
            Ok(path) => Some(path),
            Err(e) => {
                debug!(model = %self.id, file = filename, error = %e, "optional model file unavailable");
                None
            }
        }
    }

    /// Weights file: safetensors when published, PyTorch pickle otherwise.
    pub fn weights(&self) -> Result<PathBuf> {
        match self.get(SAFETENSORS_WEIGHTS) {
            Ok(path) => Ok(path),
            Err(safetensors_err) => {
                debug!(model = %self.id, error = %safetensors_err, "no safetensors weights, trying {PYTORCH_WEIGHTS}");
                self.get(PYTORCH_WEIGHTS)
            }
        }
    }

    /// Read and parse a JSON file from the repo.
    pub fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        filename: &str,
    ) -> Result<T> {
        let raw = std::fs::read_to_string(self.get(filename)?)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Build a `VarBuilder` over a weights file, picking the loader by extension.
pub fn var_builder(weights: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    let is_safetensors = weights
        .extension()
        .is_some_and(|ext| ext == "safetensors");

    let vb = if is_safetensors {
        // SAFETY: the weights file is not modified while mapped; it lives in
        // the Hub cache or a model directory owned by the user.
        unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, device)?
        }
    } else {
        VarBuilder::from_pth(weights, DType::F32, device)?
    };
    Ok(vb)
}

/// Writes tiny randomly initialised BERT checkpoints for tests.
#[cfg(test)]
pub(crate) mod fixtures {
    use std::path::Path;

    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};
    use candle_transformers::models::bert::{BertModel, Config};
    use serde_json::{Map, Value, json};

    pub const HIDDEN_SIZE: usize = 8;
    pub const MAX_POSITIONS: usize = 64;

    const VOCAB: [&str; 20] = [
        "[PAD]", "[UNK]", "[CLS]", "[SEP]", "rust", "is", "a", "safe",
        "language", "what", "word", "the", "borrow", "checker", "memory",
        "ownership", "caf\u{e9}", "au", "lait", ".",
    ];

    /// Writes `config.json`, `tokenizer.json` and `model.safetensors` into
    /// `dir`. With `qa_head`, weights are laid out as a question-answering
    /// checkpoint (`bert.*` plus `qa_outputs`).
    pub fn write_tiny_bert(dir: &Path, qa_head: bool) {
        let config = json!({
            "vocab_size": VOCAB.len(),
            "hidden_size": HIDDEN_SIZE,
            "num_hidden_layers": 1,
            "num_attention_heads": 2,
            "intermediate_size": 16,
            "hidden_act": "gelu",
            "hidden_dropout_prob": 0.0,
            "max_position_embeddings": MAX_POSITIONS,
            "type_vocab_size": 2,
            "initializer_range": 0.02,
            "layer_norm_eps": 1e-12,
            "pad_token_id": 0,
            "position_embedding_type": "absolute",
            "use_cache": false,
            "classifier_dropout": null,
            "model_type": "bert"
        });
        std::fs::write(dir.join("config.json"), config.to_string()).unwrap();

        let vocab: Map<String, Value> = VOCAB
            .iter()
            .enumerate()
            .map(|(id, token)| (token.to_string(), json!(id)))
            .collect();
        let tokenizer = json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [],
            "normalizer": { "type": "Lowercase" },
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": {
                "type": "BertProcessing",
                "sep": ["[SEP]", 3],
                "cls": ["[CLS]", 2]
            },
            "decoder": null,
            "model": { "type": "WordLevel", "vocab": vocab, "unk_token": "[UNK]" }
        });
        std::fs::write(dir.join("tokenizer.json"), tokenizer.to_string()).unwrap();

        let config: Config = serde_json::from_value(config).unwrap();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        if qa_head {
            BertModel::load(vb.pp("bert"), &config).unwrap();
            candle_nn::linear(config.hidden_size, 2, vb.pp("qa_outputs")).unwrap();
        } else {
            BertModel::load(vb, &config).unwrap();
        }
        varmap.save(dir.join("model.safetensors")).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_directory_is_used_without_network() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("config.json"), r#"{"a": 1}"#).unwrap();

        let repo = ModelRepo::open(tmp.path().to_str().unwrap()).unwrap();
        assert_eq!(repo.get("config.json").unwrap(), tmp.path().join("config.json"));

        let value: serde_json::Value = repo.read_json("config.json").unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn missing_local_file_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = ModelRepo::open(tmp.path().to_str().unwrap()).unwrap();

        assert!(matches!(
            repo.get("tokenizer.json"),
            Err(Error::NotFound { kind: "model file", .. })
        ));
        assert!(repo.get_optional("1_Pooling/config.json").is_none());
    }

    #[test]
    fn weights_fall_back_to_pytorch_pickle() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(PYTORCH_WEIGHTS), b"").unwrap();
        let repo = ModelRepo::open(tmp.path().to_str().unwrap()).unwrap();
        assert_eq!(repo.weights().unwrap(), tmp.path().join(PYTORCH_WEIGHTS));

        std::fs::write(tmp.path().join(SAFETENSORS_WEIGHTS), b"").unwrap();
        assert_eq!(repo.weights().unwrap(), tmp.path().join(SAFETENSORS_WEIGHTS));
    }

    #[test]
    fn var_builder_reads_written_checkpoint() {
        let tmp = tempfile::tempdir().unwrap();
        fixtures::write_tiny_bert(tmp.path(), true);
        let repo = ModelRepo::open(tmp.path().to_str().unwrap()).unwrap();

        let vb = var_builder(&repo.weights().unwrap(), &Device::Cpu).unwrap();
        assert!(vb.contains_tensor("qa_outputs.weight"));
        assert!(vb.contains_tensor("bert.embeddings.word_embeddings.weight"));
    }
}
