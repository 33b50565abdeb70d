use candle_core::Device;

use crate::{
    answer::{AnswerExtractor, AnswerReader, AnswerSpan},
    config_db::ConfigDb,
    embedding::{Embedder, SentenceEncoder},
    error::Result,
};

pub const DEFAULT_EMBED_MODEL: &str =
    "sentence-transformers/multi-qa-MiniLM-L6-cos-v1";
pub const DEFAULT_QA_MODEL: &str =
    "google-bert/bert-large-uncased-whole-word-masking-finetuned-squad";

pub const EMBED_MODEL_ENV_VAR: &str = "DOCSEEK_EMBED_MODEL";
pub const QA_MODEL_ENV_VAR: &str = "DOCSEEK_QA_MODEL";

pub const EMBED_MODEL_SETTING: &str = "embed_model";
pub const QA_MODEL_SETTING: &str = "qa_model";

/// The two models docseek runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    Embed,
    Qa,
}

impl ModelRole {
    pub const ALL: [ModelRole; 2] = [ModelRole::Embed, ModelRole::Qa];

    pub fn env_var(self) -> &'static str {
        match self {
            ModelRole::Embed => EMBED_MODEL_ENV_VAR,
            ModelRole::Qa => QA_MODEL_ENV_VAR,
        }
    }

    pub fn setting_key(self) -> &'static str {
        match self {
            ModelRole::Embed => EMBED_MODEL_SETTING,
            ModelRole::Qa => QA_MODEL_SETTING,
        }
    }

    pub fn default_id(self) -> &'static str {
        match self {
            ModelRole::Embed => DEFAULT_EMBED_MODEL,
            ModelRole::Qa => DEFAULT_QA_MODEL,
        }
    }
}

impl std::fmt::Display for ModelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelRole::Embed => f.write_str("embed"),
            ModelRole::Qa => f.write_str("qa"),
        }
    }
}

/// Where a resolved model id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSource {
    Flag,
    Env,
    Setting,
    Default,
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModelSource::Flag => "command-line flag",
            ModelSource::Env => "environment",
            ModelSource::Setting => "config",
            ModelSource::Default => "default",
        };
        f.write_str(s)
    }
}

/// Pick a model id: explicit flag, then environment, then stored setting,
/// then the built-in default. Blank values are ignored.
///
/// # Examples
///
/// ```
/// use docseek::model_manager::{resolve_model_id, ModelSource};
///
/// let (id, source) =
///     resolve_model_id(None, Some("env/model".into()), Some("db/model".into()), "default");
/// assert_eq!(id, "env/model");
/// assert_eq!(source, ModelSource::Env);
/// ```
pub fn resolve_model_id(
    explicit: Option<&str>,
    env: Option<String>,
    stored: Option<String>,
    default: &str,
) -> (String, ModelSource) {
    let present = |s: &str| !s.trim().is_empty();

    if let Some(id) = explicit.filter(|s| present(s)) {
        return (id.to_string(), ModelSource::Flag);
    }
    if let Some(id) = env.filter(|s| present(s)) {
        return (id, ModelSource::Env);
    }
    if let Some(id) = stored.filter(|s| present(s)) {
        return (id, ModelSource::Setting);
    }
    (default.to_string(), ModelSource::Default)
}

/// Resolve the model id for `role` against the process environment and the
/// settings database.
pub fn resolve_role(
    role: ModelRole,
    explicit: Option<&str>,
    config_db: Option<&ConfigDb>,
) -> Result<(String, ModelSource)> {
    let stored = match config_db {
        Some(db) => db.get_setting(role.setting_key())?,
        None => None,
    };
    Ok(resolve_model_id(
        explicit,
        std::env::var(role.env_var()).ok(),
        stored,
        role.default_id(),
    ))
}

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
pub fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// Owns the embedding model and the answer reader, loading each on first use.
pub struct ModelManager {
    embed_model_id: String,
    qa_model_id: String,
    device: Device,
    encoder: Option<SentenceEncoder>,
    reader: Option<AnswerReader>,
}

impl ModelManager {
    /// Creates a `ModelManager` with explicit model ids, bypassing
    /// environment and settings resolution.
    pub fn with_model_ids(embed_model_id: String, qa_model_id: String) -> Self {
        Self {
            embed_model_id,
            qa_model_id,
            device: default_device(),
            encoder: None,
            reader: None,
        }
    }

    /// Creates a `ModelManager` whose model ids come from the CLI flags, the
    /// `DOCSEEK_EMBED_MODEL` / `DOCSEEK_QA_MODEL` variables, the settings
    /// database, or the defaults, in that order.
    pub fn resolve(
        config_db: Option<&ConfigDb>,
        embed_flag: Option<&str>,
        qa_flag: Option<&str>,
    ) -> Result<Self> {
        let (embed, _) = resolve_role(ModelRole::Embed, embed_flag, config_db)?;
        let (qa, _) = resolve_role(ModelRole::Qa, qa_flag, config_db)?;
        Ok(Self::with_model_ids(embed, qa))
    }

    pub fn embed_model_id(&self) -> &str {
        &self.embed_model_id
    }

    pub fn qa_model_id(&self) -> &str {
        &self.qa_model_id
    }

    pub fn is_encoder_loaded(&self) -> bool {
        self.encoder.is_some()
    }

    pub fn is_reader_loaded(&self) -> bool {
        self.reader.is_some()
    }

    fn encoder(&mut self) -> Result<&mut SentenceEncoder> {
        let encoder = match self.encoder.take() {
            Some(encoder) => encoder,
            None => SentenceEncoder::load(&self.embed_model_id, &self.device)?,
        };
        Ok(self.encoder.insert(encoder))
    }

    fn reader(&mut self) -> Result<&mut AnswerReader> {
        let reader = match self.reader.take() {
            Some(reader) => reader,
            None => AnswerReader::load(&self.qa_model_id, &self.device)?,
        };
        Ok(self.reader.insert(reader))
    }
}

impl Embedder for ModelManager {
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.encoder()?.embed(texts)
    }
}

impl AnswerExtractor for ModelManager {
    fn extract(
        &mut self,
        question: &str,
        passage: &str,
    ) -> Result<Option<AnswerSpan>> {
        self.reader()?.extract(question, passage)
    }
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("embed_model_id", &self.embed_model_id)
            .field("qa_model_id", &self.qa_model_id)
            .field("encoder_loaded", &self.is_encoder_loaded())
            .field("reader_loaded", &self.is_reader_loaded())
            .finish_non_exhaustive()
    }
}
