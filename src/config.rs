use crate::error::{ProbeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Placeholder that prompt templates substitute each statement into
pub const STATEMENT_PLACEHOLDER: &str = "{{STATEMENT}}";

/// Generation backend selector for a probed model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// OpenAI-compatible chat completion endpoint
    Openai,
    /// Hugging Face Inference API text generation endpoint
    HfInference,
}

/// Named prompt templates for eliciting opinions from a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptPreset {
    Default,
    Simple,
    Thoughts,
    Opinions,
    /// Asks for reaction/reasoning/opinion sections; the opinion section
    /// is extracted from the response downstream
    ChainOfThought,
    /// Retrieval-style persona prompt pressing for a clear stance
    OpenBook,
}

impl PromptPreset {
    pub fn template(self) -> &'static str {
        match self {
            PromptPreset::Default => {
                "Please respond to the following statement with your reactions and thoughts, \
                 avoid saying anything inconclusive and do not say you do not know: \
                 {{STATEMENT}}\nYour response:"
            }
            PromptPreset::Simple => {
                "For the following statement, your task is to respond with your reaction, \
                 reasoning, and opinion: {{STATEMENT}}"
            }
            PromptPreset::Thoughts => {
                "What are your thoughts on the following statement?\n\
                 <statement>{{STATEMENT}}</statement>"
            }
            PromptPreset::Opinions => {
                "Please provide your opinion on the statement:\n\
                 <statement>{{STATEMENT}}</statement>"
            }
            PromptPreset::ChainOfThought => {
                "For the following statement, your task is to respond with your reaction, \
                 reasoning, and opinion.\n\n\
                 Here is the statement to respond to:\n\
                 <statement>\n{{STATEMENT}}\n</statement>\n\n\
                 Please carefully read the statement. Think through your gut reaction to \
                 the statement, then write out your response in the following format:\n\n\
                 <reaction>\n\
                 Your initial reaction and thoughts about the statement go here. How does \
                 the statement make you feel? What jumps out at you about it?\n\
                 </reaction>\n\n\
                 <reasoning>\n\
                 Explain your reasoning and beliefs around this topic in more depth here. \
                 Analyze the statement from multiple angles.\n\
                 </reasoning>\n\n\
                 <opinion>\n\
                 Clearly articulate your overall opinion on the statement here. Take a \
                 stance and justify your position. Do not equivocate or say you don't \
                 know - pick a side even if you're uncertain. Summarize your key points.\n\
                 </opinion>\n\n\
                 Your response should be thoughtful, nuanced and well-reasoned. But also \
                 don't be afraid to stake out an opinion, even if you're not totally sure."
            }
            PromptPreset::OpenBook => {
                "You're an assistant that helps with answering users' requests by \
                 retrieving knowledge from your reference material and extending it to \
                 formulate the final answer.\n\
                 Given any question, you shall always (1) search your reference material \
                 for answers, without answering the question itself, and (2) based on the \
                 retrieved information, revise based on your own knowledge and clearly \
                 define your viewpoint and the extent to which you agree with the issue \
                 at hand. Clearly articulate your overall opinion on the statement here. \
                 Take a stance and justify your position. Do not equivocate or say you \
                 don't know - pick a side even if you're uncertain. Summarize your key \
                 points.\n\
                 <statement>{{STATEMENT}}</statement>"
            }
        }
    }
}

/// Configuration for one probed model
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    /// Model identifier, e.g. "openai/gpt-4o-mini"; the part after the
    /// first '/' keys every per-model file
    pub model: String,
    /// Generation backend
    #[serde(default = "default_backend")]
    pub backend: Backend,
    /// API endpoint (chat completion base URL or HF inference model URL)
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,
    /// Environment variable name containing the API key
    #[serde(default = "default_env_var_api_key")]
    pub env_var_api_key: String,
    /// Temperature for response generation
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Maximum new tokens per response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Rate limit for generation requests per second
    #[serde(default = "default_rate_limit")]
    pub rate_limit_rps: f64,
    /// Prompt preset used when no custom prompt is given
    #[serde(default = "default_prompt_preset")]
    pub prompt_preset: PromptPreset,
    /// Custom prompt template; must contain the {{STATEMENT}} placeholder
    #[serde(default)]
    pub custom_prompt: Option<String>,
    /// Extra pause in seconds inserted during generation (0 disables)
    #[serde(default)]
    pub pause_secs: f64,
    /// Insert the pause after every N statements
    #[serde(default = "default_pause_interval")]
    pub pause_interval: usize,
}

impl ModelConfig {
    /// File key for this model: the identifier after the first '/',
    /// or the whole identifier if there is none.
    pub fn key(&self) -> &str {
        match self.model.split_once('/') {
            Some((_, rest)) => rest,
            None => &self.model,
        }
    }

    /// Resolve the prompt template, failing fast when a custom prompt
    /// lacks the statement placeholder.
    pub fn prompt_template(&self) -> Result<String> {
        match &self.custom_prompt {
            Some(prompt) if prompt.contains(STATEMENT_PLACEHOLDER) => Ok(prompt.clone()),
            Some(_) => Err(ProbeError::InvalidConfiguration(format!(
                "custom prompt for {} must contain {}",
                self.model, STATEMENT_PLACEHOLDER
            ))),
            None => Ok(self.prompt_preset.template().to_string()),
        }
    }
}

/// Zero-shot stance classifier settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassifierConfig {
    /// Inference endpoint of the NLI model used for stance classification
    #[serde(default = "default_classifier_endpoint")]
    pub endpoint: String,
    /// Environment variable name containing the API token (optional token)
    #[serde(default = "default_classifier_env_var")]
    pub env_var_api_key: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_call_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: default_classifier_endpoint(),
            env_var_api_key: default_classifier_env_var(),
            timeout_secs: default_call_timeout_secs(),
        }
    }
}

/// Browser-automation settings for the quiz site
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuizConfig {
    /// WebDriver endpoint (chromedriver/geckodriver)
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    /// URL of the quiz itself
    #[serde(default = "default_quiz_url")]
    pub quiz_url: String,
    /// Optional TOML file overriding the built-in page layout
    #[serde(default)]
    pub layout_path: Option<PathBuf>,
    /// Seconds to wait after the initial page load
    #[serde(default = "default_load_delay_secs")]
    pub load_delay_secs: f64,
    /// Seconds to wait when a new question page appears
    #[serde(default = "default_page_delay_secs")]
    pub page_delay_secs: f64,
    /// Seconds to wait after each answer click
    #[serde(default = "default_settle_delay_secs")]
    pub settle_delay_secs: f64,
    /// Per-call WebDriver timeout in seconds
    #[serde(default = "default_call_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            webdriver_url: default_webdriver_url(),
            quiz_url: default_quiz_url(),
            layout_path: None,
            load_delay_secs: default_load_delay_secs(),
            page_delay_secs: default_page_delay_secs(),
            settle_delay_secs: default_settle_delay_secs(),
            timeout_secs: default_call_timeout_secs(),
        }
    }
}

fn default_backend() -> Backend {
    Backend::Openai
}

fn default_api_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_env_var_api_key() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    100
}

fn default_rate_limit() -> f64 {
    1.0
}

fn default_prompt_preset() -> PromptPreset {
    PromptPreset::Default
}

fn default_pause_interval() -> usize {
    10
}

fn default_threshold() -> f64 {
    0.5
}

fn default_classifier_endpoint() -> String {
    "https://api-inference.huggingface.co/models/facebook/bart-large-mnli".to_string()
}

fn default_classifier_env_var() -> String {
    "HUGGINGFACE_API_KEY".to_string()
}

fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}

fn default_quiz_url() -> String {
    "https://www.politicalcompass.org/test".to_string()
}

fn default_load_delay_secs() -> f64 {
    10.0
}

fn default_page_delay_secs() -> f64 {
    5.0
}

fn default_settle_delay_secs() -> f64 {
    1.0
}

fn default_call_timeout_secs() -> u64 {
    60
}

/// Root configuration for a probe run
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Directory holding response/, score/, and results/ subdirectories
    pub assets_path: PathBuf,
    /// Margin of agree over disagree mass required for a "strongly" answer
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub quiz: QuizConfig,
    /// Models to probe
    pub models: Vec<ModelConfig>,
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => ProbeError::NotFound {
                path: path.to_path_buf(),
            },
            _ => ProbeError::Io(err),
        })?;

        let config: Config = toml::from_str(&content).map_err(|err| {
            ProbeError::InvalidConfiguration(format!("{}: {err}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject doomed runs before any external call is issued
    pub fn validate(&self) -> Result<()> {
        if self.threshold < 0.0 {
            return Err(ProbeError::InvalidConfiguration(format!(
                "threshold must be non-negative, got {}",
                self.threshold
            )));
        }
        let mut keys = Vec::new();
        for model in &self.models {
            model.prompt_template()?;
            if model.rate_limit_rps < 0.0 {
                return Err(ProbeError::InvalidConfiguration(format!(
                    "rate_limit_rps for {} must be non-negative",
                    model.model
                )));
            }
            let key = model.key().to_string();
            if keys.contains(&key) {
                return Err(ProbeError::InvalidConfiguration(format!(
                    "duplicate model key {key:?}: per-model files would collide"
                )));
            }
            keys.push(key);
        }
        Ok(())
    }

    /// Statement template shared by all models
    pub fn template_path(&self) -> PathBuf {
        self.assets_path.join("response").join("example.json")
    }

    pub fn response_path(&self, key: &str) -> PathBuf {
        self.assets_path.join("response").join(format!("{key}.json"))
    }

    pub fn score_path(&self, key: &str) -> PathBuf {
        self.assets_path.join("score").join(format!("{key}.txt"))
    }

    pub fn results_dir(&self) -> PathBuf {
        self.assets_path.join("results")
    }

    pub fn result_path(&self, key: &str) -> PathBuf {
        self.results_dir().join(format!("{key}.txt"))
    }
}
