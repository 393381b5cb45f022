use std::{
    env, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, anyhow};
use serde::Deserialize;
use tracing::info;

const DEFAULT_CONFIG_PATH: &str = "config/app_config.toml";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
const DEFAULT_TIMEOUT_SECONDS: u64 = 300;
const DEFAULT_CLIENT_PROMPT: &str = "You are a helpful assistant.";

const DEFAULT_VISION_MODEL: &str = "unsloth/gemma-3-4b-it-GGUF";
const DEFAULT_VISION_URL: &str = "http://localhost:8082/v1";
const DEFAULT_IMAGE_MODEL: &str = "unsloth/Qwen-Image-Edit-2511-GGUF";
const DEFAULT_IMAGE_URL: &str = "http://localhost:8083/v1";
const DEFAULT_IMAGE_KEY_ENV: &str = "IMAGE_API_KEY";

const VALIDATE_IMAGE_PREAMBLE: &str = "You are a helpful assistant which validates if an image is showing an indoor environment like a room, office, or living space.";
const VALIDATE_TEXT_PREAMBLE: &str = "You are a helpful assistant which validates if the user request is relevant and possible for the image properly.";
const DESCRIPTOR_PREAMBLE: &str = "You are a helpful assistant who decides which are the best Christmas decorations to add to the given image.";
const DECORATOR_PREAMBLE: &str = "You are a helpful assistant who adds the best Christmas decorations to the given image.";

/// Connection settings for one OpenAI-compatible endpoint.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    pub system_prompt: String,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub uploads_dir: PathBuf,
    pub max_upload_bytes: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct PipelineConfig {
    /// Reject the request when a gate fails. When off, failures are only logged.
    pub enforce_validation: bool,
    /// Ask the describer agent for a decoration plan before generating.
    pub plan_decorations: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enforce_validation: true,
            plan_decorations: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AgentPrompts {
    pub validate_image: String,
    pub validate_text: String,
    pub decorator_descriptor: String,
    pub decorator: String,
}

impl Default for AgentPrompts {
    fn default() -> Self {
        Self {
            validate_image: VALIDATE_IMAGE_PREAMBLE.to_string(),
            validate_text: VALIDATE_TEXT_PREAMBLE.to_string(),
            decorator_descriptor: DESCRIPTOR_PREAMBLE.to_string(),
            decorator: DECORATOR_PREAMBLE.to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub vision: ClientConfig,
    pub image: ClientConfig,
    pub agents: AgentPrompts,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let (config_path, explicit) = match env::var("APP_CONFIG_PATH") {
            Ok(path) => (PathBuf::from(path), true),
            Err(_) => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        let file_config = if config_path.exists() {
            read_file_config(&config_path)?
        } else if explicit {
            return Err(anyhow!("config file {:?} does not exist", config_path));
        } else {
            info!(path = ?config_path, "no config file found, using built-in defaults");
            FileConfig::default()
        };

        Self::from_file(file_config, |key| env::var(key).ok())
    }

    /// Parses a TOML document, resolving env-backed values through `lookup`.
    pub fn from_toml_str(
        contents: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let file_config: FileConfig = toml::from_str(contents).context("failed to parse config")?;
        Self::from_file(file_config, lookup)
    }

    fn from_file(
        file_config: FileConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let server = file_config.server.unwrap_or_default().into_domain(&lookup)?;

        let clients = file_config.clients.unwrap_or_default();
        let vision = clients.vision.unwrap_or_default().into_domain(
            DEFAULT_VISION_MODEL,
            DEFAULT_VISION_URL,
            None,
            &lookup,
        );
        let image = clients.image.unwrap_or_default().into_domain(
            DEFAULT_IMAGE_MODEL,
            DEFAULT_IMAGE_URL,
            Some(DEFAULT_IMAGE_KEY_ENV),
            &lookup,
        );

        let agents = file_config.agents.unwrap_or_default().into_domain();

        let pipeline = file_config
            .pipeline
            .map(|section| section.into_domain())
            .unwrap_or_default();

        Ok(Self {
            server,
            vision,
            image,
            agents,
            pipeline,
        })
    }
}

fn read_file_config(path: &Path) -> anyhow::Result<FileConfig> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("failed to read config {:?}", path))?;
    toml::from_str(&contents).with_context(|| format!("failed to parse config {:?}", path))
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: Option<FileServerConfig>,
    #[serde(default)]
    clients: Option<FileClients>,
    #[serde(default)]
    agents: Option<FileAgentPrompts>,
    #[serde(default)]
    pipeline: Option<FilePipelineConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct FileServerConfig {
    #[serde(default)]
    bind_addr: Option<String>,
    #[serde(default)]
    uploads_dir: Option<String>,
    #[serde(default)]
    max_upload_bytes: Option<usize>,
}

impl FileServerConfig {
    fn into_domain(self, lookup: &impl Fn(&str) -> Option<String>) -> anyhow::Result<ServerConfig> {
        let bind_addr_str = self
            .bind_addr
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr_str
            .parse::<SocketAddr>()
            .with_context(|| format!("failed to parse server.bind_addr: {}", bind_addr_str))?;

        // UPLOADS_DIR beats the file value.
        let uploads_dir = if let Some(dir) = lookup("UPLOADS_DIR").filter(|dir| !dir.is_empty()) {
            PathBuf::from(dir)
        } else if let Some(dir) = self.uploads_dir {
            PathBuf::from(dir)
        } else {
            env::current_dir()?.join("uploads")
        };

        Ok(ServerConfig {
            bind_addr,
            uploads_dir,
            max_upload_bytes: self
                .max_upload_bytes
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES)
                .max(1024),
        })
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileClients {
    #[serde(default)]
    vision: Option<FileClientConfig>,
    #[serde(default)]
    image: Option<FileClientConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct FileClientConfig {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    api_key_env: Option<String>,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

impl FileClientConfig {
    fn into_domain(
        self,
        default_model: &str,
        default_url: &str,
        default_key_env: Option<&str>,
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> ClientConfig {
        let key_env = self.api_key_env.as_deref().or(default_key_env);
        let api_key = self
            .api_key
            .or_else(|| key_env.and_then(lookup))
            .unwrap_or_default();

        ClientConfig {
            model: self.model.unwrap_or_else(|| default_model.to_string()),
            base_url: self.base_url.unwrap_or_else(|| default_url.to_string()),
            api_key,
            system_prompt: self
                .system_prompt
                .unwrap_or_else(|| DEFAULT_CLIENT_PROMPT.to_string()),
            timeout: Duration::from_secs(
                self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS).max(1),
            ),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileAgentPrompts {
    #[serde(default)]
    validate_image: Option<String>,
    #[serde(default)]
    validate_text: Option<String>,
    #[serde(default)]
    decorator_descriptor: Option<String>,
    #[serde(default)]
    decorator: Option<String>,
}

impl FileAgentPrompts {
    fn into_domain(self) -> AgentPrompts {
        let defaults = AgentPrompts::default();
        AgentPrompts {
            validate_image: self.validate_image.unwrap_or(defaults.validate_image),
            validate_text: self.validate_text.unwrap_or(defaults.validate_text),
            decorator_descriptor: self
                .decorator_descriptor
                .unwrap_or(defaults.decorator_descriptor),
            decorator: self.decorator.unwrap_or(defaults.decorator),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct FilePipelineConfig {
    #[serde(default)]
    enforce_validation: Option<bool>,
    #[serde(default)]
    plan_decorations: Option<bool>,
}

impl FilePipelineConfig {
    fn into_domain(self) -> PipelineConfig {
        let defaults = PipelineConfig::default();
        PipelineConfig {
            enforce_validation: self
                .enforce_validation
                .unwrap_or(defaults.enforce_validation),
            plan_decorations: self.plan_decorations.unwrap_or(defaults.plan_decorations),
        }
    }
}
