use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub timeout: Duration,
    pub endpoints: Endpoints,
    pub session_file: PathBuf,
}

/// Paths of the calls the access layer issues itself, relative to `base_url`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub login: String,
    pub refresh: String,
    pub sessions: String,
    pub chat_stream: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: "auth/login".to_string(),
            refresh: "auth/refresh".to_string(),
            sessions: "chat/sessions".to_string(),
            chat_stream: "chat/stream".to_string(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("API not configured: create lexgate.yaml or set LEXGATE_API_URL.")]
    Missing,
    #[error("API configuration invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Missing => {
                "API not configured: create lexgate.yaml or set LEXGATE_API_URL.".to_string()
            }
            Self::Invalid(detail) => {
                format!("API not configured: {detail}. Update lexgate.yaml.")
            }
        }
    }
}

/// Values taken from the process environment that win over the file.
#[derive(Debug, Default, Clone)]
pub struct EnvOverrides {
    pub api_url: Option<String>,
    pub timeout_ms: Option<String>,
}

impl EnvOverrides {
    pub fn from_environment() -> Self {
        Self {
            api_url: std::env::var("LEXGATE_API_URL").ok(),
            timeout_ms: std::env::var("LEXGATE_TIMEOUT_MS").ok(),
        }
    }
}

impl ApiSettings {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let env = EnvOverrides::from_environment();
        let section = match locate_config_file() {
            Some(path) => {
                let contents = fs::read_to_string(&path).map_err(|err| {
                    ConfigError::Invalid(format!("failed to read {}: {err}", path.display()))
                })?;
                let config: LexgateConfig = serde_yaml::from_str(&contents)
                    .map_err(|err| ConfigError::Invalid(format!("invalid lexgate.yaml: {err}")))?;
                config
                    .api
                    .ok_or_else(|| ConfigError::Invalid("missing `api` section".to_string()))?
            }
            None if env.api_url.is_some() => ApiSection::default(),
            None => return Err(ConfigError::Missing),
        };
        resolve_api_settings(section, &env)
    }
}

fn resolve_api_settings(
    section: ApiSection,
    env: &EnvOverrides,
) -> Result<ApiSettings, ConfigError> {
    let base_url = env
        .api_url
        .clone()
        .or(section.base_url)
        .map(|url| url.trim().to_string())
        .unwrap_or_default();
    if base_url.is_empty() {
        return Err(ConfigError::Invalid("missing API base_url".to_string()));
    }

    let timeout_ms = match env.timeout_ms.as_deref() {
        Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
            ConfigError::Invalid(format!("LEXGATE_TIMEOUT_MS is not a number: {raw}"))
        })?,
        None => section.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
    };
    if timeout_ms == 0 {
        return Err(ConfigError::Invalid("timeout_ms must be positive".to_string()));
    }

    let session_file = section
        .session_file
        .map(PathBuf::from)
        .unwrap_or_else(default_session_file);

    Ok(ApiSettings {
        base_url,
        timeout: Duration::from_millis(timeout_ms),
        endpoints: section.endpoints,
        session_file,
    })
}

fn default_session_file() -> PathBuf {
    match BaseDirs::new() {
        Some(base) => base.config_dir().join("lexgate").join("session.json"),
        None => PathBuf::from("lexgate-session.json"),
    }
}

fn locate_config_file() -> Option<PathBuf> {
    lexgate_yaml_candidates()
        .into_iter()
        .find(|path| path.exists())
}

fn lexgate_yaml_candidates() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("lexgate.yaml")];
    if let Some(base) = BaseDirs::new() {
        let config_dir = base.config_dir().join("lexgate");
        paths.push(config_dir.join("lexgate.yaml"));
        paths.push(config_dir.join("lexgate.yml"));
        let home_dir = base.home_dir();
        paths.push(home_dir.join(".lexgate").join("lexgate.yaml"));
        paths.push(home_dir.join(".lexgate").join("lexgate.yml"));
    }
    paths
}

#[derive(Debug, Deserialize)]
struct LexgateConfig {
    api: Option<ApiSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiSection {
    base_url: Option<String>,
    timeout_ms: Option<u64>,
    session_file: Option<String>,
    #[serde(default)]
    endpoints: Endpoints,
}
