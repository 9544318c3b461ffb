//! TOML configuration: the worker list plus the engine and prompt arenas.
//!
//! Workers reference engines and prompts by string handle; resolution
//! happens here and fails with the handle's name, never silently.

use crate::ai::engine::AiEngine;
use crate::error::{Result as SubgenResult, SubgenError};
use crate::worker::Worker;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Language of the audio, substituted into prompt placeholders.
    pub source_language: String,
    pub workers: Vec<Worker>,
    pub engines: BTreeMap<String, EngineConfig>,
    pub prompts: BTreeMap<String, String>,
}

/// One entry of the engine arena.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineConfig {
    Api(ApiEngineConfig),
    /// Copy/paste through a chatbot; prompts land in side files.
    Manual,
    Collection(CollectionEngineConfig),
}

/// An OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiEngineConfig {
    pub base_url: String,
    pub model: String,
    /// Key name looked up in the private config; `None` for keyless local
    /// endpoints.
    pub api_key_name: Option<String>,
    pub stream: bool,
    /// humantime format, e.g. "300s" or "5m".
    pub timeout: String,
    /// Check the model against `GET /models` before the first request.
    pub validate_model_name: bool,
    /// Extra body fields sent verbatim (temperature, reasoning flags, ...).
    pub request_extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for ApiEngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:10000/v1".to_string(),
            model: String::new(),
            api_key_name: None,
            stream: false,
            timeout: "5m".to_string(),
            validate_model_name: false,
            request_extra: serde_json::Map::new(),
        }
    }
}

impl ApiEngineConfig {
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(300))
    }
}

/// Ordered failover list over other engine handles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollectionEngineConfig {
    pub engines: Vec<String>,
    /// Cooldown after a 5xx.
    pub service_cooldown: String,
    /// Cooldown after a 429.
    pub quota_cooldown: String,
}

impl Default for CollectionEngineConfig {
    fn default() -> Self {
        Self {
            engines: Vec::new(),
            service_cooldown: "30s".to_string(),
            quota_cooldown: "10m".to_string(),
        }
    }
}

impl CollectionEngineConfig {
    pub fn service_cooldown(&self) -> Duration {
        parse_duration(&self.service_cooldown).unwrap_or(Duration::from_secs(30))
    }

    pub fn quota_cooldown(&self) -> Duration {
        parse_duration(&self.quota_cooldown).unwrap_or(Duration::from_secs(600))
    }
}

/// Accepts bare seconds or any `humantime` duration (`30s`, `5m`, `1h30m`).
fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    if let Ok(secs) = text.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    humantime::parse_duration(text).ok()
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/subgen/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("subgen")
            .join("config.toml")
    }

    /// Write a commented starter configuration.
    pub fn write_default(path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG)?;
        Ok(())
    }

    /// Every handle a worker references must resolve; every duration must
    /// parse. Run once after load so later lookups cannot surprise.
    pub fn validate(&self) -> SubgenResult<()> {
        for (name, engine) in &self.engines {
            match engine {
                EngineConfig::Api(api) => {
                    if parse_duration(&api.timeout).is_none() {
                        return Err(SubgenError::Config {
                            message: format!(
                                "engine '{name}': cannot parse timeout '{}'",
                                api.timeout
                            ),
                        });
                    }
                }
                EngineConfig::Collection(collection) => {
                    for field in [&collection.service_cooldown, &collection.quota_cooldown] {
                        if parse_duration(field).is_none() {
                            return Err(SubgenError::Config {
                                message: format!("engine '{name}': cannot parse cooldown '{field}'"),
                            });
                        }
                    }
                    for member in &collection.engines {
                        self.resolve_engine(member)?;
                    }
                }
                EngineConfig::Manual => {}
            }
        }
        for worker in &self.workers {
            if let Some(handle) = worker.engine_handle() {
                self.resolve_engine(handle)?;
            }
            for handle in worker.prompt_handles() {
                self.prompt_template(handle)?;
            }
            // Zero would let a model that only echoes finished rows keep the
            // request loop spinning forever.
            if let Some(options) = worker.ai_options()
                && options.min_items_to_continue == 0
            {
                return Err(SubgenError::Config {
                    message: format!(
                        "worker '{}': min_items_to_continue must be at least 1",
                        worker.full_id()
                    ),
                });
            }
        }
        Ok(())
    }

    /// Resolve an engine handle, flattening collections. A cycle through
    /// collections is reported as a config error rather than recursing
    /// forever.
    pub fn resolve_engine<'a>(&'a self, handle: &str) -> SubgenResult<AiEngine<'a>> {
        self.resolve_engine_inner(handle, &mut Vec::new())
    }

    fn resolve_engine_inner<'a>(
        &'a self,
        handle: &str,
        visiting: &mut Vec<String>,
    ) -> SubgenResult<AiEngine<'a>> {
        if visiting.iter().any(|v| v == handle) {
            return Err(SubgenError::Config {
                message: format!("engine collection cycle through '{handle}'"),
            });
        }
        let (name, engine) =
            self.engines
                .get_key_value(handle)
                .ok_or_else(|| SubgenError::UnresolvedHandle {
                    kind: "engine",
                    handle: handle.to_string(),
                })?;
        let name = name.as_str();
        match engine {
            EngineConfig::Api(config) => Ok(AiEngine::Api { name, config }),
            EngineConfig::Manual => Ok(AiEngine::Manual { name }),
            EngineConfig::Collection(config) => {
                visiting.push(handle.to_string());
                let members = config
                    .engines
                    .iter()
                    .map(|member| self.resolve_engine_inner(member, visiting))
                    .collect::<SubgenResult<Vec<_>>>()?;
                visiting.pop();
                Ok(AiEngine::Collection {
                    name,
                    config,
                    members,
                })
            }
        }
    }

    fn prompt_template(&self, handle: &str) -> SubgenResult<&str> {
        self.prompts
            .get(handle)
            .map(String::as_str)
            .ok_or(SubgenError::UnresolvedHandle {
                kind: "prompt",
                handle: handle.to_string(),
            })
    }

    /// A prompt with its language placeholders filled in.
    pub fn prompt(&self, handle: &str, target_language: &str) -> SubgenResult<String> {
        Ok(self
            .prompt_template(handle)?
            .replace("{source_language}", &self.source_language)
            .replace("{target_language}", target_language))
    }
}

/// API keys, kept out of the shareable config. `config.toml` pairs with
/// `config.private.toml` in the same directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PrivateConfig {
    pub api_keys: BTreeMap<String, String>,
}

impl PrivateConfig {
    pub fn path_for(config_path: &Path) -> PathBuf {
        let stem = config_path.file_stem().unwrap_or_default().to_string_lossy();
        config_path.with_file_name(format!("{stem}.private.toml"))
    }

    /// Missing file means no keys, not an error; engines needing a key then
    /// fail with a message naming it.
    pub fn load_for(config_path: &Path) -> anyhow::Result<Self> {
        let path = Self::path_for(config_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path)?;
        Ok(toml::from_str(&contents)?)
    }
}

const DEFAULT_CONFIG: &str = r#"# subgen configuration.
#
# Workers run in the declared order, once per invocation; a worker whose
# inputs are not ready is skipped and retried on the next run.

source_language = "ja"

[prompts]
transcribe-system = """
You transcribe {source_language} audio. Answer with the same JSON array you
were given, adding a "VoiceText" field to every object.
"""
translate-system = """
You translate {source_language} subtitles to {target_language}. Answer with
the same JSON array you were given, adding a "TranslatedText" field to every
object.
"""

[engines.local]
type = "api"
base_url = "http://localhost:10000/v1"
model = "my-local-model"
timeout = "5m"

[engines.chatbot]
type = "manual"

# [engines.failover]
# type = "collection"
# engines = ["local", "chatbot"]
# service_cooldown = "30s"
# quota_cooldown = "10m"

# Import manually prepared timings from <video>.timings.txt
# (tab-separated: start, end, text).
[[workers]]
type = "import_file"
transcription_id = "import"
suffix = ".timings.txt"

[[workers]]
type = "ai_transcribe"
transcription_id = "full"
engine = "local"
system_prompt = "transcribe-system"
timings_source = "import"
sources = ["import"]

[[workers]]
type = "ai_translate"
transcription_id = "full"
translation_id = "en"
language = "English"
engine = "chatbot"
system_prompt = "translate-system"
timings_source = "full"
sources = ["full"]

[workers.options]
produces = "TranslatedText"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_template_parses_and_validates() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.source_language, "ja");
        assert_eq!(config.workers.len(), 3);
        config.validate().unwrap();
    }

    #[test]
    fn unresolved_engine_handle_names_the_handle() {
        let config: Config = toml::from_str(
            r#"
            [[workers]]
            type = "ai_transcribe"
            transcription_id = "full"
            engine = "nope"
            timings_source = "import"
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("nope"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn zero_min_items_to_continue_is_rejected() {
        let config: Config = toml::from_str(
            r#"
            [engines.local]
            type = "api"
            model = "m"

            [[workers]]
            type = "ai_transcribe"
            transcription_id = "full"
            engine = "local"
            timings_source = "import"

            [workers.options]
            min_items_to_continue = 0
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_items_to_continue"));
        assert!(err.to_string().contains("full"));
    }

    #[test]
    fn collection_resolves_members_in_order() {
        let config: Config = toml::from_str(
            r#"
            [engines.a]
            type = "manual"
            [engines.b]
            type = "api"
            model = "m"
            [engines.both]
            type = "collection"
            engines = ["b", "a"]
            "#,
        )
        .unwrap();
        let engine = config.resolve_engine("both").unwrap();
        let AiEngine::Collection { members, .. } = engine else {
            panic!("expected collection");
        };
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].name(), "b");
        assert!(members[1].is_manual());
    }

    #[test]
    fn collection_cycle_is_a_config_error() {
        let config: Config = toml::from_str(
            r#"
            [engines.a]
            type = "collection"
            engines = ["a"]
            "#,
        )
        .unwrap();
        let err = config.resolve_engine("a").unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn prompt_placeholders_are_substituted() {
        let mut config = Config {
            source_language: "ja".into(),
            ..Config::default()
        };
        config.prompts.insert(
            "p".into(),
            "from {source_language} to {target_language}".into(),
        );
        assert_eq!(config.prompt("p", "English").unwrap(), "from ja to English");
    }

    #[test]
    fn bare_numbers_and_humantime_both_parse() {
        assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn private_config_sits_next_to_the_main_one() {
        assert_eq!(
            PrivateConfig::path_for(Path::new("/etc/subgen/config.toml")),
            PathBuf::from("/etc/subgen/config.private.toml")
        );
    }

    #[test]
    fn missing_private_config_means_no_keys() {
        let dir = tempfile::tempdir().unwrap();
        let keys = PrivateConfig::load_for(&dir.path().join("config.toml")).unwrap();
        assert!(keys.api_keys.is_empty());
    }
}
