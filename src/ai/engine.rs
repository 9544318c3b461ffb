//! Engine selection and failover.
//!
//! An engine is either a direct HTTP API, a manual copy/paste channel, or an
//! ordered collection that falls back to the next member when one is rate
//! limited or down. Cooldowns are tracked per engine name so a collection
//! does not hammer a member that just returned 429.

use crate::ai::api;
use crate::ai::request::AiRequest;
use crate::config::{ApiEngineConfig, CollectionEngineConfig};
use crate::error::{Result, SubgenError, TransportKind};
use crate::project::CostRecord;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// What came back from one engine round-trip.
///
/// A manual engine yields no message at all; the runner then parks the
/// prompt in a side file and waits for a later run.
#[derive(Debug)]
pub struct AiResponse {
    pub assistant_message: Option<String>,
    pub cost: Option<CostRecord>,
}

/// Per-engine backoff state, owned by the pipeline context rather than any
/// global, so it never leaks between invocations.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    until: HashMap<String, (TransportKind, Instant)>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining cooldown for `name`, if any. Expired entries are dropped.
    pub fn cooling(&mut self, name: &str) -> Option<(TransportKind, Duration)> {
        let (kind, until) = self.until.get(name).copied()?;
        let now = Instant::now();
        if until <= now {
            self.until.remove(name);
            return None;
        }
        Some((kind, until - now))
    }

    pub fn cool_down(&mut self, name: &str, kind: TransportKind, duration: Duration) {
        self.until
            .insert(name.to_string(), (kind, Instant::now() + duration));
    }
}

/// A resolved engine, borrowing its settings from the loaded config.
#[derive(Debug, Clone)]
pub enum AiEngine<'a> {
    Api {
        name: &'a str,
        config: &'a ApiEngineConfig,
    },
    Manual {
        name: &'a str,
    },
    Collection {
        name: &'a str,
        config: &'a CollectionEngineConfig,
        members: Vec<AiEngine<'a>>,
    },
}

impl<'a> AiEngine<'a> {
    pub fn name(&self) -> &str {
        match self {
            AiEngine::Api { name, .. }
            | AiEngine::Manual { name }
            | AiEngine::Collection { name, .. } => name,
        }
    }

    /// Whether a human has to answer out of band before work can continue.
    pub fn is_manual(&self) -> bool {
        matches!(self, AiEngine::Manual { .. })
    }

    /// Run one request through this engine.
    ///
    /// Transport failures inside a collection cool the failing member down
    /// and move on to the next; only when every member is cooling or failed
    /// does the collection itself report a transport error.
    pub fn execute(
        &self,
        request: &AiRequest,
        api_keys: &BTreeMap<String, String>,
        cooldowns: &mut CooldownTracker,
    ) -> Result<AiResponse> {
        match self {
            AiEngine::Manual { .. } => Ok(AiResponse {
                assistant_message: None,
                cost: None,
            }),
            AiEngine::Api { name, config } => {
                let key = match &config.api_key_name {
                    Some(key_name) => Some(api_keys.get(key_name).map(String::as_str).ok_or_else(
                        || SubgenError::Config {
                            message: format!(
                                "engine '{name}' needs api key '{key_name}' from the private config"
                            ),
                        },
                    )?),
                    None => None,
                };
                api::execute(name, config, key, request)
            }
            AiEngine::Collection {
                config, members, ..
            } => {
                let mut last_transport: Option<SubgenError> = None;
                for member in members {
                    if cooldowns.cooling(member.name()).is_some() {
                        continue;
                    }
                    match member.execute(request, api_keys, cooldowns) {
                        Ok(response) => return Ok(response),
                        Err(SubgenError::Transport { kind, message }) => {
                            let duration = match kind {
                                TransportKind::QuotaExhausted => config.quota_cooldown(),
                                _ => config.service_cooldown(),
                            };
                            cooldowns.cool_down(member.name(), kind, duration);
                            last_transport = Some(SubgenError::Transport { kind, message });
                        }
                        Err(other) => return Err(other),
                    }
                }
                Err(last_transport.unwrap_or_else(|| SubgenError::Transport {
                    kind: TransportKind::ServiceUnavailable,
                    message: format!(
                        "all engines of '{}' are cooling down, try again later",
                        self.name()
                    ),
                }))
            }
        }
    }
}
