use chatloop_core::DEFAULT_MAX_ROUNDS;
use chatloop_openai_model::{
    ConfigError as OpenAIConfigError, OpenAIConfig, OpenAIConfigBuilder,
};
use thiserror::Error;

/// Error returned when the environment holds an invalid configuration.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EnvConfigError {
    /// A required variable is not set.
    #[error("{0} environment variable is not set")]
    Missing(&'static str),
    /// A variable is set to a value that cannot be parsed.
    #[error("invalid value for {name}: {value:?}")]
    Invalid {
        /// The variable name.
        name: &'static str,
        /// The value as found in the environment.
        value: String,
    },
    /// The provider configuration was rejected.
    #[error(transparent)]
    Provider(#[from] OpenAIConfigError),
}

/// The configuration of a chat session, read from environment variables.
///
/// | Variable | Meaning |
/// |---|---|
/// | `OPENAI_API_KEY` | API key, required |
/// | `OPENAI_MODEL` | Model name, required |
/// | `OPENAI_ENDPOINT` | Full URL of the chat completion endpoint |
/// | `CHATLOOP_AUTO_RUN_TOOLS` | `0` or `false` to confirm every tool call |
/// | `CHATLOOP_MAX_ROUNDS` | Maximum rounds per user message |
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// The provider configuration.
    pub openai: OpenAIConfig,
    /// Whether tool calls run without confirmation.
    pub auto_run_tools: bool,
    /// Maximum rounds per user message.
    pub max_rounds: u32,
}

impl EnvConfig {
    /// Reads the configuration from the process environment.
    #[inline]
    pub fn from_env() -> Result<Self, EnvConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value
    /// of a variable if it is set.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, EnvConfigError> {
        let api_key = lookup("OPENAI_API_KEY")
            .ok_or(EnvConfigError::Missing("OPENAI_API_KEY"))?;
        let model = lookup("OPENAI_MODEL")
            .ok_or(EnvConfigError::Missing("OPENAI_MODEL"))?;

        let mut builder = OpenAIConfigBuilder::new()
            .with_api_key(api_key)
            .with_model(model);
        if let Some(endpoint) = lookup("OPENAI_ENDPOINT") {
            builder = builder.with_endpoint(endpoint);
        }
        let openai = builder.build()?;

        let auto_run_tools = match lookup("CHATLOOP_AUTO_RUN_TOOLS") {
            Some(value) => parse_bool(&value).ok_or(EnvConfigError::Invalid {
                name: "CHATLOOP_AUTO_RUN_TOOLS",
                value,
            })?,
            None => true,
        };
        let max_rounds = match lookup("CHATLOOP_MAX_ROUNDS") {
            Some(value) => match value.trim().parse() {
                Ok(max_rounds) if max_rounds > 0 => max_rounds,
                _ => {
                    return Err(EnvConfigError::Invalid {
                        name: "CHATLOOP_MAX_ROUNDS",
                        value,
                    });
                }
            },
            None => DEFAULT_MAX_ROUNDS,
        };

        debug!("loaded configuration: {openai:?}");
        Ok(Self {
            openai,
            auto_run_tools,
            max_rounds,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
