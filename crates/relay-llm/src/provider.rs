use serde::{Deserialize, Serialize};
use tracing::warn;

const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

const GROQ_DEFAULT_MODEL: &str = "groq/compound";
const OPENROUTER_DEFAULT_MODEL: &str = "arcee-ai/trinity-mini:free";

/// Supported upstream providers.
///
/// Both speak the OpenAI chat-completions shape, so adding a provider is one
/// more variant plus its `match` arms below. The session manager never
/// inspects this type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Groq,
    OpenRouter,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Groq => "groq",
            Self::OpenRouter => "openrouter",
        }
    }

    /// Default chat-completions endpoint for this provider.
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Self::Groq => GROQ_API_URL,
            Self::OpenRouter => OPENROUTER_API_URL,
        }
    }

    /// Default model id for this provider.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Groq => GROQ_DEFAULT_MODEL,
            Self::OpenRouter => OPENROUTER_DEFAULT_MODEL,
        }
    }

    /// Environment variable holding this provider's credential.
    pub fn credential_env_var(&self) -> &'static str {
        match self {
            Self::Groq => "GROQ_API_KEY",
            Self::OpenRouter => "OPENROUTER_API_KEY",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static provider configuration, resolved once at startup and immutable
/// for the process lifetime.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub endpoint: String,
    pub model: String,
    /// Bearer credential. May be empty; the request is still sent and the
    /// provider's 401 surfaces as a per-request dispatch failure.
    pub api_key: String,
}

impl ProviderConfig {
    /// Config for a provider with its default endpoint and model.
    pub fn for_kind(kind: ProviderKind, api_key: impl Into<String>) -> Self {
        Self {
            kind,
            endpoint: kind.default_endpoint().to_owned(),
            model: kind.default_model().to_owned(),
            api_key: api_key.into(),
        }
    }

    /// Resolve provider selection and credential from the environment.
    ///
    /// `API_CHOICE=groq` selects groq; any other value selects openrouter
    /// (with a warning when the value isn't `openrouter` either). A missing
    /// credential is a warning, not a failure; chat requests will surface
    /// the provider's rejection instead.
    pub fn from_env() -> Self {
        let choice = std::env::var("API_CHOICE").unwrap_or_else(|_| "groq".into());
        let kind = match choice.as_str() {
            "groq" => ProviderKind::Groq,
            "openrouter" => ProviderKind::OpenRouter,
            other => {
                warn!(api_choice = other, "unrecognized API_CHOICE, using openrouter");
                ProviderKind::OpenRouter
            }
        };

        let api_key = std::env::var(kind.credential_env_var()).unwrap_or_default();
        if api_key.is_empty() {
            warn!(
                provider = kind.as_str(),
                env_var = kind.credential_env_var(),
                "no credential configured; chat requests will fail upstream"
            );
        }

        Self::for_kind(kind, api_key)
    }
}
