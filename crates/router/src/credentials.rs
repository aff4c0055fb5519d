//! Credential lookup for configured providers.
//!
//! An explicit `api_key` in the config wins; otherwise the provider's
//! conventional environment variable is consulted. Local inference servers
//! need no credential at all.

use helmsman_config::ProviderEntry;

/// What a chain entry authenticates with.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Key(String),
    NotRequired,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Key(_) => f.write_str("Key(***)"),
            Credential::NotRequired => f.write_str("NotRequired"),
        }
    }
}

/// Providers served from the local machine.
pub fn is_local(provider: &str) -> bool {
    matches!(provider, "ollama" | "vllm" | "llamacpp" | "lmstudio")
}

/// Environment variables checked for a provider's key, in order.
pub fn env_keys(provider: &str) -> Vec<String> {
    match provider {
        "openai" => vec!["OPENAI_API_KEY".into()],
        "anthropic" => vec!["ANTHROPIC_API_KEY".into()],
        "google" | "gemini" => vec![
            "GOOGLE_API_KEY".into(),
            "GEMINI_API_KEY".into(),
            "GOOGLE_GENERATIVE_AI_API_KEY".into(),
        ],
        other => vec![format!(
            "{}_API_KEY",
            other.to_ascii_uppercase().replace('-', "_")
        )],
    }
}

/// Resolve the credential for one entry. `None` means the entry is unusable.
pub fn resolve(
    entry: &ProviderEntry,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<Credential> {
    if let Some(key) = entry.api_key.as_ref().filter(|k| !k.is_empty()) {
        return Some(Credential::Key(key.clone()));
    }
    if let Some(key) = env_keys(&entry.provider)
        .iter()
        .find_map(|var| lookup(var).filter(|v| !v.trim().is_empty()))
    {
        return Some(Credential::Key(key));
    }
    is_local(&entry.provider).then_some(Credential::NotRequired)
}
