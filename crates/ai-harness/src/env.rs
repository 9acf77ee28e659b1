//! API-key and region lookup from the process environment.

/// Environment variables consulted for a provider, in priority order.
pub fn api_key_env_vars(provider: &str) -> &'static [&'static str] {
    match provider {
        // OAuth tokens win over plain API keys.
        "anthropic" => &["ANTHROPIC_OAUTH_TOKEN", "ANTHROPIC_API_KEY"],
        "openai" => &["OPENAI_API_KEY"],
        "amazon-bedrock" => &["AWS_BEARER_TOKEN_BEDROCK"],
        "groq" => &["GROQ_API_KEY"],
        "xai" => &["XAI_API_KEY"],
        "openrouter" => &["OPENROUTER_API_KEY"],
        "cerebras" => &["CEREBRAS_API_KEY"],
        "mistral" => &["MISTRAL_API_KEY"],
        "deepseek" => &["DEEPSEEK_API_KEY"],
        _ => &[],
    }
}

/// Resolves the API key for `provider` from the environment.
pub fn get_env_api_key(provider: &str) -> Option<String> {
    lookup_api_key(provider, |key| std::env::var(key).ok())
}

pub(crate) fn lookup_api_key(
    provider: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    api_key_env_vars(provider)
        .iter()
        .filter_map(|key| lookup(key))
        .find(|value| !value.trim().is_empty())
}

pub(crate) const DEFAULT_AWS_REGION: &str = "us-east-1";

/// AWS region from `AWS_REGION` / `AWS_DEFAULT_REGION`, else `us-east-1`.
pub fn aws_region() -> String {
    lookup_region(|key| std::env::var(key).ok())
}

pub(crate) fn lookup_region(lookup: impl Fn(&str) -> Option<String>) -> String {
    ["AWS_REGION", "AWS_DEFAULT_REGION"]
        .iter()
        .filter_map(|key| lookup(key))
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_AWS_REGION.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_prefers_oauth_token() {
        let key = lookup_api_key("anthropic", |k| match k {
            "ANTHROPIC_OAUTH_TOKEN" => Some("sk-ant-oat-1".into()),
            "ANTHROPIC_API_KEY" => Some("sk-ant-api".into()),
            _ => None,
        });
        assert_eq!(key.as_deref(), Some("sk-ant-oat-1"));
    }

    #[test]
    fn blank_values_are_skipped() {
        let key = lookup_api_key("anthropic", |k| match k {
            "ANTHROPIC_OAUTH_TOKEN" => Some("  ".into()),
            "ANTHROPIC_API_KEY" => Some("sk-ant-api".into()),
            _ => None,
        });
        assert_eq!(key.as_deref(), Some("sk-ant-api"));
        assert_eq!(lookup_api_key("unknown", |_| Some("x".into())), None);
    }

    #[test]
    fn region_falls_back_to_default() {
        assert_eq!(lookup_region(|_| None), "us-east-1");
        assert_eq!(
            lookup_region(|k| (k == "AWS_DEFAULT_REGION").then(|| "eu-west-1".to_string())),
            "eu-west-1"
        );
    }
}
