use std::collections::HashMap;

use async_trait::async_trait;

/// Authenticated operator identity as resolved by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorIdentity {
    pub org_id: String,
    pub family_name: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// None when the token is unknown or the session has lapsed upstream.
    async fn resolve(&self, token: &str) -> Option<OperatorIdentity>;
}

/// Static token table loaded from `OPERATOR_TOKENS`, formatted as
/// `token:org:FamilyName` entries separated by commas. Stands in for the
/// managed identity provider in self-hosted deployments.
#[derive(Clone, Default)]
pub struct EnvTokenIdentity {
    entries: HashMap<String, OperatorIdentity>,
}

impl EnvTokenIdentity {
    pub fn from_env() -> Self {
        let spec = std::env::var("OPERATOR_TOKENS").unwrap_or_default();
        Self::parse(&spec)
    }

    pub fn parse(spec: &str) -> Self {
        let mut entries = HashMap::new();
        for entry in spec.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let mut parts = entry.splitn(3, ':');
            let (Some(token), Some(org)) = (parts.next(), parts.next()) else {
                continue;
            };
            if token.is_empty() || org.is_empty() {
                continue;
            }
            entries.insert(
                token.to_string(),
                OperatorIdentity {
                    org_id: org.to_string(),
                    family_name: parts.next().unwrap_or("").to_string(),
                },
            );
        }
        Self { entries }
    }
}

#[async_trait]
impl IdentityProvider for EnvTokenIdentity {
    async fn resolve(&self, token: &str) -> Option<OperatorIdentity> {
        self.entries.get(token).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_token_entries_and_resolves() {
        let provider = EnvTokenIdentity::parse("tok-1:acme:Reyes, tok-2:globex:Okafor");
        let identity = provider.resolve("tok-1").await.unwrap();
        assert_eq!(identity.org_id, "acme");
        assert_eq!(identity.family_name, "Reyes");

        let identity = provider.resolve("tok-2").await.unwrap();
        assert_eq!(identity.org_id, "globex");

        assert!(provider.resolve("tok-3").await.is_none());
    }

    #[tokio::test]
    async fn malformed_entries_are_skipped() {
        let provider = EnvTokenIdentity::parse("no-org, :missing-token:X, tok:org");
        assert!(provider.resolve("no-org").await.is_none());
        let identity = provider.resolve("tok").await.unwrap();
        assert_eq!(identity.org_id, "org");
        assert_eq!(identity.family_name, "");
    }
}
