//! Token Minter (spec component 11): HMAC-signed bearer tokens with
//! namespace-scoped grants, following the scope request/response shape of
//! the Docker/OCI token auth spec.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::catalog::{Principal, Role, RESERVED_NAMESPACE};
use crate::error::{RegistryError, Result};

const TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

type HmacSha256 = Hmac<Sha256>;

/// A single `repository:<name>:<action>,...` scope request, parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeRequest {
    pub repository: String,
    pub actions: Vec<String>,
}

impl ScopeRequest {
    /// Parses `repository:<name>:<action>[,<action>...]`.
    pub fn parse(scope: &str) -> Option<Self> {
        let mut parts = scope.splitn(3, ':');
        let kind = parts.next()?;
        if kind != "repository" {
            return None;
        }
        let repository = parts.next()?.to_string();
        let actions = parts.next()?.split(',').map(str::to_string).collect();
        Some(ScopeRequest { repository, actions })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantedScope {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub access: Vec<GrantedScope>,
    pub exp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_in: u64,
}

pub struct TokenMinter {
    secret: Vec<u8>,
}

impl TokenMinter {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        TokenMinter { secret: secret.into() }
    }

    /// Grants the subset of requested actions the principal is entitled to,
    /// per §4.11's rules, and signs the resulting claims.
    pub fn mint(&self, principal: Option<&Principal>, scopes: &[ScopeRequest]) -> Result<TokenResponse> {
        let subject = principal.map(|p| p.username.clone()).unwrap_or_else(|| "anonymous".to_string());

        let mut access = Vec::new();
        if let Some(principal) = principal {
            for scope in scopes {
                let granted = self.grant_for(principal, &scope.repository, &scope.actions);
                if !granted.is_empty() {
                    access.push(GrantedScope {
                        kind: "repository".to_string(),
                        name: scope.repository.clone(),
                        actions: granted,
                    });
                }
            }
        }

        let exp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| RegistryError::Fatal(format!("clock error: {e}")))?
            + TOKEN_TTL;
        let claims = TokenClaims {
            sub: subject,
            access,
            exp: exp.as_secs(),
        };

        let token = self.sign(&claims)?;
        Ok(TokenResponse {
            token,
            expires_in: TOKEN_TTL.as_secs(),
        })
    }

    /// Exposed so the HTTP layer can compute a Basic-authenticated
    /// principal's grants directly, without a token round trip.
    pub(crate) fn grant_for(&self, principal: &Principal, repo_name: &str, requested: &[String]) -> Vec<String> {
        let allowed: Vec<&str> = if principal.role == Role::Admin {
            vec!["pull", "push", "delete"]
        } else if repo_name.starts_with(&format!("{}/", principal.username)) {
            vec!["pull", "push"]
        } else if repo_name.starts_with(&format!("{RESERVED_NAMESPACE}/")) {
            vec!["pull", "push"]
        } else {
            vec![]
        };
        requested
            .iter()
            .filter(|a| allowed.contains(&a.as_str()))
            .cloned()
            .collect()
    }

    fn sign(&self, claims: &TokenClaims) -> Result<String> {
        use base64::Engine as _;
        let payload = serde_json::to_vec(claims)?;
        let payload_b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&payload);

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| RegistryError::Fatal(format!("hmac key: {e}")))?;
        mac.update(payload_b64.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(signature);

        Ok(format!("{payload_b64}.{signature_b64}"))
    }

    /// Verifies a token's signature and expiry, returning its claims.
    pub fn verify(&self, token: &str) -> Result<TokenClaims> {
        use base64::Engine as _;
        let (payload_b64, signature_b64) = token
            .split_once('.')
            .ok_or(RegistryError::Unauthorized)?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| RegistryError::Fatal(format!("hmac key: {e}")))?;
        mac.update(payload_b64.as_bytes());
        let expected = mac.finalize().into_bytes();
        let expected_b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(expected);
        if expected_b64 != signature_b64 {
            return Err(RegistryError::Unauthorized);
        }

        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| RegistryError::Unauthorized)?;
        let claims: TokenClaims = serde_json::from_slice(&payload)?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| RegistryError::Fatal(format!("clock error: {e}")))?
            .as_secs();
        if claims.exp < now {
            return Err(RegistryError::Unauthorized);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> Principal {
        Principal { id: uuid::Uuid::new_v4(), username: "root".into(), role: Role::Admin }
    }

    fn user(username: &str) -> Principal {
        Principal { id: uuid::Uuid::new_v4(), username: username.into(), role: Role::User }
    }

    #[test]
    fn scope_request_parses() {
        let scope = ScopeRequest::parse("repository:alice/app:pull,push").unwrap();
        assert_eq!(scope.repository, "alice/app");
        assert_eq!(scope.actions, vec!["pull".to_string(), "push".to_string()]);
    }

    #[test]
    fn admin_gets_all_actions_on_any_repository() {
        let minter = TokenMinter::new(b"secret".to_vec());
        let scopes = vec![ScopeRequest::parse("repository:someone/else:pull,push,delete").unwrap()];
        let token = minter.mint(Some(&admin()), &scopes).unwrap();
        let claims = minter.verify(&token.token).unwrap();
        assert_eq!(claims.access[0].actions.len(), 3);
    }

    #[test]
    fn user_gets_pull_push_on_own_namespace_only() {
        let minter = TokenMinter::new(b"secret".to_vec());
        let alice = user("alice");
        let scopes = vec![
            ScopeRequest::parse("repository:alice/app:pull,push,delete").unwrap(),
            ScopeRequest::parse("repository:bob/app:pull,push").unwrap(),
        ];
        let token = minter.mint(Some(&alice), &scopes).unwrap();
        let claims = minter.verify(&token.token).unwrap();
        assert_eq!(claims.access.len(), 1);
        assert_eq!(claims.access[0].name, "alice/app");
        assert_eq!(claims.access[0].actions, vec!["pull".to_string(), "push".to_string()]);
    }

    #[test]
    fn library_namespace_grants_legacy_public_access() {
        let minter = TokenMinter::new(b"secret".to_vec());
        let alice = user("alice");
        let scopes = vec![ScopeRequest::parse("repository:library/nginx:pull,push").unwrap()];
        let token = minter.mint(Some(&alice), &scopes).unwrap();
        let claims = minter.verify(&token.token).unwrap();
        assert_eq!(claims.access[0].actions, vec!["pull".to_string(), "push".to_string()]);
    }

    #[test]
    fn anonymous_gets_no_access() {
        let minter = TokenMinter::new(b"secret".to_vec());
        let scopes = vec![ScopeRequest::parse("repository:library/nginx:pull").unwrap()];
        let token = minter.mint(None, &scopes).unwrap();
        let claims = minter.verify(&token.token).unwrap();
        assert_eq!(claims.sub, "anonymous");
        assert!(claims.access.is_empty());
    }

    #[test]
    fn tampered_token_fails_verification() {
        let minter = TokenMinter::new(b"secret".to_vec());
        let token = minter.mint(Some(&admin()), &[]).unwrap();
        let mut tampered = token.token.clone();
        tampered.push('x');
        assert!(minter.verify(&tampered).is_err());
    }
}
