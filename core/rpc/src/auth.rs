// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Authentication and authorization interceptors.
//!
//! Both are thin interceptors over pluggable providers. Authentication
//! verifies the `auth-token` request header and stores the resulting
//! principal in the invocation context; authorization checks the
//! principal's granted authorities against the required set.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use conduit_bus::Message;

use crate::codec;
use crate::context::{InvocationContext, PRINCIPAL_ATTRIBUTE};
use crate::fault::Fault;
use crate::interceptor::{InterceptorHolder, ServiceInterceptor};

/// Request header carrying the caller's credential.
pub const AUTH_TOKEN_HEADER: &str = "auth-token";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    TokenInvalid(String),

    #[error("provider failure: {0}")]
    Provider(String),
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub subject: String,
}

impl Principal {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
        }
    }
}

/// Verifies credentials.
#[async_trait]
pub trait AuthnProvider: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Principal, AuthError>;
}

/// Resolves the authorities granted to a principal.
#[async_trait]
pub trait AuthzProvider: Send + Sync {
    async fn authorizations(&self, principal: &Principal) -> Result<HashSet<String>, AuthError>;
}

/// Interceptor verifying every request before the service is invoked.
/// Missing or invalid credentials fail with 401, provider failures with
/// 500.
pub struct AuthenticationInterceptor {
    provider: Arc<dyn AuthnProvider>,
}

impl AuthenticationInterceptor {
    pub fn new(provider: Arc<dyn AuthnProvider>) -> Self {
        Self { provider }
    }

    /// Wrap in a holder with authentication priority.
    pub fn holder(provider: Arc<dyn AuthnProvider>) -> InterceptorHolder {
        InterceptorHolder::authentication(Arc::new(Self::new(provider)))
    }
}

#[async_trait]
impl ServiceInterceptor for AuthenticationInterceptor {
    async fn before(&self, ctx: &InvocationContext, _message: &Message) -> Result<(), Fault> {
        let token = ctx
            .header(AUTH_TOKEN_HEADER)
            .ok_or_else(|| Fault::new(401, "no auth-token header"))?;

        match self.provider.authenticate(token).await {
            Ok(principal) => {
                let value = codec::to_value(&principal)
                    .map_err(|e| Fault::new(500, e.to_string()))?;
                ctx.set_attribute(PRINCIPAL_ATTRIBUTE, value);
                Ok(())
            }
            Err(AuthError::TokenInvalid(message)) => Err(Fault::new(401, message)),
            Err(err) => Err(Fault::new(500, err.to_string())),
        }
    }
}

/// Interceptor checking required authorities once a principal has been
/// established. Passes through when no principal is present or nothing is
/// required; any missing authority fails with 403.
pub struct AuthorizationInterceptor {
    provider: Arc<dyn AuthzProvider>,
    required: HashSet<String>,
}

impl AuthorizationInterceptor {
    pub fn new(provider: Arc<dyn AuthzProvider>) -> Self {
        Self {
            provider,
            required: HashSet::new(),
        }
    }

    /// Add a required authority.
    pub fn require(mut self, authority: impl Into<String>) -> Self {
        self.required.insert(authority.into());
        self
    }

    /// Wrap in a holder with authorization priority.
    pub fn into_holder(self) -> InterceptorHolder {
        InterceptorHolder::authorization(Arc::new(self))
    }
}

#[async_trait]
impl ServiceInterceptor for AuthorizationInterceptor {
    async fn before(&self, ctx: &InvocationContext, _message: &Message) -> Result<(), Fault> {
        let Some(principal_value) = ctx.attribute(PRINCIPAL_ATTRIBUTE) else {
            return Ok(());
        };
        if self.required.is_empty() {
            return Ok(());
        }

        let principal: Principal = codec::from_value(principal_value)
            .map_err(|e| Fault::new(500, e.to_string()))?;
        let granted = self
            .provider
            .authorizations(&principal)
            .await
            .map_err(|e| Fault::new(500, e.to_string()))?;

        if self.required.is_subset(&granted) {
            Ok(())
        } else {
            Err(Fault::new(403, "Forbidden"))
        }
    }
}

/// Trivial token-equality provider, for tests and single-tenant setups.
pub struct SharedSecretAuthn {
    subject: String,
    secret: String,
}

impl SharedSecretAuthn {
    pub fn new(subject: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl AuthnProvider for SharedSecretAuthn {
    async fn authenticate(&self, token: &str) -> Result<Principal, AuthError> {
        if token == self.secret {
            Ok(Principal::new(self.subject.clone()))
        } else {
            Err(AuthError::TokenInvalid("token mismatch".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_bus::Headers;

    fn ctx_with_token(token: Option<&str>) -> InvocationContext {
        let mut headers = Headers::new();
        if let Some(token) = token {
            headers.insert(AUTH_TOKEN_HEADER.to_string(), token.to_string());
        }
        InvocationContext::new("any", headers)
    }

    #[tokio::test]
    async fn test_missing_token_rejected() {
        let interceptor =
            AuthenticationInterceptor::new(Arc::new(SharedSecretAuthn::new("svc", "s3cret")));
        let err = interceptor
            .before(&ctx_with_token(None), &Message::empty())
            .await
            .unwrap_err();
        assert_eq!(err.code, 401);
    }

    #[tokio::test]
    async fn test_bad_token_rejected() {
        let interceptor =
            AuthenticationInterceptor::new(Arc::new(SharedSecretAuthn::new("svc", "s3cret")));
        let err = interceptor
            .before(&ctx_with_token(Some("wrong")), &Message::empty())
            .await
            .unwrap_err();
        assert_eq!(err.code, 401);
    }

    #[tokio::test]
    async fn test_valid_token_stores_principal() {
        let interceptor =
            AuthenticationInterceptor::new(Arc::new(SharedSecretAuthn::new("svc", "s3cret")));
        let ctx = ctx_with_token(Some("s3cret"));
        interceptor.before(&ctx, &Message::empty()).await.unwrap();

        let principal: Principal =
            codec::from_value(ctx.attribute(PRINCIPAL_ATTRIBUTE).unwrap()).unwrap();
        assert_eq!(principal.subject, "svc");
    }

    struct FixedAuthz(HashSet<String>);

    #[async_trait]
    impl AuthzProvider for FixedAuthz {
        async fn authorizations(&self, _p: &Principal) -> Result<HashSet<String>, AuthError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_authorization_without_principal_passes() {
        let interceptor =
            AuthorizationInterceptor::new(Arc::new(FixedAuthz(HashSet::new()))).require("admin");
        interceptor
            .before(&ctx_with_token(None), &Message::empty())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_authority_forbidden() {
        let granted: HashSet<String> = ["reader".to_string()].into_iter().collect();
        let interceptor = AuthorizationInterceptor::new(Arc::new(FixedAuthz(granted)))
            .require("admin");

        let ctx = ctx_with_token(None);
        ctx.set_attribute(
            PRINCIPAL_ATTRIBUTE,
            codec::to_value(&Principal::new("svc")).unwrap(),
        );
        let err = interceptor.before(&ctx, &Message::empty()).await.unwrap_err();
        assert_eq!(err.code, 403);
        assert_eq!(err.message, "Forbidden");
    }

    #[tokio::test]
    async fn test_granted_authority_passes() {
        let granted: HashSet<String> =
            ["reader".to_string(), "admin".to_string()].into_iter().collect();
        let interceptor = AuthorizationInterceptor::new(Arc::new(FixedAuthz(granted)))
            .require("admin");

        let ctx = ctx_with_token(None);
        ctx.set_attribute(
            PRINCIPAL_ATTRIBUTE,
            codec::to_value(&Principal::new("svc")).unwrap(),
        );
        interceptor.before(&ctx, &Message::empty()).await.unwrap();
    }
}
