// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Ordered interceptor chain run around every invocation.
//!
//! Interceptors are classified by role when they are wrapped in an
//! [`InterceptorHolder`]: authentication, then authorization, then user
//! interceptors. A chain only accepts additions in non-decreasing priority
//! order, so by construction it always executes authentication before
//! authorization before user hooks.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use conduit_bus::Message;

use crate::context::InvocationContext;
use crate::fault::Fault;
use crate::handler::Outcome;

/// Interceptor rank. The ordinal defines the only legal insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Authentication,
    Authorization,
    User,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Authentication => write!(f, "AUTHENTICATION"),
            Priority::Authorization => write!(f, "AUTHORIZATION"),
            Priority::User => write!(f, "USER"),
        }
    }
}

/// Pre/post-invocation hook.
#[async_trait]
pub trait ServiceInterceptor: Send + Sync {
    /// Runs before the method is invoked. An error short-circuits the
    /// remaining chain and becomes the reply.
    async fn before(&self, ctx: &InvocationContext, message: &Message) -> Result<(), Fault>;

    /// Runs over the produced outcome, in chain order. May transform the
    /// outcome; the default leaves it untouched.
    async fn after(&self, _ctx: &InvocationContext, outcome: Outcome) -> Outcome {
        outcome
    }
}

/// An interceptor together with its role and an optional action filter.
#[derive(Clone)]
pub struct InterceptorHolder {
    priority: Priority,
    action: Option<String>,
    interceptor: Arc<dyn ServiceInterceptor>,
}

impl InterceptorHolder {
    pub fn authentication(interceptor: Arc<dyn ServiceInterceptor>) -> Self {
        Self {
            priority: Priority::Authentication,
            action: None,
            interceptor,
        }
    }

    pub fn authorization(interceptor: Arc<dyn ServiceInterceptor>) -> Self {
        Self {
            priority: Priority::Authorization,
            action: None,
            interceptor,
        }
    }

    pub fn user(interceptor: Arc<dyn ServiceInterceptor>) -> Self {
        Self {
            priority: Priority::User,
            action: None,
            interceptor,
        }
    }

    /// A user interceptor that only runs for one action.
    pub fn user_for_action(
        action: impl Into<String>,
        interceptor: Arc<dyn ServiceInterceptor>,
    ) -> Self {
        Self {
            priority: Priority::User,
            action: Some(action.into()),
            interceptor,
        }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    fn applies_to(&self, action: &str) -> bool {
        match &self.action {
            Some(filter) => filter == action,
            None => true,
        }
    }
}

/// Adding an interceptor whose priority ranks below the last added one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot add [{rejected}] interceptor after [{last}], check adding order")]
pub struct OrderViolation {
    pub rejected: Priority,
    pub last: Priority,
}

#[derive(Clone, Default)]
pub struct InterceptorChain {
    holders: Vec<InterceptorHolder>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a holder. The chain is monotonically non-decreasing in
    /// priority; anything else is rejected.
    pub fn add(&mut self, holder: InterceptorHolder) -> Result<(), OrderViolation> {
        if let Some(last) = self.holders.last() {
            if holder.priority() < last.priority() {
                return Err(OrderViolation {
                    rejected: holder.priority(),
                    last: last.priority(),
                });
            }
        }
        self.holders.push(holder);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    pub(crate) async fn run_before(
        &self,
        ctx: &InvocationContext,
        message: &Message,
    ) -> Result<(), Fault> {
        for holder in &self.holders {
            if holder.applies_to(ctx.action()) {
                holder.interceptor.before(ctx, message).await?;
            }
        }
        Ok(())
    }

    pub(crate) async fn run_after(&self, ctx: &InvocationContext, outcome: Outcome) -> Outcome {
        let mut outcome = outcome;
        for holder in &self.holders {
            if holder.applies_to(ctx.action()) {
                outcome = holder.interceptor.after(ctx, outcome).await;
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl ServiceInterceptor for Noop {
        async fn before(&self, _ctx: &InvocationContext, _msg: &Message) -> Result<(), Fault> {
            Ok(())
        }
    }

    fn authn() -> InterceptorHolder {
        InterceptorHolder::authentication(Arc::new(Noop))
    }

    fn authz() -> InterceptorHolder {
        InterceptorHolder::authorization(Arc::new(Noop))
    }

    fn user() -> InterceptorHolder {
        InterceptorHolder::user(Arc::new(Noop))
    }

    #[test]
    fn test_any_priority_first() {
        for holder in [authn(), authz(), user()] {
            let mut chain = InterceptorChain::new();
            chain.add(holder).unwrap();
        }
    }

    #[test]
    fn test_non_decreasing_order_accepted() {
        let mut chain = InterceptorChain::new();
        chain.add(authn()).unwrap();
        chain.add(authn()).unwrap();
        chain.add(authz()).unwrap();
        chain.add(user()).unwrap();
        chain.add(user()).unwrap();
    }

    #[test]
    fn test_authn_after_authz_rejected() {
        let mut chain = InterceptorChain::new();
        chain.add(authz()).unwrap();
        let err = chain.add(authn()).unwrap_err();
        assert_eq!(
            err,
            OrderViolation {
                rejected: Priority::Authentication,
                last: Priority::Authorization
            }
        );
    }

    #[test]
    fn test_nothing_after_user_except_user() {
        let mut chain = InterceptorChain::new();
        chain.add(user()).unwrap();
        assert!(chain.add(authn()).is_err());
        assert!(chain.add(authz()).is_err());
        chain.add(user()).unwrap();
    }
}
