//! Operation scopes.
//!
//! Every store call receives a scope carrying the caller's tracing span and
//! an optional deadline. A [`TenantScope`] also carries the calling account;
//! operations that filter by tenant take `&TenantScope`, operations that work
//! on an id validated earlier in the same pipeline take `&SystemScope`.
//! Which kind of call is which is therefore checked by the compiler.

use std::fmt;
use std::time::Duration;

use tracing::{Span, debug};

use crate::error::{StateError, StateResult};
use crate::types::AccountId;

/// Tenant marker: the account every row touched by the call must belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tenant {
    account_id: AccountId,
}

impl Tenant {
    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    /// Admit a row owned by `owner`. A mismatch is reported as `NotFound`
    /// so existence never leaks across tenants.
    pub fn admit(&self, owner: AccountId, what: impl fmt::Display) -> StateResult<()> {
        if owner == self.account_id {
            return Ok(());
        }
        debug!(
            account_id = self.account_id,
            owner, %what, "tenant mismatch, reporting not found"
        );
        Err(StateError::NotFound(what.to_string()))
    }
}

/// Marker for calls that bypass the tenant filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct System;

#[derive(Debug, Clone)]
pub struct Scope<T> {
    tenant: T,
    span: Span,
    timeout: Option<Duration>,
}

pub type TenantScope = Scope<Tenant>;
pub type SystemScope = Scope<System>;

impl<T> Scope<T> {
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Replace the span, e.g. with a request span created by the caller.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run `f` inside the scope's span.
    pub fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        self.span.in_scope(f)
    }
}

impl TenantScope {
    pub fn new(account_id: AccountId) -> Self {
        Self {
            tenant: Tenant { account_id },
            span: tracing::info_span!("tenant", account_id),
            timeout: None,
        }
    }

    pub fn tenant(&self) -> Tenant {
        self.tenant
    }

    pub fn account_id(&self) -> AccountId {
        self.tenant.account_id
    }

    /// Drop the tenant for downstream unscoped calls on ids this scope
    /// already validated. Span and deadline carry over.
    pub fn unscoped(&self) -> SystemScope {
        Scope {
            tenant: System,
            span: self.span.clone(),
            timeout: self.timeout,
        }
    }
}

impl SystemScope {
    pub fn new() -> Self {
        Self {
            tenant: System,
            span: tracing::info_span!("system"),
            timeout: None,
        }
    }
}

impl Default for SystemScope {
    fn default() -> Self {
        Self::new()
    }
}
