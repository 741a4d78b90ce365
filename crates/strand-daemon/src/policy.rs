//! Exception policy: maps projection failures to retry or terminal actions.
//!
//! A policy is an ordered list of rules. Each rule matches an error (by
//! concrete type anywhere in the `anyhow` chain, or by predicate), allows a
//! number of attempts with a backoff between them, and names the action to
//! take once attempts are exhausted. The first matching rule wins; an error
//! that matches nothing stops the shard.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use strand_core::BackoffStrategy;
//! use strand_daemon::{ErrorRule, ExceptionPolicy, TerminalAction};
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("database busy")]
//! struct Busy;
//!
//! let policy = ExceptionPolicy::new()
//!     .rule(
//!         ErrorRule::on::<Busy>()
//!             .retry(3, BackoffStrategy::Fixed(Duration::from_millis(50)))
//!             .then(TerminalAction::StopAll),
//!     )
//!     .rule(ErrorRule::on_any().then(TerminalAction::SkipEvent));
//! assert_eq!(policy.rules().len(), 2);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use strand_core::{BackoffStrategy, EventPage};

type MatchFn = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// Decides whether a rule applies to an error
#[derive(Clone)]
pub struct ErrorMatcher {
    description: String,
    predicate: MatchFn,
}

impl ErrorMatcher {
    /// Match errors of type `E` anywhere in the error chain
    pub fn of<E>() -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            description: std::any::type_name::<E>().to_string(),
            predicate: Arc::new(|err: &anyhow::Error| {
                err.is::<E>() || err.chain().any(|cause| cause.downcast_ref::<E>().is_some())
            }),
        }
    }

    /// Match every error
    pub fn any() -> Self {
        Self {
            description: "any".to_string(),
            predicate: Arc::new(|_| true),
        }
    }

    /// Match errors accepted by a predicate
    pub fn when<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn matches(&self, err: &anyhow::Error) -> bool {
        (self.predicate)(err)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for ErrorMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErrorMatcher")
            .field(&self.description)
            .finish()
    }
}

/// What happens once a rule's attempts are exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminalAction {
    /// Give up on the page, advance the checkpoint past it, continue
    SkipEvent,
    /// Stop this projection's shard; others continue
    StopShard,
    /// Stop every shard in the daemon
    StopAll,
}

impl TerminalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalAction::SkipEvent => "skip_event",
            TerminalAction::StopShard => "stop_shard",
            TerminalAction::StopAll => "stop_all",
        }
    }
}

impl fmt::Display for TerminalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision for one failed apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyAction {
    /// Wait, then apply the same page again
    Retry(Duration),
    SkipEvent,
    StopShard,
    StopAll,
}

impl From<TerminalAction> for PolicyAction {
    fn from(action: TerminalAction) -> Self {
        match action {
            TerminalAction::SkipEvent => PolicyAction::SkipEvent,
            TerminalAction::StopShard => PolicyAction::StopShard,
            TerminalAction::StopAll => PolicyAction::StopAll,
        }
    }
}

/// One policy rule
#[derive(Debug, Clone)]
pub struct ErrorRule {
    matcher: ErrorMatcher,
    max_attempts: u32,
    backoff: BackoffStrategy,
    terminal: TerminalAction,
}

impl ErrorRule {
    /// Rule for errors of type `E`; one attempt, then stop the shard
    pub fn on<E>() -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::new(ErrorMatcher::of::<E>())
    }

    /// Rule that matches every error
    pub fn on_any() -> Self {
        Self::new(ErrorMatcher::any())
    }

    /// Rule for errors accepted by a predicate
    pub fn when<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        Self::new(ErrorMatcher::when(description, predicate))
    }

    pub fn new(matcher: ErrorMatcher) -> Self {
        Self {
            matcher,
            max_attempts: 1,
            backoff: BackoffStrategy::Fixed(Duration::ZERO),
            terminal: TerminalAction::StopShard,
        }
    }

    /// Allow up to `max_attempts` applies in total, waiting `backoff` between them
    pub fn retry(mut self, max_attempts: u32, backoff: BackoffStrategy) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff = backoff;
        self
    }

    /// Action taken once attempts are exhausted
    pub fn then(mut self, action: TerminalAction) -> Self {
        self.terminal = action;
        self
    }

    pub fn matcher(&self) -> &ErrorMatcher {
        &self.matcher
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> &BackoffStrategy {
        &self.backoff
    }

    pub fn terminal(&self) -> TerminalAction {
        self.terminal
    }

    fn decide(&self, attempts: u32) -> PolicyAction {
        if attempts < self.max_attempts {
            PolicyAction::Retry(self.backoff.calculate(attempts.saturating_sub(1)))
        } else {
            self.terminal.into()
        }
    }
}

/// Ordered rule list consulted when a projection fails to apply a page
#[derive(Debug, Clone, Default)]
pub struct ExceptionPolicy {
    rules: Vec<ErrorRule>,
}

impl ExceptionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule; earlier rules take precedence
    pub fn rule(mut self, rule: ErrorRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[ErrorRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// This policy's rules followed by `fallback`'s
    pub fn followed_by(&self, fallback: &ExceptionPolicy) -> ExceptionPolicy {
        let mut rules = self.rules.clone();
        rules.extend(fallback.rules.iter().cloned());
        ExceptionPolicy { rules }
    }

    pub fn matching_rule(&self, error: &anyhow::Error) -> Option<&ErrorRule> {
        self.rules.iter().find(|rule| rule.matcher.matches(error))
    }

    /// Decide what to do after the `attempts`-th failed apply of `page`
    ///
    /// `attempts` counts failures of this page so far, including this one.
    pub fn resolve(&self, error: &anyhow::Error, attempts: u32, page: &EventPage) -> PolicyAction {
        match self.matching_rule(error) {
            Some(rule) => {
                let action = rule.decide(attempts);
                tracing::debug!(
                    rule = rule.matcher.description(),
                    attempts,
                    floor = page.floor,
                    ceiling = page.ceiling,
                    ?action,
                    "Exception policy matched"
                );
                action
            }
            None => {
                tracing::debug!(
                    attempts,
                    floor = page.floor,
                    ceiling = page.ceiling,
                    "No exception rule matched; stopping shard"
                );
                PolicyAction::StopShard
            }
        }
    }
}
