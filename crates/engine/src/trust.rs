//! Trust cache — remembered user grants that short-circuit permission
//! prompts.
//!
//! A grant is keyed by (tool, scope) where the scope is a command prefix,
//! a path prefix, or the whole tool. Lookup is most-specific-first: a
//! matching command/path prefix beats a global grant, and a longer prefix
//! beats a shorter one. Once-grants are consumed on their first hit;
//! turn-grants are cleared when the turn ends; session-grants live until
//! the cache is cleared.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a grant applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrustScope {
    /// The tool as a whole.
    Global,
    /// Shell-style calls whose command starts with this prefix.
    CommandPrefix { prefix: String },
    /// File-style calls whose target path starts with this prefix.
    PathPrefix { prefix: String },
}

/// How long a grant survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLifetime {
    Once,
    Turn,
    Session,
}

/// A cached user decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustGrant {
    pub tool: String,
    pub scope: TrustScope,
    pub lifetime: TrustLifetime,
    pub granted_at: DateTime<Utc>,
}

impl TrustGrant {
    pub fn new(tool: impl Into<String>, scope: TrustScope, lifetime: TrustLifetime) -> Self {
        Self {
            tool: tool.into(),
            scope,
            lifetime,
            granted_at: Utc::now(),
        }
    }
}

/// Argument facts extracted from a classified call, matched against
/// grant scopes.
#[derive(Debug, Clone, Default)]
pub struct CallFacts {
    pub command: Option<String>,
    pub path: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session-scoped grant store. Writes are rare (user decisions), so a
/// single lock serializes them.
#[derive(Default)]
pub struct TrustCache {
    grants: Mutex<Vec<TrustGrant>>,
}

impl TrustCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, grant: TrustGrant) {
        tracing::debug!(tool = %grant.tool, scope = ?grant.scope, lifetime = ?grant.lifetime, "trust grant cached");
        self.grants.lock().push(grant);
    }

    /// Whether a cached grant covers this call. Consumes a matching
    /// once-grant.
    pub fn is_trusted(&self, tool: &str, facts: &CallFacts) -> bool {
        let mut grants = self.grants.lock();

        let best = grants
            .iter()
            .enumerate()
            .filter(|(_, g)| g.tool == tool && scope_matches(&g.scope, facts))
            .max_by_key(|(_, g)| specificity(&g.scope))
            .map(|(idx, g)| (idx, g.lifetime));

        let Some((idx, lifetime)) = best else {
            return false;
        };

        if lifetime == TrustLifetime::Once {
            grants.remove(idx);
        }
        true
    }

    /// Expire everything that should not survive the turn boundary
    /// (turn-grants and any unconsumed once-grants).
    pub fn end_turn(&self) {
        self.grants
            .lock()
            .retain(|g| g.lifetime == TrustLifetime::Session);
    }

    pub fn clear(&self) {
        self.grants.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.grants.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.lock().is_empty()
    }
}

fn scope_matches(scope: &TrustScope, facts: &CallFacts) -> bool {
    match scope {
        TrustScope::Global => true,
        TrustScope::CommandPrefix { prefix } => facts
            .command
            .as_deref()
            .is_some_and(|c| c.starts_with(prefix.as_str())),
        TrustScope::PathPrefix { prefix } => facts
            .path
            .as_deref()
            .is_some_and(|p| p.starts_with(prefix.as_str())),
    }
}

/// Prefix scopes beat global; longer prefixes beat shorter ones.
fn specificity(scope: &TrustScope) -> usize {
    match scope {
        TrustScope::Global => 0,
        TrustScope::CommandPrefix { prefix } | TrustScope::PathPrefix { prefix } => {
            1 + prefix.len()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
