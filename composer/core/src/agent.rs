//! Agent Resolution
//!
//! The current agent comes from one of two places: the route's agent slug or
//! the agent stored on the active conversation. The conversation wins when
//! both are present. Lookups are memoized by the `(slug, id)` pair so
//! re-rendering with unchanged inputs never re-fetches.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// Agent identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    /// Wrap an agent id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where an agent comes from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentScope {
    /// Published by the operators
    Curated,
    /// Created by a user
    User,
}

/// An assistant persona
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    /// Agent id
    pub id: AgentId,
    /// URL slug
    pub slug: String,
    /// Display name
    pub name: String,
    /// System prompt used while this agent is selected
    pub system_prompt: String,
    /// Curated or user-owned
    pub scope: AgentScope,
    /// Owner for user-scoped agents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_id: Option<String>,
}

/// Agent directory collaborator
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    /// Fetch one agent; the id takes precedence when both are given
    async fn fetch_by_slug_or_id(
        &self,
        slug: Option<&str>,
        id: Option<&AgentId>,
    ) -> anyhow::Result<Option<Agent>>;

    /// All curated agents
    async fn curated_agents(&self) -> anyhow::Result<Vec<Agent>>;

    /// Agents owned by an identity
    async fn user_agents(&self, identity: &Identity) -> anyhow::Result<Vec<Agent>>;
}

type AgentQuery = (Option<String>, Option<AgentId>);

/// Derives the current agent from route and conversation state
pub struct AgentResolver {
    directory: Arc<dyn AgentDirectory>,
    memo: Mutex<Option<(AgentQuery, Option<Arc<Agent>>)>>,
    curated: RwLock<Option<Vec<Agent>>>,
    user_agents: RwLock<Option<(Identity, Vec<Agent>)>>,
}

impl AgentResolver {
    /// Create a resolver around an agent directory
    pub fn new(directory: Arc<dyn AgentDirectory>) -> Self {
        Self {
            directory,
            memo: Mutex::new(None),
            curated: RwLock::new(None),
            user_agents: RwLock::new(None),
        }
    }

    /// Re-derive the current agent
    ///
    /// Lookup failures are logged and resolve to `None`. The memo is cleared
    /// rather than updated, so [`current`](Self::current) stops reporting the
    /// previous agent and the next call retries.
    pub async fn resolve(
        &self,
        slug: Option<&str>,
        conversation_agent_id: Option<&AgentId>,
    ) -> Option<Arc<Agent>> {
        let query: AgentQuery = (slug.map(str::to_string), conversation_agent_id.cloned());

        if let Some((memo_query, agent)) = self.memo.lock().as_ref() {
            if *memo_query == query {
                return agent.clone();
            }
        }

        let looked_up = match (slug, conversation_agent_id) {
            (None, None) => Some(None),
            (_, Some(id)) => self.lookup(None, Some(id)).await,
            (Some(slug), None) => self.lookup(Some(slug), None).await,
        };
        let Some(resolved) = looked_up else {
            *self.memo.lock() = None;
            return None;
        };

        tracing::debug!(
            slug = ?query.0,
            conversation_agent = ?query.1,
            agent = ?resolved.as_ref().map(|a| &a.slug),
            "Current agent resolved"
        );
        *self.memo.lock() = Some((query, resolved.clone()));
        resolved
    }

    /// The agent from the last successful resolution
    #[must_use]
    pub fn current(&self) -> Option<Arc<Agent>> {
        self.memo.lock().as_ref().and_then(|(_, agent)| agent.clone())
    }

    // Outer None means the lookup failed; inner None means no such agent.
    async fn lookup(&self, slug: Option<&str>, id: Option<&AgentId>) -> Option<Option<Arc<Agent>>> {
        if let Some(agent) = self.find_loaded(slug, id) {
            return Some(Some(Arc::new(agent)));
        }
        match self.directory.fetch_by_slug_or_id(slug, id).await {
            Ok(agent) => Some(agent.map(Arc::new)),
            Err(e) => {
                tracing::warn!(error = %e, ?slug, ?id, "Agent lookup failed");
                None
            }
        }
    }

    fn find_loaded(&self, slug: Option<&str>, id: Option<&AgentId>) -> Option<Agent> {
        let matches = |agent: &&Agent| match (id, slug) {
            (Some(id), _) => &agent.id == id,
            (None, Some(slug)) => agent.slug == slug,
            (None, None) => false,
        };
        let curated = self.curated.read();
        let user = self.user_agents.read();
        curated
            .iter()
            .flatten()
            .chain(user.iter().flat_map(|(_, agents)| agents.iter()))
            .find(matches)
            .cloned()
    }

    /// Load curated agents (once) and the identity's own agents
    pub async fn refresh(&self, identity: Option<&Identity>) {
        if self.curated.read().is_none() {
            match self.directory.curated_agents().await {
                Ok(agents) => {
                    tracing::debug!(count = agents.len(), "Curated agents loaded");
                    *self.curated.write() = Some(agents);
                }
                Err(e) => tracing::warn!(error = %e, "Failed to load curated agents"),
            }
        }

        let Some(identity) = identity else {
            *self.user_agents.write() = None;
            return;
        };
        let already_loaded = self
            .user_agents
            .read()
            .as_ref()
            .is_some_and(|(owner, _)| owner == identity);
        if already_loaded {
            return;
        }
        match self.directory.user_agents(identity).await {
            Ok(agents) => {
                tracing::debug!(identity = %identity, count = agents.len(), "User agents loaded");
                *self.user_agents.write() = Some((identity.clone(), agents));
            }
            Err(e) => tracing::warn!(error = %e, identity = %identity, "Failed to load user agents"),
        }
    }

    /// Curated agents loaded so far
    #[must_use]
    pub fn curated_agents(&self) -> Vec<Agent> {
        self.curated.read().clone().unwrap_or_default()
    }

    /// The current identity's agents loaded so far
    #[must_use]
    pub fn user_agents(&self) -> Vec<Agent> {
        self.user_agents
            .read()
            .as_ref()
            .map(|(_, agents)| agents.clone())
            .unwrap_or_default()
    }
}
