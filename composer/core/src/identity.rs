//! Identity Resolution
//!
//! Every guard needs an identity. A signed-in user brings one; everyone else
//! gets a guest identity minted lazily by the identity collaborator and
//! memoized for the lifetime of the resolver.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

/// Opaque identity string
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    id: String,
    authenticated: bool,
}

impl Identity {
    /// Identity of a signed-in user
    pub fn authenticated(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            authenticated: true,
        }
    }

    /// Identity minted for an anonymous visitor
    pub fn guest(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            authenticated: false,
        }
    }

    /// The id string sent to collaborators
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether this identity belongs to a signed-in user
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// The signed-in user, as supplied by the session collaborator
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User id
    pub id: String,
    /// Model the user picked in their preferences
    pub preferred_model: Option<String>,
    /// Personal system prompt
    pub system_prompt: Option<String>,
}

impl User {
    /// Create a user with just an id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// Identity collaborator
///
/// `get_or_create_guest` must be idempotent on the collaborator side so that
/// a retried call after a failure is safe.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Return the guest identity for this client context, creating it if needed
    async fn get_or_create_guest(&self) -> anyhow::Result<String>;
}

/// Resolves the identity used for one submission attempt
pub struct IdentityResolver {
    provider: Arc<dyn IdentityProvider>,
    guest: OnceCell<Identity>,
}

impl IdentityResolver {
    /// Create a resolver around an identity collaborator
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            guest: OnceCell::new(),
        }
    }

    /// Resolve the identity for the current user
    ///
    /// Returns `None` only when no user is signed in and the guest identity
    /// could not be obtained. Failures are not memoized.
    pub async fn resolve(&self, user: Option<&User>) -> Option<Identity> {
        if let Some(user) = user {
            return Some(Identity::authenticated(user.id.clone()));
        }

        let result = self
            .guest
            .get_or_try_init(|| async {
                let id = self.provider.get_or_create_guest().await?;
                tracing::debug!(guest_id = %id, "Guest identity created");
                Ok::<_, anyhow::Error>(Identity::guest(id))
            })
            .await;

        match result {
            Ok(identity) => Some(identity.clone()),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to obtain guest identity");
                None
            }
        }
    }
}
