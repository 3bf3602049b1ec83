use anyhow::Result;
use async_trait::async_trait;

/// Outbound side of a chat transport.
///
/// The dispatcher's only outward side effect is `send_message`; delivery is
/// best-effort (no retries, no exactly-once guarantee).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable transport name for logging.
    fn name(&self) -> &str;

    /// Post `text` to `channel`.
    async fn send_message(&self, text: &str, channel: &str) -> Result<()>;
}

/// Resolves the roles held by a user.
///
/// Called once per inbound message. Returned roles may contain duplicates;
/// the dispatcher deduplicates them.
#[async_trait]
pub trait RoleResolver: Send + Sync {
    async fn resolve(&self, user: &str) -> Result<Vec<String>>;
}

/// Resolver used when none is configured: every user holds no roles, so only
/// commands without a role requirement can run.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRoles;

#[async_trait]
impl RoleResolver for NoRoles {
    async fn resolve(&self, _user: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_roles_resolves_empty() {
        let roles = NoRoles.resolve("anyone").await.unwrap();
        assert!(roles.is_empty());
    }
}
