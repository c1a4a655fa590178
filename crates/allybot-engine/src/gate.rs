use std::sync::Arc;

use allybot_types::{CommunityId, UserId};

use crate::error::EngineError;
use crate::platform::Platform;

/// Leaders are recognised purely by role name: `LEADER-<ALLIANCE>`. Communities
/// must name their leader roles exactly this way.
pub const LEADER_ROLE_PREFIX: &str = "LEADER-";

pub fn leader_role(alliance: &str) -> String {
    format!("{}{}", LEADER_ROLE_PREFIX, alliance.to_uppercase())
}

/// Answers permission questions from the member's live roles. Nothing is
/// cached; leadership can change between two commands.
#[derive(Clone)]
pub struct AuthorizationGate {
    platform: Arc<dyn Platform>,
    admin_role: String,
}

impl AuthorizationGate {
    pub fn new(platform: Arc<dyn Platform>, admin_role: String) -> Self {
        Self { platform, admin_role }
    }

    pub async fn has_leader_permission(
        &self,
        actor: UserId,
        community_id: CommunityId,
        alliance: &str,
    ) -> Result<bool, EngineError> {
        self.holds(actor, community_id, &leader_role(alliance)).await
    }

    pub async fn has_admin_permission(&self, actor: UserId, community_id: CommunityId) -> Result<bool, EngineError> {
        self.holds(actor, community_id, &self.admin_role).await
    }

    pub async fn require_leader(
        &self,
        actor: UserId,
        community_id: CommunityId,
        alliance: &str,
    ) -> Result<(), EngineError> {
        if self.has_leader_permission(actor, community_id, alliance).await? {
            Ok(())
        } else {
            Err(EngineError::Unauthorized { required_role: leader_role(alliance) })
        }
    }

    pub async fn require_admin(&self, actor: UserId, community_id: CommunityId) -> Result<(), EngineError> {
        if self.has_admin_permission(actor, community_id).await? {
            Ok(())
        } else {
            Err(EngineError::Unauthorized { required_role: self.admin_role.clone() })
        }
    }

    async fn holds(&self, actor: UserId, community_id: CommunityId, role: &str) -> Result<bool, EngineError> {
        let roles = self.platform.member_roles(community_id, actor).await?;
        Ok(roles.iter().any(|r| r == role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPlatform;

    #[test]
    fn leader_role_follows_naming_convention() {
        assert_eq!(leader_role("nona"), "LEADER-NONA");
    }

    #[tokio::test]
    async fn reads_live_roles_on_every_call() {
        let platform = Arc::new(MockPlatform::default());
        let gate = AuthorizationGate::new(platform.clone(), "ADMIN".into());

        assert!(!gate.has_leader_permission(5, 1, "NONA").await.unwrap());
        platform.set_member_roles(1, 5, &["LEADER-NONA"]);
        assert!(gate.has_leader_permission(5, 1, "NONA").await.unwrap());
        assert!(!gate.has_leader_permission(5, 1, "WOLF").await.unwrap());
        assert!(!gate.has_admin_permission(5, 1).await.unwrap());

        platform.set_member_roles(1, 5, &[]);
        let err = gate.require_leader(5, 1, "NONA").await.unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized { ref required_role } if required_role == "LEADER-NONA"));
    }

    #[tokio::test]
    async fn role_lookup_failure_is_not_a_grant() {
        let platform = Arc::new(MockPlatform::default());
        platform.fail_member_lookup(crate::platform::PlatformError::Unavailable("down".into()));
        let gate = AuthorizationGate::new(platform, "ADMIN".into());
        assert!(matches!(
            gate.require_admin(5, 1).await,
            Err(EngineError::External(_))
        ));
    }
}
