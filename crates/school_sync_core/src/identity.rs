//! crates/school_sync_core/src/identity.rs
//!
//! Maps an authenticated principal to its profile and role-specific ids.

use std::sync::Arc;
use tracing::warn;

use crate::domain::{Identity, Principal};
use crate::ports::{DirectoryStore, PortResult};

#[derive(Clone)]
pub struct IdentityResolver {
    directory: Arc<dyn DirectoryStore>,
}

impl IdentityResolver {
    pub fn new(directory: Arc<dyn DirectoryStore>) -> Self {
        Self { directory }
    }

    /// Fetches the principal's profile.
    ///
    /// A missing profile is not an error: it is logged and `None` is returned, and
    /// callers show empty state. The email on the profile wins over the principal's.
    pub async fn resolve(&self, principal: &Principal) -> PortResult<Option<Identity>> {
        match self.directory.get_profile(principal.user_id).await? {
            Some(profile) => Ok(Some(Identity {
                user_id: profile.user_id,
                email: profile.email,
                role: profile.role,
            })),
            None => {
                warn!("No profile document for user {}", principal.user_id);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Role, UserProfile};
    use crate::memory::InMemoryStore;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_resolve_parent_exposes_links() {
        let store = Arc::new(InMemoryStore::new());
        let (student_id, class_id) = (Uuid::new_v4(), Uuid::new_v4());
        let profile = UserProfile {
            user_id: Uuid::new_v4(),
            email: "parent@gmail.com".to_string(),
            display_name: None,
            role: Role::Parent {
                student_id,
                class_id,
            },
        };
        store.create_account(profile.clone(), "hash").await.unwrap();

        let resolver = IdentityResolver::new(store);
        let identity = resolver
            .resolve(&Principal {
                user_id: profile.user_id,
                email: "parent@gmail.com".to_string(),
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(identity.role.student_id(), Some(student_id));
        assert_eq!(identity.role.class_id(), Some(class_id));
        assert_eq!(identity.role.teacher_id(), None);
    }

    #[tokio::test]
    async fn test_resolve_missing_profile_is_empty() {
        let resolver = IdentityResolver::new(Arc::new(InMemoryStore::new()));
        let identity = resolver
            .resolve(&Principal {
                user_id: Uuid::new_v4(),
                email: "ghost@x.com".to_string(),
            })
            .await
            .unwrap();
        assert!(identity.is_none());
    }
}
