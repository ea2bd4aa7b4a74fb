//! Role directory mapping users to the roles they hold
//!
//! The host system this replaces resolved role membership through its own
//! user tables. Standalone, the directory is plain reference data the
//! caller loads at startup.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct RoleDirectory {
    roles_by_user: BTreeMap<String, Vec<String>>,
}

impl RoleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&mut self, user: &str, roles: &[&str]) {
        let entry = self.roles_by_user.entry(user.to_string()).or_default();
        for role in roles {
            if !entry.iter().any(|r| r == role) {
                entry.push((*role).to_string());
            }
        }
    }

    pub fn user_has_role(&self, user: &str, role: &str) -> bool {
        self.roles_by_user
            .get(user)
            .is_some_and(|roles| roles.iter().any(|r| r == role))
    }

    /// All users holding a role, in directory order.
    pub fn users_with_role(&self, role: &str) -> Vec<String> {
        self.roles_by_user
            .iter()
            .filter(|(_, roles)| roles.iter().any(|r| r == role))
            .map(|(user, _)| user.clone())
            .collect()
    }

    pub fn roles_of(&self, user: &str) -> &[String] {
        self.roles_by_user
            .get(user)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
