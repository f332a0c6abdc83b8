//! Colaborador de autorización: roles de usuario y reconocimiento de administradores.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

pub const ADMIN_ROLE: &str = "admin";

pub trait Authorizer: Send + Sync {
    fn roles_for_user(&self, user: &str) -> Vec<String>;
    fn is_administrator(&self, user: &str) -> bool;
}

/// Tabla estática usuario → roles. Administrador = quien tenga el rol `admin`
/// o figure en `admins`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticAuthorizer {
    #[serde(default)]
    users: HashMap<String, Vec<String>>,
    #[serde(default)]
    admins: HashSet<String>,
}

impl StaticAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_roles(mut self, user: &str, roles: &[&str]) -> Self {
        self.users.entry(user.to_string())
            .or_default()
            .extend(roles.iter().map(|r| r.to_string()));
        self
    }

    pub fn with_admin(mut self, user: &str) -> Self {
        self.admins.insert(user.to_string());
        self
    }

    /// Carga `{"users": {"alice": ["dev"]}, "admins": ["root"]}`.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| CoreError::Internal(format!("read {}: {e}", path.display())))?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl Authorizer for StaticAuthorizer {
    fn roles_for_user(&self, user: &str) -> Vec<String> {
        self.users.get(user).cloned().unwrap_or_default()
    }

    fn is_administrator(&self, user: &str) -> bool {
        self.admins.contains(user) || self.users.get(user).is_some_and(|r| r.iter().any(|r| r == ADMIN_ROLE))
    }
}
