//! Catálogo de instancias destino.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::CoreError;
use crate::model::DbKind;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDatabase {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub db_kind: DbKind,
}

impl std::fmt::Debug for TargetDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetDatabase")
         .field("host", &self.host)
         .field("port", &self.port)
         .field("user", &self.user)
         .field("password", &"***")
         .field("db_kind", &self.db_kind)
         .finish()
    }
}

pub trait InstanceCatalog: Send + Sync {
    fn resolve(&self, instance_id: Uuid) -> Result<TargetDatabase, CoreError>;
}

#[derive(Default)]
pub struct InMemoryInstanceCatalog {
    instances: DashMap<Uuid, TargetDatabase>,
}

impl InMemoryInstanceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: Uuid, target: TargetDatabase) {
        self.instances.insert(id, target);
    }
}

impl InstanceCatalog for InMemoryInstanceCatalog {
    fn resolve(&self, instance_id: Uuid) -> Result<TargetDatabase, CoreError> {
        self.instances
            .get(&instance_id)
            .map(|t| t.value().clone())
            .ok_or_else(|| CoreError::not_found("instance", instance_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_password() {
        let t = TargetDatabase { host: "db".into(),
                                 port: 3306,
                                 user: "root".into(),
                                 password: "s3cret".into(),
                                 db_kind: DbKind::MySQL };
        assert!(!format!("{t:?}").contains("s3cret"));
    }

    #[test]
    fn unknown_instance_is_not_found() {
        let c = InMemoryInstanceCatalog::new();
        assert!(matches!(c.resolve(Uuid::new_v4()), Err(CoreError::NotFound(_))));
    }
}
