//! Contratos de almacenamiento de permisos y una implementación en memoria.
//!
//! Las bajas son lógicas: plantillas y concesiones borradas dejan de ser
//! visibles para la expansión, pero no se eliminan físicamente. Las
//! concesiones a usuarios siguen la misma regla.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::errors::PolicyError;
use crate::types::{Grant, PermissionObject, PermissionTemplate, RolePermission, UserPermission};

/// Lectura usada por el resolvedor.
pub trait PermissionRepository: Send + Sync {
    /// Concesiones vigentes del rol.
    fn role_permissions(&self, role: &str) -> Result<Vec<RolePermission>, PolicyError>;
    /// Plantilla vigente; `None` si no existe o fue dada de baja.
    fn template(&self, id: u64) -> Result<Option<PermissionTemplate>, PolicyError>;
    /// Concesiones directas vigentes del usuario.
    fn user_permissions(&self, username: &str) -> Result<Vec<UserPermission>, PolicyError>;
}

/// Administración de plantillas y concesiones.
pub trait PermissionAdmin: PermissionRepository {
    fn create_template(&self, name: &str, permissions: Vec<PermissionObject>) -> Result<PermissionTemplate, PolicyError>;
    fn update_template(&self, id: u64, name: Option<String>, permissions: Option<Vec<PermissionObject>>) -> Result<PermissionTemplate, PolicyError>;
    fn delete_template(&self, id: u64) -> Result<(), PolicyError>;
    fn list_templates(&self) -> Result<Vec<PermissionTemplate>, PolicyError>;
    fn grant(&self, role: &str, grant: Grant) -> Result<RolePermission, PolicyError>;
    fn revoke(&self, id: u64) -> Result<(), PolicyError>;
    fn grant_user(&self, username: &str, object: PermissionObject) -> Result<UserPermission, PolicyError>;
    fn revoke_user(&self, id: u64) -> Result<(), PolicyError>;
}

pub fn validate_template(name: &str, permissions: &[PermissionObject]) -> Result<(), PolicyError> {
    if name.trim().is_empty() {
        return Err(PolicyError::Validation("template name is required".into()));
    }
    permissions.iter().try_for_each(PermissionObject::validate)
}

pub fn validate_user_grant(username: &str, object: &PermissionObject) -> Result<(), PolicyError> {
    if username.trim().is_empty() {
        return Err(PolicyError::Validation("username is required".into()));
    }
    object.validate()
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    templates: BTreeMap<u64, (PermissionTemplate, bool)>,
    grants: BTreeMap<u64, (RolePermission, bool)>,
    users: BTreeMap<u64, (UserPermission, bool)>,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct InMemoryPermissionRepository {
    inner: Mutex<Inner>,
}

impl InMemoryPermissionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, PolicyError> {
        self.inner.lock().map_err(|_| PolicyError::Storage("permission store mutex poisoned".into()))
    }
}

impl PermissionRepository for InMemoryPermissionRepository {
    fn role_permissions(&self, role: &str) -> Result<Vec<RolePermission>, PolicyError> {
        Ok(self.lock()?
               .grants
               .values()
               .filter(|(g, deleted)| !deleted && g.role == role)
               .map(|(g, _)| g.clone())
               .collect())
    }

    fn template(&self, id: u64) -> Result<Option<PermissionTemplate>, PolicyError> {
        Ok(self.lock()?.templates.get(&id).filter(|(_, deleted)| !deleted).map(|(t, _)| t.clone()))
    }

    fn user_permissions(&self, username: &str) -> Result<Vec<UserPermission>, PolicyError> {
        Ok(self.lock()?
               .users
               .values()
               .filter(|(u, deleted)| !deleted && u.username == username)
               .map(|(u, _)| u.clone())
               .collect())
    }
}

impl PermissionAdmin for InMemoryPermissionRepository {
    fn create_template(&self, name: &str, permissions: Vec<PermissionObject>) -> Result<PermissionTemplate, PolicyError> {
        validate_template(name, &permissions)?;
        let mut inner = self.lock()?;
        let id = inner.next_id();
        let tpl = PermissionTemplate { id,
                                       name: name.trim().to_string(),
                                       permissions };
        inner.templates.insert(id, (tpl.clone(), false));
        Ok(tpl)
    }

    fn update_template(&self, id: u64, name: Option<String>, permissions: Option<Vec<PermissionObject>>) -> Result<PermissionTemplate, PolicyError> {
        let mut inner = self.lock()?;
        let (tpl, _) = inner.templates
                            .get_mut(&id)
                            .filter(|(_, deleted)| !*deleted)
                            .ok_or_else(|| PolicyError::NotFound(format!("template {id}")))?;
        let name = name.unwrap_or_else(|| tpl.name.clone());
        let permissions = permissions.unwrap_or_else(|| tpl.permissions.clone());
        validate_template(&name, &permissions)?;
        tpl.name = name.trim().to_string();
        tpl.permissions = permissions;
        Ok(tpl.clone())
    }

    fn delete_template(&self, id: u64) -> Result<(), PolicyError> {
        match self.lock()?.templates.get_mut(&id) {
            Some((_, deleted)) if !*deleted => {
                *deleted = true;
                Ok(())
            }
            _ => Err(PolicyError::NotFound(format!("template {id}"))),
        }
    }

    fn list_templates(&self) -> Result<Vec<PermissionTemplate>, PolicyError> {
        Ok(self.lock()?.templates.values().filter(|(_, d)| !d).map(|(t, _)| t.clone()).collect())
    }

    fn grant(&self, role: &str, grant: Grant) -> Result<RolePermission, PolicyError> {
        if role.trim().is_empty() {
            return Err(PolicyError::Validation("role is required".into()));
        }
        grant.validate()?;
        let mut inner = self.lock()?;
        let id = inner.next_id();
        let rp = RolePermission { id,
                                  role: role.to_string(),
                                  grant };
        inner.grants.insert(id, (rp.clone(), false));
        Ok(rp)
    }

    fn revoke(&self, id: u64) -> Result<(), PolicyError> {
        match self.lock()?.grants.get_mut(&id) {
            Some((_, deleted)) if !*deleted => {
                *deleted = true;
                Ok(())
            }
            _ => Err(PolicyError::NotFound(format!("role permission {id}"))),
        }
    }

    fn grant_user(&self, username: &str, object: PermissionObject) -> Result<UserPermission, PolicyError> {
        validate_user_grant(username, &object)?;
        let mut inner = self.lock()?;
        let id = inner.next_id();
        let up = UserPermission { id,
                                  username: username.trim().to_string(),
                                  object };
        inner.users.insert(id, (up.clone(), false));
        Ok(up)
    }

    fn revoke_user(&self, id: u64) -> Result<(), PolicyError> {
        match self.lock()?.users.get_mut(&id) {
            Some((_, deleted)) if !*deleted => {
                *deleted = true;
                Ok(())
            }
            _ => Err(PolicyError::NotFound(format!("user permission {id}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_deleted_rows_disappear_from_reads() {
        let repo = InMemoryPermissionRepository::new();
        let tpl = repo.create_template("readers", vec![PermissionObject::schema_level("i1", "shop")]).unwrap();
        let g = repo.grant("dev", Grant::Template { template_id: tpl.id }).unwrap();
        assert_eq!(repo.role_permissions("dev").unwrap().len(), 1);

        repo.delete_template(tpl.id).unwrap();
        assert!(repo.template(tpl.id).unwrap().is_none());
        assert!(matches!(repo.delete_template(tpl.id), Err(PolicyError::NotFound(_))));

        repo.revoke(g.id).unwrap();
        assert!(repo.role_permissions("dev").unwrap().is_empty());
    }

    #[test]
    fn invalid_objects_are_rejected() {
        let repo = InMemoryPermissionRepository::new();
        assert!(repo.create_template(" ", vec![]).is_err());
        let bad = Grant::Object(PermissionObject::schema_level("", "shop"));
        assert!(matches!(repo.grant("dev", bad), Err(PolicyError::Validation(_))));
    }

    #[test]
    fn user_grants_are_per_user_and_revocable() {
        let repo = InMemoryPermissionRepository::new();
        let schema = repo.grant_user("bob", PermissionObject::schema_level("i1", "shop")).unwrap();
        repo.grant_user("bob", PermissionObject::table_level("i1", "crm", "leads")).unwrap();
        repo.grant_user("carol", PermissionObject::schema_level("i2", "hr")).unwrap();
        assert_eq!(repo.user_permissions("bob").unwrap().len(), 2);
        assert_eq!(repo.user_permissions("carol").unwrap().len(), 1);

        repo.revoke_user(schema.id).unwrap();
        let left = repo.user_permissions("bob").unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].object, PermissionObject::table_level("i1", "crm", "leads"));
        assert!(matches!(repo.revoke_user(schema.id), Err(PolicyError::NotFound(_))));
        // los ids de roles y usuarios no se mezclan
        assert!(matches!(repo.revoke(left[0].id), Err(PolicyError::NotFound(_))));

        assert!(matches!(repo.grant_user(" ", PermissionObject::schema_level("i1", "shop")), Err(PolicyError::Validation(_))));
        assert!(matches!(repo.grant_user("bob", PermissionObject::schema_level("i1", "")), Err(PolicyError::Validation(_))));
    }

    #[test]
    fn update_keeps_unspecified_fields() {
        let repo = InMemoryPermissionRepository::new();
        let tpl = repo.create_template("ops", vec![PermissionObject::schema_level("i1", "a")]).unwrap();
        let updated = repo.update_template(tpl.id, Some("ops-v2".into()), None).unwrap();
        assert_eq!(updated.name, "ops-v2");
        assert_eq!(updated.permissions, tpl.permissions);
    }
}
