use chrono::Utc;
use diesel::prelude::*;
use log::{debug, warn};
use serde_json::Value;
use sqlflow_policies::repository::{validate_template, validate_user_grant};
use sqlflow_policies::{Grant, PermissionAdmin, PermissionObject, PermissionRepository, PermissionTemplate, PolicyError, RolePermission, UserPermission};

use super::{with_retry, ConnectionProvider};
use crate::error::PersistenceError;
use crate::schema::{permission_templates, role_permissions, user_permissions};

fn to_id(id: u64) -> Result<i64, PolicyError> {
    i64::try_from(id).map_err(|_| PolicyError::NotFound(format!("id {id}")))
}

fn template_from_row((id, name, permissions): (i64, String, Value)) -> Result<PermissionTemplate, PersistenceError> {
    Ok(PermissionTemplate { id: id as u64,
                            name,
                            permissions: serde_json::from_value(permissions)? })
}

fn user_grant_from_row((id, username, instance_id, schema, table): (i64, String, String, String, String)) -> UserPermission {
    UserPermission { id: id as u64,
                     username,
                     object: PermissionObject { instance_id, schema, table } }
}

/// Repositorio Postgres de plantillas y concesiones. Las bajas marcan `deleted_at`.
pub struct PgPermissionRepository<P: ConnectionProvider> {
    pub provider: P,
}

impl<P: ConnectionProvider> PgPermissionRepository<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Concesiones vigentes de todos los roles.
    pub fn list_role_permissions(&self) -> Result<Vec<RolePermission>, PolicyError> {
        let rows: Vec<(i64, String, Value)> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            role_permissions::table.filter(role_permissions::deleted_at.is_null())
                                   .order(role_permissions::id.asc())
                                   .select((role_permissions::id, role_permissions::role, role_permissions::grant_spec))
                                   .load(&mut conn)
                                   .map_err(PersistenceError::from)
        })?;
        Ok(rows.into_iter().filter_map(grant_from_row).collect())
    }
}

/// Filas con `grant_spec` ilegible se omiten con un aviso.
fn grant_from_row((id, role, spec): (i64, String, Value)) -> Option<RolePermission> {
    match serde_json::from_value::<Grant>(spec) {
        Ok(grant) => Some(RolePermission { id: id as u64, role, grant }),
        Err(e) => {
            warn!("role_permissions:skip_unreadable id={id} err={e}");
            None
        }
    }
}

impl<P: ConnectionProvider> PermissionRepository for PgPermissionRepository<P> {
    fn role_permissions(&self, role: &str) -> Result<Vec<RolePermission>, PolicyError> {
        let rows: Vec<(i64, String, Value)> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            role_permissions::table.filter(role_permissions::role.eq(role))
                                   .filter(role_permissions::deleted_at.is_null())
                                   .order(role_permissions::id.asc())
                                   .select((role_permissions::id, role_permissions::role, role_permissions::grant_spec))
                                   .load(&mut conn)
                                   .map_err(PersistenceError::from)
        })?;
        debug!("role_permissions role={} rows={}", role, rows.len());
        Ok(rows.into_iter().filter_map(grant_from_row).collect())
    }

    fn template(&self, id: u64) -> Result<Option<PermissionTemplate>, PolicyError> {
        let id = to_id(id)?;
        let row: Option<(i64, String, Value)> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            permission_templates::table.find(id)
                                       .filter(permission_templates::deleted_at.is_null())
                                       .select((permission_templates::id, permission_templates::name, permission_templates::permissions))
                                       .first(&mut conn)
                                       .optional()
                                       .map_err(PersistenceError::from)
        })?;
        Ok(row.map(template_from_row).transpose()?)
    }

    fn user_permissions(&self, username: &str) -> Result<Vec<UserPermission>, PolicyError> {
        let rows: Vec<(i64, String, String, String, String)> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            user_permissions::table.filter(user_permissions::username.eq(username))
                                   .filter(user_permissions::deleted_at.is_null())
                                   .order(user_permissions::id.asc())
                                   .select((user_permissions::id,
                                            user_permissions::username,
                                            user_permissions::instance_id,
                                            user_permissions::schema_name,
                                            user_permissions::table_name))
                                   .load(&mut conn)
                                   .map_err(PersistenceError::from)
        })?;
        debug!("user_permissions user={} rows={}", username, rows.len());
        Ok(rows.into_iter().map(user_grant_from_row).collect())
    }
}

impl<P: ConnectionProvider> PermissionAdmin for PgPermissionRepository<P> {
    fn create_template(&self, name: &str, permissions: Vec<PermissionObject>) -> Result<PermissionTemplate, PolicyError> {
        validate_template(name, &permissions)?;
        let name = name.trim().to_string();
        let json = serde_json::to_value(&permissions).map_err(|e| PolicyError::Storage(e.to_string()))?;
        let id: i64 = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(permission_templates::table).values((permission_templates::name.eq(&name),
                                                                     permission_templates::permissions.eq(&json)))
                                                            .returning(permission_templates::id)
                                                            .get_result(&mut conn)
                                                            .map_err(PersistenceError::from)
        })?;
        Ok(PermissionTemplate { id: id as u64,
                                name,
                                permissions })
    }

    fn update_template(&self, id: u64, name: Option<String>, permissions: Option<Vec<PermissionObject>>) -> Result<PermissionTemplate, PolicyError> {
        let current = self.template(id)?.ok_or_else(|| PolicyError::NotFound(format!("template {id}")))?;
        let name = name.unwrap_or(current.name).trim().to_string();
        let permissions = permissions.unwrap_or(current.permissions);
        validate_template(&name, &permissions)?;
        let json = serde_json::to_value(&permissions).map_err(|e| PolicyError::Storage(e.to_string()))?;
        let key = to_id(id)?;
        let updated = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::update(permission_templates::table.find(key).filter(permission_templates::deleted_at.is_null()))
                .set((permission_templates::name.eq(&name), permission_templates::permissions.eq(&json)))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        })?;
        if updated == 0 {
            return Err(PolicyError::NotFound(format!("template {id}")));
        }
        Ok(PermissionTemplate { id, name, permissions })
    }

    fn delete_template(&self, id: u64) -> Result<(), PolicyError> {
        let key = to_id(id)?;
        let updated = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::update(permission_templates::table.find(key).filter(permission_templates::deleted_at.is_null()))
                .set(permission_templates::deleted_at.eq(Some(Utc::now())))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        })?;
        if updated == 0 {
            return Err(PolicyError::NotFound(format!("template {id}")));
        }
        Ok(())
    }

    fn list_templates(&self) -> Result<Vec<PermissionTemplate>, PolicyError> {
        let rows: Vec<(i64, String, Value)> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            permission_templates::table.filter(permission_templates::deleted_at.is_null())
                                       .order(permission_templates::id.asc())
                                       .select((permission_templates::id, permission_templates::name, permission_templates::permissions))
                                       .load(&mut conn)
                                       .map_err(PersistenceError::from)
        })?;
        rows.into_iter()
            .map(|r| template_from_row(r).map_err(PolicyError::from))
            .collect()
    }

    fn grant(&self, role: &str, grant: Grant) -> Result<RolePermission, PolicyError> {
        if role.trim().is_empty() {
            return Err(PolicyError::Validation("role is required".into()));
        }
        grant.validate()?;
        let spec = serde_json::to_value(&grant).map_err(|e| PolicyError::Storage(e.to_string()))?;
        let id: i64 = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(role_permissions::table).values((role_permissions::role.eq(role), role_permissions::grant_spec.eq(&spec)))
                                                        .returning(role_permissions::id)
                                                        .get_result(&mut conn)
                                                        .map_err(PersistenceError::from)
        })?;
        Ok(RolePermission { id: id as u64,
                            role: role.to_string(),
                            grant })
    }

    fn revoke(&self, id: u64) -> Result<(), PolicyError> {
        let key = to_id(id)?;
        let updated = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::update(role_permissions::table.find(key).filter(role_permissions::deleted_at.is_null()))
                .set(role_permissions::deleted_at.eq(Some(Utc::now())))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        })?;
        if updated == 0 {
            return Err(PolicyError::NotFound(format!("role permission {id}")));
        }
        Ok(())
    }

    fn grant_user(&self, username: &str, object: PermissionObject) -> Result<UserPermission, PolicyError> {
        validate_user_grant(username, &object)?;
        let username = username.trim().to_string();
        let id: i64 = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(user_permissions::table).values((user_permissions::username.eq(&username),
                                                                 user_permissions::instance_id.eq(&object.instance_id),
                                                                 user_permissions::schema_name.eq(&object.schema),
                                                                 user_permissions::table_name.eq(&object.table)))
                                                        .returning(user_permissions::id)
                                                        .get_result(&mut conn)
                                                        .map_err(PersistenceError::from)
        })?;
        Ok(UserPermission { id: id as u64, username, object })
    }

    fn revoke_user(&self, id: u64) -> Result<(), PolicyError> {
        let key = to_id(id)?;
        let updated = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::update(user_permissions::table.find(key).filter(user_permissions::deleted_at.is_null()))
                .set(user_permissions::deleted_at.eq(Some(Utc::now())))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        })?;
        if updated == 0 {
            return Err(PolicyError::NotFound(format!("user permission {id}")));
        }
        Ok(())
    }
}
