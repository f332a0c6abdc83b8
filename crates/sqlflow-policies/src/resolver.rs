//! Resolución de permisos efectivos.
//!
//! Expande las concesiones de cada rol (directas o vía plantilla), suma las
//! concesiones directas del usuario y une todo deduplicando por la terna
//! `(instanceID, schema, table)`. La unión es idempotente y no depende del
//! orden en que se descubren los objetos.

use std::sync::Arc;

use indexmap::IndexSet;
use log::{debug, warn};
use sqlflow_core::Authorizer;

use crate::errors::PolicyError;
use crate::repository::PermissionRepository;
use crate::types::{Grant, PermissionObject};

pub struct PermissionResolver {
    repo: Arc<dyn PermissionRepository>,
    authz: Arc<dyn Authorizer>,
}

impl PermissionResolver {
    pub fn new(repo: Arc<dyn PermissionRepository>, authz: Arc<dyn Authorizer>) -> Self {
        Self { repo, authz }
    }

    /// Objetos concedidos a un rol. Una plantilla inexistente se omite.
    pub fn expand_role(&self, role: &str) -> Result<Vec<PermissionObject>, PolicyError> {
        let mut out = Vec::new();
        for rp in self.repo.role_permissions(role)? {
            match rp.grant {
                Grant::Object(obj) => out.push(obj),
                Grant::Template { template_id } => match self.repo.template(template_id)? {
                    Some(tpl) => out.extend(tpl.permissions),
                    None => warn!("policies:template_missing role={} template={}", role, template_id),
                },
            }
        }
        Ok(out)
    }

    /// Unión deduplicada de la expansión de los roles dados.
    pub fn permissions_for_roles<'a, I>(&self, roles: I) -> Result<IndexSet<PermissionObject>, PolicyError>
        where I: IntoIterator<Item = &'a str>
    {
        let mut set = IndexSet::new();
        for role in roles {
            set.extend(self.expand_role(role)?);
        }
        Ok(set)
    }

    pub fn effective_permissions(&self, user: &str) -> Result<IndexSet<PermissionObject>, PolicyError> {
        let roles = self.authz.roles_for_user(user);
        let mut set = self.permissions_for_roles(roles.iter().map(String::as_str))?;
        let direct = self.repo.user_permissions(user)?;
        let direct_count = direct.len();
        set.extend(direct.into_iter().map(|up| up.object));
        debug!("policies:effective user={} roles={} direct={} objects={}", user, roles.len(), direct_count, set.len());
        Ok(set)
    }

    /// ¿Puede `user` consultar `instance_id/schema[/table]`?
    pub fn authorize_query(&self, user: &str, instance_id: &str, schema: &str, table: Option<&str>) -> Result<bool, PolicyError> {
        let allowed = self.effective_permissions(user)?
                          .iter()
                          .any(|p| p.covers(instance_id, schema, table));
        debug!("policies:authorize user={} target={}/{}/{} allowed={}", user, instance_id, schema, table.unwrap_or("*"), allowed);
        Ok(allowed)
    }
}
