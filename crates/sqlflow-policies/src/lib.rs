//! sqlflow-policies: permisos efectivos por rol
//!
//! Un rol recibe objetos `(instancia, esquema, tabla)` directamente o a
//! través de plantillas reutilizables; un usuario puede además recibir
//! objetos sueltos a su nombre. El resolvedor expande todo y decide si un
//! usuario puede consultar un objeto dado.

pub mod errors;
pub mod repository;
pub mod resolver;
pub mod types;

pub use errors::PolicyError;
pub use repository::{InMemoryPermissionRepository, PermissionAdmin, PermissionRepository};
pub use resolver::PermissionResolver;
pub use types::{Grant, PermissionObject, PermissionTemplate, RolePermission, UserPermission};
