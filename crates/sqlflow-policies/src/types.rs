//! Tipos de permisos con la forma de cable preservada.

use serde::{Deserialize, Serialize};

use crate::errors::PolicyError;

/// Objeto accesible: `(instanceID, schema, table)`. Tabla vacía = todo el esquema.
/// Valor sin identidad propia: la igualdad es por la terna.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PermissionObject {
    #[serde(rename = "instanceID")]
    pub instance_id: String,
    pub schema: String,
    #[serde(default)]
    pub table: String,
}

impl PermissionObject {
    pub fn schema_level(instance_id: impl Into<String>, schema: impl Into<String>) -> Self {
        Self { instance_id: instance_id.into(),
               schema: schema.into(),
               table: String::new() }
    }

    pub fn table_level(instance_id: impl Into<String>, schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self { instance_id: instance_id.into(),
               schema: schema.into(),
               table: table.into() }
    }

    pub fn is_schema_level(&self) -> bool {
        self.table.is_empty()
    }

    /// ¿Este permiso cubre el acceso pedido?
    ///
    /// Sin tabla pedida basta un permiso sobre la instancia y el esquema. Con
    /// tabla, vale un permiso de esquema completo o uno exacto sobre esa tabla.
    pub fn covers(&self, instance_id: &str, schema: &str, table: Option<&str>) -> bool {
        if self.instance_id != instance_id || self.schema != schema {
            return false;
        }
        match table {
            None => true,
            Some(t) => self.is_schema_level() || self.table == t,
        }
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.instance_id.trim().is_empty() || self.schema.trim().is_empty() {
            return Err(PolicyError::Validation("instanceID and schema are required".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionTemplate {
    pub id: u64,
    pub name: String,
    pub permissions: Vec<PermissionObject>,
}

/// Concesión de un rol: objeto directo o referencia a plantilla.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Grant {
    Object(PermissionObject),
    Template {
        #[serde(rename = "templateID")]
        template_id: u64,
    },
}

impl Grant {
    pub fn validate(&self) -> Result<(), PolicyError> {
        match self {
            Grant::Object(o) => o.validate(),
            Grant::Template { .. } => Ok(()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermission {
    pub id: u64,
    pub role: String,
    #[serde(flatten)]
    pub grant: Grant,
}

/// Concesión directa a un usuario, sin pasar por roles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPermission {
    pub id: u64,
    pub username: String,
    #[serde(flatten)]
    pub object: PermissionObject,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn grant_wire_shape_is_tagged() {
        let direct = RolePermission { id: 1,
                                      role: "dev".into(),
                                      grant: Grant::Object(PermissionObject::table_level("i1", "shop", "orders")) };
        assert_eq!(serde_json::to_value(&direct).unwrap(),
                   json!({"id": 1, "role": "dev", "kind": "object", "instanceID": "i1", "schema": "shop", "table": "orders"}));

        let tpl: RolePermission = serde_json::from_value(json!({"id": 2, "role": "dev", "kind": "template", "templateID": 7})).unwrap();
        assert_eq!(tpl.grant, Grant::Template { template_id: 7 });
    }

    #[test]
    fn user_grant_wire_shape_is_flat() {
        let up = UserPermission { id: 3,
                                  username: "bob".into(),
                                  object: PermissionObject::schema_level("i1", "shop") };
        assert_eq!(serde_json::to_value(&up).unwrap(),
                   json!({"id": 3, "username": "bob", "instanceID": "i1", "schema": "shop", "table": ""}));
    }

    #[test]
    fn missing_table_means_whole_schema() {
        let o: PermissionObject = serde_json::from_value(json!({"instanceID": "i1", "schema": "shop"})).unwrap();
        assert!(o.is_schema_level());
        assert!(o.covers("i1", "shop", Some("anything")));
        assert!(!o.covers("i1", "other", None));
    }

    #[test]
    fn table_grant_only_covers_its_table() {
        let o = PermissionObject::table_level("i1", "shop", "orders");
        assert!(o.covers("i1", "shop", Some("orders")));
        assert!(!o.covers("i1", "shop", Some("users")));
        assert!(o.covers("i1", "shop", None));
    }
}
