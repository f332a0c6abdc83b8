use diesel::prelude::*;
use sqlflow_core::{CoreError, DbKind, InstanceCatalog, TargetDatabase};
use uuid::Uuid;

use super::{with_retry, ConnectionProvider};
use crate::error::PersistenceError;
use crate::schema::db_instances;

#[derive(Queryable, Debug)]
struct InstanceRow {
    host: String,
    port: i32,
    username: String,
    password: String,
    db_kind: String,
}

/// Catálogo de instancias destino sobre la tabla `db_instances`.
pub struct PgInstanceCatalog<P: ConnectionProvider> {
    pub provider: P,
}

impl<P: ConnectionProvider> PgInstanceCatalog<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Alta o reemplazo de una instancia.
    pub fn register(&self, id: Uuid, target: &TargetDatabase) -> Result<(), CoreError> {
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(db_instances::table).values((db_instances::id.eq(id),
                                                             db_instances::host.eq(&target.host),
                                                             db_instances::port.eq(i32::from(target.port)),
                                                             db_instances::username.eq(&target.user),
                                                             db_instances::password.eq(&target.password),
                                                             db_instances::db_kind.eq(target.db_kind.as_str())))
                                                    .on_conflict(db_instances::id)
                                                    .do_update()
                                                    .set((db_instances::host.eq(&target.host),
                                                          db_instances::port.eq(i32::from(target.port)),
                                                          db_instances::username.eq(&target.user),
                                                          db_instances::password.eq(&target.password),
                                                          db_instances::db_kind.eq(target.db_kind.as_str())))
                                                    .execute(&mut conn)
                                                    .map_err(PersistenceError::from)
        })?;
        Ok(())
    }
}

impl<P: ConnectionProvider> InstanceCatalog for PgInstanceCatalog<P> {
    fn resolve(&self, instance_id: Uuid) -> Result<TargetDatabase, CoreError> {
        let row: Option<InstanceRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            db_instances::table.find(instance_id)
                               .select((db_instances::host,
                                        db_instances::port,
                                        db_instances::username,
                                        db_instances::password,
                                        db_instances::db_kind))
                               .first(&mut conn)
                               .optional()
                               .map_err(PersistenceError::from)
        })?;
        let row = row.ok_or_else(|| CoreError::not_found("instance", instance_id))?;
        let port = u16::try_from(row.port).map_err(|_| CoreError::Internal(format!("instance {instance_id} has invalid port {}", row.port)))?;
        Ok(TargetDatabase { host: row.host,
                            port,
                            user: row.username,
                            password: row.password,
                            db_kind: row.db_kind.parse::<DbKind>()? })
    }
}
