use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::{debug, error};
use serde_json::Value;
use sqlflow_core::{CoreError, OpLog, Order, OrderFilter, OrderStore, OrderTx, Task};
use uuid::Uuid;

use super::{with_retry, ConnectionProvider};
use crate::error::PersistenceError;
use crate::schema::{order_oplogs, order_tasks, orders};

#[derive(Insertable, AsChangeset, Debug)]
#[diesel(table_name = orders, treat_none_as_null = true)]
struct OrderRow<'a> {
    id: Uuid,
    title: &'a str,
    applicant: &'a str,
    progress: &'static str,
    sql_kind: &'static str,
    environment: &'a str,
    schedule_time: Option<DateTime<Utc>>,
    payload: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'a> OrderRow<'a> {
    fn from_order(order: &'a Order) -> Result<Self, PersistenceError> {
        Ok(Self { id: order.id,
                  title: &order.title,
                  applicant: &order.applicant,
                  progress: order.progress.as_str(),
                  sql_kind: order.sql_kind.as_str(),
                  environment: &order.environment,
                  schedule_time: order.schedule_time,
                  payload: serde_json::to_value(order)?,
                  created_at: order.created_at,
                  updated_at: order.updated_at })
    }
}

#[derive(Insertable, AsChangeset, Debug)]
#[diesel(table_name = order_tasks)]
struct TaskRow {
    id: Uuid,
    order_id: Uuid,
    seq: i32,
    progress: &'static str,
    payload: Value,
    updated_at: DateTime<Utc>,
}

impl TaskRow {
    fn from_task(task: &Task) -> Result<Self, PersistenceError> {
        Ok(Self { id: task.id,
                  order_id: task.order_id,
                  seq: i32::try_from(task.seq).map_err(|_| PersistenceError::CheckViolation(format!("task seq {} out of range", task.seq)))?,
                  progress: task.progress.as_str(),
                  payload: serde_json::to_value(task)?,
                  updated_at: task.updated_at })
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = order_oplogs)]
struct NewOpLogRow<'a> {
    order_id: Uuid,
    username: &'a str,
    msg: &'a str,
    created_at: DateTime<Utc>,
}

fn upsert_order(conn: &mut PgConnection, order: &Order) -> Result<(), PersistenceError> {
    let row = OrderRow::from_order(order)?;
    diesel::insert_into(orders::table).values(&row)
                                      .on_conflict(orders::id)
                                      .do_update()
                                      .set(&row)
                                      .execute(conn)?;
    Ok(())
}

fn upsert_task(conn: &mut PgConnection, task: &Task) -> Result<(), PersistenceError> {
    let row = TaskRow::from_task(task)?;
    diesel::insert_into(order_tasks::table).values(&row)
                                           .on_conflict(order_tasks::id)
                                           .do_update()
                                           .set(&row)
                                           .execute(conn)?;
    Ok(())
}

fn load_tasks(conn: &mut PgConnection, order_id: Uuid) -> Result<Vec<Task>, PersistenceError> {
    let payloads: Vec<Value> = order_tasks::table.filter(order_tasks::order_id.eq(order_id))
                                                 .order(order_tasks::seq.asc())
                                                 .select(order_tasks::payload)
                                                 .load(conn)?;
    payloads.into_iter()
            .map(|p| serde_json::from_value(p).map_err(PersistenceError::from))
            .collect()
}

/// Store Postgres de órdenes.
pub struct PgOrderStore<P: ConnectionProvider> {
    pub provider: P,
}

impl<P: ConnectionProvider> PgOrderStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P: ConnectionProvider> OrderStore for PgOrderStore<P> {
    fn insert_order(&self, order: &Order) -> Result<(), CoreError> {
        debug!("insert_order:start order={}", order.id);
        let row = OrderRow::from_order(order)?;
        let res = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(orders::table).values(&row)
                                              .execute(&mut conn)
                                              .map_err(PersistenceError::from)
        });
        match res {
            Ok(_) => Ok(()),
            Err(PersistenceError::UniqueViolation(_)) => Err(CoreError::Validation(format!("order {} already exists", order.id))),
            Err(e) => {
                error!("insert_order:error order={} err={:?}", order.id, e);
                Err(e.into())
            }
        }
    }

    fn get_order(&self, id: Uuid) -> Result<Order, CoreError> {
        let payload: Option<Value> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            orders::table.find(id)
                         .select(orders::payload)
                         .first(&mut conn)
                         .optional()
                         .map_err(PersistenceError::from)
        })?;
        let payload = payload.ok_or_else(|| CoreError::not_found("order", id))?;
        Ok(serde_json::from_value(payload)?)
    }

    fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, CoreError> {
        let payloads: Vec<Value> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            let mut query = orders::table.select(orders::payload).into_boxed();
            if let Some(applicant) = &filter.applicant {
                query = query.filter(orders::applicant.eq(applicant.clone()));
            }
            if let Some(progress) = filter.progress {
                query = query.filter(orders::progress.eq(progress.as_str()));
            }
            if let Some(kind) = filter.sql_kind {
                query = query.filter(orders::sql_kind.eq(kind.as_str()));
            }
            if let Some(env) = &filter.environment {
                query = query.filter(orders::environment.eq(env.clone()));
            }
            if filter.scheduled_only {
                query = query.filter(orders::schedule_time.is_not_null());
            }
            query.order(orders::created_at.desc())
                 .load(&mut conn)
                 .map_err(PersistenceError::from)
        })?;
        let mut out = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let order: Order = serde_json::from_value(payload)?;
            // el título se compara en memoria con la misma regla que el store en memoria
            if filter.matches(&order) {
                out.push(order);
            }
        }
        Ok(out)
    }

    fn get_task(&self, id: Uuid) -> Result<Task, CoreError> {
        let payload: Option<Value> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            order_tasks::table.find(id)
                              .select(order_tasks::payload)
                              .first(&mut conn)
                              .optional()
                              .map_err(PersistenceError::from)
        })?;
        let payload = payload.ok_or_else(|| CoreError::not_found("task", id))?;
        Ok(serde_json::from_value(payload)?)
    }

    fn list_tasks(&self, order_id: Uuid) -> Result<Vec<Task>, CoreError> {
        Ok(with_retry(|| {
            let mut conn = self.provider.connection()?;
            load_tasks(&mut conn, order_id)
        })?)
    }

    fn transact<T, F>(&self, order_id: Uuid, mut f: F) -> Result<T, CoreError>
        where F: FnMut(&mut OrderTx) -> Result<T, CoreError>
    {
        debug!("transact:start order={order_id}");
        let out = with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction().read_write().run(|c| {
                let payload: Value = orders::table.find(order_id)
                                                  .select(orders::payload)
                                                  .for_update()
                                                  .first(c)
                                                  .optional()?
                                                  .ok_or_else(|| PersistenceError::Rejected(CoreError::not_found("order", order_id)))?;
                let order: Order = serde_json::from_value(payload)?;
                let tasks = load_tasks(c, order_id)?;
                let mut tx = OrderTx { order, tasks };
                let out = f(&mut tx).map_err(PersistenceError::Rejected)?;
                if let Some(stray) = tx.tasks.iter().find(|t| t.order_id != order_id) {
                    return Err(PersistenceError::Rejected(CoreError::Internal(format!("task {} does not belong to order {order_id}", stray.id))));
                }
                upsert_order(c, &tx.order)?;
                for task in &tx.tasks {
                    upsert_task(c, task)?;
                }
                Ok::<T, PersistenceError>(out)
            })
        })?;
        debug!("transact:done order={order_id}");
        Ok(out)
    }

    fn append_log(&self, log: &OpLog) -> Result<(), CoreError> {
        let row = NewOpLogRow { order_id: log.order_id,
                                username: &log.username,
                                msg: &log.msg,
                                created_at: log.created_at };
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(order_oplogs::table).values(&row)
                                                    .execute(&mut conn)
                                                    .map_err(PersistenceError::from)
        })?;
        Ok(())
    }

    fn list_logs(&self, order_id: Uuid) -> Result<Vec<OpLog>, CoreError> {
        let rows: Vec<(String, Uuid, String, DateTime<Utc>)> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            order_oplogs::table.filter(order_oplogs::order_id.eq(order_id))
                               .order((order_oplogs::created_at.asc(), order_oplogs::id.asc()))
                               .select((order_oplogs::username, order_oplogs::order_id, order_oplogs::msg, order_oplogs::created_at))
                               .load(&mut conn)
                               .map_err(PersistenceError::from)
        })?;
        Ok(rows.into_iter()
               .map(|(username, order_id, msg, created_at)| OpLog { username,
                                                                     order_id,
                                                                     msg,
                                                                     created_at })
               .collect())
    }
}
