//! Ejecución diferida de órdenes con hora programada.
//!
//! Cada orden registrada tiene a lo sumo un job vivo en `jobs`, incluidos los
//! de recuperación (hora ya pasada), que se arman con espera cero. El mapa se
//! comparte entre `register`, `cancel` y la limpieza que hace cada job al
//! terminar, por eso vive detrás de un mutex. Un número de generación evita
//! que un job viejo borre la entrada de uno más reciente.
//!
//! Un job pasa de `ARMED` a `FIRING` antes de ejecutar; `cancel` sólo aborta
//! jobs armados, así una ejecución en curso nunca se corta a mitad de task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::model::{Order, OrderFilter, OrderProgress};
use crate::store::{blocking, OrderStore};
use crate::tasks::ScheduledExecution;

/// Programación de un único disparo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OneTimeSchedule {
    pub at: DateTime<Utc>,
}

impl OneTimeSchedule {
    /// Próximo disparo: `Some(at)` si aún no pasó, `None` ("nunca") si ya pasó.
    pub fn next(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (self.at > now).then_some(self.at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// La orden no tiene hora programada.
    NotScheduled,
    /// La hora ya pasó: el job se armó sin espera. `Scheduler::wait_due`
    /// permite esperarlo.
    CatchUp,
    Scheduled { at: DateTime<Utc> },
    /// Ya hay un disparo de esta orden ejecutando; se deja terminar.
    Running,
}

const ARMED: u8 = 0;
const FIRING: u8 = 1;
const CANCELLED: u8 = 2;

struct Job {
    generation: u64,
    deadline: Instant,
    state: Arc<AtomicU8>,
    handle: JoinHandle<()>,
}

impl Job {
    fn disarm(&self) -> bool {
        self.state
            .compare_exchange(ARMED, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn is_firing(&self) -> bool {
        self.state.load(Ordering::SeqCst) == FIRING
    }
}

type JobMap = Arc<Mutex<HashMap<Uuid, Job>>>;

fn lock_jobs(jobs: &JobMap) -> MutexGuard<'_, HashMap<Uuid, Job>> {
    // el mapa sólo guarda handles; si otro hilo entró en pánico el contenido sigue siendo válido
    jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Scheduler<S: OrderStore> {
    store: Arc<S>,
    runner: Arc<dyn ScheduledExecution>,
    jobs: JobMap,
    generation: AtomicU64,
}

impl<S: OrderStore> Scheduler<S> {
    pub fn new(store: Arc<S>, runner: Arc<dyn ScheduledExecution>) -> Self {
        Self { store,
               runner,
               jobs: Arc::new(Mutex::new(HashMap::new())),
               generation: AtomicU64::new(0) }
    }

    /// Registra el job de la orden, reemplazando uno previo si sigue armado.
    pub fn register(&self, order: &Order) -> Registration {
        let Some(at) = order.schedule_time else {
            return Registration::NotScheduled;
        };
        if lock_jobs(&self.jobs).get(&order.id).is_some_and(Job::is_firing) {
            info!("scheduler:register_skipped order={} reason=running", order.id);
            return Registration::Running;
        }
        self.cancel(order.id);
        let now = Utc::now();
        match (OneTimeSchedule { at }).next(now) {
            None => {
                info!("scheduler:catch_up order={} scheduled_at={}", order.id, at);
                self.arm(order.id, Duration::ZERO);
                Registration::CatchUp
            }
            Some(at) => {
                let delay = (at - now).to_std().unwrap_or(Duration::ZERO);
                self.arm(order.id, delay);
                info!("scheduler:register order={} at={} delay_ms={}", order.id, at, delay.as_millis());
                Registration::Scheduled { at }
            }
        }
    }

    fn arm(&self, order_id: Uuid, delay: Duration) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + delay;
        let state = Arc::new(AtomicU8::new(ARMED));
        let store = self.store.clone();
        let runner = self.runner.clone();
        let jobs = self.jobs.clone();
        let flag = state.clone();
        // el job no puede limpiar su entrada antes de que se inserte
        let mut guard = lock_jobs(&self.jobs);
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if flag.compare_exchange(ARMED, FIRING, Ordering::SeqCst, Ordering::SeqCst).is_err() {
                return;
            }
            fire(store, runner, order_id).await;
            let mut map = lock_jobs(&jobs);
            if map.get(&order_id).is_some_and(|j| j.generation == generation) {
                map.remove(&order_id);
            }
        });
        guard.insert(order_id,
                     Job { generation,
                           deadline,
                           state,
                           handle });
    }

    /// Desarma el job de la orden. Devuelve si había uno armado; un job que
    /// ya está ejecutando no se toca.
    pub fn cancel(&self, order_id: Uuid) -> bool {
        let mut map = lock_jobs(&self.jobs);
        let Some(job) = map.get(&order_id) else {
            return false;
        };
        if !job.disarm() {
            debug!("scheduler:cancel_skipped order={} reason=running", order_id);
            return false;
        }
        if let Some(job) = map.remove(&order_id) {
            job.handle.abort();
        }
        debug!("scheduler:cancel order={}", order_id);
        true
    }

    /// Re-registra las órdenes aprobadas con hora programada (arranque del proceso).
    pub fn reconcile(&self) -> Result<usize, CoreError> {
        let orders = self.store.list_orders(&approved_scheduled())?;
        for order in &orders {
            self.register(order);
        }
        info!("scheduler:reconcile registered={}", orders.len());
        Ok(orders.len())
    }

    /// Como `reconcile`, pero deja intactos los jobs ya armados o en curso.
    /// Sirve para recoger aprobaciones hechas por otro proceso.
    pub fn sweep(&self) -> Result<usize, CoreError> {
        let mut armed = 0;
        for order in self.store.list_orders(&approved_scheduled())? {
            if !self.is_registered(order.id) {
                self.register(&order);
                armed += 1;
            }
        }
        if armed > 0 {
            info!("scheduler:sweep registered={}", armed);
        }
        Ok(armed)
    }

    /// Espera a que terminen los jobs ya vencidos, incluidos los de
    /// recuperación. Los jobs futuros siguen armados. Devuelve cuántos esperó.
    pub async fn wait_due(&self) -> usize {
        let now = Instant::now();
        let due: Vec<(Uuid, JoinHandle<()>)> = {
            let mut map = lock_jobs(&self.jobs);
            let ids: Vec<Uuid> = map.iter().filter(|(_, j)| j.deadline <= now).map(|(id, _)| *id).collect();
            ids.into_iter()
               .filter_map(|id| map.remove(&id).map(|job| (id, job.handle)))
               .collect()
        };
        let waited = due.len();
        for (order_id, handle) in due {
            if let Err(e) = handle.await {
                warn!("scheduler:wait_failed order={} err={}", order_id, e);
            }
        }
        if waited > 0 {
            debug!("scheduler:wait_due waited={}", waited);
        }
        waited
    }

    pub fn is_registered(&self, order_id: Uuid) -> bool {
        lock_jobs(&self.jobs).contains_key(&order_id)
    }

    pub fn pending(&self) -> usize {
        lock_jobs(&self.jobs).len()
    }
}

impl<S: OrderStore> Drop for Scheduler<S> {
    fn drop(&mut self) {
        for (_, job) in lock_jobs(&self.jobs).drain() {
            if job.disarm() {
                job.handle.abort();
            }
        }
    }
}

fn approved_scheduled() -> OrderFilter {
    OrderFilter { progress: Some(OrderProgress::Approved),
                  scheduled_only: true,
                  ..Default::default() }
}

/// Callback del job: sólo ejecuta si la orden sigue `Approved`.
async fn fire<S: OrderStore>(store: Arc<S>, runner: Arc<dyn ScheduledExecution>, order_id: Uuid) {
    let order = match blocking(&store, move |s| s.get_order(order_id)).await {
        Ok(o) => o,
        Err(e) => {
            warn!("scheduler:fire_lookup_failed order={} err={}", order_id, e);
            return;
        }
    };
    if order.progress != OrderProgress::Approved {
        debug!("scheduler:fire_skipped order={} progress={}", order_id, order.progress);
        return;
    }
    info!("scheduler:fire order={} executor={}", order_id, order.default_executor());
    if let Err(e) = runner.execute_order(&order).await {
        error!("scheduler:fire_failed order={} err={}", order_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn one_time_schedule_fires_once() {
        let now = Utc::now();
        let s = OneTimeSchedule { at: now + ChronoDuration::seconds(5) };
        assert_eq!(s.next(now), Some(s.at));
        assert_eq!(s.next(s.at), None);
        assert_eq!(s.next(now + ChronoDuration::hours(1)), None);
    }
}
