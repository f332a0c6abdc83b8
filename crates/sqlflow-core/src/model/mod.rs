//! Modelo de dominio: órdenes, tareas, bitácora y enumeraciones de estado.
//!
//! Todas las enumeraciones conservan la forma textual que viaja por el
//! store y el transporte (`as_str` / `FromStr` / serde producen lo mismo).

macro_rules! wire_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text, )+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::errors::CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err($crate::errors::CoreError::Validation(format!(
                        concat!("unknown ", stringify!($name), " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

pub mod kinds;
pub mod oplog;
pub mod order;
pub mod progress;
pub mod task;

pub use kinds::{DbKind, ExportFormat, SqlKind};
pub use oplog::OpLog;
pub use order::{Approver, ExecuteResult, NewOrder, Order, OrderFilter};
pub use progress::{Decision, OrderProgress, TaskProgress};
pub use task::{Task, TaskResult};
