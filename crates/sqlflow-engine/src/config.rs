use std::path::PathBuf;
use std::time::Duration;

/// Parámetros del motor. `Default` sirve para tests y embebidos; el binario
/// los arma desde el entorno.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Ejecutable de la herramienta de cambio estructural en línea.
    pub ghost_bin: PathBuf,
    /// Directorio de los sockets de control.
    pub socket_dir: PathBuf,
    pub export_dir: PathBuf,
    pub statement_timeout: Duration,
    pub connect_timeout: Duration,
    pub control_timeout: Duration,
    /// Tamaño de lote inicial de la copia de filas.
    pub chunk_size: u32,
    /// Argumentos extra que se agregan tal cual a la línea de comando.
    pub extra_ghost_args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { ghost_bin: PathBuf::from("gh-ost"),
               socket_dir: PathBuf::from("/tmp"),
               export_dir: PathBuf::from("/tmp/sqlflow-exports"),
               statement_timeout: Duration::from_secs(600),
               connect_timeout: Duration::from_secs(10),
               control_timeout: Duration::from_secs(5),
               chunk_size: 1000,
               extra_ghost_args: Vec::new() }
    }
}
