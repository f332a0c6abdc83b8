use serde::{Deserialize, Serialize};

/// Tipo de sentencia declarado por el solicitante.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlKind {
    #[serde(rename = "DDL")]
    Ddl,
    #[serde(rename = "DML")]
    Dml,
    #[serde(rename = "EXPORT")]
    Export,
}

wire_enum!(SqlKind {
    Ddl => "DDL",
    Dml => "DML",
    Export => "EXPORT",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DbKind {
    #[default]
    MySQL,
    TiDB,
    ClickHouse,
}

wire_enum!(DbKind {
    MySQL => "MySQL",
    TiDB => "TiDB",
    ClickHouse => "ClickHouse",
});

impl DbKind {
    /// Sólo los motores compatibles con el protocolo MySQL admiten el
    /// cambio estructural en línea.
    pub fn supports_online_ddl(&self) -> bool {
        matches!(self, DbKind::MySQL)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

wire_enum!(ExportFormat {
    Json => "json",
    Csv => "csv",
});

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}
