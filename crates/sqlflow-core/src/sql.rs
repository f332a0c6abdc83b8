//! Utilidades léxicas de SQL.
//!
//! No es un parser: sólo separa sentencias respetando comillas y comentarios,
//! clasifica por palabra clave inicial y extrae la tabla de un `ALTER TABLE`.
//! Suficiente para dividir órdenes en tasks y verificar el tipo declarado.

use crate::errors::CoreError;
use crate::model::SqlKind;

/// Colaborador de división de sentencias.
pub trait SqlSplitter: Send + Sync {
    fn split(&self, sql: &str) -> Vec<String>;
}

/// Divisor por `;` que ignora separadores dentro de literales
/// (`'`, `"`, `` ` ``) y comentarios (`--`, `#`, `/* */`).
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalSplitter;

impl SqlSplitter for LexicalSplitter {
    fn split(&self, sql: &str) -> Vec<String> {
        let chars: Vec<char> = sql.chars().collect();
        let mut out = Vec::new();
        let mut current = String::new();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            match c {
                '\'' | '"' | '`' => {
                    current.push(c);
                    i += 1;
                    while i < chars.len() {
                        let d = chars[i];
                        current.push(d);
                        i += 1;
                        if d == '\\' && c != '`' && i < chars.len() {
                            current.push(chars[i]);
                            i += 1;
                        } else if d == c {
                            break;
                        }
                    }
                    continue;
                }
                '-' if chars.get(i + 1) == Some(&'-') => {
                    i = skip_line(&chars, i);
                    continue;
                }
                '#' => {
                    i = skip_line(&chars, i);
                    continue;
                }
                '/' if chars.get(i + 1) == Some(&'*') => {
                    i += 2;
                    while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                        i += 1;
                    }
                    i = (i + 2).min(chars.len());
                    current.push(' ');
                    continue;
                }
                ';' => {
                    push_statement(&mut out, &current);
                    current.clear();
                }
                _ => current.push(c),
            }
            i += 1;
        }
        push_statement(&mut out, &current);
        out
    }
}

fn skip_line(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i] != '\n' {
        i += 1;
    }
    i
}

fn push_statement(out: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Clase léxica de una sentencia individual.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementClass {
    Ddl,
    Dml,
    Query,
    Other,
}

pub fn classify_statement(stmt: &str) -> StatementClass {
    let keyword = stmt.split_whitespace()
                      .next()
                      .map(|w| w.trim_start_matches('(').to_ascii_uppercase())
                      .unwrap_or_default();
    match keyword.as_str() {
        "CREATE" | "ALTER" | "DROP" | "TRUNCATE" | "RENAME" => StatementClass::Ddl,
        "INSERT" | "UPDATE" | "DELETE" | "REPLACE" => StatementClass::Dml,
        "SELECT" | "WITH" | "SHOW" | "EXPLAIN" | "DESC" | "DESCRIBE" => StatementClass::Query,
        _ => StatementClass::Other,
    }
}

/// Tipo de la task derivado de la sentencia; si no es concluyente se usa
/// el tipo declarado en la orden.
pub fn task_kind(stmt: &str, declared: SqlKind) -> SqlKind {
    match classify_statement(stmt) {
        StatementClass::Ddl => SqlKind::Ddl,
        StatementClass::Dml => SqlKind::Dml,
        StatementClass::Query if declared == SqlKind::Export => SqlKind::Export,
        _ => declared,
    }
}

/// Verifica que el contenido sea compatible con el tipo declarado.
///
/// - `EXPORT`: sólo consultas.
/// - `DML`: sólo sentencias DML.
/// - `DDL`: al menos una sentencia DDL, sin consultas ni sentencias desconocidas
///   (un DML acompañante, p.ej. un backfill tras `ALTER`, está permitido).
pub fn check_sql_type(statements: &[String], declared: SqlKind) -> Result<(), CoreError> {
    if statements.is_empty() {
        return Err(CoreError::Validation("sql content has no statements".into()));
    }
    let classes: Vec<StatementClass> = statements.iter().map(|s| classify_statement(s)).collect();
    let offending = |allowed: &dyn Fn(StatementClass) -> bool| {
        statements.iter()
                  .zip(&classes)
                  .find(|(_, c)| !allowed(**c))
                  .map(|(s, _)| s.clone())
    };
    let bad = match declared {
        SqlKind::Export => offending(&|c: StatementClass| c == StatementClass::Query),
        SqlKind::Dml => offending(&|c: StatementClass| c == StatementClass::Dml),
        SqlKind::Ddl => {
            if !classes.contains(&StatementClass::Ddl) {
                return Err(CoreError::Validation("DDL order contains no DDL statement".into()));
            }
            offending(&|c: StatementClass| matches!(c, StatementClass::Ddl | StatementClass::Dml))
        }
    };
    match bad {
        Some(stmt) => Err(CoreError::Validation(format!("statement not allowed in {declared} order: {}", preview(&stmt)))),
        None => Ok(()),
    }
}

fn preview(stmt: &str) -> String {
    const MAX: usize = 60;
    if stmt.chars().count() <= MAX {
        stmt.to_string()
    } else {
        format!("{}...", stmt.chars().take(MAX).collect::<String>())
    }
}

fn strip_ident(raw: &str) -> String {
    raw.trim().trim_matches('`').to_string()
}

/// Nombre de tabla de un `ALTER TABLE [schema.]tabla ...`, sin esquema ni backticks.
pub fn table_from_alter(stmt: &str) -> Option<String> {
    let mut words = stmt.split_whitespace();
    if !words.next()?.eq_ignore_ascii_case("ALTER") || !words.next()?.eq_ignore_ascii_case("TABLE") {
        return None;
    }
    let target = words.next()?;
    let table = match target.rsplit_once('.') {
        Some((_, t)) => t,
        None => target,
    };
    let table = strip_ident(table);
    (!table.is_empty()).then_some(table)
}

/// Cláusula de alteración (todo lo que sigue al nombre de la tabla).
pub fn alter_clause(stmt: &str) -> Option<String> {
    table_from_alter(stmt)?;
    let mut rest = stmt.trim_start();
    for _ in 0..3 {
        let idx = rest.find(char::is_whitespace)?;
        rest = rest[idx..].trim_start();
    }
    let clause = rest.trim().trim_end_matches(';').trim();
    (!clause.is_empty()).then(|| clause.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_respects_quotes_and_comments() {
        let sql = "INSERT INTO t VALUES ('a;b'); -- trailing; comment\n\
                   UPDATE t SET c = \"x;y\" /* ; */ WHERE id = 1;\n# hash; comment\nDELETE FROM t";
        let parts = LexicalSplitter.split(sql);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "INSERT INTO t VALUES ('a;b')");
        assert!(parts[1].starts_with("UPDATE t SET c = \"x;y\""));
        assert_eq!(parts[2], "DELETE FROM t");
    }

    #[test]
    fn split_ignores_empty_statements() {
        assert_eq!(LexicalSplitter.split(" ; ;SELECT 1;;").len(), 1);
        assert!(LexicalSplitter.split("  ").is_empty());
    }

    #[test]
    fn escaped_quote_does_not_end_literal() {
        let parts = LexicalSplitter.split(r"INSERT INTO t VALUES ('it\'s;fine'); SELECT 1");
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn mixed_alter_update_is_ddl_not_dml() {
        let stmts = LexicalSplitter.split("ALTER TABLE t ADD COLUMN x INT; UPDATE t SET x=1");
        assert_eq!(stmts.len(), 2);
        assert!(check_sql_type(&stmts, SqlKind::Ddl).is_ok());
        assert!(matches!(check_sql_type(&stmts, SqlKind::Dml), Err(CoreError::Validation(_))));
        assert!(check_sql_type(&stmts, SqlKind::Export).is_err());
    }

    #[test]
    fn export_requires_queries() {
        let stmts = vec!["SELECT * FROM t".to_string(), "with x as (select 1) select * from x".to_string()];
        assert!(check_sql_type(&stmts, SqlKind::Export).is_ok());
        assert!(check_sql_type(&stmts, SqlKind::Ddl).is_err());
    }

    #[test]
    fn task_kind_follows_statement() {
        assert_eq!(task_kind("UPDATE t SET x=1", SqlKind::Ddl), SqlKind::Dml);
        assert_eq!(task_kind("select 1", SqlKind::Export), SqlKind::Export);
        assert_eq!(task_kind("SET names utf8", SqlKind::Dml), SqlKind::Dml);
    }

    #[test]
    fn alter_parsing_strips_schema_and_backticks() {
        let stmt = "ALTER TABLE `shop`.`orders` ADD COLUMN note TEXT, ADD INDEX idx_note (note)";
        assert_eq!(table_from_alter(stmt).as_deref(), Some("orders"));
        assert_eq!(alter_clause(stmt).as_deref(), Some("ADD COLUMN note TEXT, ADD INDEX idx_note (note)"));
        assert_eq!(table_from_alter("alter table users drop column x").as_deref(), Some("users"));
        assert_eq!(table_from_alter("CREATE TABLE x (id int)"), None);
        assert_eq!(alter_clause("ALTER TABLE t"), None);
    }
}
