use thiserror::Error;

use crate::row_store::{PageRequest, RowFilter, SearchSpec, SortDirection};
use crate::value::{CellValue, Row};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SqlGenerationError {
    #[error("database name cannot be empty")]
    EmptyDatabaseName,
    #[error("table name cannot be empty")]
    EmptyTableName,
    #[error("column name cannot be empty")]
    EmptyColumnName,
    #[error("update needs at least one column to change")]
    EmptyPatch,
    #[error("insert needs at least one column")]
    EmptyRow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlTarget<'a> {
    pub database: Option<&'a str>,
    pub table: &'a str,
}

impl<'a> SqlTarget<'a> {
    pub fn new(database: Option<&'a str>, table: &'a str) -> Result<Self, SqlGenerationError> {
        if table.trim().is_empty() {
            return Err(SqlGenerationError::EmptyTableName);
        }
        if let Some(database_name) = database {
            if database_name.trim().is_empty() {
                return Err(SqlGenerationError::EmptyDatabaseName);
            }
        }
        Ok(Self { database, table })
    }
}

/// A statement with `?` placeholders and the values bound to them, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<CellValue>,
}

#[must_use]
pub fn quote_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

/// Escapes LIKE wildcards so user text only ever matches literally.
#[must_use]
pub fn escape_like_pattern(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn qualified_table_sql(target: &SqlTarget<'_>) -> String {
    match target.database {
        Some(database) => format!(
            "{}.{}",
            quote_identifier(database),
            quote_identifier(target.table)
        ),
        None => quote_identifier(target.table),
    }
}

fn checked_column(column: &str) -> Result<String, SqlGenerationError> {
    if column.trim().is_empty() {
        return Err(SqlGenerationError::EmptyColumnName);
    }
    Ok(quote_identifier(column))
}

fn where_clause(
    filter: &RowFilter,
    search: Option<&SearchSpec>,
    params: &mut Vec<CellValue>,
) -> Result<String, SqlGenerationError> {
    let mut conditions = Vec::new();

    for (column, value) in filter {
        let column = checked_column(column)?;
        if value.is_null() {
            conditions.push(format!("{column} IS NULL"));
        } else {
            conditions.push(format!("{column} = ?"));
            params.push(value.clone());
        }
    }

    if let Some(search) = search.filter(|search| !search.columns.is_empty()) {
        let needle = format!("%{}%", escape_like_pattern(&search.pattern.to_lowercase()));
        let mut alternatives = Vec::with_capacity(search.columns.len());
        for column in &search.columns {
            alternatives.push(format!(
                "LOWER(CAST({} AS CHAR)) LIKE ?",
                checked_column(column)?
            ));
            params.push(CellValue::Text(needle.clone()));
        }
        conditions.push(format!("({})", alternatives.join(" OR ")));
    }

    if conditions.is_empty() {
        Ok(String::new())
    } else {
        Ok(format!(" WHERE {}", conditions.join(" AND ")))
    }
}

pub fn count_sql(
    target: &SqlTarget<'_>,
    filter: &RowFilter,
    search: Option<&SearchSpec>,
) -> Result<SqlStatement, SqlGenerationError> {
    let mut params = Vec::new();
    let where_sql = where_clause(filter, search, &mut params)?;
    Ok(SqlStatement {
        sql: format!(
            "SELECT COUNT(*) FROM {}{where_sql}",
            qualified_table_sql(target)
        ),
        params,
    })
}

pub fn select_page_sql(
    target: &SqlTarget<'_>,
    request: &PageRequest,
) -> Result<SqlStatement, SqlGenerationError> {
    let mut params = Vec::new();
    let where_sql = where_clause(&request.filter, request.search.as_ref(), &mut params)?;

    let order_sql = match &request.sort {
        Some(sort) => {
            let direction = match sort.direction {
                SortDirection::Ascending => "ASC",
                SortDirection::Descending => "DESC",
            };
            format!(" ORDER BY {} {direction}", checked_column(&sort.column)?)
        }
        None => String::new(),
    };

    Ok(SqlStatement {
        sql: format!(
            "SELECT * FROM {}{where_sql}{order_sql} LIMIT {} OFFSET {}",
            qualified_table_sql(target),
            request.limit(),
            request.range_start
        ),
        params,
    })
}

#[must_use]
pub fn sample_sql(target: &SqlTarget<'_>, limit: usize) -> SqlStatement {
    SqlStatement {
        sql: format!("SELECT * FROM {} LIMIT {limit}", qualified_table_sql(target)),
        params: Vec::new(),
    }
}

pub fn update_by_id_sql(
    target: &SqlTarget<'_>,
    id_column: &str,
    id: &CellValue,
    patch: &Row,
) -> Result<SqlStatement, SqlGenerationError> {
    if patch.is_empty() {
        return Err(SqlGenerationError::EmptyPatch);
    }

    let mut assignments = Vec::with_capacity(patch.len());
    let mut params = Vec::with_capacity(patch.len() + 1);
    for (column, value) in patch {
        assignments.push(format!("{} = ?", checked_column(column)?));
        params.push(value.clone());
    }
    params.push(id.clone());

    Ok(SqlStatement {
        sql: format!(
            "UPDATE {} SET {} WHERE {} = ?",
            qualified_table_sql(target),
            assignments.join(", "),
            checked_column(id_column)?
        ),
        params,
    })
}

pub fn insert_sql(target: &SqlTarget<'_>, row: &Row) -> Result<SqlStatement, SqlGenerationError> {
    if row.is_empty() {
        return Err(SqlGenerationError::EmptyRow);
    }

    let columns = row
        .keys()
        .map(|column| checked_column(column))
        .collect::<Result<Vec<_>, _>>()?;
    let placeholders = vec!["?"; columns.len()].join(", ");

    Ok(SqlStatement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            qualified_table_sql(target),
            columns.join(", ")
        ),
        params: row.values().cloned().collect(),
    })
}

pub fn delete_by_id_sql(
    target: &SqlTarget<'_>,
    id_column: &str,
    id: &CellValue,
) -> Result<SqlStatement, SqlGenerationError> {
    Ok(SqlStatement {
        sql: format!(
            "DELETE FROM {} WHERE {} = ?",
            qualified_table_sql(target),
            checked_column(id_column)?
        ),
        params: vec![id.clone()],
    })
}

#[cfg(test)]
mod tests {
    use super::{
        count_sql, delete_by_id_sql, escape_like_pattern, insert_sql, quote_identifier,
        sample_sql, select_page_sql, update_by_id_sql, SqlGenerationError, SqlTarget,
    };
    use crate::row_store::{PageRequest, RowFilter, SearchSpec, SortSpec};
    use crate::value::{CellValue, Row};

    #[test]
    fn quotes_identifiers_with_backticks() {
        assert_eq!(quote_identifier("users"), "`users`");
        assert_eq!(quote_identifier("odd`name"), "`odd``name`");
    }

    #[test]
    fn rejects_blank_names() {
        assert_eq!(
            SqlTarget::new(Some("app"), " "),
            Err(SqlGenerationError::EmptyTableName)
        );
        assert_eq!(
            SqlTarget::new(Some(""), "users"),
            Err(SqlGenerationError::EmptyDatabaseName)
        );
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like_pattern("50%_off\\"), "50\\%\\_off\\\\");
    }

    #[test]
    fn page_query_combines_filter_search_sort_and_range() {
        let target = SqlTarget::new(Some("app"), "users").expect("valid target");
        let request = PageRequest {
            filter: RowFilter::from([
                ("org_id".to_string(), CellValue::from(7_i64)),
                ("deleted_at".to_string(), CellValue::Null),
            ]),
            sort: Some(SortSpec::descending("created_at")),
            search: Some(SearchSpec {
                pattern: "Ada_".to_string(),
                columns: vec!["name".to_string(), "email".to_string()],
            }),
            range_start: 100,
            range_end: 149,
        };

        let statement = select_page_sql(&target, &request).expect("page sql");
        assert_eq!(
            statement.sql,
            "SELECT * FROM `app`.`users` WHERE `deleted_at` IS NULL AND `org_id` = ? \
             AND (LOWER(CAST(`name` AS CHAR)) LIKE ? OR LOWER(CAST(`email` AS CHAR)) LIKE ?) \
             ORDER BY `created_at` DESC LIMIT 50 OFFSET 100"
        );
        assert_eq!(
            statement.params,
            vec![
                CellValue::from(7_i64),
                CellValue::from("%ada\\_%"),
                CellValue::from("%ada\\_%"),
            ]
        );
    }

    #[test]
    fn unfiltered_statements_have_no_where_clause() {
        let target = SqlTarget::new(None, "events").expect("valid target");
        let count = count_sql(&target, &RowFilter::new(), None).expect("count sql");
        assert_eq!(count.sql, "SELECT COUNT(*) FROM `events`");
        assert!(count.params.is_empty());

        let page = select_page_sql(
            &target,
            &PageRequest {
                range_end: 9,
                ..PageRequest::default()
            },
        )
        .expect("page sql");
        assert_eq!(page.sql, "SELECT * FROM `events` LIMIT 10 OFFSET 0");

        assert_eq!(sample_sql(&target, 50).sql, "SELECT * FROM `events` LIMIT 50");
    }

    #[test]
    fn writes_bind_values_and_target_the_id() {
        let target = SqlTarget::new(Some("app"), "users").expect("valid target");
        let id = CellValue::from(3_i64);
        let patch = Row::from([
            ("name".to_string(), CellValue::from("Grace")),
            ("active".to_string(), CellValue::from(true)),
        ]);

        let update = update_by_id_sql(&target, "id", &id, &patch).expect("update sql");
        assert_eq!(
            update.sql,
            "UPDATE `app`.`users` SET `active` = ?, `name` = ? WHERE `id` = ?"
        );
        assert_eq!(
            update.params,
            vec![CellValue::from(true), CellValue::from("Grace"), id.clone()]
        );

        let insert = insert_sql(&target, &patch).expect("insert sql");
        assert_eq!(
            insert.sql,
            "INSERT INTO `app`.`users` (`active`, `name`) VALUES (?, ?)"
        );
        assert_eq!(insert.params.len(), 2);

        let delete = delete_by_id_sql(&target, "id", &id).expect("delete sql");
        assert_eq!(delete.sql, "DELETE FROM `app`.`users` WHERE `id` = ?");
        assert_eq!(delete.params, vec![id]);
    }

    #[test]
    fn empty_writes_are_rejected() {
        let target = SqlTarget::new(None, "users").expect("valid target");
        assert_eq!(
            update_by_id_sql(&target, "id", &CellValue::from(1_i64), &Row::new()),
            Err(SqlGenerationError::EmptyPatch)
        );
        assert_eq!(
            insert_sql(&target, &Row::new()),
            Err(SqlGenerationError::EmptyRow)
        );
    }
}
