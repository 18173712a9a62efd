use crate::{adapter::PageRequest, sql::dialect::SqlDialect};
use model::pagination::key::KeyTuple;

/// Renders the strictly-greater-than predicate over the composite key.
///
/// Dialects with row-tuple comparison get `(k1, k2) > (v1, v2)`; the rest
/// get the OR-of-tuples expansion
/// `(k1 > v1) OR (k1 = v1 AND k2 > v2) OR ...`.
pub fn keyset_predicate(
    dialect: &dyn SqlDialect,
    key_columns: &[String],
    last_key: &KeyTuple,
) -> String {
    let idents: Vec<String> = key_columns.iter().map(|k| dialect.quote_ident(k)).collect();
    let literals: Vec<String> = last_key
        .values()
        .iter()
        .map(|v| dialect.render_literal(v))
        .collect();

    if idents.len() == 1 {
        return format!("{} > {}", idents[0], literals[0]);
    }

    if dialect.supports_row_tuple_comparison() {
        return format!("({}) > ({})", idents.join(", "), literals.join(", "));
    }

    let mut branches = Vec::with_capacity(idents.len());
    for depth in 0..idents.len() {
        let mut terms = Vec::with_capacity(depth + 1);
        for eq in 0..depth {
            terms.push(format!("{} = {}", idents[eq], literals[eq]));
        }
        terms.push(format!("{} > {}", idents[depth], literals[depth]));
        branches.push(format!("({})", terms.join(" AND ")));
    }
    branches.join(" OR ")
}

/// Assembles the page SELECT for one [`PageRequest`].
///
/// Shape: `SELECT <cols> FROM <table> [WHERE <filter> [AND] <keyset>]
/// ORDER BY <keys> <limit>`. The where-clause is embedded opaquely.
pub fn build_page_sql(dialect: &dyn SqlDialect, request: &PageRequest) -> String {
    let select_list = request
        .columns
        .iter()
        .map(|c| dialect.select_expr(c))
        .collect::<Vec<_>>()
        .join(", ");

    let table = request
        .table
        .parts()
        .map(|p| dialect.quote_ident(p))
        .collect::<Vec<_>>()
        .join(".");

    let mut predicates = Vec::new();
    if let Some(filter) = &request.where_clause {
        predicates.push(format!("({filter})"));
    }
    if let Some(last_key) = &request.last_key {
        predicates.push(format!(
            "({})",
            keyset_predicate(dialect, &request.key_columns, last_key)
        ));
    }

    let where_sql = if predicates.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", predicates.join(" AND "))
    };

    let order_sql = request
        .key_columns
        .iter()
        .map(|k| dialect.quote_ident(k))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "SELECT {select_list} FROM {table}{where_sql} ORDER BY {order_sql} {}",
        dialect.limit_clause(request.limit)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::PageRequestBuilder;
    use crate::sql::dialect::{BigQuery, Postgres, SqlServer};
    use model::{core::value::Value, schema::column::ColumnMeta, schema::table::TableRef};

    fn columns() -> Vec<ColumnMeta> {
        vec![
            ColumnMeta::new("id", "bigint", false, 0),
            ColumnMeta::new("name", "text", true, 1),
        ]
    }

    #[test]
    fn first_page_has_no_keyset_predicate() {
        let request = PageRequestBuilder::new(TableRef::new("public.users"))
            .columns(columns())
            .key_columns(vec!["id".into()])
            .limit(100)
            .build();
        let sql = build_page_sql(&Postgres, &request);
        assert_eq!(
            sql,
            "SELECT \"id\", \"name\" FROM \"public\".\"users\" ORDER BY \"id\" LIMIT 100"
        );
    }

    #[test]
    fn single_key_uses_plain_comparison() {
        let request = PageRequestBuilder::new(TableRef::new("users"))
            .columns(columns())
            .key_columns(vec!["id".into()])
            .last_key(Some(KeyTuple::new(vec![Value::Int(42)])))
            .limit(2)
            .build();
        let sql = build_page_sql(&Postgres, &request);
        assert_eq!(
            sql,
            "SELECT \"id\", \"name\" FROM \"users\" WHERE (\"id\" > 42) ORDER BY \"id\" LIMIT 2"
        );
    }

    #[test]
    fn composite_key_uses_row_tuple_when_supported() {
        let request = PageRequestBuilder::new(TableRef::new("users"))
            .columns(columns())
            .key_columns(vec!["id".into(), "name".into()])
            .last_key(Some(KeyTuple::new(vec![
                Value::Int(42),
                Value::String("bob".into()),
            ])))
            .limit(10)
            .build();
        let sql = build_page_sql(&Postgres, &request);
        assert!(sql.contains("(\"id\", \"name\") > (42, 'bob')"), "{sql}");
    }

    #[test]
    fn composite_key_expands_to_or_of_tuples() {
        let predicate = keyset_predicate(
            &BigQuery,
            &["a".into(), "b".into(), "c".into()],
            &KeyTuple::new(vec![
                Value::Int(1),
                Value::Int(2),
                Value::Int(3),
            ]),
        );
        assert_eq!(
            predicate,
            "(`a` > 1) OR (`a` = 1 AND `b` > 2) OR (`a` = 1 AND `b` = 2 AND `c` > 3)"
        );
    }

    #[test]
    fn where_clause_intersects_keyset_predicate() {
        let request = PageRequestBuilder::new(TableRef::new("users"))
            .columns(columns())
            .key_columns(vec!["id".into()])
            .last_key(Some(KeyTuple::new(vec![Value::Int(500)])))
            .where_clause(Some("id > 100".into()))
            .limit(128)
            .build();
        let sql = build_page_sql(&SqlServer, &request);
        assert_eq!(
            sql,
            "SELECT [id], [name] FROM [users] WHERE (id > 100) AND ([id] > 500) \
             ORDER BY [id] OFFSET 0 ROWS FETCH NEXT 128 ROWS ONLY"
        );
    }

    #[test]
    fn string_literals_double_embedded_quotes() {
        let predicate = keyset_predicate(
            &Postgres,
            &["name".into()],
            &KeyTuple::new(vec![Value::String("o'brien".into())]),
        );
        assert_eq!(predicate, "\"name\" > 'o''brien'");
    }

    #[test]
    fn decimal_columns_are_cast_to_text() {
        let request = PageRequestBuilder::new(TableRef::new("orders"))
            .columns(vec![ColumnMeta::new("price", "numeric(10,2)", false, 0)])
            .key_columns(vec!["price".into()])
            .limit(5)
            .build();
        let sql = build_page_sql(&Postgres, &request);
        assert!(
            sql.starts_with("SELECT CAST(\"price\" AS TEXT) AS \"price\" FROM"),
            "{sql}"
        );
    }
}
