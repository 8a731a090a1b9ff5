//! SELECT statement builder.
//!
//! Column expressions are pre-rendered fragments (see `sql::render`); the
//! builder owns clause order, identifier quoting and layout.

use super::dialect::SqlDialect;
use super::token::{Token, TokenStream};

// =============================================================================
// Select Expression (column with optional alias)
// =============================================================================

/// A SELECT list item: expression with optional alias.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct SelectExpr {
    pub sql: String,
    pub alias: Option<String>,
}

impl SelectExpr {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.fragment(&self.sql);
        if let Some(alias) = &self.alias {
            ts.space()
                .push(Token::As)
                .space()
                .push(Token::Ident(alias.clone()));
        }
        ts
    }
}

// =============================================================================
// Table Reference
// =============================================================================

/// A table reference with optional schema.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct TableRef {
    pub schema: Option<String>,
    pub table: String,
}

impl TableRef {
    /// `schema.table` splits on the first dot; anything else is a bare table.
    pub fn new(table: &str) -> Self {
        match table.split_once('.') {
            Some((schema, name)) => Self {
                schema: Some(schema.into()),
                table: name.into(),
            },
            None => Self {
                schema: None,
                table: table.into(),
            },
        }
    }

    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::QualifiedIdent {
            schema: self.schema.clone(),
            name: self.table.clone(),
        });
        ts
    }
}

// =============================================================================
// ORDER BY
// =============================================================================

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

/// An ORDER BY item over an output alias.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct OrderByExpr {
    target: Token,
    pub dir: SortDir,
}

impl OrderByExpr {
    /// Order by a column of the SELECT list.
    pub fn alias(name: &str, dir: SortDir) -> Self {
        Self {
            target: Token::Ident(name.into()),
            dir,
        }
    }

    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(self.target.clone()).space().push(match self.dir {
            SortDir::Asc => Token::Asc,
            SortDir::Desc => Token::Desc,
        });
        ts
    }
}

// =============================================================================
// LIMIT / OFFSET
// =============================================================================

/// LIMIT and OFFSET clause.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LimitOffset {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl LimitOffset {
    /// Delegates to `SqlDialect::emit_limit_offset()` for the actual formatting.
    pub fn to_tokens(&self, dialect: &dyn SqlDialect) -> TokenStream {
        dialect.emit_limit_offset(self.limit, self.offset)
    }
}

// =============================================================================
// Query Builder
// =============================================================================

/// A SELECT query.
#[derive(Debug, Clone, Default, PartialEq)]
#[must_use = "Query has no effect until converted to SQL with to_sql()"]
pub struct Query {
    pub select: Vec<SelectExpr>,
    pub from: Option<TableRef>,
    pub where_clause: Option<String>,
    pub group_by: Vec<String>,
    pub having: Option<String>,
    pub order_by: Vec<OrderByExpr>,
    pub limit_offset: Option<LimitOffset>,
}

impl Query {
    /// Create a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the SELECT list.
    pub fn select(mut self, exprs: impl IntoIterator<Item = SelectExpr>) -> Self {
        self.select.extend(exprs);
        self
    }

    pub fn from(mut self, table: TableRef) -> Self {
        self.from = Some(table);
        self
    }

    /// Add a WHERE condition. Multiple calls are combined with AND.
    pub fn filter(mut self, condition: &str) -> Self {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => format!("({} AND {})", existing, condition),
            None => condition.to_string(),
        });
        self
    }

    pub fn group_by(mut self, exprs: impl IntoIterator<Item = String>) -> Self {
        self.group_by.extend(exprs);
        self
    }

    pub fn having(mut self, condition: &str) -> Self {
        self.having = Some(condition.to_string());
        self
    }

    pub fn order_by(mut self, exprs: impl IntoIterator<Item = OrderByExpr>) -> Self {
        self.order_by.extend(exprs);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit_offset
            .get_or_insert_with(LimitOffset::default)
            .limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.limit_offset
            .get_or_insert_with(LimitOffset::default)
            .offset = Some(offset);
        self
    }

    /// Convert to token stream for a specific dialect.
    pub fn to_tokens(&self, dialect: &dyn SqlDialect) -> TokenStream {
        let mut ts = TokenStream::new();

        // SELECT
        ts.push(Token::Select);
        if self.select.is_empty() {
            ts.space().push(Token::Star);
        }
        for (i, select_expr) in self.select.iter().enumerate() {
            if i == 0 {
                ts.newline().indent(1);
            } else {
                ts.comma().newline().indent(1);
            }
            ts.append(&select_expr.to_tokens());
        }

        // FROM
        if let Some(from) = &self.from {
            ts.newline().push(Token::From).space();
            ts.append(&from.to_tokens());
        }

        // WHERE
        if let Some(where_clause) = &self.where_clause {
            ts.newline().push(Token::Where).space().fragment(where_clause);
        }

        // GROUP BY
        if !self.group_by.is_empty() {
            ts.newline().push(Token::GroupBy).space();
            for (i, expr) in self.group_by.iter().enumerate() {
                if i > 0 {
                    ts.comma().space();
                }
                ts.fragment(expr);
            }
        }

        // HAVING
        if let Some(having) = &self.having {
            ts.newline().push(Token::Having).space().fragment(having);
        }

        // ORDER BY
        if !self.order_by.is_empty() {
            ts.newline().push(Token::OrderBy).space();
            for (i, order_expr) in self.order_by.iter().enumerate() {
                if i > 0 {
                    ts.comma().space();
                }
                ts.append(&order_expr.to_tokens());
            }
        }

        // LIMIT / OFFSET
        if let Some(lo) = &self.limit_offset {
            let tokens = lo.to_tokens(dialect);
            if !tokens.is_empty() {
                ts.newline();
                ts.append(&tokens);
            }
        }

        ts
    }

    /// Generate SQL string for a specific dialect.
    pub fn to_sql(&self, dialect: &dyn SqlDialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }
}

// =============================================================================
// Tests
// =============================================================================
