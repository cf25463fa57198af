//! SQL formatter for the relational IR.
//!
//! Renders a finished [`Select`] as SQLite text. Host parameters become
//! positional `?` placeholders when a parameter list is supplied and are
//! inlined as literals otherwise.

use crate::error::{RelqError, RelqResult};
use crate::ir::visit::{self, Visit};
use crate::ir::{
    Aggregate, Alias, BinaryOp, ColumnDecl, InSource, Join, JoinKind, Method, OrderExpr,
    ScalarExpr, Select, Source, Subquery, UnaryOp,
};
use crate::types::Type;
use crate::value::{SqlValue, TICKS_PER_DAY, Value};

const STRFTIME_FORMAT: &str = "'%Y-%m-%d %H:%M:%f'";

/// Trait for IR nodes that render to SQL.
pub trait ToSql {
    fn to_sql(&self, f: &mut SqlFormatter<'_>) -> RelqResult<()>;
}

/// Format a statement. With `params` the host parameters are collected in
/// placeholder order; without, they are inlined.
pub fn format_select(select: &Select, params: Option<&mut Vec<SqlValue>>) -> RelqResult<String> {
    let mut f = SqlFormatter::new(params, needs_qualification(select));
    select.to_sql(&mut f)?;
    Ok(f.sql)
}

/// Aliases are only rendered when the statement reads more than one source.
fn needs_qualification(select: &Select) -> bool {
    struct SourceCount(usize);
    impl Visit for SourceCount {
        fn visit_source(&mut self, source: &Source) {
            if source.alias().is_some() {
                self.0 += 1;
            }
            visit::visit_source(self, source);
        }
    }
    let mut count = SourceCount(0);
    count.visit_select(select);
    count.0 > 1
}

pub struct SqlFormatter<'p> {
    sql: String,
    params: Option<&'p mut Vec<SqlValue>>,
    qualify: bool,
}

impl<'p> SqlFormatter<'p> {
    pub fn new(params: Option<&'p mut Vec<SqlValue>>, qualify: bool) -> Self {
        Self {
            sql: String::new(),
            params,
            qualify,
        }
    }

    fn write(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn write_name(&mut self, name: &str) {
        self.sql.push('[');
        self.sql.push_str(name);
        self.sql.push(']');
    }

    fn write_alias(&mut self, alias: Alias) {
        self.write(" AS ");
        self.write_name(&alias.to_string());
    }

    fn write_list<T>(
        &mut self,
        items: &[T],
        mut each: impl FnMut(&mut Self, &T) -> RelqResult<()>,
    ) -> RelqResult<()> {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.write(", ");
            }
            each(self, item)?;
        }
        Ok(())
    }

    fn write_literal(&mut self, value: &Value, ty: &Type) -> RelqResult<()> {
        let literal = value.to_sql_value(ty)?.to_literal();
        self.write(&literal);
        Ok(())
    }

    /// LIMIT and OFFSET are always inlined.
    fn write_inlined(&mut self, expr: &ScalarExpr) -> RelqResult<()> {
        let params = self.params.take();
        let result = self.write_expr(expr);
        self.params = params;
        result
    }

    pub fn write_expr(&mut self, expr: &ScalarExpr) -> RelqResult<()> {
        match expr {
            ScalarExpr::Column(c) => {
                if self.qualify {
                    self.write_name(&c.alias.to_string());
                    self.write(".");
                }
                self.write_name(&c.name);
            }
            ScalarExpr::Constant { value, ty } | ScalarExpr::Variable { value, ty, .. } => {
                self.write_literal(value, ty)?;
            }
            ScalarExpr::HostParameter { value, ty } => match self.params.as_deref_mut() {
                Some(params) => {
                    params.push(value.to_sql_value(ty)?);
                    self.write("?");
                }
                None => self.write_literal(value, ty)?,
            },
            ScalarExpr::Binary { op, left, right } => self.write_binary(*op, left, right)?,
            ScalarExpr::Unary { op, operand } => {
                self.write(match op {
                    UnaryOp::Not => "NOT ",
                    UnaryOp::Negate => "-",
                });
                self.write_grouped(operand)?;
            }
            ScalarExpr::Member { target, name } => self.write_member(target, name)?,
            ScalarExpr::Call {
                method,
                target,
                args,
            } => self.write_call(method, target, args)?,
            ScalarExpr::Conditional {
                test,
                then,
                otherwise,
            } => {
                self.write("CASE WHEN ");
                self.write_expr(test)?;
                self.write(" THEN ");
                self.write_expr(then)?;
                self.write(" ELSE ");
                self.write_expr(otherwise)?;
                self.write(" END");
            }
            ScalarExpr::Convert { operand, ty } => {
                self.write("CAST(");
                self.write_expr(operand)?;
                self.write(" AS ");
                self.write(ty.storage_name());
                self.write(")");
            }
            ScalarExpr::Aggregate(aggregate) => aggregate.to_sql(self)?,
            ScalarExpr::Subquery(subquery) => subquery.to_sql(self)?,
            ScalarExpr::Function { name, args, .. } => {
                self.write(name);
                self.write("(");
                self.write_list(args, |f, a| f.write_expr(a))?;
                self.write(")");
            }
            ScalarExpr::Param(_)
            | ScalarExpr::Query(_)
            | ScalarExpr::New { .. }
            | ScalarExpr::Projection(_)
            | ScalarExpr::Group { .. } => {
                return Err(RelqError::shape(format!(
                    "{} cannot be rendered as SQL",
                    node_name(expr)
                )));
            }
        }
        Ok(())
    }

    /// Parenthesize compound operands.
    fn write_grouped(&mut self, expr: &ScalarExpr) -> RelqResult<()> {
        if matches!(expr, ScalarExpr::Binary { .. }) && !renders_as_call(expr) {
            self.write("(");
            self.write_expr(expr)?;
            self.write(")");
            Ok(())
        } else {
            self.write_expr(expr)
        }
    }

    fn write_operand(&mut self, expr: &ScalarExpr, parent: BinaryOp, right: bool) -> RelqResult<()> {
        let ScalarExpr::Binary { op, .. } = expr else {
            return self.write_expr(expr);
        };
        if renders_as_call(expr) {
            return self.write_expr(expr);
        }
        let concat = is_concat(expr) || matches!(parent, BinaryOp::Concat);
        let binds_tighter = op.precedence() > parent.precedence() && !concat;
        let chains = *op == parent && parent.is_associative() && !right;
        if binds_tighter || chains {
            self.write_expr(expr)
        } else {
            self.write("(");
            self.write_expr(expr)?;
            self.write(")");
            Ok(())
        }
    }

    fn write_binary(&mut self, op: BinaryOp, left: &ScalarExpr, right: &ScalarExpr) -> RelqResult<()> {
        let (lt, rt) = (left.ty(), right.ty());
        let (lt, rt) = (lt.non_null(), rt.non_null());
        match op {
            BinaryOp::Coalesce => {
                self.write("COALESCE(");
                self.write_expr(left)?;
                self.write(", ");
                self.write_expr(right)?;
                self.write(")");
            }
            BinaryOp::Add | BinaryOp::Sub
                if matches!(lt, Type::DateTime) && matches!(rt, Type::Duration) =>
            {
                self.write("STRFTIME(");
                self.write(STRFTIME_FORMAT);
                self.write(", ");
                self.write_expr(left)?;
                self.write(", ");
                if op == BinaryOp::Sub {
                    self.write("-");
                }
                self.write("(CAST(");
                self.write_expr(right)?;
                self.write(&format!(" AS REAL) / {}) || ' days')", TICKS_PER_DAY));
            }
            BinaryOp::Sub if matches!(lt, Type::DateTime) && matches!(rt, Type::DateTime) => {
                self.write("CAST((JULIANDAY(");
                self.write_expr(left)?;
                self.write(") - JULIANDAY(");
                self.write_expr(right)?;
                self.write(&format!(")) * {} AS INTEGER)", TICKS_PER_DAY));
            }
            _ => {
                let symbol = if op == BinaryOp::Add && (lt.is_text() || rt.is_text()) {
                    BinaryOp::Concat
                } else {
                    op
                };
                self.write_operand(left, symbol, false)?;
                self.write(&format!(" {} ", symbol));
                self.write_operand(right, symbol, true)?;
            }
        }
        Ok(())
    }

    fn write_member(&mut self, target: &ScalarExpr, name: &str) -> RelqResult<()> {
        let ty = target.ty();
        match ty.non_null() {
            Type::Text if name == "Length" => {
                self.write("LENGTH(");
                self.write_expr(target)?;
                self.write(")");
            }
            Type::DateTime => {
                let part = match name {
                    "Year" => "%Y",
                    "Month" => "%m",
                    "Day" => "%d",
                    "Hour" => "%H",
                    "Minute" => "%M",
                    "Second" => "%S",
                    "DayOfWeek" => "%w",
                    "DayOfYear" => "%j",
                    "Millisecond" => {
                        self.write("(CAST(STRFTIME('%f', ");
                        self.write_expr(target)?;
                        self.write(") * 1000 AS INTEGER) % 1000)");
                        return Ok(());
                    }
                    "Date" => {
                        self.write("STRFTIME('%Y-%m-%d 00:00:00.000', ");
                        self.write_expr(target)?;
                        self.write(")");
                        return Ok(());
                    }
                    "TimeOfDay" => {
                        self.write("CAST((JULIANDAY(");
                        self.write_expr(target)?;
                        self.write(") - JULIANDAY(DATE(");
                        self.write_expr(target)?;
                        self.write(&format!("))) * {} AS INTEGER)", TICKS_PER_DAY));
                        return Ok(());
                    }
                    _ => return Err(RelqError::unsupported_expression(format!("{}.{}", ty, name))),
                };
                self.write(&format!("CAST(STRFTIME('{}', ", part));
                self.write_expr(target)?;
                self.write(") AS INTEGER)");
            }
            Type::Duration => {
                // (divisor, modulus, fractional)
                let (divisor, modulus, total): (i64, Option<i64>, bool) = match name {
                    "Ticks" => return self.write_expr(target),
                    "Days" => (TICKS_PER_DAY, None, false),
                    "Hours" => (36_000_000_000, Some(24), false),
                    "Minutes" => (600_000_000, Some(60), false),
                    "Seconds" => (10_000_000, Some(60), false),
                    "Milliseconds" => (10_000, Some(1000), false),
                    "TotalDays" => (TICKS_PER_DAY, None, true),
                    "TotalHours" => (36_000_000_000, None, true),
                    "TotalMinutes" => (600_000_000, None, true),
                    "TotalSeconds" => (10_000_000, None, true),
                    "TotalMilliseconds" => (10_000, None, true),
                    _ => return Err(RelqError::unsupported_expression(format!("{}.{}", ty, name))),
                };
                self.write("(");
                if total {
                    self.write("CAST(");
                    self.write_expr(target)?;
                    self.write(&format!(" AS REAL) / {}", divisor));
                } else if let Some(modulus) = modulus {
                    self.write("(");
                    self.write_grouped(target)?;
                    self.write(&format!(" / {}) % {}", divisor, modulus));
                } else {
                    self.write_grouped(target)?;
                    self.write(&format!(" / {}", divisor));
                }
                self.write(")");
            }
            _ => return Err(RelqError::unsupported_expression(format!("{}.{}", ty, name))),
        }
        Ok(())
    }

    fn write_glob(&mut self, target: &ScalarExpr, pattern: &ScalarExpr, prefix: bool, suffix: bool) -> RelqResult<()> {
        self.write("(");
        self.write_grouped(target)?;
        self.write(" GLOB ");
        if prefix {
            self.write("'*' || ");
        }
        self.write_grouped(pattern)?;
        if suffix {
            self.write(" || '*'");
        }
        self.write(")");
        Ok(())
    }

    fn write_function(&mut self, name: &str, target: &ScalarExpr, args: &[ScalarExpr]) -> RelqResult<()> {
        self.write(name);
        self.write("(");
        self.write_expr(target)?;
        for arg in args {
            self.write(", ");
            self.write_expr(arg)?;
        }
        self.write(")");
        Ok(())
    }

    fn write_date_add(&mut self, target: &ScalarExpr, amount: &ScalarExpr, unit: &str, scale: Option<u32>) -> RelqResult<()> {
        self.write("STRFTIME(");
        self.write(STRFTIME_FORMAT);
        self.write(", ");
        self.write_expr(target)?;
        self.write(", ");
        match scale {
            Some(scale) => {
                self.write("(CAST(");
                self.write_expr(amount)?;
                self.write(&format!(" AS REAL) / {})", scale));
            }
            None => self.write_grouped(amount)?,
        }
        self.write(&format!(" || ' {}')", unit));
        Ok(())
    }

    fn write_call(&mut self, method: &Method, target: &ScalarExpr, args: &[ScalarExpr]) -> RelqResult<()> {
        let arg = |i: usize| {
            args.get(i).ok_or_else(|| {
                RelqError::shape(format!("{} is missing argument {}", method.name(), i))
            })
        };
        match method {
            Method::Contains => self.write_glob(target, arg(0)?, true, true)?,
            Method::StartsWith => self.write_glob(target, arg(0)?, false, true)?,
            Method::EndsWith => self.write_glob(target, arg(0)?, true, false)?,
            Method::Equals => {
                self.write("(");
                self.write_expr(target)?;
                self.write(" IS ");
                self.write_grouped(arg(0)?)?;
                self.write(")");
            }
            Method::ToUpper => self.write_function("UPPER", target, &[])?,
            Method::ToLower => self.write_function("LOWER", target, &[])?,
            Method::Trim => self.write_function("TRIM", target, &[])?,
            Method::TrimStart => self.write_function("LTRIM", target, &[])?,
            Method::TrimEnd => self.write_function("RTRIM", target, &[])?,
            Method::Substring => {
                self.write("SUBSTR(");
                self.write_expr(target)?;
                self.write(", ");
                self.write_grouped(arg(0)?)?;
                self.write(" + 1");
                if let Some(length) = args.get(1) {
                    self.write(", ");
                    self.write_expr(length)?;
                }
                self.write(")");
            }
            Method::Replace => self.write_function("REPLACE", target, args)?,
            Method::IndexOf => {
                self.write("(INSTR(");
                self.write_expr(target)?;
                self.write(", ");
                self.write_expr(arg(0)?)?;
                self.write(") - 1)");
            }
            Method::IsNullOrEmpty => {
                self.write("(");
                self.write_grouped(target)?;
                self.write(" IS NULL OR ");
                self.write_grouped(target)?;
                self.write(" IS '')");
            }
            Method::AddYears => self.write_date_add(target, arg(0)?, "years", None)?,
            Method::AddMonths => self.write_date_add(target, arg(0)?, "months", None)?,
            Method::AddDays => self.write_date_add(target, arg(0)?, "days", None)?,
            Method::AddHours => self.write_date_add(target, arg(0)?, "hours", None)?,
            Method::AddMinutes => self.write_date_add(target, arg(0)?, "minutes", None)?,
            Method::AddSeconds => self.write_date_add(target, arg(0)?, "seconds", None)?,
            Method::AddMilliseconds => {
                self.write_date_add(target, arg(0)?, "seconds", Some(1000))?
            }
            Method::Abs => self.write_function("ABS", target, &[])?,
            Method::Round => self.write_function("ROUND", target, args)?,
            Method::ToText => {
                self.write("CAST(");
                self.write_expr(target)?;
                self.write(" AS TEXT)");
            }
            Method::Other(name) => {
                return Err(RelqError::unsupported_expression(format!(
                    "{}.{}",
                    target.ty(),
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Binary nodes rendered as a function call need no parentheses.
fn renders_as_call(expr: &ScalarExpr) -> bool {
    match expr {
        ScalarExpr::Binary { op, left, right } => {
            let (lt, rt) = (left.ty(), right.ty());
            let (lt, rt) = (lt.non_null(), rt.non_null());
            *op == BinaryOp::Coalesce
                || (matches!(lt, Type::DateTime)
                    && matches!(rt, Type::Duration | Type::DateTime)
                    && matches!(op, BinaryOp::Add | BinaryOp::Sub))
        }
        _ => false,
    }
}

/// `||` binds tighter than every arithmetic operator in SQLite.
fn is_concat(expr: &ScalarExpr) -> bool {
    match expr {
        ScalarExpr::Binary {
            op: BinaryOp::Concat,
            ..
        } => true,
        ScalarExpr::Binary {
            op: BinaryOp::Add,
            left,
            right,
        } => left.ty().is_text() || right.ty().is_text(),
        _ => false,
    }
}

fn node_name(expr: &ScalarExpr) -> &'static str {
    match expr {
        ScalarExpr::Param(_) => "an unbound parameter",
        ScalarExpr::Query(_) => "an unbound query",
        ScalarExpr::New { .. } => "a record construction",
        ScalarExpr::Projection(_) => "a nested projection",
        ScalarExpr::Group { .. } => "a group",
        _ => "an expression",
    }
}

impl ToSql for ScalarExpr {
    fn to_sql(&self, f: &mut SqlFormatter<'_>) -> RelqResult<()> {
        f.write_expr(self)
    }
}

impl ToSql for ColumnDecl {
    fn to_sql(&self, f: &mut SqlFormatter<'_>) -> RelqResult<()> {
        f.write_expr(&self.expr)?;
        let same_name = matches!(&self.expr, ScalarExpr::Column(c) if c.name == self.name);
        if !same_name {
            f.write(" AS ");
            f.write_name(&self.name);
        }
        Ok(())
    }
}

impl ToSql for OrderExpr {
    fn to_sql(&self, f: &mut SqlFormatter<'_>) -> RelqResult<()> {
        f.write_expr(&self.expr)?;
        if self.descending {
            f.write(" DESC");
        }
        Ok(())
    }
}

impl ToSql for Aggregate {
    fn to_sql(&self, f: &mut SqlFormatter<'_>) -> RelqResult<()> {
        f.write(self.kind.sql_name());
        f.write("(");
        match &self.argument {
            Some(argument) => {
                if self.distinct {
                    f.write("DISTINCT ");
                }
                f.write_expr(argument)?;
            }
            None => f.write("*"),
        }
        f.write(")");
        Ok(())
    }
}

impl ToSql for Subquery {
    fn to_sql(&self, f: &mut SqlFormatter<'_>) -> RelqResult<()> {
        match self {
            Subquery::Scalar { select, .. } => {
                f.write("(");
                select.to_sql(f)?;
                f.write(")");
            }
            Subquery::Exists { select } => {
                f.write("EXISTS(");
                select.to_sql(f)?;
                f.write(")");
            }
            Subquery::In { expr, source } => {
                f.write_grouped(expr)?;
                f.write(" IN (");
                match source {
                    InSource::Select(select) => select.to_sql(f)?,
                    InSource::Values(values) => f.write_list(values, |f, v| f.write_expr(v))?,
                }
                f.write(")");
            }
        }
        Ok(())
    }
}

impl ToSql for Source {
    fn to_sql(&self, f: &mut SqlFormatter<'_>) -> RelqResult<()> {
        match self {
            Source::Table(t) | Source::View(t) => {
                f.write_name(&t.name);
                if f.qualify {
                    f.write_alias(t.alias);
                }
            }
            Source::Raw(r) => {
                f.write("(");
                f.write(&r.sql);
                f.write(")");
                f.write_alias(r.alias);
            }
            Source::Select(select) => {
                f.write("(");
                select.to_sql(f)?;
                f.write(")");
                f.write_alias(select.alias);
            }
            Source::Join(join) => join.to_sql(f)?,
        }
        Ok(())
    }
}

impl ToSql for Join {
    fn to_sql(&self, f: &mut SqlFormatter<'_>) -> RelqResult<()> {
        self.left.to_sql(f)?;
        f.write(match self.kind {
            JoinKind::Cross => " CROSS JOIN ",
            JoinKind::Inner => " INNER JOIN ",
            JoinKind::Outer => " LEFT OUTER JOIN ",
        });
        if matches!(self.right, Source::Join(_)) {
            f.write("(");
            self.right.to_sql(f)?;
            f.write(")");
        } else {
            self.right.to_sql(f)?;
        }
        match (&self.condition, self.kind) {
            (Some(condition), _) => {
                f.write(" ON ");
                f.write_expr(condition)?;
            }
            (None, JoinKind::Outer) => f.write(" ON 1"),
            (None, _) => {}
        }
        Ok(())
    }
}

impl ToSql for Select {
    fn to_sql(&self, f: &mut SqlFormatter<'_>) -> RelqResult<()> {
        f.write("SELECT ");
        if self.distinct {
            f.write("DISTINCT ");
        }
        if self.columns.is_empty() {
            f.write("NULL");
        } else {
            f.write_list(&self.columns, |f, c| c.to_sql(f))?;
        }
        if let Some(from) = &self.from {
            f.write(" FROM ");
            from.to_sql(f)?;
        }
        if let Some(predicate) = &self.where_clause {
            f.write(" WHERE ");
            f.write_expr(predicate)?;
        }
        if !self.group_by.is_empty() {
            f.write(" GROUP BY ");
            f.write_list(&self.group_by, |f, g| f.write_expr(g))?;
        }
        if let Some(having) = &self.having {
            f.write(" HAVING ");
            f.write_expr(having)?;
        }
        if !self.order_by.is_empty() {
            f.write(" ORDER BY ");
            f.write_list(&self.order_by, |f, o| o.to_sql(f))?;
        }
        match (&self.limit, &self.offset) {
            (Some(limit), offset) => {
                f.write(" LIMIT ");
                f.write_inlined(limit)?;
                if let Some(offset) = offset {
                    f.write(" OFFSET ");
                    f.write_inlined(offset)?;
                }
            }
            (None, Some(offset)) => {
                f.write(" LIMIT -1 OFFSET ");
                f.write_inlined(offset)?;
            }
            (None, None) => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ColumnRef, TableSource};
    use pretty_assertions::assert_eq;

    fn col(alias: u32, name: &str, ty: Type) -> ScalarExpr {
        ScalarExpr::Column(ColumnRef::new(Alias(alias), name, ty))
    }

    fn table(alias: u32, name: &str) -> Source {
        Source::Table(TableSource {
            alias: Alias(alias),
            entity: name.into(),
            name: name.into(),
        })
    }

    fn param(value: impl Into<Value>) -> ScalarExpr {
        let value = value.into();
        ScalarExpr::HostParameter {
            ty: value.natural_type(),
            value,
        }
    }

    #[test]
    fn test_single_source_is_unqualified() {
        let select = Select::new(
            Alias(1),
            vec![ColumnDecl::new("Value", col(0, "Value", Type::Text))],
            table(0, "DataTable"),
        )
        .with_where(Some(ScalarExpr::binary(
            BinaryOp::Ge,
            col(0, "Id", Type::I64),
            param(10),
        )));
        let mut params = Vec::new();
        let sql = format_select(&select, Some(&mut params)).unwrap();
        assert_eq!(sql, "SELECT [Value] FROM [DataTable] WHERE [Id] >= ?");
        assert_eq!(params, vec![SqlValue::Integer(10)]);
    }

    #[test]
    fn test_inline_without_params() {
        let select = Select::new(
            Alias(1),
            vec![ColumnDecl::new("Name", col(0, "Name", Type::Text))],
            table(0, "Artist"),
        )
        .with_where(Some(ScalarExpr::binary(
            BinaryOp::Eq,
            col(0, "Name", Type::Text),
            param("O'Brien"),
        )));
        let sql = format_select(&select, None).unwrap();
        assert_eq!(sql, "SELECT [Name] FROM [Artist] WHERE [Name] IS 'O''Brien'");
    }

    #[test]
    fn test_join_is_qualified() {
        let join = Source::Join(Box::new(Join {
            kind: JoinKind::Inner,
            left: table(0, "Album"),
            right: table(1, "Artist"),
            condition: Some(ScalarExpr::binary(
                BinaryOp::Eq,
                col(0, "ArtistId", Type::I64),
                col(1, "ArtistId", Type::I64),
            )),
        }));
        let select = Select::new(
            Alias(2),
            vec![
                ColumnDecl::new("Title", col(0, "Title", Type::Text)),
                ColumnDecl::new("c1", col(1, "Name", Type::Text)),
            ],
            join,
        );
        assert_eq!(
            format_select(&select, None).unwrap(),
            "SELECT [t0].[Title], [t1].[Name] AS [c1] FROM [Album] AS [t0] \
             INNER JOIN [Artist] AS [t1] ON [t0].[ArtistId] IS [t1].[ArtistId]"
        );
    }

    #[test]
    fn test_offset_without_limit() {
        let mut select = Select::new(
            Alias(1),
            vec![ColumnDecl::new("Id", col(0, "Id", Type::I64))],
            table(0, "Track"),
        );
        select.offset = Some(param(5));
        let mut params = Vec::new();
        let sql = format_select(&select, Some(&mut params)).unwrap();
        assert_eq!(sql, "SELECT [Id] FROM [Track] LIMIT -1 OFFSET 5");
        assert!(params.is_empty());
    }

    #[test]
    fn test_string_methods() {
        let name = col(0, "Name", Type::Text);
        let contains = ScalarExpr::Call {
            method: Method::Contains,
            target: Box::new(name.clone()),
            args: vec![param("ac")],
        };
        let upper = ScalarExpr::Call {
            method: Method::ToUpper,
            target: Box::new(name),
            args: vec![],
        };
        let select = Select::new(
            Alias(1),
            vec![ColumnDecl::new("c0", upper)],
            table(0, "Artist"),
        )
        .with_where(Some(contains));
        assert_eq!(
            format_select(&select, None).unwrap(),
            "SELECT UPPER([Name]) AS [c0] FROM [Artist] WHERE ([Name] GLOB '*' || 'ac' || '*')"
        );
    }

    #[test]
    fn test_precedence_parentheses() {
        let a = col(0, "A", Type::I64);
        let b = col(0, "B", Type::I64);
        let sum = ScalarExpr::binary(BinaryOp::Add, a.clone(), b.clone());
        let product = ScalarExpr::binary(BinaryOp::Mul, sum, b.clone());
        let select = Select::new(Alias(1), vec![ColumnDecl::new("c0", product)], table(0, "T"));
        assert_eq!(
            format_select(&select, None).unwrap(),
            "SELECT ([A] + [B]) * [B] AS [c0] FROM [T]"
        );
    }

    #[test]
    fn test_count_and_exists() {
        let count = ScalarExpr::Aggregate(Aggregate {
            kind: crate::ir::AggregateKind::Count,
            argument: None,
            distinct: false,
            ty: Type::I64,
        });
        let select = Select::new(Alias(1), vec![ColumnDecl::new("c0", count)], table(0, "Track"));
        assert_eq!(
            format_select(&select, None).unwrap(),
            "SELECT COUNT(*) AS [c0] FROM [Track]"
        );

        let exists = ScalarExpr::Subquery(Subquery::Exists {
            select: Box::new(Select::new(
                Alias(1),
                vec![ColumnDecl::new("Id", col(0, "Id", Type::I64))],
                table(0, "Track"),
            )),
        });
        let root = Select::scalar(Alias(2), vec![ColumnDecl::new("c0", exists)]);
        assert_eq!(
            format_select(&root, None).unwrap(),
            "SELECT EXISTS(SELECT [Id] FROM [Track]) AS [c0]"
        );
    }

    #[test]
    fn test_record_is_not_sql() {
        let select = Select::new(
            Alias(1),
            vec![ColumnDecl::new(
                "c0",
                ScalarExpr::New {
                    ty: crate::types::RecordType::new("R"),
                    members: vec![],
                },
            )],
            table(0, "T"),
        );
        assert!(matches!(format_select(&select, None), Err(RelqError::Shape(_))));
    }
}
