//! Turns projectors into row readers.
//!
//! Each column reference of the row's select becomes a typed read from the
//! cursor; everything above the columns is evaluated in memory. A nested
//! projection captures the outer row, substitutes it into the inner
//! statement and runs that statement once per outer row.

use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use tracing::trace;
use uuid::Uuid;

use crate::cursor::{RowCursor, StatementExecutor};
use crate::error::{RelqError, RelqResult};
use crate::eval;
use crate::ir::visit::{ColumnReplacer, Fold, Visit};
use crate::ir::{Aggregator, Alias, ColumnRef, Projection, ScalarExpr};
use crate::translate::escape::ConstantEscaper;
use crate::transpiler::format_select;
use crate::types::Type;
use crate::value::{Record, Value, parse_datetime};

/// Reads one value from the current row.
pub type ReadFn<'e> = Box<dyn Fn(&dyn RowCursor) -> RelqResult<Value> + 'e>;

/// Column name to result position of a select.
pub type ColumnMap = HashMap<String, usize>;

/// Reads rows of one projection and collapses them per its aggregator.
pub struct Materializer<'e> {
    read: ReadFn<'e>,
    aggregator: Option<Aggregator>,
    ty: Type,
}

impl<'e> Materializer<'e> {
    pub fn new(projection: &Projection, executor: &'e dyn StatementExecutor) -> RelqResult<Self> {
        let columns: ColumnMap = projection
            .select
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        let read = build(
            &projection.projector,
            projection.select.alias,
            &columns,
            executor,
        )?;
        Ok(Self {
            read,
            aggregator: projection.aggregator,
            ty: projection.projector.ty(),
        })
    }

    pub fn aggregator(&self) -> Option<Aggregator> {
        self.aggregator
    }

    /// Materialize the row the cursor is positioned on.
    pub fn read_row(&self, cursor: &dyn RowCursor) -> RelqResult<Value> {
        (self.read)(cursor)
    }

    /// Step through every row and apply the aggregator.
    pub fn read_all(&self, cursor: &mut dyn RowCursor) -> RelqResult<Value> {
        let mut values = Vec::new();
        while cursor.step()? {
            values.push(self.read_row(cursor)?);
        }
        collect(values, self.aggregator, &self.ty)
    }
}

/// Collapse materialized rows.
pub fn collect(values: Vec<Value>, aggregator: Option<Aggregator>, ty: &Type) -> RelqResult<Value> {
    let or_default = |or_default: bool| {
        if or_default {
            Ok(Value::default_for(ty))
        } else {
            Err(RelqError::NoElement)
        }
    };
    match aggregator {
        None => Ok(Value::List(values)),
        Some(Aggregator::Scalar) => Ok(values
            .into_iter()
            .next()
            .unwrap_or_else(|| Value::default_for(ty))),
        Some(Aggregator::First { or_default: d }) => match values.into_iter().next() {
            Some(value) => Ok(value),
            None => or_default(d),
        },
        Some(Aggregator::Single { or_default: d }) => {
            if values.len() > 1 {
                return Err(RelqError::MultipleElements);
            }
            match values.into_iter().next() {
                Some(value) => Ok(value),
                None => or_default(d),
            }
        }
    }
}

/// Build a reader for `projector`, whose columns belong to `row_alias`.
pub fn build<'e>(
    projector: &ScalarExpr,
    row_alias: Alias,
    columns: &ColumnMap,
    executor: &'e dyn StatementExecutor,
) -> RelqResult<ReadFn<'e>> {
    let sub = |e: &ScalarExpr| build(e, row_alias, columns, executor);
    Ok(match projector {
        ScalarExpr::Column(c) => {
            if c.alias != row_alias {
                return Err(RelqError::AliasResolution(format!(
                    "projector reads {}.{} outside its select {}",
                    c.alias, c.name, row_alias
                )));
            }
            let index = *columns.get(&c.name).ok_or_else(|| {
                RelqError::AliasResolution(format!("select {} has no column {}", row_alias, c.name))
            })?;
            let ty = c.ty.clone();
            Box::new(move |cursor| read_column(cursor, index, &ty))
        }
        ScalarExpr::Constant { value, .. }
        | ScalarExpr::Variable { value, .. }
        | ScalarExpr::HostParameter { value, .. } => {
            let value = value.clone();
            Box::new(move |_| Ok(value.clone()))
        }
        ScalarExpr::New { ty, members } => {
            let name = ty.name.clone();
            let readers = members
                .iter()
                .map(|(n, e)| Ok((n.clone(), sub(e)?)))
                .collect::<RelqResult<Vec<_>>>()?;
            Box::new(move |cursor| {
                let mut record = Record::new(name.clone());
                for (field, read) in &readers {
                    record.fields.push((field.clone(), read(cursor)?));
                }
                Ok(Value::Record(record))
            })
        }
        ScalarExpr::Group { key, elements } => {
            let key = sub(key)?;
            let elements = sub(elements)?;
            Box::new(move |cursor| {
                let key = key(cursor)?;
                let elements = match elements(cursor)? {
                    Value::List(values) => values,
                    other => vec![other],
                };
                Ok(Value::Group {
                    key: Box::new(key),
                    elements,
                })
            })
        }
        ScalarExpr::Projection(projection) => nested(projection, row_alias, columns, executor)?,
        ScalarExpr::Binary { op, left, right } => {
            let (op, left, right) = (*op, sub(left)?, sub(right)?);
            Box::new(move |cursor| eval::binary(op, left(cursor)?, right(cursor)?))
        }
        ScalarExpr::Unary { op, operand } => {
            let (op, operand) = (*op, sub(operand)?);
            Box::new(move |cursor| eval::unary(op, operand(cursor)?))
        }
        ScalarExpr::Member { target, name } => {
            let (target, name) = (sub(target)?, name.clone());
            Box::new(move |cursor| eval::member(target(cursor)?, &name))
        }
        ScalarExpr::Call {
            method,
            target,
            args,
        } => {
            let method = method.clone();
            let target = sub(target)?;
            let args = args.iter().map(sub).collect::<RelqResult<Vec<_>>>()?;
            Box::new(move |cursor| {
                let args = args
                    .iter()
                    .map(|a| a(cursor))
                    .collect::<RelqResult<Vec<_>>>()?;
                eval::call(&method, target(cursor)?, args)
            })
        }
        ScalarExpr::Conditional {
            test,
            then,
            otherwise,
        } => {
            let (test, then, otherwise) = (sub(test)?, sub(then)?, sub(otherwise)?);
            Box::new(move |cursor| {
                if test(cursor)?.as_bool().unwrap_or(false) {
                    then(cursor)
                } else {
                    otherwise(cursor)
                }
            })
        }
        ScalarExpr::Convert { operand, ty } => {
            let (operand, ty) = (sub(operand)?, ty.clone());
            Box::new(move |cursor| eval::convert(operand(cursor)?, &ty))
        }
        ScalarExpr::Param(_)
        | ScalarExpr::Query(_)
        | ScalarExpr::Aggregate(_)
        | ScalarExpr::Subquery(_)
        | ScalarExpr::Function { .. } => {
            return Err(RelqError::shape(
                "projector computes in SQL what must be a column of its select",
            ));
        }
    })
}

/// Columns of the outer row a nested projection depends on.
struct OuterColumns {
    alias: Alias,
    found: Vec<ColumnRef>,
}

impl Visit for OuterColumns {
    fn visit_column(&mut self, column: &ColumnRef) {
        if column.alias == self.alias && !self.found.iter().any(|f| f.same_column(column)) {
            self.found.push(column.clone());
        }
    }
}

fn nested<'e>(
    projection: &Projection,
    row_alias: Alias,
    columns: &ColumnMap,
    executor: &'e dyn StatementExecutor,
) -> RelqResult<ReadFn<'e>> {
    let mut outer = OuterColumns {
        alias: row_alias,
        found: Vec::new(),
    };
    outer.visit_projection(projection);
    let outer = outer
        .found
        .into_iter()
        .map(|c| {
            let read = build(&ScalarExpr::Column(c.clone()), row_alias, columns, executor)?;
            Ok((c, read))
        })
        .collect::<RelqResult<Vec<_>>>()?;
    let template = projection.clone();

    Ok(Box::new(move |cursor| {
        let mut replacer = ColumnReplacer::default();
        for (column, read) in &outer {
            let value = read(cursor)?;
            replacer.map.insert(
                (column.alias, column.name.clone()),
                ScalarExpr::Constant {
                    value,
                    ty: column.ty.clone(),
                },
            );
        }
        let bound = ConstantEscaper.fold_projection(replacer.fold_projection(template.clone()));
        execute(&bound, executor)
    }))
}

/// Run a projection's statement and materialize its result.
pub fn execute(projection: &Projection, executor: &dyn StatementExecutor) -> RelqResult<Value> {
    let mut params = Vec::new();
    let sql = format_select(&projection.select, Some(&mut params))?;
    trace!(sql = %sql, "correlated sub-execution");
    let mut cursor = executor.execute(&sql, &params)?;
    Materializer::new(projection, executor)?.read_all(cursor.as_mut())
}

/// Typed read of one cell; SQL NULL becomes NULL or the type's default.
pub fn read_column(cursor: &dyn RowCursor, index: usize, ty: &Type) -> RelqResult<Value> {
    if cursor.is_null(index) {
        return Ok(if ty.is_nullable() {
            Value::Null
        } else {
            Value::default_for(ty)
        });
    }
    Ok(match ty.non_null() {
        Type::Bool => Value::Bool(cursor.get_long(index)? == 1),
        Type::I8
        | Type::I16
        | Type::I32
        | Type::I64
        | Type::U8
        | Type::U16
        | Type::U32
        | Type::U64 => Value::Int(cursor.get_long(index)?),
        Type::F32 | Type::F64 => Value::Float(cursor.get_double(index)?),
        Type::Decimal => {
            let text = cursor.get_text(index)?;
            let decimal = match Decimal::from_str(text.trim()) {
                Ok(d) => Some(d),
                Err(_) => Decimal::from_f64_retain(cursor.get_double(index)?),
            };
            Value::Decimal(decimal.ok_or_else(|| {
                RelqError::conversion(format!("'{}' is not a decimal", text))
            })?)
        }
        Type::Text | Type::Unknown => Value::Text(cursor.get_text(index)?),
        Type::Char => Value::Char(cursor.get_text(index)?.chars().next().unwrap_or_default()),
        Type::Blob => Value::Blob(cursor.get_blob(index)?),
        Type::DateTime => Value::DateTime(parse_datetime(&cursor.get_text(index)?)?),
        Type::Duration => Value::Duration(cursor.get_long(index)?),
        Type::Uuid => {
            let text = cursor.get_text(index)?;
            Value::Uuid(
                Uuid::parse_str(&text)
                    .map_err(|e| RelqError::conversion(format!("'{}': {}", text, e)))?,
            )
        }
        Type::Enum(e) if e.stored_as_text => Value::Enum(cursor.get_text(index)?),
        Type::Enum(e) => {
            let ordinal = cursor.get_long(index)?;
            let variant = usize::try_from(ordinal)
                .ok()
                .and_then(|i| e.variants.get(i))
                .ok_or_else(|| {
                    RelqError::conversion(format!("{} is not an ordinal of {}", ordinal, e.name))
                })?;
            Value::Enum(variant.clone())
        }
        other => {
            return Err(RelqError::shape(format!(
                "{} cannot be read from a single column",
                other
            )));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::RowBuffer;
    use crate::ir::{ColumnDecl, Select, Source, TableSource};
    use crate::types::{EnumType, RecordType};
    use crate::value::SqlValue;

    struct NoDatabase;

    impl StatementExecutor for NoDatabase {
        fn execute(&self, sql: &str, _params: &[SqlValue]) -> RelqResult<Box<dyn RowCursor>> {
            Err(RelqError::Database(format!("unexpected statement {}", sql)))
        }
    }

    fn col(name: &str, ty: Type) -> ScalarExpr {
        ScalarExpr::Column(ColumnRef::new(Alias(1), name, ty))
    }

    fn projection(projector: ScalarExpr, names: &[&str]) -> Projection {
        let columns = names
            .iter()
            .map(|n| ColumnDecl::new(*n, ScalarExpr::constant(Value::Null)))
            .collect();
        Projection::new(
            Select::new(
                Alias(1),
                columns,
                Source::Table(TableSource {
                    alias: Alias(0),
                    entity: "T".into(),
                    name: "T".into(),
                }),
            ),
            projector,
        )
    }

    #[test]
    fn test_reads_typed_record() {
        let genre = EnumType::new("Genre", &["Rock", "Jazz"]);
        let projector = ScalarExpr::New {
            ty: RecordType::new("Row"),
            members: vec![
                ("Id".into(), col("Id", Type::I64)),
                ("Live".into(), col("Live", Type::Bool)),
                ("Genre".into(), col("Genre", Type::Enum(genre))),
            ],
        };
        let p = projection(projector, &["Id", "Live", "Genre"]);
        let mut rows = RowBuffer::new(
            vec!["Id".into(), "Live".into(), "Genre".into()],
            vec![vec![SqlValue::Integer(7), SqlValue::Integer(1), SqlValue::Integer(1)]],
        );
        let value = Materializer::new(&p, &NoDatabase)
            .unwrap()
            .read_all(&mut rows)
            .unwrap();
        let expected = Record::new("Row")
            .with("Id", 7i64)
            .with("Live", true)
            .with("Genre", Value::Enum("Jazz".into()));
        assert_eq!(value, Value::List(vec![Value::Record(expected)]));
    }

    #[test]
    fn test_null_becomes_default_unless_nullable() {
        let mut rows = RowBuffer::new(vec!["A".into()], vec![vec![SqlValue::Null]]);
        rows.step().unwrap();
        assert_eq!(read_column(&rows, 0, &Type::I32).unwrap(), Value::Int(0));
        assert_eq!(
            read_column(&rows, 0, &Type::I32.nullable()).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_single_cardinality() {
        let ty = Type::I64;
        let single = Some(Aggregator::Single { or_default: false });
        assert!(matches!(
            collect(vec![], single, &ty),
            Err(RelqError::NoElement)
        ));
        assert!(matches!(
            collect(vec![Value::Int(1), Value::Int(2)], single, &ty),
            Err(RelqError::MultipleElements)
        ));
        assert_eq!(
            collect(vec![], Some(Aggregator::First { or_default: true }), &ty).unwrap(),
            Value::Int(0)
        );
    }
}
