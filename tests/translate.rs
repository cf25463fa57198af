mod common;

use std::collections::HashSet;

use pretty_assertions::assert_eq;
use relq::ir::visit::{DeclaredAliases, Visit};
use relq::prelude::*;

use common::catalog;

fn sql(query: &Query) -> Translation {
    relq::translate(&catalog(), query).expect("translate")
}

#[test]
fn test_filter_then_project_collapses_to_one_select() {
    let q = Query::table("DataTable")
        .filter(lambda("d", |d| d.field("Id").ge(10)))
        .project(lambda("d", |d| d.field("Value")));
    let t = sql(&q);
    assert_eq!(t.sql, "SELECT [Value] FROM [DataTable] WHERE [Id] >= ?");
    assert_eq!(t.params, vec![SqlValue::Integer(10)]);
    assert_eq!(t.projection.aggregator, None);
}

#[test]
fn test_captured_variable_becomes_parameter() {
    let q = Query::table("DataTable")
        .filter(lambda("d", |d| d.field("Id").ge(var("min", 15))))
        .project(lambda("d", |d| d.field("Value")));
    let t = sql(&q);
    assert_eq!(t.sql, "SELECT [Value] FROM [DataTable] WHERE [Id] >= ?");
    assert_eq!(t.params, vec![SqlValue::Integer(15)]);
}

#[test]
fn test_root_count() {
    let t = sql(&Query::table("Track").count());
    assert_eq!(t.sql, "SELECT COUNT(*) AS [c0] FROM [Track]");
    assert!(t.params.is_empty());
}

#[test]
fn test_skip_take_paging() {
    let t = sql(&Query::table("DataTable").skip(5).take(10));
    assert_eq!(t.sql, "SELECT [Id], [Value] FROM [DataTable] LIMIT 10 OFFSET 5");
    assert!(t.params.is_empty());

    let t = sql(&Query::table("DataTable").take(3));
    assert_eq!(t.sql, "SELECT [Id], [Value] FROM [DataTable] LIMIT 3");
    assert!(!t.sql.contains("OFFSET"));
}

#[test]
fn test_ordering_is_emitted_after_filter() {
    let q = Query::table("DataTable")
        .order_by(lambda("d", |d| d.field("Value")))
        .filter(lambda("d", |d| d.field("Id").ge(10)));
    let t = sql(&q);
    let where_at = t.sql.find("WHERE").expect("WHERE clause");
    let order_at = t.sql.rfind("ORDER BY").expect("ORDER BY clause");
    assert!(where_at < order_at, "{}", t.sql);
    assert!(t.sql.ends_with("ORDER BY [Value]"), "{}", t.sql);
}

#[test]
fn test_translation_is_deterministic() {
    let q = Query::table("Album")
        .join(
            Query::table("Artist"),
            lambda("al", |al| al.field("ArtistId")),
            lambda("ar", |ar| ar.field("ArtistId")),
            lambda2("al", "ar", |al, ar| {
                new_record("AlbumArtist", vec![("Title", al.field("Title")), ("Artist", ar.field("Name"))])
            }),
        )
        .order_by(lambda("x", |x| x.field("Title")));
    let first = sql(&q);
    let second = sql(&q);
    assert_eq!(first.sql, second.sql);
    assert_eq!(first.params, second.params);
    assert!(first.sql.contains("INNER JOIN"), "{}", first.sql);
}

#[test]
fn test_declared_aliases_are_unique() {
    let q = Query::table("Artist").project(lambda("a", |a| {
        new_record(
            "ArtistAlbums",
            vec![
                ("Name", a.clone().field("Name")),
                (
                    "Albums",
                    Query::table("Album")
                        .filter(lambda("al", |al| al.field("ArtistId").equals(a.field("ArtistId"))))
                        .count()
                        .into_expr(),
                ),
            ],
        )
    }));
    let t = sql(&q);
    let mut declared = DeclaredAliases::default();
    declared.visit_projection(&t.projection);
    let unique: HashSet<_> = declared.aliases.iter().collect();
    assert_eq!(unique.len(), declared.aliases.len());
}

#[test]
fn test_equality_and_string_methods() {
    let q = Query::table("Artist")
        .filter(lambda("a", |a| a.clone().field("Name").contains("AC").or(a.field("ArtistId").equals(2))))
        .project(lambda("a", |a| a.field("Name")));
    let t = sql(&q);
    assert!(t.sql.contains("GLOB '*' || ? || '*'"), "{}", t.sql);
    assert!(t.sql.contains("[ArtistId] IS ?"), "{}", t.sql);
    assert_eq!(
        t.params,
        vec![SqlValue::Text("AC".into()), SqlValue::Integer(2)]
    );
}

#[test]
fn test_unsupported_combinator() {
    let err = relq::translate(&catalog(), &Query::table("Track").reverse()).unwrap_err();
    assert!(matches!(err, RelqError::UnsupportedOperation(ref name) if name == "Reverse"));
}

#[test]
fn test_unknown_entity() {
    let err = relq::translate(&catalog(), &Query::table("Invoice")).unwrap_err();
    assert!(matches!(err, RelqError::UnknownEntity(_)));
}

#[test]
fn test_minimal_options_keep_nesting() {
    let q = Query::table("DataTable")
        .filter(lambda("d", |d| d.field("Id").ge(10)))
        .project(lambda("d", |d| d.field("Value")));
    let t = Translator::new(&catalog())
        .with_options(TranslateOptions::minimal())
        .translate(&q)
        .unwrap();
    assert!(t.sql.matches("SELECT").count() > 1, "{}", t.sql);
    assert_eq!(t.params, vec![SqlValue::Integer(10)]);
}

#[test]
fn test_view_definition_inlines_literals() {
    let q = Query::table("DataTable").filter(lambda("d", |d| d.field("Value").equals("b")));
    let sql = relq::translate::compile_view_definition(&catalog(), &q).unwrap();
    assert_eq!(sql, "SELECT [Id], [Value] FROM [DataTable] WHERE [Value] IS 'b'");
}

#[test]
fn test_local_values_are_sent_as_parameters() {
    let q = Query::table("Track")
        .filter(lambda("t", |t| {
            Query::local(vec![Value::Int(2), Value::Int(4)], Type::I64)
                .contains(t.field("AlbumId"))
                .into_expr()
        }))
        .project(lambda("t", |t| t.field("Name")));
    let t = sql(&q);
    assert!(t.sql.contains("[AlbumId] IN (?, ?)"), "{}", t.sql);
    assert_eq!(t.params, vec![SqlValue::Integer(2), SqlValue::Integer(4)]);

    let any = Query::table("Artist").filter(lambda("a", |a| {
        Query::local(vec![Value::Text("Accept".into())], Type::Text)
            .any_where(lambda("n", |n| n.equals(a.field("Name"))))
            .into_expr()
    }));
    let t = sql(&any);
    assert!(!t.sql.contains("'Accept'"), "{}", t.sql);
    assert_eq!(t.params, vec![SqlValue::Text("Accept".into())]);
}
