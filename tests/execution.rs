mod common;

use pretty_assertions::assert_eq;
use relq::prelude::*;

use common::{session, session_with, texts};

fn values_above_ten() -> Query {
    Query::table("DataTable")
        .filter(lambda("d", |d| d.field("Id").ge(10)))
        .order_by(lambda("d", |d| d.field("Id")))
        .project(lambda("d", |d| d.field("Value")))
}

#[test]
fn test_filter_and_project() {
    let result = session().fetch(&values_above_ten()).unwrap();
    assert_eq!(texts(result), vec!["b", "c", "d"]);
}

#[test]
fn test_paging() {
    let q = Query::table("DataTable")
        .order_by(lambda("d", |d| d.field("Id")))
        .skip(1)
        .take(2)
        .project(lambda("d", |d| d.field("Value")));
    assert_eq!(texts(session().fetch(&q).unwrap()), vec!["b", "c"]);
}

#[test]
fn test_scalar_aggregates() {
    let session = session();
    assert_eq!(session.fetch(&Query::table("Track").count()).unwrap(), Value::Int(6));
    let long = Query::table("Track").count_where(lambda("t", |t| t.field("Milliseconds").gt(300_000)));
    assert_eq!(session.fetch(&long).unwrap(), Value::Int(3));
    let any = Query::table("Artist").any_where(lambda("a", |a| a.field("Name").starts_with("Acc")));
    assert_eq!(session.fetch(&any).unwrap(), Value::Bool(true));
}

#[test]
fn test_null_safe_equality() {
    let q = Query::table("Artist")
        .filter(lambda("a", |a| a.field("Name").equals(null(Type::Text))))
        .project(lambda("a", |a| a.field("ArtistId")));
    assert_eq!(session().fetch(&q).unwrap(), Value::List(vec![Value::Int(3)]));
}

#[test]
fn test_null_never_equals_a_value() {
    let session = session();
    let ids = |predicate: Lambda| {
        Query::table("Artist")
            .filter(predicate)
            .order_by(lambda("a", |a| a.field("ArtistId")))
            .project(lambda("a", |a| a.field("ArtistId")))
    };

    let equal = ids(lambda("a", |a| a.field("Name").equals("AC/DC")));
    assert_eq!(session.fetch(&equal).unwrap(), Value::List(vec![Value::Int(1)]));

    let unequal = ids(lambda("a", |a| a.field("Name").not_equals("AC/DC")));
    assert_eq!(
        session.fetch(&unequal).unwrap(),
        Value::List(vec![Value::Int(2), Value::Int(3)])
    );
}

#[test]
fn test_element_operators() {
    let session = session();
    let ids = Query::table("Artist").project(lambda("a", |a| a.field("ArtistId")));
    let none = ids.clone().filter(lambda("id", |id| id.gt(100)));

    assert!(matches!(session.fetch(&none.clone().first()), Err(RelqError::NoElement)));
    assert_eq!(session.fetch(&none.first_or_default()).unwrap(), Value::Int(0));
    assert!(matches!(
        session.fetch(&ids.clone().single()),
        Err(RelqError::MultipleElements)
    ));
    let one = ids.single_where(lambda("id", |id| id.equals(2)));
    assert_eq!(session.fetch(&one).unwrap(), Value::Int(2));
}

#[test]
fn test_group_enumeration() {
    let q = Query::table("Track").group_by(lambda("t", |t| t.field("AlbumId")));
    let groups = match session().fetch(&q).unwrap() {
        Value::List(groups) => groups,
        other => panic!("expected groups, got {:?}", other),
    };
    let mut sizes: Vec<(i64, usize)> = groups
        .into_iter()
        .map(|g| match g {
            Value::Group { key, elements } => (key.as_i64().unwrap(), elements.len()),
            other => panic!("expected a group, got {:?}", other),
        })
        .collect();
    sizes.sort();
    assert_eq!(sizes, vec![(1, 2), (2, 1), (3, 2), (4, 1)]);
}

fn albums_per_artist() -> Query {
    Query::table("Artist")
        .order_by(lambda("a", |a| a.field("ArtistId")))
        .project(lambda("a", |a| {
            new_record(
                "ArtistAlbums",
                vec![
                    ("Id", a.clone().field("ArtistId")),
                    (
                        "Albums",
                        Query::table("Album")
                            .filter(lambda("al", |al| al.field("ArtistId").equals(a.field("ArtistId"))))
                            .count()
                            .into_expr(),
                    ),
                ],
            )
        }))
}

fn longest_track_per_album() -> Query {
    Query::table("Album")
        .order_by(lambda("al", |al| al.field("AlbumId")))
        .project(lambda("al", |al| {
            new_record(
                "AlbumLongest",
                vec![
                    ("Id", al.clone().field("AlbumId")),
                    (
                        "Longest",
                        Query::table("Track")
                            .filter(lambda("t", |t| t.field("AlbumId").equals(al.field("AlbumId"))))
                            .order_by_descending(lambda("t", |t| t.field("Milliseconds")))
                            .project(lambda("t", |t| t.field("Name")))
                            .first_or_default()
                            .into_expr(),
                    ),
                ],
            )
        }))
}

fn tracks_per_album() -> Query {
    Query::table("Track")
        .group_by(lambda("t", |t| t.field("AlbumId")))
        .project(lambda("g", |g| {
            new_record(
                "AlbumTracks",
                vec![
                    ("Key", g.clone().field("Key")),
                    ("Count", Query::of(g).count().into_expr()),
                ],
            )
        }))
}

fn album_artists() -> Query {
    Query::table("Album")
        .join(
            Query::table("Artist"),
            lambda("al", |al| al.field("ArtistId")),
            lambda("ar", |ar| ar.field("ArtistId")),
            lambda2("al", "ar", |al, ar| {
                new_record("AlbumArtist", vec![("Title", al.field("Title")), ("Artist", ar.field("Name"))])
            }),
        )
        .order_by(lambda("x", |x| x.field("Title")))
}

fn record_fields(result: Value, names: &[&str]) -> Vec<Vec<Value>> {
    let rows = match result {
        Value::List(rows) => rows,
        other => panic!("expected rows, got {:?}", other),
    };
    rows.into_iter()
        .map(|r| match r {
            Value::Record(r) => names.iter().map(|n| r.get(n).cloned().unwrap()).collect(),
            other => panic!("expected a record, got {:?}", other),
        })
        .collect()
}

#[test]
fn test_correlated_count_per_row() {
    let q = albums_per_artist();
    let rows = match session().fetch(&q).unwrap() {
        Value::List(rows) => rows,
        other => panic!("expected rows, got {:?}", other),
    };
    let counts: Vec<(Value, Value)> = rows
        .into_iter()
        .map(|r| match r {
            Value::Record(r) => (r.get("Id").cloned().unwrap(), r.get("Albums").cloned().unwrap()),
            other => panic!("expected a record, got {:?}", other),
        })
        .collect();
    assert_eq!(
        counts,
        vec![
            (Value::Int(1), Value::Int(2)),
            (Value::Int(2), Value::Int(2)),
            (Value::Int(3), Value::Int(0)),
        ]
    );
}

#[test]
fn test_first_of_ordered_subquery_per_row() {
    let rows = record_fields(session().fetch(&longest_track_per_album()).unwrap(), &["Id", "Longest"]);
    let text = |s: &str| Value::Text(s.to_string());
    assert_eq!(
        rows,
        vec![
            vec![Value::Int(1), text("For Those About To Rock")],
            vec![Value::Int(2), text("Balls to the Wall")],
            vec![Value::Int(3), text("Restless and Wild")],
            vec![Value::Int(4), text("Go Down")],
        ]
    );
}

#[test]
fn test_group_key_and_count() {
    let mut rows = record_fields(session().fetch(&tracks_per_album()).unwrap(), &["Key", "Count"])
        .into_iter()
        .map(|r| (r[0].as_i64().unwrap(), r[1].as_i64().unwrap()))
        .collect::<Vec<_>>();
    rows.sort();
    assert_eq!(rows, vec![(1, 2), (2, 1), (3, 2), (4, 1)]);
}

#[test]
fn test_join_orders_left_side_first() {
    let q = Query::table("Album")
        .order_by_descending(lambda("al", |al| al.field("AlbumId")))
        .join(
            Query::table("Artist").order_by(lambda("ar", |ar| ar.field("Name"))),
            lambda("al", |al| al.field("ArtistId")),
            lambda("ar", |ar| ar.field("ArtistId")),
            lambda2("al", "ar", |al, ar| {
                new_record("AlbumArtist", vec![("Title", al.field("Title")), ("Artist", ar.field("Name"))])
            }),
        );

    let sql = relq::translate(&common::catalog(), &q).unwrap().sql;
    let order_by = &sql[sql.rfind("ORDER BY").expect("an ORDER BY")..];
    let album = order_by.find("[AlbumId] DESC").expect("album ordering");
    let artist = order_by.find("[Name]").expect("artist ordering");
    assert!(album < artist, "{}", sql);

    let titles: Vec<Value> = record_fields(session().fetch(&q).unwrap(), &["Title"])
        .into_iter()
        .flatten()
        .collect();
    let text = |s: &str| Value::Text(s.to_string());
    assert_eq!(
        titles,
        vec![
            text("Let There Be Rock"),
            text("Restless and Wild"),
            text("Balls to the Wall"),
            text("For Those About To Rock"),
        ]
    );
}

#[test]
fn test_join_records() {
    let q = album_artists().filter(lambda("x", |x| x.field("Artist").equals("Accept")));
    let rows = match session().fetch(&q).unwrap() {
        Value::List(rows) => rows,
        other => panic!("expected rows, got {:?}", other),
    };
    let titles: Vec<_> = rows
        .iter()
        .filter_map(|r| match r {
            Value::Record(r) => r.get("Title").and_then(Value::as_str).map(str::to_string),
            _ => None,
        })
        .collect();
    assert_eq!(titles, vec!["Balls to the Wall", "Restless and Wild"]);
}

#[test]
fn test_rewrites_do_not_change_results() {
    let queries = vec![
        values_above_ten(),
        Query::table("DataTable")
            .order_by_descending(lambda("d", |d| d.field("Id")))
            .take(2)
            .project(lambda("d", |d| d.field("Value"))),
        Query::table("Track")
            .filter(lambda("t", |t| t.field("AlbumId").equals(1)))
            .project(lambda("t", |t| t.field("Name")))
            .distinct()
            .order_by(lambda("n", |n| n))
            .project(lambda("n", |n| n)),
        albums_per_artist(),
        longest_track_per_album(),
        tracks_per_album().order_by(lambda("r", |r| r.field("Key"))),
        album_artists(),
        Query::table("Artist")
            .filter(lambda("a", |a| {
                Query::table("Album")
                    .any_where(lambda("al", |al| al.field("ArtistId").equals(a.field("ArtistId"))))
                    .into_expr()
            }))
            .order_by(lambda("a", |a| a.field("ArtistId")))
            .project(lambda("a", |a| a.field("Name"))),
    ];
    let optimized = session();
    let minimal = session_with(TranslateOptions::minimal());
    for q in &queries {
        assert_eq!(optimized.fetch(q).unwrap(), minimal.fetch(q).unwrap());
    }
}

#[test]
fn test_lazy_rows() {
    let session = session();
    let rows = session.rows(&values_above_ten()).unwrap();
    let values: Vec<Value> = rows.collect::<RelqResult<_>>().unwrap();
    assert_eq!(values.len(), 3);
    assert!(matches!(
        session.rows(&Query::table("Track").count()),
        Err(RelqError::Shape(_))
    ));
}
