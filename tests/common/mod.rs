#![allow(dead_code)]

use relq::prelude::*;

pub fn catalog() -> Catalog {
    Catalog::new()
        .with(
            TableSchema::new("DataTable")
                .column(ColumnSchema::new("Id", Type::I64))
                .column(ColumnSchema::new("Value", Type::Text)),
        )
        .with(
            TableSchema::new("Artist")
                .column(ColumnSchema::new("ArtistId", Type::I64))
                .column(ColumnSchema::new("Name", Type::Text).nullable()),
        )
        .with(
            TableSchema::new("Album")
                .column(ColumnSchema::new("AlbumId", Type::I64))
                .column(ColumnSchema::new("Title", Type::Text))
                .column(ColumnSchema::new("ArtistId", Type::I64)),
        )
        .with(
            TableSchema::new("Track")
                .column(ColumnSchema::new("TrackId", Type::I64))
                .column(ColumnSchema::new("Name", Type::Text))
                .column(ColumnSchema::new("AlbumId", Type::I64))
                .column(ColumnSchema::new("Milliseconds", Type::I64)),
        )
}

const SEED: &str = r#"
CREATE TABLE DataTable (Id INTEGER PRIMARY KEY, Value TEXT NOT NULL);
INSERT INTO DataTable VALUES (5, 'a'), (10, 'b'), (15, 'c'), (20, 'd');

CREATE TABLE Artist (ArtistId INTEGER PRIMARY KEY, Name TEXT);
INSERT INTO Artist VALUES (1, 'AC/DC'), (2, 'Accept'), (3, NULL);

CREATE TABLE Album (AlbumId INTEGER PRIMARY KEY, Title TEXT NOT NULL, ArtistId INTEGER NOT NULL);
INSERT INTO Album VALUES
    (1, 'For Those About To Rock', 1),
    (2, 'Balls to the Wall', 2),
    (3, 'Restless and Wild', 2),
    (4, 'Let There Be Rock', 1);

CREATE TABLE Track (TrackId INTEGER PRIMARY KEY, Name TEXT NOT NULL, AlbumId INTEGER NOT NULL, Milliseconds INTEGER NOT NULL);
INSERT INTO Track VALUES
    (1, 'For Those About To Rock', 1, 343719),
    (2, 'Put The Finger On You', 1, 205662),
    (3, 'Balls to the Wall', 2, 342562),
    (4, 'Fast As a Shark', 3, 230619),
    (5, 'Restless and Wild', 3, 252051),
    (6, 'Go Down', 4, 331180);
"#;

/// A seeded in-memory database.
pub fn session() -> Session<SqliteExecutor> {
    session_with(TranslateOptions::default())
}

pub fn session_with(options: TranslateOptions) -> Session<SqliteExecutor> {
    let executor = SqliteExecutor::in_memory().expect("open in-memory database");
    executor.execute_batch(SEED).expect("seed database");
    Session::new(executor, catalog()).with_options(options)
}

pub fn texts(value: Value) -> Vec<String> {
    match value {
        Value::List(items) => items
            .into_iter()
            .map(|v| match v {
                Value::Text(s) => s,
                other => panic!("expected text, got {:?}", other),
            })
            .collect(),
        other => panic!("expected a list, got {:?}", other),
    }
}
