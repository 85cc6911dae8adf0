mod common;

use common::TestWorkspace;
use csv_bulk_import::{
    error::ImportError,
    reader::{DelimitedReader, open_sources},
    schema::{ColumnKind, infer_schema},
};
use encoding_rs::{UTF_8, WINDOWS_1252};

#[test]
fn rows_can_be_scanned_more_than_once() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("people.csv", "id,name\n1,Alice\n2,Bob\n");
    let reader = DelimitedReader::open(&path, b',', true, UTF_8).unwrap();

    assert_eq!(reader.field_count(), 2);
    assert_eq!(
        reader.headers().unwrap(),
        Some(vec!["id".to_string(), "name".to_string()])
    );
    let first = reader.rows().unwrap().collect::<Result<Vec<_>, _>>().unwrap();
    let second = reader.rows().unwrap().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(first, second);
    assert_eq!(first[1], vec!["2".to_string(), "Bob".to_string()]);
}

#[test]
fn quoted_fields_keep_delimiters_and_doubled_quotes() {
    let workspace = TestWorkspace::new();
    let path = workspace.write(
        "quotes.csv",
        "id,comment\n1,\"Hello, world\"\n2,\"She said \"\"hi\"\"\"\n",
    );
    let reader = DelimitedReader::open(&path, b',', true, UTF_8).unwrap();
    let rows = reader.rows().unwrap().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(rows[0][1], "Hello, world");
    assert_eq!(rows[1][1], "She said \"hi\"");
}

#[test]
fn headerless_source_yields_first_line_as_data() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("data.txt", "7|x\n8|y\n");
    let reader = DelimitedReader::open(&path, b'|', false, UTF_8).unwrap();
    assert_eq!(reader.headers().unwrap(), None);
    assert_eq!(
        reader.first_data_row().unwrap(),
        Some(vec!["7".to_string(), "x".to_string()])
    );
}

#[test]
fn legacy_encodings_are_decoded() {
    let workspace = TestWorkspace::new();
    let path = workspace.path().join("latin.csv");
    std::fs::write(&path, b"id,city\n1,Z\xfcrich\n").unwrap();
    let reader = DelimitedReader::open(&path, b',', true, WINDOWS_1252).unwrap();
    let rows = reader.rows().unwrap().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(rows[0][1], "Zürich");
}

#[test]
fn invalid_utf8_is_a_source_error_with_line() {
    let workspace = TestWorkspace::new();
    let path = workspace.path().join("bad.csv");
    std::fs::write(&path, b"id,city\n1,ok\n2,Z\xfcrich\n").unwrap();
    let reader = DelimitedReader::open(&path, b',', true, UTF_8).unwrap();
    let rows = reader.rows().unwrap().collect::<Vec<_>>();
    assert!(rows[0].is_ok());
    let err = rows[1].as_ref().unwrap_err();
    assert_eq!(err.line, 3);
    assert!(err.message.contains("UTF-8"), "{}", err.message);
}

#[test]
fn open_sources_checks_delimiters_before_field_counts() {
    let workspace = TestWorkspace::new();
    let a = workspace.write("a.csv", "a,b\n1,2\n");
    let b = workspace.write("b.csv", "a,b,c\n1,2,3\n");
    let c = workspace.write("c.csv", "no delimiter here\n");

    let err = open_sources(&[a.clone(), b.clone(), c.clone()], None, true, UTF_8).unwrap_err();
    assert!(matches!(err, ImportError::MalformedInput { ref path, .. } if path == &c));

    let err = open_sources(&[a, b.clone()], None, true, UTF_8).unwrap_err();
    assert!(matches!(err, ImportError::SchemaMismatch { ref path, .. } if path == &b));
}

#[test]
fn missing_file_is_an_io_error() {
    let workspace = TestWorkspace::new();
    let missing = workspace.path().join("missing.csv");
    let err = open_sources(&[missing], None, true, UTF_8).unwrap_err();
    assert!(matches!(err, ImportError::Io { .. }));
}

#[test]
fn inference_reads_the_first_data_row() {
    let workspace = TestWorkspace::new();
    let path = workspace.write(
        "mixed.csv",
        "id, price ,when,label\n 42 ,42.5,2024-01-01,abc\n1.5,x,y,z\n",
    );
    let reader = DelimitedReader::open(&path, b',', true, UTF_8).unwrap();
    let schema = infer_schema(&reader).unwrap();
    assert_eq!(schema.names(), vec!["id", "price", "when", "label"]);
    assert_eq!(
        schema.kinds(),
        vec![
            ColumnKind::Integer,
            ColumnKind::Decimal,
            ColumnKind::DateTime,
            ColumnKind::Text
        ]
    );
}

#[test]
fn header_only_file_infers_text_columns() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("empty.csv", "id,name\n");
    let reader = DelimitedReader::open(&path, b',', true, UTF_8).unwrap();
    let schema = infer_schema(&reader).unwrap();
    assert_eq!(schema.kinds(), vec![ColumnKind::Text, ColumnKind::Text]);
}
