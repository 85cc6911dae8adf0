mod common;

use common::{TestWorkspace, options, run_import};
use csv_bulk_import::{
    destination::{DestinationColumn, memory::MemoryDestination},
    dialect::{Dialect, TableName},
    error::{ImportError, LoadError},
    orchestrator::LoadStatus,
};

fn memory() -> MemoryDestination {
    MemoryDestination::new(Dialect::SqlServer)
}

fn people() -> TableName {
    TableName::new("people")
}

fn cells(values: &[&str]) -> Vec<Option<String>> {
    values
        .iter()
        .map(|v| (!v.is_empty()).then(|| v.to_string()))
        .collect()
}

#[test]
fn headed_file_creates_missing_table_and_copies_rows() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("people.csv", "id,name\n1,Alice\n2,Bob\n");
    let destination = memory();

    let (result, _) = run_import(&destination, &options("people"), &[input.clone()]);
    let report = result.expect("import succeeds");

    assert_eq!(
        destination.executed_ddl(),
        vec!["CREATE TABLE [people] ([id] bigint, [name] varchar(MAX))".to_string()]
    );
    assert_eq!(report.created_table, destination.executed_ddl().first().cloned());
    assert_eq!(report.results.len(), 1);
    let result = &report.results[0];
    assert_eq!(result.path, input);
    assert_eq!(result.status, LoadStatus::Success);
    assert_eq!(result.rows_attempted, 2);
    assert_eq!(result.rows_copied, 2);
    assert_eq!(report.total_rows_copied(), 2);
    assert_eq!(
        destination.rows(&people()),
        vec![cells(&["1", "Alice"]), cells(&["2", "Bob"])]
    );
    assert_eq!(destination.connections_open(), 0);
}

#[test]
fn missing_delimiter_fails_before_any_connection() {
    let workspace = TestWorkspace::new();
    let good = workspace.write_people("good.csv", 3);
    let bad = workspace.write("bad.csv", "just one column\n1\n");
    let destination = memory();

    let (result, _) = run_import(&destination, &options("people"), &[good, bad.clone()]);
    match result {
        Err(ImportError::MalformedInput { path, delimiter }) => {
            assert_eq!(path, bad);
            assert_eq!(delimiter, ",");
        }
        other => panic!("expected malformed input, got {other:?}"),
    }
    assert_eq!(destination.connections_opened(), 0);
}

#[test]
fn empty_file_is_malformed() {
    let workspace = TestWorkspace::new();
    let empty = workspace.write("empty.csv", "");
    let destination = memory();
    let (result, _) = run_import(&destination, &options("people"), &[empty]);
    assert!(matches!(result, Err(ImportError::MalformedInput { .. })));
}

#[test]
fn field_count_mismatch_names_the_second_file_and_loads_nothing() {
    let workspace = TestWorkspace::new();
    let first = workspace.write("first.csv", "a,b,c\n1,2,3\n");
    let second = workspace.write("second.csv", "a,b,c,d\n1,2,3,4\n");
    let destination = memory();

    let (result, _) = run_import(&destination, &options("t"), &[first.clone(), second.clone()]);
    match result {
        Err(err @ ImportError::SchemaMismatch { .. }) => {
            let message = err.to_string();
            assert!(message.contains("second.csv"), "{message}");
            if let ImportError::SchemaMismatch {
                path,
                first: reference,
                expected,
                found,
            } = err
            {
                assert_eq!(path, second);
                assert_eq!(reference, first);
                assert_eq!((expected, found), (3, 4));
            }
        }
        other => panic!("expected schema mismatch, got {other:?}"),
    }
    assert_eq!(destination.connections_opened(), 0);
    assert!(destination.executed_ddl().is_empty());
}

#[test]
fn no_inputs_is_rejected() {
    let destination = memory();
    let (result, _) = run_import(&destination, &options("people"), &[]);
    assert!(matches!(result, Err(ImportError::NoInputs)));
}

#[test]
fn truncate_before_load_makes_reruns_idempotent() {
    let workspace = TestWorkspace::new();
    let input = workspace.write_people("people.csv", 3);
    let destination = memory();
    let mut opts = options("people");
    opts.truncate_before_load = true;

    for _ in 0..2 {
        let (result, _) = run_import(&destination, &opts, &[input.clone()]);
        assert_eq!(result.unwrap().total_rows_copied(), 3);
        assert_eq!(destination.row_count(&people()), 3);
    }

    opts.truncate_before_load = false;
    run_import(&destination, &opts, &[input]).0.unwrap();
    assert_eq!(destination.row_count(&people()), 6);
}

#[test]
fn failure_mid_stream_leaves_the_table_untouched() {
    let workspace = TestWorkspace::new();
    let input = workspace.write_people("people.csv", 10);
    let destination = memory();
    run_import(&destination, &options("people"), &[input.clone()])
        .0
        .unwrap();
    assert_eq!(destination.row_count(&people()), 10);

    let _ = destination.clone().fail_after(5, "connection reset by peer");
    let (result, _) = run_import(&destination, &options("people"), &[input]);
    let report = result.expect("per-file failures do not abort the run");
    let result = &report.results[0];
    assert_eq!(result.status, LoadStatus::RolledBack);
    assert_eq!(result.rows_copied, 0);
    assert!(matches!(
        &result.error,
        Some(LoadError::Generic(message)) if message == "connection reset by peer"
    ));
    assert!(report.has_failures());
    assert_eq!(destination.row_count(&people()), 10);
    assert_eq!(destination.connections_open(), 0);
}

#[test]
fn progress_is_reported_every_notify_interval() {
    let workspace = TestWorkspace::new();
    let input = workspace.write_people("people.csv", 250);
    let destination = memory();
    let mut opts = options("people");
    opts.notify_after = 100;

    let (result, events) = run_import(&destination, &opts, &[input.clone()]);
    let report = result.unwrap();

    let counts = events.iter().map(|(_, count)| *count).collect::<Vec<_>>();
    assert!(counts.len() >= 2);
    assert!(counts.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(events.iter().all(|(path, _)| path == &input));
    assert_eq!(counts, vec![100, 200]);
    assert_eq!(report.results[0].rows_copied, 250);
}

#[test]
fn unknown_database_is_fatal() {
    let workspace = TestWorkspace::new();
    let input = workspace.write_people("people.csv", 2);
    let destination = memory();
    let mut opts = options("people");
    opts.database = "warehouse".into();

    let (result, _) = run_import(&destination, &opts, &[input]);
    assert!(matches!(
        result,
        Err(ImportError::DestinationNotFound(ref name)) if name == "warehouse"
    ));
    assert!(destination.executed_ddl().is_empty());

    let destination = memory().with_database("warehouse");
    let workspace = TestWorkspace::new();
    let input = workspace.write_people("people.csv", 2);
    assert!(run_import(&destination, &opts, &[input]).0.is_ok());
}

#[test]
fn overflow_reports_column_length_and_row_offset() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("people.csv", "id,name\n1,Ann\n2,Bob\n3,Bartholomew\n");
    let destination = memory().with_table(
        &people(),
        vec![
            DestinationColumn::new("id", "bigint"),
            DestinationColumn::new("name", "varchar(5)"),
        ],
    );
    let mut opts = options("people");
    opts.notify_after = 1;

    let report = run_import(&destination, &opts, &[input]).0.unwrap();
    assert!(destination.executed_ddl().is_empty());
    match &report.results[0].error {
        Some(LoadError::ColumnOverflow {
            column,
            max_length,
            after_row,
            ..
        }) => {
            assert_eq!(column, "name");
            assert_eq!(*max_length, Some(5));
            assert_eq!(*after_row, 2);
        }
        other => panic!("expected column overflow, got {other:?}"),
    }
    assert_eq!(destination.row_count(&people()), 0);
}

#[test]
fn type_mismatch_shows_column_order_side_by_side() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("people.csv", "id,name\n1,Alice\n");
    let destination = memory().with_table(
        &people(),
        vec![
            DestinationColumn::new("name", "varchar(50)"),
            DestinationColumn::new("id", "bigint").not_null(),
        ],
    );

    let report = run_import(&destination, &options("people"), &[input]).0.unwrap();
    let result = &report.results[0];
    assert_eq!(result.status, LoadStatus::RolledBack);
    let Some(error) = &result.error else {
        panic!("expected a load error");
    };
    let LoadError::TypeMismatch { comparison, .. } = error else {
        panic!("expected type mismatch, got {error:?}");
    };
    assert_eq!(comparison.source, vec!["id", "name"]);
    assert_eq!(comparison.mismatched_positions(), vec![0, 1]);
    let message = error.to_string();
    assert!(message.contains("cannot be converted to type bigint"), "{message}");
    assert!(message.contains("source column"), "{message}");
}

#[test]
fn failed_file_does_not_stop_the_following_files() {
    let workspace = TestWorkspace::new();
    let a = workspace.write_people("a.csv", 3);
    let b = workspace.write("b.csv", "id,name\n10,ok\nnot-a-number,bad\n");
    let c = workspace.write_people("c.csv", 2);
    let destination = memory();

    let report = run_import(&destination, &options("people"), &[a, b, c])
        .0
        .unwrap();
    let statuses = report
        .results
        .iter()
        .map(|r| r.status)
        .collect::<Vec<_>>();
    assert_eq!(
        statuses,
        vec![LoadStatus::Success, LoadStatus::RolledBack, LoadStatus::Success]
    );
    assert_eq!(report.total_rows_copied(), 5);
    assert_eq!(destination.row_count(&people()), 5);
    assert_eq!(report.failed().count(), 1);
}

#[test]
fn query_projects_and_filters_rows() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("people.csv", "id,name\n1,Alice\n2,Bob\n3,Cy\n");
    let destination = memory();
    let mut opts = options("people");
    opts.query = "SELECT name FROM csvtable WHERE id >= 2".into();

    let report = run_import(&destination, &opts, &[input]).0.unwrap();
    assert_eq!(
        destination.executed_ddl(),
        vec!["CREATE TABLE [people] ([name] varchar(MAX))".to_string()]
    );
    assert_eq!(report.results[0].rows_attempted, 2);
    assert_eq!(
        destination.rows(&people()),
        vec![cells(&["Bob"]), cells(&["Cy"])]
    );
}

#[test]
fn unusable_query_fails_every_file_with_guidance() {
    let workspace = TestWorkspace::new();
    let a = workspace.write_people("a.csv", 2);
    let b = workspace.write_people("b.csv", 2);
    let destination = memory();
    let mut opts = options("people");
    opts.query = "SELECT missing FROM csvtable".into();

    let report = run_import(&destination, &opts, &[a, b]).0.unwrap();
    assert!(destination.executed_ddl().is_empty());
    for result in &report.results {
        assert_eq!(result.status, LoadStatus::Failed);
        let message = result.error.as_ref().unwrap().to_string();
        assert!(message.contains("Simplify the query"), "{message}");
        assert!(message.contains("missing"), "{message}");
    }
}

#[test]
fn headerless_files_get_synthesized_columns_and_empty_fields_become_null() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("data.txt", "1,,2024-01-01\n2,x,2024-01-02\n");
    let destination = memory();
    let mut opts = options("facts");
    opts.first_row_has_column_names = false;

    run_import(&destination, &opts, &[input]).0.unwrap();
    assert_eq!(
        destination.executed_ddl(),
        vec![
            "CREATE TABLE [facts] ([column1] bigint, [column2] varchar(MAX), [column3] datetime2)"
                .to_string()
        ]
    );
    assert_eq!(
        destination.rows(&TableName::new("facts")),
        vec![
            cells(&["1", "", "2024-01-01"]),
            cells(&["2", "x", "2024-01-02"])
        ]
    );
}

#[test]
fn ragged_row_is_a_source_read_error() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("people.csv", "id,name\n1,Alice\n2,Bob,extra\n");
    let destination = memory();

    let report = run_import(&destination, &options("people"), &[input]).0.unwrap();
    let result = &report.results[0];
    assert_eq!(result.status, LoadStatus::RolledBack);
    match &result.error {
        Some(LoadError::SourceRead(err)) => assert_eq!(err.line, 3),
        other => panic!("expected source read error, got {other:?}"),
    }
    assert_eq!(destination.row_count(&people()), 0);
}

#[test]
fn tab_files_default_to_tab_delimiter() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("people.tsv", "id\tname\n1\tAlice\n");
    let destination = memory();
    let report = run_import(&destination, &options("people"), &[input]).0.unwrap();
    assert_eq!(report.total_rows_copied(), 1);
}

#[test]
fn report_serializes_to_json_and_summarizes() {
    let workspace = TestWorkspace::new();
    let input = workspace.write_people("people.csv", 4);
    let destination = memory();
    let report = run_import(&destination, &options("people"), &[input]).0.unwrap();

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["table"], "people");
    assert_eq!(json["destination"], "memory");
    assert_eq!(json["results"][0]["rowsCopied"], 4);
    assert_eq!(json["results"][0]["status"], "success");
    assert!(json["results"][0]["error"].is_null());
    assert!(json["elapsedSecs"].is_number());

    let summary = report.summary();
    assert!(summary.contains("people.csv"));
    assert!(summary.lines().last().unwrap().starts_with("total"));
}
