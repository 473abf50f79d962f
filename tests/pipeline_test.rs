use data_relay::core::access::{Action, StaticAccessGate};
use data_relay::core::audit::{JsonLinesAuditLog, MemoryAuditLog, RunStatus};
use data_relay::core::checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
use data_relay::core::events::{EventName, EventPayload, Stage};
use data_relay::core::{
    CancelHandle, ExportOptions, ExportRequest, ImportOptions, ImportRequest, Orchestrator,
    RunState, Template, TransformSpec, ValidateSpec,
};
use data_relay::{Chunk, EtlError, Record};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn users(n: usize) -> Vec<Record> {
    (1..=n)
        .map(|i| {
            Record::from_pairs([
                ("id", i.to_string()),
                ("name", format!("user{}", i)),
                ("email", format!("user{}@example.com", i)),
            ])
        })
        .collect()
}

fn records_of(chunks: &[Chunk]) -> Vec<Record> {
    chunks.iter().flat_map(|c| c.records.clone()).collect()
}

/// Records every event name in publication order.
fn trace_events(orchestrator: &Orchestrator) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for direction in ["import", "export"] {
        for stage in ["before", "row", "error", "progress", "after"] {
            let name: EventName = format!("{}.{}", direction, stage).parse().unwrap();
            let seen = seen.clone();
            orchestrator.events().subscribe(name, move |event| {
                seen.lock().unwrap().push(event.name.to_string());
                Ok(())
            });
        }
    }
    seen
}

#[test]
fn test_chunked_and_unchunked_imports_match() {
    let orchestrator = Orchestrator::new();
    orchestrator
        .export(ExportRequest::new("json", users(7), "mem://users.json"))
        .unwrap();

    let unchunked = orchestrator
        .import(ImportRequest::new("json", "mem://users.json"))
        .unwrap()
        .run_to_end()
        .unwrap();
    assert_eq!(unchunked.chunks.len(), 7);
    assert!(unchunked.chunks.iter().all(|c| c.len() == 1));

    for size in [1, 2, 3, 7, 10] {
        let chunked = orchestrator
            .import(
                ImportRequest::new("json", "mem://users.json")
                    .with_options(ImportOptions::default().chunk_size(size)),
            )
            .unwrap()
            .run_to_end()
            .unwrap();
        assert!(chunked.chunks.iter().all(|c| c.len() <= size));
        assert_eq!(records_of(&chunked.chunks), unchunked.records());
    }
}

#[test]
fn test_three_records_chunk_two() {
    let orchestrator = Orchestrator::new();
    let data = users(3);

    let outcome = orchestrator
        .import(
            ImportRequest::new("object", data.clone())
                .with_options(ImportOptions::default().chunk_size(2)),
        )
        .unwrap()
        .run_to_end()
        .unwrap();

    let shapes: Vec<Vec<Record>> = outcome.chunks.into_iter().map(Chunk::into_records).collect();
    assert_eq!(shapes, vec![data[..2].to_vec(), data[2..].to_vec()]);
    assert_eq!(outcome.summary.state, RunState::Succeeded);
}

#[test]
fn test_interrupted_in_second_chunk_resumes_with_remainder() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let orchestrator = Orchestrator::builder().checkpoints(store.clone()).build();
    let data = users(3);
    let cancel = CancelHandle::new();

    let mut run = orchestrator
        .import(ImportRequest::new("object", data.clone()).with_options(
            ImportOptions::default()
                .chunk_size(2)
                .checkpoint("users")
                .cancel(cancel.clone()),
        ))
        .unwrap();

    let first = run.next().unwrap().unwrap();
    assert_eq!(first.records, data[..2].to_vec());
    cancel.cancel();
    assert!(matches!(run.next(), Some(Err(EtlError::Cancelled { unit: 2 }))));
    assert!(run.next().is_none());
    assert_eq!(store.read("users"), 2);

    let rerun = orchestrator
        .import(
            ImportRequest::new("object", data.clone())
                .with_options(ImportOptions::default().chunk_size(2).checkpoint("users")),
        )
        .unwrap()
        .run_to_end()
        .unwrap();
    let shapes: Vec<Vec<Record>> = rerun.chunks.into_iter().map(Chunk::into_records).collect();
    assert_eq!(shapes, vec![vec![data[2].clone()]]);
    assert_eq!(rerun.summary.skipped, 2);
    assert_eq!(store.read("users"), 3);
}

#[test]
fn test_resume_processes_each_unit_once() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileCheckpointStore::new(dir.path()));
    let orchestrator = Orchestrator::builder().checkpoints(store.clone()).build();
    let data = users(6);

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = delivered.clone();
    orchestrator
        .events()
        .subscribe(EventName::import(Stage::Row), move |event| {
            if let EventPayload::Row { unit, .. } = event.payload {
                sink.lock().unwrap().push(unit);
            }
            Ok(())
        });

    // Stop after the fourth unit has been fully processed.
    let cancel = CancelHandle::new();
    let trigger = cancel.clone();
    orchestrator
        .events()
        .subscribe(EventName::import(Stage::Row), move |event| {
            if let EventPayload::Row { unit: 3, .. } = event.payload {
                trigger.cancel();
            }
            Ok(())
        });

    let options = ImportOptions::default().checkpoint("daily");
    let first: Vec<_> = orchestrator
        .import(ImportRequest::new("object", data.clone()).with_options(options.clone().cancel(cancel)))
        .unwrap()
        .collect();
    assert_eq!(first.iter().filter(|item| item.is_ok()).count(), 4);
    assert!(first.last().unwrap().is_err());
    assert_eq!(store.read("daily"), 4);

    let second = orchestrator
        .import(ImportRequest::new("object", data.clone()).with_options(options))
        .unwrap()
        .run_to_end()
        .unwrap();
    assert_eq!(second.records(), data[4..].to_vec());
    assert_eq!(*delivered.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn test_cancel_inside_partial_chunk_keeps_buffered_units_for_resume() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let orchestrator = Orchestrator::builder().checkpoints(store.clone()).build();
    let data = users(5);

    let cancel = CancelHandle::new();
    let trigger = cancel.clone();
    orchestrator
        .events()
        .subscribe(EventName::import(Stage::Row), move |event| {
            if let EventPayload::Row { unit: 3, .. } = event.payload {
                trigger.cancel();
            }
            Ok(())
        });

    let options = ImportOptions::default().chunk_size(3).checkpoint("batch");
    let mut run = orchestrator
        .import(ImportRequest::new("object", data.clone()).with_options(options.clone().cancel(cancel)))
        .unwrap();
    assert_eq!(run.next().unwrap().unwrap().records, data[..3].to_vec());
    assert!(matches!(run.next(), Some(Err(EtlError::Cancelled { .. }))));
    assert_eq!(run.state(), RunState::Failed);
    assert_eq!(store.read("batch"), 3);

    let rerun = orchestrator
        .import(ImportRequest::new("object", data.clone()).with_options(options))
        .unwrap()
        .run_to_end()
        .unwrap();
    assert_eq!(rerun.records(), data[3..].to_vec());
    assert_eq!(store.read("batch"), 5);
}

#[test]
fn test_validation_failures_are_collected_in_original_form() {
    let orchestrator = Orchestrator::new();
    let mut data = users(4);
    data[2].insert("email", "");

    let upper = TransformSpec::func(|mut record: Record| {
        if let Some(name) = record.get_str("name").map(str::to_uppercase) {
            record.insert("name", name);
        }
        record
    });
    let has_email = ValidateSpec::func(|record: &Record| {
        record.get_str("email").is_some_and(|email| !email.is_empty())
    });

    let errors_seen = Arc::new(Mutex::new(Vec::new()));
    let sink = errors_seen.clone();
    orchestrator
        .events()
        .subscribe(EventName::import(Stage::Error), move |event| {
            if let EventPayload::Error { unit, record, error } = event.payload {
                assert!(matches!(error, EtlError::ValidationFailed { .. }));
                sink.lock().unwrap().push((unit, record.cloned()));
            }
            Ok(())
        });

    let outcome = orchestrator
        .import(
            ImportRequest::new("object", data.clone())
                .with_options(ImportOptions::default().transform(upper).validate(has_email)),
        )
        .unwrap()
        .run_to_end()
        .unwrap();

    let names: Vec<&str> = outcome
        .chunks
        .iter()
        .flat_map(|c| c.records.iter())
        .filter_map(|r| r.get_str("name"))
        .collect();
    assert_eq!(names, vec!["USER1", "USER2", "USER4"]);
    assert_eq!(outcome.summary.errors, vec![data[2].clone()]);
    assert_eq!(outcome.summary.processed, 3);
    assert_eq!(
        *errors_seen.lock().unwrap(),
        vec![(Some(2), Some(data[2].clone()))]
    );
}

#[test]
fn test_progress_is_bounded_and_monotonic() {
    let orchestrator = Orchestrator::new();
    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = progress.clone();
    orchestrator
        .events()
        .subscribe(EventName::import(Stage::Progress), move |event| {
            if let EventPayload::Progress { count, total, percent } = event.payload {
                sink.lock().unwrap().push((count, total, percent));
            }
            Ok(())
        });

    let mut data = users(5);
    data[1] = Record::new();
    orchestrator
        .import(
            ImportRequest::new("object", data).with_options(
                ImportOptions::default()
                    .validate(ValidateSpec::func(|r: &Record| !r.is_empty()))
                    .chunk_size(2),
            ),
        )
        .unwrap()
        .run_to_end()
        .unwrap();

    let progress = progress.lock().unwrap();
    assert_eq!(progress.len(), 4);
    assert!(progress.windows(2).all(|w| w[0].0 <= w[1].0));
    assert!(progress.iter().all(|(_, total, p)| *total == 5 && (0.0..=100.0).contains(p)));
    assert_eq!(progress[0].2, 20.0);
}

#[test]
fn test_event_order() {
    let orchestrator = Orchestrator::new();
    let seen = trace_events(&orchestrator);

    let mut data = users(2);
    data[0] = Record::new();
    orchestrator
        .import(
            ImportRequest::new("object", data)
                .with_options(ImportOptions::default().validate(ValidateSpec::func(|r: &Record| !r.is_empty()))),
        )
        .unwrap()
        .run_to_end()
        .unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            "import.before",
            "import.error",
            "import.row",
            "import.progress",
            "import.after"
        ]
    );
}

#[test]
fn test_unknown_type_fails_before_any_event() {
    let audit = Arc::new(MemoryAuditLog::new());
    let orchestrator = Orchestrator::builder().audit(audit.clone()).build();
    let seen = trace_events(&orchestrator);

    let export = orchestrator.export(ExportRequest::new("unknown", users(1), "mem://x"));
    assert!(matches!(export, Err(EtlError::UnsupportedType { tag }) if tag == "unknown"));

    let import = orchestrator.import(ImportRequest::new("unknown", "data.bin"));
    assert!(matches!(import, Err(EtlError::UnsupportedType { .. })));

    assert!(seen.lock().unwrap().is_empty());
    let entries = audit.entries();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.metadata.status == RunStatus::Error));
}

#[test]
fn test_auto_detection() {
    let orchestrator = Orchestrator::new();
    let summary = orchestrator
        .export(ExportRequest::new("auto", users(2), "mem://feed.XML"))
        .unwrap();
    assert_eq!(summary.type_tag, "xml");

    let outcome = orchestrator
        .import(ImportRequest::new("AUTO", "mem://feed.XML"))
        .unwrap()
        .run_to_end()
        .unwrap();
    assert_eq!(outcome.summary.type_tag, "xml");
    assert_eq!(outcome.records(), users(2));

    assert!(matches!(
        orchestrator.import(ImportRequest::new("auto", "notes.txt")),
        Err(EtlError::AutoDetectFailed { .. })
    ));
    assert!(matches!(
        orchestrator.import(ImportRequest::new("auto", users(1))),
        Err(EtlError::AutoDetectFailed { .. })
    ));
}

#[test]
fn test_csv_roundtrip_through_files() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out/users.csv");
    let location = path.to_str().unwrap();
    let orchestrator = Orchestrator::new();

    let summary = orchestrator
        .export(
            ExportRequest::new("csv", users(5), location)
                .with_options(ExportOptions::default().chunk_size(2)),
        )
        .unwrap();
    assert_eq!(summary.chunks, 3);
    assert_eq!(summary.exported, 5);

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().next(), Some("id,name,email"));
    assert_eq!(content.lines().count(), 6);

    let back = orchestrator
        .import(ImportRequest::new("csv", location))
        .unwrap()
        .run_to_end()
        .unwrap();
    assert_eq!(back.records(), users(5));
}

#[test]
fn test_excel_and_sql_roundtrip() {
    let orchestrator = Orchestrator::new();
    let rows = vec![
        Record::from_pairs([("sku", json!("A-1")), ("qty", json!(3)), ("active", json!(true))]),
        Record::from_pairs([("sku", json!("B-2")), ("qty", json!(1.5)), ("active", json!(false))]),
    ];
    orchestrator
        .export(ExportRequest::new("spreadsheet", rows.clone(), "mem://stock.xlsx"))
        .unwrap();
    let back = orchestrator
        .import(ImportRequest::new("excel", "mem://stock.xlsx"))
        .unwrap()
        .run_to_end()
        .unwrap();
    assert_eq!(back.records(), rows);

    orchestrator
        .export(ExportRequest::new("sql", rows, "mem://stock.sql"))
        .unwrap();
    let statements = orchestrator
        .import(ImportRequest::new("sql", "mem://stock.sql"))
        .unwrap()
        .run_to_end()
        .unwrap();
    assert_eq!(
        statements.records()[0].get_str("statement"),
        Some("INSERT INTO stock (sku, qty, active) VALUES ('A-1', 3, TRUE);")
    );
}

#[test]
fn test_export_writer_fault_keeps_earlier_chunks() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("blocked");
    std::fs::write(&blocker, "not a directory").unwrap();
    let target = blocker.join("out.csv");

    let orchestrator = Orchestrator::new();
    let seen = trace_events(&orchestrator);
    let result = orchestrator.export(ExportRequest::new("csv", users(2), target.to_str().unwrap()));

    assert!(matches!(result, Err(EtlError::DestinationUnwritable { .. })));
    let seen = seen.lock().unwrap();
    assert_eq!(seen.first().map(String::as_str), Some("export.before"));
    assert_eq!(seen.last().map(String::as_str), Some("export.error"));
    assert!(!seen.iter().any(|name| name == "export.after"));
}

#[test]
fn test_export_transform_and_model_store() {
    let orchestrator = Orchestrator::new();
    orchestrator.set_transformer(Some(TransformSpec::func(|mut r: Record| {
        r.insert("exported", true);
        r
    })));

    orchestrator
        .export(
            ExportRequest::new("relational-model", users(3), "accounts")
                .with_options(ExportOptions::default().chunk_size(2)),
        )
        .unwrap();

    orchestrator.set_transformer(None);
    let stored = orchestrator
        .import(ImportRequest::new("model", "accounts"))
        .unwrap()
        .run_to_end()
        .unwrap();
    assert_eq!(stored.summary.processed, 3);
    assert!(stored.records().iter().all(|r| r.get("exported") == Some(&json!(true))));
}

#[test]
fn test_templates_fill_missing_options() {
    let orchestrator = Orchestrator::new();
    orchestrator.catalog().register_validator(
        "has_email",
        ValidateSpec::func(|r: &Record| r.get_str("email").is_some_and(|e| !e.is_empty())),
    );
    orchestrator.templates().register(
        "people",
        Template::new("object")
            .validate(ValidateSpec::named("has_email"))
            .chunk_size(2),
    );

    let mut data = users(3);
    data[0].insert("email", "");

    let outcome = orchestrator
        .import_template("people", data.clone(), ImportOptions::default())
        .unwrap()
        .run_to_end()
        .unwrap();
    assert_eq!(outcome.chunks.len(), 1);
    assert_eq!(outcome.summary.errors.len(), 1);

    let outcome = orchestrator
        .import_template("people", data, ImportOptions::default().chunk_size(0))
        .unwrap()
        .run_to_end()
        .unwrap();
    assert_eq!(outcome.chunks.len(), 2);

    assert!(matches!(
        orchestrator.import_template("ghost", users(1), ImportOptions::default()),
        Err(EtlError::TemplateNotFound { .. })
    ));
    assert!(matches!(
        orchestrator.export_template("ghost", users(1), "mem://g.json", ExportOptions::default()),
        Err(EtlError::TemplateNotFound { .. })
    ));
}

#[test]
fn test_unknown_named_spec_fails_before_streaming() {
    let orchestrator = Orchestrator::new();
    let seen = trace_events(&orchestrator);
    let result = orchestrator.import(
        ImportRequest::new("object", users(1))
            .with_options(ImportOptions::default().validate(ValidateSpec::named("nope"))),
    );
    assert!(matches!(result, Err(EtlError::InvalidSpec { .. })));
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn test_access_gate() {
    let gate = StaticAccessGate::new().allow(Action::Import, "object");
    let orchestrator = Orchestrator::builder().access(Arc::new(gate)).build();

    assert!(orchestrator.import(ImportRequest::new("object", users(1))).is_ok());
    assert!(matches!(
        orchestrator.export(ExportRequest::new("json", users(1), "mem://a.json")),
        Err(EtlError::AccessDenied { .. })
    ));
}

#[test]
fn test_failing_observer_stops_run() {
    let orchestrator = Orchestrator::new();
    orchestrator
        .events()
        .subscribe(EventName::import(Stage::Row), |event| match event.payload {
            EventPayload::Row { unit: 1, .. } => Err(EtlError::observer("sink full")),
            _ => Ok(()),
        });

    let items: Vec<_> = orchestrator
        .import(ImportRequest::new("object", users(3)))
        .unwrap()
        .collect();
    assert_eq!(items.len(), 2);
    assert!(items[0].is_ok());
    assert!(matches!(items[1], Err(EtlError::Observer { .. })));
}

#[test]
fn test_missing_source_is_unreadable_after_before() {
    let orchestrator = Orchestrator::new();
    let seen = trace_events(&orchestrator);
    let mut run = orchestrator
        .import(ImportRequest::new("csv", "mem://absent.csv"))
        .unwrap();

    assert!(matches!(run.next(), Some(Err(EtlError::SourceUnreadable { .. }))));
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["import.before", "import.error"]
    );
}

#[test]
fn test_audit_log_records_runs() {
    let dir = TempDir::new().unwrap();
    let log = Arc::new(JsonLinesAuditLog::new(dir.path().join("audit.jsonl")).unwrap());
    let orchestrator = Orchestrator::builder().audit(log.clone()).build();

    orchestrator
        .export(
            ExportRequest::new("json", users(2), "mem://a.json")
                .with_options(ExportOptions::default().actor("ops").chunk_size(10)),
        )
        .unwrap();
    orchestrator
        .import(ImportRequest::new("json", "mem://a.json").with_options(ImportOptions::default().actor("ops")))
        .unwrap()
        .run_to_end()
        .unwrap();

    let entries = log.read_entries().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].action, Action::Export);
    assert_eq!(entries[0].metadata.target.as_deref(), Some("mem://a.json"));
    assert_eq!(entries[0].metadata.chunk_size, 10);
    assert_eq!(entries[1].action, Action::Import);
    assert_eq!(entries[1].actor.as_deref(), Some("ops"));
    assert_eq!(entries[1].metadata.error_count, Some(0));
    assert!(entries.iter().all(|e| e.metadata.status == RunStatus::Success));
}
