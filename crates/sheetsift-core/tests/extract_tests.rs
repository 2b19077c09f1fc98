use sheetsift_core::error::Error;
use sheetsift_core::extract::{self, Checkpoint, ExtractOptions, ExtractStatus};
use std::fs::File;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = File::create(path).unwrap();
    let mut zip = ZipWriter::new(file);
    for (name, content) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(content).unwrap();
    }
    zip.finish().unwrap();
}

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut cursor);
        for (name, content) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(content).unwrap();
        }
        zip.finish().unwrap();
    }
    cursor.into_inner()
}

fn csv_options() -> ExtractOptions {
    ExtractOptions::for_extensions(&["csv".to_string()])
}

#[test]
fn test_extracts_only_matching_documents() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("docs.zip");
    write_zip(
        &archive,
        &[
            ("invoices.csv", b"invoice_number,amount\nINV-1,10\n" as &[u8]),
            ("readme.txt", b"not a document"),
            ("sub/vendors.csv", b"vendor_id,name\nV-1,Acme\n"),
        ],
    );

    let result = extract::extract(&archive, &csv_options(), &Checkpoint::none()).unwrap();
    assert_eq!(result.files_extracted, 2);
    assert_eq!(result.documents_matched, 2);
    assert!(result.warnings.is_empty());
    for doc in &result.documents {
        assert_eq!(doc.status, ExtractStatus::Ok);
        assert!(doc.disk_path.exists());
        assert!(doc.entry_path.ends_with(".csv"));
    }

    let scratch_root = result.scratch.root().to_path_buf();
    extract::cleanup(result.scratch).unwrap();
    assert!(!scratch_root.exists());
}

#[test]
fn test_unopenable_archive_fails() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("broken.zip");
    std::fs::write(&archive, b"this is not a zip file").unwrap();

    let err = extract::extract(&archive, &csv_options(), &Checkpoint::none()).unwrap_err();
    assert!(matches!(err, Error::ArchiveOpen { .. }));
}

#[test]
fn test_nested_archives_recurse_with_prefixed_entry_paths() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("outer.zip");
    let inner = zip_bytes(&[("deep.csv", b"invoice_number\nINV-9\n" as &[u8])]);
    write_zip(
        &archive,
        &[
            ("top.csv", b"invoice_number\nINV-1\n" as &[u8]),
            ("inner.zip", inner.as_slice()),
        ],
    );

    let mut options = csv_options();
    options.recurse = true;
    let result = extract::extract(&archive, &options, &Checkpoint::none()).unwrap();

    assert_eq!(result.documents_matched, 2);
    assert!(result
        .documents
        .iter()
        .any(|d| d.entry_path == "inner.zip!deep.csv"));
}

#[test]
fn test_sibling_nested_archives_extract_to_distinct_paths() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("outer.zip");
    let n1 = zip_bytes(&[("data.csv", b"invoice_number,amount\nINV-1,10\n" as &[u8])]);
    let n2 = zip_bytes(&[("data.csv", b"invoice_number,amount\nINV-2,20\n" as &[u8])]);
    write_zip(
        &archive,
        &[("n1.zip", n1.as_slice()), ("n2.zip", n2.as_slice())],
    );

    let mut options = csv_options();
    options.recurse = true;
    let result = extract::extract(&archive, &options, &Checkpoint::none()).unwrap();

    assert_eq!(result.documents_matched, 2);
    let doc1 = result
        .documents
        .iter()
        .find(|d| d.entry_path == "n1.zip!data.csv")
        .unwrap();
    let doc2 = result
        .documents
        .iter()
        .find(|d| d.entry_path == "n2.zip!data.csv")
        .unwrap();
    assert_ne!(doc1.disk_path, doc2.disk_path);

    // Each document carries its own archive's bytes.
    let content1 = std::fs::read_to_string(&doc1.disk_path).unwrap();
    let content2 = std::fs::read_to_string(&doc2.disk_path).unwrap();
    assert!(content1.contains("INV-1"));
    assert!(content2.contains("INV-2"));
}

#[test]
fn test_entry_progress_callback_reports_every_entry() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("docs.zip");
    write_zip(
        &archive,
        &[
            ("a.csv", b"x\n1\n" as &[u8]),
            ("skip.txt", b"not a document"),
            ("b.csv", b"x\n2\n"),
        ],
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut options = csv_options();
    let sink = Arc::clone(&seen);
    options.entry_progress = Some(Arc::new(move |current, total| {
        sink.lock().unwrap().push((current, total));
    }));

    extract::extract(&archive, &options, &Checkpoint::none()).unwrap();

    // Every entry ticks, matching ones and skipped ones alike.
    assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
}

#[test]
fn test_recursion_depth_cap_warns_instead_of_recursing() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("matryoshka.zip");
    let level2 = zip_bytes(&[("deepest.csv", b"invoice_number\nINV-2\n" as &[u8])]);
    let level1 = zip_bytes(&[
        ("mid.csv", b"invoice_number\nINV-1\n" as &[u8]),
        ("l2.zip", level2.as_slice()),
    ]);
    write_zip(&archive, &[("l1.zip", level1.as_slice())]);

    let mut options = csv_options();
    options.recurse = true;
    options.max_recursion_depth = 1;
    let result = extract::extract(&archive, &options, &Checkpoint::none()).unwrap();

    // mid.csv comes out of level 1; level 2 is skipped with a warning.
    assert_eq!(result.documents_matched, 1);
    assert!(result.documents.iter().any(|d| d.entry_path.ends_with("mid.csv")));
    assert!(result
        .warnings
        .iter()
        .any(|w| w.reason.contains("recursion depth cap")));
}

#[test]
fn test_corrupt_nested_archive_is_a_warning_not_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("mixed.zip");
    write_zip(
        &archive,
        &[
            ("good.csv", b"invoice_number\nINV-1\n" as &[u8]),
            ("bad.zip", b"definitely not a zip"),
        ],
    );

    let mut options = csv_options();
    options.recurse = true;
    let result = extract::extract(&archive, &options, &Checkpoint::none()).unwrap();

    assert_eq!(result.documents_matched, 1);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].entry.contains("bad.zip"));
}

#[test]
fn test_cancellation_between_entries() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("docs.zip");
    write_zip(&archive, &[("a.csv", b"x\n1\n" as &[u8]), ("b.csv", b"x\n2\n")]);

    let cancel = Arc::new(AtomicBool::new(true));
    let checkpoint = Checkpoint::new(Arc::clone(&cancel), None);
    let err = extract::extract(&archive, &csv_options(), &checkpoint).unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    cancel.store(false, Ordering::Relaxed);
    assert!(extract::extract(&archive, &csv_options(), &checkpoint).is_ok());
}

#[test]
fn test_timeout_between_entries() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("docs.zip");
    write_zip(&archive, &[("a.csv", b"x\n1\n" as &[u8])]);

    let checkpoint = Checkpoint::new(
        Arc::new(AtomicBool::new(false)),
        Some(Duration::from_nanos(1)),
    );
    std::thread::sleep(Duration::from_millis(5));
    let err = extract::extract(&archive, &csv_options(), &checkpoint).unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
}

#[test]
fn test_list_entries_reports_names_without_extracting() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("docs.zip");
    write_zip(
        &archive,
        &[("a.csv", b"x\n1\n" as &[u8]), ("notes/readme.txt", b"hi")],
    );

    let (size, names) = extract::list_entries(&archive).unwrap();
    assert!(size > 0);
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"a.csv".to_string()));
}
