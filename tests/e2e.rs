//! End-to-end integration tests for payslip-dispatch.
//!
//! Each test builds a real multi-page batch in memory with lopdf, runs it
//! through split → reconcile → deliver via the public [`Dispatcher`] API, and
//! observes the outcome on disk and in the delivery tracker. Mail goes to an
//! in-process transport, so nothing leaves the machine.
//!
//! Run with:
//!   cargo test --test e2e -- --nocapture

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use payslip_dispatch::{
    DispatchConfig, Dispatcher, MailTransport, MemoryRegistry, OutgoingMail, RegistryUser,
    SplitProgress, TransportError,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing_subscriber::EnvFilter;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Write a batch with one page per entry, one text object per line.
fn write_batch(path: &Path, pages: &[Vec<&str>]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids: Vec<Object> = Vec::new();
    for lines in pages {
        let mut operations = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), 11.into()]));
            operations.push(Operation::new(
                "Td",
                vec![60.into(), (780 - 16 * i as i64).into()],
            ));
            operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

fn payslip<'a>(name: &'a str, id_line: &'a str) -> Vec<&'a str> {
    vec![
        "FEDERAL GOVERNMENT OF NIGERIA",
        "IPPIS PAYSLIP",
        "FEDERAL MINISTRY OF HEALTH",
        "MAR-2023",
        name,
        id_line,
        "Gross Pay: 245,000.00",
    ]
}

/// In-process transport. Fails while `failing` is set; runs `hook` after
/// every accepted or rejected message with the number of messages seen.
#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<OutgoingMail>>,
    failing: AtomicBool,
    hook: Mutex<Option<Box<dyn Fn(usize) + Send + Sync>>>,
}

impl Outbox {
    fn recipients(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|m| m.to.clone()).collect()
    }
}

#[async_trait]
impl MailTransport for Outbox {
    fn name(&self) -> &str {
        "outbox"
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError> {
        let seen = {
            let mut sent = self.sent.lock().unwrap();
            sent.push(mail.clone());
            sent.len()
        };
        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(seen);
        }
        if self.failing.load(Ordering::SeqCst) {
            Err(TransportError::Transient("421 service not available".into()))
        } else {
            Ok(())
        }
    }
}

struct Harness {
    dir: tempfile::TempDir,
    outbox: Arc<Outbox>,
    dispatcher: Arc<Dispatcher>,
}

/// Route library logs through the test writer; `RUST_LOG=debug` shows them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl Harness {
    fn new(users: Vec<RegistryUser>) -> Self {
        init_tracing();
        let outbox = Arc::new(Outbox::default());
        let config = DispatchConfig::builder()
            .page_delay_ms(0)
            .retry_interval_ms(1)
            .build()
            .unwrap();
        let dispatcher = Arc::new(Dispatcher::new(
            config,
            Arc::new(MemoryRegistry::with_users(users)),
            outbox.clone(),
        ));
        Self {
            dir: tempfile::tempdir().unwrap(),
            outbox,
            dispatcher,
        }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn pdfs_in(&self, rel: &str) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.path(rel))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|n| n.ends_with(".pdf"))
            .collect();
        names.sort();
        names
    }

    async fn split(&self, pages: &[Vec<&str>]) -> bool {
        let source = self.path("batch.pdf");
        write_batch(&source, pages);
        self.dispatcher
            .start_split(source, self.path("split"))
            .wait()
            .await
            .unwrap()
    }
}

fn set(ids: &[&str]) -> std::collections::BTreeSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_split_reconcile_deliver() {
    let h = Harness::new(vec![
        RegistryUser::new("1001", "a@x.com"),
        RegistryUser::new("1003", "c@x.com"),
    ]);

    let ok = h
        .split(&[
            payslip("Name: ARAF, MUSA", "IPPIS Number: 1001"),
            payslip("Name: OKAFOR, ADA", "IPPIS Number: 1002"),
            vec!["SUMMARY", "totals only"],
        ])
        .await;
    assert!(ok);
    assert_eq!(
        h.pdfs_in("split"),
        vec!["1001_ARAF_MAR-2023.pdf", "1002_OKAFOR_MAR-2023.pdf"]
    );

    let bytes = std::fs::read(h.path("split/1001_ARAF_MAR-2023.pdf")).unwrap();
    assert!(bytes.windows(8).any(|w| w == b"/Encrypt"));

    let sets = h.dispatcher.reconcile(&h.path("split")).unwrap();
    assert_eq!(sets.active, set(&["1001"]));
    assert_eq!(sets.inactive, set(&["1002"]));
    assert_eq!(sets.unknown, set(&["1003"]));

    let state = h
        .dispatcher
        .start_delivery(h.path("split"))
        .wait()
        .await
        .unwrap();
    assert_eq!((state.total, state.sent, state.failed), (1, 1, 0));
    assert!(state.completed);
    assert_eq!(h.outbox.recipients(), vec!["a@x.com"]);

    let mail = h.outbox.sent.lock().unwrap()[0].clone();
    assert_eq!(mail.subject, "User ID: 1001 in File: 1001_ARAF_MAR-2023.pdf");
    let attachment = mail.attachment.unwrap();
    assert_eq!(attachment.filename, "1001_ARAF_MAR-2023.pdf");

    // Recipient opens the attachment with surname prefix + id suffix.
    let mut doc = Document::load_mem(&attachment.content).unwrap();
    assert!(doc.is_encrypted());
    assert!(doc.authenticate_password("OK02").is_err());
    assert!(doc.authenticate_password("AR01").is_ok());
    doc.decrypt("AR01").unwrap();
    let text = doc.extract_text(&[1]).unwrap();
    assert!(text.contains("1001"), "got: {text:?}");

    assert_eq!(h.pdfs_in("split/success_mail"), vec!["1001_ARAF_MAR-2023.pdf"]);
    assert_eq!(h.pdfs_in("split"), vec!["1002_OKAFOR_MAR-2023.pdf"]);
}

#[tokio::test]
async fn test_exhausted_attempts_then_retry_from_failed() {
    let h = Harness::new(vec![RegistryUser::new("1001", "a@x.com")]);
    assert!(h.split(&[payslip("Name: ARAF, MUSA", "IPPIS Number: 1001")]).await);

    h.outbox.failing.store(true, Ordering::SeqCst);
    let first = h
        .dispatcher
        .start_delivery(h.path("split"))
        .wait()
        .await
        .unwrap();
    assert_eq!((first.total, first.sent, first.failed), (1, 0, 1));
    assert_eq!(h.outbox.recipients().len(), 3);
    assert_eq!(first.logs[0].message, "Email notification failed to a@x.com.");
    assert!(first.errors[0].error.contains("421"));
    assert_eq!(h.pdfs_in("split/failed_mail"), vec!["1001_ARAF_MAR-2023.pdf"]);

    h.outbox.failing.store(false, Ordering::SeqCst);
    let retry = h
        .dispatcher
        .start_retry(h.path("split"))
        .wait()
        .await
        .unwrap();
    assert_eq!((retry.total, retry.sent, retry.failed), (1, 1, 0));
    assert!(h.pdfs_in("split/failed_mail").is_empty());
    assert_eq!(h.pdfs_in("split/success_mail"), vec!["1001_ARAF_MAR-2023.pdf"]);
}

#[tokio::test]
async fn test_cancel_after_some_files() {
    let users = vec![
        RegistryUser::new("1001", "a@x.com"),
        RegistryUser::new("1002", "b@x.com"),
        RegistryUser::new("1003", "c@x.com"),
        RegistryUser::new("1004", "d@x.com"),
    ];
    let h = Harness::new(users);
    assert!(
        h.split(&[
            payslip("Name: ARAF, MUSA", "IPPIS Number: 1001"),
            payslip("Name: OKAFOR, ADA", "IPPIS Number: 1002"),
            payslip("Name: BELLO, SANI", "IPPIS Number: 1003"),
            payslip("Name: EZE, CHIDI", "IPPIS Number: 1004"),
        ])
        .await
    );

    let handle = h.dispatcher.start_delivery(h.path("split"));
    let task_id = handle.task_id().to_string();

    // Cancel while the second message is in flight; it still completes.
    let dispatcher: Weak<Dispatcher> = Arc::downgrade(&h.dispatcher);
    let id = task_id.clone();
    *h.outbox.hook.lock().unwrap() = Some(Box::new(move |seen| {
        if seen == 2 {
            if let Some(d) = dispatcher.upgrade() {
                assert!(d.cancel(&id));
            }
        }
    }));

    let state = handle.wait().await.unwrap();
    assert_eq!(state.total, 4);
    assert_eq!(state.processed(), 2);
    assert!(state.completed);
    assert!(state.is_canceled());
    assert_eq!(h.pdfs_in("split/success_mail").len(), 2);
    assert_eq!(h.pdfs_in("split").len(), 2);
    assert_eq!(h.dispatcher.get_delivery_state(&task_id).unwrap(), state);
}

#[tokio::test]
async fn test_split_failure_reports_failed_at_full_percent() {
    let h = Harness::new(vec![]);
    let source = h.path("not-a-pdf.pdf");
    std::fs::write(&source, b"plain text, no header").unwrap();

    let handle = h.dispatcher.start_split(source, h.path("split"));
    let task_id = handle.task_id().to_string();
    assert!(!handle.wait().await.unwrap());

    assert_eq!(h.dispatcher.get_progress(&task_id), 100);
    match h.dispatcher.split_progress(&task_id) {
        Some(SplitProgress::Failed { reason }) => assert!(!reason.is_empty()),
        other => panic!("expected a failed split, got {other:?}"),
    }
    assert!(!h.path("split").exists());
}

#[tokio::test]
async fn test_export_archive_after_delivery() {
    let h = Harness::new(vec![RegistryUser::new("1001", "a@x.com")]);
    assert!(h.split(&[payslip("Name: ARAF, MUSA", "IPPIS Number: 1001")]).await);

    let handle = h.dispatcher.start_delivery(h.path("split"));
    let task_id = handle.task_id().to_string();
    handle.wait().await.unwrap();

    let bytes = h.dispatcher.export_logs(&task_id).unwrap();
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    let mut names: Vec<String> = archive.file_names().map(String::from).collect();
    names.sort();
    assert_eq!(names, vec!["errors.csv", "logs.csv"]);

    let mut logs = String::new();
    std::io::Read::read_to_string(&mut archive.by_name("logs.csv").unwrap(), &mut logs).unwrap();
    assert!(logs.contains("1001_ARAF_MAR-2023.pdf,a@x.com"));
}

#[test]
fn test_dispatcher_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Dispatcher>();
}
