use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use docfind::session::protocol::EventRecord;
use docfind::{
    ChunkedTextSource, ExtractionCache, Extractors, FinderConfig, Governor, MatchResult,
    MemoryProbe, Orchestrator, Query, QueryDefaults, QuerySession, SearchContext, SearchEvent,
    SessionState, TextFilter,
};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

const WAIT: Duration = Duration::from_secs(20);

/// Probe reporting a settable memory reading.
struct SettableProbe(AtomicU64);

impl MemoryProbe for SettableProbe {
    fn used_bytes(&self) -> Option<u64> {
        Some(self.0.load(Ordering::SeqCst))
    }
}

fn quiet_config() -> FinderConfig {
    let mut config = FinderConfig::default();
    config.native_filter = false;
    config.memory_ceiling = None;
    config.workers = 2;
    config
}

fn governor(config: &FinderConfig, used: u64) -> Arc<Governor> {
    Arc::new(Governor::with_probe(
        config,
        Arc::new(SettableProbe(AtomicU64::new(used))),
    ))
}

fn context(config: FinderConfig) -> (Arc<SearchContext>, Arc<Governor>) {
    let governor = governor(&config, 0);
    (Arc::new(SearchContext::new(config, governor.clone())), governor)
}

/// Text filter for `.doc` files that never run out of text.
struct EndlessFilter;

struct EndlessSource;

impl ChunkedTextSource for EndlessSource {
    fn next_chunk(&mut self) -> docfind::Result<Option<String>> {
        std::thread::sleep(Duration::from_millis(1));
        Ok(Some("filler ".to_string()))
    }
}

impl TextFilter for EndlessFilter {
    fn name(&self) -> &str {
        "endless"
    }

    fn supports(&self, extension: &str) -> bool {
        extension == ".doc"
    }

    fn open(&self, _path: &Path) -> docfind::Result<Box<dyn ChunkedTextSource>> {
        Ok(Box::new(EndlessSource))
    }
}

fn write_docx(path: &Path, paragraphs: &[&str]) {
    let mut body = String::from("<w:document><w:body>");
    for paragraph in paragraphs {
        body.push_str(&format!("<w:p><w:r><w:t>{paragraph}</w:t></w:r></w:p>"));
    }
    body.push_str("</w:body></w:document>");

    let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
    writer
        .start_file("[Content_Types].xml", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"<Types/>").unwrap();
    writer
        .start_file("word/document.xml", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(body.as_bytes()).unwrap();
    writer.finish().unwrap();
}

fn corpus() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("reports/2024")).unwrap();
    fs::write(root.join("a.txt"), "recent invoice 2024 draft").unwrap();
    fs::write(root.join("b.txt"), "an invoice from last year").unwrap();
    fs::write(root.join("reports/notes.md"), "nothing to see").unwrap();
    write_docx(
        &root.join("reports/2024/summary.docx"),
        &["Annual summary", "The invoice total for 2024 was paid."],
    );
    fs::write(root.join("invoice-2024.png"), "not searched").unwrap();
    dir
}

fn collect_until_done(events: &docfind::SessionEvents) -> Vec<SearchEvent> {
    let mut seen = Vec::new();
    loop {
        let event = events.recv_timeout(WAIT).expect("session produced no Done");
        let done = matches!(event, SearchEvent::Done { .. });
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn result_names(events: &[SearchEvent]) -> Vec<String> {
    let mut names: Vec<String> = events
        .iter()
        .filter_map(|event| match event {
            SearchEvent::Result(result) => Some(
                result
                    .path
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned(),
            ),
            _ => None,
        })
        .collect();
    names.sort();
    names
}

#[test]
fn conjunctive_search_over_text_and_docx() {
    let dir = corpus();
    let (context, governor) = context(quiet_config());
    let (session, events) = QuerySession::new(dir.path(), context, governor);

    session
        .submit(Query::new(["invoice", "2024"], 30, 3, 1).unwrap())
        .unwrap();
    let seen = collect_until_done(&events);

    assert_eq!(result_names(&seen), vec!["a.txt", "summary.docx"]);
    let a = seen
        .iter()
        .find_map(|event| match event {
            SearchEvent::Result(result) if result.path.ends_with("a.txt") => Some(result),
            _ => None,
        })
        .unwrap();
    assert_eq!(a.extension, ".txt");
    assert_eq!(a.size, 25);
    assert_eq!(a.snippets[0].text, "recent 【invoice】 2024 draft");
    assert_eq!(session.state(), SessionState::Completed);
}

/// Path and rendered snippets of every result.
fn summarize(results: &[MatchResult]) -> Vec<(PathBuf, Vec<String>)> {
    results
        .iter()
        .map(|result| {
            let snippets = result.snippets.iter().map(ToString::to_string).collect();
            (result.path.clone(), snippets)
        })
        .collect()
}

#[test]
fn cached_search_matches_uncached_search() {
    let dir = corpus();
    write_docx(&dir.path().join("split.docx"), &["left side", "the invoice"]);
    let mut big = "filler text ".repeat(40);
    big.push_str("needle in the last paragraph");
    write_docx(&dir.path().join("big.docx"), &[&big]);
    let mut huge = "x".repeat(3 << 20);
    huge.push_str(" needle");
    fs::write(dir.path().join("huge.txt"), huge).unwrap();

    let queries: [&[&str]; 4] = [&["invoice", "2024"], &["invoice"], &["side the"], &["needle"]];

    let mut direct = {
        let (context, governor) = context(quiet_config());
        Orchestrator::new(vec![dir.path().to_path_buf()], context, governor).unwrap()
    };
    // A small cache budget so the larger documents do not fit.
    for max_text_bytes in [1 << 20, 256] {
        let cache_dir = tempfile::tempdir().unwrap();
        let mut cached = {
            let config = quiet_config();
            let governor = governor(&config, 0);
            let context = SearchContext::new(config, governor.clone())
                .with_cache(ExtractionCache::new(cache_dir.path(), max_text_bytes));
            Orchestrator::new(vec![dir.path().to_path_buf()], Arc::new(context), governor).unwrap()
        };

        for terms in queries {
            let expected = summarize(&direct.run_to_completion(terms, 30, 3, true).unwrap());
            let first = summarize(&cached.run_to_completion(terms, 30, 3, true).unwrap());
            let second = summarize(&cached.run_to_completion(terms, 30, 3, true).unwrap());
            assert_eq!(first, expected, "{terms:?} budget={max_text_bytes}");
            assert_eq!(second, expected, "{terms:?} budget={max_text_bytes}");
        }

        let entries = walk_files(cache_dir.path());
        assert!(!entries.is_empty());
        assert!(entries.iter().all(|entry| entry.extension().unwrap() == "bin"));
    }

    let needles = summarize(&direct.run_to_completion(["needle"], 30, 3, true).unwrap());
    let names: Vec<_> = needles
        .iter()
        .map(|(path, _)| path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["big.docx", "huge.txt"]);
    let split = summarize(&direct.run_to_completion(["invoice"], 30, 3, true).unwrap());
    let split = split.iter().find(|(path, _)| path.ends_with("split.docx")).unwrap();
    assert_eq!(split.1, vec!["the 【invoice】"]);
}

fn walk_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in fs::read_dir(root).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            files.extend(walk_files(&path));
        } else {
            files.push(path);
        }
    }
    files
}

#[test]
fn superseding_query_hides_older_generation() {
    let dir = corpus();
    for index in 0..100 {
        fs::write(dir.path().join(format!("bulk-{index}.txt")), "invoice ".repeat(50)).unwrap();
    }
    let (context, governor) = context(quiet_config());
    let (session, events) = QuerySession::new(dir.path(), context, governor);

    session.submit(Query::new(["invoice"], 5, 1, 1).unwrap()).unwrap();
    session.submit(Query::new(["Annual"], 5, 1, 2).unwrap()).unwrap();
    let seen = collect_until_done(&events);

    assert!(seen.iter().all(|event| event.generation() == 2));
    assert_eq!(result_names(&seen), vec!["summary.docx"]);
}

#[test]
fn file_names_match_without_content() {
    let dir = corpus();
    let (context, governor) = context(quiet_config());
    let mut orchestrator = Orchestrator::new(vec![dir.path().to_path_buf()], context, governor).unwrap();
    let results = orchestrator.run_to_completion(["NOTES"], 5, 3, true).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].snippets[0].to_string(), "filename: 【notes】.md");
}

#[test]
fn watchdog_cancels_query_over_memory_ceiling() {
    let dir = corpus();
    fs::write(dir.path().join("endless.doc"), "binary").unwrap();
    let mut config = quiet_config();
    config.memory_ceiling = Some(1_000);
    config.watchdog_interval = Duration::from_millis(20);
    let probe = Arc::new(SettableProbe(AtomicU64::new(0)));
    let governor = Arc::new(Governor::with_probe(&config, probe.clone()));
    let extractors = Extractors::new(config, governor.clone()).with_text_filter(Arc::new(EndlessFilter));
    let context = Arc::new(SearchContext {
        extractors: Arc::new(extractors),
        cache: None,
        workers: 2,
    });
    let (session, events) = QuerySession::new(dir.path(), context, governor);

    // Only the endless document is left once the other files are done.
    session.submit(Query::new(["2024"], 5, 1, 1).unwrap()).unwrap();
    let mut seen = Vec::new();
    loop {
        match events.recv_timeout(Duration::from_millis(300)) {
            Ok(event) => seen.push(event),
            Err(RecvTimeoutError::Timeout) => break,
            Err(error) => panic!("{error}"),
        }
    }
    assert!(seen.iter().all(|event| matches!(event, SearchEvent::Result(_))));
    assert_eq!(session.state(), SessionState::Searching);

    probe.0.store(1_000_000, Ordering::SeqCst);
    let tail = collect_until_done(&events);
    assert_eq!(
        tail,
        vec![
            SearchEvent::Status {
                generation: 1,
                message: "cancelled".into()
            },
            SearchEvent::Done { generation: 1 },
        ]
    );
    assert_eq!(session.state(), SessionState::Cancelled);
    session.wait();
    assert_eq!(
        events.recv_timeout(Duration::from_millis(50)),
        Err(RecvTimeoutError::Timeout)
    );
}

/// Writer shared between the protocol thread and the test.
#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn line_protocol_round_trip() {
    let dir = corpus();
    let (context, governor) = context(quiet_config());
    let (session, events) = QuerySession::new(dir.path(), context, governor);

    let input = concat!(
        "this is not json\n",
        "{\"cmd\":\"setQuery\",\"query\":\"invoice\",\"query2\":\"2024\",\"queryId\":7,\"contextLen\":5}\n",
        "\n",
    );
    let output = SharedBuffer::default();
    docfind::session::serve(
        Cursor::new(input.as_bytes()),
        output.clone(),
        session,
        events,
        QueryDefaults {
            context_len: 30,
            max_snippets: 3,
        },
    )
    .unwrap();

    let text = String::from_utf8(output.0.lock().unwrap().clone()).unwrap();
    let records: Vec<EventRecord> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    let results = records
        .iter()
        .filter(|record| matches!(record, EventRecord::Result { .. }))
        .count();
    assert_eq!(results, 2);
    assert!(matches!(records.last(), Some(EventRecord::Done { generation_id: 7 })));
    assert!(records.iter().any(|record| matches!(
        record,
        EventRecord::Status { generation_id: 7, message } if message.starts_with("completed")
    )));
}
