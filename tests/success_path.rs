use flowforge::trace_filter::FAILURE_KEYWORDS;
use flowforge::{ExecutionRecord, TraceEntry, TraceFilter};

fn entry(description: &str, signatures: &[&str]) -> TraceEntry {
    TraceEntry::new(description, signatures.iter().copied())
}

fn signatures(path: &[TraceEntry]) -> Vec<String> {
    path.iter().map(|e| e.action_signatures.join("|")).collect()
}

#[test]
fn retried_click_collapses_to_its_last_attempt() {
    let raw = vec![
        entry("Open the app", &["navigate:https://app.test"]),
        entry("Wait for the dashboard", &["wait"]),
        entry("Click New", &["click:btn:new"]),
        entry("Click New again", &["click:btn:new"]),
        entry("Type the name", &["input:field:name"]),
    ];

    let path = TraceFilter::default().extract_success_path(&raw);

    assert_eq!(
        signatures(&path),
        vec![
            "navigate:https://app.test",
            "wait",
            "click:btn:new",
            "input:field:name",
        ]
    );
    assert_eq!(path[2].description, "Click New again");
}

#[test]
fn filtering_is_idempotent() {
    let raw = vec![
        entry("Open the app", &["navigate:https://app.test"]),
        entry("Open it again", &["navigate:https://app.test/home"]),
        entry("Capture", &["screenshot"]),
        entry("Wait", &["wait"]),
        entry("Click Save failed: not found", &["click:#save"]),
        entry("Click Save", &["click:#save"]),
        entry("Wait more", &["wait"]),
        entry("Done", &["done"]),
        entry("Type title", &["input:#title"]),
        entry("Type title cleanly", &["input:#title"]),
    ];
    let filter = TraceFilter::default();

    let once = filter.extract_success_path(&raw);
    let twice = filter.extract_success_path(&once);

    assert_eq!(once, twice);
    assert_eq!(
        signatures(&once),
        vec!["navigate:https://app.test", "wait", "click:#save", "input:#title"]
    );
}

#[test]
fn success_path_never_contains_failure_language() {
    let descriptions = [
        "Click Submit",
        "Could not find the menu",
        "Unable to scroll",
        "Invalid email, RE-INPUT it",
        "Try again with the sidebar",
        "Fill the title",
        "An ERROR banner appeared",
    ];
    let raw: Vec<TraceEntry> = descriptions
        .iter()
        .enumerate()
        .map(|(i, d)| entry(d, &[format!("click:#el{i}").as_str()]))
        .collect();

    let path = TraceFilter::default().extract_success_path(&raw);

    assert_eq!(path.len(), 2);
    for e in &path {
        let lower = e.description.to_lowercase();
        assert!(FAILURE_KEYWORDS.iter().all(|k| !lower.contains(k)), "{}", e.description);
    }
}

#[test]
fn filter_never_reorders() {
    let raw = vec![
        entry("A", &["click:#a"]),
        entry("B", &["click:#b"]),
        entry("C", &["click:#c"]),
        entry("A again", &["click:#a"]),
        entry("D", &["click:#d"]),
    ];

    let path = TraceFilter::default().extract_success_path(&raw);

    let order: Vec<_> = path.iter().map(|e| e.description.as_str()).collect();
    assert_eq!(order, vec!["A again", "B", "C", "D"]);
}

#[test]
fn records_reduce_through_trace_entries() {
    let records = vec![
        ExecutionRecord::new(1, "Open the app", "navigate:https://app.test".into()),
        ExecutionRecord::new(2, "Click New", "click:#new".into()).failed("target not found: #new"),
        ExecutionRecord::new(2, "Click New in the menu", "click:#menu-new".into()).recovered(),
        ExecutionRecord::new(2, "Click New (confirmed by vision)", "done".into()).recovered(),
    ];
    let raw: Vec<TraceEntry> = records.iter().map(TraceEntry::from_record).collect();

    let path = TraceFilter::default().extract_success_path(&raw);

    assert_eq!(
        signatures(&path),
        vec!["navigate:https://app.test", "click:#menu-new"]
    );
}
