use std::fs;
use std::path::Path;

use capsule_core::types::{Classification, Decision};
use capsule_redact::RedactionPolicy;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn workspace() -> tempfile::TempDir {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "MEMORY.md", "# Memory\nThe user prefers short answers.\n");
    write(tmp.path(), "SOUL.md", "# Soul\nCurious and careful.\n");
    write(tmp.path(), ".env", "API_KEY=sk-test123456789012345\n");
    write(tmp.path(), "memory/2024-05-01.md", "met with the team\n");
    write(
        tmp.path(),
        "memory/leak.md",
        "note\nkey: sk-abcdefghijklmnopqrstu\n",
    );
    write(tmp.path(), "memory/session.json", "{\n  \"session\": \"abc\"\n}\n");
    write(tmp.path(), "scratch/todo.txt", "later\n");
    tmp
}

#[test]
fn classifies_every_file_in_order() {
    let ws = workspace();
    let report = RedactionPolicy::workspace_default()
        .unwrap()
        .scan_workspace(ws.path(), "cap-1")
        .unwrap();

    let paths: Vec<_> = report.decisions.iter().map(|d| d.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            ".env",
            "MEMORY.md",
            "SOUL.md",
            "memory/2024-05-01.md",
            "memory/leak.md",
            "memory/session.json",
            "scratch/todo.txt",
        ]
    );

    let by_path = |p: &str| report.decisions.iter().find(|d| d.path == p).unwrap();

    let env = by_path(".env");
    assert_eq!(env.classification, Classification::Forbidden);
    assert_eq!(env.decision, Decision::Exclude);
    assert_eq!(env.reasons, vec!["denylist:.env"]);

    let memory = by_path("MEMORY.md");
    assert_eq!(memory.classification, Classification::Public);
    assert_eq!(memory.decision, Decision::IncludeEncrypted);
    assert_eq!(memory.reasons, vec!["allowlist"]);

    let leak = by_path("memory/leak.md");
    assert_eq!(leak.classification, Classification::Forbidden);
    assert_eq!(leak.decision, Decision::Exclude);
    assert_eq!(leak.reasons, vec!["allowlist", "forbidden:api-key"]);

    let session = by_path("memory/session.json");
    assert_eq!(session.classification, Classification::Sensitive);
    assert_eq!(session.decision, Decision::Exclude);

    let scratch = by_path("scratch/todo.txt");
    assert_eq!(scratch.classification, Classification::Private);
    assert_eq!(scratch.reasons, vec!["not_allowlisted"]);

    assert_eq!(report.findings.len(), 2);
    assert_eq!(report.findings[0].path, "memory/leak.md");
    assert_eq!(report.findings[0].locations[0].line, 2);
    assert_eq!(report.findings_summary.total, 2);
    assert_eq!(report.findings_summary.by_class["forbidden"], 2);
    assert_eq!(report.findings_summary.by_class["sensitive"], 1);
    assert_eq!(report.findings_summary.by_decision["include_redacted"], 0);
    assert!(report.has_forbidden());
    assert_eq!(report.capsule_id, "cap-1");
}

#[test]
fn report_never_contains_secrets() {
    let ws = workspace();
    let report = RedactionPolicy::workspace_default()
        .unwrap()
        .scan_workspace(ws.path(), "cap-1")
        .unwrap();
    let json = String::from_utf8(capsule_core::document_bytes(&report).unwrap()).unwrap();
    assert!(!json.contains("sk-test123456789012345"));
    assert!(!json.contains("sk-abcdefghijklmnopqrstu"));
}

#[test]
fn rescans_are_identical() {
    let ws = workspace();
    let policy = RedactionPolicy::workspace_default().unwrap();
    let a = policy.scan_workspace(ws.path(), "same").unwrap();
    let b = policy.scan_workspace(ws.path(), "same").unwrap();
    assert_eq!(a.decisions, b.decisions);
    assert_eq!(a.findings, b.findings);
    assert_eq!(a.detectors, b.detectors);
}

#[test]
fn flags_change_decisions_but_not_classes() {
    let ws = workspace();
    let mut policy = RedactionPolicy::workspace_default().unwrap();
    policy.allow_forbidden = true;
    policy.include_sensitive = true;
    let report = policy.scan_workspace(ws.path(), "c").unwrap();
    let env = report.decisions.iter().find(|d| d.path == ".env").unwrap();
    assert_eq!(env.classification, Classification::Forbidden);
    assert_eq!(env.decision, Decision::IncludeEncrypted);
    assert_eq!(report.findings.len(), 2);
}

#[test]
fn size_limit_marks_file_forbidden() {
    let ws = workspace();
    let mut policy = RedactionPolicy::workspace_default().unwrap();
    policy.size_limit_bytes = 30;
    let report = policy.scan_workspace(ws.path(), "c").unwrap();
    let memory = report.decisions.iter().find(|d| d.path == "MEMORY.md").unwrap();
    assert_eq!(memory.classification, Classification::Forbidden);
    assert_eq!(memory.reasons, vec!["size_limit"]);
}

#[test]
fn decomposed_names_keep_their_on_disk_source() {
    let ws = tempfile::tempdir().unwrap();
    write(ws.path(), "memory/cafe\u{301}.md", "espresso\n");

    let scan = RedactionPolicy::workspace_default()
        .unwrap()
        .scan(ws.path(), "c")
        .unwrap();

    let decision = &scan.report.decisions[0];
    assert_eq!(decision.path, "memory/caf\u{e9}.md");
    assert!(decision.decision.is_included());
    let source = &scan.sources["memory/caf\u{e9}.md"];
    assert_eq!(source, &ws.path().join("memory").join("cafe\u{301}.md"));
    assert_eq!(fs::read_to_string(source).unwrap(), "espresso\n");
}
