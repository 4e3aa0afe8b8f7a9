use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use tempfile::TempDir;

use replymatrix::time::parse_datetime;
use replymatrix::{EngineConfig, EngineError, FactBag, LoadError, ReplyEngine, TemplateId};

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
}

fn copy_dir(from: &Path, to: &Path) {
    fs::create_dir_all(to).unwrap();
    for entry in fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&entry.path(), &target);
        } else {
            fs::copy(entry.path(), &target).unwrap();
        }
    }
}

/// Copies the fixtures into a scratch directory the test may edit.
fn workspace() -> (TempDir, ReplyEngine) {
    let tmp = TempDir::new().unwrap();
    copy_dir(&fixtures(), tmp.path());
    let config = EngineConfig::default().with_dirs(tmp.path().join("definitions"), tmp.path().join("templates"));
    let engine = ReplyEngine::from_config(config).unwrap();
    (tmp, engine)
}

fn force_majeure_template(root: &Path) -> PathBuf {
    root.join("templates").join("templates").join("force_majeure.txt")
}

fn facts() -> FactBag {
    FactBag::from_json(
        json!({ "crm": { "first_name": "Lina", "exam_date": "2026-04-14" } }),
        parse_datetime("2026-03-16T09:00:00Z").unwrap(),
    )
}

#[test]
fn reload_picks_up_edited_template() {
    let (tmp, engine) = workspace();
    let before = engine.render(facts(), "FORCE_MAJEURE", &[]).unwrap();
    assert!(before.text.contains("justificatif"));

    fs::write(
        force_majeure_template(tmp.path()),
        "{{> greeting}}\nMerci de joindre un certificat.\n{{> signature}}",
    )
    .unwrap();
    engine.reload().unwrap();

    let after = engine.render(facts(), "FORCE_MAJEURE", &[]).unwrap();
    assert!(after.text.contains("Merci de joindre un certificat."));
    assert_ne!(before.trace.template_digest, after.trace.template_digest);
}

#[test]
fn failed_reload_keeps_serving_previous_snapshot() {
    let (tmp, engine) = workspace();
    let before = engine.render(facts(), "FORCE_MAJEURE", &[]).unwrap();

    fs::write(force_majeure_template(tmp.path()), "{{#if show_force_majeure_section}}jamais fermé").unwrap();
    let err = engine.reload().unwrap_err();
    assert!(matches!(err, EngineError::Load(LoadError::TemplateSyntax(_))), "{err}");

    let after = engine.render(facts(), "FORCE_MAJEURE", &[]).unwrap();
    assert_eq!(before.text, after.text);
    assert_eq!(before.trace.template_digest, after.trace.template_digest);
}

#[test]
fn reload_rejects_matrix_pointing_at_deleted_template() {
    let (tmp, engine) = workspace();
    fs::remove_file(force_majeure_template(tmp.path())).unwrap();

    let err = engine.reload().unwrap_err();
    assert!(matches!(err, EngineError::Load(LoadError::MissingTemplate { .. })), "{err}");

    let snapshot = engine.snapshot().unwrap();
    assert!(snapshot.templates().contains(&TemplateId::new("force_majeure")));
}

#[test]
fn snapshot_held_across_reload_is_unchanged() {
    let (tmp, engine) = workspace();
    let held = engine.snapshot().unwrap();
    let digest = held
        .templates()
        .fingerprint(&TemplateId::new("force_majeure"))
        .unwrap()
        .digest
        .clone();

    fs::write(force_majeure_template(tmp.path()), "{{> greeting}}\nNouveau texte.\n{{> signature}}").unwrap();
    engine.reload().unwrap();

    let held_digest = held.templates().fingerprint(&TemplateId::new("force_majeure")).unwrap().digest;
    assert_eq!(held_digest, digest);
    let fresh = engine.snapshot().unwrap();
    let fresh_digest = fresh.templates().fingerprint(&TemplateId::new("force_majeure")).unwrap().digest;
    assert_ne!(fresh_digest, digest);
}
