use assert_cmd::Command;
use predicates::prelude::*;

fn generate_embeddings(dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("generate_embeddings").unwrap();
    // Keep logs and the model cache inside the scratch dir.
    cmd.current_dir(dir).env("HOME", dir).env_remove("USERPROFILE");
    cmd
}

#[test]
fn missing_input_file_fails_in_loading_stage() {
    let dir = tempfile::tempdir().unwrap();

    generate_embeddings(dir.path())
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("loading stage failed"))
        .stderr(predicate::str::contains("tripadvisor_hotel_reviews.csv"));

    assert!(!dir.path().join("embeddings.npy").exists());
    assert!(!dir.path().join("reviews_clean.csv").exists());
}

#[test]
fn input_without_description_column_fails_before_model_fetch() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("tripadvisor_hotel_reviews.csv"), "hotel,review\nA,nice\n").unwrap();

    generate_embeddings(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("no `description` column"));

    assert!(!dir.path().join(".review_embed/models").exists());
}

#[test]
fn run_writes_a_log_file() {
    let dir = tempfile::tempdir().unwrap();

    generate_embeddings(dir.path()).assert().failure();

    let logs = dir.path().join(".review_embed/logs");
    let has_log = std::fs::read_dir(&logs)
        .unwrap()
        .filter_map(Result::ok)
        .any(|e| e.file_name().to_string_lossy().starts_with("generate_embeddings"));
    assert!(has_log);
}
