use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn sel_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("sel");
    path
}

fn write_zip(path: &Path, entries: &[(&str, String)]) {
    let file = fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    for (name, body) in entries {
        zip.start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

/// A one-sheet workbook using inline strings.
fn write_catalogue(path: &Path, rows: &[&[&str]]) {
    let mut sheet = String::from("<worksheet><sheetData>");
    for (r, row) in rows.iter().enumerate() {
        sheet.push_str(&format!("<row r=\"{}\">", r + 1));
        for (c, value) in row.iter().enumerate() {
            let col = (b'A' + c as u8) as char;
            sheet.push_str(&format!(
                "<c r=\"{}{}\" t=\"inlineStr\"><is><t>{}</t></is></c>",
                col,
                r + 1,
                value
            ));
        }
        sheet.push_str("</row>");
    }
    sheet.push_str("</sheetData></worksheet>");
    write_zip(path, &[("xl/worksheets/sheet1.xml", sheet)]);
}

fn write_letter(path: &Path, text: &str) {
    let body = format!(
        "<w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
         <w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
        text
    );
    write_zip(path, &[("word/document.xml", body)]);
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let letters_dir = root.join("letters");
    fs::create_dir_all(letters_dir.join("2024")).unwrap();
    write_letter(
        &letters_dir.join("PIX2B_phase_out.docx"),
        "PIX 2B double busbar switchgear end of commercialization",
    );
    write_letter(
        &letters_dir.join("2024").join("TeSys_D.docx"),
        "TeSys D contactors withdrawal",
    );
    fs::write(letters_dir.join("notes.txt"), "not a letter").unwrap();

    write_catalogue(
        &root.join("IBcatalogue.xlsx"),
        &[
            &["PRODUCT_IDENTIFIER", "RANGE_LABEL", "SUBRANGE_LABEL", "DEVICETYPE_LABEL", "COMMERCIAL_STATUS"],
            &["PIX2B-1250", "PIX", "PIX 2B", "MV Switchgear", "19-end of commercialization"],
            &["PIX-STD-630", "PIX", "PIX Standard", "MV Switchgear", "08-Commercialised"],
            &["LC1D09", "TeSys D", "TeSys D", "Contactor", "08-Commercialised"],
        ],
    );

    let config_content = format!(
        r#"[db]
path = "{root}/data/sel.sqlite"

[llm]
provider = "disabled"

[matching]
candidate_limit = 50

[server]
bind = "127.0.0.1:7341"

[letters]
root = "{root}/letters"
include_globs = ["**/*.pdf", "**/*.docx", "**/*.doc"]
exclude_globs = []
follow_symlinks = false
"#,
        root = root.display()
    );

    let config_path = config_dir.join("sel.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_sel(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = sel_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run sel binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn import_catalogue(config_path: &Path) {
    let workbook = config_path
        .parent()
        .and_then(Path::parent)
        .unwrap()
        .join("IBcatalogue.xlsx");
    let (stdout, stderr, success) =
        run_sel(config_path, &["catalogue", "import", workbook.to_str().unwrap()]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("upserted: 3"), "stdout={}", stdout);
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_sel(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_sel(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_sel(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_catalogue_import_and_stats() {
    let (_tmp, config_path) = setup_test_env();
    run_sel(&config_path, &["init"]);
    import_catalogue(&config_path);

    // Re-importing the same workbook updates in place.
    import_catalogue(&config_path);

    let (stdout, _, success) = run_sel(&config_path, &["catalogue", "stats"]);
    assert!(success);
    assert!(stdout.contains("products: 3"), "stdout={}", stdout);
    assert!(stdout.contains("ranges:   2"), "stdout={}", stdout);
    assert!(stdout.contains("08-Commercialised"));
}

#[test]
fn test_candidates_ranked_without_llm() {
    let (_tmp, config_path) = setup_test_env();
    run_sel(&config_path, &["init"]);
    import_catalogue(&config_path);

    let (stdout, stderr, success) = run_sel(
        &config_path,
        &["candidates", "--range", "PIX", "--subrange", "PIX 2B"],
    );
    assert!(success, "candidates failed: stdout={}, stderr={}", stdout, stderr);
    let first = stdout
        .lines()
        .find(|l| l.starts_with("1. "))
        .expect("no ranked candidates");
    assert!(first.contains("PIX2B-1250"), "stdout={}", stdout);
    assert!(!stdout.contains("LC1D09"));
}

#[test]
fn test_candidates_json_output() {
    let (_tmp, config_path) = setup_test_env();
    run_sel(&config_path, &["init"]);
    import_catalogue(&config_path);

    let (stdout, _, success) = run_sel(
        &config_path,
        &["candidates", "--range", "TeSys D", "--json"],
    );
    assert!(success);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["candidates"][0]["product_identifier"], "LC1D09");
}

#[test]
fn test_candidates_require_a_term() {
    let (_tmp, config_path) = setup_test_env();
    run_sel(&config_path, &["init"]);

    let (_, stderr, success) = run_sel(&config_path, &["candidates", "--product-line", "PSIBS"]);
    assert!(!success);
    assert!(stderr.contains("--range"), "stderr={}", stderr);
}

#[test]
fn test_process_dry_run_lists_letters() {
    let (_tmp, config_path) = setup_test_env();
    run_sel(&config_path, &["init"]);

    let (stdout, stderr, success) =
        run_sel(&config_path, &["process", "--dry-run", "--progress", "off"]);
    assert!(success, "dry-run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("letters found: 2"), "stdout={}", stdout);
    assert!(stdout.contains("PIX2B_phase_out.docx"));
    assert!(stdout.contains("TeSys_D.docx"));
    assert!(!stdout.contains("notes.txt"));

    let (stdout, _, _) = run_sel(&config_path, &["letters", "list"]);
    assert!(stdout.contains("No letters."));
}

#[test]
fn test_process_dry_run_respects_limit() {
    let (_tmp, config_path) = setup_test_env();
    run_sel(&config_path, &["init"]);

    let (stdout, _, success) = run_sel(&config_path, &["process", "--dry-run", "--limit", "1"]);
    assert!(success);
    assert!(stdout.contains("letters found: 1"));
}

#[test]
fn test_process_requires_llm_provider() {
    let (_tmp, config_path) = setup_test_env();
    run_sel(&config_path, &["init"]);

    let (_, stderr, success) = run_sel(&config_path, &["process", "--progress", "off"]);
    assert!(!success);
    assert!(stderr.contains("LLM provider is disabled"), "stderr={}", stderr);
}

#[test]
fn test_invalid_progress_mode_rejected() {
    let (_tmp, config_path) = setup_test_env();
    run_sel(&config_path, &["init"]);

    let (_, stderr, success) = run_sel(&config_path, &["process", "--dry-run", "--progress", "loud"]);
    assert!(!success);
    assert!(stderr.contains("Unknown progress mode"));
}

#[test]
fn test_letters_show_and_delete_unknown() {
    let (_tmp, config_path) = setup_test_env();
    run_sel(&config_path, &["init"]);

    let (_, stderr, success) = run_sel(&config_path, &["letters", "show", "missing-id"]);
    assert!(!success);
    assert!(stderr.contains("letter not found"));

    let (_, _, success) = run_sel(&config_path, &["letters", "delete", "missing-id"]);
    assert!(!success);
}

#[test]
fn test_stats_and_export_on_fresh_database() {
    let (_tmp, config_path) = setup_test_env();
    run_sel(&config_path, &["init"]);
    import_catalogue(&config_path);

    let (stdout, _, success) = run_sel(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Letters:     0"));
    assert!(stdout.contains("Catalogue:   3 products"));

    let (stdout, _, success) = run_sel(&config_path, &["export"]);
    assert!(success);
    let data: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(data["letters"].as_array().unwrap().len(), 0);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_sel(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(!stderr.is_empty());
}
