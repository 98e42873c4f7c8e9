// tests/storage_boundaries.rs
// Fails if runtime code writes to disk or SQLite outside the persistence modules.
// Inline `#[cfg(test)]` modules are not scanned.

use std::fs;
use std::path::{Path, PathBuf};

fn collect_rs_files(dir: &Path, files: &mut Vec<PathBuf>) {
    if let Ok(entries) = fs::read_dir(dir) {
        for e in entries.flatten() {
            let p = e.path();
            if p.is_dir() {
                collect_rs_files(&p, files);
            } else if p.extension().map(|s| s == "rs").unwrap_or(false) {
                files.push(p);
            }
        }
    }
}

fn normalized(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Source without its trailing test module.
fn runtime_part(content: &str) -> &str {
    match content.find("#[cfg(test)]") {
        Some(idx) => &content[..idx],
        None => content,
    }
}

fn offenders(patterns: &[&str], allowed: &[&str]) -> Vec<(String, String)> {
    let src_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
    let mut files = Vec::new();
    collect_rs_files(&src_dir, &mut files);

    let mut found = Vec::new();
    for file in files {
        let path = normalized(&file);
        if allowed.iter().any(|a| path.ends_with(a)) {
            continue;
        }
        let content = match fs::read_to_string(&file) {
            Ok(c) => c,
            Err(_) => continue,
        };
        for pat in patterns {
            if runtime_part(&content).contains(pat) {
                found.push((path.clone(), pat.to_string()));
            }
        }
    }
    found
}

fn report(offenders: Vec<(String, String)>, advice: &str) {
    if offenders.is_empty() {
        return;
    }
    let mut msg = String::new();
    for (file, pat) in offenders {
        msg.push_str(&format!("  {} contains pattern '{}': {}\n", file, pat, advice));
    }
    panic!("Storage boundary violations:\n{}", msg);
}

#[test]
fn sqlite_confined_to_change_data_store() {
    let bad_patterns = ["rusqlite", "execute_batch(", "conn.execute(", "stmt.execute(", "tx.execute("];
    let allowed = ["history/change_data/sqlite.rs", "history/change_data/mod.rs"];
    report(
        offenders(&bad_patterns, &allowed),
        "go through the ChangeDataStore trait instead",
    );
}

#[test]
fn disk_writes_confined_to_persistence_modules() {
    let bad_patterns = ["fs::write(", "File::create(", "fs::rename(", "remove_dir_all("];
    let allowed = ["runner/snapshot.rs", "history/store.rs", "settings/io.rs"];
    report(
        offenders(&bad_patterns, &allowed),
        "persist through the runner, the history store or the settings module",
    );
}
