use anyhow::{Context, Result};
use interview_core::model::{CaseRecord, Prompt};
use std::fs;
use std::path::Path;

/// Reference data read from a bank directory.
#[derive(Debug, Default)]
pub struct Bank {
    pub prompts: Vec<Prompt>,
    pub cases: Vec<CaseRecord>,
}

/// Loads every `*.json` file of `dir_path`. Files whose name starts with
/// `cases` hold case records, every other file holds prompts.
pub fn load_bank(dir_path: &Path) -> Result<Bank> {
    let mut bank = Bank::default();

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir_path)
        .with_context(|| format!("Failed to read question bank directory: {}", dir_path.display()))?
    {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();

    for path in paths {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .context("Could not get file stem for bank file")?;
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read bank file: {}", path.display()))?;

        if stem.starts_with("cases") {
            let cases: Vec<CaseRecord> = serde_json::from_str(&content)
                .with_context(|| format!("Invalid case file: {}", path.display()))?;
            tracing::debug!("{} cases from {}", cases.len(), path.display());
            bank.cases.extend(cases);
        } else {
            let prompts: Vec<Prompt> = serde_json::from_str(&content)
                .with_context(|| format!("Invalid question file: {}", path.display()))?;
            tracing::debug!("{} prompts from {}", prompts.len(), path.display());
            bank.prompts.extend(prompts);
        }
    }

    Ok(bank)
}
