//! Compiled content scripts.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::manifest::{ContentScriptConfig, RunAt};
use crate::url_pattern::UrlPattern;

/// A script or stylesheet read from the extension directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptFile {
    /// Path relative to the extension root, as written in the manifest.
    pub url: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentScript {
    pub matches: Vec<String>,
    pub js: Vec<ScriptFile>,
    pub css: Vec<ScriptFile>,
    pub run_at: RunAt,
    pub all_frames: bool,
    #[serde(skip)]
    patterns: Vec<UrlPattern>,
}

impl ContentScript {
    /// Read every file `config` references. Unreadable files are skipped
    /// with a warning so one bad path does not disable the whole script.
    pub async fn compile(extension_dir: &Path, config: &ContentScriptConfig) -> Self {
        Self {
            matches: config.matches.clone(),
            js: read_files(extension_dir, &config.js).await,
            css: read_files(extension_dir, &config.css).await,
            run_at: config.run_at,
            all_frames: config.all_frames,
            patterns: config.matches.iter().map(|m| UrlPattern::parse(m)).collect(),
        }
    }

    pub fn matches(&self, url: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(url))
    }
}

async fn read_files(extension_dir: &Path, relative: &[String]) -> Vec<ScriptFile> {
    let mut files = Vec::with_capacity(relative.len());

    for url in relative {
        let path = extension_dir.join(url.trim_start_matches('/'));
        match tokio::fs::read_to_string(&path).await {
            Ok(code) => files.push(ScriptFile {
                url: url.clone(),
                code,
            }),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable content script file");
            }
        }
    }

    files
}
