/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Document selectors and language identification.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// The language identifiers a server instance is activated for.
///
/// Identifiers are trimmed; duplicates and empty entries are dropped while
/// keeping the first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct DocumentSelector {
    languages: Vec<String>,
}

impl DocumentSelector {
    /// Builds a selector from language identifiers.
    pub fn new<I, S>(languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut selector = Self::default();
        for lang in languages {
            let lang = lang.as_ref().trim();
            if !lang.is_empty() && !selector.languages.iter().any(|l| l == lang) {
                selector.languages.push(lang.to_string());
            }
        }
        selector
    }

    /// Returns true if documents of `language_id` belong to this selector.
    #[must_use]
    pub fn matches(&self, language_id: &str) -> bool {
        self.languages.iter().any(|l| l == language_id)
    }

    /// The language identifiers, in declaration order.
    #[must_use]
    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    /// Returns true if the selector names no languages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }
}

impl From<Vec<String>> for DocumentSelector {
    fn from(languages: Vec<String>) -> Self {
        Self::new(languages)
    }
}

impl From<DocumentSelector> for Vec<String> {
    fn from(selector: DocumentSelector) -> Self {
        selector.languages
    }
}

impl From<&[&str]> for DocumentSelector {
    fn from(languages: &[&str]) -> Self {
        Self::new(languages)
    }
}

impl fmt::Display for DocumentSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.languages.join(", "))
    }
}

/// Maps a file path to the language identifier a client would report.
pub fn language_id_for_path(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("go") => "go",
        Some("php" | "phtml") => "php",
        Some("py" | "pyi") => "python",
        Some("java") => "java",
        Some("js" | "mjs" | "cjs") => "javascript",
        Some("jsx") => "javascriptreact",
        Some("ts" | "mts" | "cts") => "typescript",
        Some("tsx") => "typescriptreact",
        Some("rs") => "rust",
        Some("c") => "c",
        Some("cpp" | "cc" | "cxx" | "h" | "hpp") => "cpp",
        Some("rb") => "ruby",
        Some("sh" | "bash" | "zsh") => "shellscript",
        Some("json") => "json",
        Some("yaml" | "yml") => "yaml",
        Some("toml") => "toml",
        Some("md") => "markdown",
        _ => "plaintext",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_matches() {
        let selector = DocumentSelector::new([
            "typescript",
            "typescriptreact",
            "javascript",
            "javascriptreact",
        ]);
        assert!(selector.matches("javascriptreact"));
        assert!(!selector.matches("java"));
        assert!(!selector.matches("TypeScript"));
    }

    #[test]
    fn test_selector_dedups_and_trims() {
        let selector = DocumentSelector::new([" go ", "go", "", "php"]);
        assert_eq!(selector.languages(), ["go", "php"]);
        assert_eq!(selector.to_string(), "go, php");
    }

    #[test]
    fn test_selector_deserializes_from_list() -> serde_json::Result<()> {
        let selector: DocumentSelector = serde_json::from_str(r#"["python", "python"]"#)?;
        assert_eq!(selector.languages(), ["python"]);
        assert!(!selector.is_empty());
        Ok(())
    }

    #[test]
    fn test_language_id_for_path() {
        assert_eq!(language_id_for_path(Path::new("main.go")), "go");
        assert_eq!(language_id_for_path(Path::new("index.php")), "php");
        assert_eq!(language_id_for_path(Path::new("app.py")), "python");
        assert_eq!(language_id_for_path(Path::new("App.java")), "java");
        assert_eq!(language_id_for_path(Path::new("a.ts")), "typescript");
        assert_eq!(language_id_for_path(Path::new("a.tsx")), "typescriptreact");
        assert_eq!(language_id_for_path(Path::new("a.js")), "javascript");
        assert_eq!(language_id_for_path(Path::new("a.jsx")), "javascriptreact");
        assert_eq!(language_id_for_path(Path::new("notes.txt")), "plaintext");
        assert_eq!(language_id_for_path(Path::new("Makefile")), "plaintext");
    }
}
