//! Extension based file categorization.
//!
//! A [`CategoryTable`] maps lower-case file extensions (with their leading dot)
//! to category names. Anything not in the table belongs to [`OTHERS`].
//!
//! # Examples
//!
//! ```
//! use tidyd::category::CategoryTable;
//!
//! let table = CategoryTable::default();
//! assert_eq!(table.classify(".PNG"), "Images");
//! assert_eq!(table.classify(".mp3"), "Audio");
//! assert_eq!(table.classify(".xyz"), "Others");
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Reserved category for files whose extension is not in the table.
pub const OTHERS: &str = "Others";

const DEFAULT_TABLE: &[(&str, &[&str])] = &[
    (
        "Images",
        &[
            ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".svg", ".webp", ".ico", ".tiff",
        ],
    ),
    (
        "Documents",
        &[
            ".pdf", ".doc", ".docx", ".txt", ".rtf", ".odt", ".xls", ".xlsx", ".ppt", ".pptx",
        ],
    ),
    (
        "Videos",
        &[".mp4", ".avi", ".mkv", ".mov", ".wmv", ".flv", ".webm", ".m4v"],
    ),
    (
        "Audio",
        &[".mp3", ".wav", ".flac", ".aac", ".ogg", ".wma", ".m4a"],
    ),
    (
        "Archives",
        &[".zip", ".rar", ".7z", ".tar", ".gz", ".bz2", ".xz"],
    ),
    (
        "Code",
        &[
            ".py", ".js", ".java", ".cpp", ".c", ".h", ".cs", ".rb", ".go", ".rs", ".php",
        ],
    ),
    (
        "Data",
        &[".json", ".xml", ".csv", ".sql", ".db", ".sqlite"],
    ),
    (
        "Executables",
        &[".exe", ".msi", ".dmg", ".pkg", ".deb", ".rpm", ".app"],
    ),
    ("Fonts", &[".ttf", ".otf", ".woff", ".woff2"]),
    ("Ebooks", &[".epub", ".mobi", ".azw", ".azw3"]),
];

/// One category and the extensions that belong to it, as written in config files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDef {
    pub name: String,
    pub extensions: Vec<String>,
}

/// Immutable extension to category mapping.
///
/// Category order is the insertion order of the definitions it was built from.
#[derive(Debug, Clone)]
pub struct CategoryTable {
    categories: Vec<CategoryDef>,
    by_extension: HashMap<String, usize>,
}

impl CategoryTable {
    /// Builds a table from category definitions, rejecting anything that would
    /// produce ambiguous or unusable categories.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty or reserved category name, a
    /// duplicate category, a malformed extension, or an extension claimed by two
    /// categories.
    pub fn new(definitions: Vec<CategoryDef>) -> Result<Self> {
        let mut categories: Vec<CategoryDef> = Vec::with_capacity(definitions.len());
        let mut by_extension: HashMap<String, usize> = HashMap::new();

        for def in definitions {
            let name = def.name.trim().to_string();
            if name.is_empty() {
                return Err(Error::Config("category name must not be empty".into()));
            }
            if name.eq_ignore_ascii_case(OTHERS) {
                return Err(Error::Config(format!(
                    "'{}' is reserved for unmatched extensions",
                    OTHERS
                )));
            }
            if name.contains(['/', '\\']) || name == "." || name == ".." {
                return Err(Error::Config(format!(
                    "category name '{}' is not a valid folder name",
                    name
                )));
            }
            if categories.iter().any(|c| c.name == name) {
                return Err(Error::Config(format!("duplicate category '{}'", name)));
            }

            let index = categories.len();
            let mut extensions = Vec::with_capacity(def.extensions.len());
            for raw in def.extensions {
                let ext = raw.trim().to_lowercase();
                if !ext.starts_with('.') || ext.len() < 2 || ext.contains(['/', '\\']) {
                    return Err(Error::Config(format!(
                        "invalid extension '{}' in category '{}': expected a form like \".jpg\"",
                        raw, name
                    )));
                }
                if let Some(&owner) = by_extension.get(&ext) {
                    let owner_name = if owner == index {
                        name.as_str()
                    } else {
                        categories[owner].name.as_str()
                    };
                    return Err(Error::Config(format!(
                        "extension '{}' is listed under both '{}' and '{}'",
                        ext, owner_name, name
                    )));
                }
                by_extension.insert(ext.clone(), index);
                extensions.push(ext);
            }

            categories.push(CategoryDef { name, extensions });
        }

        Ok(Self {
            categories,
            by_extension,
        })
    }

    /// Returns the category for an extension such as `".jpg"`.
    ///
    /// Matching is case-insensitive; unknown extensions map to [`OTHERS`].
    pub fn classify(&self, extension: &str) -> &str {
        self.by_extension
            .get(&extension.to_lowercase())
            .map(|&index| self.categories[index].name.as_str())
            .unwrap_or(OTHERS)
    }

    /// Classifies a file by the last extension of its name.
    pub fn classify_path(&self, path: &Path) -> &str {
        match path.extension() {
            Some(ext) => self.classify(&format!(".{}", ext.to_string_lossy())),
            None => OTHERS,
        }
    }

    /// Category names in table order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(|c| c.name.as_str())
    }

    pub fn definitions(&self) -> &[CategoryDef] {
        &self.categories
    }
}

impl Default for CategoryTable {
    fn default() -> Self {
        let categories: Vec<CategoryDef> = DEFAULT_TABLE
            .iter()
            .map(|(name, extensions)| CategoryDef {
                name: name.to_string(),
                extensions: extensions.iter().map(|e| e.to_string()).collect(),
            })
            .collect();
        let by_extension = categories
            .iter()
            .enumerate()
            .flat_map(|(index, def)| def.extensions.iter().map(move |ext| (ext.clone(), index)))
            .collect();
        Self {
            categories,
            by_extension,
        }
    }
}
