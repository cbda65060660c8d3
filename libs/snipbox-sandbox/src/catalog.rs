// Image catalog: which container image provides each language/version.
// Built in by default, optionally replaced from a JSON file at startup.

use crate::error::CatalogError;
use serde::{Deserialize, Serialize};
use snipbox_common::types::Language;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageVersion {
    pub version: String,
    pub image: String,
}

impl ImageVersion {
    fn new(version: &str, image: &str) -> Self {
        Self {
            version: version.to_string(),
            image: image.to_string(),
        }
    }
}

/// Images for one language. The default is stored apart from the rest so a
/// language can never end up with zero or two defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageImages {
    default: ImageVersion,
    additional: Vec<ImageVersion>,
}

impl LanguageImages {
    pub fn default_version(&self) -> &ImageVersion {
        &self.default
    }

    /// All versions, default first
    pub fn iter(&self) -> impl Iterator<Item = &ImageVersion> {
        std::iter::once(&self.default).chain(self.additional.iter())
    }

    fn find(&self, version: &str) -> Option<&ImageVersion> {
        self.iter().find(|v| v.version == version)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    languages: Vec<CatalogFileLanguage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CatalogFileLanguage {
    name: String,
    versions: Vec<ImageVersion>,
}

/// Immutable language → image table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCatalog {
    languages: HashMap<Language, LanguageImages>,
}

impl Default for ImageCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ImageCatalog {
    /// The stock table; the first version listed for each language is its default
    pub fn builtin() -> Self {
        let table = [
            (
                Language::Python,
                vec![
                    ImageVersion::new("3.9", "python:3.9-slim"),
                    ImageVersion::new("3.10", "python:3.10-slim"),
                    ImageVersion::new("3.11", "python:3.11-slim"),
                ],
            ),
            (
                Language::Javascript,
                vec![
                    ImageVersion::new("16", "node:16-alpine"),
                    ImageVersion::new("18", "node:18-alpine"),
                    ImageVersion::new("20", "node:20-alpine"),
                ],
            ),
            (
                Language::Java,
                vec![
                    ImageVersion::new("17", "eclipse-temurin:17-jdk-alpine"),
                    ImageVersion::new("21", "eclipse-temurin:21-jdk-alpine"),
                ],
            ),
            (
                Language::Go,
                vec![
                    ImageVersion::new("1.19", "golang:1.19-alpine"),
                    ImageVersion::new("1.20", "golang:1.20-alpine"),
                    ImageVersion::new("1.21", "golang:1.21-alpine"),
                ],
            ),
        ];

        let mut languages = HashMap::new();
        for (language, versions) in table {
            let mut versions = versions.into_iter();
            if let Some(default) = versions.next() {
                languages.insert(
                    language,
                    LanguageImages {
                        default,
                        additional: versions.collect(),
                    },
                );
            }
        }
        Self { languages }
    }

    /// Build a catalog from explicit per-language version lists.
    ///
    /// Languages may be left out (they are then disabled), but a listed
    /// language needs at least one version and no duplicates.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (Language, Vec<ImageVersion>)>,
    ) -> Result<Self, CatalogError> {
        let mut languages = HashMap::new();

        for (language, versions) in entries {
            if languages.contains_key(&language) {
                return Err(CatalogError::DuplicateLanguage(language));
            }

            let mut seen = std::collections::HashSet::new();
            for v in &versions {
                if !seen.insert(v.version.as_str()) {
                    return Err(CatalogError::DuplicateVersion {
                        language,
                        version: v.version.clone(),
                    });
                }
            }

            let mut versions = versions.into_iter();
            let default = versions.next().ok_or(CatalogError::EmptyLanguage(language))?;
            languages.insert(
                language,
                LanguageImages {
                    default,
                    additional: versions.collect(),
                },
            );
        }

        if languages.is_empty() {
            return Err(CatalogError::Empty);
        }

        Ok(Self { languages })
    }

    /// Parse the JSON catalog format
    pub fn from_json(content: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(content)?;

        let mut entries = Vec::with_capacity(file.languages.len());
        for lang in file.languages {
            let language = lang
                .name
                .parse::<Language>()
                .map_err(|_| CatalogError::UnknownLanguage(lang.name.clone()))?;
            entries.push((language, lang.versions));
        }

        Self::from_entries(entries)
    }

    /// Load a catalog file from disk
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Image for a language, honouring `version` when the catalog knows it.
    ///
    /// An absent or unknown version silently resolves to the default image.
    /// `None` only when the language is not enabled in this catalog.
    pub fn resolve_image(&self, language: Language, version: Option<&str>) -> Option<&str> {
        let images = self.languages.get(&language)?;

        let chosen = match version {
            Some(requested) => match images.find(requested) {
                Some(found) => found,
                None => {
                    debug!(
                        language = %language,
                        requested_version = requested,
                        default_version = %images.default.version,
                        "Unknown version, using default image"
                    );
                    &images.default
                }
            },
            None => &images.default,
        };

        Some(chosen.image.as_str())
    }

    pub fn default_image(&self, language: Language) -> Option<&str> {
        self.resolve_image(language, None)
    }

    pub fn language(&self, language: Language) -> Option<&LanguageImages> {
        self.languages.get(&language)
    }

    /// Enabled languages in declaration order
    pub fn languages(&self) -> Vec<Language> {
        Language::ALL
            .into_iter()
            .filter(|l| self.languages.contains_key(l))
            .collect()
    }

    /// Every distinct image, in catalog order
    pub fn images(&self) -> Vec<&str> {
        let mut images: Vec<&str> = Vec::new();
        for language in Language::ALL {
            if let Some(entry) = self.languages.get(&language) {
                for v in entry.iter() {
                    if !images.contains(&v.image.as_str()) {
                        images.push(v.image.as_str());
                    }
                }
            }
        }
        images
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_defaults() {
        let catalog = ImageCatalog::builtin();
        assert_eq!(catalog.default_image(Language::Python), Some("python:3.9-slim"));
        assert_eq!(catalog.default_image(Language::Javascript), Some("node:16-alpine"));
        assert_eq!(
            catalog.default_image(Language::Java),
            Some("eclipse-temurin:17-jdk-alpine")
        );
        assert_eq!(catalog.default_image(Language::Go), Some("golang:1.19-alpine"));
    }

    #[test]
    fn test_every_language_has_a_default() {
        let catalog = ImageCatalog::builtin();
        for language in Language::ALL {
            let entry = catalog.language(language).expect("language missing");
            assert_eq!(
                catalog.resolve_image(language, None),
                Some(entry.default_version().image.as_str())
            );
        }
    }

    #[test]
    fn test_known_versions_resolve_exactly() {
        let catalog = ImageCatalog::builtin();
        for language in Language::ALL {
            for v in catalog.language(language).unwrap().iter() {
                assert_eq!(
                    catalog.resolve_image(language, Some(&v.version)),
                    Some(v.image.as_str()),
                    "{} {}",
                    language,
                    v.version
                );
            }
        }
        assert_eq!(
            catalog.resolve_image(Language::Python, Some("3.11")),
            Some("python:3.11-slim")
        );
        assert_eq!(
            catalog.resolve_image(Language::Java, Some("21")),
            Some("eclipse-temurin:21-jdk-alpine")
        );
    }

    #[test]
    fn test_unknown_version_falls_back_to_default() {
        let catalog = ImageCatalog::builtin();
        assert_eq!(
            catalog.resolve_image(Language::Python, Some("2.7")),
            Some("python:3.9-slim")
        );
        assert_eq!(catalog.resolve_image(Language::Go, Some("")), Some("golang:1.19-alpine"));
    }

    #[test]
    fn test_images_are_distinct_and_ordered() {
        let catalog = ImageCatalog::builtin();
        let images = catalog.images();
        assert_eq!(images.len(), 11);
        assert_eq!(images[0], "python:3.9-slim");
        assert_eq!(images[10], "golang:1.21-alpine");
    }

    #[test]
    fn test_from_json() {
        let catalog = ImageCatalog::from_json(
            r#"{"languages": [
                {"name": "python", "versions": [
                    {"version": "3.12", "image": "python:3.12-slim"},
                    {"version": "3.11", "image": "python:3.11-slim"}
                ]}
            ]}"#,
        )
        .unwrap();

        assert_eq!(catalog.default_image(Language::Python), Some("python:3.12-slim"));
        assert_eq!(
            catalog.resolve_image(Language::Python, Some("3.11")),
            Some("python:3.11-slim")
        );
        assert_eq!(catalog.default_image(Language::Go), None);
        assert_eq!(catalog.languages(), vec![Language::Python]);
    }

    #[test]
    fn test_from_json_rejects_bad_tables() {
        let unknown = r#"{"languages": [{"name": "cobol", "versions": [{"version": "1", "image": "x"}]}]}"#;
        assert!(matches!(
            ImageCatalog::from_json(unknown),
            Err(CatalogError::UnknownLanguage(name)) if name == "cobol"
        ));

        let empty = r#"{"languages": [{"name": "go", "versions": []}]}"#;
        assert!(matches!(
            ImageCatalog::from_json(empty),
            Err(CatalogError::EmptyLanguage(Language::Go))
        ));

        let duplicate = r#"{"languages": [{"name": "go", "versions": [
            {"version": "1.21", "image": "a"}, {"version": "1.21", "image": "b"}]}]}"#;
        assert!(matches!(
            ImageCatalog::from_json(duplicate),
            Err(CatalogError::DuplicateVersion { .. })
        ));

        let twice = r#"{"languages": [
            {"name": "go", "versions": [{"version": "1", "image": "a"}]},
            {"name": "Go", "versions": [{"version": "2", "image": "b"}]}]}"#;
        assert!(matches!(
            ImageCatalog::from_json(twice),
            Err(CatalogError::DuplicateLanguage(Language::Go))
        ));

        assert!(matches!(
            ImageCatalog::from_json(r#"{"languages": []}"#),
            Err(CatalogError::Empty)
        ));
        assert!(matches!(
            ImageCatalog::from_json("not json"),
            Err(CatalogError::Parse(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let result = ImageCatalog::load(Path::new("/nonexistent/images.json"));
        assert!(matches!(result, Err(CatalogError::Read { .. })));
    }
}
