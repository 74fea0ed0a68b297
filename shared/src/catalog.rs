use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::types::{LanguageInfo, Voice};

const BUILTIN_CATALOG: &str = include_str!("../data/catalog.yaml");

/// Static language and voice reference data.
///
/// `languages` is keyed by language code (`fr`, `zh-Hans`). Voices are grouped
/// by locale (`fr-FR`, `zh-CN-sichuan`) and keep the order of the source file,
/// which decides "first match" during locale resolution.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub languages: BTreeMap<String, LanguageInfo>,
    voices: Vec<(String, Vec<Voice>)>,
}

#[derive(Deserialize)]
struct RawCatalog {
    #[serde(default)]
    languages: BTreeMap<String, LanguageInfo>,
    #[serde(default)]
    voices: serde_yaml::Mapping,
}

impl Catalog {
    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN_CATALOG).context("Built-in catalog is malformed")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog {:?}", path))?;
        Self::parse(&content).with_context(|| format!("Invalid catalog {:?}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let raw: RawCatalog = serde_yaml::from_str(content)?;
        let voices = raw
            .voices
            .into_iter()
            .map(|(locale, voices)| {
                let locale = match locale {
                    Value::String(locale) => locale,
                    other => bail!("Voice locale {:?} is not a string", other),
                };
                let voices = serde_yaml::from_value(voices)
                    .with_context(|| format!("Invalid voices for {}", locale))?;
                Ok((locale, voices))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            languages: raw.languages,
            voices,
        })
    }

    /// Locales with voices, in file order.
    pub fn locales(&self) -> impl Iterator<Item = &str> {
        self.voices.iter().map(|(locale, _)| locale.as_str())
    }

    pub fn voices_for_locale(&self, locale: &str) -> &[Voice] {
        self.voices
            .iter()
            .find(|(l, _)| l == locale)
            .map(|(_, voices)| voices.as_slice())
            .unwrap_or(&[])
    }
}
