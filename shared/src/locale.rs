//! Language code → locale and voice resolution.
//!
//! Locales come from the keys of the voice catalog. A language code is either
//! a bare language (`fr`), a script variant (`zh-Hans`) or an exact locale
//! (`fr-CA`).

use std::cmp::Ordering;

use crate::catalog::Catalog;
use crate::types::{Gender, LanguageOption, LocaleVoice};

/// Text before the first `-`.
pub fn base_language(code: &str) -> &str {
    code.split('-').next().unwrap_or(code)
}

pub fn locales_for_language(catalog: &Catalog, code: &str) -> Vec<String> {
    let prefix = format!("{}-", base_language(code));
    let matching: Vec<String> = catalog
        .locales()
        .filter(|locale| locale.starts_with(&prefix))
        .map(str::to_string)
        .collect();

    match code {
        "zh-Hans" => {
            return matching
                .into_iter()
                .filter(|l| l == "zh-CN" || l.starts_with("zh-CN-"))
                .collect();
        }
        "zh-Hant" => {
            return matching
                .into_iter()
                .filter(|l| l == "zh-TW" || l == "zh-HK")
                .collect();
        }
        _ => {}
    }

    if code.contains('-') && matching.iter().any(|l| l == code) {
        return vec![code.to_string()];
    }

    matching
}

/// Locale used for speech recognition of `code`.
pub fn source_locale(catalog: &Catalog, code: &str) -> String {
    let locales = locales_for_language(catalog, code);
    let upper = code.to_uppercase();

    if let Some(first) = locales.first() {
        let us = format!("{}-US", code);
        let doubled = format!("{}-{}", upper, upper);
        let prefix = format!("{}-", base_language(code));

        return locales
            .iter()
            .find(|l| **l == us)
            .or_else(|| locales.iter().find(|l| **l == doubled))
            .or_else(|| locales.iter().find(|l| l.starts_with(&prefix)))
            .unwrap_or(first)
            .clone();
    }

    // Best effort when the catalog knows nothing about the language.
    format!("{}-{}", code, upper)
}

pub fn voices_for_language(catalog: &Catalog, code: &str) -> Vec<LocaleVoice> {
    let mut voices: Vec<LocaleVoice> = locales_for_language(catalog, code)
        .iter()
        .flat_map(|locale| {
            catalog
                .voices_for_locale(locale)
                .iter()
                .map(move |voice| LocaleVoice {
                    short_name: voice.short_name.clone(),
                    name: voice.name.clone(),
                    gender: voice.gender,
                    locale: locale.clone(),
                })
        })
        .collect();

    voices.sort_by(compare_voices);
    voices
}

fn compare_voices(a: &LocaleVoice, b: &LocaleVoice) -> Ordering {
    a.gender
        .rank()
        .cmp(&b.gender.rank())
        .then_with(|| compare_labels(&a.name, &b.name))
}

fn compare_labels(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// First female voice, otherwise the first voice.
pub fn default_voice(voices: &[LocaleVoice]) -> Option<&LocaleVoice> {
    voices
        .iter()
        .find(|v| v.gender == Gender::Female)
        .or_else(|| voices.first())
}

pub fn language_options(catalog: &Catalog) -> Vec<LanguageOption> {
    let mut options: Vec<LanguageOption> = catalog
        .languages
        .iter()
        .map(|(code, info)| LanguageOption {
            code: code.clone(),
            label: if info.name == info.native_name {
                info.name.clone()
            } else {
                format!("{} ({})", info.name, info.native_name)
            },
        })
        .collect();

    options.sort_by(|a, b| compare_labels(&a.label, &b.label));
    options
}

pub fn language_display_name(catalog: &Catalog, code: &str) -> String {
    catalog
        .languages
        .get(code)
        .map(|info| info.name.clone())
        .unwrap_or_else(|| code.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        Catalog::parse(
            r#"
languages:
  en: { name: English, native_name: English }
  de: { name: German, native_name: Deutsch }
  ar: { name: Arabic, native_name: العربية }
voices:
  en-AU:
    - { short_name: en-AU-NatashaNeural, name: Natasha, gender: Female }
  en-US:
    - { short_name: en-US-GuyNeural, name: Guy, gender: Male }
    - { short_name: en-US-JennyNeural, name: Jenny, gender: Female }
    - { short_name: en-US-aria, name: aria, gender: Female }
    - { short_name: en-US-Brian, name: Brian, gender: Male }
  fr-CA:
    - { short_name: fr-CA-JeanNeural, name: Jean, gender: Male }
  fr-FR:
    - { short_name: fr-FR-DeniseNeural, name: Denise, gender: Female }
  zh-CN:
    - { short_name: zh-CN-XiaoxiaoNeural, name: Xiaoxiao, gender: Female }
  zh-CN-sichuan:
    - { short_name: zh-CN-sichuan-YunxiNeural, name: Yunxi, gender: Male }
  zh-HK:
    - { short_name: zh-HK-HiuMaanNeural, name: HiuMaan, gender: Female }
  zh-SG:
    - { short_name: zh-SG-XiaoyuNeural, name: Xiaoyu, gender: Female }
  zh-TW:
    - { short_name: zh-TW-HsiaoChenNeural, name: HsiaoChen, gender: Female }
"#,
        )
        .unwrap()
    }

    #[test]
    fn simplified_chinese_only_uses_mainland_locales() {
        let locales = locales_for_language(&catalog(), "zh-Hans");
        assert_eq!(locales, vec!["zh-CN", "zh-CN-sichuan"]);
    }

    #[test]
    fn traditional_chinese_uses_taiwan_and_hong_kong() {
        let mut locales = locales_for_language(&catalog(), "zh-Hant");
        locales.sort();
        assert_eq!(locales, vec!["zh-HK", "zh-TW"]);
    }

    #[test]
    fn exact_locale_resolves_to_itself() {
        assert_eq!(locales_for_language(&catalog(), "fr-FR"), vec!["fr-FR"]);
        assert_eq!(
            locales_for_language(&catalog(), "fr"),
            vec!["fr-CA", "fr-FR"]
        );
        assert!(locales_for_language(&catalog(), "ko").is_empty());
    }

    #[test]
    fn source_locale_prefers_us_then_any_match_then_guess() {
        let catalog = catalog();
        assert_eq!(source_locale(&catalog, "en"), "en-US");
        assert_eq!(source_locale(&catalog, "fr"), "fr-CA");
        assert_eq!(source_locale(&catalog, "fr-FR"), "fr-FR");
        assert_eq!(source_locale(&catalog, "ko"), "ko-KO");
    }

    #[test]
    fn first_match_follows_catalog_order() {
        let catalog = Catalog::parse(
            r#"
voices:
  fr-FR: [{ short_name: fr-FR-DeniseNeural, name: Denise, gender: Female }]
  fr-CA: [{ short_name: fr-CA-SylvieNeural, name: Sylvie, gender: Female }]
"#,
        )
        .unwrap();
        assert_eq!(locales_for_language(&catalog, "fr"), vec!["fr-FR", "fr-CA"]);
        assert_eq!(source_locale(&catalog, "fr"), "fr-FR");
    }

    #[test]
    fn voices_list_female_first_then_by_name() {
        let voices = voices_for_language(&catalog(), "en");
        let names: Vec<&str> = voices.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["aria", "Jenny", "Natasha", "Brian", "Guy"]);

        let first_male = voices
            .iter()
            .position(|v| v.gender == Gender::Male)
            .unwrap();
        assert!(voices[..first_male].iter().all(|v| v.gender == Gender::Female));
        assert!(voices[first_male..].iter().all(|v| v.gender == Gender::Male));

        let natasha = voices.iter().find(|v| v.name == "Natasha").unwrap();
        assert_eq!(natasha.locale, "en-AU");
    }

    #[test]
    fn default_voice_is_first_female_or_first() {
        let voices = voices_for_language(&catalog(), "en");
        assert_eq!(default_voice(&voices).unwrap().name, "aria");

        let male_only = voices_for_language(&catalog(), "fr-CA");
        assert_eq!(default_voice(&male_only).unwrap().name, "Jean");

        assert!(default_voice(&[]).is_none());
    }

    #[test]
    fn language_labels_collapse_identical_native_names() {
        let options = language_options(&catalog());
        let labels: Vec<&str> = options.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["Arabic (العربية)", "English", "German (Deutsch)"]);
        assert_eq!(language_display_name(&catalog(), "de"), "German");
        assert_eq!(language_display_name(&catalog(), "xx"), "xx");
    }
}
