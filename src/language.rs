//! User language preference.
//!
//! The settings store hands the core an optional locale string once, at
//! startup. Everything language-dependent that the core itself produces
//! (persona, fallback sentences, intent instructions) keys off [`Language`].

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    French,
    English,
}

impl Language {
    /// Resolve a locale/preference string such as `"fr"`, `"fr-FR"`,
    /// `"en_US"` or `"English"`. Unknown or missing values fall back to French.
    pub fn from_preference(pref: Option<&str>) -> Self {
        let Some(pref) = pref else {
            return Self::default();
        };
        let primary = pref
            .trim()
            .split(['-', '_', '.'])
            .next()
            .unwrap_or_default()
            .to_lowercase();
        match primary.as_str() {
            "en" | "eng" | "english" => Language::English,
            "fr" | "fra" | "fre" | "french" | "français" | "francais" => Language::French,
            _ => Self::default(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Language::French => "fr",
            Language::English => "en",
        }
    }

    /// System segment placed at the top of every prompt.
    pub fn persona(&self) -> &'static str {
        match self {
            Language::French => {
                "Tu es un assistant vocal francophone, chaleureux et concis. \
                 Réponds toujours en français, en une à trois phrases naturelles, \
                 sans listes ni balises."
            }
            Language::English => {
                "You are a warm, concise voice assistant. Always answer in English \
                 in one to three natural sentences, without lists or markup."
            }
        }
    }

    /// Substituted when the model's cleaned reply comes back empty.
    pub fn empty_reply_fallback(&self) -> &'static str {
        match self {
            Language::French => "Désolé, je n'ai pas de réponse à te donner pour le moment.",
            Language::English => "Sorry, I don't have an answer for you right now.",
        }
    }

    /// Shown to the user in place of a raw error when a generation fails.
    pub fn failure_message(&self) -> &'static str {
        match self {
            Language::French => "Désolé, une erreur est survenue. Peux-tu réessayer ?",
            Language::English => "Sorry, something went wrong. Could you try again?",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locale_variants_resolve() {
        assert_eq!(Language::from_preference(Some("fr")), Language::French);
        assert_eq!(Language::from_preference(Some("fr-FR")), Language::French);
        assert_eq!(Language::from_preference(Some("en_US.UTF-8")), Language::English);
        assert_eq!(Language::from_preference(Some(" English ")), Language::English);
    }

    #[test]
    fn missing_or_unknown_defaults_to_french() {
        assert_eq!(Language::from_preference(None), Language::French);
        assert_eq!(Language::from_preference(Some("de-DE")), Language::French);
        assert_eq!(Language::from_preference(Some("")), Language::French);
    }

    #[test]
    fn display_is_code() {
        assert_eq!(Language::English.to_string(), "en");
    }
}
