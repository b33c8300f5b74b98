//! Rule-based mailbox intent routing.
//!
//! [`IntentRouter::rewrite`] turns a raw user message into the text the
//! backend actually receives. Messages that do not mention the mailbox pass
//! through unchanged. Mailbox messages are matched against an ordered rule
//! list, first match wins:
//!
//! ```text
//! 1. "how many" + "unread"      → unread count
//! 2. "how many" + mail word     → total count
//! 3. "latest"                   → paraphrase latest()        (falls through if empty)
//! 4. entity keyword             → paraphrase search(kw)[0]   (falls through if no hit)
//! 5. "unread"                   → "none" or sender/subject list
//! 6. otherwise                  → refusal
//! ```
//!
//! Overlaps are settled by that order, never by scoring.
//!
//! Keywords match whole words or word sequences, with an optional plural
//! `s`/`x`: "mails" and "non lus" hit, "épaule" does not hit "paul".

use std::sync::Arc;

use tracing::debug;

use crate::language::Language;
use crate::subsystems::tools::{Mailbox, MailboxRecord};

const HOW_MANY: &[&str] = &["combien", "how many", "nombre de", "number of"];

const UNREAD: &[&str] = &["non lu", "non-lu", "pas lu", "pas encore lu", "unread", "not read"];

const MAIL_WORDS: &[&str] = &[
    "mail", "email", "courriel", "message", "boîte", "boite", "inbox", "reçu", "recu", "received",
];

const LATEST: &[&str] = &[
    "dernier", "dernière", "derniere", "plus récent", "plus recent", "latest", "most recent", "last",
];

/// Sender names and category words the stock mailbox fixture knows about.
pub const DEFAULT_ENTITIES: &[&str] = &[
    "marie", "paul", "banque", "facture", "réunion", "reunion", "newsletter", "amazon", "travail",
    "promo",
];

/// Which rule fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailIntent {
    UnreadCount,
    TotalCount,
    Latest,
    Entity(String),
    UnreadList,
    Unsupported,
}

pub struct IntentRouter {
    mailbox: Arc<dyn Mailbox>,
    language: Language,
    /// Lowercased.
    entities: Vec<String>,
}

impl IntentRouter {
    pub fn new(mailbox: Arc<dyn Mailbox>, language: Language) -> Self {
        Self::with_entities(mailbox, language, DEFAULT_ENTITIES.iter().copied())
    }

    pub fn with_entities<I, S>(mailbox: Arc<dyn Mailbox>, language: Language, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entities = entities
            .into_iter()
            .map(|e| e.as_ref().trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Self { mailbox, language, entities }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Membership test against mail words, count and "unread" words, and
    /// the entity keywords.
    pub fn is_mail_related(&self, text: &str) -> bool {
        let t = words(text);
        contains_any(&t, MAIL_WORDS)
            || contains_any(&t, HOW_MANY)
            || contains_any(&t, UNREAD)
            || self.entities.iter().any(|e| contains_phrase(&t, e))
    }

    /// Rewrite `text` into a backend-ready prompt, or return it unchanged.
    pub fn rewrite(&self, text: &str) -> String {
        match self.route(text) {
            Some((intent, prompt)) => {
                debug!(?intent, "mailbox intent matched");
                prompt
            }
            None => text.to_string(),
        }
    }

    /// Classify without keeping the prompt. `None` means pass-through.
    pub fn classify(&self, text: &str) -> Option<MailIntent> {
        self.route(text).map(|(intent, _)| intent)
    }

    fn route(&self, text: &str) -> Option<(MailIntent, String)> {
        if !self.is_mail_related(text) {
            return None;
        }
        let t = words(text);
        let lang = self.language;
        let how_many = contains_any(&t, HOW_MANY);
        let unread = contains_any(&t, UNREAD);

        if how_many && unread {
            let n = self.mailbox.unread_count();
            return Some((MailIntent::UnreadCount, templates::unread_count(lang, n)));
        }
        if how_many && contains_any(&t, MAIL_WORDS) {
            let n = self.mailbox.total_count();
            return Some((MailIntent::TotalCount, templates::total_count(lang, n)));
        }
        if contains_any(&t, LATEST) {
            if let Some(record) = self.mailbox.latest() {
                return Some((MailIntent::Latest, templates::paraphrase(lang, &record)));
            }
        }
        for keyword in self.entities.iter().filter(|e| contains_phrase(&t, e)) {
            if let Some(record) = self.mailbox.search(keyword).into_iter().next() {
                return Some((
                    MailIntent::Entity(keyword.clone()),
                    templates::paraphrase(lang, &record),
                ));
            }
        }
        if unread {
            let records = self.mailbox.unread();
            return Some((MailIntent::UnreadList, templates::unread_list(lang, &records)));
        }
        Some((MailIntent::Unsupported, templates::refusal(lang).to_string()))
    }
}

/// Lowercased words, split on anything that is not a letter or digit.
fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn word_matches(word: &str, keyword: &str) -> bool {
    word == keyword || word.strip_suffix(['s', 'x']).is_some_and(|stem| stem == keyword)
}

fn contains_phrase(words: &[String], phrase: &str) -> bool {
    let parts: Vec<&str> = phrase
        .split(|c: char| !c.is_alphanumeric())
        .filter(|p| !p.is_empty())
        .collect();
    !parts.is_empty()
        && words
            .windows(parts.len())
            .any(|run| run.iter().zip(&parts).all(|(w, k)| word_matches(w, k)))
}

fn contains_any(words: &[String], phrases: &[&str]) -> bool {
    phrases.iter().any(|p| contains_phrase(words, p))
}

mod templates {
    use super::*;

    pub fn unread_count(lang: Language, n: usize) -> String {
        match lang {
            Language::French => format!(
                "Réponds en une seule phrase courte : l'utilisateur a {n} email(s) non lu(s). N'ajoute rien d'autre."
            ),
            Language::English => format!(
                "Answer in one short sentence: the user has {n} unread email(s). Add nothing else."
            ),
        }
    }

    pub fn total_count(lang: Language, n: usize) -> String {
        match lang {
            Language::French => format!(
                "Réponds en une seule phrase courte : l'utilisateur a {n} email(s) au total dans sa boîte de réception. N'ajoute rien d'autre."
            ),
            Language::English => format!(
                "Answer in one short sentence: the user has {n} email(s) in total in their inbox. Add nothing else."
            ),
        }
    }

    pub fn paraphrase(lang: Language, r: &MailboxRecord) -> String {
        match lang {
            Language::French => format!(
                "Voici un email reçu de {} ({}) ayant pour objet « {} » : « {} ». \
                 Raconte-le naturellement à l'utilisateur en 2 à 3 phrases. \
                 Arrête-toi juste après ce résumé, sans commentaire, remarque ni question.",
                r.sender_name, r.sender, r.subject, r.body
            ),
            Language::English => format!(
                "Here is an email from {} ({}) with the subject \"{}\": \"{}\". \
                 Tell the user about it naturally in 2 to 3 sentences. \
                 Stop right after that summary, with no commentary, remark or question.",
                r.sender_name, r.sender, r.subject, r.body
            ),
        }
    }

    pub fn unread_list(lang: Language, records: &[MailboxRecord]) -> String {
        if records.is_empty() {
            return match lang {
                Language::French => {
                    "Réponds en une seule phrase courte que l'utilisateur n'a aucun email non lu.".to_string()
                }
                Language::English => {
                    "Answer in one short sentence that the user has no unread email.".to_string()
                }
            };
        }
        let list = records
            .iter()
            .map(|r| match lang {
                Language::French => format!("{} (« {} »)", r.sender_name, r.subject),
                Language::English => format!("{} (\"{}\")", r.sender_name, r.subject),
            })
            .collect::<Vec<_>>()
            .join(", ");
        match lang {
            Language::French => format!(
                "Dis naturellement à l'utilisateur qu'il a {} email(s) non lu(s) : {list}. N'ajoute rien d'autre.",
                records.len()
            ),
            Language::English => format!(
                "Tell the user naturally that they have {} unread email(s): {list}. Add nothing else.",
                records.len()
            ),
        }
    }

    pub fn refusal(lang: Language) -> &'static str {
        match lang {
            Language::French => {
                "Réponds poliment en une phrase que tu ne peux pas répondre à cette question sur la boîte mail."
            }
            Language::English => {
                "Reply politely in one sentence that you cannot answer this mailbox question."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::tools::InMemoryMailbox;
    use crate::subsystems::tools::mailbox::fixtures::{record, sample};

    fn router(mailbox: InMemoryMailbox) -> IntentRouter {
        IntentRouter::new(Arc::new(mailbox), Language::French)
    }

    #[test]
    fn unrelated_text_passes_through() {
        let r = router(sample());
        assert_eq!(r.rewrite("Quelle heure est-il ?"), "Quelle heure est-il ?");
        assert_eq!(r.classify("Raconte-moi une blague"), None);
    }

    #[test]
    fn keywords_inside_other_words_do_not_match() {
        let r = router(sample());
        assert_eq!(r.rewrite("j'ai mal à l'épaule depuis hier"), "j'ai mal à l'épaule depuis hier");
        assert_eq!(r.classify("je recule la voiture"), None);
        assert_eq!(r.classify("le message de Paul"), Some(MailIntent::Entity("paul".into())));
    }

    #[test]
    fn plural_keywords_match() {
        assert!(contains_phrase(&words("Mes courriels NON LUS"), "non lu"));
        assert!(contains_phrase(&words("les e-mails"), "mail"));
        assert!(!contains_phrase(&words("reculez"), "recu"));
    }

    #[test]
    fn bare_count_question_is_refused() {
        let r = router(sample());
        assert_eq!(r.classify("combien de pommes dans un kilo ?"), Some(MailIntent::Unsupported));
    }

    #[test]
    fn unread_count_beats_total_count() {
        let r = router(sample());
        let out = r.rewrite("combien d'emails non lus j'ai");
        assert_eq!(out, templates::unread_count(Language::French, 2));
        assert!(out.contains(" 2 "));
        assert_eq!(r.classify("Combien de mails non lus ?"), Some(MailIntent::UnreadCount));
    }

    #[test]
    fn total_count() {
        let r = router(sample());
        assert_eq!(r.classify("combien de mails j'ai reçu"), Some(MailIntent::TotalCount));
        assert_eq!(r.rewrite("How many emails do I have?"), templates::total_count(Language::French, 3));
    }

    #[test]
    fn latest_paraphrases_newest_record() {
        let r = router(sample());
        let out = r.rewrite("lis-moi le dernier mail");
        assert!(out.contains("Paul"));
        assert!(out.contains("Réunion projet"));
        assert!(out.contains("Arrête-toi"));
    }

    #[test]
    fn latest_on_empty_mailbox_falls_through_to_refusal() {
        let r = router(InMemoryMailbox::default());
        assert_eq!(r.classify("c'est quoi mon dernier mail ?"), Some(MailIntent::Unsupported));
    }

    #[test]
    fn latest_wins_over_entity() {
        let r = router(sample());
        // "marie" is an entity, but "dernier" is checked first.
        assert_eq!(r.classify("le dernier message de marie"), Some(MailIntent::Latest));
    }

    #[test]
    fn entity_search_uses_top_result() {
        let r = router(sample());
        assert_eq!(r.classify("parle-moi du mail de la banque"), Some(MailIntent::Entity("banque".into())));
        let out = r.rewrite("Et Marie ?");
        assert!(out.contains("Dîner samedi"));
    }

    #[test]
    fn entity_without_hit_falls_through() {
        let r = router(sample());
        // "amazon" is a keyword but nothing matches; no "unread" phrase → refusal.
        assert_eq!(r.classify("un mail d'amazon ?"), Some(MailIntent::Unsupported));
    }

    #[test]
    fn unread_list_names_senders() {
        let r = router(sample());
        let out = r.rewrite("quels sont mes mails non lus");
        assert_eq!(r.classify("quels sont mes mails non lus"), Some(MailIntent::UnreadList));
        assert!(out.contains("Paul (« Réunion projet »), Banque Postale (« Votre relevé »)"));
    }

    #[test]
    fn zero_unread_gives_fixed_instruction() {
        let all_read = InMemoryMailbox::new(vec![record("1", "Zoé", "Salut", "Coucou", 1, true)]);
        let r = router(all_read);
        let out = r.rewrite("des mails non lus ?");
        assert_eq!(out, templates::unread_list(Language::French, &[]));
        assert!(out.contains("aucun email non lu"));
    }

    #[test]
    fn generic_mail_question_is_refused() {
        let r = router(sample());
        assert_eq!(r.rewrite("supprime ma boîte mail"), templates::refusal(Language::French));
    }

    #[test]
    fn typographic_apostrophe_is_normalized() {
        let r = router(sample());
        assert_eq!(r.classify("combien d’emails non lus j’ai"), Some(MailIntent::UnreadCount));
    }

    #[test]
    fn english_templates() {
        let r = IntentRouter::new(Arc::new(sample()), Language::English);
        assert_eq!(r.rewrite("how many unread emails?"), templates::unread_count(Language::English, 2));
    }

    #[test]
    fn custom_entities() {
        let r = IntentRouter::with_entities(Arc::new(sample()), Language::French, ["  Jeudi "]);
        assert_eq!(r.classify("quoi de neuf pour jeudi"), Some(MailIntent::Entity("jeudi".into())));
    }
}
