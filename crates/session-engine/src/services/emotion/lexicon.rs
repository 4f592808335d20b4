use once_cell::sync::Lazy;
use regex::Regex;

/// Ceiling of each of the four sub-scores
pub(super) const CATEGORY_CAP: u8 = 25;
pub(super) const MARKER_POINTS: u8 = 10;
pub(super) const QUESTION_MARK_POINTS: u8 = 5;
pub(super) const INVALIDATION_PENALTY: u8 = 10;
pub(super) const ADAPTIVE_THRESHOLD: u8 = 50;

pub(super) const EMPATHY_MARKERS: &[&str] = &[
    "je comprends",
    "difficile",
    "je vous entends",
    "ça doit être",
    "ca doit etre",
    "je vois que",
    "vous semblez",
    "effrayant",
    "pénible",
    "je suis désolé",
    "ce que vous ressentez",
    "vous avez peur",
];

pub(super) const QUESTIONING_MARKERS: &[&str] = &[
    "comment vous",
    "comment ça",
    "qu'est-ce que",
    "pouvez-vous",
    "pourriez-vous",
    "entendez-vous",
    "depuis quand",
    "est-ce que",
    "avez-vous",
    "voulez-vous",
    "actuellement",
    "en ce moment",
    "racontez-moi",
    "dites-moi",
];

pub(super) const REASSURANCE_MARKERS: &[&str] = &[
    "vous êtes en sécurité",
    "je suis là",
    "on va vous aider",
    "nous allons vous aider",
    "prenez votre temps",
    "vous n'êtes pas seul",
    "personne ne vous veut du mal",
    "on est là pour vous",
    "c'est normal",
    "je reste avec vous",
];

/// Phrases that dismiss or invalidate the patient's experience
pub(super) const INVALIDATING_PHRASES: &[&str] = &[
    "calmez-vous",
    "vous imaginez",
    "c'est dans votre tête",
    "ce n'est rien",
    "vous exagérez",
    "n'importe quoi",
    "ce n'est pas réel",
    "ça n'existe pas",
    "arrêtez",
    "soyez raisonnable",
    "c'est ridicule",
];

/// Phrases that raise agitation beyond the score band
pub(super) const HIGH_SEVERITY_TRIGGERS: &[(&str, i32)] = &[
    ("calmez-vous", 5),
    ("vous imaginez", 10),
    ("c'est dans votre tête", 10),
    ("vous êtes fou", 20),
    ("vous êtes folle", 20),
    ("taisez-vous", 15),
    ("la police", 10),
    ("vous enfermer", 15),
    ("contention", 15),
    ("piqûre", 10),
];

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Lowercase, unify apostrophes and collapse whitespace before matching
pub(super) fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase().replace(['’', '`', 'ʼ'], "'");
    WHITESPACE.replace_all(lowered.trim(), " ").into_owned()
}

/// Additive marker score: every distinct marker found adds `MARKER_POINTS`,
/// capped at `CATEGORY_CAP`
pub(super) fn marker_score(text: &str, markers: &[&str]) -> u8 {
    let hits = markers.iter().filter(|m| text.contains(*m)).count();
    let raw = hits.saturating_mul(MARKER_POINTS as usize);
    raw.min(CATEGORY_CAP as usize) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  C’est   DIFFICILE \n"), "c'est difficile");
    }

    #[test]
    fn test_marker_score_caps() {
        let text = normalize("Je comprends, c'est difficile et pénible, je vois que vous semblez épuisé");
        assert_eq!(marker_score(&text, EMPATHY_MARKERS), CATEGORY_CAP);
        assert_eq!(marker_score("rien à voir", EMPATHY_MARKERS), 0);
    }
}
