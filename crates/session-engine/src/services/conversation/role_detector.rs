/// Keyword classifiers over participant text
use tracing::debug;

use crate::models::ParticipantRole;

/// Openers that mark a message as a self-introduction
const INTRODUCTION_MARKERS: &[&str] = &[
    "je suis",
    "je m'appelle",
    "moi c'est",
    "mon nom est",
    "je travaille",
    "je me présente",
];

/// Checked in order: the first role with a matching keyword wins, so
/// "étudiante en médecine" is a student rather than a doctor.
const ROLE_KEYWORDS: &[(ParticipantRole, &[&str])] = &[
    (ParticipantRole::Student, &["étudiant", "étudiante", "stagiaire", "externe"]),
    (ParticipantRole::Psychologist, &["psychologue"]),
    (ParticipantRole::Nurse, &["infirmier", "infirmière"]),
    (
        ParticipantRole::SocialWorker,
        &["assistant social", "assistante sociale", "travailleur social", "travailleuse sociale"],
    ),
    (
        ParticipantRole::Doctor,
        &["médecin", "docteur", "docteure", "psychiatre", "interne", "dr "],
    ),
];

const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    ("voix", &["voix", "entendez", "entends", "entend des"]),
    ("sommeil", &["dormir", "dormez", "sommeil", "insomnie", "la nuit"]),
    ("traitement", &["médicament", "traitement", "comprimé", "pilule", "ordonnance"]),
    ("famille", &["famille", "mère", "père", "frère", "sœur", "femme", "mari", "enfant"]),
    ("sécurité", &["suicide", "mourir", "vous tuer", "faire du mal", "danger"]),
    ("travail", &["travail", "boulot", "emploi", "collègue"]),
    ("substances", &["alcool", "cannabis", "drogue", "boire"]),
    ("anxiété", &["peur", "angoisse", "anxieux", "anxieuse", "stress"]),
    ("hospitalisation", &["hôpital", "hospitalis", "urgences"]),
];

fn normalize(text: &str) -> String {
    text.to_lowercase().replace('’', "'")
}

pub struct RoleDetector;

impl RoleDetector {
    /// Classify the participant's role from an introduction-like message.
    /// Anything that does not read as an introduction yields `Unknown`.
    pub fn detect(text: &str) -> ParticipantRole {
        if !Self::is_introduction(text) {
            return ParticipantRole::Unknown;
        }
        let text = normalize(text);

        for (role, keywords) in ROLE_KEYWORDS {
            if let Some(keyword) = keywords.iter().find(|k| text.contains(*k)) {
                debug!("Detected participant role {:?}: matched '{}'", role, keyword);
                return *role;
            }
        }

        ParticipantRole::Unknown
    }

    pub fn is_introduction(text: &str) -> bool {
        let text = normalize(text);
        INTRODUCTION_MARKERS.iter().any(|m| text.contains(m))
    }
}

pub struct TopicExtractor;

impl TopicExtractor {
    /// Topic tags mentioned in `text`, in lexicon order, without duplicates
    pub fn extract(text: &str) -> Vec<String> {
        let text = normalize(text);
        TOPIC_KEYWORDS
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
            .map(|(topic, _)| (*topic).to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_roles() {
        assert_eq!(
            RoleDetector::detect("Bonjour, je suis le docteur Martin."),
            ParticipantRole::Doctor
        );
        assert_eq!(
            RoleDetector::detect("Bonjour, je m'appelle Julie, je suis infirmière."),
            ParticipantRole::Nurse
        );
        assert_eq!(
            RoleDetector::detect("Je suis étudiante en médecine"),
            ParticipantRole::Student
        );
        assert_eq!(
            RoleDetector::detect("Je travaille comme psychologue ici"),
            ParticipantRole::Psychologist
        );
        assert_eq!(
            RoleDetector::detect("Je suis l'assistante sociale du service"),
            ParticipantRole::SocialWorker
        );
    }

    #[test]
    fn test_non_introduction_is_unknown() {
        assert_eq!(
            RoleDetector::detect("Le médecin va passer plus tard"),
            ParticipantRole::Unknown
        );
        assert_eq!(RoleDetector::detect("Je suis là pour vous"), ParticipantRole::Unknown);
        assert!(!RoleDetector::is_introduction("Comment dormez-vous ?"));
        assert!(RoleDetector::is_introduction("Moi c’est Léa"));
    }

    #[test]
    fn test_extract_topics() {
        let topics = TopicExtractor::extract("Entendez-vous des voix la nuit ? Et votre traitement ?");
        assert_eq!(topics, vec!["voix", "sommeil", "traitement"]);
        assert!(TopicExtractor::extract("Bonjour").is_empty());
    }
}
