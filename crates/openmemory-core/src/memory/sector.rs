//! Cognitive sectors and the keyword/heuristic router
//!
//! Every memory lands in at least one of five sectors. The router scores a
//! text against fixed keyword tables plus structural cues (dates, imperative
//! verbs, affective terms, first-person reasoning, factual assertions) and
//! explicit tag hints, then picks a primary and the set of active sectors.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// SECTOR
// ============================================================================

/// The five cognitive sectors a memory can belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sector {
    /// Events and experiences anchored in time
    Episodic,
    /// Facts and concepts
    #[default]
    Semantic,
    /// How-to knowledge, steps, instructions
    Procedural,
    /// Affect-laden content
    Emotional,
    /// Derived reasoning and self-referential summaries
    Reflective,
}

/// All sectors in routing-priority order (used for tie-breaks:
/// semantic > episodic > procedural > reflective > emotional).
pub const ALL_SECTORS: [Sector; 5] = [
    Sector::Semantic,
    Sector::Episodic,
    Sector::Procedural,
    Sector::Reflective,
    Sector::Emotional,
];

impl Sector {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sector::Episodic => "episodic",
            Sector::Semantic => "semantic",
            Sector::Procedural => "procedural",
            Sector::Emotional => "emotional",
            Sector::Reflective => "reflective",
        }
    }

    /// Parse from string name. Unknown names return `None`.
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "episodic" => Some(Sector::Episodic),
            "semantic" => Some(Sector::Semantic),
            "procedural" => Some(Sector::Procedural),
            "emotional" => Some(Sector::Emotional),
            "reflective" => Some(Sector::Reflective),
            _ => None,
        }
    }

    /// Starting salience for memories routed primarily into this sector.
    pub fn default_salience(&self) -> f64 {
        match self {
            Sector::Episodic => 0.55,
            Sector::Semantic => 0.50,
            Sector::Procedural => 0.50,
            Sector::Emotional => 0.60,
            Sector::Reflective => 0.45,
        }
    }

    /// Per-day exponential decay coefficient. Episodic content fades fastest,
    /// procedural slowest.
    pub fn default_decay_lambda(&self) -> f64 {
        match self {
            Sector::Episodic => 0.120,
            Sector::Semantic => 0.020,
            Sector::Procedural => 0.015,
            Sector::Emotional => 0.080,
            Sector::Reflective => 0.050,
        }
    }
}

impl std::fmt::Display for Sector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// KEYWORD TABLES
// ============================================================================

const EPISODIC_KEYWORDS: &[&str] = &[
    "yesterday", "today", "tomorrow", "morning", "evening", "night", "week",
    "month", "year", "meeting", "visited", "happened", "event", "went",
    "arrived", "during", "session", "conversation", "last", "ago",
];

const SEMANTIC_KEYWORDS: &[&str] = &[
    "is", "are", "was", "were", "means", "defined", "definition", "capital",
    "fact", "known", "consists", "contains", "called", "named", "equals",
    "located", "type", "kind", "category", "property",
];

const PROCEDURAL_KEYWORDS: &[&str] = &[
    "step", "first", "then", "next", "finally", "install", "run", "configure",
    "build", "create", "click", "open", "execute", "press", "how to",
    "instructions", "procedure", "setup", "deploy", "restart",
];

const EMOTIONAL_KEYWORDS: &[&str] = &[
    "love", "hate", "happy", "sad", "angry", "excited", "afraid", "anxious",
    "frustrated", "proud", "grateful", "worried", "upset", "joy", "fear",
    "wonderful", "terrible", "amazing", "awful", "feel",
];

const REFLECTIVE_KEYWORDS: &[&str] = &[
    "i think", "i believe", "i realized", "i learned", "in retrospect",
    "looking back", "insight", "lesson", "pattern", "conclusion", "summary",
    "reflection", "noticed that", "it seems", "my takeaway", "understanding",
];

/// Month names plus numeric forms; presence of a date is a strong episodic cue.
const DATE_TOKENS: &[&str] = &[
    "january", "february", "march", "april", "may", "june", "july", "august",
    "september", "october", "november", "december", "monday", "tuesday",
    "wednesday", "thursday", "friday", "saturday", "sunday",
];

const IMPERATIVE_STARTERS: &[&str] = &[
    "install", "run", "add", "remove", "set", "use", "open", "close", "start",
    "stop", "check", "verify", "update", "create", "delete", "copy", "move",
];

// ============================================================================
// ROUTER
// ============================================================================

/// Result of classifying a text into sectors.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub primary: Sector,
    /// Sectors to embed; always contains `primary`.
    pub active: Vec<Sector>,
}

/// Keyword + heuristic sector classifier.
///
/// In simple mode `active` is just `{primary}`; in advanced mode every sector
/// scoring at least `ADVANCED_THRESHOLD` of the primary's score is included.
#[derive(Debug, Clone)]
pub struct SectorRouter {
    advanced: bool,
}

/// Relative score a sector needs (vs. the primary) to stay active in
/// advanced mode.
const ADVANCED_THRESHOLD: f64 = 0.4;

impl SectorRouter {
    pub fn new(advanced: bool) -> Self {
        Self { advanced }
    }

    /// Classify a memory into a primary sector and the set of active
    /// sectors. Tags and a `"sector"` metadata entry act as explicit hints.
    pub fn classify(
        &self,
        text: &str,
        tags: &[String],
        metadata: &HashMap<String, Value>,
    ) -> Classification {
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered.split_whitespace().collect();
        let token_count = tokens.len().max(1) as f64;

        let mut scores = [0.0f64; 5];
        for (i, sector) in ALL_SECTORS.iter().enumerate() {
            scores[i] = keyword_density(&lowered, *sector) / token_count.sqrt();
        }

        // Structural cues
        if has_date_cue(&lowered, &tokens) {
            scores[idx(Sector::Episodic)] += 0.5;
        }
        if has_procedural_cue(&lowered, &tokens) {
            scores[idx(Sector::Procedural)] += 0.5;
        }
        if has_first_person_reasoning(&lowered) {
            scores[idx(Sector::Reflective)] += 0.5;
        }
        if has_affective_cue(&lowered) {
            scores[idx(Sector::Emotional)] += 0.4;
        }
        if has_factual_assertion(&tokens) {
            scores[idx(Sector::Semantic)] += 0.3;
        }

        // Explicit hints override gently rather than absolutely
        for tag in tags {
            if let Some(sector) = Sector::parse_name(tag) {
                scores[idx(sector)] += 1.0;
            }
        }
        if let Some(sector) = metadata
            .get("sector")
            .and_then(Value::as_str)
            .and_then(Sector::parse_name)
        {
            scores[idx(sector)] += 1.0;
        }

        // Primary = argmax; ALL_SECTORS order encodes the tie-break priority
        let mut primary = Sector::Semantic;
        let mut best = f64::MIN;
        for (i, sector) in ALL_SECTORS.iter().enumerate() {
            if scores[i] > best {
                best = scores[i];
                primary = *sector;
            }
        }

        let active = if self.advanced && best > 0.0 {
            let mut active: Vec<Sector> = ALL_SECTORS
                .iter()
                .enumerate()
                .filter(|(i, _)| scores[*i] >= best * ADVANCED_THRESHOLD && scores[*i] > 0.0)
                .map(|(_, s)| *s)
                .collect();
            if !active.contains(&primary) {
                active.push(primary);
            }
            active
        } else {
            vec![primary]
        };

        Classification { primary, active }
    }
}

fn idx(sector: Sector) -> usize {
    ALL_SECTORS
        .iter()
        .position(|s| *s == sector)
        .unwrap_or(0)
}

fn keyword_table(sector: Sector) -> &'static [&'static str] {
    match sector {
        Sector::Episodic => EPISODIC_KEYWORDS,
        Sector::Semantic => SEMANTIC_KEYWORDS,
        Sector::Procedural => PROCEDURAL_KEYWORDS,
        Sector::Emotional => EMOTIONAL_KEYWORDS,
        Sector::Reflective => REFLECTIVE_KEYWORDS,
    }
}

fn keyword_density(lowered: &str, sector: Sector) -> f64 {
    keyword_table(sector)
        .iter()
        .filter(|kw| contains_word(lowered, kw))
        .count() as f64
}

/// Word-boundary containment check; multi-word keywords fall back to
/// substring matching.
fn contains_word(haystack: &str, word: &str) -> bool {
    if word.contains(' ') {
        return haystack.contains(word);
    }
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|t| t == word)
}

fn has_date_cue(lowered: &str, tokens: &[&str]) -> bool {
    if DATE_TOKENS.iter().any(|d| contains_word(lowered, d)) {
        return true;
    }
    // Numeric dates: 2024-01-15, 15/01/2024, or a bare plausible year
    tokens.iter().any(|t| {
        let digits = t.chars().filter(|c| c.is_ascii_digit()).count();
        (t.contains('-') || t.contains('/')) && digits >= 4
            || (t.len() == 4 && digits == 4 && (t.starts_with("19") || t.starts_with("20")))
    })
}

fn has_procedural_cue(lowered: &str, tokens: &[&str]) -> bool {
    // "step 3" style markers
    if lowered.contains("step ")
        && tokens
            .windows(2)
            .any(|w| w[0].trim_matches(|c: char| !c.is_alphanumeric()) == "step"
                && w[1].chars().next().is_some_and(|c| c.is_ascii_digit()))
    {
        return true;
    }
    // Imperative opening verb
    tokens
        .first()
        .is_some_and(|t| IMPERATIVE_STARTERS.contains(t))
}

fn has_first_person_reasoning(lowered: &str) -> bool {
    REFLECTIVE_KEYWORDS
        .iter()
        .filter(|kw| kw.starts_with("i ") || kw.starts_with("my "))
        .any(|kw| lowered.contains(kw))
}

fn has_affective_cue(lowered: &str) -> bool {
    EMOTIONAL_KEYWORDS
        .iter()
        .filter(|kw| matches!(**kw, "love" | "hate" | "feel" | "afraid" | "joy" | "fear"))
        .any(|kw| contains_word(lowered, kw))
}

/// Copular assertion: "<subject> is/are <complement>" early in the text.
fn has_factual_assertion(tokens: &[&str]) -> bool {
    tokens
        .iter()
        .take(6)
        .any(|t| matches!(*t, "is" | "are" | "was" | "were" | "means"))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn no_meta() -> HashMap<String, Value> {
        HashMap::new()
    }

    #[test]
    fn test_sector_roundtrip() {
        for sector in ALL_SECTORS {
            assert_eq!(Sector::parse_name(sector.as_str()), Some(sector));
        }
        assert_eq!(Sector::parse_name("nonsense"), None);
    }

    #[test]
    fn test_factual_assertion_routes_semantic() {
        let router = SectorRouter::new(false);
        let c = router.classify("Paris is the capital of France", &[], &no_meta());
        assert_eq!(c.primary, Sector::Semantic);
        assert_eq!(c.active, vec![Sector::Semantic]);
    }

    #[test]
    fn test_dates_route_episodic() {
        let router = SectorRouter::new(false);
        let c = router.classify(
            "On Tuesday we visited the data center and the migration happened",
            &[],
            &no_meta(),
        );
        assert_eq!(c.primary, Sector::Episodic);
    }

    #[test]
    fn test_steps_route_procedural() {
        let router = SectorRouter::new(false);
        let c = router.classify(
            "Install the toolchain. Step 1 run the installer, step 2 configure the path",
            &[],
            &no_meta(),
        );
        assert_eq!(c.primary, Sector::Procedural);
    }

    #[test]
    fn test_affect_routes_emotional() {
        let router = SectorRouter::new(false);
        let c = router.classify("I feel so frustrated and angry about the outage", &[], &no_meta());
        assert_eq!(c.primary, Sector::Emotional);
    }

    #[test]
    fn test_first_person_reasoning_routes_reflective() {
        let router = SectorRouter::new(false);
        let c = router.classify(
            "Looking back, I realized the retry loop was the real lesson here",
            &[],
            &no_meta(),
        );
        assert_eq!(c.primary, Sector::Reflective);
    }

    #[test]
    fn test_tag_hint_wins() {
        let router = SectorRouter::new(false);
        let c = router.classify("some neutral text", &["emotional".to_string()], &no_meta());
        assert_eq!(c.primary, Sector::Emotional);
    }

    #[test]
    fn test_metadata_hint_wins() {
        let router = SectorRouter::new(false);
        let mut metadata = HashMap::new();
        metadata.insert("sector".to_string(), Value::String("procedural".to_string()));
        let c = router.classify("some neutral text", &[], &metadata);
        assert_eq!(c.primary, Sector::Procedural);

        // Non-string or unknown hints are ignored
        metadata.insert("sector".to_string(), Value::Bool(true));
        let c = router.classify("some neutral text", &[], &metadata);
        assert_eq!(c.primary, Sector::Semantic);
    }

    #[test]
    fn test_advanced_mode_includes_secondary_sectors() {
        let router = SectorRouter::new(true);
        let c = router.classify(
            "Yesterday morning during the meeting I realized in retrospect the \
             pattern applies",
            &[],
            &no_meta(),
        );
        assert!(c.active.contains(&c.primary));
        assert!(c.active.len() >= 2, "advanced mode should keep runners-up");
        assert!(c.active.contains(&Sector::Episodic));
        assert!(c.active.contains(&Sector::Reflective));
    }

    #[test]
    fn test_active_always_contains_primary() {
        for advanced in [false, true] {
            let router = SectorRouter::new(advanced);
            let c = router.classify("", &[], &no_meta());
            assert!(c.active.contains(&c.primary));
        }
    }

    #[test]
    fn test_tie_break_prefers_semantic() {
        let router = SectorRouter::new(false);
        // No cues at all: every score is zero, priority order decides
        let c = router.classify("zzz qqq", &[], &no_meta());
        assert_eq!(c.primary, Sector::Semantic);
    }
}
