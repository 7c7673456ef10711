use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;

// Phrases candidates actually use to ask for a question again (EN/FR/ES).
const REPEAT_PHRASES: &[&str] = &[
    "repeat",
    "say again",
    "again please",
    "sorry repeat",
    "could you repeat",
    "can you repeat",
    "can you say that again",
    "could you say that again",
    "would you mind repeating",
    "repeat the question",
    "i didn't catch",
    "i didn't hear",
    "i didn't understand",
    "can you go again",
    "one more time",
    "sorry?",
    "pardon?",
    "répète",
    "répéter",
    "tu peux répéter",
    "vous pouvez répéter",
    "peux-tu répéter",
    "pouvez-vous répéter",
    "tu peux redire",
    "tu peux relire",
    "j'ai pas entendu",
    "j'ai pas compris",
    "je n'ai pas compris",
    "répète stp",
    "désolé ?",
    "excuse moi ?",
    "repite",
    "repita",
    "otra vez",
    "puedes repetir",
    "puede repetir",
    "puedes decirlo otra vez",
    "no entendí",
    "no escuché",
    "no lo entendí",
];

// Single words close enough to these are treated as a repeat request in
// very short utterances ("repeeat?").
const FUZZY_WORDS: &[&str] = &["repeat", "repete", "repeter", "repite", "repita"];

const FUZZY_MAX_WORDS: usize = 4;
const FUZZY_MIN_SCORE: i64 = 90;

fn fold(c: char) -> char {
    match c {
        'à' | 'â' | 'ä' | 'á' | 'ã' => 'a',
        'ç' => 'c',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'î' | 'ï' | 'í' | 'ì' => 'i',
        'ô' | 'ö' | 'ó' | 'ò' | 'õ' => 'o',
        'ù' | 'û' | 'ü' | 'ú' => 'u',
        'ñ' => 'n',
        'ÿ' => 'y',
        '\'' | '’' | '-' => ' ',
        other => other,
    }
}

/// Lowercase, accent-free, apostrophes and hyphens as spaces, single spaced.
pub fn normalize(text: &str) -> String {
    let folded: String = text.to_lowercase().chars().map(fold).collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Detects a "please repeat the question" request in a transcript segment.
pub struct RepeatIntent {
    phrases: Vec<String>,
    matcher: SkimMatcherV2,
}

impl Default for RepeatIntent {
    fn default() -> Self {
        Self::new()
    }
}

impl RepeatIntent {
    pub fn new() -> Self {
        Self {
            phrases: REPEAT_PHRASES.iter().map(|p| normalize(p)).collect(),
            matcher: SkimMatcherV2::default(),
        }
    }

    pub fn detect(&self, segment: &str) -> bool {
        let text = normalize(segment);
        if text.is_empty() {
            return false;
        }
        if self.phrases.iter().any(|p| text.contains(p.as_str())) {
            return true;
        }

        let words: Vec<&str> = text
            .split(' ')
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|w| !w.is_empty())
            .collect();
        if words.len() > FUZZY_MAX_WORDS {
            return false;
        }
        words.iter().any(|word| {
            FUZZY_WORDS.iter().any(|target| {
                word.len() <= target.len() + 2
                    && self
                        .matcher
                        .fuzzy_match(word, target)
                        .is_some_and(|score| score >= FUZZY_MIN_SCORE)
            })
        })
    }
}
