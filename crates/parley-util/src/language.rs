//! Lightweight language guessing for messages that arrive without a declared
//! language. Non-Latin scripts are identified by code point ranges; Latin
//! text is scored against short stopword lists.

/// Minimum number of letters before a guess is attempted.
const MIN_LETTERS: usize = 3;

const STOPWORDS: &[(&str, &[&str])] = &[
    (
        "en",
        &[
            "the", "and", "is", "are", "you", "to", "of", "in", "it", "that", "this", "with",
            "for", "have", "what", "was", "not", "hello", "thanks", "see",
        ],
    ),
    (
        "fr",
        &[
            "le", "la", "les", "et", "est", "un", "une", "je", "tu", "vous", "nous", "pas",
            "des", "du", "pour", "avec", "bonjour", "merci", "que", "oui",
        ],
    ),
    (
        "es",
        &[
            "el", "los", "las", "y", "es", "un", "una", "yo", "que", "por", "para", "con",
            "hola", "gracias", "pero", "como", "muy", "del", "sí", "está",
        ],
    ),
    (
        "de",
        &[
            "der", "die", "das", "und", "ist", "nicht", "ich", "du", "wir", "ein", "eine",
            "mit", "für", "auf", "hallo", "danke", "auch", "sie", "sind", "zu",
        ],
    ),
    (
        "it",
        &[
            "il", "lo", "gli", "e", "è", "di", "che", "non", "sono", "un", "una", "per",
            "con", "ciao", "grazie", "anche", "questo", "della", "molto", "come",
        ],
    ),
    (
        "pt",
        &[
            "o", "os", "as", "e", "é", "um", "uma", "eu", "você", "não", "que", "para",
            "com", "olá", "obrigado", "muito", "do", "da", "em", "sim",
        ],
    ),
    (
        "nl",
        &[
            "de", "het", "een", "en", "is", "niet", "ik", "jij", "wij", "van", "met", "voor",
            "op", "hallo", "dank", "ook", "zijn", "maar", "dat", "wat",
        ],
    ),
];

fn script_language(c: char) -> Option<&'static str> {
    match c as u32 {
        0xAC00..=0xD7AF | 0x1100..=0x11FF => Some("ko"),
        0x3040..=0x30FF => Some("ja"),
        0x4E00..=0x9FFF | 0x3400..=0x4DBF => Some("zh"),
        0x0400..=0x04FF => Some("ru"),
        0x0600..=0x06FF => Some("ar"),
        0x0590..=0x05FF => Some("he"),
        0x0370..=0x03FF => Some("el"),
        0x0E00..=0x0E7F => Some("th"),
        0x0900..=0x097F => Some("hi"),
        _ => None,
    }
}

fn strip_noise(text: &str) -> String {
    text.split_whitespace()
        .filter(|word| {
            !(word.starts_with('@')
                || word.starts_with("http://")
                || word.starts_with("https://")
                || word.starts_with("[[")
                || word.starts_with('<'))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Guess the ISO 639-1 code of `text`, or `None` when there is not enough
/// signal.
pub fn detect_language(text: &str) -> Option<&'static str> {
    let cleaned = strip_noise(text);
    let letters = cleaned.chars().filter(|c| c.is_alphabetic()).count();
    if letters < MIN_LETTERS {
        return None;
    }

    let mut script_counts: Vec<(&'static str, usize)> = Vec::new();
    for lang in cleaned.chars().filter_map(script_language) {
        match script_counts.iter_mut().find(|(l, _)| *l == lang) {
            Some((_, count)) => *count += 1,
            None => script_counts.push((lang, 1)),
        }
    }
    // Kana marks Japanese even when kanji dominate.
    if script_counts.iter().any(|(l, _)| *l == "ja") {
        return Some("ja");
    }
    if let Some((lang, count)) = script_counts.iter().max_by_key(|(_, count)| *count) {
        if count * 2 >= letters {
            return Some(*lang);
        }
    }

    let lowered = cleaned.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .collect();

    let mut best: Option<(&'static str, usize)> = None;
    let mut tied = false;
    for (lang, stopwords) in STOPWORDS {
        let score = words
            .iter()
            .filter(|w| stopwords.iter().any(|s| *s == **w))
            .count()
            + diacritic_bonus(lang, &lowered);
        match best {
            Some((_, top)) if score == top => tied = true,
            Some((_, top)) if score < top => {}
            _ if score > 0 => {
                best = Some((*lang, score));
                tied = false;
            }
            _ => {}
        }
    }
    match best {
        Some((lang, _)) if !tied => Some(lang),
        _ => None,
    }
}

fn diacritic_bonus(lang: &str, text: &str) -> usize {
    let markers: &[char] = match lang {
        "es" => &['ñ', '¿', '¡'],
        "de" => &['ß', 'ä', 'ö', 'ü'],
        "pt" => &['ã', 'õ'],
        "fr" => &['ç', 'è', 'ê', 'ë', 'œ'],
        _ => &[],
    };
    text.chars().filter(|c| markers.contains(c)).count()
}

#[cfg(test)]
mod tests {
    use super::detect_language;

    #[test]
    fn detects_latin_languages() {
        assert_eq!(detect_language("Hello, how are you? This is the plan"), Some("en"));
        assert_eq!(detect_language("Bonjour, je pense que c'est pour vous"), Some("fr"));
        assert_eq!(detect_language("Hola, gracias por todo, está muy bien"), Some("es"));
        assert_eq!(detect_language("Hallo, ich bin nicht müde und du?"), Some("de"));
    }

    #[test]
    fn detects_scripts() {
        assert_eq!(detect_language("Привет, как дела?"), Some("ru"));
        assert_eq!(detect_language("こんにちは世界"), Some("ja"));
        assert_eq!(detect_language("你好世界朋友"), Some("zh"));
        assert_eq!(detect_language("안녕하세요 친구"), Some("ko"));
    }

    #[test]
    fn ignores_links_and_mentions() {
        assert_eq!(detect_language("@bob https://example.com"), None);
        assert_eq!(detect_language("ok"), None);
    }

    #[test]
    fn no_signal_returns_none() {
        assert_eq!(detect_language("xyzzy plugh"), None);
    }
}
