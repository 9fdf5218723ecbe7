//! Metadata normalization
//!
//! Canonicalizes raw artist/album/title strings so that spelling variants of
//! the same recording compare equal. Every function here is pure, total and
//! idempotent: `normalize(&normalize(x)) == normalize(x)`.
//!
//! **Algorithm** (order matters):
//! 1. Unicode canonical decomposition (NFD), combining marks dropped
//! 2. Case-fold
//! 3. Tokenize: apostrophes vanish, `&` becomes `and`, any other
//!    non-alphanumeric character separates tokens, a few non-decomposable
//!    Latin letters are folded (`ß` → `ss`, `ø` → `o`, ...)
//! 4. Leading definite article dropped (`the beatles` → `beatles`); the
//!    trailing form (`beatles, the`) reduces to the same key
//! 5. Featuring credits dropped: the first `feat`/`ft`/`featuring` token and
//!    everything after it are removed from the key
//! 6. Tokens joined with single spaces

use crate::models::NormalizedMetadata;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Tokens that open a featuring credit
const FEATURING_MARKERS: [&str; 3] = ["feat", "ft", "featuring"];

const DEFINITE_ARTICLE: &str = "the";

/// "Beatles, The" / "Dandy Warhols (The)"
static TRAILING_ARTICLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*\S)\s*(?:,\s*the|\(\s*the\s*\))\s*$").unwrap());

/// Runs of path separators
static REPEATED_SLASHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"/{2,}").unwrap());

/// Normalize one metadata field
pub fn normalize(raw: &str) -> String {
    let folded: String = raw.nfd().filter(|c| !is_combining_mark(*c)).collect();
    let lowered = folded.to_lowercase();

    let without_trailing_article = match TRAILING_ARTICLE.captures(&lowered) {
        Some(caps) => caps[1].to_string(),
        None => lowered,
    };

    let mut tokens = tokenize(&without_trailing_article);

    // Keep a lone "the": the band "The The" must not normalize to nothing
    while tokens.len() > 1 && tokens[0] == DEFINITE_ARTICLE {
        tokens.remove(0);
    }

    if let Some(pos) = tokens
        .iter()
        .position(|t| FEATURING_MARKERS.contains(&t.as_str()))
    {
        if pos > 0 {
            tokens.truncate(pos);
        }
    }

    tokens.join(" ")
}

/// Normalize the artist/album/title triple
pub fn normalize_metadata(artist: &str, album: &str, title: &str) -> NormalizedMetadata {
    NormalizedMetadata {
        artist: normalize(artist),
        album: normalize(album),
        title: normalize(title),
    }
}

/// Canonical form of a global recording identifier
///
/// Uppercased with whitespace and hyphens removed, so `us-abc-12-34567` and
/// `USABC1234567` agree. Blank identifiers are absent.
pub fn normalize_global_id(raw: &str) -> Option<String> {
    let id: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .flat_map(char::to_uppercase)
        .collect();

    (!id.is_empty()).then_some(id)
}

/// Canonical form of a source file path for exact comparison
///
/// Backslashes become slashes, repeated separators collapse, and a trailing
/// separator is dropped. Case is preserved. Blank paths are absent.
pub fn normalize_path(raw: &str) -> Option<String> {
    let forward = raw.trim().replace('\\', "/");
    let collapsed = REPEATED_SLASHES.replace_all(&forward, "/");
    let trimmed = if collapsed.len() > 1 {
        collapsed.trim_end_matches('/')
    } else {
        collapsed.as_ref()
    };

    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        match c {
            '\'' | '\u{2019}' | '\u{2018}' | '\u{02BC}' | '`' => {}
            '&' => {
                flush(&mut current, &mut tokens);
                tokens.push("and".to_string());
            }
            c if is_combining_mark(c) => {}
            c if c.is_alphanumeric() => match fold_letter(c) {
                Some(replacement) => current.push_str(replacement),
                None => current.push(c),
            },
            _ => flush(&mut current, &mut tokens),
        }
    }
    flush(&mut current, &mut tokens);

    tokens
}

fn flush(current: &mut String, tokens: &mut Vec<String>) {
    if !current.is_empty() {
        tokens.push(std::mem::take(current));
    }
}

/// Latin letters that have no canonical decomposition
fn fold_letter(c: char) -> Option<&'static str> {
    match c {
        'ß' => Some("ss"),
        'æ' => Some("ae"),
        'œ' => Some("oe"),
        'ø' => Some("o"),
        'đ' | 'ð' => Some("d"),
        'ł' => Some("l"),
        'þ' => Some("th"),
        'ı' => Some("i"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_article_insensitive() {
        assert_eq!(normalize("The Beatles"), normalize("beatles"));
        assert_eq!(normalize("Beatles, The"), "beatles");
        assert_eq!(normalize("Dandy Warhols (The)"), "dandy warhols");
    }

    #[test]
    fn test_lone_article_is_kept() {
        assert_eq!(normalize("The The"), "the");
        assert_eq!(normalize("The"), "the");
    }

    #[test]
    fn test_diacritic_insensitive() {
        assert_eq!(normalize("Beyoncé"), normalize("beyonce"));
        assert_eq!(normalize("Motörhead"), "motorhead");
        assert_eq!(normalize("Sigur Rós"), "sigur ros");
    }

    #[test]
    fn test_non_decomposable_letters_fold() {
        assert_eq!(normalize("Straße"), "strasse");
        assert_eq!(normalize("Mø"), "mo");
        assert_eq!(normalize("Ærø"), "aero");
    }

    #[test]
    fn test_case_and_whitespace() {
        assert_eq!(normalize("  Come   TOGETHER \t"), "come together");
        assert_eq!(normalize("come together"), "come together");
    }

    #[test]
    fn test_punctuation_separates_and_apostrophes_vanish() {
        assert_eq!(normalize("AC/DC"), "ac dc");
        assert_eq!(normalize("Don't Stop"), "dont stop");
        assert_eq!(normalize("Don’t Stop"), "dont stop");
        assert_eq!(normalize("Simon & Garfunkel"), normalize("Simon and Garfunkel"));
    }

    #[test]
    fn test_featuring_variants_share_a_key() {
        let expected = normalize("Crazy in Love");
        assert_eq!(normalize("Crazy in Love (feat. Jay-Z)"), expected);
        assert_eq!(normalize("Crazy in Love ft. Jay-Z"), expected);
        assert_eq!(normalize("Crazy in Love [Featuring Jay-Z]"), expected);

        assert_eq!(normalize("Beyoncé feat. Jay-Z"), "beyonce");
    }

    #[test]
    fn test_featuring_marker_alone_is_kept() {
        assert_eq!(normalize("Feat"), "feat");
        assert_eq!(normalize("Ft. Knox"), "ft knox");
    }

    #[test]
    fn test_unparseable_input_degrades_to_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("!!! ???"), "");
        assert_eq!(normalize("\u{0301}"), "");
    }

    #[test]
    fn test_non_latin_text_survives() {
        assert_eq!(normalize("Кино"), "кино");
        assert_eq!(normalize("坂本 龍一"), "坂本 龍一");
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "The Beatles",
            "Beyoncé feat. Jay-Z",
            "  The  the ",
            "Beatles, The",
            "the feat. the y",
            "İstanbul",
            "AC/DC & Friends (Live)",
            "Guns N' Roses",
            "",
            "Ærø – Straße",
        ];
        for sample in samples {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", sample);
        }
    }

    #[test]
    fn test_normalize_metadata() {
        let meta = normalize_metadata("The Beatles", "Abbey Road", "Come Together");
        assert_eq!(meta.artist, "beatles");
        assert_eq!(meta.album, "abbey road");
        assert_eq!(meta.title, "come together");
    }

    #[test]
    fn test_global_id_normalization() {
        assert_eq!(normalize_global_id("us-abc-12-34567").as_deref(), Some("USABC1234567"));
        assert_eq!(normalize_global_id(" USABC1234567 ").as_deref(), Some("USABC1234567"));
        assert!(normalize_global_id("  ").is_none());
        assert!(normalize_global_id("--").is_none());
    }

    #[test]
    fn test_path_normalization() {
        assert_eq!(
            normalize_path("C:\\Music\\\\Beatles\\come.flac").as_deref(),
            Some("C:/Music/Beatles/come.flac")
        );
        assert_eq!(normalize_path("/music//beatles/").as_deref(), Some("/music/beatles"));
        assert_eq!(normalize_path("/").as_deref(), Some("/"));
        assert!(normalize_path("   ").is_none());
    }
}
