//! Region text normalization.
//!
//! Spreadsheets arrive with region names typed by hand: mixed case, Turkish
//! dotted and dotless i, stray diacritics and irregular spacing. Everything that
//! is compared against a group's region keys goes through [`normalize_region`]
//! first, on both sides of the comparison.

/// Normalizes a region string for comparison.
///
/// Upper-cases, folds diacritics to their ASCII base letter, drops combining
/// marks, collapses internal whitespace to a single space and trims. Applying it
/// twice yields the same result as applying it once.
pub fn normalize_region(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for ch in text.chars() {
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if is_combining_mark(ch) {
            continue;
        }

        for upper in ch.to_uppercase() {
            if is_combining_mark(upper) {
                continue;
            }
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            match fold_diacritic(upper) {
                Some(folded) => out.push_str(folded),
                None => out.push(upper),
            }
        }
    }

    out
}

/// Returns true when `needle` occurs in `haystack` as a whole word.
///
/// Both arguments are expected to be normalized already. Word boundaries are
/// the string edges or any non-alphanumeric character, so `IL` matches
/// `IL ADI` and `SEHIR/IL` but not `EMAIL`.
pub fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }

    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let begin = start + pos;
        let end = begin + needle.len();

        let before_ok = haystack[..begin]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());

        if before_ok && after_ok {
            return true;
        }

        // Advance by one character past the match start.
        start = begin
            + haystack[begin..]
                .chars()
                .next()
                .map_or(1, |c| c.len_utf8());
    }

    false
}

fn is_combining_mark(ch: char) -> bool {
    matches!(ch as u32, 0x0300..=0x036F)
}

/// Maps an upper-case letter with a diacritic to its ASCII base.
fn fold_diacritic(ch: char) -> Option<&'static str> {
    let folded = match ch {
        // Turkish
        'İ' => "I",
        'Ğ' => "G",
        'Ş' => "S",
        'Ç' => "C",
        'Ö' => "O",
        'Ü' => "U",
        // Latin-1 supplement
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => "A",
        'Æ' => "AE",
        'È' | 'É' | 'Ê' | 'Ë' => "E",
        'Ì' | 'Í' | 'Î' | 'Ï' => "I",
        'Ð' => "D",
        'Ñ' => "N",
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ø' => "O",
        'Ù' | 'Ú' | 'Û' => "U",
        'Ý' | 'Ÿ' => "Y",
        'Þ' => "TH",
        // Latin Extended-A
        'Ā' | 'Ă' | 'Ą' => "A",
        'Ć' | 'Ĉ' | 'Ċ' | 'Č' => "C",
        'Ď' | 'Đ' => "D",
        'Ē' | 'Ĕ' | 'Ė' | 'Ę' | 'Ě' => "E",
        'Ĝ' | 'Ġ' | 'Ģ' => "G",
        'Ĥ' | 'Ħ' => "H",
        'Ĩ' | 'Ī' | 'Ĭ' | 'Į' => "I",
        'Ĵ' => "J",
        'Ķ' => "K",
        'Ĺ' | 'Ļ' | 'Ľ' | 'Ŀ' | 'Ł' => "L",
        'Ń' | 'Ņ' | 'Ň' => "N",
        'Ō' | 'Ŏ' | 'Ő' => "O",
        'Œ' => "OE",
        'Ŕ' | 'Ŗ' | 'Ř' => "R",
        'Ś' | 'Ŝ' | 'Š' => "S",
        'Ţ' | 'Ť' | 'Ŧ' => "T",
        'Ũ' | 'Ū' | 'Ŭ' | 'Ů' | 'Ű' | 'Ų' => "U",
        'Ŵ' => "W",
        'Ŷ' => "Y",
        'Ź' | 'Ż' | 'Ž' => "Z",
        _ => return None,
    };
    Some(folded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turkish_letters_fold() {
        assert_eq!(normalize_region("İstanbul"), "ISTANBUL");
        assert_eq!(normalize_region("istanbul"), "ISTANBUL");
        assert_eq!(normalize_region("Şanlıurfa"), "SANLIURFA");
        assert_eq!(normalize_region("Çanakkale"), "CANAKKALE");
        assert_eq!(normalize_region("Muğla"), "MUGLA");
        assert_eq!(normalize_region("Gümüşhane"), "GUMUSHANE");
        assert_eq!(normalize_region("Kırıkkale"), "KIRIKKALE");
        assert_eq!(normalize_region("ÇORUM"), "CORUM");
    }

    #[test]
    fn test_whitespace_collapsed_and_trimmed() {
        assert_eq!(normalize_region("  afyon   karahisar \t"), "AFYON KARAHISAR");
        assert_eq!(normalize_region("\n"), "");
        assert_eq!(normalize_region(""), "");
    }

    #[test]
    fn test_combining_marks_dropped() {
        // "I" followed by COMBINING DOT ABOVE
        assert_eq!(normalize_region("I\u{0307}zmir"), "IZMIR");
        assert_eq!(normalize_region("e\u{0301}"), "E");
    }

    #[test]
    fn test_latin_diacritics_fold() {
        assert_eq!(normalize_region("Zürich"), "ZURICH");
        assert_eq!(normalize_region("Kraków"), "KRAKOW");
        assert_eq!(normalize_region("Łódź"), "LODZ");
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "İstanbul",
            "  şanlı   urfa ",
            "Kahramanmaraş",
            "ığüşöç İĞÜŞÖÇ",
            "Straße",
            "e\u{0301}\u{0301}x",
            "MIXED case\tText",
        ];
        for s in samples {
            let once = normalize_region(s);
            assert_eq!(normalize_region(&once), once, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn test_contains_word_boundaries() {
        assert!(contains_word("IL", "IL"));
        assert!(contains_word("IL ADI", "IL"));
        assert!(contains_word("SEHIR/IL", "IL"));
        assert!(contains_word("MUSTERI_IL", "IL"));
        assert!(!contains_word("EMAIL", "IL"));
        assert!(!contains_word("ILCE", "IL"));
        assert!(contains_word("TESLIM YERI ANKARA", "ANKARA"));
        assert!(!contains_word("ANY", ""));
    }

    #[test]
    fn test_contains_word_finds_later_occurrence() {
        assert!(contains_word("EMAIL IL", "IL"));
    }
}
