use once_cell::sync::Lazy;
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

static DIACRITICS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\x{064B}-\x{0652}\x{0670}\x{0640}]").unwrap());
static SCRIPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\x{0600}-\x{06FF}\x{0750}-\x{077F}\x{08A0}-\x{08FF}\x{FB50}-\x{FDFF}\x{FE70}-\x{FEFF}a-zA-Z]").unwrap()
});

const ARABIC_PUNCTUATION: &str = "؍؎؏ؘؙؚؐؑؒؓؔؕؖؗ؛؜؝؞؟؀،";

fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation() || ARABIC_PUNCTUATION.contains(c)
}

/// Lower-cased word tokens with tashkeel, tatweel and punctuation removed.
/// Tokens carrying neither Arabic nor Latin letters are dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    let bare = DIACRITICS.replace_all(text, "");
    let spaced: String = bare.chars().map(|c| if is_punctuation(c) { ' ' } else { c }).collect();
    spaced
        .unicode_words()
        .filter(|w| SCRIPT.is_match(w))
        .map(str::to_lowercase)
        .collect()
}
