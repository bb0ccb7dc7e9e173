//! Human-friendly room ids.

use rand::{seq::SliceRandom, Rng};

const ADJECTIVES: &[&str] = &[
    "swift", "silent", "hidden", "clever", "brave", "sharp", "shadow", "crimson", "bright",
    "quiet", "loud", "happy", "dark", "evil", "good", "intelligent", "lovely", "mysterious",
    "peaceful", "powerful", "pure", "shiny", "sleepy", "strong", "sweet", "tall", "warm",
    "gentle", "kind", "nice", "polite", "rough", "rude", "scary", "shy", "silly", "smart",
    "strange", "tough", "ugly", "vivid", "wicked", "wise", "young",
];

const NOUNS: &[&str] = &[
    "fox", "river", "stone", "cipher", "link", "comet", "falcon", "signal", "anchor", "spark",
    "rocket", "snake", "snail", "shark", "elephant", "cat", "dog", "whale", "orca", "cactus",
    "flower", "frog", "toad", "apple", "strawberry", "raspberry", "lemon", "bot", "gopher",
    "dinosaur", "racoon", "penguin", "chameleon", "atom", "particle", "witch", "wizard",
    "warlock", "deer",
];

/// Longest base accepted from a user-supplied room name.
pub const MAX_NAME_LEN: usize = 48;

/// Normalize a requested room name into an id base.
///
/// Lowercases, turns whitespace into `-`, keeps only `[a-z0-9_-]`,
/// collapses runs of `-` and trims them from both ends. May return an
/// empty string.
pub fn sanitize_room_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase) {
        let c = if c.is_whitespace() { '-' } else { c };
        if !(c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            continue;
        }
        if c == '-' && (out.is_empty() || out.ends_with('-')) {
            continue;
        }
        out.push(c);
        if out.len() >= MAX_NAME_LEN {
            break;
        }
    }
    out.trim_end_matches('-').to_string()
}

pub fn random_base<R: Rng + ?Sized>(rng: &mut R) -> String {
    let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("quiet");
    let noun = NOUNS.choose(rng).copied().unwrap_or("signal");
    format!("{adjective}-{noun}")
}

/// Append a random three-digit suffix to `base`.
pub fn with_suffix<R: Rng + ?Sized>(rng: &mut R, base: &str) -> String {
    format!("{base}-{}", rng.gen_range(100..=999))
}
