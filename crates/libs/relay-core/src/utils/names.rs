//! Memorable agent name generation.
//!
//! Auto-generated identities follow the Adjective+Noun convention
//! (BlueLake, GreenCastle) so humans can tell agents apart at a glance.
//! Collision handling appends a numeric suffix after the combination
//! space is exhausted for a project.

use rand::Rng;
use rand::seq::SliceRandom;

const ADJECTIVES: &[&str] = &[
    "Blue", "Green", "Red", "Amber", "Silver", "Golden", "Violet", "Crimson", "Jade", "Ivory",
    "Cobalt", "Coral", "Slate", "Copper", "Misty", "Bright", "Quiet", "Swift", "Bold", "Calm",
];

const NOUNS: &[&str] = &[
    "Lake", "Castle", "River", "Harbor", "Forest", "Meadow", "Summit", "Canyon", "Island",
    "Valley", "Bridge", "Garden", "Beacon", "Falcon", "Otter", "Heron", "Badger", "Cedar",
    "Willow", "Pond",
];

/// Generate a memorable candidate name.
pub fn generate_name() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).unwrap_or(&"Blue");
    let noun = NOUNS.choose(&mut rng).unwrap_or(&"Lake");
    format!("{adjective}{noun}")
}

/// Generate a candidate avoiding the given taken names; falls back to a
/// numeric suffix when random draws keep colliding.
pub fn generate_unique_name(taken: &[String]) -> String {
    for _ in 0..24 {
        let candidate = generate_name();
        if !taken.iter().any(|t| t.eq_ignore_ascii_case(&candidate)) {
            return candidate;
        }
    }
    // Combination space crowded for this project; disambiguate.
    let base = generate_name();
    let suffix: u32 = rand::thread_rng().gen_range(2..1000);
    format!("{base}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_name_shape() {
        let name = generate_name();
        assert!(crate::utils::validation::agent_name_is_valid(&name));
        assert!(name.chars().next().is_some_and(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn test_unique_name_avoids_taken() {
        let taken: Vec<String> = Vec::new();
        let name = generate_unique_name(&taken);
        assert!(!name.is_empty());

        // With every bare combination taken, a suffix must appear.
        let mut all: Vec<String> = Vec::new();
        for a in ADJECTIVES {
            for n in NOUNS {
                all.push(format!("{a}{n}"));
            }
        }
        let name = generate_unique_name(&all);
        assert!(name.chars().any(|c| c.is_ascii_digit()));
    }
}
