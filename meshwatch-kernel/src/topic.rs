//! Matching des topics MQTT avec wildcards `+` et `#`.
//!
//! Comparaison segment par segment (pas de glob shell) :
//! - `+` consomme exactement un segment, qui doit exister
//! - `#` consomme le reste (zéro segment inclus), seulement en dernière position
//! - un pattern vide accepte tout

/// Vérifie si `topic` correspond au `pattern`.
pub fn matches(topic: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return true;
    }
    let topic_parts: Vec<&str> = if topic.is_empty() {
        Vec::new()
    } else {
        topic.split('/').collect()
    };
    let pattern_parts: Vec<&str> = pattern.split('/').collect();
    match_segments(&topic_parts, &pattern_parts)
}

/// Vrai si la liste est vide ou si un des patterns correspond.
pub fn matches_any<S: AsRef<str>>(topic: &str, patterns: &[S]) -> bool {
    patterns.is_empty() || patterns.iter().any(|p| matches(topic, p.as_ref()))
}

fn match_segments(topic: &[&str], pattern: &[&str]) -> bool {
    match (pattern.split_first(), topic.split_first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        // `#` n'est légal qu'en dernier segment
        (Some((&"#", rest)), _) => rest.is_empty(),
        (Some(_), None) => false,
        (Some((&"+", p_rest)), Some((_, t_rest))) => match_segments(t_rest, p_rest),
        (Some((literal, p_rest)), Some((segment, t_rest))) => {
            literal == segment && match_segments(t_rest, p_rest)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_matches_everything() {
        for topic in ["", "a", "a/b", "msh/US/2/json/LongFast/!abcd", "/"] {
            assert!(matches(topic, "#"), "topic {topic:?}");
        }
    }

    #[test]
    fn test_empty_pattern_matches_everything() {
        assert!(matches("msh/US/2/json", ""));
        assert!(matches("", ""));
    }

    #[test]
    fn test_plus_matches_exactly_one_segment() {
        assert!(matches("a/b", "a/+"));
        assert!(!matches("a/b/c", "a/+"));
        assert!(!matches("a", "a/+"));
        assert!(matches("msh/US/2/json/LongFast", "msh/+/2/json/+"));
    }

    #[test]
    fn test_trailing_hash_accepts_parent_and_children() {
        assert!(matches("a", "a/#"));
        assert!(matches("a/b", "a/#"));
        assert!(matches("a/b/c", "a/#"));
        assert!(!matches("b/c", "a/#"));
    }

    #[test]
    fn test_hash_not_last_never_matches() {
        assert!(!matches("a/b/c", "a/#/c"));
    }

    #[test]
    fn test_literal_segments() {
        assert!(matches("msh/US/2/json", "msh/US/2/json"));
        assert!(!matches("msh/EU/2/json", "msh/US/2/json"));
        assert!(!matches("msh/US/2/json/extra", "msh/US/2/json"));
        assert!(!matches("msh/US", "msh/US/2/json"));
    }

    #[test]
    fn test_longer_topics_never_match_without_hash() {
        let patterns = ["a/+/c", "a/b", "+", "+/+"];
        for pattern in patterns {
            let depth = pattern.split('/').count();
            let topic = vec!["x"; depth + 1].join("/");
            assert!(!matches(&topic, pattern), "{topic} vs {pattern}");
        }
    }

    #[test]
    fn test_matches_any() {
        let none: [&str; 0] = [];
        assert!(matches_any("whatever", &none));
        assert!(matches_any("msh/US/2/json/x", &["other/#", "msh/#"]));
        assert!(!matches_any("msh/US", &["other/#"]));
    }
}
