//! Ratcliff-Obershelp similarity used to suggest the closest rule token
//! when a line matches nothing.

/// `2 * M / (|a| + |b|)` where `M` counts characters in matching blocks.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_characters(&a, &b) as f64 / total as f64
}

fn matching_characters(a: &[char], b: &[char]) -> usize {
    let (i, j, size) = longest_match(a, b);
    if size == 0 {
        return 0;
    }
    size + matching_characters(&a[..i], &b[..j])
        + matching_characters(&a[i + size..], &b[j + size..])
}

/// Leftmost longest common block as `(start_a, start_b, len)`.
fn longest_match(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for i in 0..a.len() {
        for j in 0..b.len() {
            curr[j + 1] = if a[i] == b[j] { prev[j] + 1 } else { 0 };
            if curr[j + 1] > best.2 {
                best = (i + 1 - curr[j + 1], j + 1 - curr[j + 1], curr[j + 1]);
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    best
}

/// Best-scoring token for `line`, compared against every window of the
/// line with as many words as the token. Only scores strictly above
/// `threshold` qualify.
pub fn suggest<'a>(line: &str, tokens: &[&'a str], threshold: f64) -> Option<&'a str> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let mut best: Option<(&str, f64)> = None;
    for &token in tokens {
        let width = token.split_whitespace().count().max(1);
        let score = if words.len() < width {
            ratio(&words.join(" "), token)
        } else {
            words
                .windows(width)
                .map(|w| ratio(&w.join(" "), token))
                .fold(0.0, f64::max)
        };
        if score > threshold && best.is_none_or(|(_, s)| score > s) {
            best = Some((token, score));
        }
    }
    best.map(|(token, _)| token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_and_disjoint_strings() {
        assert_eq!(ratio("binds", "binds"), 1.0);
        assert_eq!(ratio("abc", "xyz"), 0.0);
        assert_eq!(ratio("", ""), 1.0);
    }

    #[test]
    fn ratio_matches_reference_values() {
        assert!((ratio("abcd", "bcdef") - 6.0 / 9.0).abs() < 1e-12);
        assert!((ratio("phosphorylats", "phosphorylates") - 26.0 / 27.0).abs() < 1e-12);
    }

    #[test]
    fn suggests_closest_token_above_threshold() {
        let tokens = ["phosphorylates", "dephosphorylates", "binds"];
        assert_eq!(suggest("Raf phosphorylats MEK --> MEKp", &tokens, 0.7), Some("phosphorylates"));
        assert_eq!(suggest("completely unrelated words", &tokens, 0.7), None);
    }

    #[test]
    fn multi_word_tokens_use_word_windows() {
        let tokens = ["is dimerized", "forms a complex with"];
        assert_eq!(
            suggest("A form a complex with B --> AB", &tokens, 0.7),
            Some("forms a complex with")
        );
    }
}
