use std::cmp::Ordering;

/// Token-sort similarity in `[0, 1]`.
///
/// Both inputs are lowercased, split on anything that is not a letter or digit,
/// and their tokens sorted before comparing, so word order does not matter.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = sorted_tokens(a).chars().collect();
    let b: Vec<char> = sorted_tokens(b).chars().collect();

    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let common = longest_common_subsequence(&a, &b);
    (2 * common) as f64 / (a.len() + b.len()) as f64
}

fn sorted_tokens(text: &str) -> String {
    let lower = text.to_lowercase();
    let mut tokens: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut row = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            row[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                row[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut row);
    }
    prev[b.len()]
}

/// One run of a filename for numeric-aware ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum NaturalChunk {
    Number(u128),
    Text(String),
}

/// Sort key that orders `"Ep2"` before `"Ep10"`.
pub fn natural_sort_key(text: &str) -> Vec<NaturalChunk> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut in_digits = false;

    for c in text.chars() {
        let is_digit = c.is_ascii_digit();
        if !current.is_empty() && is_digit != in_digits {
            chunks.push(make_chunk(&current, in_digits));
            current.clear();
        }
        in_digits = is_digit;
        current.push(c);
    }
    if !current.is_empty() {
        chunks.push(make_chunk(&current, in_digits));
    }
    chunks
}

fn make_chunk(run: &str, digits: bool) -> NaturalChunk {
    if digits {
        NaturalChunk::Number(run.parse().unwrap_or(u128::MAX))
    } else {
        NaturalChunk::Text(run.to_lowercase())
    }
}

/// Ascending order: most similar to `anchor` first, then natural filename order.
pub fn compare_to_anchor(anchor: &str, a: (&str, &str), b: (&str, &str)) -> Ordering {
    let distance_a = 1.0 - similarity(anchor, a.0);
    let distance_b = 1.0 - similarity(anchor, b.0);
    distance_a
        .total_cmp(&distance_b)
        .then_with(|| natural_sort_key(a.1).cmp(&natural_sort_key(b.1)))
}
