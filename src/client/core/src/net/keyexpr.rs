//! Intersection of path expressions with wildcards.
//!
//! `*` matches any part of one segment, `**` matches zero or more whole
//! segments. Two expressions intersect when at least one concrete path
//! matches both.

const SEPARATOR: char = '/';
const MULTI: &str = "**";

/// True if some concrete path matches both `a` and `b`.
pub fn intersect(a: &str, b: &str) -> bool {
    let a: Vec<&str> = a.split(SEPARATOR).collect();
    let b: Vec<&str> = b.split(SEPARATOR).collect();
    segments_intersect(&a, &b)
}

/// True if the concrete `path` matches `expr`.
pub fn matches(expr: &str, path: &str) -> bool {
    intersect(expr, path)
}

/// `table[i][j]` holds whether `a[i..]` and `b[j..]` intersect, filled from
/// the ends so each pair of suffixes is decided once.
fn segments_intersect(a: &[&str], b: &[&str]) -> bool {
    let (n, m) = (a.len(), b.len());
    let mut table = vec![vec![false; m + 1]; n + 1];
    table[n][m] = true;
    for i in (0..=n).rev() {
        for j in (0..=m).rev() {
            if i == n && j == m {
                continue;
            }
            table[i][j] = match (a.get(i), b.get(j)) {
                (Some(&MULTI), _) => table[i + 1][j] || (j < m && table[i][j + 1]),
                (_, Some(&MULTI)) => table[i][j + 1] || (i < n && table[i + 1][j]),
                (Some(x), Some(y)) => chunk_intersect(x, y) && table[i + 1][j + 1],
                _ => false,
            };
        }
    }
    table[0][0]
}

fn chunk_intersect(a: &str, b: &str) -> bool {
    match (a.contains('*'), b.contains('*')) {
        (false, false) => a == b,
        (true, false) => glob_match(a, b),
        (false, true) => glob_match(b, a),
        (true, true) => {
            // Both sides are patterns: compatible if their fixed prefixes and suffixes agree.
            let (pa, sa) = fixed_ends(a);
            let (pb, sb) = fixed_ends(b);
            (pa.starts_with(pb) || pb.starts_with(pa)) && (sa.ends_with(sb) || sb.ends_with(sa))
        }
    }
}

fn fixed_ends(pattern: &str) -> (&str, &str) {
    let first = pattern.find('*').unwrap_or(pattern.len());
    let last = pattern.rfind('*').map_or(pattern.len(), |i| i + 1);
    (&pattern[..first], &pattern[last..])
}

fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    let (first, rest) = match parts.split_first() {
        Some(split) => split,
        None => return text.is_empty(),
    };
    let Some(mut remaining) = text.strip_prefix(first) else {
        return false;
    };
    let Some((last, middle)) = rest.split_last() else {
        return remaining.is_empty();
    };
    for part in middle {
        match remaining.find(part) {
            Some(i) => remaining = &remaining[i + part.len()..],
            None => return false,
        }
    }
    remaining.len() >= last.len() && remaining.ends_with(last)
}
