//! Decomposition of a key interval into listable prefixes.
//!
//! Given two canonical keys `lo <= hi` of equal length, [`cover`] returns a
//! set of prefixes such that every key `k` with `lo <= k <= hi` starts with
//! one of them. At full resolution the set is exact (it covers nothing
//! outside the interval) and minimal. When it would need more listing calls
//! than allowed, the interval is re-planned on truncated keys, trading a few
//! out-of-range leaves (skipped later by string comparison) for fewer calls.

/// Characters allowed at `position` of a canonical key, ascending.
fn alphabet(position: usize) -> &'static [u8] {
    if position == 0 { b"NP" } else { b"0123456789" }
}

fn is_min_suffix(key: &[u8], from: usize) -> bool {
    key.iter()
        .enumerate()
        .skip(from)
        .all(|(i, c)| alphabet(i).first() == Some(c))
}

fn is_max_suffix(key: &[u8], from: usize) -> bool {
    key.iter()
        .enumerate()
        .skip(from)
        .all(|(i, c)| alphabet(i).last() == Some(c))
}

fn push(out: &mut Vec<String>, prefix: &[u8], last: Option<u8>) {
    let mut bytes = prefix.to_vec();
    bytes.extend(last);
    out.push(String::from_utf8_lossy(&bytes).into_owned());
}

/// Keys starting with `lo[..depth]` that are `>= lo`.
fn at_least(lo: &[u8], depth: usize, out: &mut Vec<String>) {
    if is_min_suffix(lo, depth) {
        push(out, &lo[..depth], None);
        return;
    }
    at_least(lo, depth.saturating_add(1), out);
    for &c in alphabet(depth).iter().filter(|&&c| c > lo[depth]) {
        push(out, &lo[..depth], Some(c));
    }
}

/// Keys starting with `hi[..depth]` that are `<= hi`.
fn at_most(hi: &[u8], depth: usize, out: &mut Vec<String>) {
    if is_max_suffix(hi, depth) {
        push(out, &hi[..depth], None);
        return;
    }
    for &c in alphabet(depth).iter().filter(|&&c| c < hi[depth]) {
        push(out, &hi[..depth], Some(c));
    }
    at_most(hi, depth.saturating_add(1), out);
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Exact minimal cover of `[lo, hi]` over keys of `lo.len()` characters.
fn exact_cover(lo: &[u8], hi: &[u8]) -> Vec<String> {
    let split = common_prefix_len(lo, hi);
    let mut out = Vec::new();
    if split == lo.len() || (is_min_suffix(lo, split) && is_max_suffix(hi, split)) {
        push(&mut out, &lo[..split], None);
        return out;
    }
    let next = split.saturating_add(1);
    at_least(lo, next, &mut out);
    for &c in alphabet(split)
        .iter()
        .filter(|&&c| c > lo[split] && c < hi[split])
    {
        push(&mut out, &lo[..split], Some(c));
    }
    at_most(hi, next, &mut out);
    out
}

/// Plan the listing prefixes for the inclusive key interval `[lo, hi]`.
///
/// Returns at most `max_calls` prefixes (at least one), in ascending order.
/// An empty string prefix means "everything".
#[must_use]
pub(crate) fn cover(lo: &str, hi: &str, max_calls: usize) -> Vec<String> {
    let (lo, hi) = (lo.as_bytes(), hi.as_bytes());
    let split = common_prefix_len(lo, hi);
    let mut depth = lo.len().min(hi.len());
    while depth > split {
        let plan = exact_cover(&lo[..depth], &hi[..depth]);
        if plan.len() <= max_calls.max(1) {
            return plan;
        }
        depth = depth.saturating_sub(1);
    }
    vec![String::from_utf8_lossy(&lo[..split.min(depth)]).into_owned()]
}
