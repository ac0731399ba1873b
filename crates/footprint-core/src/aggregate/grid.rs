//! Complete-grid zero fill.
//!
//! Turns a partial mapping over `(row, col)` keys into a total one over the
//! full Cartesian product, defaulting missing cells. Knows nothing about
//! geometry or draws.

use std::collections::BTreeMap;

/// Total mapping over `rows × cols`. Entries of `partial` whose key lies
/// outside the product are dropped.
pub fn zero_fill<R, C, V>(rows: &[R], cols: &[C], partial: &BTreeMap<(R, C), V>) -> BTreeMap<(R, C), V>
where
    R: Ord + Clone,
    C: Ord + Clone,
    V: Clone + Default,
{
    let mut out = BTreeMap::new();
    for r in rows {
        for c in cols {
            let key = (r.clone(), c.clone());
            let v = partial.get(&key).cloned().unwrap_or_default();
            out.insert(key, v);
        }
    }
    out
}
