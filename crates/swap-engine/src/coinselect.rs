//! Minimal-cardinality utxo selection.
//!
//! Combinations are tried by increasing size over the value-descending
//! utxo list; the first whose sum lands in `[target, target * 10]` wins.
//! Branches that cannot land in that range are pruned, and the search stops
//! after a fixed number of steps. When no combination fits, the smallest
//! single utxo above the target is used, then the largest utxos in turn
//! until the target is covered. Inputs must already be unblinded.

use lwk_wollet::elements::AssetId;

use crate::error::{Error, Result};
use crate::wallet::Utxo;

/// Upper bound on the selected sum, as a multiple of the target.
pub const MAX_OVERSHOOT: u64 = 10;

/// Search steps allowed before giving up on an in-range combination.
pub const MAX_SEARCH_STEPS: usize = 100_000;

#[derive(Debug, Clone, PartialEq)]
pub struct CoinSelection {
    pub utxos: Vec<Utxo>,
    pub change: u64,
}

pub fn select(utxos: &[Utxo], target: u64, asset: AssetId) -> Result<CoinSelection> {
    if target == 0 {
        return Ok(CoinSelection {
            utxos: Vec::new(),
            change: 0,
        });
    }

    let mut candidates: Vec<&Utxo> = utxos.iter().filter(|u| u.asset == asset).collect();
    candidates.sort_by(|a, b| b.value.cmp(&a.value));
    let values: Vec<u64> = candidates.iter().map(|u| u.value).collect();

    let upper = target as u128 * MAX_OVERSHOOT as u128;
    if let Some(indices) = find_combination(&values, target as u128, upper) {
        let chosen: Vec<Utxo> = indices.iter().map(|&i| candidates[i].clone()).collect();
        let sum: u64 = chosen.iter().map(|u| u.value).sum();
        return Ok(CoinSelection {
            utxos: chosen,
            change: sum - target,
        });
    }

    // Descending order, so the last match is the smallest.
    if let Some(single) = candidates.iter().rev().find(|u| u.value > target) {
        return Ok(CoinSelection {
            utxos: vec![(*single).clone()],
            change: single.value - target,
        });
    }

    let mut chosen = Vec::new();
    let mut sum = 0u64;
    for utxo in &candidates {
        if sum >= target {
            break;
        }
        sum = sum.saturating_add(utxo.value);
        chosen.push((*utxo).clone());
    }
    if sum >= target {
        return Ok(CoinSelection {
            utxos: chosen,
            change: sum - target,
        });
    }

    Err(Error::InsufficientFunds {
        asset: asset.to_string(),
        target,
    })
}

/// Index set of the first combination (by size, then lexicographic order)
/// whose sum is within `[lower, upper]`. `None` when there is none or the
/// step budget runs out.
fn find_combination(values: &[u64], lower: u128, upper: u128) -> Option<Vec<usize>> {
    let n = values.len();
    // prefix[i]: sum of values[..i]; smallest[r]: sum of the r smallest.
    let mut prefix = vec![0u128; n + 1];
    let mut smallest = vec![0u128; n + 1];
    for i in 0..n {
        prefix[i + 1] = prefix[i] + values[i] as u128;
        smallest[i + 1] = smallest[i] + values[n - 1 - i] as u128;
    }

    let mut search = Search {
        values,
        prefix,
        smallest,
        lower,
        upper,
        steps_left: MAX_SEARCH_STEPS,
    };
    for size in 1..=n {
        if search.prefix[size] < lower {
            continue;
        }
        if search.smallest[size] > upper {
            break;
        }
        let mut picked = Vec::with_capacity(size);
        match search.extend(0, 0, size, &mut picked) {
            Step::Found => return Some(picked),
            Step::Exhausted => {
                log::debug!("coinselect: search budget spent over {n} utxos");
                return None;
            }
            Step::NotFound => {}
        }
    }
    None
}

enum Step {
    Found,
    NotFound,
    Exhausted,
}

struct Search<'a> {
    values: &'a [u64],
    prefix: Vec<u128>,
    smallest: Vec<u128>,
    lower: u128,
    upper: u128,
    steps_left: usize,
}

impl Search<'_> {
    /// Depth-first over `values[start..]`, adding `remaining` more indices
    /// to `picked` in increasing order.
    fn extend(&mut self, start: usize, sum: u128, remaining: usize, picked: &mut Vec<usize>) -> Step {
        if remaining == 0 {
            return if sum >= self.lower && sum <= self.upper {
                Step::Found
            } else {
                Step::NotFound
            };
        }
        let n = self.values.len();
        for i in start..=n - remaining {
            if self.steps_left == 0 {
                return Step::Exhausted;
            }
            self.steps_left -= 1;

            let with = sum + self.values[i] as u128;
            // Values are descending: the next ones give the largest
            // completion, and a later `i` only makes it smaller.
            let largest = with + self.prefix[i + remaining] - self.prefix[i + 1];
            if largest < self.lower {
                break;
            }
            if with + self.smallest[remaining - 1] > self.upper {
                continue;
            }

            picked.push(i);
            match self.extend(i + 1, with, remaining - 1, picked) {
                Step::NotFound => {
                    picked.pop();
                }
                found_or_exhausted => return found_or_exhausted,
            }
        }
        Step::NotFound
    }
}
