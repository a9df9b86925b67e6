//! The core of the settlement logic. It contains the algorithm that
//! collapses the pairwise debt table into a minimal list of transfers.

use std::cmp::Ordering;
use std::collections::HashMap;

use log::warn;
use uuid::Uuid;

use crate::types::{Amount, DebtRow, Transfer};

/// Compute the net balance of every user from the pairwise debt table.
/// Positive means the user is owed money overall, negative that they owe.
///
/// Every stored pair has a mirror row with the amount negated, so only
/// the positive direction of each pair is folded in; counting both would
/// double every balance.
pub fn net_balances(debts: &[DebtRow]) -> HashMap<Uuid, Amount> {
    let mut balances = HashMap::new();
    for debt in debts {
        if debt.amount_owed > 0 {
            *balances.entry(debt.user_uuid).or_insert(0) -= debt.amount_owed;
            *balances.entry(debt.opp_user_uuid).or_insert(0) += debt.amount_owed;
        }
    }
    balances
}

/// Get a list of transfers that zeroes every net balance.
///
/// The algorithm works as follows:
/// - split the users into debtors (negative balance) and creditors
///   (positive balance), dropping the ones at zero
/// - pick the debtor and the creditor with the largest magnitudes
/// - transfer the smaller of the two magnitudes between them; whoever has
///   a remainder goes back into their list
/// - stop when there are no more debtors/creditors
///
/// Matching largest with largest retires at least one of the two sides on
/// every step, so the result never has more transfers than nonzero users
/// minus one. The truly minimal plan is NP-complete to find and this
/// approximation is normally good enough.
///
/// Ties in magnitude are broken by user id, so the output is stable no
/// matter the iteration order of the input map.
pub fn simplify_debts(balances: &HashMap<Uuid, Amount>) -> Vec<Transfer> {
    let mut debtors: Vec<_> = balances
        .iter()
        .filter_map(|(&u, &a)| if a < 0 { Some((u, -a)) } else { None })
        .collect();
    let mut creditors: Vec<_> = balances
        .iter()
        .filter_map(|(&u, &a)| if a > 0 { Some((u, a)) } else { None })
        .collect();

    // Sort ascending so that `pop` takes the largest magnitude first.
    debtors.sort_by(compare_by_magnitude);
    creditors.sort_by(compare_by_magnitude);

    let sum: Amount = balances.values().sum();
    if sum != 0 {
        warn!("net balances sum to {sum} instead of zero: the debt table is inconsistent");
    }

    let mut result = vec![];

    while !debtors.is_empty() && !creditors.is_empty() {
        let (debtor, debt) = debtors.pop().expect("just checked debtors are non-empty!");
        let (creditor, credit) = creditors
            .pop()
            .expect("just checked creditors are non-empty!");
        match debt.cmp(&credit) {
            Ordering::Equal => result.push(Transfer::new(debtor, creditor, debt)),
            Ordering::Less => {
                result.push(Transfer::new(debtor, creditor, debt));
                creditors.push((creditor, credit - debt));
            }
            Ordering::Greater => {
                result.push(Transfer::new(debtor, creditor, credit));
                debtors.push((debtor, debt - credit));
            }
        }
    }

    if !creditors.is_empty() {
        warn!("ran out of debtors with creditors still unpaid: {creditors:?}");
    } else if !debtors.is_empty() {
        warn!("ran out of creditors with debtors still owing: {debtors:?}");
    }

    result
}

fn compare_by_magnitude(x: &(Uuid, Amount), y: &(Uuid, Amount)) -> Ordering {
    x.1.cmp(&y.1).then(x.0.cmp(&y.0))
}
