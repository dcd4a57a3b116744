//! Emergency withdrawal penalty

use crate::{
    types::{Amount, PenaltySplit},
    Error, Result,
};

/// Split `amount` into penalty and payout at `rate_percent`
///
/// `penalty = floor(amount * rate / 100)`, `payout = amount - penalty`.
pub fn split(amount: Amount, rate_percent: u64) -> Result<PenaltySplit> {
    if rate_percent > 100 {
        return Err(Error::InvalidArgument(format!(
            "penalty rate {}% exceeds 100%",
            rate_percent
        )));
    }
    // rate <= 100, so the quotient never exceeds `amount`
    let penalty = (amount as u128 * rate_percent as u128 / 100) as Amount;
    Ok(PenaltySplit {
        amount,
        penalty,
        payout: amount - penalty,
    })
}
