use primitive_types::U256;

/// Decimals of the protocol token: balances on the ledger are expressed in
/// base units of 10^-18 tokens, like wei.
pub const TOKEN_DECIMALS: usize = 18;

/// One whole token in base units.
pub fn one_token() -> U256 {
    U256::exp10(TOKEN_DECIMALS)
}

/// Whole tokens to base units.
pub fn to_base_units(tokens: u64) -> U256 {
    U256::from(tokens) * one_token()
}

/// The stake a node must escrow to register: one token per compute-rating
/// unit.
pub fn stake_for_rating(compute_rating: u64) -> U256 {
    to_base_units(compute_rating)
}

/// Render a base-unit amount as a whole-token string for the log, keeping
/// fractional dust if present.
pub fn format_tokens(amount: U256) -> String {
    let whole = amount / one_token();
    let frac = amount % one_token();
    if frac.is_zero() {
        whole.to_string()
    } else {
        let frac = format!("{:0>width$}", frac.to_string(), width = TOKEN_DECIMALS);
        format!("{}.{}", whole, frac.trim_end_matches('0'))
    }
}
