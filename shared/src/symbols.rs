//! Instrument id to upstream trading pair lookup.

/// Upstream pair names keyed by numeric instrument id.
const INSTRUMENTS: &[(u32, &str)] = &[
    (0, "btc_usdt"),
    (1, "eth_usdt"),
    (2, "xrp_usdt"),
    (3, "ltc_usdt"),
    (4, "bch_usdt"),
    (5, "eos_usdt"),
    (6, "trx_usdt"),
    (7, "ada_usdt"),
    (8, "link_usdt"),
    (9, "dot_usdt"),
    (10, "sol_usdt"),
    (11, "doge_usdt"),
    (12, "avax_usdt"),
    (13, "matic_usdt"),
    (14, "atom_usdt"),
    (15, "near_usdt"),
    (16, "bnb_usdt"),
    (17, "apt_usdt"),
    (18, "arb_usdt"),
    (19, "op_usdt"),
    (20, "sui_usdt"),
];

pub fn resolve_symbol(instrument_id: u32) -> Option<&'static str> {
    INSTRUMENTS
        .iter()
        .find(|(id, _)| *id == instrument_id)
        .map(|(_, symbol)| *symbol)
}

/// Canonical pair name for a case-insensitive match against the table.
pub fn find_symbol(pair: &str) -> Option<&'static str> {
    INSTRUMENTS
        .iter()
        .map(|(_, symbol)| *symbol)
        .find(|symbol| symbol.eq_ignore_ascii_case(pair))
}

pub fn known_instruments() -> &'static [(u32, &'static str)] {
    INSTRUMENTS
}
