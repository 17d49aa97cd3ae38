//! Satoshi conversion helpers.

pub const SATS_PER_BTC: u64 = 100_000_000;

pub fn sats_to_btc(sats: u64) -> f64 {
    sats as f64 / SATS_PER_BTC as f64
}

pub fn format_sats(sats: u64) -> String {
    format!("{} sats ({:.8} BTC)", sats, sats_to_btc(sats))
}
