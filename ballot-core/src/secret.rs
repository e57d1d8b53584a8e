use crate::field::Field;

/// Maps a voter's owner identifier to its eligibility secret.
///
/// The identifier's UTF-8 bytes are read as a big-endian integer and reduced
/// modulo the field order. The same function runs wherever a secret has to be
/// recomputed, so it must stay pure.
pub fn derive_secret(owner_id: &str) -> Field {
    Field::from_be_bytes_mod_order(owner_id.as_bytes())
}

/// Quadratic voting power: `floor(sqrt(balance))`.
pub fn quadratic_weight(balance: u64) -> u64 {
    if balance < 2 {
        return balance;
    }
    // Newton iteration from an upper bound; converges to floor(sqrt(n)).
    let mut x = balance / 2 + 1;
    let mut y = (x + balance / x) / 2;
    while y < x {
        x = y;
        y = (x + balance / x) / 2;
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_follow_floor_sqrt() {
        assert_eq!(quadratic_weight(0), 0);
        assert_eq!(quadratic_weight(1), 1);
        assert_eq!(quadratic_weight(10), 3);
        assert_eq!(quadratic_weight(75), 8);
        assert_eq!(quadratic_weight(100), 10);
        assert_eq!(quadratic_weight(1000), 31);
        assert_eq!(quadratic_weight(u64::MAX), 4_294_967_295);
    }

    #[test]
    fn weight_bounds_hold_near_squares() {
        for n in 1u64..5_000 {
            let w = quadratic_weight(n);
            assert!(w * w <= n && (w + 1) * (w + 1) > n, "n = {n}");
        }
    }

    #[test]
    fn secret_is_stable_and_identifier_specific() {
        let a = derive_secret("AZesBUcWibfPn1omUmKxWjqbikmYDUK16X78SX995zSS");
        assert_eq!(a, derive_secret("AZesBUcWibfPn1omUmKxWjqbikmYDUK16X78SX995zSS"));
        assert_ne!(a, derive_secret("DUMMY_WALLET_2"));
    }

    #[test]
    fn short_identifier_is_its_byte_value() {
        // "AB" = 0x4142
        assert_eq!(derive_secret("AB"), Field::from(0x4142));
    }
}
