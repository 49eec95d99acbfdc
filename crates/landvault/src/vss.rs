//! shamir secret sharing over GF(256)
//!
//! splits a file key into `n` shards with reconstruction threshold `t`.
//! each byte of the secret gets its own random degree `t-1` polynomial;
//! shard `i` holds the evaluations at x = i.

use crate::{Error, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// default number of shard nodes
pub const SHARD_COUNT: usize = 5;

/// default reconstruction threshold
pub const THRESHOLD: usize = 3;

/// a single key shard
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyShard {
    /// evaluation point (1-indexed, never zero)
    pub index: u8,
    /// shard bytes, hex encoded
    #[serde(with = "hex_bytes")]
    pub key: Vec<u8>,
}

/// GF(256) multiplication using AES polynomial (x^8 + x^4 + x^3 + x + 1)
fn gf256_mul(a: u8, b: u8) -> u8 {
    let mut result = 0u8;
    let mut a = a;
    let mut b = b;

    while b != 0 {
        if b & 1 != 0 {
            result ^= a;
        }
        let hi = a & 0x80;
        a <<= 1;
        if hi != 0 {
            a ^= 0x1b;
        }
        b >>= 1;
    }
    result
}

/// a^254 = a^(-1) in GF(256)
fn gf256_inv(a: u8) -> u8 {
    if a == 0 {
        return 0;
    }
    let mut result = a;
    for _ in 0..6 {
        result = gf256_mul(result, result);
        result = gf256_mul(result, a);
    }
    gf256_mul(result, result)
}

fn gf256_div(a: u8, b: u8) -> u8 {
    gf256_mul(a, gf256_inv(b))
}

/// horner evaluation, coeffs[0] is the constant term
fn poly_eval(coeffs: &[u8], x: u8) -> u8 {
    coeffs
        .iter()
        .rev()
        .fold(0u8, |acc, &c| gf256_mul(acc, x) ^ c)
}

/// lagrange interpolation at x=0
fn lagrange_interpolate(points: &[(u8, u8)]) -> u8 {
    let mut result = 0u8;

    for (i, &(xi, yi)) in points.iter().enumerate() {
        let mut num = 1u8;
        let mut den = 1u8;

        for (j, &(xj, _)) in points.iter().enumerate() {
            if i != j {
                num = gf256_mul(num, xj); // (0 - xj) = xj
                den = gf256_mul(den, xi ^ xj); // (xi - xj)
            }
        }

        result ^= gf256_mul(yi, gf256_div(num, den));
    }

    result
}

/// split `secret` into `count` shards, any `threshold` of which recover it
pub fn split_secret(secret: &[u8], threshold: usize, count: usize) -> Result<Vec<KeyShard>> {
    if threshold == 0 || threshold > count || count > 255 {
        return Err(Error::InvalidConfig {
            name: "shard threshold",
            reason: format!("need 1 <= threshold ({threshold}) <= shards ({count}) <= 255"),
        });
    }

    let mut rng = rand::thread_rng();
    let mut shards: Vec<KeyShard> = (1..=count as u8)
        .map(|index| KeyShard {
            index,
            key: Vec::with_capacity(secret.len()),
        })
        .collect();

    let mut coeffs = vec![0u8; threshold];
    for &byte in secret {
        coeffs[0] = byte;
        rng.fill_bytes(&mut coeffs[1..]);

        for shard in shards.iter_mut() {
            shard.key.push(poly_eval(&coeffs, shard.index));
        }
    }

    Ok(shards)
}

/// reconstruct a secret from at least `threshold` distinct shards
pub fn combine_shares(shards: &[KeyShard], threshold: usize) -> Result<Vec<u8>> {
    let mut used: Vec<&KeyShard> = Vec::with_capacity(threshold);
    for shard in shards {
        if shard.index != 0 && !used.iter().any(|s| s.index == shard.index) {
            used.push(shard);
        }
        if used.len() == threshold {
            break;
        }
    }

    if threshold == 0 || used.len() < threshold {
        return Err(Error::NotEnoughShards {
            have: used.len(),
            need: threshold,
        });
    }

    let len = used[0].key.len();
    if used.iter().any(|s| s.key.len() != len) {
        return Err(Error::KeyUnavailable("key shards disagree on length".into()));
    }

    let secret = (0..len)
        .map(|i| {
            let points: Vec<(u8, u8)> = used.iter().map(|s| (s.index, s.key[i])).collect();
            lagrange_interpolate(&points)
        })
        .collect();

    Ok(secret)
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gf256_ops() {
        assert_eq!(gf256_mul(0, 0), 0);
        assert_eq!(gf256_mul(1, 1), 1);
        assert_eq!(gf256_mul(2, 2), 4);

        for a in 1..=255u8 {
            assert_eq!(gf256_mul(a, gf256_inv(a)), 1, "inverse failed for {}", a);
        }
    }

    #[test]
    fn test_any_threshold_subset_recovers() {
        let secret = [42u8; 32];
        let shards = split_secret(&secret, THRESHOLD, SHARD_COUNT).unwrap();
        assert_eq!(shards.len(), SHARD_COUNT);

        for a in 0..SHARD_COUNT {
            for b in (a + 1)..SHARD_COUNT {
                for c in (b + 1)..SHARD_COUNT {
                    let subset = [shards[a].clone(), shards[b].clone(), shards[c].clone()];
                    assert_eq!(combine_shares(&subset, THRESHOLD).unwrap(), secret);
                }
            }
        }
    }

    #[test]
    fn test_random_secret() {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);

        let shards = split_secret(&secret, THRESHOLD, SHARD_COUNT).unwrap();
        let recovered = combine_shares(&shards[2..], THRESHOLD).unwrap();
        assert_eq!(recovered, secret);
    }

    #[test]
    fn test_not_enough_shards() {
        let shards = split_secret(&[7u8; 32], THRESHOLD, SHARD_COUNT).unwrap();

        let err = combine_shares(&shards[..2], THRESHOLD).unwrap_err();
        assert!(matches!(err, Error::NotEnoughShards { have: 2, need: 3 }));

        // duplicates do not count twice
        let dupes = [shards[0].clone(), shards[0].clone(), shards[1].clone()];
        assert!(combine_shares(&dupes, THRESHOLD).is_err());
    }

    #[test]
    fn test_invalid_threshold() {
        assert!(split_secret(&[1u8; 32], 0, 5).is_err());
        assert!(split_secret(&[1u8; 32], 6, 5).is_err());
    }

    #[test]
    fn test_shard_json_is_hex() {
        let shard = KeyShard {
            index: 2,
            key: vec![0xde, 0xad],
        };
        let json = serde_json::to_string(&shard).unwrap();
        assert_eq!(json, r#"{"index":2,"key":"dead"}"#);
        assert_eq!(serde_json::from_str::<KeyShard>(&json).unwrap(), shard);
    }
}
