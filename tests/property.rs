use caeth_core::config::TESTNET_ROOT_PUBLIC_KEY;
use caeth_core::tx::codec;
use caeth_core::types::{DerivationPath, SignedTransaction, UnsignedTransaction};
use caeth_core::utils::{keccak256, to_checksum_address};
use caeth_core::wallet::{derive, RootPublicKey};
use ethers_core::types::{Address, Bytes, U256};
use proptest::prelude::*;
use std::collections::HashSet;

fn root() -> RootPublicKey {
    TESTNET_ROOT_PUBLIC_KEY.parse().expect("testnet root key parses")
}

fn any_u256() -> impl Strategy<Value = U256> {
    prop_oneof![
        any::<u64>().prop_map(U256::from),
        prop::array::uniform32(any::<u8>()).prop_map(|bytes| U256::from_big_endian(&bytes)),
    ]
}

fn any_unsigned() -> impl Strategy<Value = UnsignedTransaction> {
    (
        any::<u64>(),
        prop::array::uniform20(any::<u8>()),
        any_u256(),
        prop::collection::vec(any::<u8>(), 0..256),
        any::<u64>(),
        any_u256(),
        any_u256(),
        any::<u64>(),
    )
        .prop_map(
            |(nonce, to, value, data, gas_limit, max_fee, priority, chain_id)| UnsignedTransaction {
                nonce,
                to: Address::from(to),
                value,
                data: Bytes::from(data),
                gas_limit,
                max_fee_per_gas: max_fee,
                max_priority_fee_per_gas: priority,
                chain_id,
            },
        )
}

fn owner_id() -> impl Strategy<Value = String> {
    "[a-z0-9_\\-]{1,32}(\\.testnet|\\.near)?"
}

proptest! {
    #[test]
    fn checksum_addresses_roundtrip(bytes in prop::array::uniform20(any::<u8>())) {
        let checksummed = to_checksum_address(&bytes);
        prop_assert!(checksummed.starts_with("0x"));

        let tail = checksummed.trim_start_matches("0x");
        let lower_expected = hex::encode(bytes);
        prop_assert_eq!(tail.to_ascii_lowercase(), lower_expected.clone());

        let hash = keccak256(lower_expected.as_bytes());
        let mut expected = String::from("0x");
        for (i, ch) in lower_expected.chars().enumerate() {
            let byte = hash[i / 2];
            let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
            if ch.is_ascii_digit() || nibble < 8 {
                expected.push(ch);
            } else {
                expected.push(ch.to_ascii_uppercase());
            }
        }
        prop_assert_eq!(checksummed, expected);
    }

    #[test]
    fn unsigned_encoding_roundtrips(tx in any_unsigned()) {
        let encoded = codec::encode_unsigned(&tx);
        prop_assert_eq!(encoded[0], codec::EIP1559_TX_TYPE);

        let decoded = codec::decode_unsigned(&encoded).expect("decodes");
        prop_assert_eq!(&decoded, &tx);
        prop_assert_eq!(codec::hash(&decoded), codec::hash(&tx));
    }

    #[test]
    fn signed_encoding_roundtrips(tx in any_unsigned(), r in any_u256(), s in any_u256(), v in 0u64..=1) {
        let signed = SignedTransaction { tx, r, s, v };
        let encoded = codec::encode_signed(&signed);

        let decoded = codec::decode_signed(&encoded).expect("decodes");
        prop_assert_eq!(&decoded, &signed);
        prop_assert_eq!(codec::transaction_id(&decoded), codec::transaction_id(&signed));

        // The unsigned encoding cannot be mistaken for a signed one
        prop_assert!(codec::decode_signed(&codec::encode_unsigned(&signed.tx)).is_err());
    }

    #[test]
    fn derivation_is_deterministic(owner in owner_id(), path in ".{0,48}") {
        let path = DerivationPath::new(owner, path).expect("valid path");
        let first = derive(&root(), &path).expect("derives");
        let second = derive(&root(), &path).expect("derives");
        prop_assert_eq!(first, second);
    }
}

#[test]
fn derived_addresses_are_unique_across_ten_thousand_pairs() {
    let root = root();
    let mut seen = HashSet::new();

    for owner in 0..100 {
        for index in 0..100 {
            let path = DerivationPath::new(format!("user{}.testnet", owner), format!("ethereum-{}", index))
                .expect("valid path");
            let account = derive(&root, &path).expect("derives");
            assert!(seen.insert(account.address), "collision at {}", path);
        }
    }

    assert_eq!(seen.len(), 10_000);
}

#[test]
fn owner_and_path_boundaries_are_not_ambiguous() {
    let root = root();
    let a = derive(&root, &DerivationPath::new("ab.testnet", "c").unwrap()).unwrap();
    let b = derive(&root, &DerivationPath::new("a", "b.testnetc").unwrap()).unwrap();
    let c = derive(&root, &DerivationPath::new("ab.testnet", "").unwrap()).unwrap();
    assert_ne!(a.address, b.address);
    assert_ne!(a.address, c.address);
}
