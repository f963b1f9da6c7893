//! Property-based tests for the IGMP message codec
//!
//! Decoding runs on bytes straight off the wire, so it must never panic and
//! must never accept a corrupted packet as the message it was built from.

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use igmp_membership::protocols::message::{IgmpMessage, IGMP_MESSAGE_LEN};
    use igmp_membership::GroupAddress;
    use proptest::prelude::*;

    fn multicast_group() -> impl Strategy<Value = GroupAddress> {
        (224u8..=239, any::<u8>(), any::<u8>(), any::<u8>())
            .prop_map(|(a, b, c, d)| GroupAddress::new(Ipv4Addr::new(a, b, c, d)).unwrap())
    }

    fn recognized_message() -> impl Strategy<Value = IgmpMessage> {
        prop_oneof![
            (proptest::option::of(multicast_group()), any::<u8>())
                .prop_map(|(group, max_resp_time)| IgmpMessage::Query { group, max_resp_time }),
            multicast_group().prop_map(|group| IgmpMessage::Report { group }),
            multicast_group().prop_map(|group| IgmpMessage::Leave { group }),
        ]
    }

    proptest! {
        #[test]
        fn decode_never_panics(input in any::<Vec<u8>>()) {
            let _ = IgmpMessage::decode(&input);
        }

        #[test]
        fn short_input_is_rejected(input in proptest::collection::vec(any::<u8>(), 0..IGMP_MESSAGE_LEN)) {
            prop_assert!(IgmpMessage::decode(&input).is_err());
        }

        #[test]
        fn encoded_message_decodes_to_itself(message in recognized_message()) {
            let bytes = message.encode();
            prop_assert_eq!(bytes.len(), IGMP_MESSAGE_LEN);
            prop_assert_eq!(IgmpMessage::decode(&bytes), Ok(message));
        }

        #[test]
        fn single_bit_flip_is_never_accepted(
            message in recognized_message(),
            bit in 0usize..IGMP_MESSAGE_LEN * 8,
        ) {
            let mut bytes = message.encode();
            bytes[bit / 8] ^= 1 << (bit % 8);
            prop_assert_ne!(IgmpMessage::decode(&bytes), Ok(message));
        }
    }
}
