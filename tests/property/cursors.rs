//! Cursor encoding properties.

use proptest::prelude::*;
use quarry::Cursor;

/// Any byte payload survives the websafe text round trip.
#[test]
fn test_cursor_websafe_round_trip_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&any::<Vec<u8>>(), |bytes| {
            let cursor = Cursor::new(bytes.clone());
            let encoded = cursor.to_websafe_string();
            let decoded = Cursor::from_websafe_string(&encoded)
                .expect("websafe encoding must decode");
            prop_assert_eq!(decoded.bytes(), &bytes[..]);
            Ok(())
        })
        .unwrap();
}

/// The websafe form never contains characters needing URL escaping.
#[test]
fn test_cursor_websafe_alphabet_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&any::<Vec<u8>>(), |bytes| {
            let encoded = Cursor::new(bytes).to_websafe_string();
            prop_assert!(encoded
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '='));
            Ok(())
        })
        .unwrap();
}
