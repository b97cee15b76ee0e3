//! A narrow data dictionary: enough to flag tag numbers this engine has never heard of and to
//! enforce the handful of required-tag rules this engine cares about for session-level messages.
//!
//! A full per-`MsgType`/per-`BeginString` field dictionary (required/optional/group membership
//! for all ~40 application message types in [`generated::fields`]) is out of scope here -- that
//! belongs to the application layer built on top of this engine, which knows its own message
//! profile. What stays in the engine is exactly the session-level obligations the FIX session
//! layer itself is responsible for policing.
//!
//! [`generated::fields`]: crate::fix::generated

use lazy_static::lazy_static;
use regex::Regex;

use crate::fix::generated::{MsgType, Tags};

lazy_static! {
    // FIX `UTCTimestamp`: YYYYMMDD-HH:MM:SS(.sss) -- an open-ended value space, not a closed
    // enumeration, so a regex is a better fit here than a match arm.
    static ref UTC_TIMESTAMP: Regex =
        Regex::new(r"^\d{8}-([01]\d|2[0-3]):[0-5]\d:[0-6]\d(\.\d{1,9})?$").unwrap();
}

/// A tag number this engine has a name for, per [`Tags`]. Session-level messages carrying a tag
/// outside this set are rejected as `UNDEFINED_TAG`; application messages are left to the
/// application's own validation.
pub(super) fn is_known_tag(tag: u32) -> bool {
    Tags::try_from(tag).is_ok()
}

/// Fast, allocation-free check that a raw `SendingTime(52)`/`OrigSendingTime(122)` value has the
/// right shape before it's handed to the full timestamp parser.
pub(super) fn is_valid_utc_timestamp(value: &[u8]) -> bool {
    match std::str::from_utf8(value) {
        Ok(s) => UTC_TIMESTAMP.is_match(s),
        Err(_) => false,
    }
}

/// The one tag each session-level message type cannot be processed without, beyond `MsgType`,
/// `MsgSeqNum` and the two CompIDs already enforced in [`crate::fix::validate::validate_msg`].
pub(super) fn required_tag(msg_type: MsgType) -> Option<Tags> {
    match msg_type {
        MsgType::SEQUENCE_RESET => Some(Tags::NewSeqNo),
        MsgType::TEST_REQUEST => Some(Tags::TestReqID),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_tags_round_trip_through_tags_enum() {
        assert!(is_known_tag(Tags::MsgType.into()));
        assert!(is_known_tag(Tags::SenderCompID.into()));
        assert!(!is_known_tag(999_999));
    }

    #[test]
    fn utc_timestamp_pattern_accepts_valid_and_rejects_garbled() {
        assert!(is_valid_utc_timestamp(b"20240102-13:45:00"));
        assert!(is_valid_utc_timestamp(b"20240102-13:45:00.123"));
        assert!(!is_valid_utc_timestamp(b"2024-01-02 13:45:00"));
        assert!(!is_valid_utc_timestamp(b"20240102-13:45"));
    }

    #[test]
    fn required_tag_is_scoped_to_sequence_reset_and_test_request() {
        assert!(matches!(
            required_tag(MsgType::SEQUENCE_RESET),
            Some(Tags::NewSeqNo)
        ));
        assert!(matches!(
            required_tag(MsgType::TEST_REQUEST),
            Some(Tags::TestReqID)
        ));
        assert!(required_tag(MsgType::HEARTBEAT).is_none());
    }
}
