use pretty_assertions::assert_eq;
use sieve_core::{classify_native, classify_reply, VerificationStatus};

#[test]
fn only_250_verifies() {
    for code in 200..600u16 {
        let status = classify_reply(code).status;
        if code == 250 {
            assert_eq!(status, VerificationStatus::Verified);
        } else {
            assert_ne!(status, VerificationStatus::Verified, "code {code}");
        }
    }
}

#[test]
fn reply_table() {
    let cases = [
        (250, VerificationStatus::Verified),
        (550, VerificationStatus::Rejected),
        (551, VerificationStatus::Rejected),
        (553, VerificationStatus::Rejected),
        (421, VerificationStatus::Indeterminate),
        (450, VerificationStatus::Indeterminate),
        (451, VerificationStatus::Indeterminate),
        (452, VerificationStatus::Indeterminate),
        (999, VerificationStatus::Indeterminate),
        (554, VerificationStatus::Indeterminate),
    ];
    for (code, expected) in cases {
        assert_eq!(classify_reply(code).status, expected, "code {code}");
    }
    assert_eq!(classify_reply(451).reason, Some("temporary error"));
}

#[test]
fn native_verdicts() {
    assert_eq!(classify_native(true, None), VerificationStatus::Verified);
    assert_eq!(classify_native(false, None), VerificationStatus::Rejected);
    assert_eq!(
        classify_native(true, Some("blocked")),
        VerificationStatus::Indeterminate
    );
}
