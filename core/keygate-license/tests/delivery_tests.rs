mod common;

use chrono::Duration;
use common::{
    fixture, CALLER, DEVICE_A, DEVICE_B, MISSING_SCRIPT_ID, OPEN_SCRIPT_ID, PAYLOAD, SCRIPT_ID,
};
use keygate_license::{delivery_error_text, Denial, KeyError, ERROR_MARKER};
use keygate_types::Field;

#[test]
fn open_script_delivers_without_device_or_key() {
    let fx = fixture();
    assert_eq!(
        fx.service.deliver(CALLER, OPEN_SCRIPT_ID, None, None).unwrap(),
        PAYLOAD
    );
    // Garbage credentials are ignored too.
    assert_eq!(
        fx.service
            .deliver(CALLER, OPEN_SCRIPT_ID, Some("junk"), Some("junk"))
            .unwrap(),
        PAYLOAD
    );
}

#[test]
fn protected_script_without_key_is_a_validation_error() {
    let fx = fixture();
    let err = fx.service.deliver(CALLER, SCRIPT_ID, None, None).unwrap_err();
    assert!(matches!(err, KeyError::Validation(ref v) if v.field == Field::DeviceId));
    assert_eq!(err.http_status(), 400);

    let err = fx
        .service
        .deliver(CALLER, SCRIPT_ID, Some(DEVICE_A), None)
        .unwrap_err();
    assert!(matches!(err, KeyError::Validation(ref v) if v.field == Field::Key));
}

#[test]
fn valid_key_delivers_payload_verbatim() {
    let fx = fixture();
    let issued = fx.service.issue(CALLER, SCRIPT_ID, DEVICE_A).unwrap();
    let body = fx
        .service
        .deliver(CALLER, SCRIPT_ID, Some(DEVICE_A), Some(issued.key.as_str()))
        .unwrap();
    assert_eq!(body, PAYLOAD);
}

#[test]
fn wrong_device_is_unauthorized() {
    let fx = fixture();
    let issued = fx.service.issue(CALLER, SCRIPT_ID, DEVICE_A).unwrap();
    let err = fx
        .service
        .deliver(CALLER, SCRIPT_ID, Some(DEVICE_B), Some(issued.key.as_str()))
        .unwrap_err();
    assert!(matches!(err, KeyError::Unauthorized(Denial::Mismatch)));
    assert_eq!(err.http_status(), 401);
}

#[test]
fn expired_key_is_unauthorized_and_deactivated() {
    let fx = fixture();
    let issued = fx.service.issue(CALLER, SCRIPT_ID, DEVICE_A).unwrap();
    fx.clock.advance(Duration::days(2));

    let err = fx
        .service
        .deliver(CALLER, SCRIPT_ID, Some(DEVICE_A), Some(issued.key.as_str()))
        .unwrap_err();
    assert!(matches!(err, KeyError::Unauthorized(Denial::Expired)));

    let existing = fx.service.verify(CALLER, SCRIPT_ID, DEVICE_A, None).unwrap();
    assert!(!existing.is_valid());
}

#[test]
fn shared_key_delivers_to_any_device() {
    let fx = fixture();
    let shared = fx.service.issue_shared(SCRIPT_ID).unwrap();
    let body = fx
        .service
        .deliver(CALLER, SCRIPT_ID, Some(DEVICE_B), Some(shared.key.as_str()))
        .unwrap();
    assert_eq!(body, PAYLOAD);
}

#[test]
fn unknown_script_is_not_found() {
    let fx = fixture();
    let err = fx
        .service
        .deliver(CALLER, MISSING_SCRIPT_ID, None, None)
        .unwrap_err();
    assert!(matches!(err, KeyError::NotFound));
}

#[test]
fn malformed_script_id_touches_nothing() {
    let fx = fixture();
    let err = fx.service.deliver(CALLER, "../etc/passwd", None, None).unwrap_err();
    assert!(matches!(err, KeyError::Validation(_)));
    assert_eq!(fx.store.calls().total(), 0);
    assert_eq!(fx.service.tracked_callers(), 0);
}

#[test]
fn twenty_first_delivery_in_a_minute_is_rate_limited() {
    let fx = fixture();
    for _ in 0..20 {
        fx.service.deliver(CALLER, OPEN_SCRIPT_ID, None, None).unwrap();
    }
    let err = fx
        .service
        .deliver(CALLER, OPEN_SCRIPT_ID, None, None)
        .unwrap_err();
    assert!(matches!(err, KeyError::RateLimited));

    fx.clock.advance(Duration::seconds(61));
    assert!(fx.service.deliver(CALLER, OPEN_SCRIPT_ID, None, None).is_ok());
}

#[test]
fn error_text_carries_marker_and_no_secret() {
    let fx = fixture();
    let issued = fx.service.issue(CALLER, SCRIPT_ID, DEVICE_A).unwrap();
    let err = fx
        .service
        .deliver(CALLER, SCRIPT_ID, Some(DEVICE_B), Some(issued.key.as_str()))
        .unwrap_err();
    let text = delivery_error_text(&err);
    assert!(text.starts_with(ERROR_MARKER));
    assert!(!text.contains(issued.key.as_str()));
    assert!(!text.contains(DEVICE_B));
}

#[test]
fn error_texts_distinguish_failure_classes() {
    let texts = [
        delivery_error_text(&KeyError::Validation(keygate_types::ValidationError::new(
            Field::Key,
            "missing",
        ))),
        delivery_error_text(&KeyError::NotFound),
        delivery_error_text(&KeyError::Unauthorized(Denial::Mismatch)),
        delivery_error_text(&KeyError::Unauthorized(Denial::Expired)),
    ];
    assert_eq!(texts[0], "-- Error: Invalid key format");
    assert_eq!(texts[1], "-- Error: Script not found");
    assert_eq!(texts[2], "-- Error: Invalid key or device mismatch");
    assert_eq!(texts[3], "-- Error: Key expired");
}
