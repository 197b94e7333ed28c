use fuseguard::error::{ErrorKind, FuseguardError};
use fuseguard::types::Phase;

#[test]
fn error_constructors_group_1() {
    assert!(matches!(
        FuseguardError::config("x"),
        FuseguardError::Config { .. }
    ));
    assert!(matches!(
        FuseguardError::validation("f", "m"),
        FuseguardError::Validation { .. }
    ));
    assert!(matches!(
        FuseguardError::meter_unavailable(Phase::L2, "x"),
        FuseguardError::MeterUnavailable {
            phase: Phase::L2,
            ..
        }
    ));
}

#[test]
fn error_constructors_group_2() {
    assert!(matches!(
        FuseguardError::charger_command_failed("x"),
        FuseguardError::ChargerCommandFailed { .. }
    ));
    assert!(matches!(
        FuseguardError::charger_unreachable("x"),
        FuseguardError::ChargerUnreachable { .. }
    ));
    assert!(matches!(FuseguardError::io("x"), FuseguardError::Io { .. }));
    assert!(matches!(
        FuseguardError::timeout("x"),
        FuseguardError::Timeout { .. }
    ));
    assert!(matches!(
        FuseguardError::generic("x"),
        FuseguardError::Generic { .. }
    ));
}

#[test]
fn kinds_follow_the_taxonomy() {
    assert_eq!(
        FuseguardError::meter_unavailable(Phase::L1, "x").kind(),
        ErrorKind::MeterUnavailable
    );
    assert_eq!(
        FuseguardError::timeout("x").kind(),
        ErrorKind::ChargerUnreachable
    );
    assert_eq!(
        FuseguardError::validation("f", "m").kind(),
        ErrorKind::ConfigurationInvalid
    );
    assert_eq!(FuseguardError::io("x").kind(), ErrorKind::Internal);

    assert!(FuseguardError::config("x").is_fatal());
    assert!(!FuseguardError::charger_command_failed("x").is_fatal());
}

#[test]
fn display_messages() {
    let e = FuseguardError::validation("field", "bad");
    let s = format!("{}", e);
    assert!(s.contains("Validation error"));

    let e = FuseguardError::meter_unavailable(Phase::L3, "no data");
    assert!(format!("{}", e).contains("L3"));
    assert_eq!(ErrorKind::ChargerUnreachable.to_string(), "CHARGER_UNREACHABLE");
}
