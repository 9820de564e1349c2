use approx::assert_relative_eq;
use rstest::rstest;
use sphinx_decoder::logmath::{LogMath, LogMathError, DEFAULT_LOG_BASE};

#[rstest]
#[case(1.0)]
#[case(0.5)]
#[case(0.1)]
#[case(1e-3)]
#[case(1e-7)]
fn exp_of_log_round_trips(#[case] p: f64) {
    let lmath = LogMath::default();
    assert_relative_eq!(lmath.exp(lmath.log(p)), p, max_relative = 1e-3);
}

#[test]
fn add_is_commutative() {
    let lmath = LogMath::default();
    let values = [0, -1, -50, -1000, -6931, -20000, -99000, -500000, lmath.zero()];
    for &p in &values {
        for &q in &values {
            assert_eq!(lmath.add(p, q), lmath.add(q, p), "add({p}, {q})");
        }
    }
}

#[test]
fn table_add_matches_exact_add() {
    let lmath = LogMath::default();
    for (p, q) in [(-10, -10), (-100, -2000), (-5000, -5100), (-70000, -3), (-200, -150000)] {
        let diff = (lmath.add(p, q) - lmath.add_exact(p, q)).abs();
        assert!(diff <= 2, "add({p}, {q}) differs from exact by {diff}");
    }
}

#[test]
fn log_of_zero_probability_is_zero() {
    let lmath = LogMath::default();
    assert_eq!(lmath.log(0.0), lmath.zero());
    assert_eq!(lmath.log(-1.0), lmath.zero());
}

#[test]
fn log10_conversions_agree() {
    let lmath = LogMath::default();
    let p = lmath.log10_to_log(-2.0);
    assert_relative_eq!(lmath.log_to_log10(p), -2.0, max_relative = 1e-3);
    assert_relative_eq!(
        lmath.log_float_to_log10(lmath.log10_to_log_float(-2.0)),
        -2.0,
        max_relative = 1e-6
    );
}

#[test]
fn natural_log_conversions_agree() {
    let lmath = LogMath::default();
    let p = lmath.ln_to_log(-1.5);
    assert_relative_eq!(lmath.log_to_ln(p), -1.5, max_relative = 1e-3);
}

#[test]
fn default_uses_standard_base() {
    let lmath = LogMath::default();
    assert_eq!(lmath.base(), DEFAULT_LOG_BASE);
    assert_eq!(lmath.shift(), 0);
    assert_eq!(lmath.width(), 2);
}

#[test]
fn coarse_base_uses_narrow_table() {
    let lmath = LogMath::new(1.003, 0, true).unwrap();
    assert_eq!(lmath.width(), 1);
}

#[test]
fn shifted_table_is_smaller() {
    let plain = LogMath::new(DEFAULT_LOG_BASE, 0, true).unwrap();
    let shifted = LogMath::new(DEFAULT_LOG_BASE, 4, true).unwrap();
    let plain_size = plain.table_shape().unwrap().size;
    let shifted_size = shifted.table_shape().unwrap().size;
    assert!(shifted_size < plain_size);
    assert_eq!(shifted.table_shape().unwrap().shift, 4);
}

#[test]
fn without_table_add_is_exact() {
    let lmath = LogMath::new(DEFAULT_LOG_BASE, 0, false).unwrap();
    assert!(lmath.table_shape().is_none());
    assert_eq!(lmath.add(-100, -300), lmath.add_exact(-100, -300));
}

#[rstest]
#[case(1.0)]
#[case(0.5)]
#[case(f64::NAN)]
fn invalid_base_is_rejected(#[case] base: f64) {
    assert!(matches!(
        LogMath::new(base, 0, true),
        Err(LogMathError::InvalidBase(_))
    ));
}

#[test]
fn oversized_shift_is_rejected() {
    assert!(matches!(
        LogMath::new(DEFAULT_LOG_BASE, 17, true),
        Err(LogMathError::InvalidShift(17))
    ));
}

#[test]
fn table_dump_round_trips() {
    let lmath = LogMath::default();
    let file = tempfile::NamedTempFile::new().unwrap();
    lmath.write_to(file.path()).unwrap();

    let loaded = LogMath::read(file.path()).unwrap();
    assert_eq!(loaded.table_shape(), lmath.table_shape());
    assert_eq!(loaded.base(), lmath.base());
    for (p, q) in [(-1, -1), (-300, -20), (-9000, -12000)] {
        assert_eq!(loaded.add(p, q), lmath.add(p, q));
    }
}

#[test]
fn reading_garbage_fails_with_format_error() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), b"not a log table\n").unwrap();
    assert!(matches!(
        LogMath::read(file.path()),
        Err(LogMathError::Format { .. })
    ));
}

#[test]
fn error_messages_are_not_empty() {
    let errors = [
        LogMathError::InvalidBase(0.5),
        LogMathError::InvalidShift(20),
        LogMathError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "test")),
    ];
    for err in errors {
        assert!(!err.to_string().is_empty());
        assert!(!err.user_message().is_empty());
    }
}
