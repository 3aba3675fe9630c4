use super::*;
use std::io::Write;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_defaults_when_file_missing() {
    let config = Config::from_file(Path::new("/nonexistent/dagcalc.conf"));

    assert_eq!(config.times.addition_ms, 100);
    assert_eq!(config.times.subtraction_ms, 100);
    assert_eq!(config.times.multiplication_ms, 200);
    assert_eq!(config.times.division_ms, 200);
    assert_eq!(config.agent.computing_power, 4);
    assert_eq!(config.http.port, 8080);
}

#[test]
fn test_file_values_and_comments() {
    let file = write_config(
        "# timings\n\
         TIME_ADDITION_MS = 50\n\
         TIME_DIVISION_MS=900\n\
         \n\
         COMPUTING_POWER=8\n\
         JWT_SECRET_KEY=super-secret\n\
         HTTP_PORT=9001\n",
    );

    let config = Config::from_file(file.path());

    assert_eq!(config.times.addition_ms, 50);
    assert_eq!(config.times.division_ms, 900);
    // Unset keys keep their defaults.
    assert_eq!(config.times.multiplication_ms, 200);
    assert_eq!(config.agent.computing_power, 8);
    assert_eq!(config.auth.jwt_secret, "super-secret");
    assert_eq!(config.http.port, 9001);
}

#[test]
fn test_malformed_values_fall_back_per_key() {
    let file = write_config(
        "TIME_ADDITION_MS=not-a-number\n\
         COMPUTING_POWER=-3\n\
         TIME_SUBTRACTION_MS=75\n\
         garbage line without equals\n",
    );

    let config = Config::from_file(file.path());

    assert_eq!(config.times.addition_ms, 100);
    assert_eq!(config.agent.computing_power, 4);
    assert_eq!(config.times.subtraction_ms, 75);
}

#[test]
fn test_operation_time_lookup() {
    let times = OperationTimes {
        addition_ms: 1,
        subtraction_ms: 2,
        multiplication_ms: 3,
        division_ms: 4,
    };

    assert_eq!(times.for_operation(Operation::Add), 1);
    assert_eq!(times.for_operation(Operation::Sub), 2);
    assert_eq!(times.for_operation(Operation::Mul), 3);
    assert_eq!(times.for_operation(Operation::Div), 4);
}
