//! Topic Router Tests

use pretty_assertions::assert_eq;
use test_case::test_case;

use super::*;

fn unit(id: &str) -> UnitId {
    UnitId::new(id).unwrap()
}

// =============================================================================
// Subject Parsing
// =============================================================================

#[test]
fn test_parse_logs_subject() {
    let (unit_id, channel) = parse("traffic/INT_8A2F/logs").unwrap();
    assert_eq!(unit_id.as_str(), "INT_8A2F");
    assert_eq!(channel, Channel::Logs);
}

#[test]
fn test_parse_control_subject() {
    let (unit_id, channel) = parse("traffic/INT_WEB/control").unwrap();
    assert_eq!(unit_id.as_str(), "INT_WEB");
    assert_eq!(channel, Channel::Control);
}

#[test_case("" ; "empty")]
#[test_case("traffic" ; "prefix only")]
#[test_case("traffic/" ; "prefix with separator")]
#[test_case("traffic/INT_1" ; "missing channel")]
#[test_case("traffic//logs" ; "empty unit")]
#[test_case("traffic/INT_1/status" ; "unknown channel")]
#[test_case("traffic/INT_1/logs/extra" ; "too many levels")]
#[test_case("traffic/INT_1/logs/" ; "trailing separator")]
#[test_case("traffi/INT_1/logs" ; "wrong prefix")]
#[test_case("Traffic/INT_1/logs" ; "prefix is case sensitive")]
#[test_case("/traffic/INT_1/logs" ; "leading separator")]
#[test_case("traffic/+/logs" ; "single level wildcard")]
#[test_case("traffic/#" ; "multi level wildcard")]
#[test_case("traffic/INT_1/LOGS" ; "channel is case sensitive")]
fn test_parse_rejects_malformed(subject: &str) {
    assert_eq!(
        parse(subject),
        Err(TopicError::Malformed(subject.to_string()))
    );
}

#[test]
fn test_build_subjects() {
    assert_eq!(build(&unit("INT_8A2F"), Channel::Logs), "traffic/INT_8A2F/logs");
    assert_eq!(
        build(&unit("INT_8A2F"), Channel::Control),
        "traffic/INT_8A2F/control"
    );
}

#[test]
fn test_gateway_subject_is_parseable_but_not_a_subscription() {
    // The cloud link publishes here; it must never match the control filter
    let (unit_id, channel) = parse(GATEWAY_LOGS_TOPIC).unwrap();
    assert_eq!(unit_id.as_str(), GATEWAY_UNIT);
    assert_eq!(channel, Channel::Logs);
    assert_ne!(GATEWAY_LOGS_TOPIC, CONTROL_FILTER);
    assert!(!CONTROL_FILTER.ends_with("logs"));
}

#[test]
fn test_unit_id_validation() {
    assert!(UnitId::new("INT_ESP32").is_ok());
    assert!(UnitId::new("").is_err());
    assert!(UnitId::new("a/b").is_err());
    assert!(UnitId::new("+").is_err());
    assert!(UnitId::new("#").is_err());
    assert!(UnitId::new("nul\0").is_err());
}

#[test]
fn test_unit_id_ordering() {
    let mut ids = vec![unit("INT_B"), unit("INT_A"), unit("INT_WEB")];
    ids.sort();
    let ids: Vec<&str> = ids.iter().map(UnitId::as_str).collect();
    assert_eq!(ids, vec!["INT_A", "INT_B", "INT_WEB"]);
}

// =============================================================================
// Control Payload Normalization
// =============================================================================

#[test_case(br#"{"lane":2,"time":10000}"#, 2, 10000 ; "legacy time field")]
#[test_case(br#"{"lane":1,"duration":500}"#, 1, 500 ; "duration field")]
#[test_case(br#"{"lane":3}"#, 3, DEFAULT_OVERRIDE_DURATION_MS ; "default duration")]
#[test_case(br#"{"lane":0,"duration":750,"time":9000}"#, 0, 750 ; "duration wins over time")]
#[test_case(br#"{"lane":0,"duration":null,"time":9000}"#, 0, 9000 ; "null duration falls back")]
#[test_case(br#"{"lane":2,"duration":0}"#, 2, 0 ; "zero duration")]
fn test_normalize_accepts(raw: &[u8], lane: u8, duration_ms: u64) {
    let command = normalize_control_payload(unit("INT_8A2F"), raw).unwrap();
    assert_eq!(
        command,
        ControlCommand {
            unit_id: unit("INT_8A2F"),
            lane,
            duration_ms,
        }
    );
}

#[test]
fn test_normalize_missing_lane() {
    assert_eq!(
        normalize_control_payload(unit("INT_1"), br#"{"foo":1}"#),
        Err(PayloadError::MissingLane)
    );
}

#[test]
fn test_normalize_non_integer_lane() {
    assert!(matches!(
        normalize_control_payload(unit("INT_1"), br#"{"lane":"x"}"#),
        Err(PayloadError::InvalidLane(_))
    ));
    assert!(matches!(
        normalize_control_payload(unit("INT_1"), br#"{"lane":1.5}"#),
        Err(PayloadError::InvalidLane(_))
    ));
}

#[test]
fn test_normalize_lane_out_of_range() {
    assert!(matches!(
        normalize_control_payload(unit("INT_1"), br#"{"lane":4}"#),
        Err(PayloadError::InvalidLane(_))
    ));
    assert!(matches!(
        normalize_control_payload(unit("INT_1"), br#"{"lane":-1}"#),
        Err(PayloadError::InvalidLane(_))
    ));
}

#[test]
fn test_normalize_invalid_duration() {
    assert!(matches!(
        normalize_control_payload(unit("INT_1"), br#"{"lane":1,"duration":-5}"#),
        Err(PayloadError::InvalidDuration(_))
    ));
    assert!(matches!(
        normalize_control_payload(unit("INT_1"), br#"{"lane":1,"time":"10s"}"#),
        Err(PayloadError::InvalidDuration(_))
    ));
}

#[test]
fn test_normalize_not_json() {
    assert!(matches!(
        normalize_control_payload(unit("INT_1"), b"lane=2"),
        Err(PayloadError::NotJson(_))
    ));
    assert_eq!(
        normalize_control_payload(unit("INT_1"), b"[1,2]"),
        Err(PayloadError::NotAnObject)
    );
}

#[test]
fn test_device_and_cloud_payloads() {
    let command = ControlCommand {
        unit_id: unit("INT_8A2F"),
        lane: 2,
        duration_ms: 10000,
    };

    let device: serde_json::Value = serde_json::from_str(&command.to_device_payload()).unwrap();
    assert_eq!(device, serde_json::json!({"lane": 2, "time": 10000}));

    let cloud: serde_json::Value = serde_json::from_str(&command.to_cloud_payload()).unwrap();
    assert_eq!(cloud, serde_json::json!({"lane": 2, "duration": 10000}));
}

// =============================================================================
// Telemetry Envelope
// =============================================================================

#[test]
fn test_envelope_fields() {
    let record = TelemetryRecord::new(unit("INT_8A2F"), "Green: Lane 1");
    let bytes = record.envelope().encode().unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(value["unit_id"], "INT_8A2F");
    assert_eq!(value["data"], "Green: Lane 1");
    assert!(value["timestamp"].as_f64().unwrap() > 1_600_000_000.0);
}

#[test]
fn test_heartbeat_envelope() {
    let heartbeat = Envelope::heartbeat();
    assert_eq!(heartbeat.unit_id, GATEWAY_UNIT);
    assert_eq!(heartbeat.data, HEARTBEAT_DATA);
}

#[test]
fn test_record_from_invalid_utf8() {
    let record = TelemetryRecord::from_bytes(unit("INT_1"), &[0x4f, 0x4b, 0xff]);
    assert!(record.raw_payload.starts_with("OK"));
}

// =============================================================================
// Property-Based Tests (using proptest)
// =============================================================================

mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    // Unit ids as seen in the field: letters, digits, underscores and dashes
    fn unit_id_strategy() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_\\-]{1,32}"
    }

    fn channel_strategy() -> impl Strategy<Value = Channel> {
        prop_oneof![Just(Channel::Logs), Just(Channel::Control)]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn prop_build_parse_roundtrip(id in unit_id_strategy(), channel in channel_strategy()) {
            let unit_id = UnitId::new(&id).unwrap();
            let subject = build(&unit_id, channel);
            prop_assert_eq!(parse(&subject), Ok((unit_id, channel)));
        }

        #[test]
        fn prop_parse_never_panics(subject in "\\PC{0,64}") {
            let _ = parse(&subject);
        }

        #[test]
        fn prop_lane_range(lane in 0u64..10, duration in 0u64..1_000_000) {
            let raw = format!(r#"{{"lane":{},"duration":{}}}"#, lane, duration);
            let result = normalize_control_payload(UnitId::new("INT_P").unwrap(), raw.as_bytes());
            if lane <= MAX_LANE as u64 {
                let command = result.unwrap();
                prop_assert_eq!(command.lane as u64, lane);
                prop_assert_eq!(command.duration_ms, duration);
            } else {
                prop_assert!(matches!(result, Err(PayloadError::InvalidLane(_))));
            }
        }
    }
}
