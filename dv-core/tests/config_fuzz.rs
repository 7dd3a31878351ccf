/*
 * Property tests for configuration parsing
 *
 * Config files and command-line values are untrusted input: parsing must
 * either yield a config that passes validation or an error, never a panic.
 */

use dv_core::constants::voltage;
use dv_core::{parse_core_spec, parse_fan_point, parse_voltage_point, DaemonConfig};
use proptest::prelude::*;

fn json_field() -> impl Strategy<Value = String> {
    let key = prop_oneof![
        Just("strategy"),
        Just("cores"),
        Just("manual_points"),
        Just("sample_interval_ms"),
        Just("status_interval_ms"),
        Just("dead_band_mv"),
        Just("ramp_step_mv"),
        Just("safety_floor_mv"),
        Just("actuator_timeout_ms"),
        Just("fan"),
    ];
    let value = prop_oneof![
        any::<i64>().prop_map(|v| v.to_string()),
        any::<f64>().prop_map(|v| format!("{:?}", v)),
        "[a-z]{0,12}".prop_map(|s| format!("\"{}\"", s)),
        Just("null".to_string()),
        Just("[]".to_string()),
        Just("{}".to_string()),
        Just(r#"[{"core_id":0,"min_mv":0,"max_mv":-300,"threshold":50}]"#.to_string()),
        Just(r#"{"enabled":true,"curve":[{"temperature":60,"fan_percent":20}]}"#.to_string()),
    ];
    (key, value).prop_map(|(k, v)| format!("\"{}\":{}", k, v))
}

proptest! {
    #[test]
    fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = DaemonConfig::from_json_bytes(&bytes);
    }

    #[test]
    fn accepted_configs_stay_in_envelope(fields in prop::collection::vec(json_field(), 0..6)) {
        let json = format!("{{{}}}", fields.join(","));
        if let Ok(config) = DaemonConfig::from_json_bytes(json.as_bytes()) {
            prop_assert!(config.safety_floor_mv >= voltage::ABSOLUTE_FLOOR_MV);
            prop_assert!(config.safety_floor_mv <= voltage::CEILING_MV);
            for core in &config.cores {
                prop_assert!(core.min_mv <= 0 && core.max_mv <= 0);
                prop_assert!(core.min_mv >= config.safety_floor_mv);
                prop_assert!(core.max_mv >= config.safety_floor_mv);
            }
        }
    }

    #[test]
    fn cli_specs_never_panic(spec in "[-0-9:.a-z]{0,24}") {
        let _ = parse_core_spec(&spec);
        let _ = parse_fan_point(&spec);
        let _ = parse_voltage_point(&spec);
    }
}
