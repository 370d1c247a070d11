//! Typed ID definitions.

use crate::define_id;

// =============================================================================
// Scheduling
// =============================================================================

define_id!(ScheduleId, "sch");

// =============================================================================
// Correlated actions
// =============================================================================

define_id!(TestRunId, "trun");
define_id!(MigrationId, "mig");

// =============================================================================
// Process identity
// =============================================================================

// Identifies one running automation process; used as the lease holder.
define_id!(WorkerId, "wrk");

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_schedule_id_roundtrip() {
        let id = ScheduleId::new();
        let parsed: ScheduleId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!(id.to_string().starts_with("sch_"));
    }

    #[test]
    fn test_test_run_id_rejects_schedule_prefix() {
        let result: Result<TestRunId, _> = "sch_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        let err = result.unwrap_err();
        assert!(err.is_prefix_error());
    }

    #[test]
    fn test_missing_separator() {
        let result: Result<MigrationId, _> = "mig01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::MissingSeparator
        ));
    }

    #[test]
    fn test_empty() {
        let result: Result<ScheduleId, _> = "".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::Empty));
    }

    #[test]
    fn test_invalid_ulid() {
        let result: Result<ScheduleId, _> = "sch_invalid".parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidUlid(_)
        ));
    }

    #[test]
    fn test_json_is_plain_string() {
        let id = TestRunId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let parsed: TestRunId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_ids_sortable() {
        let id1 = ScheduleId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = ScheduleId::new();
        assert!(id1 < id2);
    }

    #[test]
    fn test_all_id_prefixes_unique() {
        let prefixes = [
            ScheduleId::PREFIX,
            TestRunId::PREFIX,
            MigrationId::PREFIX,
            WorkerId::PREFIX,
        ];
        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len(), "Duplicate ID prefixes found!");
    }

    proptest! {
        #[test]
        fn prop_any_ulid_roundtrips(raw in any::<u128>()) {
            let id = ScheduleId::from_ulid(crate::Ulid::from(raw));
            let parsed = ScheduleId::parse(&id.to_string()).unwrap();
            prop_assert_eq!(id, parsed);
        }
    }
}
