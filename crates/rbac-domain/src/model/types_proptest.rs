//! Property-based tests for key normalization.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::model::{normalize_operation, normalize_resource, permission_key, PolicyRef};

    /// Strategy producing an identifier in random letter case.
    fn mixed_case_strategy() -> impl Strategy<Value = String> {
        "[a-zA-Z]{1,12}"
    }

    proptest! {
        #[test]
        fn test_key_is_case_insensitive(
            resource in mixed_case_strategy(),
            operation in mixed_case_strategy()
        ) {
            let upper = permission_key(&resource.to_uppercase(), &operation.to_uppercase());
            let lower = permission_key(&resource.to_lowercase(), &operation.to_lowercase());
            prop_assert_eq!(upper, lower);
        }

        #[test]
        fn test_normalization_is_idempotent(
            resource in mixed_case_strategy(),
            operation in "[a-zA-Z -]{1,12}"
        ) {
            let r = normalize_resource(&resource);
            let o = normalize_operation(&operation);
            prop_assert_eq!(normalize_resource(&r), r.clone());
            prop_assert_eq!(normalize_operation(&o), o.clone());
        }

        #[test]
        fn test_wildcard_grants_any_operation(
            resource in mixed_case_strategy(),
            operation in mixed_case_strategy()
        ) {
            let policy = PolicyRef::new("pol_1", &resource, "*");
            prop_assert!(policy.grants(&resource.to_uppercase(), &operation));
        }

        #[test]
        fn test_exact_policy_never_grants_other_resource(
            resource in "[a-z]{1,8}",
            other in "[a-z]{1,8}",
            operation in "[a-z]{1,8}"
        ) {
            prop_assume!(resource != other);
            let policy = PolicyRef::new("pol_1", &resource, &operation);
            prop_assert!(!policy.grants(&other, &operation));
        }
    }
}
