use capgate_policy::OperationCategory;
use capgate_tools::OperationClassifier;
use proptest::prelude::*;

fn tool_name_strategy() -> impl Strategy<Value = String> {
    r"[a-zA-Z_][a-zA-Z0-9_]{0,24}".prop_map(|s| s.to_string())
}

fn category_strategy() -> impl Strategy<Value = OperationCategory> {
    prop_oneof![
        Just(OperationCategory::Read),
        Just(OperationCategory::Write),
        Just(OperationCategory::Delete),
        Just(OperationCategory::Execute),
        Just(OperationCategory::DatabaseQuery),
        Just(OperationCategory::DatabaseWrite),
        Just(OperationCategory::Search),
        Just(OperationCategory::ExternalApi),
    ]
}

proptest! {
    /// Classification never depends on the case of the registered name.
    #[test]
    fn prop_classification_case_insensitive(name in tool_name_strategy()) {
        let classifier = OperationClassifier::new();
        prop_assert_eq!(
            classifier.classify(&name),
            classifier.classify(&name.to_uppercase())
        );
    }

    /// An explicit override beats every substring rule.
    #[test]
    fn prop_override_always_wins(
        name in tool_name_strategy(),
        category in category_strategy(),
    ) {
        let classifier = OperationClassifier::new().with_override(name.clone(), category);
        prop_assert_eq!(classifier.classify(&name), Some(category));
    }

    /// Without rules or overrides nothing classifies, so startup
    /// validation would flag every tool instead of denying at runtime.
    #[test]
    fn prop_empty_classifier_classifies_nothing(name in tool_name_strategy()) {
        prop_assert_eq!(OperationClassifier::empty().classify(&name), None);
    }
}
