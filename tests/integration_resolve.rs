//! End-to-end resolution tests against the echo attribute resolver
//!
//! The echo resolver answers every attribute with `<!--id.attribute-->`, so
//! these tests exercise the engine itself: parameter materialization,
//! condition evaluation, pruning, reference resolution and the rewriter.

use std::sync::Arc;

use cfn_resolve::{
    EchoAttributeResolver, ResolveError, ResolveOptions, ResolveResult, TemplateContext,
    TemplateEngine, resolve_template,
};
use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

fn context() -> TemplateContext {
    TemplateContext::new("123456789", "eu-central-1", "MyStack")
}

fn resolve(template: Value, context: TemplateContext) -> ResolveResult<TemplateEngine> {
    let mut engine = TemplateEngine::new(context, template, Arc::new(EchoAttributeResolver))
        .with_parameter_defaults(true);
    engine.resolve()?;
    Ok(engine)
}

#[test]
fn test_parameter_defaults_materialize() {
    let engine = resolve(
        json!({"Parameters": {"Env": {"Type": "String", "Default": "dev"}}}),
        context(),
    )
    .unwrap();
    assert_eq!(
        engine.parameters().get("Env"),
        Some(&json!("dev")),
        "template default should fill the missing parameter"
    );
}

#[test]
fn test_parameter_override_wins_over_default() {
    let ctx = context().with_parameters(IndexMap::from([("Env".to_string(), json!("prod"))]));
    let engine = resolve(
        json!({"Parameters": {"Env": {"Type": "String", "Default": "dev"}}}),
        ctx,
    )
    .unwrap();
    assert_eq!(engine.parameters().get("Env"), Some(&json!("prod")));
}

#[test]
fn test_defaults_disabled_leaves_parameter_unset() {
    let mut engine = TemplateEngine::new(
        context(),
        json!({"Parameters": {"Env": {"Type": "String", "Default": "dev"}}}),
        Arc::new(EchoAttributeResolver),
    );
    engine.resolve().unwrap();
    assert!(engine.parameters().is_empty());
}

#[test]
fn test_ssm_typed_default_picks_latest_version() {
    let mut versions = IndexMap::new();
    versions.insert("1".to_string(), json!("old-ami"));
    versions.insert("2".to_string(), json!("new-ami"));
    let ctx = context()
        .with_ssm_parameters(IndexMap::from([("/base/ami".to_string(), versions)]));
    let engine = resolve(
        json!({"Parameters": {"Ami": {
            "Type": "AWS::SSM::Parameter::Value<String>",
            "Default": "/base/ami"
        }}}),
        ctx,
    )
    .unwrap();
    assert_eq!(engine.parameters().get("Ami"), Some(&json!("new-ami")));
}

#[test]
fn test_ssm_typed_default_missing_parameter_fails() {
    let err = resolve(
        json!({"Parameters": {"Ami": {
            "Type": "AWS::SSM::Parameter::Value<String>",
            "Default": "/absent"
        }}}),
        context(),
    )
    .unwrap_err();
    assert_eq!(
        err,
        ResolveError::SsmParameterNotFound {
            name: "/absent".to_string()
        }
    );
}

#[test]
fn test_comma_delimited_default_splits() {
    let engine = resolve(
        json!({"Parameters": {"Zones": {
            "Type": "CommaDelimitedList",
            "Default": "a,b,c"
        }}}),
        context(),
    )
    .unwrap();
    assert_eq!(
        engine.parameters().get("Zones"),
        Some(&json!(["a", "b", "c"]))
    );
}

#[test]
fn test_condition_prunes_resource() {
    let engine = resolve(
        json!({
            "Parameters": {"Env": {"Type": "String", "Default": "dev"}},
            "Conditions": {"IsProd": {"Fn::Equals": [{"Ref": "Env"}, "prod"]}},
            "Resources": {
                "Fleet": {"Type": "AWS::EC2::VPC", "Condition": "IsProd"},
                "Keep": {"Type": "AWS::S3::Bucket"}
            }
        }),
        context(),
    )
    .unwrap();
    assert_eq!(engine.conditions().get("IsProd"), Some(&false));
    let resources = engine.document().get("Resources").unwrap();
    assert!(resources.get("Fleet").is_none(), "guarded resource must be dropped");
    assert!(resources.get("Keep").is_some());
}

#[test]
fn test_reference_to_pruned_resource_fails() {
    let err = resolve(
        json!({
            "Parameters": {"Env": {"Type": "String", "Default": "dev"}},
            "Conditions": {"IsProd": {"Fn::Equals": [{"Ref": "Env"}, "prod"]}},
            "Resources": {
                "Fleet": {"Type": "AWS::EC2::VPC", "Condition": "IsProd"}
            },
            "Outputs": {"FleetId": {"Value": {"Ref": "Fleet"}}}
        }),
        context(),
    )
    .unwrap_err();
    assert_eq!(
        err,
        ResolveError::ReferenceNotFound {
            name: "Fleet".to_string()
        }
    );
}

#[test]
fn test_undefined_condition_guard_fails() {
    let err = resolve(
        json!({"Resources": {"A": {"Type": "AWS::S3::Bucket", "Condition": "Nope"}}}),
        context(),
    )
    .unwrap_err();
    assert_eq!(
        err,
        ResolveError::ConditionNotFound {
            name: "Nope".to_string()
        }
    );
}

#[test]
fn test_forward_condition_reference_fails() {
    let err = resolve(
        json!({"Conditions": {
            "A": {"Fn::And": [{"Condition": "B"}, {"Fn::Equals": [1, 1]}]},
            "B": {"Fn::Equals": [1, 1]}
        }}),
        context(),
    )
    .unwrap_err();
    assert_eq!(
        err,
        ResolveError::ConditionNotFound {
            name: "B".to_string()
        }
    );
}

#[test]
fn test_or_and_resolve_condition_references_symmetrically() {
    let engine = resolve(
        json!({"Conditions": {
            "First": {"Fn::Equals": [1, 1]},
            "ViaOr": {"Fn::Or": [{"Condition": "First"}, false]},
            "ViaAnd": {"Fn::And": [{"Condition": "First"}, true]}
        }}),
        context(),
    )
    .unwrap();
    assert_eq!(engine.conditions().get("ViaOr"), Some(&true));
    assert_eq!(engine.conditions().get("ViaAnd"), Some(&true));
}

#[test]
fn test_no_value_removes_mapping_entries() {
    let engine = resolve(
        json!({"Payload": {
            "Gone": {"Ref": "AWS::NoValue"},
            "Kept": "x"
        }}),
        context(),
    )
    .unwrap();
    assert_eq!(engine.document().get("Payload"), Some(&json!({"Kept": "x"})));
}

#[test]
fn test_no_value_removes_sequence_elements_preserving_order() {
    let engine = resolve(
        json!({"Payload": [
            "a",
            {"Ref": "AWS::NoValue"},
            "b",
            {"Ref": "AWS::NoValue"},
            "c"
        ]}),
        context(),
    )
    .unwrap();
    assert_eq!(engine.document().get("Payload"), Some(&json!(["a", "b", "c"])));
}

#[test]
fn test_reference_priority_pseudo_over_resource_over_parameter() {
    // Colliding names should not happen in valid input, but the priority
    // order is pseudo reference, then resource, then parameter.
    let ctx = context().with_parameters(IndexMap::from([
        ("AWS::Region".to_string(), json!("from-parameter")),
        ("Shared".to_string(), json!("from-parameter")),
    ]));
    let engine = resolve(
        json!({
            "Resources": {
                "AWS::Region": {"Type": "AWS::S3::Bucket"},
                "Shared": {"Type": "AWS::S3::Bucket"}
            },
            "Payload": {
                "Region": {"Ref": "AWS::Region"},
                "Shared": {"Ref": "Shared"}
            }
        }),
        ctx,
    )
    .unwrap();
    assert_eq!(
        engine.document().get("Payload"),
        Some(&json!({
            "Region": "eu-central-1",
            "Shared": "<!--Shared.Ref-->"
        }))
    );
}

#[test]
fn test_fn_if_does_not_evaluate_untaken_branch() {
    // The untaken branch references a missing resource; it must never be
    // looked at.
    let engine = resolve(
        json!({
            "Conditions": {"UseA": {"Fn::Equals": [1, 1]}},
            "Payload": {"Fn::If": ["UseA", "ok", {"Fn::GetAtt": "Missing.Arn"}]}
        }),
        context(),
    )
    .unwrap();
    assert_eq!(engine.document().get("Payload"), Some(&json!("ok")));
}

#[test]
fn test_fn_if_no_value_branch_omits_slot() {
    let engine = resolve(
        json!({
            "Conditions": {"Never": {"Fn::Equals": [1, 2]}},
            "Payload": {
                "Maybe": {"Fn::If": ["Never", "x", {"Ref": "AWS::NoValue"}]},
                "Kept": "y"
            }
        }),
        context(),
    )
    .unwrap();
    assert_eq!(engine.document().get("Payload"), Some(&json!({"Kept": "y"})));
}

#[test]
fn test_dynamic_ssm_reference_resolves() {
    let mut versions = IndexMap::new();
    versions.insert("7".to_string(), json!("secret-seven"));
    let ctx = context().with_ssm_parameters(IndexMap::from([("db-pass".to_string(), versions)]));
    let engine = resolve(json!({"Payload": "{{resolve:ssm:db-pass:7}}"}), ctx).unwrap();
    assert_eq!(engine.document().get("Payload"), Some(&json!("secret-seven")));
}

#[test]
fn test_dynamic_reference_unsupported_provider_fails() {
    let err = resolve(
        json!({"Payload": "{{resolve:ssm-secure:db-pass:7}}"}),
        context(),
    )
    .unwrap_err();
    assert!(matches!(err, ResolveError::DynamicReference { .. }));
}

#[test]
fn test_dynamic_reference_missing_version_fails() {
    let mut versions = IndexMap::new();
    versions.insert("1".to_string(), json!("v1"));
    let ctx = context().with_ssm_parameters(IndexMap::from([("db-pass".to_string(), versions)]));
    let err = resolve(json!({"Payload": "{{resolve:ssm:db-pass:9}}"}), ctx).unwrap_err();
    assert_eq!(
        err,
        ResolveError::SsmVersionNotFound {
            name: "db-pass".to_string(),
            version: "9".to_string()
        }
    );
}

#[test]
fn test_bookkeeping_sections_stripped() {
    let engine = resolve(
        json!({
            "AWSTemplateFormatVersion": "2010-09-09",
            "Parameters": {"Env": {"Type": "String", "Default": "dev"}},
            "Mappings": {"M": {"a": {"b": 1}}},
            "Conditions": {"C": {"Fn::Equals": [1, 1]}},
            "Rules": {"R": {"Assertions": []}},
            "Resources": {
                "B": {
                    "Type": "AWS::S3::Bucket",
                    "Condition": "C",
                    "DependsOn": ["Nothing"]
                }
            }
        }),
        context(),
    )
    .unwrap();
    let document = engine.document();
    for section in ["Parameters", "Mappings", "Conditions", "Rules"] {
        assert!(document.get(section).is_none(), "{section} must be stripped");
    }
    let resource = document.get("Resources").unwrap().get("B").unwrap();
    assert!(resource.get("Condition").is_none());
    assert!(resource.get("DependsOn").is_none());
    assert_eq!(
        document.get("AWSTemplateFormatVersion"),
        Some(&json!("2010-09-09"))
    );
}

#[test]
fn test_rules_are_stripped_without_evaluation() {
    // An erroring expression inside Rules must never run.
    let engine = resolve(
        json!({"Rules": {"R": {"RuleCondition": {"Fn::Bogus": ["x"]}}}}),
        context(),
    )
    .unwrap();
    assert!(engine.document().get("Rules").is_none());
}

#[test]
fn test_unknown_intrinsic_fails() {
    let err = resolve(json!({"Payload": {"Fn::Bogus": []}}), context()).unwrap_err();
    assert_eq!(
        err,
        ResolveError::UnknownIntrinsic {
            name: "Fn::Bogus".to_string()
        }
    );
}

#[test]
fn test_unresolvable_reference_fails() {
    let err = resolve(json!({"Payload": {"Ref": "Ghost"}}), context()).unwrap_err();
    assert_eq!(
        err,
        ResolveError::ReferenceNotFound {
            name: "Ghost".to_string()
        }
    );
}

#[test]
fn test_pseudo_references_resolve_from_context() {
    let engine = resolve(
        json!({"Payload": {
            "StackName": {"Ref": "AWS::StackName"},
            "Account": {"Ref": "AWS::AccountId"},
            "Partition": {"Ref": "AWS::Partition"},
            "Suffix": {"Ref": "AWS::URLSuffix"}
        }}),
        context(),
    )
    .unwrap();
    assert_eq!(
        engine.document().get("Payload"),
        Some(&json!({
            "StackName": "MyStack",
            "Account": "123456789",
            "Partition": "aws",
            "Suffix": "amazonaws.com"
        }))
    );
}

#[test]
fn test_stack_id_has_arn_shape() {
    let engine = resolve(json!({"Payload": {"Ref": "AWS::StackId"}}), context()).unwrap();
    let stack_id = engine.document().get("Payload").unwrap().as_str().unwrap();
    assert!(
        stack_id.starts_with("arn:aws:cloudformation:eu-central-1:123456789:stack/MyStack/"),
        "unexpected stack id {stack_id}"
    );
}

#[test]
fn test_recursion_limit_guards_pathological_nesting() {
    let mut nested = json!("leaf");
    for _ in 0..200 {
        nested = json!([nested]);
    }
    let err = resolve(json!({"Payload": nested}), context()).unwrap_err();
    assert!(matches!(err, ResolveError::RecursionLimitExceeded { .. }));
}

#[test]
fn test_resolve_template_driver_round_trip() {
    let resolved = resolve_template(
        context(),
        json!({
            "Parameters": {"Env": {"Type": "String", "Default": "dev"}},
            "Conditions": {"IsProd": {"Fn::Equals": [{"Ref": "Env"}, "prod"]}},
            "Resources": {
                "Logs": {
                    "Type": "AWS::S3::Bucket",
                    "Properties": {"BucketName": {"Fn::Sub": "${Env}-logs"}}
                }
            },
            "Outputs": {"Bucket": {"Value": {"Ref": "Logs"}}}
        }),
        ResolveOptions {
            use_parameter_defaults: true,
        },
    )
    .unwrap();
    assert_eq!(resolved.parameters.get("Env"), Some(&json!("dev")));
    assert_eq!(resolved.conditions.get("IsProd"), Some(&false));
    assert_eq!(
        resolved.document.get("Outputs"),
        Some(&json!({"Bucket": {"Value": "dev-logs"}}))
    );
    assert_eq!(
        resolved
            .document
            .pointer("/Resources/Logs/Properties/BucketName"),
        Some(&json!("dev-logs"))
    );
}
