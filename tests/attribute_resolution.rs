//! Attribute resolution through the standard per-type registry

use std::sync::Arc;

use cfn_resolve::{
    ResolveError, ResolveResult, StandardAttributeResolver, TemplateContext, TemplateEngine,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

fn context() -> TemplateContext {
    TemplateContext::new("123456789", "eu-central-1", "MyStack")
}

fn resolve(template: Value) -> ResolveResult<TemplateEngine> {
    let mut engine = TemplateEngine::new(context(), template, Arc::new(StandardAttributeResolver))
        .with_parameter_defaults(true);
    engine.resolve()?;
    Ok(engine)
}

fn payload(engine: &TemplateEngine) -> &Value {
    engine.document().get("Payload").unwrap()
}

#[test]
fn test_role_arn_is_global_and_slash_separated() {
    let engine = resolve(json!({
        "Resources": {"Worker": {
            "Type": "AWS::IAM::Role",
            "Properties": {"RoleName": "my-role"}
        }},
        "Payload": {"Fn::GetAtt": ["Worker", "Arn"]}
    }))
    .unwrap();
    assert_eq!(payload(&engine), &json!("arn:aws:iam::123456789:role/my-role"));
}

#[test]
fn test_role_arn_includes_declared_path() {
    let engine = resolve(json!({
        "Resources": {"Worker": {
            "Type": "AWS::IAM::Role",
            "Properties": {"RoleName": "my-role", "Path": "service-role"}
        }},
        "Payload": {"Fn::GetAtt": ["Worker", "Arn"]}
    }))
    .unwrap();
    assert_eq!(
        payload(&engine),
        &json!("arn:aws:iam::123456789:role/service-role/my-role")
    );
}

#[test]
fn test_bucket_arn_is_account_unqualified() {
    let engine = resolve(json!({
        "Resources": {"Logs": {
            "Type": "AWS::S3::Bucket",
            "Properties": {"BucketName": "log-archive"}
        }},
        "Payload": {"Fn::GetAtt": ["Logs", "Arn"]}
    }))
    .unwrap();
    assert_eq!(payload(&engine), &json!("arn:aws:s3:::log-archive"));
}

#[test]
fn test_bucket_regional_domain_name_uses_context() {
    let engine = resolve(json!({
        "Resources": {"Logs": {
            "Type": "AWS::S3::Bucket",
            "Properties": {"BucketName": "log-archive"}
        }},
        "Payload": {"Fn::GetAtt": ["Logs", "RegionalDomainName"]}
    }))
    .unwrap();
    assert_eq!(
        payload(&engine),
        &json!("log-archive.s3.eu-central-1.amazonaws.com")
    );
}

#[test]
fn test_ref_synthesizes_lower_cased_logical_id() {
    let engine = resolve(json!({
        "Resources": {"MyBucket": {"Type": "AWS::S3::Bucket"}},
        "Payload": {"Ref": "MyBucket"}
    }))
    .unwrap();
    assert_eq!(payload(&engine), &json!("mybucket"));
}

#[test]
fn test_synthesized_identifier_is_memoized() {
    let engine = resolve(json!({
        "Resources": {"Sg": {"Type": "AWS::EC2::SecurityGroup"}},
        "Payload": {
            "First": {"Fn::GetAtt": ["Sg", "GroupId"]},
            "Second": {"Fn::GetAtt": ["Sg", "GroupId"]},
            "AsRef": {"Ref": "Sg"}
        }
    }))
    .unwrap();
    let payload = payload(&engine);
    assert_eq!(payload.get("First"), payload.get("Second"));
    assert_eq!(payload.get("First"), payload.get("AsRef"));
    // The synthesized value sticks in the resource's metadata.
    assert_eq!(
        engine
            .document()
            .pointer("/Resources/Sg/Metadata/aws:resolver:GroupId"),
        Some(&json!("sg"))
    );
}

#[test]
fn test_declared_property_wins_over_synthesis() {
    let engine = resolve(json!({
        "Resources": {"Sg": {
            "Type": "AWS::EC2::SecurityGroup",
            "Properties": {"GroupId": "sg-0abc"}
        }},
        "Payload": {"Ref": "Sg"}
    }))
    .unwrap();
    assert_eq!(payload(&engine), &json!("sg-0abc"));
}

#[test]
fn test_property_expressions_resolve_before_use() {
    let engine = resolve(json!({
        "Resources": {"Logs": {
            "Type": "AWS::S3::Bucket",
            "Properties": {"BucketName": {"Fn::Sub": "${AWS::StackName}-data"}}
        }},
        "Payload": {"Ref": "Logs"}
    }))
    .unwrap();
    assert_eq!(payload(&engine), &json!("MyStack-data"));
    // The resolved value is written back into the resource itself.
    assert_eq!(
        engine
            .document()
            .pointer("/Resources/Logs/Properties/BucketName"),
        Some(&json!("MyStack-data"))
    );
}

#[test]
fn test_custom_resource_returns_placeholder() {
    let engine = resolve(json!({
        "Resources": {"Cert": {"Type": "Custom::Certificate"}},
        "Payload": {"Fn::GetAtt": ["Cert", "Thumbprint"]}
    }))
    .unwrap();
    assert_eq!(payload(&engine), &json!("custom-resource:Cert:Thumbprint"));
}

#[test]
fn test_unknown_attribute_carries_full_details() {
    let err = resolve(json!({
        "Resources": {"Logs": {"Type": "AWS::S3::Bucket"}},
        "Payload": {"Fn::GetAtt": ["Logs", "Nope"]}
    }))
    .unwrap_err();
    assert_eq!(
        err,
        ResolveError::UnknownAttribute {
            resource_type: "AWS::S3::Bucket".to_string(),
            logical_id: "Logs".to_string(),
            attribute: "Nope".to_string()
        }
    );
}

#[test]
fn test_unregistered_type_fails_with_details() {
    let err = resolve(json!({
        "Resources": {"W": {"Type": "AWS::Fake::Widget"}},
        "Payload": {"Ref": "W"}
    }))
    .unwrap_err();
    assert_eq!(
        err,
        ResolveError::UnknownAttribute {
            resource_type: "AWS::Fake::Widget".to_string(),
            logical_id: "W".to_string(),
            attribute: "Ref".to_string()
        }
    );
}

#[test]
fn test_secret_ref_is_its_arn_with_suffix() {
    let engine = resolve(json!({
        "Resources": {"DbSecret": {"Type": "AWS::SecretsManager::Secret"}},
        "Payload": {"Ref": "DbSecret"}
    }))
    .unwrap();
    assert_eq!(
        payload(&engine),
        &json!("arn:aws:secretsmanager:eu-central-1:123456789:secret:dbsecret-abc")
    );
}

#[test]
fn test_sns_topic_ref_is_arn_but_name_stays_plain() {
    let engine = resolve(json!({
        "Resources": {"Alerts": {
            "Type": "AWS::SNS::Topic",
            "Properties": {"TopicName": "alerts"}
        }},
        "Payload": {"Ref": "Alerts"}
    }))
    .unwrap();
    assert_eq!(
        payload(&engine),
        &json!("arn:aws:sns:eu-central-1:123456789:topic:alerts")
    );
}

#[test]
fn test_component_composes_multi_field_identifier() {
    let engine = resolve(json!({
        "Resources": {"Base": {
            "Type": "AWS::ImageBuilder::Component",
            "Properties": {"Name": "base", "Version": "1.0.0"}
        }},
        "Payload": {"Fn::GetAtt": ["Base", "Arn"]}
    }))
    .unwrap();
    assert_eq!(
        payload(&engine),
        &json!("arn:aws:imagebuilder:eu-central-1:123456789:component/base/1.0.0/1")
    );
}

#[test]
fn test_layer_version_joins_name_and_version() {
    let engine = resolve(json!({
        "Resources": {"Deps": {
            "Type": "AWS::Lambda::LayerVersion",
            "Properties": {"LayerName": "deps"}
        }},
        "Payload": {"Ref": "Deps"}
    }))
    .unwrap();
    assert_eq!(
        payload(&engine),
        &json!("arn:aws:lambda:eu-central-1:123456789:layer:deps:1")
    );
}

#[test]
fn test_launch_template_synthetic_defaults() {
    let engine = resolve(json!({
        "Resources": {"Lt": {"Type": "AWS::EC2::LaunchTemplate"}},
        "Payload": {
            "Id": {"Ref": "Lt"},
            "Version": {"Fn::GetAtt": ["Lt", "LatestVersionNumber"]}
        }
    }))
    .unwrap();
    assert_eq!(
        payload(&engine),
        &json!({"Id": "lt-lt", "Version": "1"})
    );
}

#[test]
fn test_vpc_and_subnet_simulation_defaults() {
    let engine = resolve(json!({
        "Resources": {
            "Net": {"Type": "AWS::EC2::VPC"},
            "NetA": {"Type": "AWS::EC2::Subnet"}
        },
        "Payload": {
            "Cidr": {"Fn::GetAtt": ["Net", "CidrBlock"]},
            "Zone": {"Fn::GetAtt": ["NetA", "AvailabilityZone"]}
        }
    }))
    .unwrap();
    assert_eq!(
        payload(&engine),
        &json!({"Cidr": "10.0.0.0/16", "Zone": "zone-a"})
    );
}

#[test]
fn test_ssm_parameter_value_attribute_reads_property() {
    let engine = resolve(json!({
        "Resources": {"Flag": {
            "Type": "AWS::SSM::Parameter",
            "Properties": {"Name": "/app/flag", "Value": {"Fn::Sub": "${AWS::Region}"}}
        }},
        "Payload": {"Fn::GetAtt": ["Flag", "Value"]}
    }))
    .unwrap();
    assert_eq!(payload(&engine), &json!("eu-central-1"));
}

#[test]
fn test_get_att_against_pruned_resource_fails() {
    let err = resolve(json!({
        "Conditions": {"Never": {"Fn::Equals": [1, 2]}},
        "Resources": {"Gone": {"Type": "AWS::S3::Bucket", "Condition": "Never"}},
        "Payload": {"Fn::GetAtt": ["Gone", "Arn"]}
    }))
    .unwrap_err();
    assert_eq!(
        err,
        ResolveError::ReferenceNotFound {
            name: "Gone".to_string()
        }
    );
}

#[test]
fn test_resource_to_resource_reference_chains() {
    // The bucket's name embeds the role's synthesized identifier; attribute
    // resolution re-enters the engine to fold the nested expression.
    let engine = resolve(json!({
        "Resources": {
            "Worker": {"Type": "AWS::IAM::Role"},
            "Data": {
                "Type": "AWS::S3::Bucket",
                "Properties": {"BucketName": {"Fn::Sub": "${Worker}-data"}}
            }
        },
        "Payload": {"Ref": "Data"}
    }))
    .unwrap();
    assert_eq!(payload(&engine), &json!("worker-data"));
}
