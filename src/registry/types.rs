// Per-resource-type attribute resolvers
//
// The registry is policy data: a closed table from resource-type identifier
// to a capability-tagged resolver. New types are data entries; only types
// with genuinely bespoke attribute sets get their own function.

use std::sync::LazyLock;

use log::debug;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::evaluator::{ResolveError, ResolveResult, TemplateEngine};
use crate::model::scalar_to_string;
use crate::registry::arn::ArnTemplate;
use crate::registry::attribute::{AttributeResolver, declared_value, identifier, identifier_string};

type BespokeFn =
    fn(&str, &str, &str, &mut TemplateEngine) -> ResolveResult<Value>;

/// How one resource type answers attribute requests
enum TypeResolver {
    /// Exposes `Ref` (and the identifier property's own name), returning the
    /// implicit or explicit identifier
    Simple { id_property: &'static str },
    /// Exposes `Ref` and `Arn`; `ref_is_arn` makes `Ref` return the ARN for
    /// types whose natural reference is an ARN
    WithArn {
        id_property: &'static str,
        arn: ArnTemplate,
        ref_is_arn: bool,
        id_suffix: &'static str,
    },
    /// Hand-written resolver for types with bespoke attribute sets
    Bespoke(BespokeFn),
}

impl TypeResolver {
    fn resolve(
        &self,
        logical_id: &str,
        attribute: &str,
        resource_type: &str,
        engine: &mut TemplateEngine,
    ) -> ResolveResult<Value> {
        match self {
            TypeResolver::Simple { id_property } => {
                if attribute == "Ref" || attribute == *id_property {
                    identifier(engine, logical_id, id_property, logical_id)
                } else {
                    Err(unknown(resource_type, logical_id, attribute))
                }
            }
            TypeResolver::WithArn {
                id_property,
                arn,
                ref_is_arn,
                id_suffix,
            } => {
                let seed = format!("{logical_id}{id_suffix}");
                if attribute == "Ref" && !ref_is_arn {
                    return identifier(engine, logical_id, id_property, &seed);
                }
                if attribute == "Arn" || (attribute == "Ref" && *ref_is_arn) {
                    let name = identifier_string(engine, logical_id, id_property, &seed)?;
                    return Ok(Value::String(arn.format(&name, engine.context())));
                }
                Err(unknown(resource_type, logical_id, attribute))
            }
            TypeResolver::Bespoke(resolver) => {
                resolver(logical_id, attribute, resource_type, engine)
            }
        }
    }
}

fn unknown(resource_type: &str, logical_id: &str, attribute: &str) -> ResolveError {
    ResolveError::UnknownAttribute {
        resource_type: resource_type.to_string(),
        logical_id: logical_id.to_string(),
        attribute: attribute.to_string(),
    }
}

fn role(
    logical_id: &str,
    attribute: &str,
    resource_type: &str,
    engine: &mut TemplateEngine,
) -> ResolveResult<Value> {
    let name = identifier_string(engine, logical_id, "RoleName", logical_id)?;
    match attribute {
        "Ref" => Ok(Value::String(name)),
        "Arn" => {
            let path = declared_value(engine, logical_id, "Path")?
                .as_ref()
                .and_then(scalar_to_string);
            let name_and_path = match path {
                Some(path) => format!("{path}/{name}"),
                None => name,
            };
            let arn = ArnTemplate::new("iam")
                .resource("role")
                .slash_separated()
                .global();
            Ok(Value::String(arn.format(&name_and_path, engine.context())))
        }
        _ => Err(unknown(resource_type, logical_id, attribute)),
    }
}

fn bucket(
    logical_id: &str,
    attribute: &str,
    resource_type: &str,
    engine: &mut TemplateEngine,
) -> ResolveResult<Value> {
    let name = identifier_string(engine, logical_id, "BucketName", logical_id)?;
    match attribute {
        "Ref" => Ok(Value::String(name)),
        "RegionalDomainName" => {
            let context = engine.context();
            Ok(Value::String(format!(
                "{name}.s3.{}.{}",
                context.region, context.url_suffix
            )))
        }
        "Arn" => {
            let arn = ArnTemplate::new("s3").global().account_unqualified();
            Ok(Value::String(arn.format(&name, engine.context())))
        }
        _ => Err(unknown(resource_type, logical_id, attribute)),
    }
}

fn ssm_parameter(
    logical_id: &str,
    attribute: &str,
    resource_type: &str,
    engine: &mut TemplateEngine,
) -> ResolveResult<Value> {
    let name = identifier_string(engine, logical_id, "Name", logical_id)?;
    match attribute {
        "Ref" => Ok(Value::String(name)),
        "Arn" => {
            let arn = ArnTemplate::new("ssm").resource("parameter");
            Ok(Value::String(arn.format(&name, engine.context())))
        }
        "Value" => declared_value(engine, logical_id, "Value")?.ok_or_else(|| {
            ResolveError::MalformedArguments {
                function: "Fn::GetAtt".to_string(),
                message: format!("parameter '{logical_id}' declares no Value property"),
            }
        }),
        _ => Err(unknown(resource_type, logical_id, attribute)),
    }
}

fn repository(
    logical_id: &str,
    attribute: &str,
    resource_type: &str,
    engine: &mut TemplateEngine,
) -> ResolveResult<Value> {
    let name = identifier_string(engine, logical_id, "RepositoryName", logical_id)?;
    match attribute {
        "Ref" | "Name" => Ok(Value::String(name)),
        "Arn" => {
            let arn = ArnTemplate::new("codecommit");
            Ok(Value::String(arn.format(&name, engine.context())))
        }
        _ => Err(unknown(resource_type, logical_id, attribute)),
    }
}

fn component(
    logical_id: &str,
    attribute: &str,
    resource_type: &str,
    engine: &mut TemplateEngine,
) -> ResolveResult<Value> {
    // Composite identifier: name, version and build qualifier, slash-joined
    // before ARN construction.
    let name = identifier_string(engine, logical_id, "Name", logical_id)?;
    let version = identifier_string(engine, logical_id, "Version", logical_id)?;
    let build = identifier_string(engine, logical_id, "BuildVersion", "1")?;
    match attribute {
        "Ref" | "Arn" => {
            let arn = ArnTemplate::new("imagebuilder")
                .resource("component")
                .slash_separated();
            Ok(Value::String(arn.format(
                &format!("{name}/{version}/{build}"),
                engine.context(),
            )))
        }
        _ => Err(unknown(resource_type, logical_id, attribute)),
    }
}

fn layer_version(
    logical_id: &str,
    attribute: &str,
    resource_type: &str,
    engine: &mut TemplateEngine,
) -> ResolveResult<Value> {
    let name = identifier_string(engine, logical_id, "LayerName", logical_id)?;
    let version = identifier_string(engine, logical_id, "Version", "1")?;
    match attribute {
        "Ref" | "Arn" => {
            let arn = ArnTemplate::new("lambda").resource("layer");
            Ok(Value::String(
                arn.format(&format!("{name}:{version}"), engine.context()),
            ))
        }
        _ => Err(unknown(resource_type, logical_id, attribute)),
    }
}

fn sagemaker_domain(
    logical_id: &str,
    attribute: &str,
    resource_type: &str,
    engine: &mut TemplateEngine,
) -> ResolveResult<Value> {
    match attribute {
        "Ref" | "DomainId" => identifier(engine, logical_id, "DomainId", "d-xxxxxxxxxxxx"),
        "Arn" => {
            let name = identifier_string(engine, logical_id, "Name", logical_id)?;
            let arn = ArnTemplate::new("sagemaker")
                .resource("domain")
                .slash_separated();
            Ok(Value::String(arn.format(&name, engine.context())))
        }
        _ => Err(unknown(resource_type, logical_id, attribute)),
    }
}

fn launch_template(
    logical_id: &str,
    attribute: &str,
    resource_type: &str,
    engine: &mut TemplateEngine,
) -> ResolveResult<Value> {
    match attribute {
        "LatestVersionNumber" => identifier(engine, logical_id, "LatestVersionNumber", "1"),
        "Ref" => identifier(
            engine,
            logical_id,
            "TemplateId",
            &format!("lt-{logical_id}"),
        ),
        _ => Err(unknown(resource_type, logical_id, attribute)),
    }
}

fn rest_api(
    logical_id: &str,
    attribute: &str,
    resource_type: &str,
    engine: &mut TemplateEngine,
) -> ResolveResult<Value> {
    match attribute {
        "Ref" => identifier(engine, logical_id, "ApiId", logical_id),
        "RootResourceId" => identifier(
            engine,
            logical_id,
            "RootResourceId",
            &format!("root-{logical_id}"),
        ),
        _ => Err(unknown(resource_type, logical_id, attribute)),
    }
}

fn lambda_alias(
    logical_id: &str,
    attribute: &str,
    resource_type: &str,
    engine: &mut TemplateEngine,
) -> ResolveResult<Value> {
    match attribute {
        "Ref" => {
            let function = identifier_string(engine, logical_id, "FunctionName", logical_id)?;
            let alias = identifier_string(engine, logical_id, "Name", logical_id)?;
            let arn = ArnTemplate::new("lambda")
                .resource("function")
                .slash_separated();
            Ok(Value::String(
                arn.format(&format!("{function}:{alias}"), engine.context()),
            ))
        }
        _ => Err(unknown(resource_type, logical_id, attribute)),
    }
}

fn vpc(
    logical_id: &str,
    attribute: &str,
    resource_type: &str,
    engine: &mut TemplateEngine,
) -> ResolveResult<Value> {
    match attribute {
        // Stand-in block for simulation when the template pins none.
        "CidrBlock" => identifier(engine, logical_id, "CidrBlock", "10.0.0.0/16"),
        "Ref" => identifier(engine, logical_id, "VpcId", logical_id),
        _ => Err(unknown(resource_type, logical_id, attribute)),
    }
}

fn subnet(
    logical_id: &str,
    attribute: &str,
    resource_type: &str,
    engine: &mut TemplateEngine,
) -> ResolveResult<Value> {
    match attribute {
        "AvailabilityZone" => identifier(engine, logical_id, "AvailabilityZone", "zone-a"),
        "Ref" => identifier(engine, logical_id, "SubnetId", logical_id),
        _ => Err(unknown(resource_type, logical_id, attribute)),
    }
}

static REGISTRY: LazyLock<FxHashMap<&'static str, TypeResolver>> = LazyLock::new(|| {
    use TypeResolver::{Bespoke, Simple, WithArn};

    let mut registry = FxHashMap::default();
    registry.insert("AWS::IAM::Role", Bespoke(role as BespokeFn));
    registry.insert(
        "AWS::Lambda::Function",
        WithArn {
            id_property: "FunctionName",
            arn: ArnTemplate::new("lambda").resource("function"),
            ref_is_arn: false,
            id_suffix: "",
        },
    );
    registry.insert(
        "AWS::EC2::SecurityGroup",
        Simple {
            id_property: "GroupId",
        },
    );
    registry.insert("AWS::S3::Bucket", Bespoke(bucket as BespokeFn));
    registry.insert(
        "AWS::KMS::Key",
        WithArn {
            id_property: "KeyId",
            arn: ArnTemplate::new("kms").resource("key").slash_separated(),
            ref_is_arn: false,
            id_suffix: "",
        },
    );
    registry.insert(
        "AWS::CodeDeploy::Application",
        Simple {
            id_property: "ApplicationName",
        },
    );
    registry.insert(
        "AWS::IAM::InstanceProfile",
        WithArn {
            id_property: "InstanceProfileName",
            arn: ArnTemplate::new("iam")
                .resource("instance-profile")
                .slash_separated()
                .global(),
            ref_is_arn: false,
            id_suffix: "",
        },
    );
    registry.insert(
        "AWS::CodeDeploy::DeploymentGroup",
        Simple {
            id_property: "DeploymentGroupName",
        },
    );
    registry.insert("AWS::CodeCommit::Repository", Bespoke(repository as BespokeFn));
    registry.insert(
        "AWS::IAM::ManagedPolicy",
        Simple {
            id_property: "ManagedPolicyName",
        },
    );
    registry.insert(
        "AWS::CodePipeline::Pipeline",
        Simple {
            id_property: "Name",
        },
    );
    registry.insert(
        "AWS::CodeBuild::Project",
        WithArn {
            id_property: "Name",
            arn: ArnTemplate::new("codebuild")
                .resource("project")
                .slash_separated(),
            ref_is_arn: false,
            id_suffix: "",
        },
    );
    registry.insert(
        "AWS::ECR::Repository",
        WithArn {
            id_property: "Name",
            arn: ArnTemplate::new("ecr")
                .resource("repository")
                .slash_separated(),
            ref_is_arn: false,
            id_suffix: "",
        },
    );
    registry.insert("AWS::ImageBuilder::Component", Bespoke(component as BespokeFn));
    registry.insert(
        "AWS::ImageBuilder::DistributionConfiguration",
        WithArn {
            id_property: "Name",
            arn: ArnTemplate::new("imagebuilder")
                .resource("distribution-configuration")
                .slash_separated(),
            ref_is_arn: true,
            id_suffix: "",
        },
    );
    registry.insert(
        "AWS::ImageBuilder::ImageRecipe",
        WithArn {
            id_property: "Name",
            arn: ArnTemplate::new("imagebuilder")
                .resource("image-recipe")
                .slash_separated(),
            ref_is_arn: true,
            id_suffix: "",
        },
    );
    registry.insert(
        "AWS::SecretsManager::Secret",
        WithArn {
            id_property: "Name",
            arn: ArnTemplate::new("secretsmanager").resource("secret"),
            ref_is_arn: true,
            // Secret ARNs carry a random tail; a fixed stand-in keeps the
            // simulation deterministic.
            id_suffix: "-abc",
        },
    );
    registry.insert(
        "AWS::IAM::User",
        WithArn {
            id_property: "UserName",
            arn: ArnTemplate::new("iam")
                .resource("user")
                .slash_separated()
                .global(),
            ref_is_arn: false,
            id_suffix: "",
        },
    );
    registry.insert(
        "AWS::IAM::Group",
        WithArn {
            id_property: "GroupName",
            arn: ArnTemplate::new("iam")
                .resource("group")
                .slash_separated()
                .global(),
            ref_is_arn: false,
            id_suffix: "",
        },
    );
    registry.insert(
        "AWS::SNS::Topic",
        WithArn {
            id_property: "TopicName",
            arn: ArnTemplate::new("sns").resource("topic"),
            ref_is_arn: true,
            id_suffix: "",
        },
    );
    registry.insert("AWS::Lambda::LayerVersion", Bespoke(layer_version as BespokeFn));
    registry.insert(
        "AWS::StepFunctions::StateMachine",
        WithArn {
            id_property: "StateMachineName",
            arn: ArnTemplate::new("states").resource("statemachine"),
            ref_is_arn: true,
            id_suffix: "",
        },
    );
    registry.insert(
        "AWS::Events::Rule",
        WithArn {
            id_property: "Name",
            arn: ArnTemplate::new("events").resource("rule").slash_separated(),
            ref_is_arn: false,
            id_suffix: "",
        },
    );
    registry.insert("AWS::SageMaker::Domain", Bespoke(sagemaker_domain as BespokeFn));
    registry.insert(
        "AWS::AutoScaling::AutoScalingGroup",
        Simple {
            id_property: "AutoScalingGroupName",
        },
    );
    registry.insert("AWS::ApiGateway::RestApi", Bespoke(rest_api as BespokeFn));
    registry.insert(
        "AWS::ApiGateway::Deployment",
        Simple {
            id_property: "DeploymentId",
        },
    );
    registry.insert(
        "AWS::ApiGateway::Stage",
        Simple {
            id_property: "StageName",
        },
    );
    registry.insert(
        "AWS::ApiGateway::Resource",
        Simple {
            id_property: "ResourceId",
        },
    );
    registry.insert("AWS::Lambda::Alias", Bespoke(lambda_alias as BespokeFn));
    registry.insert(
        "AWS::Logs::LogGroup",
        WithArn {
            id_property: "LogGroupName",
            arn: ArnTemplate::new("logs")
                .resource("log-group:")
                .slash_separated(),
            ref_is_arn: false,
            id_suffix: "",
        },
    );
    registry.insert(
        "AWS::GuardDuty::Detector",
        Simple {
            id_property: "DetectorId",
        },
    );
    registry.insert(
        "AWS::Route53::HostedZone",
        Simple {
            id_property: "HostedZoneId",
        },
    );
    registry.insert(
        "AWS::ServiceCatalog::TagOption",
        Simple {
            id_property: "TagOptionId",
        },
    );
    registry.insert("AWS::SSM::Parameter", Bespoke(ssm_parameter as BespokeFn));
    registry.insert(
        "AWS::SSM::Document",
        Simple {
            id_property: "Name",
        },
    );
    registry.insert(
        "AWS::SSM::MaintenanceWindow",
        Simple {
            id_property: "MaintenanceWindowId",
        },
    );
    registry.insert(
        "AWS::SSM::MaintenanceWindowTarget",
        Simple {
            id_property: "MaintenanceWindowTargetId",
        },
    );
    registry.insert("AWS::EC2::LaunchTemplate", Bespoke(launch_template as BespokeFn));
    registry.insert(
        "AWS::EC2::NetworkAcl",
        Simple { id_property: "Id" },
    );
    registry.insert(
        "AWS::EC2::TransitGatewayAttachment",
        Simple { id_property: "Id" },
    );
    registry.insert(
        "AWS::EC2::DHCPOptions",
        Simple {
            id_property: "DhcpOptionsId",
        },
    );
    registry.insert(
        "AWS::EC2::InternetGateway",
        Simple {
            id_property: "InternetGatewayId",
        },
    );
    registry.insert(
        "AWS::EC2::RouteTable",
        Simple {
            id_property: "RouteTableId",
        },
    );
    registry.insert("AWS::EC2::VPC", Bespoke(vpc as BespokeFn));
    registry.insert("AWS::EC2::Subnet", Bespoke(subnet as BespokeFn));
    registry.insert(
        "AWS::EC2::VPNGateway",
        Simple {
            id_property: "VPNGatewayId",
        },
    );
    registry.insert(
        "AWS::EC2::VPCPeeringConnection",
        Simple { id_property: "Id" },
    );
    registry.insert(
        "AWS::RDS::DBSubnetGroup",
        Simple {
            id_property: "DBSubnetGroupName",
        },
    );
    registry
});

/// Registry-backed attribute resolver covering the supported resource types
///
/// Custom (`Custom::*`) resources answer every attribute with an opaque
/// deterministic placeholder, since their attributes are not statically
/// known. Unregistered types and unrecognized attributes fail with the full
/// resource type, logical id and attribute in the error.
pub struct StandardAttributeResolver;

impl AttributeResolver for StandardAttributeResolver {
    fn resolve_attribute(
        &self,
        logical_id: &str,
        attribute: &str,
        engine: &mut TemplateEngine,
    ) -> ResolveResult<Value> {
        debug!("resolving attribute {logical_id}.{attribute}");
        let Some(resource_type) = engine.resource_type(logical_id).map(str::to_string) else {
            return Err(ResolveError::ReferenceNotFound {
                name: logical_id.to_string(),
            });
        };
        if resource_type.starts_with("Custom::") {
            return Ok(Value::String(format!(
                "custom-resource:{logical_id}:{attribute}"
            )));
        }
        match REGISTRY.get(resource_type.as_str()) {
            Some(resolver) => resolver.resolve(logical_id, attribute, &resource_type, engine),
            None => Err(unknown(&resource_type, logical_id, attribute)),
        }
    }
}
