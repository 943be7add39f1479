//! CLI for resolving CloudFormation templates
//!
//! Reads a template from a file or stdin, builds the evaluation context from
//! flags and/or a context file, and prints the fully resolved document.

use cfn_resolve::{ResolveOptions, TemplateContext, resolve_template};
use clap::Parser;
use serde_json::Value;
use std::fs;
use std::io::{self, Read};
use std::process;

#[derive(Parser)]
#[command(name = "cfn-resolve")]
#[command(about = "Resolve the intrinsic functions, conditions and references of a template")]
#[command(version)]
struct Cli {
    /// Template file (reads from stdin if not provided)
    template: Option<String>,

    /// JSON file with the full evaluation context (account, region,
    /// parameters, ssm_parameters, exports); flags override its fields
    #[arg(short, long)]
    context: Option<String>,

    /// Account id
    #[arg(long)]
    account: Option<String>,

    /// Region
    #[arg(long)]
    region: Option<String>,

    /// Stack name
    #[arg(long)]
    stack_name: Option<String>,

    /// Parameter override as KEY=VALUE (repeatable)
    #[arg(long = "parameter")]
    parameters: Vec<String>,

    /// Export value as KEY=VALUE (repeatable)
    #[arg(long = "export")]
    exports: Vec<String>,

    /// Fill parameters without an override from template defaults
    #[arg(long)]
    use_defaults: bool,

    /// Pretty-print the resolved document
    #[arg(short, long)]
    pretty: bool,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let mut context = match cli.context.as_deref() {
        Some(filename) => match fs::read_to_string(filename) {
            Ok(content) => match serde_json::from_str::<TemplateContext>(&content) {
                Ok(context) => context,
                Err(e) => {
                    eprintln!("Error parsing context file '{filename}': {e}");
                    process::exit(1);
                }
            },
            Err(e) => {
                eprintln!("Error reading context file '{filename}': {e}");
                process::exit(1);
            }
        },
        None => TemplateContext::new("123456789012", "us-east-1", "local"),
    };
    if let Some(account) = cli.account {
        context.account = account;
    }
    if let Some(region) = cli.region {
        context.region = region;
    }
    if let Some(stack_name) = cli.stack_name {
        context.stack_name = stack_name;
    }
    for entry in &cli.parameters {
        let (key, value) = parse_key_value(entry, "--parameter");
        context.parameters.insert(key, Value::String(value));
    }
    for entry in &cli.exports {
        let (key, value) = parse_key_value(entry, "--export");
        context.exports.insert(key, Value::String(value));
    }

    let template_data = match cli.template.as_deref() {
        Some(filename) => match fs::read_to_string(filename) {
            Ok(content) => content,
            Err(e) => {
                eprintln!("Error reading template '{filename}': {e}");
                process::exit(1);
            }
        },
        None => {
            let mut buffer = String::new();
            if let Err(e) = io::stdin().read_to_string(&mut buffer) {
                eprintln!("Error reading from stdin: {e}");
                process::exit(1);
            }
            buffer
        }
    };

    let template: Value = match serde_json::from_str(&template_data) {
        Ok(template) => template,
        Err(e) => {
            eprintln!("Error parsing template JSON: {e}");
            process::exit(1);
        }
    };

    let options = ResolveOptions {
        use_parameter_defaults: cli.use_defaults,
    };
    let resolved = match resolve_template(context, template, options) {
        Ok(resolved) => resolved,
        Err(e) => {
            eprintln!("Resolution failed: {e}");
            process::exit(1);
        }
    };

    let output = if cli.pretty {
        serde_json::to_string_pretty(&resolved.document)
    } else {
        serde_json::to_string(&resolved.document)
    };
    match output {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error serializing resolved document: {e}");
            process::exit(1);
        }
    }
}

fn parse_key_value(entry: &str, flag: &str) -> (String, String) {
    match entry.split_once('=') {
        Some((key, value)) => (key.to_string(), value.to_string()),
        None => {
            eprintln!("Invalid {flag} '{entry}': expected KEY=VALUE");
            process::exit(1);
        }
    }
}
