// ARN construction policy

use crate::evaluator::TemplateContext;

/// Shape of an ARN for one service's resources
///
/// Renders `arn:<partition>:<service>:<region>:<account>[:<resource>]<sep><name>`
/// where the region segment collapses to empty for global services, the
/// account segment collapses to empty for unqualified resources, and the
/// separator before the name is `:` or `/` depending on the service's
/// convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArnTemplate {
    service: &'static str,
    resource: Option<&'static str>,
    slash_resource: bool,
    global_service: bool,
    no_account: bool,
}

impl ArnTemplate {
    /// Start an ARN template for a service, colon-separated, regional,
    /// account-qualified
    pub const fn new(service: &'static str) -> Self {
        Self {
            service,
            resource: None,
            slash_resource: false,
            global_service: false,
            no_account: false,
        }
    }

    /// Add a fixed resource-type segment before the name
    pub const fn resource(mut self, resource: &'static str) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Separate the resource name with `/` instead of `:`
    pub const fn slash_separated(mut self) -> Self {
        self.slash_resource = true;
        self
    }

    /// Global service: the region segment stays empty
    pub const fn global(mut self) -> Self {
        self.global_service = true;
        self
    }

    /// Unqualified resource: the account segment stays empty
    pub const fn account_unqualified(mut self) -> Self {
        self.no_account = true;
        self
    }

    /// Render the ARN for a resource name
    pub fn format(&self, name: &str, context: &TemplateContext) -> String {
        let region = if self.global_service {
            ""
        } else {
            context.region.as_str()
        };
        let account = if self.no_account {
            ""
        } else {
            context.account.as_str()
        };
        let mut arn = format!(
            "arn:{}:{}:{}:{}",
            context.partition, self.service, region, account
        );
        if let Some(resource) = self.resource {
            arn.push(':');
            arn.push_str(resource);
        }
        arn.push(if self.slash_resource { '/' } else { ':' });
        arn.push_str(name);
        arn
    }
}
