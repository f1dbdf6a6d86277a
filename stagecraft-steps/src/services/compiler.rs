//! Compilation of service operations into HTTP-client steps.

use super::loader::ServiceRegistry;
use crate::net::http_client::HttpClientStep;
use stagecraft_core::config::{AuthConfig, OperationDef, ServiceDefinition};
use stagecraft_core::value::body::{BodyResolver, ParamEnv};
use stagecraft_core::value::template;
use stagecraft_core::value::{extract_static_values, has_dynamic_values, DynamicExpr};
use stagecraft_core::{
    Datum, Error, Result, Step, StepConfig, StepFactory, StepInput, StepRegistry, ValueSpec,
};
use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// Register every service in the registry as a step type.
///
/// The step type is the service name; the stage config selects the endpoint
/// through the `operation` key, and every other key becomes an operation
/// parameter (sigil prefixes apply).
pub fn register_services(steps: &StepRegistry, services: &ServiceRegistry) {
    for name in services.list() {
        if let Some(definition) = services.get(&name) {
            steps.register(name, Arc::new(ServiceStepFactory { definition }));
        }
    }
    tracing::info!(count = services.count(), "registered service step types");
}

struct ServiceStepFactory {
    definition: Arc<ServiceDefinition>,
}

impl StepFactory for ServiceStepFactory {
    fn create(&self, config: &StepConfig) -> Result<Arc<dyn Step>> {
        let operation_name = config
            .get_str("operation")
            .ok_or_else(|| Error::MissingConfig {
                key: "operation".to_string(),
            })?;
        let operation = self.definition.get_operation(operation_name)?;

        // Everything except `operation` feeds the parameter context. Load-time
        // environment references collapse to literals here.
        let mut context = ParamEnv::new();
        for (key, value) in config.iter() {
            if key == "operation" {
                continue;
            }
            let mut spec = ValueSpec::parse(value.clone());
            if matches!(spec, ValueSpec::Env(_)) {
                spec = ValueSpec::Static(spec.resolve(&StepInput::empty())?);
            }
            context.insert(key.to_string(), spec);
        }

        let url = compile_url(&self.definition, operation, &context)?;
        let headers = compile_headers(&self.definition, operation, &context)?;
        let body = BodyResolver::new(&self.definition, operation).resolve(&context)?;

        let content_type = self.definition.content_type_for(operation);
        let response_type = operation.effective_response_type().to_string();

        Ok(Arc::new(HttpClientStep::from_parts(
            url,
            ValueSpec::literal(operation.method.clone()),
            headers,
            body,
            content_type,
            response_type,
        )))
    }
}

/// Compile the request URL (base URL + path + query parameters).
///
/// Wholly static contexts render to a literal; otherwise the combined
/// template compiles to a JS concatenation expression. Query parameters are
/// only rendered in the static case.
fn compile_url(
    definition: &ServiceDefinition,
    operation: &OperationDef,
    context: &ParamEnv,
) -> Result<ValueSpec> {
    let base = definition.defaults.base_url.trim_end_matches('/');
    let path = operation.path.trim_start_matches('/');
    let combined = format!("{}/{}", base, path);

    if !has_dynamic_values(context) {
        let statics = extract_static_values(context);
        let mut url = template::render_static(&combined, &statics)?;

        if !operation.query_params.is_empty() {
            let query: BTreeMap<&String, &String> = operation.query_params.iter().collect();
            let parts: Vec<String> = query
                .into_iter()
                .map(|(key, value_template)| {
                    template::render_static(value_template, &statics)
                        .map(|value| format!("{}={}", key, value))
                })
                .collect::<Result<_>>()?;
            url = format!("{}?{}", url, parts.join("&"));
        }

        return Ok(ValueSpec::literal(url));
    }

    let expression = template::to_js_expression(&combined, context)?;
    Ok(ValueSpec::Dynamic(DynamicExpr::js(expression)))
}

/// Compile headers: service defaults, then authentication, then
/// operation-specific headers (later entries override earlier ones).
fn compile_headers(
    definition: &ServiceDefinition,
    operation: &OperationDef,
    context: &ParamEnv,
) -> Result<BTreeMap<String, ValueSpec>> {
    let mut headers = BTreeMap::new();

    for (name, value_template) in &definition.defaults.headers {
        headers.insert(name.clone(), template::render(value_template, context)?);
    }

    if let Some(auth) = &definition.defaults.auth {
        compile_auth(definition, auth, context, &mut headers)?;
    }

    for (name, value_template) in &operation.headers {
        headers.insert(name.clone(), template::render(value_template, context)?);
    }

    Ok(headers)
}

fn compile_auth(
    definition: &ServiceDefinition,
    auth: &AuthConfig,
    context: &ParamEnv,
    headers: &mut BTreeMap<String, ValueSpec>,
) -> Result<()> {
    match auth.auth_type.as_str() {
        "bearer" | "api_key" | "custom" => {
            let header = if auth.header.is_empty() {
                "Authorization"
            } else {
                &auth.header
            };
            headers.insert(header.to_string(), template::render(&auth.value, context)?);
        }
        "basic" => {
            let username = template::render(&auth.username, context)?;
            let password = template::render(&auth.password, context)?;
            match (username.static_value(), password.static_value()) {
                (Some(user), Some(pass)) => {
                    let credentials = format!(
                        "{}:{}",
                        Datum::new(user.clone()),
                        Datum::new(pass.clone())
                    );
                    let encoded = BASE64.encode(credentials.as_bytes());
                    headers.insert(
                        "Authorization".to_string(),
                        ValueSpec::literal(format!("Basic {}", encoded)),
                    );
                }
                _ => {
                    return Err(Error::InvalidService {
                        service: definition.service.name.clone(),
                        cause: "basic auth requires static username and password".to_string(),
                    })
                }
            }
        }
        _ => {}
    }
    Ok(())
}
