//! Plugin host protocol.
//!
//! [`ProviderService`] is the provider surface in plain Rust types. The gRPC
//! adapter below converts JSON-encoded protocol messages to and from it, and
//! [`serve`] runs the adapter behind the handshake the host expects:
//!
//! 1. bind a TCP listener on localhost;
//! 2. print `HEMMER_PROVIDER|<version>|<address>` on stdout;
//! 3. serve until SIGTERM or SIGINT, then drain in-flight requests for at most
//!    [`ServeOptions::shutdown_timeout`];
//! 4. call [`ProviderService::stop`].
//!
//! Provider errors never surface as gRPC status codes. They are returned as
//! error diagnostics in the response, which is how the host reports them.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, instrument, warn};

use crate::error::ProviderError;
use crate::generated as pb;
use crate::schema::{Block, BlockNestingMode, Diagnostic, DiagnosticSeverity, ProviderSchema, Schema};
use crate::types::{ImportedResource, PlanResult, ProviderMetadata, HANDSHAKE_PREFIX, PROTOCOL_VERSION};

/// Operations a provider exposes to the host.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    /// Schemas of the provider block, every resource and every data source.
    fn schema(&self) -> ProviderSchema;

    /// Registered type names, sorted.
    fn metadata(&self) -> ProviderMetadata {
        let schema = self.schema();
        let mut resources: Vec<String> = schema.resources.into_keys().collect();
        let mut data_sources: Vec<String> = schema.data_sources.into_keys().collect();
        resources.sort();
        data_sources.sort();
        ProviderMetadata {
            resources,
            data_sources,
            capabilities: Default::default(),
        }
    }

    /// Check the provider block without connecting.
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Resolve the provider block and connect.
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Release connections before the process exits.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Check a resource's configuration.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Migrate state written under an older schema version.
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let _ = (resource_type, version);
        Ok(state)
    }

    /// Compute the changes needed to move from `prior_state` to `proposed_state`.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create the object and return its state.
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError>;

    /// Refresh state. `Value::Null` tells the host the object is gone.
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError>;

    /// Apply a planned update and return the new state.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError>;

    /// Drop the object.
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError>;

    /// Build state for an object that already exists.
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let _ = id;
        Err(ProviderError::Unimplemented(format!(
            "import is not supported for {}",
            resource_type
        )))
    }

    /// Check a data source's configuration.
    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (data_source_type, config);
        Ok(vec![])
    }

    /// Look up an existing object.
    async fn read_data_source(&self, data_source_type: &str, config: Value) -> Result<Value, ProviderError> {
        let _ = config;
        Err(ProviderError::UnknownResource(data_source_type.to_string()))
    }
}

/// Empty payloads decode to null. Anything else must be valid JSON.
fn decode(bytes: &[u8]) -> Result<Value, ProviderError> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(bytes)?)
}

fn encode(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

fn diagnostic_to_proto(d: Diagnostic) -> pb::Diagnostic {
    let severity = match d.severity {
        DiagnosticSeverity::Error => pb::diagnostic::Severity::Error,
        DiagnosticSeverity::Warning => pb::diagnostic::Severity::Warning,
    };
    pb::Diagnostic {
        severity: severity as i32,
        summary: d.summary,
        detail: d.detail.unwrap_or_default(),
        attribute: d.attribute.unwrap_or_default(),
    }
}

fn error_diagnostics(err: &ProviderError) -> Vec<pb::Diagnostic> {
    vec![diagnostic_to_proto(Diagnostic::error(err.to_string()))]
}

/// Convert a validation outcome, logging how it went.
fn validation_response(
    operation: &str,
    subject: &str,
    result: Result<Vec<Diagnostic>, ProviderError>,
) -> Vec<pb::Diagnostic> {
    match result {
        Ok(diagnostics) => {
            let errors = diagnostics.iter().filter(|d| d.is_error()).count();
            if errors > 0 {
                warn!(operation, subject, errors, "Validation failed");
            } else {
                debug!(operation, subject, "Validation passed");
            }
            diagnostics.into_iter().map(diagnostic_to_proto).collect()
        }
        Err(e) => {
            error!(operation, subject, error = %e, "Validation errored");
            error_diagnostics(&e)
        }
    }
}

fn schema_to_proto(schema: &Schema) -> pb::Schema {
    pb::Schema {
        version: schema.version as i64,
        block: Some(block_to_proto(&schema.block)),
    }
}

fn block_to_proto(block: &Block) -> pb::Block {
    let mut attributes: Vec<pb::Attribute> = block
        .attributes
        .iter()
        .map(|(name, attr)| pb::Attribute {
            name: name.clone(),
            r#type: serde_json::to_vec(&attr.attr_type).unwrap_or_default(),
            required: attr.flags.required,
            optional: attr.flags.optional,
            computed: attr.flags.computed,
            sensitive: attr.flags.sensitive,
            description: attr.description.clone().unwrap_or_default(),
            force_new: attr.force_new,
            default_value: attr.default.as_ref().map(encode).unwrap_or_default(),
        })
        .collect();
    attributes.sort_by(|a, b| a.name.cmp(&b.name));

    let mut block_types: Vec<pb::NestedBlock> = block
        .blocks
        .iter()
        .map(|(name, nested)| {
            let mode = match nested.nesting_mode {
                BlockNestingMode::Single => pb::nested_block::NestingMode::Single,
                BlockNestingMode::List => pb::nested_block::NestingMode::List,
            };
            pb::NestedBlock {
                type_name: name.clone(),
                block: Some(block_to_proto(&nested.block)),
                nesting_mode: mode as i32,
                min_items: nested.min_items as i32,
                max_items: nested.max_items as i32,
            }
        })
        .collect();
    block_types.sort_by(|a, b| a.type_name.cmp(&b.type_name));

    pb::Block {
        attributes,
        block_types,
        description: block.description.clone().unwrap_or_default(),
    }
}

/// Serves a [`ProviderService`] over the generated gRPC trait.
struct GrpcAdapter<P: ProviderService> {
    provider: Arc<P>,
}

type GrpcResult<T> = Result<Response<T>, Status>;

#[tonic::async_trait]
impl<P: ProviderService> pb::provider_server::Provider for GrpcAdapter<P> {
    #[instrument(skip_all, name = "grpc.get_metadata")]
    async fn get_metadata(&self, _request: Request<pb::GetMetadataRequest>) -> GrpcResult<pb::GetMetadataResponse> {
        let metadata = self.provider.metadata();
        debug!(
            resources = metadata.resources.len(),
            data_sources = metadata.data_sources.len(),
            "Reporting metadata"
        );
        Ok(Response::new(pb::GetMetadataResponse {
            server_capabilities: Some(pb::ServerCapabilities {
                plan_destroy: metadata.capabilities.plan_destroy,
            }),
            resources: metadata.resources,
            data_sources: metadata.data_sources,
            diagnostics: vec![],
        }))
    }

    #[instrument(skip_all, name = "grpc.get_schema")]
    async fn get_schema(&self, _request: Request<pb::GetSchemaRequest>) -> GrpcResult<pb::GetSchemaResponse> {
        let schema = self.provider.schema();
        let convert = |schemas: &HashMap<String, Schema>| -> HashMap<String, pb::Schema> {
            schemas
                .iter()
                .map(|(name, schema)| (name.clone(), schema_to_proto(schema)))
                .collect()
        };
        Ok(Response::new(pb::GetSchemaResponse {
            provider: Some(schema_to_proto(&schema.provider)),
            resources: convert(&schema.resources),
            data_sources: convert(&schema.data_sources),
            diagnostics: vec![],
        }))
    }

    #[instrument(skip_all, name = "grpc.validate_provider_config")]
    async fn validate_provider_config(
        &self,
        request: Request<pb::ValidateProviderConfigRequest>,
    ) -> GrpcResult<pb::ValidateProviderConfigResponse> {
        let request = request.into_inner();
        let result = async {
            let config = decode(&request.config)?;
            self.provider.validate_provider_config(config).await
        }
        .await;
        Ok(Response::new(pb::ValidateProviderConfigResponse {
            diagnostics: validation_response("validate_provider_config", "provider", result),
        }))
    }

    #[instrument(skip_all, name = "grpc.configure")]
    async fn configure(&self, request: Request<pb::ConfigureRequest>) -> GrpcResult<pb::ConfigureResponse> {
        let request = request.into_inner();
        let result = async {
            let config = decode(&request.config)?;
            self.provider.configure(config).await
        }
        .await;
        let diagnostics = match result {
            Ok(diagnostics) => {
                info!("Provider configured");
                diagnostics.into_iter().map(diagnostic_to_proto).collect()
            }
            Err(e) => {
                error!(error = %e, "Configure failed");
                error_diagnostics(&e)
            }
        };
        Ok(Response::new(pb::ConfigureResponse { diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.stop")]
    async fn stop(&self, _request: Request<pb::StopRequest>) -> GrpcResult<pb::StopResponse> {
        let error = match self.provider.stop().await {
            Ok(()) => String::new(),
            Err(e) => {
                error!(error = %e, "Stop failed");
                e.to_string()
            }
        };
        Ok(Response::new(pb::StopResponse { error }))
    }

    #[instrument(skip_all, name = "grpc.validate_resource_config", fields(resource_type = tracing::field::Empty))]
    async fn validate_resource_config(
        &self,
        request: Request<pb::ValidateResourceConfigRequest>,
    ) -> GrpcResult<pb::ValidateResourceConfigResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let result = async {
            let config = decode(&req.config)?;
            self.provider.validate_resource_config(&req.resource_type, config).await
        }
        .await;
        Ok(Response::new(pb::ValidateResourceConfigResponse {
            diagnostics: validation_response("validate_resource_config", &req.resource_type, result),
        }))
    }

    #[instrument(skip_all, name = "grpc.upgrade_resource_state", fields(resource_type = tracing::field::Empty))]
    async fn upgrade_resource_state(
        &self,
        request: Request<pb::UpgradeResourceStateRequest>,
    ) -> GrpcResult<pb::UpgradeResourceStateResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let result = async {
            let raw_state = decode(&req.raw_state)?;
            self.provider
                .upgrade_resource_state(&req.resource_type, req.version, raw_state)
                .await
        }
        .await;
        let response = match result {
            Ok(state) => pb::UpgradeResourceStateResponse {
                upgraded_state: encode(&state),
                diagnostics: vec![],
            },
            Err(e) => {
                error!(version = req.version, error = %e, "UpgradeResourceState failed");
                pb::UpgradeResourceStateResponse {
                    upgraded_state: vec![],
                    diagnostics: error_diagnostics(&e),
                }
            }
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.plan", fields(resource_type = tracing::field::Empty))]
    async fn plan(&self, request: Request<pb::PlanRequest>) -> GrpcResult<pb::PlanResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let result = async {
            let prior = Some(decode(&req.prior_state)?).filter(|v| !v.is_null());
            let proposed = decode(&req.proposed_state)?;
            let config = decode(&req.config)?;
            self.provider.plan(&req.resource_type, prior, proposed, config).await
        }
        .await;
        let response = match result {
            Ok(result) => {
                info!(
                    changes = result.changes.len(),
                    requires_replace = result.requires_replace,
                    "Plan completed"
                );
                pb::PlanResponse {
                    planned_state: encode(&result.planned_state),
                    changes: result.changes.into_iter().map(Into::into).collect(),
                    requires_replace: result.requires_replace,
                    diagnostics: vec![],
                }
            }
            Err(e) => {
                error!(error = %e, "Plan failed");
                pb::PlanResponse {
                    planned_state: vec![],
                    changes: vec![],
                    requires_replace: false,
                    diagnostics: error_diagnostics(&e),
                }
            }
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.create", fields(resource_type = tracing::field::Empty))]
    async fn create(&self, request: Request<pb::CreateRequest>) -> GrpcResult<pb::CreateResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let result = async {
            let planned = decode(&req.planned_state)?;
            self.provider.create(&req.resource_type, planned).await
        }
        .await;
        let response = match result {
            Ok(state) => pb::CreateResponse {
                state: encode(&state),
                diagnostics: vec![],
            },
            Err(e) => {
                error!(error = %e, "Create failed");
                pb::CreateResponse {
                    state: vec![],
                    diagnostics: error_diagnostics(&e),
                }
            }
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.read", fields(resource_type = tracing::field::Empty))]
    async fn read(&self, request: Request<pb::ReadRequest>) -> GrpcResult<pb::ReadResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let result = async {
            let current = decode(&req.current_state)?;
            self.provider.read(&req.resource_type, current).await
        }
        .await;
        let response = match result {
            // An empty payload tells the host to drop the object from state.
            Ok(Value::Null) => pb::ReadResponse {
                state: vec![],
                diagnostics: vec![],
            },
            Ok(state) => pb::ReadResponse {
                state: encode(&state),
                diagnostics: vec![],
            },
            Err(e) => {
                error!(error = %e, "Read failed");
                pb::ReadResponse {
                    state: vec![],
                    diagnostics: error_diagnostics(&e),
                }
            }
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.update", fields(resource_type = tracing::field::Empty))]
    async fn update(&self, request: Request<pb::UpdateRequest>) -> GrpcResult<pb::UpdateResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let result = async {
            let prior = decode(&req.prior_state)?;
            let planned = decode(&req.planned_state)?;
            self.provider.update(&req.resource_type, prior, planned).await
        }
        .await;
        let response = match result {
            Ok(state) => pb::UpdateResponse {
                state: encode(&state),
                diagnostics: vec![],
            },
            Err(e) => {
                error!(error = %e, "Update failed");
                pb::UpdateResponse {
                    state: vec![],
                    diagnostics: error_diagnostics(&e),
                }
            }
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.delete", fields(resource_type = tracing::field::Empty))]
    async fn delete(&self, request: Request<pb::DeleteRequest>) -> GrpcResult<pb::DeleteResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let result = async {
            let current = decode(&req.current_state)?;
            self.provider.delete(&req.resource_type, current).await
        }
        .await;
        let diagnostics = match result {
            Ok(()) => vec![],
            Err(e) => {
                error!(error = %e, "Delete failed");
                error_diagnostics(&e)
            }
        };
        Ok(Response::new(pb::DeleteResponse { diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.import_resource_state", fields(resource_type = tracing::field::Empty, id = tracing::field::Empty))]
    async fn import_resource_state(
        &self,
        request: Request<pb::ImportResourceStateRequest>,
    ) -> GrpcResult<pb::ImportResourceStateResponse> {
        let req = request.into_inner();
        let span = tracing::Span::current();
        span.record("resource_type", req.resource_type.as_str());
        span.record("id", req.id.as_str());
        let response = match self.provider.import_resource(&req.resource_type, &req.id).await {
            Ok(imported) => pb::ImportResourceStateResponse {
                imported: imported
                    .into_iter()
                    .map(|r| pb::ImportedResource {
                        state: encode(&r.state),
                        resource_type: r.resource_type,
                    })
                    .collect(),
                diagnostics: vec![],
            },
            Err(e) => {
                error!(error = %e, "Import failed");
                pb::ImportResourceStateResponse {
                    imported: vec![],
                    diagnostics: error_diagnostics(&e),
                }
            }
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.validate_data_source_config", fields(data_source_type = tracing::field::Empty))]
    async fn validate_data_source_config(
        &self,
        request: Request<pb::ValidateDataSourceConfigRequest>,
    ) -> GrpcResult<pb::ValidateDataSourceConfigResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("data_source_type", req.data_source_type.as_str());
        let result = async {
            let config = decode(&req.config)?;
            self.provider
                .validate_data_source_config(&req.data_source_type, config)
                .await
        }
        .await;
        Ok(Response::new(pb::ValidateDataSourceConfigResponse {
            diagnostics: validation_response("validate_data_source_config", &req.data_source_type, result),
        }))
    }

    #[instrument(skip_all, name = "grpc.read_data_source", fields(data_source_type = tracing::field::Empty))]
    async fn read_data_source(
        &self,
        request: Request<pb::ReadDataSourceRequest>,
    ) -> GrpcResult<pb::ReadDataSourceResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("data_source_type", req.data_source_type.as_str());
        let result = async {
            let config = decode(&req.config)?;
            self.provider.read_data_source(&req.data_source_type, config).await
        }
        .await;
        let response = match result {
            Ok(state) => pb::ReadDataSourceResponse {
                state: encode(&state),
                diagnostics: vec![],
            },
            Err(e) => {
                error!(error = %e, "ReadDataSource failed");
                pb::ReadDataSourceResponse {
                    state: vec![],
                    diagnostics: error_diagnostics(&e),
                }
            }
        };
        Ok(Response::new(response))
    }
}

/// Server options.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// How long in-flight requests may run after a shutdown signal. Default 30 s.
    pub shutdown_timeout: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServeOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// The line printed on stdout once the server is listening.
pub fn handshake_line(addr: SocketAddr) -> String {
    format!("{}|{}|{}", HANDSHAKE_PREFIX, PROTOCOL_VERSION, addr)
}

/// Resolve when the process receives SIGTERM or SIGINT (CTRL+C on Windows).
/// If a handler cannot be installed the server runs until the host kills it.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "Failed to install signal handlers");
                    return std::future::pending().await;
                }
            };
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        }
    }

    #[cfg(windows)]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received CTRL+C, shutting down"),
            Err(e) => {
                warn!(error = %e, "Failed to install CTRL+C handler");
                std::future::pending::<()>().await;
            }
        }
    }

    #[cfg(not(any(unix, windows)))]
    std::future::pending::<()>().await;
}

/// Serve `provider` on an ephemeral localhost port.
pub async fn serve<P: ProviderService>(provider: P) -> Result<(), Box<dyn std::error::Error>> {
    serve_with_options(provider, ServeOptions::default()).await
}

/// Serve `provider` on an ephemeral localhost port with custom options.
pub async fn serve_with_options<P: ProviderService>(
    provider: P,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    serve_listener(provider, listener, options).await
}

/// Serve `provider` on `addr`.
pub async fn serve_on<P: ProviderService>(
    provider: P,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    serve_on_with_options(provider, addr, ServeOptions::default()).await
}

/// Serve `provider` on `addr` with custom options.
pub async fn serve_on_with_options<P: ProviderService>(
    provider: P,
    addr: SocketAddr,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(addr).await?;
    serve_listener(provider, listener, options).await
}

async fn serve_listener<P: ProviderService>(
    provider: P,
    listener: TcpListener,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = listener.local_addr()?;
    println!("{}", handshake_line(addr));
    info!(address = %addr, "Provider listening");

    let provider = Arc::new(provider);
    let service = pb::provider_server::ProviderServer::new(GrpcAdapter {
        provider: Arc::clone(&provider),
    });

    let server = Server::builder().add_service(service).serve_with_incoming_shutdown(
        tokio_stream::wrappers::TcpListenerStream::new(listener),
        wait_for_shutdown_signal(),
    );

    match tokio::time::timeout(options.shutdown_timeout, server).await {
        Ok(Ok(())) => info!("Server stopped"),
        Ok(Err(e)) => {
            let e = ProviderError::from(e);
            error!(error = %e, "Server failed");
            return Err(e.into());
        }
        Err(_) => warn!(timeout = ?options.shutdown_timeout, "Shutdown timed out"),
    }

    if let Err(e) = provider.stop().await {
        warn!(error = %e, "Provider stop failed");
    }
    info!("Provider shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, NestedBlock};
    use serde_json::json;

    #[test]
    fn test_handshake_line() {
        let addr: SocketAddr = "127.0.0.1:50051".parse().unwrap();
        assert_eq!(handshake_line(addr), "HEMMER_PROVIDER|1|127.0.0.1:50051");
    }

    #[test]
    fn test_decode_empty_is_null() {
        assert_eq!(decode(b"").unwrap(), Value::Null);
        assert_eq!(decode(br#"{"name":"alice"}"#).unwrap(), json!({"name": "alice"}));
        assert!(matches!(
            decode(b"not json"),
            Err(ProviderError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_plan_rejects_truncated_payload() {
        use pb::provider_server::Provider;

        let adapter = GrpcAdapter {
            provider: Arc::new(crate::RedshiftProvider::new()),
        };
        let response = adapter
            .plan(Request::new(pb::PlanRequest {
                resource_type: "redshift_user".to_string(),
                prior_state: br#"{"id":"100","name":"alice"}"#.to_vec(),
                proposed_state: br#"{"name": "alice""#.to_vec(),
                config: vec![],
            }))
            .await
            .unwrap()
            .into_inner();

        assert!(response.planned_state.is_empty());
        assert!(response.changes.is_empty());
        assert_eq!(response.diagnostics.len(), 1);
        assert_eq!(
            response.diagnostics[0].severity,
            pb::diagnostic::Severity::Error as i32
        );
        assert!(response.diagnostics[0].summary.starts_with("Serialization error"));
    }

    #[tokio::test]
    async fn test_delete_rejects_malformed_state() {
        use pb::provider_server::Provider;

        let adapter = GrpcAdapter {
            provider: Arc::new(crate::RedshiftProvider::new()),
        };
        let response = adapter
            .delete(Request::new(pb::DeleteRequest {
                resource_type: "redshift_user".to_string(),
                current_state: b"{".to_vec(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.diagnostics[0].summary.starts_with("Serialization error"));
    }

    #[test]
    fn test_error_becomes_diagnostic() {
        let diagnostics = error_diagnostics(&ProviderError::NotFound("user alice".into()));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, pb::diagnostic::Severity::Error as i32);
        assert_eq!(diagnostics[0].summary, "Resource not found: user alice");
    }

    #[test]
    fn test_block_to_proto_sorted_with_nesting() {
        let schema = Schema::v0()
            .with_attribute("name", Attribute::required_string().with_force_new())
            .with_attribute("comment", Attribute::optional_string())
            .with_block(
                "data_catalog_source",
                NestedBlock::single(Block::new().with_attribute("database_name", Attribute::required_string())),
            );
        let proto = schema_to_proto(&schema);
        let block = proto.block.unwrap();
        let names: Vec<&str> = block.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["comment", "name"]);
        assert!(block.attributes[1].force_new);
        assert_eq!(
            block.block_types[0].nesting_mode,
            pb::nested_block::NestingMode::Single as i32
        );
    }

    #[test]
    fn test_serve_options() {
        assert_eq!(ServeOptions::default().shutdown_timeout, Duration::from_secs(30));
        let options = ServeOptions::new().with_shutdown_timeout(Duration::from_secs(5));
        assert_eq!(options.shutdown_timeout, Duration::from_secs(5));
    }
}
