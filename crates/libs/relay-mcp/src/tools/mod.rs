//! MCP tool surface for Agent Relay.
//!
//! A single service struct routes every tool; the configurable filter
//! decides which clusters are exposed to an agent, and every call is
//! timed into the tool_metrics table.

use rmcp::{
    ErrorData as McpError,
    handler::server::{ServerHandler, tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolRequestParam, CallToolResult, Content, ListResourcesResult, ListToolsResult,
        PaginatedRequestParam, RawResource, ReadResourceRequestParam, ReadResourceResult, Resource,
        ResourceContents,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};
use std::sync::Arc;

use relay_common::Settings;
use relay_core::{
    ctx::Ctx,
    model::{
        ModelManager,
        file_reservation::FileReservationBmc,
        message::{InboxFilter, MessageBmc},
        project::ProjectBmc,
        tool_metric::ToolMetricBmc,
    },
};

pub mod contacts;
pub mod errors;
pub mod files;
pub mod helpers;
pub mod messaging;
mod params;
pub mod products;
pub mod project;

pub use params::*;

/// Tool clusters used by the exposure filter.
const CLUSTERS: &[(&str, &[&str])] = &[
    (
        "identity",
        &[
            "ensure_project",
            "register_agent",
            "create_agent_identity",
            "whois",
            "set_contact_policy",
            "bind_window_identity",
        ],
    ),
    (
        "messaging",
        &[
            "send_message",
            "reply_message",
            "fetch_inbox",
            "list_outbox",
            "mark_message_read",
            "acknowledge_message",
            "search_messages",
            "summarize_thread",
        ],
    ),
    (
        "reservations",
        &[
            "file_reservation_paths",
            "release_file_reservations",
            "renew_file_reservations",
            "force_release_file_reservation",
            "list_file_reservations",
        ],
    ),
    (
        "contacts",
        &["request_contact", "respond_contact", "list_contacts"],
    ),
    (
        "products",
        &[
            "create_product",
            "link_project_to_product",
            "product_inbox",
            "product_search",
        ],
    ),
    ("admin", &["health_check", "list_projects"]),
];

fn cluster_of(tool_name: &str) -> Option<&'static str> {
    CLUSTERS
        .iter()
        .find(|(_, tools)| tools.contains(&tool_name))
        .map(|(cluster, _)| *cluster)
}

/// Whether the filter settings expose a tool.
fn tool_exposed(settings: &Settings, tool_name: &str) -> bool {
    let filter = &settings.tool_filter;
    if !filter.enabled {
        return true;
    }
    match filter.profile.as_str() {
        "full" => true,
        "core" => matches!(
            cluster_of(tool_name),
            Some("identity" | "messaging" | "reservations" | "admin")
        ),
        "minimal" => matches!(
            tool_name,
            "ensure_project" | "register_agent" | "send_message" | "fetch_inbox" | "health_check"
        ),
        "messaging" => matches!(cluster_of(tool_name), Some("identity" | "messaging" | "admin")),
        "custom" => {
            let named = filter.tools.iter().any(|t| t == tool_name)
                || cluster_of(tool_name)
                    .map(|c| filter.clusters.iter().any(|f| f == c))
                    .unwrap_or(false);
            if filter.mode == "exclude" { !named } else { named }
        }
        _ => true,
    }
}

#[derive(Clone)]
pub struct RelayService {
    mm: Arc<ModelManager>,
    tool_router: ToolRouter<Self>,
}

impl RelayService {
    /// Build the full core from frozen settings.
    pub async fn new(settings: Arc<Settings>) -> anyhow::Result<Self> {
        let mm = Arc::new(ModelManager::new(settings).await?);
        Ok(Self::new_with_mm(mm))
    }

    /// Wrap an existing core (tests and the server binary share this).
    pub fn new_with_mm(mm: Arc<ModelManager>) -> Self {
        Self {
            mm,
            tool_router: Self::tool_router(),
        }
    }

    pub fn model_manager(&self) -> Arc<ModelManager> {
        self.mm.clone()
    }

    fn ctx(&self) -> Ctx {
        Ctx::root_ctx()
    }

    async fn record_tool_metric(
        &self,
        tool_name: &str,
        duration: std::time::Duration,
        result: &Result<CallToolResult, McpError>,
    ) {
        let error_kind = match result {
            Ok(_) => None,
            Err(e) => Some(
                e.data
                    .as_ref()
                    .and_then(|d| d.get("error_code"))
                    .and_then(|c| c.as_str())
                    .unwrap_or("INTERNAL_ERROR")
                    .to_string(),
            ),
        };
        if let Err(e) = ToolMetricBmc::record(
            &self.ctx(),
            &self.mm,
            tool_name,
            duration.as_secs_f64() * 1000.0,
            result.is_ok(),
            error_kind.as_deref(),
        )
        .await
        {
            tracing::debug!(error = %e, "failed to record tool metric");
        }
    }

    /// Read-only resource surface.
    ///
    /// URIs: `relay://project/<slug>`, `relay://message/<id>?project=`,
    /// `relay://mailbox/<agent>?project=&limit=`,
    /// `relay://outbox/<agent>?project=&limit=`,
    /// `relay://file_reservations/<slug>?active_only=`.
    pub async fn read_resource_impl(
        &self,
        request: ReadResourceRequestParam,
    ) -> Result<ReadResourceResult, McpError> {
        let uri_str = request.uri;
        let uri = url::Url::parse(&uri_str)
            .map_err(|e| McpError::invalid_params(format!("Invalid URI: {}", e), None))?;

        if uri.scheme() != "relay" {
            return Err(McpError::invalid_params(
                "URI scheme must be 'relay'".to_string(),
                None,
            ));
        }

        let query: std::collections::HashMap<_, _> = uri.query_pairs().into_owned().collect();
        let project_param = query.get("project").cloned();
        let limit = query
            .get("limit")
            .and_then(|l| l.parse::<i64>().ok())
            .unwrap_or(20);

        let resource_type = uri.host_str().ok_or(McpError::invalid_params(
            "URI missing resource type".to_string(),
            None,
        ))?;
        let segments: Vec<&str> = uri
            .path_segments()
            .map(|s| s.collect())
            .unwrap_or_default();
        let resource_id = segments.first().copied().ok_or(McpError::invalid_params(
            "URI missing resource id".to_string(),
            None,
        ))?;

        let ctx = self.ctx();
        let mm = &self.mm;

        let payload = match resource_type {
            "project" => {
                let project = ProjectBmc::get_by_slug(&ctx, mm, resource_id)
                    .await
                    .map_err(errors::map_core_error)?;
                let agents =
                    relay_core::model::agent::AgentBmc::list_all_for_project(&ctx, mm, project.id)
                        .await
                        .map_err(errors::map_core_error)?;
                serde_json::json!({ "project": project, "agents": agents })
            }
            "message" => {
                let id: i64 = resource_id.parse().map_err(|_| {
                    McpError::invalid_params("message id must be numeric".to_string(), None)
                })?;
                let message = MessageBmc::get(&ctx, mm, id)
                    .await
                    .map_err(errors::map_core_error)?;
                let recipients = MessageBmc::get_recipients(&ctx, mm, id)
                    .await
                    .map_err(errors::map_core_error)?;
                serde_json::json!({ "message": message, "recipients": recipients })
            }
            "mailbox" | "outbox" => {
                let project_slug = project_param.ok_or(McpError::invalid_params(
                    "missing ?project= parameter".to_string(),
                    None,
                ))?;
                let project = ProjectBmc::get_by_slug(&ctx, mm, &project_slug)
                    .await
                    .map_err(errors::map_core_error)?;
                let agent =
                    relay_core::model::agent::AgentBmc::get_by_name(&ctx, mm, project.id, resource_id)
                        .await
                        .map_err(errors::map_core_error)?;
                if resource_type == "mailbox" {
                    let items = MessageBmc::fetch_inbox(
                        &ctx,
                        mm,
                        agent.id,
                        &InboxFilter {
                            limit,
                            include_bodies: false,
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(errors::map_core_error)?;
                    serde_json::json!({ "agent": agent.name, "messages": items })
                } else {
                    let items = MessageBmc::list_outbox(&ctx, mm, project.id, agent.id, limit, false)
                        .await
                        .map_err(errors::map_core_error)?;
                    serde_json::json!({ "agent": agent.name, "messages": items })
                }
            }
            "file_reservations" => {
                let project = ProjectBmc::get_by_slug(&ctx, mm, resource_id)
                    .await
                    .map_err(errors::map_core_error)?;
                let active_only = query
                    .get("active_only")
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(true);
                let reservations = if active_only {
                    FileReservationBmc::list_active_for_project(&ctx, mm, project.id).await
                } else {
                    FileReservationBmc::list_all_for_project(&ctx, mm, project.id).await
                }
                .map_err(errors::map_core_error)?;
                serde_json::json!({ "project": project.slug, "reservations": reservations })
            }
            other => {
                return Err(McpError::invalid_params(
                    format!("Unknown resource type: {}", other),
                    None,
                ));
            }
        };

        Ok(ReadResourceResult {
            contents: vec![ResourceContents::TextResourceContents {
                uri: uri_str,
                mime_type: Some("application/json".to_string()),
                text: serde_json::to_string_pretty(&payload)
                    .map_err(|e| McpError::internal_error(e.to_string(), None))?,
                meta: None,
            }],
        })
    }

    async fn list_resources_impl(
        &self,
        _request: Option<PaginatedRequestParam>,
    ) -> Result<ListResourcesResult, McpError> {
        let ctx = self.ctx();
        let projects = ProjectBmc::list_all(&ctx, &self.mm)
            .await
            .map_err(errors::map_core_error)?;

        let resources = projects
            .into_iter()
            .map(|p| Resource {
                raw: RawResource {
                    uri: format!("relay://project/{}", p.slug),
                    name: p.slug.clone(),
                    description: Some(format!("Project '{}' with its agents", p.slug)),
                    mime_type: Some("application/json".to_string()),
                    size: None,
                    icons: None,
                    meta: None,
                    title: None,
                },
                annotations: None,
            })
            .collect();

        Ok(ListResourcesResult {
            resources,
            next_cursor: None,
            meta: None,
        })
    }
}

impl ServerHandler for RelayService {
    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        async move {
            let settings = &self.mm.settings;
            let tools = self
                .tool_router
                .list_all()
                .into_iter()
                .filter(|tool| tool_exposed(settings, &tool.name))
                .collect();

            Ok(ListToolsResult {
                tools,
                next_cursor: None,
                meta: None,
            })
        }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        async move {
            let start = std::time::Instant::now();
            let original_name = request.name.clone();
            let args = request.arguments.clone();

            // Legacy aliases kept for older agent prompts.
            let resolved_name: Option<&str> = match &*original_name {
                "check_inbox" | "list_inbox" => Some("fetch_inbox"),
                "reserve_paths" => Some("file_reservation_paths"),
                _ => None,
            };

            let request = if let Some(new_name) = resolved_name {
                tracing::debug!(original = %original_name, resolved = %new_name, "resolved tool alias");
                CallToolRequestParam {
                    name: new_name.into(),
                    arguments: args,
                }
            } else {
                request
            };

            let tool_name = request.name.clone();

            if !tool_exposed(&self.mm.settings, &tool_name) {
                return Err(McpError::invalid_request(
                    format!("Tool '{}' is not exposed by the current tool filter", tool_name),
                    None,
                ));
            }

            let tool_context =
                rmcp::handler::server::tool::ToolCallContext::new(self, request, context);
            let result = self.tool_router.call(tool_context).await;

            let duration = start.elapsed();
            self.record_tool_metric(&tool_name, duration, &result).await;

            result
        }
    }

    fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListResourcesResult, McpError>> + Send + '_ {
        async move { self.list_resources_impl(_request).await }
    }

    fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ReadResourceResult, McpError>> + Send + '_ {
        self.read_resource_impl(request)
    }
}

// ============================================================================
// Tool Implementations
// ============================================================================

#[tool_router]
impl RelayService {
    #[tool(
        description = "Create or fetch the project for a working-copy path or logical name. Idempotent; symlinked spellings land on the same slug."
    )]
    async fn ensure_project(
        &self,
        params: Parameters<EnsureProjectParams>,
    ) -> Result<CallToolResult, McpError> {
        project::ensure_project_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(description = "Register an agent in a project. Registration is idempotent on name.")]
    async fn register_agent(
        &self,
        params: Parameters<RegisterAgentParams>,
    ) -> Result<CallToolResult, McpError> {
        project::register_agent_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(description = "Mint a fresh memorable agent identity (Adjective+Noun).")]
    async fn create_agent_identity(
        &self,
        params: Parameters<CreateAgentIdentityParams>,
    ) -> Result<CallToolResult, McpError> {
        project::create_agent_identity_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(description = "Look up an agent's profile, activity and message counts.")]
    async fn whois(&self, params: Parameters<WhoisParams>) -> Result<CallToolResult, McpError> {
        project::whois_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(description = "Bind a terminal window UUID to a persistent agent display name.")]
    async fn bind_window_identity(
        &self,
        params: Parameters<BindWindowIdentityParams>,
    ) -> Result<CallToolResult, McpError> {
        project::bind_window_identity_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(
        description = "Send a message. Recipients: `Name`, `Name@project`, or `project:slug#Name`. Cross-project delivery is contact-gated; sends are refused on conflicting exclusive file reservations."
    )]
    async fn send_message(
        &self,
        params: Parameters<SendMessageParams>,
    ) -> Result<CallToolResult, McpError> {
        messaging::send_message_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(description = "Reply to a message, continuing its thread.")]
    async fn reply_message(
        &self,
        params: Parameters<ReplyMessageParams>,
    ) -> Result<CallToolResult, McpError> {
        messaging::reply_message_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(description = "Fetch an agent's inbox, newest first, with optional filters.")]
    async fn fetch_inbox(
        &self,
        params: Parameters<FetchInboxParams>,
    ) -> Result<CallToolResult, McpError> {
        messaging::fetch_inbox_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(description = "List messages an agent has sent, newest first.")]
    async fn list_outbox(
        &self,
        params: Parameters<ListOutboxParams>,
    ) -> Result<CallToolResult, McpError> {
        messaging::list_outbox_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(description = "Mark a message as read by a recipient.")]
    async fn mark_message_read(
        &self,
        params: Parameters<MarkMessageReadParams>,
    ) -> Result<CallToolResult, McpError> {
        messaging::mark_message_read_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(description = "Acknowledge a message that requires acknowledgement.")]
    async fn acknowledge_message(
        &self,
        params: Parameters<AcknowledgeMessageParams>,
    ) -> Result<CallToolResult, McpError> {
        messaging::acknowledge_message_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(
        description = "Search messages. Query language: bare tokens, subject:X, body:X, quoted phrases."
    )]
    async fn search_messages(
        &self,
        params: Parameters<SearchMessagesParams>,
    ) -> Result<CallToolResult, McpError> {
        messaging::search_messages_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(
        description = "Summarize a thread: participants, span, action items and key points. Use `msg:<id>` for a single message."
    )]
    async fn summarize_thread(
        &self,
        params: Parameters<SummarizeThreadParams>,
    ) -> Result<CallToolResult, McpError> {
        messaging::summarize_thread_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(
        description = "Reserve file path patterns (gitignore-style) to signal edit intent. Grants always succeed; conflicts with other agents' exclusive reservations are reported."
    )]
    async fn file_reservation_paths(
        &self,
        params: Parameters<FileReservationPathsParams>,
    ) -> Result<CallToolResult, McpError> {
        files::file_reservation_paths_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(description = "Release the caller's reservations on the given patterns.")]
    async fn release_file_reservations(
        &self,
        params: Parameters<ReleaseFileReservationsParams>,
    ) -> Result<CallToolResult, McpError> {
        files::release_file_reservations_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(description = "Extend the caller's reservations on the given patterns.")]
    async fn renew_file_reservations(
        &self,
        params: Parameters<RenewFileReservationsParams>,
    ) -> Result<CallToolResult, McpError> {
        files::renew_file_reservations_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(
        description = "Force-release another agent's reservation after its holder has gone stale (inactive holder AND quiet sidecar)."
    )]
    async fn force_release_file_reservation(
        &self,
        params: Parameters<ForceReleaseFileReservationParams>,
    ) -> Result<CallToolResult, McpError> {
        files::force_release_file_reservation_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(description = "List a project's file reservations.")]
    async fn list_file_reservations(
        &self,
        params: Parameters<ListFileReservationsParams>,
    ) -> Result<CallToolResult, McpError> {
        files::list_file_reservations_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(description = "Request cross-project contact with another agent.")]
    async fn request_contact(
        &self,
        params: Parameters<RequestContactParams>,
    ) -> Result<CallToolResult, McpError> {
        contacts::request_contact_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(description = "Accept or refuse a pending contact request.")]
    async fn respond_contact(
        &self,
        params: Parameters<RespondContactParams>,
    ) -> Result<CallToolResult, McpError> {
        contacts::respond_contact_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(description = "List an agent's approved contacts and pending incoming requests.")]
    async fn list_contacts(
        &self,
        params: Parameters<ListContactsParams>,
    ) -> Result<CallToolResult, McpError> {
        contacts::list_contacts_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(description = "Set an agent's contact policy: open, auto, contacts_only, block_all.")]
    async fn set_contact_policy(
        &self,
        params: Parameters<SetContactPolicyParams>,
    ) -> Result<CallToolResult, McpError> {
        contacts::set_contact_policy_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(description = "Create a product: a named set of projects for cross-project queries.")]
    async fn create_product(
        &self,
        params: Parameters<CreateProductParams>,
    ) -> Result<CallToolResult, McpError> {
        products::create_product_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(description = "Link a project into a product.")]
    async fn link_project_to_product(
        &self,
        params: Parameters<LinkProjectToProductParams>,
    ) -> Result<CallToolResult, McpError> {
        products::link_project_to_product_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(description = "Product-wide inbox for one agent name across linked projects.")]
    async fn product_inbox(
        &self,
        params: Parameters<ProductInboxParams>,
    ) -> Result<CallToolResult, McpError> {
        products::product_inbox_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(description = "Product-wide search across linked projects.")]
    async fn product_search(
        &self,
        params: Parameters<ProductSearchParams>,
    ) -> Result<CallToolResult, McpError> {
        products::product_search_impl(&self.ctx(), &self.mm, params.0).await
    }

    #[tool(description = "Check database connectivity and core health.")]
    async fn health_check(&self) -> Result<CallToolResult, McpError> {
        let healthy = self
            .mm
            .health_check()
            .await
            .map_err(errors::map_core_error)?;
        let breaker_open = self.mm.breaker().is_open();
        let text = serde_json::to_string_pretty(&serde_json::json!({
            "healthy": healthy,
            "circuit_breaker_open": breaker_open,
        }))
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(description = "List all projects.")]
    async fn list_projects(&self) -> Result<CallToolResult, McpError> {
        let projects = ProjectBmc::list_all(&self.ctx(), &self.mm)
            .await
            .map_err(errors::map_core_error)?;
        let text = serde_json::to_string_pretty(&projects)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}
