use std::sync::Arc;

use rmcp::{
    ServerHandler,
    handler::server::common::schema_for_type,
    model::*,
    service::{RequestContext, RoleServer},
};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::ResponderError;
use crate::models::*;
use crate::responder::Responder;

#[derive(Clone)]
pub struct ReviewServer {
    responder: Arc<Responder>,
}

impl ReviewServer {
    pub fn new(responder: Arc<Responder>) -> Self {
        Self { responder }
    }

    // ── Tool: respond_to_review ──

    async fn handle_respond(&self, params: RespondParams) -> Result<CallToolResult, ErrorData> {
        let outcome = self
            .responder
            .respond(&params.text, params.rating, params.brand_voice.as_deref())
            .await
            .map_err(to_error_data)?;

        Ok(CallToolResult::success(vec![Content::text(
            serde_json::to_string(&outcome).map_err(internal)?,
        )]))
    }

    // ── Tool: search_faqs ──

    async fn handle_search(&self, params: SearchFaqsParams) -> Result<CallToolResult, ErrorData> {
        let results = self
            .responder
            .search(&params.query, params.k)
            .await
            .map_err(to_error_data)?;

        if results.is_empty() && self.responder.snapshot().await.is_empty() {
            return Ok(CallToolResult::success(vec![Content::text(
                json!({ "message": "No FAQ entries loaded", "results": [] }).to_string(),
            )]));
        }

        Ok(CallToolResult::success(vec![Content::text(
            serde_json::to_string(&results).map_err(internal)?,
        )]))
    }

    // ── Tool: reload_faqs ──

    async fn handle_reload(&self) -> Result<CallToolResult, ErrorData> {
        let count = self.responder.reload().await.map_err(to_error_data)?;
        Ok(CallToolResult::success(vec![Content::text(
            json!({ "status": "reloaded", "entries": count }).to_string(),
        )]))
    }
}

// ── ServerHandler ──

impl ServerHandler for ReviewServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Drafts replies to customer reviews, grounded in the loaded FAQ dataset".into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "review-responder".into(),
                title: None,
                version: env!("CARGO_PKG_VERSION").into(),
                description: None,
                icons: None,
                website_url: None,
            },
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: vec![
                Tool {
                    name: "respond_to_review".into(),
                    title: None,
                    description: Some(
                        "Draft a reply to a customer review. The star rating (1-5) sets the tone; relevant FAQ answers are worked in.".into(),
                    ),
                    input_schema: schema_for_type::<RespondParams>(),
                    output_schema: None,
                    annotations: None,
                    execution: None,
                    icons: None,
                    meta: None,
                },
                Tool {
                    name: "search_faqs".into(),
                    title: None,
                    description: Some(
                        "Find the FAQ entries closest to a query, best match first.".into(),
                    ),
                    input_schema: schema_for_type::<SearchFaqsParams>(),
                    output_schema: None,
                    annotations: None,
                    execution: None,
                    icons: None,
                    meta: None,
                },
                Tool {
                    name: "reload_faqs".into(),
                    title: None,
                    description: Some(
                        "Re-read the FAQ dataset file and rebuild the search index.".into(),
                    ),
                    input_schema: schema_for_type::<ReloadFaqsParams>(),
                    output_schema: None,
                    annotations: None,
                    execution: None,
                    icons: None,
                    meta: None,
                },
            ],
            meta: None,
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        match request.name.as_ref() {
            "respond_to_review" => {
                let params: RespondParams = parse_params(&request.name, request.arguments)?;
                self.handle_respond(params).await
            }
            "search_faqs" => {
                let params: SearchFaqsParams = parse_params(&request.name, request.arguments)?;
                self.handle_search(params).await
            }
            "reload_faqs" => self.handle_reload().await,
            _ => Err(ErrorData::new(
                ErrorCode::INTERNAL_ERROR,
                format!("Unknown tool: {}", request.name),
                None,
            )),
        }
    }
}

// ── Helpers ──

fn parse_params<T: DeserializeOwned>(
    tool: &str,
    arguments: Option<JsonObject>,
) -> Result<T, ErrorData> {
    serde_json::from_value(serde_json::Value::Object(arguments.unwrap_or_default()))
        .map_err(|e| ErrorData::invalid_params(format!("Invalid {} params: {}", tool, e), None))
}

fn to_error_data(e: ResponderError) -> ErrorData {
    match e {
        ResponderError::InvalidInput(msg) => ErrorData::invalid_params(msg, None),
        other => internal(other),
    }
}

fn internal(e: impl std::fmt::Display) -> ErrorData {
    tracing::error!("Internal error: {}", e);
    ErrorData::new(ErrorCode::INTERNAL_ERROR, format!("{}", e), None)
}
