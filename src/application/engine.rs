//! Message engine
//!
//! The per-frame pipeline for one connection: response-cache check, envelope
//! parse, request validation, version-adapter dispatch, response validation,
//! cache store. CALLRESULT/CALLERROR frames feed the outbound tracker
//! instead. Every OCPP-visible reply this engine produces is structurally
//! valid; internal bugs surface as `InternalError`, never as silence.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::application::adapters::{Adapters, CallOutcome};
use crate::application::commands::RequestTracker;
use crate::application::rate_limit::{RateDecision, RateLimiter};
use crate::application::response_cache::ResponseCache;
use crate::domain::ConnectionMeta;
use crate::protocol::{OcppFrame, SchemaRegistry};

pub struct MessageEngine {
    registry: Arc<SchemaRegistry>,
    adapters: Adapters,
    cache: Arc<ResponseCache>,
    rate_limiter: Arc<RateLimiter>,
    tracker: Arc<RequestTracker>,
}

impl MessageEngine {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        adapters: Adapters,
        cache: Arc<ResponseCache>,
        rate_limiter: Arc<RateLimiter>,
        tracker: Arc<RequestTracker>,
    ) -> Self {
        Self {
            registry,
            adapters,
            cache,
            rate_limiter,
            tracker,
        }
    }

    /// Handle one inbound text frame; the return value, if any, is written
    /// back to the socket.
    pub async fn handle_text(&self, meta: &ConnectionMeta, text: &str) -> Option<String> {
        let charge_point_id = meta.charge_point_id.as_str();

        let frame = match OcppFrame::parse(text) {
            Ok(frame) => frame,
            Err(err) => {
                // Only a CALL with a salvageable id gets an answer; anything
                // else is dropped.
                let Some(unique_id) = err.answerable_call_id().map(String::from) else {
                    debug!(charge_point_id, reason = err.reason.as_str(), "Dropping malformed frame");
                    return None;
                };
                warn!(charge_point_id, reason = err.reason.as_str(), "Malformed CALL");
                let reply = OcppFrame::error(
                    unique_id.clone(),
                    meta.ocpp_version.format_violation_code(),
                    "Malformed message",
                    json!({"reason": err.reason}),
                )
                .serialize();
                self.cache.store(charge_point_id, &unique_id, &reply).await;
                return Some(reply);
            }
        };

        match frame {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => {
                self.handle_call(meta, unique_id, action, payload).await
            }
            OcppFrame::CallResult { unique_id, payload } => {
                self.tracker
                    .handle_call_result(charge_point_id, &unique_id, payload);
                None
            }
            OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => {
                self.tracker.handle_call_error(
                    charge_point_id,
                    &unique_id,
                    &error_code,
                    &error_description,
                    error_details,
                );
                None
            }
        }
    }

    async fn handle_call(
        &self,
        meta: &ConnectionMeta,
        unique_id: String,
        action: String,
        payload: Value,
    ) -> Option<String> {
        let charge_point_id = meta.charge_point_id.as_str();
        let version = meta.ocpp_version;

        // A retransmitted CALL gets its previous reply, verbatim, before
        // anything else runs.
        if let Some(cached) = self.cache.get(charge_point_id, &unique_id).await {
            debug!(charge_point_id, message_id = unique_id.as_str(), "Response cache hit");
            return Some(cached);
        }

        metrics::counter!("ocpp_messages_total", "action" => action.clone()).increment(1);

        let decision = self.rate_limiter.check(&action, charge_point_id).await;
        if let RateDecision::Limited { .. } = decision {
            warn!(charge_point_id, action = action.as_str(), "Rate limit exceeded");
            let reply = OcppFrame::error(
                unique_id.clone(),
                "OccurrenceConstraintViolation",
                "Rate limit exceeded",
                self.rate_limiter.violation_details(&action, &decision),
            )
            .serialize();
            self.cache.store(charge_point_id, &unique_id, &reply).await;
            return Some(reply);
        }

        if !self.registry.has_request_schema(version, &action) {
            let reply = OcppFrame::error(
                unique_id.clone(),
                "NotImplemented",
                format!("Action not implemented: {action}"),
                json!({}),
            )
            .serialize();
            self.cache.store(charge_point_id, &unique_id, &reply).await;
            return Some(reply);
        }

        let validation = self.registry.validate_request(version, &action, &payload);
        if !validation.is_valid() {
            let reply = OcppFrame::error(
                unique_id.clone(),
                version.format_violation_code(),
                "Payload validation failed",
                json!({"errors": validation.errors()}),
            )
            .serialize();
            self.cache.store(charge_point_id, &unique_id, &reply).await;
            return Some(reply);
        }

        let adapter = self.adapters.for_version(version);
        let outcome = adapter.handle_call(meta, &action, &payload).await;

        let reply = match outcome {
            CallOutcome::Reply(response) => {
                let response_validation =
                    self.registry.validate_response(version, &action, &response);
                if response_validation.is_valid() {
                    OcppFrame::CallResult {
                        unique_id: unique_id.clone(),
                        payload: response,
                    }
                } else {
                    // Our own reply failed its schema. This is a gateway bug;
                    // say so instead of sending garbage.
                    error!(
                        charge_point_id,
                        action = action.as_str(),
                        errors = ?response_validation.errors(),
                        "Gateway response failed schema validation"
                    );
                    metrics::counter!("ocpp_internal_errors_total").increment(1);
                    OcppFrame::error(
                        unique_id.clone(),
                        "InternalError",
                        "Response validation failed",
                        json!({"errors": response_validation.errors()}),
                    )
                }
            }
            CallOutcome::Error {
                code,
                description,
                details,
            } => OcppFrame::error(unique_id.clone(), code, description, details),
        };

        let body = reply.serialize();
        self.cache.store(charge_point_id, &unique_id, &body).await;
        Some(body)
    }
}
