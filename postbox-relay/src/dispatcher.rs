//! Request routing.
//!
//! Each decoded frame is routed by its code to one handler. Handlers never
//! fail the connection: domain and validation errors become the handler's
//! failure response, storage failures and panics become a general error.

use crate::error::{HandlerError, HandlerResult};
use crate::metrics::RelayMetrics;
use crate::storage::{IdentityRegistry, MailboxStore};
use futures_util::FutureExt;
use postbox_types::payloads::{
    DeliveredItem, MessagesRequest, MessagesResponse, PublicKeyRequest, PublicKeyResponse,
    RegisterRequest, RegistrationResponse, SendRequest, TextResponse, UserEntry, UsersResponse,
};
use postbox_types::{
    encode_frame, ClientId, Frame, FrameError, ItemType, RequestCode, ResponseCode,
    MAX_PAYLOAD_SIZE,
};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Text sent for any internal failure.
pub const INTERNAL_ERROR_TEXT: &str = "internal error";

/// One response frame, before encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response code.
    pub code: ResponseCode,
    /// Encoded payload.
    pub payload: Vec<u8>,
}

impl Response {
    /// A response carrying only a text field.
    pub fn text(code: ResponseCode, text: impl Into<String>) -> Self {
        Self {
            code,
            payload: TextResponse::new(text).encode(),
        }
    }

    /// A `GeneralError` response.
    pub fn general_error(text: impl Into<String>) -> Self {
        Self::text(ResponseCode::GeneralError, text)
    }

    /// The `GeneralError` response for internal failures.
    pub fn internal_error() -> Self {
        Self::general_error(INTERNAL_ERROR_TEXT)
    }

    /// Encode as a complete frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        encode_frame(self.code.as_u16(), &self.payload)
    }
}

/// Routes request frames to the registry and mailbox.
pub struct Dispatcher {
    registry: Arc<dyn IdentityRegistry>,
    mailbox: Arc<dyn MailboxStore>,
    metrics: Arc<RelayMetrics>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher over the given stores.
    pub fn new(
        registry: Arc<dyn IdentityRegistry>,
        mailbox: Arc<dyn MailboxStore>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            registry,
            mailbox,
            metrics,
        }
    }

    /// Metrics updated by this dispatcher.
    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    /// Handle one frame. Always produces exactly one response.
    pub async fn dispatch(&self, frame: &Frame) -> Response {
        RelayMetrics::incr(&self.metrics.requests_total);
        let code = frame.code();

        let response = match AssertUnwindSafe(self.route(code, &frame.payload))
            .catch_unwind()
            .await
        {
            Ok(response) => response,
            Err(_) => {
                tracing::error!("Handler for request code {} panicked", code);
                RelayMetrics::incr(&self.metrics.internal_errors_total);
                Response::internal_error()
            }
        };

        if response.code.is_failure() {
            RelayMetrics::incr(&self.metrics.failures_total);
        }
        tracing::debug!(
            "Request {} -> response {} ({} bytes)",
            code,
            response.code.as_u16(),
            response.payload.len()
        );
        response
    }

    async fn route(&self, code: u16, payload: &[u8]) -> Response {
        let request = match RequestCode::try_from(code) {
            Ok(request) => request,
            Err(unknown) => {
                tracing::debug!("Unknown request code {}", unknown);
                return Response::general_error(format!("unknown request code {unknown}"));
            }
        };

        let (failure, result) = match request {
            RequestCode::Register => (
                ResponseCode::RegistrationFailure,
                self.handle_register(payload).await,
            ),
            RequestCode::SendMessage => (
                ResponseCode::SendMessageFailure,
                self.handle_send(payload, ItemType::Message).await,
            ),
            RequestCode::SendSymmetricKey => (
                ResponseCode::SymmetricKeyFailure,
                self.handle_send(payload, ItemType::SymmetricKey).await,
            ),
            RequestCode::RequestMessages => (
                ResponseCode::GeneralError,
                self.handle_request_messages(payload).await,
            ),
            RequestCode::RequestUsers => {
                (ResponseCode::GeneralError, self.handle_request_users().await)
            }
            RequestCode::RequestPublicKey => (
                ResponseCode::PublicKeyFailure,
                self.handle_request_public_key(payload).await,
            ),
            RequestCode::Logout => (
                ResponseCode::LogoutFailure,
                Err(HandlerError::Unsupported("logout")),
            ),
        };

        match result {
            Ok(response) => response,
            Err(HandlerError::Internal(e)) => {
                tracing::error!("{:?} failed: {}", request, e);
                RelayMetrics::incr(&self.metrics.internal_errors_total);
                Response::internal_error()
            }
            Err(e) => {
                tracing::debug!("{:?} refused: {}", request, e);
                Response::text(failure, e.to_string())
            }
        }
    }

    async fn handle_register(&self, payload: &[u8]) -> HandlerResult<Response> {
        let req = RegisterRequest::decode(payload)?;
        let client_id = self.registry.register(&req.name, &req.public_key).await?;

        RelayMetrics::incr(&self.metrics.registrations_total);
        tracing::info!("Registered {:?} as {}", req.name, client_id);

        Ok(Response {
            code: ResponseCode::RegistrationSuccess,
            payload: RegistrationResponse {
                client_id,
                text: format!("registered {}", req.name),
            }
            .encode(),
        })
    }

    async fn handle_send(&self, payload: &[u8], item_type: ItemType) -> HandlerResult<Response> {
        let req = SendRequest::decode(payload)?;

        let sender = self
            .registry
            .lookup_by_id(&req.sender)
            .await?
            .ok_or_else(|| HandlerError::UnknownSender(req.sender.to_string()))?;
        self.touch(&sender.client_id).await;

        let recipient = self
            .registry
            .lookup_by_name_or_id(&req.recipient)
            .await?
            .ok_or_else(|| HandlerError::UnknownRecipient(req.recipient.clone()))?;

        let item_id = self
            .mailbox
            .enqueue(
                &sender.client_id,
                &recipient.client_id,
                item_type,
                &req.content,
            )
            .await?;

        RelayMetrics::incr(&self.metrics.items_enqueued);
        tracing::debug!(
            "Queued item {} ({:?}, {} bytes) from {} to {}",
            item_id,
            item_type,
            req.content.len(),
            sender.client_id,
            recipient.client_id
        );

        Ok(match item_type {
            ItemType::Message => Response::text(
                ResponseCode::SendMessageSuccess,
                format!("message queued for {}", recipient.name),
            ),
            ItemType::SymmetricKey => {
                Response::text(ResponseCode::SymmetricKeySuccess, "symmetric key queued")
            }
        })
    }

    async fn handle_request_messages(&self, payload: &[u8]) -> HandlerResult<Response> {
        let req = MessagesRequest::decode(payload)?;
        self.touch(&req.requester).await;

        let budget = MAX_PAYLOAD_SIZE - MessagesResponse::HEADER_SIZE;
        let items = self.mailbox.drain_within(&req.requester, budget).await?;

        RelayMetrics::add(&self.metrics.items_delivered, items.len() as u64);
        tracing::debug!("Delivered {} items to {}", items.len(), req.requester);

        let response = MessagesResponse {
            items: items
                .into_iter()
                .map(|item| DeliveredItem {
                    from: item.from_client_id,
                    item_id: wire_item_id(item.id),
                    item_type: item.item_type,
                    content: item.content,
                })
                .collect(),
        };

        Ok(Response {
            code: ResponseCode::MessagesResponse,
            payload: response.encode(),
        })
    }

    async fn handle_request_users(&self) -> HandlerResult<Response> {
        let identities = self.registry.list_all().await?;

        let max_entries = (MAX_PAYLOAD_SIZE - UsersResponse::HEADER_SIZE) / UserEntry::SIZE;
        if identities.len() > max_entries {
            tracing::warn!(
                "User listing truncated to {} of {} identities",
                max_entries,
                identities.len()
            );
        }

        let response = UsersResponse {
            users: identities
                .into_iter()
                .take(max_entries)
                .map(|identity| UserEntry {
                    client_id: identity.client_id,
                    name: identity.name,
                })
                .collect(),
        };

        Ok(Response {
            code: ResponseCode::UsersResponse,
            payload: response.encode(),
        })
    }

    async fn handle_request_public_key(&self, payload: &[u8]) -> HandlerResult<Response> {
        let req = PublicKeyRequest::decode(payload)?;

        let identity = self
            .registry
            .lookup_by_name_or_id(&req.identifier)
            .await?
            .ok_or_else(|| HandlerError::UnknownRecipient(req.identifier.clone()))?;

        Ok(Response {
            code: ResponseCode::PublicKeyResponse,
            payload: PublicKeyResponse {
                client_id: identity.client_id,
                public_key: identity.public_key,
                text: format!("public key of {}", identity.name),
            }
            .encode(),
        })
    }

    /// Refresh `last_seen`; failures are logged and ignored.
    async fn touch(&self, id: &ClientId) {
        if let Err(e) = self.registry.touch_last_seen(id).await {
            tracing::warn!("Failed to update last_seen for {}: {}", id, e);
        }
    }
}

/// The wire carries 32-bit item ids; larger store ids keep their low bits.
fn wire_item_id(id: u64) -> u32 {
    u32::try_from(id).unwrap_or_else(|_| {
        tracing::warn!("Item id {} exceeds the 32-bit wire field, truncating", id);
        id as u32
    })
}
