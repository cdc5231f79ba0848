use crate::directory::EntryCursor;
use crate::dn::Dn;
use crate::interceptor::{InterceptorChain, SearchParams};
use crate::ldap::protocol::BindAuthentication;
use crate::ldap::{
    LdapCodec, LdapFilter, LdapMessage, LdapMessageId, LdapProtocolOp, LdapResult, LdapResultCode,
    SearchScope,
};
use crate::LdapMuxError;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

const USER_PASSWORD: &str = "userPassword";

pub async fn handle_connection(socket: TcpStream, chain: Arc<InterceptorChain>) -> crate::Result<()> {
    let peer_addr = socket.peer_addr()?;
    info!("Handling connection from {}", peer_addr);

    let mut framed = Framed::new(socket, LdapCodec::new());

    // Message handling loop
    while let Some(result) = framed.next().await {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                error!("Error reading from socket: {}", e);
                break;
            }
        };
        debug!(
            "Received {} with id {} from {}",
            message.protocol_op.name(),
            message.message_id,
            peer_addr
        );

        let id = message.message_id;
        let responses = match message.protocol_op {
            LdapProtocolOp::BindRequest {
                dn, authentication, ..
            } => vec![LdapMessage::new(
                id,
                LdapProtocolOp::BindResponse {
                    result: bind(&chain, &dn, &authentication),
                    server_sasl_creds: None,
                },
            )],
            LdapProtocolOp::SearchRequest {
                base_dn,
                scope,
                size_limit,
                types_only,
                filter,
                attributes,
                ..
            } => search(
                &chain,
                id,
                &base_dn,
                scope,
                filter,
                &SearchOptions {
                    attributes,
                    size_limit,
                    types_only,
                },
            ),
            LdapProtocolOp::AbandonRequest { message_id } => {
                // Requests are answered in full before the next one is read.
                debug!("Client abandoned {}, nothing in flight", message_id);
                Vec::new()
            }
            LdapProtocolOp::UnbindRequest => {
                info!("Client unbind, closing connection");
                break;
            }
            other => {
                warn!("Ignoring {} from {}", other.name(), peer_addr);
                Vec::new()
            }
        };

        for response in responses {
            if let Err(e) = framed.feed(response).await {
                error!("Failed to send response: {}", e);
                return Err(e.into());
            }
        }
        framed.flush().await?;
    }

    info!("Connection closed for {}", peer_addr);
    Ok(())
}

fn error_result(error: &LdapMuxError) -> LdapResult {
    match error {
        LdapMuxError::Referral(redirect) => LdapResult::referral(redirect.urls.clone()),
        e => LdapResult::error(e.result_code(), e.to_string()),
    }
}

fn bind(chain: &InterceptorChain, dn: &str, authentication: &BindAuthentication) -> LdapResult {
    let password = match authentication {
        BindAuthentication::Simple(password) => password,
        BindAuthentication::Sasl { mechanism, .. } => {
            return LdapResult::error(
                LdapResultCode::AuthMethodNotSupported,
                format!("SASL mechanism {} is not supported", mechanism),
            )
        }
    };

    if dn.is_empty() && password.is_empty() {
        debug!("Anonymous bind");
        return LdapResult::success();
    }
    if password.is_empty() {
        return LdapResult::error(
            LdapResultCode::UnwillingToPerform,
            "Unauthenticated binds are not allowed".to_string(),
        );
    }

    let dn = match Dn::parse(dn) {
        Ok(dn) => dn,
        Err(e) => return error_result(&e),
    };
    match chain.lookup(&dn) {
        Ok(Some(entry)) if entry.values(USER_PASSWORD).iter().any(|v| v == password) => {
            info!("Successful bind for DN: {}", dn);
            LdapResult::success()
        }
        Ok(_) => LdapResult::error(
            LdapResultCode::InvalidCredentials,
            "Invalid credentials".to_string(),
        ),
        Err(e) => {
            debug!("Bind for {} failed: {}", dn, e);
            error_result(&e)
        }
    }
}

struct SearchOptions {
    attributes: Vec<String>,
    size_limit: u32,
    types_only: bool,
}

fn done(id: LdapMessageId, result: LdapResult) -> LdapMessage {
    LdapMessage::new(id, LdapProtocolOp::SearchResultDone { result })
}

/// Runs a search through the chain. A referral raised while scanning
/// becomes a continuation reference; any other error ends the search.
fn search(
    chain: &InterceptorChain,
    id: LdapMessageId,
    base_dn: &str,
    scope: SearchScope,
    filter: LdapFilter,
    options: &SearchOptions,
) -> Vec<LdapMessage> {
    let base = match Dn::parse(base_dn) {
        Ok(dn) => dn,
        Err(e) => return vec![done(id, error_result(&e))],
    };
    let mut cursor = match chain.search(&SearchParams::new(base, scope, filter)) {
        Ok(cursor) => cursor,
        Err(e) => {
            debug!("Search under {} failed: {}", base_dn, e);
            return vec![done(id, error_result(&e))];
        }
    };

    let mut responses = Vec::new();
    let mut returned: u32 = 0;
    loop {
        match cursor.next() {
            Ok(true) => {}
            Ok(false) => break,
            Err(LdapMuxError::Referral(redirect)) => {
                responses.push(LdapMessage::new(
                    id,
                    LdapProtocolOp::SearchResultReference { urls: redirect.urls },
                ));
                continue;
            }
            Err(e) => {
                responses.push(done(id, error_result(&e)));
                return responses;
            }
        }

        if options.size_limit > 0 && returned >= options.size_limit {
            responses.push(done(
                id,
                LdapResult::error(
                    LdapResultCode::SizeLimitExceeded,
                    format!("Size limit of {} exceeded", options.size_limit),
                ),
            ));
            return responses;
        }

        let entry = match cursor.get() {
            Ok(entry) => entry,
            Err(e) => {
                responses.push(done(id, error_result(&e)));
                return responses;
            }
        };
        let mut attributes = entry.to_attribute_map(&options.attributes);
        if options.types_only {
            attributes.values_mut().for_each(Vec::clear);
        }
        responses.push(LdapMessage::new(
            id,
            LdapProtocolOp::SearchResultEntry {
                dn: entry.dn().to_string(),
                attributes,
            },
        ));
        returned += 1;
    }

    debug!("Search under {} returned {} entries", base_dn, returned);
    responses.push(done(id, LdapResult::success()));
    responses
}
