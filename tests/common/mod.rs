#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use ldapmux::ldap::protocol::LdapMessageId;
use ldapmux::ldap::{LdapCodec, LdapMessage, LdapProtocolOp, LdapResult};
use ldapmux::ConnectionConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;

/// What the mock does after it has seen a request.
pub enum Action {
    Reply(Vec<LdapMessage>),
    Close,
}

/// Loopback LDAP peer that records every request it decodes and answers
/// through a responder closure.
pub struct MockServer {
    pub port: u16,
    received: mpsc::UnboundedReceiver<LdapMessage>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&LdapMessage) -> Action + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, received) = mpsc::unbounded_channel();
        let responder = Arc::new(responder);

        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let tx = tx.clone();
                let responder = Arc::clone(&responder);
                tokio::spawn(async move {
                    let mut framed = Framed::new(socket, LdapCodec::new());
                    while let Some(Ok(message)) = framed.next().await {
                        let action = responder(&message);
                        let _ = tx.send(message);
                        match action {
                            Action::Reply(replies) => {
                                for reply in replies {
                                    if framed.send(reply).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            Action::Close => return,
                        }
                    }
                });
            }
        });

        Self {
            port,
            received,
            task,
        }
    }

    /// A mock that never answers.
    pub async fn silent() -> Self {
        Self::start(|_| Action::Reply(Vec::new())).await
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::default()
            .with_host("127.0.0.1")
            .with_port(self.port)
            .with_timeout(Duration::from_secs(2))
    }

    pub async fn next_message(&mut self) -> Option<LdapMessage> {
        timeout(Duration::from_secs(2), self.received.recv())
            .await
            .ok()
            .flatten()
    }

    /// True when nothing arrives for `period`.
    pub async fn quiet_for(&mut self, period: Duration) -> bool {
        timeout(period, self.received.recv()).await.is_err()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn bind_response(id: LdapMessageId, result: LdapResult) -> LdapMessage {
    LdapMessage::new(
        id,
        LdapProtocolOp::BindResponse {
            result,
            server_sasl_creds: None,
        },
    )
}

pub fn search_entry(id: LdapMessageId, dn: &str, attributes: &[(&str, &str)]) -> LdapMessage {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in attributes {
        map.entry(name.to_string()).or_default().push(value.to_string());
    }
    LdapMessage::new(
        id,
        LdapProtocolOp::SearchResultEntry {
            dn: dn.to_string(),
            attributes: map,
        },
    )
}

pub fn search_reference(id: LdapMessageId, url: &str) -> LdapMessage {
    LdapMessage::new(
        id,
        LdapProtocolOp::SearchResultReference {
            urls: vec![url.to_string()],
        },
    )
}

pub fn search_done(id: LdapMessageId, result: LdapResult) -> LdapMessage {
    LdapMessage::new(id, LdapProtocolOp::SearchResultDone { result })
}

/// Polls `condition` for up to a second.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
