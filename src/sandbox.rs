//! Simulated sandbox used by `sandbridge run`.
//!
//! Stands in for a real sandbox engine: it answers the handshake, then
//! replies to every compile request with the usual start/status/done
//! sequence. Compilation "fails" when the entry file is missing.

use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use sandbridge_protocols::{HostMessage, SandboxMessage};

pub(crate) fn spawn(
    client_id: String,
    mut outbound: mpsc::UnboundedReceiver<HostMessage>,
    inbound: mpsc::UnboundedSender<SandboxMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if inbound.send(SandboxMessage::Initialized).is_err() {
            return;
        }

        let mut first_load = true;
        while let Some(message) = outbound.recv().await {
            debug!(client_id = %client_id, kind = message.kind(), "Sandbox received");
            if !respond(&message, first_load).into_iter().all(|reply| inbound.send(reply).is_ok()) {
                break;
            }
            first_load = false;
        }
    })
}

fn respond(message: &HostMessage, first_load: bool) -> Vec<SandboxMessage> {
    match message {
        HostMessage::Compile(request) => {
            let entry_missing = request
                .setup
                .entry
                .as_ref()
                .is_some_and(|entry| !request.setup.files.contains_key(entry));
            vec![
                SandboxMessage::Start { first_load },
                SandboxMessage::Status {
                    status: "transpiling".to_string(),
                },
                SandboxMessage::Console {
                    level: "log".to_string(),
                    data: vec![json!(format!(
                        "compiled {} file(s) for request {}",
                        request.setup.files.len(),
                        request.request_id
                    ))],
                },
                SandboxMessage::Done {
                    compilation_error: entry_missing,
                },
            ]
        }
        HostMessage::Refresh => vec![
            SandboxMessage::Start { first_load },
            SandboxMessage::Done {
                compilation_error: false,
            },
        ],
        HostMessage::Custom { payload } => vec![SandboxMessage::Action {
            action: "echo".to_string(),
            payload: payload.clone(),
        }],
    }
}
