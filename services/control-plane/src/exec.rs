//! Interactive exec sessions.
//!
//! Clients speak terminado-style frames: every message is a JSON array whose
//! first element names the kind. Clients send `["stdin", data]` and
//! `["set_size", rows, cols]`; the server sends `["stdout", data]` and, when
//! the exec cannot be attached, a single `["error", message]`.
//!
//! A session runs one task per direction. When either ends the other is
//! aborted, which closes both the client channel and the exec's input.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::runtime::{ContainerRuntime, ExecAttachment, ExecSpec};

pub const KIND_STDIN: &str = "stdin";
pub const KIND_SET_SIZE: &str = "set_size";
pub const KIND_STDOUT: &str = "stdout";
pub const KIND_ERROR: &str = "error";

/// A decoded client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Stdin(String),
    SetSize { rows: u16, cols: u16 },
    /// `set_size` without both dimensions, or an unknown kind.
    Ignored(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is not a JSON array: {0}")]
    Malformed(String),

    #[error("frame needs a kind and at least one argument")]
    TooShort,
}

fn frame_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Decode one client frame.
///
/// Size arguments that do not parse as numbers count as zero.
pub fn decode_frame(text: &str) -> Result<ClientFrame, FrameError> {
    let items: Vec<Value> =
        serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;
    if items.len() < 2 {
        return Err(FrameError::TooShort);
    }

    let kind = frame_arg(&items[0]);
    match kind.as_str() {
        KIND_STDIN => Ok(ClientFrame::Stdin(frame_arg(&items[1]))),
        KIND_SET_SIZE if items.len() >= 3 => Ok(ClientFrame::SetSize {
            rows: frame_arg(&items[1]).trim().parse().unwrap_or(0),
            cols: frame_arg(&items[2]).trim().parse().unwrap_or(0),
        }),
        _ => Ok(ClientFrame::Ignored(kind)),
    }
}

/// Encode a server frame.
pub fn encode_frame(kind: &str, data: &str) -> String {
    Value::Array(vec![Value::from(kind), Value::from(data)]).to_string()
}

/// Turns byte chunks into text without splitting multi-byte characters.
#[derive(Debug, Default)]
struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let keep = match std::str::from_utf8(&self.pending) {
            Ok(_) => 0,
            // Incomplete sequence at the end: hold it for the next chunk.
            Err(e) if e.error_len().is_none() => self.pending.len() - e.valid_up_to(),
            Err(_) => 0,
        };
        let tail = self.pending.split_off(self.pending.len() - keep);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = tail;
        text
    }
}

/// One interactive exec attachment bridged to a client.
pub struct ExecSession {
    runtime: Arc<dyn ContainerRuntime>,
    runtime_id: String,
    spec: ExecSpec,
}

impl ExecSession {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, runtime_id: String, spec: ExecSpec) -> Self {
        Self {
            runtime,
            runtime_id,
            spec,
        }
    }

    /// Attach and pump frames until either side ends.
    ///
    /// `inbound` yields raw client messages; encoded server frames go to
    /// `outbound`, which is dropped when the session ends.
    pub async fn run(self, inbound: mpsc::Receiver<String>, outbound: mpsc::Sender<String>) {
        let attachment = match self.runtime.exec_attach(&self.runtime_id, &self.spec).await {
            Ok(attachment) => attachment,
            Err(e) => {
                warn!(runtime_id = %self.runtime_id, error = %e, "Exec attach failed");
                let _ = outbound.send(encode_frame(KIND_ERROR, &e.to_string())).await;
                return;
            }
        };

        let ExecAttachment {
            exec_id,
            output,
            input,
        } = attachment;
        debug!(runtime_id = %self.runtime_id, exec_id = %exec_id, cmd = ?self.spec.cmd, "Exec attached");

        let mut to_runtime = tokio::spawn(pump_inbound(
            self.runtime.clone(),
            exec_id.clone(),
            inbound,
            input,
        ));
        let mut to_client = tokio::spawn(pump_outbound(exec_id.clone(), output, outbound));

        tokio::select! {
            _ = &mut to_runtime => to_client.abort(),
            _ = &mut to_client => to_runtime.abort(),
        }
        debug!(exec_id = %exec_id, "Exec session closed");
    }
}

async fn pump_inbound(
    runtime: Arc<dyn ContainerRuntime>,
    exec_id: String,
    mut inbound: mpsc::Receiver<String>,
    mut input: std::pin::Pin<Box<dyn tokio::io::AsyncWrite + Send>>,
) {
    while let Some(text) = inbound.recv().await {
        match decode_frame(&text) {
            Ok(ClientFrame::Stdin(data)) => {
                let written = async {
                    input.write_all(data.as_bytes()).await?;
                    input.flush().await
                };
                if let Err(e) = written.await {
                    debug!(exec_id = %exec_id, error = %e, "Exec input closed");
                    return;
                }
            }
            Ok(ClientFrame::SetSize { rows: 0, cols: 0 }) => {}
            Ok(ClientFrame::SetSize { rows, cols }) => {
                if let Err(e) = runtime.exec_resize(&exec_id, rows, cols).await {
                    warn!(exec_id = %exec_id, error = %e, "Exec resize failed");
                }
            }
            Ok(ClientFrame::Ignored(kind)) => {
                debug!(exec_id = %exec_id, kind = %kind, "Ignoring exec frame");
            }
            Err(e) => {
                debug!(exec_id = %exec_id, error = %e, "Undecodable exec frame");
                return;
            }
        }
    }
    let _ = input.shutdown().await;
}

async fn pump_outbound(
    exec_id: String,
    mut output: crate::runtime::ByteStream,
    outbound: mpsc::Sender<String>,
) {
    let mut chunker = Utf8Chunker::default();
    while let Some(chunk) = output.next().await {
        match chunk {
            Ok(bytes) => {
                let text = chunker.push(&bytes);
                if text.is_empty() {
                    continue;
                }
                if outbound.send(encode_frame(KIND_STDOUT, &text)).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(exec_id = %exec_id, error = %e, "Exec output failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::runtime::{ContainerDetails, MockRuntime};

    #[test]
    fn test_decode_frames() {
        assert_eq!(
            decode_frame(r#"["stdin","echo hi\n"]"#),
            Ok(ClientFrame::Stdin("echo hi\n".to_string()))
        );
        assert_eq!(
            decode_frame(r#"["set_size","24","80"]"#),
            Ok(ClientFrame::SetSize { rows: 24, cols: 80 })
        );
        assert_eq!(
            decode_frame(r#"["set_size",24,80]"#),
            Ok(ClientFrame::SetSize { rows: 24, cols: 80 })
        );
        assert_eq!(
            decode_frame(r#"["set_size","tall","80"]"#),
            Ok(ClientFrame::SetSize { rows: 0, cols: 80 })
        );
        assert_eq!(
            decode_frame(r#"["set_size","24"]"#),
            Ok(ClientFrame::Ignored("set_size".to_string()))
        );
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        assert_eq!(decode_frame(r#"["stdin"]"#), Err(FrameError::TooShort));
        assert!(matches!(
            decode_frame(r#"{"stdin":"x"}"#),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(decode_frame("not json"), Err(FrameError::Malformed(_))));
    }

    #[test]
    fn test_encode_frame_escapes() {
        assert_eq!(
            encode_frame(KIND_STDOUT, "a\"b\n"),
            r#"["stdout","a\"b\n"]"#
        );
    }

    #[test]
    fn test_utf8_chunker_holds_split_characters() {
        let mut chunker = Utf8Chunker::default();
        let bytes = "héllo".as_bytes();
        assert_eq!(chunker.push(&bytes[..2]), "h");
        assert_eq!(chunker.push(&bytes[2..]), "éllo");
        assert_eq!(chunker.push(&[0xff, b'x']), "\u{fffd}x");
    }

    fn runtime_with_container() -> Arc<MockRuntime> {
        let runtime = Arc::new(MockRuntime::new());
        runtime.insert_container(ContainerDetails {
            id: "abc".to_string(),
            labels: HashMap::new(),
            ..Default::default()
        });
        runtime
    }

    fn session(runtime: &Arc<MockRuntime>) -> ExecSession {
        ExecSession::new(
            runtime.clone(),
            "abc".to_string(),
            ExecSpec {
                cmd: vec!["sh".to_string()],
                tty: true,
            },
        )
    }

    #[tokio::test]
    async fn test_stdin_produces_stdout() {
        let runtime = runtime_with_container();
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let handle = tokio::spawn(session(&runtime).run(in_rx, out_tx));

        in_tx
            .send(r#"["stdin","echo hi\n"]"#.to_string())
            .await
            .unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(2), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let decoded: Vec<String> = serde_json::from_str(&frame).unwrap();
        assert_eq!(decoded[0], "stdout");
        assert!(decoded[1].contains("hi"));

        drop(in_tx);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_resize_skips_zero_size() {
        let runtime = runtime_with_container();
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, _out_rx) = mpsc::channel(8);
        let handle = tokio::spawn(session(&runtime).run(in_rx, out_tx));

        in_tx
            .send(r#"["set_size","24","80"]"#.to_string())
            .await
            .unwrap();
        in_tx
            .send(r#"["set_size","0","0"]"#.to_string())
            .await
            .unwrap();
        drop(in_tx);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        let calls = runtime.resize_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!((calls[0].1, calls[0].2), (24, 80));
    }

    #[tokio::test]
    async fn test_bad_frame_ends_session() {
        let runtime = runtime_with_container();
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let handle = tokio::spawn(session(&runtime).run(in_rx, out_tx));

        in_tx.send("garbage".to_string()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(out_rx.recv().await.is_none());
        assert!(runtime.resize_calls().is_empty());
    }

    #[tokio::test]
    async fn test_attach_failure_sends_error_frame() {
        let runtime = runtime_with_container();
        runtime.fail_exec("container is not running");
        let (_in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);

        session(&runtime).run(in_rx, out_tx).await;

        let frame = out_rx.recv().await.unwrap();
        let decoded: Vec<String> = serde_json::from_str(&frame).unwrap();
        assert_eq!(decoded[0], "error");
        assert!(decoded[1].contains("container is not running"));
        assert!(out_rx.recv().await.is_none());
    }
}
