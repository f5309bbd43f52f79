use std::io::{BufRead, BufReader, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::runner::{ToolRunner, classify_stderr};

const METHOD: &str = "Jujuc.Main";

/// One hook tool request, as the unit agent's RPC server expects it.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ToolRequest {
    pub context_id: String,
    pub dir: String,
    pub command_name: String,
    pub args: Vec<String>,
    /// Distinguishes "no stdin" from "empty stdin".
    pub stdin_set: bool,
    #[serde(with = "base64_bytes")]
    pub stdin: Vec<u8>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ToolResponse {
    pub code: i32,
    #[serde(with = "base64_bytes")]
    pub stdout: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub stderr: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcRequest<T> {
    pub method: String,
    pub params: [T; 1],
    pub id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default)]
    pub result: Option<ToolResponse>,
    #[serde(default)]
    pub error: Option<String>,
}

struct Connection {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    next_id: u64,
}

/// Runs hook tools over an established connection to the unit agent.
///
/// Requests are newline-delimited JSON-RPC frames; the connection is held
/// until [`close`](ToolRunner::close).
pub struct SocketToolRunner {
    context_id: String,
    dir: String,
    conn: Mutex<Option<Connection>>,
}

impl SocketToolRunner {
    /// Dials the agent socket at `path`.
    pub fn connect(
        path: impl AsRef<Path>,
        context_id: impl Into<String>,
        dir: impl Into<PathBuf>,
    ) -> Result<Self, ToolError> {
        let stream = UnixStream::connect(path.as_ref())?;
        Self::from_stream(stream, context_id, dir)
    }

    pub fn from_stream(
        stream: UnixStream,
        context_id: impl Into<String>,
        dir: impl Into<PathBuf>,
    ) -> Result<Self, ToolError> {
        let writer = stream.try_clone()?;
        Ok(Self {
            context_id: context_id.into(),
            dir: dir.into().to_string_lossy().into_owned(),
            conn: Mutex::new(Some(Connection {
                reader: BufReader::new(stream),
                writer,
                next_id: 0,
            })),
        })
    }

    fn call(&self, request: ToolRequest) -> Result<ToolResponse, ToolError> {
        let mut guard = self.conn.lock();
        let conn = guard
            .as_mut()
            .ok_or_else(|| ToolError::Rpc("connection is closed".into()))?;

        let id = conn.next_id;
        conn.next_id += 1;
        let frame = RpcRequest {
            method: METHOD.to_string(),
            params: [request],
            id,
        };
        let mut line = serde_json::to_vec(&frame)?;
        line.push(b'\n');
        conn.writer.write_all(&line)?;
        conn.writer.flush()?;

        let mut reply = String::new();
        if conn.reader.read_line(&mut reply)? == 0 {
            return Err(ToolError::Rpc("connection closed by agent".into()));
        }
        let response: RpcResponse = serde_json::from_str(&reply)?;
        if response.id != id {
            return Err(ToolError::Rpc(format!(
                "response id {} does not match request id {id}",
                response.id
            )));
        }
        if let Some(err) = response.error {
            return Err(classify_stderr(&err).unwrap_or(ToolError::Rpc(err)));
        }
        response
            .result
            .ok_or_else(|| ToolError::Rpc("response carries neither result nor error".into()))
    }
}

impl ToolRunner for SocketToolRunner {
    fn run(&self, tool: &str, args: &[&str]) -> Result<Vec<u8>, ToolError> {
        tracing::trace!(tool, ?args, "socket hook tool");
        let response = self.call(ToolRequest {
            context_id: self.context_id.clone(),
            dir: self.dir.clone(),
            command_name: tool.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            stdin_set: false,
            stdin: Vec::new(),
        })?;
        if response.code == 0 {
            return Ok(response.stdout);
        }
        let stderr = String::from_utf8_lossy(&response.stderr);
        Err(classify_stderr(&stderr).unwrap_or(ToolError::ExitCode {
            tool: tool.to_string(),
            code: response.code,
        }))
    }

    fn close(&self) -> Result<(), ToolError> {
        if let Some(conn) = self.conn.lock().take() {
            conn.writer.shutdown(Shutdown::Both)?;
        }
        Ok(())
    }
}

/// `[]byte` fields travel as base64 strings; `null` decodes as empty.
mod base64_bytes {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        match encoded {
            Some(text) => STANDARD.decode(text).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixListener;
    use std::thread;

    use super::*;

    /// Serves one connection, answering each request with `respond`.
    fn serve<F>(listener: UnixListener, respond: F) -> thread::JoinHandle<Vec<ToolRequest>>
    where
        F: Fn(&ToolRequest) -> (Option<ToolResponse>, Option<String>) + Send + 'static,
    {
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let reader = BufReader::new(stream);
            let mut seen = Vec::new();
            for line in reader.lines() {
                let Ok(line) = line else { break };
                let req: RpcRequest<ToolRequest> = serde_json::from_str(&line).unwrap();
                assert_eq!(req.method, METHOD);
                let [tool_req] = req.params;
                let (result, error) = respond(&tool_req);
                let reply = RpcResponse {
                    id: req.id,
                    result,
                    error,
                };
                let mut out = serde_json::to_vec(&reply).unwrap();
                out.push(b'\n');
                writer.write_all(&out).unwrap();
                seen.push(tool_req);
            }
            seen
        })
    }

    fn ok(stdout: &str) -> (Option<ToolResponse>, Option<String>) {
        (
            Some(ToolResponse {
                code: 0,
                stdout: stdout.as_bytes().to_vec(),
                stderr: Vec::new(),
            }),
            None,
        )
    }

    #[test]
    fn round_trips_a_tool_call() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("agent.socket");
        let server = serve(UnixListener::bind(&path).unwrap(), |req| {
            ok(&format!("{}:{}", req.command_name, req.args.join(",")))
        });

        let runner = SocketToolRunner::connect(&path, "ctx-1", "/charm").unwrap();
        let first = runner.run("relation-ids", &["--format", "json", "db"]).unwrap();
        let second = runner.run("unit-get", &["private-address"]).unwrap();
        runner.close().unwrap();

        assert_eq!(first, b"relation-ids:--format,json,db");
        assert_eq!(second, b"unit-get:private-address");

        let seen = server.join().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].context_id, "ctx-1");
        assert_eq!(seen[0].dir, "/charm");
        assert!(!seen[0].stdin_set);
    }

    #[test]
    fn rpc_error_for_unknown_command_is_unimplemented() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("agent.socket");
        let _server = serve(UnixListener::bind(&path).unwrap(), |req| {
            (
                None,
                Some(format!("bad request: unknown command {:?}", req.command_name)),
            )
        });

        let runner = SocketToolRunner::connect(&path, "ctx", "/charm").unwrap();
        let err = runner.run("goal-state", &[]).unwrap_err();
        assert!(err.is_unimplemented(), "got {err:?}");
    }

    #[test]
    fn non_zero_code_uses_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("agent.socket");
        let _server = serve(UnixListener::bind(&path).unwrap(), |req| {
            let stderr = if req.args.is_empty() {
                Vec::new()
            } else {
                b"error: no such setting\n".to_vec()
            };
            (
                Some(ToolResponse {
                    code: 1,
                    stdout: Vec::new(),
                    stderr,
                }),
                None,
            )
        });

        let runner = SocketToolRunner::connect(&path, "ctx", "/charm").unwrap();
        match runner.run("config-get", &["colour"]).unwrap_err() {
            ToolError::Failed(msg) => assert_eq!(msg, "no such setting"),
            other => panic!("expected Failed, got {other:?}"),
        }
        match runner.run("config-get", &[]).unwrap_err() {
            ToolError::ExitCode { tool, code } => {
                assert_eq!(tool, "config-get");
                assert_eq!(code, 1);
            }
            other => panic!("expected ExitCode, got {other:?}"),
        }
    }

    #[test]
    fn closed_runner_refuses_calls() {
        let (client, _server) = UnixStream::pair().unwrap();
        let runner = SocketToolRunner::from_stream(client, "ctx", "/charm").unwrap();
        runner.close().unwrap();
        runner.close().unwrap();
        assert!(matches!(
            runner.run("juju-log", &["hi"]).unwrap_err(),
            ToolError::Rpc(_)
        ));
    }

    #[test]
    fn null_byte_fields_decode_as_empty() {
        let resp: ToolResponse =
            serde_json::from_str(r#"{"Code":0,"Stdout":"aGk=","Stderr":null}"#).unwrap();
        assert_eq!(resp.stdout, b"hi");
        assert!(resp.stderr.is_empty());
    }
}
