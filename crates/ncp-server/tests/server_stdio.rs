// crates/ncp-server/tests/server_stdio.rs
// End-to-end: drive the real binary over stdio with newline-delimited JSON-RPC

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

use serde_json::{Value, json};

struct ServerUnderTest {
    child: Child,
    stdin: ChildStdin,
    lines: mpsc::Receiver<String>,
}

impl ServerUnderTest {
    fn spawn(workdir: &std::path::Path) -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_ncp"))
            .args(["--server", "--working-dir"])
            .arg(workdir)
            // Hermetic: no real home configs, no embeddings API.
            .env("HOME", workdir)
            .env_remove("NCP_EMBEDDINGS_API_KEY")
            .env_remove("OPENAI_API_KEY")
            .env_remove("NCP_PROFILE")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn ncp");

        let stdin = child.stdin.take().unwrap();
        let stdout = child.stdout.take().unwrap();
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            for line in BufReader::new(stdout).lines().map_while(|l| l.ok()) {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        Self {
            child,
            stdin,
            lines: rx,
        }
    }

    fn send(&mut self, frame: Value) {
        let mut line = frame.to_string();
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).unwrap();
        self.stdin.flush().unwrap();
    }

    /// Next response frame carrying the given id; notification frames in
    /// between are skipped.
    fn response_for(&mut self, id: i64) -> Value {
        let deadline = std::time::Instant::now() + Duration::from_secs(20);
        loop {
            let remaining = deadline
                .checked_duration_since(std::time::Instant::now())
                .expect("timed out waiting for response");
            let line = self
                .lines
                .recv_timeout(remaining)
                .expect("server closed stdout before responding");
            let frame: Value = serde_json::from_str(&line).expect("valid JSON frame");
            if frame.get("id").and_then(|v| v.as_i64()) == Some(id) {
                return frame;
            }
        }
    }
}

#[test]
fn handshake_find_run_and_graceful_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = ServerUnderTest::spawn(dir.path());

    // initialize
    server.send(json!({
        "jsonrpc": "2.0", "id": 1, "method": "initialize",
        "params": {
            "protocolVersion": "2024-11-05",
            "clientInfo": {"name": "stdio-test", "version": "0"},
            "_meta": {"session_id": "S-e2e"},
        },
    }));
    let response = server.response_for(1);
    assert_eq!(response["result"]["serverInfo"]["name"], "ncp");
    assert_eq!(response["result"]["_meta"]["session_id"], "S-e2e");

    server.send(json!({
        "jsonrpc": "2.0", "method": "notifications/initialized",
    }));

    // tools/list: exactly find and run
    server.send(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}));
    let response = server.response_for(2);
    let tools = response["result"]["tools"].as_array().unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["find", "run"]);

    // find on an empty profile
    server.send(json!({
        "jsonrpc": "2.0", "id": 3, "method": "tools/call",
        "params": {"name": "find", "arguments": {}},
    }));
    let response = server.response_for(3);
    let text = response["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("No tools matched"), "got: {text}");

    // run with dry_run never forwards anywhere
    server.send(json!({
        "jsonrpc": "2.0", "id": 4, "method": "tools/call",
        "params": {
            "name": "run",
            "arguments": {"tool": "fs:read_file", "parameters": {"path": "/tmp/x"}, "dry_run": true},
        },
    }));
    let response = server.response_for(4);
    let text = response["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("[dry run]"));

    // malformed run is -32602
    server.send(json!({
        "jsonrpc": "2.0", "id": 5, "method": "tools/call",
        "params": {"name": "run", "arguments": {"tool": "not-qualified"}},
    }));
    let response = server.response_for(5);
    assert_eq!(response["error"]["code"], -32602);

    // parse error frames get -32700 without killing the connection
    server.stdin.write_all(b"this is not json\n").unwrap();
    server.stdin.flush().unwrap();
    server.send(json!({"jsonrpc": "2.0", "id": 6, "method": "ping"}));
    let response = server.response_for(6);
    assert!(response["result"].is_object());

    // EOF triggers graceful shutdown
    drop(server.stdin);
    let deadline = std::time::Instant::now() + Duration::from_secs(15);
    loop {
        if let Some(status) = server.child.try_wait().unwrap() {
            assert!(status.success(), "server exited with {status}");
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "server did not exit after stdin EOF"
        );
        std::thread::sleep(Duration::from_millis(100));
    }
}
