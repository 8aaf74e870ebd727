//! Value delivery over the plain socket and through the external sender tool

use std::time::Duration;

use assert_matches::assert_matches;
use queuewatch::sink::{DataPoint, SinkError, SocketSender, ValueSender};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use crate::helpers::{closed_port, processed_all, spawn_trapper};

fn points() -> Vec<DataPoint> {
    vec![
        DataPoint::new("mq-prod", "rabbitmq.queue.size[/,jobs]", 42i64),
        DataPoint::new("mq-prod", "rabbitmq.queue.consumers[/,jobs]", 2i64),
        DataPoint::new("mq-prod", "rabbitmq.queue.state[/,jobs]", 1i64),
    ]
}

#[tokio::test]
async fn test_socket_sender_delivers_batch_in_one_exchange() {
    let trapper = spawn_trapper(processed_all).await;
    let sender = SocketSender::new("127.0.0.1".to_string(), trapper.addr.port(), Duration::from_secs(2));

    let info = sender.send(&points()).await.unwrap();
    assert_eq!(info.processed, 3);

    let requests = trapper.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].request, "sender data");
    assert_eq!(requests[0].data[0].key, "rabbitmq.queue.size[/,jobs]");
    assert_eq!(requests[0].data[0].value, "42");
}

#[tokio::test]
async fn test_socket_sender_rejects_unprocessed_values() {
    fn nothing_processed(items: usize) -> serde_json::Value {
        json!({
            "response": "success",
            "info": format!("processed: 0; failed: {items}; total: {items}; seconds spent: 0.000010")
        })
    }

    let trapper = spawn_trapper(nothing_processed).await;
    let sender = SocketSender::new("127.0.0.1".to_string(), trapper.addr.port(), Duration::from_secs(2));

    assert_matches!(sender.send(&points()).await, Err(SinkError::Rejected(_)));
}

#[tokio::test]
async fn test_socket_sender_truncated_response() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buffer = vec![0u8; 4096];
        let _ = tokio::io::AsyncReadExt::read(&mut stream, &mut buffer).await;
        stream.write_all(b"ZBXD").await.unwrap();
    });

    let sender = SocketSender::new("127.0.0.1".to_string(), port, Duration::from_secs(2));
    assert_matches!(sender.send(&points()).await, Err(SinkError::Protocol(_)));
}

#[tokio::test]
async fn test_socket_sender_unreachable_backend() {
    let sender = SocketSender::new("127.0.0.1".to_string(), closed_port().await, Duration::from_secs(2));
    assert_matches!(sender.send(&points()).await, Err(SinkError::Io(_)));
}

#[cfg(unix)]
mod external_tool {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use super::*;
    use queuewatch::config::{SinkConfig, TlsConnect};
    use queuewatch::sink::ExternalToolSender;
    use tempfile::TempDir;

    /// Writes a stand-in for the sender tool that copies its inputs into `dir`.
    fn fake_tool(dir: &Path, exit_code: u8) -> String {
        let script = format!(
            r#"#!/bin/sh
printf '%s\n' "$@" > {dir}/args
while [ $# -gt 0 ]; do
  case "$1" in
    -i) cp "$2" {dir}/data; shift ;;
    --tls-psk-file) cp "$2" {dir}/psk; printf '%s' "$2" > {dir}/psk_path; shift ;;
  esac
  shift
done
n=$(wc -l < {dir}/data | tr -d ' ')
echo "info from server: \"processed: $n; failed: 0; total: $n; seconds spent: 0.000100\""
echo "sent: $n; skipped: 0; total: $n"
exit {exit_code}
"#,
            dir = dir.display()
        );

        let path = dir.join("fake_sender");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    fn psk_config(binary: String) -> SinkConfig {
        let mut config: SinkConfig = serde_json::from_value(json!({
            "server": "trapper.example.com",
            "port": 10051,
            "api_url": "http://127.0.0.1:1",
            "api_token": "t",
        }))
        .unwrap();
        config.sender_binary = binary;
        config.tls_connect = TlsConnect::Psk;
        config.tls_psk_identity = Some("queuewatch".to_string());
        config.psk_key = Some("0123456789abcdef0123456789abcdef".to_string());
        config
    }

    #[tokio::test]
    async fn test_psk_key_is_materialised_and_removed() {
        let dir = TempDir::new().unwrap();
        let sender = ExternalToolSender::new(&psk_config(fake_tool(dir.path(), 0)));

        let info = sender.send(&points()).await.unwrap();
        assert_eq!(info.processed, 3);

        let data = std::fs::read_to_string(dir.path().join("data")).unwrap();
        assert_eq!(data.lines().count(), 3);
        assert!(data.starts_with("mq-prod rabbitmq.queue.size[/,jobs] 42\n"));

        let psk = std::fs::read_to_string(dir.path().join("psk")).unwrap();
        assert_eq!(psk, "0123456789abcdef0123456789abcdef");
        let psk_path = std::fs::read_to_string(dir.path().join("psk_path")).unwrap();
        assert!(!Path::new(&psk_path).exists());

        let args = std::fs::read_to_string(dir.path().join("args")).unwrap();
        let args: Vec<_> = args.lines().collect();
        assert_eq!(&args[..4], ["-z", "trapper.example.com", "-p", "10051"]);
        assert!(args.windows(2).any(|pair| pair == ["--tls-connect", "psk"]));
        assert!(args.windows(2).any(|pair| pair == ["--tls-psk-identity", "queuewatch"]));
    }

    #[tokio::test]
    async fn test_existing_psk_file_is_used_as_is() {
        let dir = TempDir::new().unwrap();
        let psk_file = dir.path().join("configured.psk");
        std::fs::write(&psk_file, "feedface").unwrap();

        let mut config = psk_config(fake_tool(dir.path(), 0));
        config.tls_psk_file = Some(psk_file.clone());
        ExternalToolSender::new(&config).send(&points()).await.unwrap();

        let psk_path = std::fs::read_to_string(dir.path().join("psk_path")).unwrap();
        assert_eq!(Path::new(&psk_path), psk_file);
        assert!(psk_file.exists());
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_a_failure() {
        let dir = TempDir::new().unwrap();
        let sender = ExternalToolSender::new(&psk_config(fake_tool(dir.path(), 2)));

        assert_matches!(sender.send(&points()).await, Err(SinkError::ExternalTool(_)));
    }

    #[tokio::test]
    async fn test_missing_psk_material_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut config = psk_config(fake_tool(dir.path(), 0));
        config.psk_key = None;
        config.tls_psk_file = Some(dir.path().join("missing.psk"));

        assert_matches!(
            ExternalToolSender::new(&config).send(&points()).await,
            Err(SinkError::ExternalTool(_))
        );
        assert!(!dir.path().join("args").exists());
    }
}
