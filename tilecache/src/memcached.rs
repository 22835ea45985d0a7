//! Minimal memcached text-protocol client.
//!
//! Implements the four commands the engine needs (`get`, `set`, `add`,
//! `delete`) over a buffered `tokio` TCP stream. Connections are built by
//! backend connectors and recycled through the connection pool, so the
//! client itself is a plain stateful handle with no pooling logic.

use crate::error::{Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::debug;

/// Default memcached port.
pub const DEFAULT_PORT: u16 = 11211;

/// One configured memcached server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddr {
    pub host: String,
    pub port: u16,
}

impl ServerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host` or `host:port` notation.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::BadRequest("empty memcached server address".into()));
        }
        match s.rsplit_once(':') {
            Some((host, port)) => {
                let port: u16 = port.parse().map_err(|_| {
                    Error::BadRequest(format!("invalid memcached port in \"{s}\""))
                })?;
                if port == 0 {
                    return Err(Error::BadRequest(format!(
                        "invalid memcached port in \"{s}\""
                    )));
                }
                Ok(Self::new(host, port))
            }
            None => Ok(Self::new(s, DEFAULT_PORT)),
        }
    }
}

impl std::fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Outcome of a create-only `add`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Stored,
    /// The key already existed (`NOT_STORED`).
    Exists,
}

/// A live memcached connection.
#[derive(Debug)]
pub struct MemcachedClient {
    stream: BufStream<TcpStream>,
    server: ServerAddr,
}

impl MemcachedClient {
    /// Connect to the first reachable server in the list; later entries act
    /// as failover targets.
    pub async fn connect(servers: &[ServerAddr]) -> Result<Self> {
        if servers.is_empty() {
            return Err(Error::BadRequest("no memcached servers configured".into()));
        }
        let mut last_err = None;
        for server in servers {
            match TcpStream::connect((server.host.as_str(), server.port)).await {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    debug!(server = %server, "memcached connection established");
                    return Ok(Self {
                        stream: BufStream::new(stream),
                        server: server.clone(),
                    });
                }
                Err(e) => {
                    debug!(server = %server, error = %e, "memcached connect failed");
                    last_err = Some(e);
                }
            }
        }
        Err(Error::Unavailable(format!(
            "no memcached server reachable: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    pub fn server(&self) -> &ServerAddr {
        &self.server
    }

    /// Fetch a value; `None` when the key is absent.
    pub async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        self.send(format!("get {key}\r\n").as_bytes()).await?;

        let header = self.read_line().await?;
        if header == "END" {
            return Ok(None);
        }
        let mut parts = header.split_whitespace();
        let (Some("VALUE"), Some(_key), Some(_flags), Some(len)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(protocol_error(&self.server, &header));
        };
        let len: usize = len
            .parse()
            .map_err(|_| protocol_error(&self.server, &header))?;

        let mut data = vec![0u8; len];
        self.stream.read_exact(&mut data).await.map_err(io_err)?;
        self.read_line().await?; // trailing CRLF after the data block
        let end = self.read_line().await?;
        if end != "END" {
            return Err(protocol_error(&self.server, &end));
        }
        Ok(Some(data))
    }

    /// Store a value unconditionally.
    pub async fn set(&mut self, key: &str, data: &[u8], exptime_secs: u32) -> Result<()> {
        validate_key(key)?;
        self.send(format!("set {key} 0 {exptime_secs} {}\r\n", data.len()).as_bytes())
            .await?;
        self.send_block(data).await?;
        match self.read_line().await?.as_str() {
            "STORED" => Ok(()),
            other => Err(protocol_error(&self.server, other)),
        }
    }

    /// Store a value only if the key does not exist.
    pub async fn add(&mut self, key: &str, data: &[u8], exptime_secs: u32) -> Result<AddOutcome> {
        validate_key(key)?;
        self.send(format!("add {key} 0 {exptime_secs} {}\r\n", data.len()).as_bytes())
            .await?;
        self.send_block(data).await?;
        match self.read_line().await?.as_str() {
            "STORED" => Ok(AddOutcome::Stored),
            "NOT_STORED" => Ok(AddOutcome::Exists),
            other => Err(protocol_error(&self.server, other)),
        }
    }

    /// Delete a key; `true` when it existed.
    pub async fn delete(&mut self, key: &str) -> Result<bool> {
        validate_key(key)?;
        self.send(format!("delete {key}\r\n").as_bytes()).await?;
        match self.read_line().await?.as_str() {
            "DELETED" => Ok(true),
            "NOT_FOUND" => Ok(false),
            other => Err(protocol_error(&self.server, other)),
        }
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await.map_err(io_err)?;
        self.stream.flush().await.map_err(io_err)
    }

    async fn send_block(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await.map_err(io_err)?;
        self.stream.write_all(b"\r\n").await.map_err(io_err)?;
        self.stream.flush().await.map_err(io_err)
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self.stream.read_line(&mut line).await.map_err(io_err)?;
        if n == 0 {
            return Err(Error::Internal(format!(
                "memcached {} closed the connection",
                self.server
            )));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > 250 || key.bytes().any(|b| b <= b' ' || b == 0x7f) {
        return Err(Error::BadRequest(format!(
            "invalid memcached key \"{key}\""
        )));
    }
    Ok(())
}

fn protocol_error(server: &ServerAddr, got: &str) -> Error {
    Error::Internal(format!("memcached {server}: unexpected reply \"{got}\""))
}

fn io_err(e: std::io::Error) -> Error {
    Error::Internal(format!("memcached i/o error: {e}"))
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    /// In-process memcached speaking just enough of the text protocol for
    /// the engine's command set. Values never expire unless `expire_all`
    /// is called, which simulates TTL passage.
    pub struct MockMemcachedServer {
        pub addr: ServerAddr,
        store: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    }

    impl MockMemcachedServer {
        pub async fn start() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            let store: Arc<Mutex<HashMap<String, Vec<u8>>>> = Arc::new(Mutex::new(HashMap::new()));
            let accept_store = store.clone();

            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let store = accept_store.clone();
                    tokio::spawn(async move {
                        let mut stream = BufStream::new(socket);
                        loop {
                            let mut line = String::new();
                            if stream.read_line(&mut line).await.unwrap_or(0) == 0 {
                                break;
                            }
                            let line = line.trim_end().to_string();
                            let parts: Vec<&str> = line.split_whitespace().collect();
                            let reply = match parts.as_slice() {
                                ["get", key] => {
                                    let value = store.lock().unwrap().get(*key).cloned();
                                    match value {
                                        Some(data) => {
                                            let mut out = format!(
                                                "VALUE {key} 0 {}\r\n",
                                                data.len()
                                            )
                                            .into_bytes();
                                            out.extend_from_slice(&data);
                                            out.extend_from_slice(b"\r\nEND\r\n");
                                            out
                                        }
                                        None => b"END\r\n".to_vec(),
                                    }
                                }
                                [cmd @ ("set" | "add"), key, _flags, _exp, len] => {
                                    let len: usize = len.parse().unwrap();
                                    let mut data = vec![0u8; len];
                                    stream.read_exact(&mut data).await.unwrap();
                                    let mut crlf = [0u8; 2];
                                    stream.read_exact(&mut crlf).await.unwrap();
                                    let mut map = store.lock().unwrap();
                                    if *cmd == "add" && map.contains_key(*key) {
                                        b"NOT_STORED\r\n".to_vec()
                                    } else {
                                        map.insert(key.to_string(), data);
                                        b"STORED\r\n".to_vec()
                                    }
                                }
                                ["delete", key] => {
                                    if store.lock().unwrap().remove(*key).is_some() {
                                        b"DELETED\r\n".to_vec()
                                    } else {
                                        b"NOT_FOUND\r\n".to_vec()
                                    }
                                }
                                _ => b"ERROR\r\n".to_vec(),
                            };
                            if stream.write_all(&reply).await.is_err() {
                                break;
                            }
                            if stream.flush().await.is_err() {
                                break;
                            }
                        }
                    });
                }
            });

            Self {
                addr: ServerAddr::new("127.0.0.1", port),
                store,
            }
        }

        /// Drop every stored key, as if all TTLs elapsed at once.
        pub fn expire_all(&self) {
            self.store.lock().unwrap().clear();
        }

        pub fn contains(&self, key: &str) -> bool {
            self.store.lock().unwrap().contains_key(key)
        }
    }

    #[test]
    fn test_server_addr_parse() {
        assert_eq!(
            ServerAddr::parse("memhost:1234").unwrap(),
            ServerAddr::new("memhost", 1234)
        );
        assert_eq!(
            ServerAddr::parse("memhost").unwrap(),
            ServerAddr::new("memhost", DEFAULT_PORT)
        );
        assert!(ServerAddr::parse("memhost:notaport").is_err());
        assert!(ServerAddr::parse("memhost:0").is_err());
        assert!(ServerAddr::parse("").is_err());
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("ok_key-1").is_ok());
        assert!(validate_key("has space").is_err());
        assert!(validate_key("").is_err());
        assert!(validate_key(&"x".repeat(251)).is_err());
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let server = MockMemcachedServer::start().await;
        let mut client = MemcachedClient::connect(&[server.addr.clone()]).await.unwrap();

        client.set("k1", b"payload", 0).await.unwrap();
        assert_eq!(client.get("k1").await.unwrap(), Some(b"payload".to_vec()));
        assert_eq!(client.get("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_add_is_create_only() {
        let server = MockMemcachedServer::start().await;
        let mut client = MemcachedClient::connect(&[server.addr.clone()]).await.unwrap();

        assert_eq!(client.add("k", b"1", 30).await.unwrap(), AddOutcome::Stored);
        assert_eq!(client.add("k", b"1", 30).await.unwrap(), AddOutcome::Exists);
    }

    #[tokio::test]
    async fn test_delete() {
        let server = MockMemcachedServer::start().await;
        let mut client = MemcachedClient::connect(&[server.addr.clone()]).await.unwrap();

        client.set("gone", b"x", 0).await.unwrap();
        assert!(client.delete("gone").await.unwrap());
        assert!(!client.delete("gone").await.unwrap());
    }

    #[tokio::test]
    async fn test_connect_failover_to_second_server() {
        let server = MockMemcachedServer::start().await;
        let dead = ServerAddr::new("127.0.0.1", 1); // nothing listens here
        let client = MemcachedClient::connect(&[dead, server.addr.clone()])
            .await
            .unwrap();
        assert_eq!(client.server(), &server.addr);
    }

    #[tokio::test]
    async fn test_connect_all_unreachable_is_503() {
        let dead = ServerAddr::new("127.0.0.1", 1);
        let err = MemcachedClient::connect(&[dead]).await.unwrap_err();
        assert_eq!(err.status_code(), 503);
    }

    #[tokio::test]
    async fn test_binary_payload_with_crlf_bytes() {
        let server = MockMemcachedServer::start().await;
        let mut client = MemcachedClient::connect(&[server.addr.clone()]).await.unwrap();

        let payload = b"\x00\x01\r\n\xff\xfe".to_vec();
        client.set("bin", &payload, 0).await.unwrap();
        assert_eq!(client.get("bin").await.unwrap(), Some(payload));
    }
}
