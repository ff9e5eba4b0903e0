//! NUT (Network UPS Tools) client over the upsd text protocol.
//!
//! ```text
//! > LIST VAR apc_bx
//! < BEGIN LIST VAR apc_bx
//! < VAR apc_bx battery.charge "100"
//! < END LIST VAR apc_bx
//! ```

use super::{Snapshot, TelemetrySource};
use crate::error::SourceError;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

pub const DEFAULT_NUT_PORT: u16 = 3493;

pub struct NutSource {
    host: String,
    port: u16,
    ups_name: String,
    timeout: Duration,
    session: Option<BufStream<TcpStream>>,
}

impl NutSource {
    /// `ups_name` may be given as `name@host`; only `name` is sent to upsd.
    pub fn new(host: impl Into<String>, port: u16, ups_name: &str) -> Self {
        let ups_name = ups_name.split('@').next().unwrap_or(ups_name).to_string();
        Self {
            host: host.into(),
            port,
            ups_name,
            timeout: Duration::from_secs(10),
            session: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn ups_name(&self) -> &str {
        &self.ups_name
    }

    async fn list_vars(&mut self) -> Result<Snapshot, SourceError> {
        let ups = self.ups_name.clone();
        let stream = self.session.as_mut().ok_or(SourceError::NotConnected)?;

        stream.write_all(format!("LIST VAR {ups}\n").as_bytes()).await?;
        stream.flush().await?;

        let end_marker = format!("END LIST VAR {ups}");
        let mut vars = Snapshot::new();
        let mut line = String::new();
        loop {
            line.clear();
            if stream.read_line(&mut line).await? == 0 {
                return Err(SourceError::Protocol("connection closed by upsd".into()));
            }
            let line = line.trim_end();
            if line == end_marker {
                break;
            }
            if let Some(code) = line.strip_prefix("ERR ") {
                return Err(SourceError::Protocol(format!("upsd error: {code}")));
            }
            if let Some((key, value)) = parse_var_line(line, &ups) {
                vars.insert(key, value);
            }
        }
        Ok(vars)
    }
}

/// Parses `VAR <ups> <key> "<value>"`; quotes and backslashes in the value
/// are backslash-escaped.
pub fn parse_var_line(line: &str, ups: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("VAR ")?.strip_prefix(ups)?.strip_prefix(' ')?;
    let (key, quoted) = rest.split_once(' ')?;
    let mut chars = quoted.strip_prefix('"')?.chars();
    let mut value = String::new();
    while let Some(c) = chars.next() {
        match c {
            '\\' => value.push(chars.next()?),
            '"' => return Some((key.to_string(), value)),
            other => value.push(other),
        }
    }
    None
}

impl TelemetrySource for NutSource {
    async fn connect(&mut self) -> Result<(), SourceError> {
        if self.session.is_some() {
            return Ok(());
        }
        let stream = timeout(self.timeout, TcpStream::connect((self.host.as_str(), self.port)))
            .await
            .map_err(|_| SourceError::Timeout(self.timeout))??;
        // handle only exists once the socket is up
        self.session = Some(BufStream::new(stream));
        info!("connected to NUT server {}", self.describe());
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(mut stream) = self.session.take() {
            let logout = async {
                stream.write_all(b"LOGOUT\n").await?;
                stream.flush().await
            };
            if let Err(e) = timeout(Duration::from_secs(1), logout).await.unwrap_or(Ok(())) {
                debug!("NUT logout failed: {}", e);
            }
            info!("disconnected from NUT server {}", self.describe());
        }
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    async fn fetch_all(&mut self) -> Result<Snapshot, SourceError> {
        let limit = self.timeout;
        let result = match timeout(limit, self.list_vars()).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(limit)),
        };
        if result.is_err() {
            // stream state is unknown after a failed exchange
            self.session = None;
        }
        result
    }

    fn describe(&self) -> String {
        format!("{}@{}:{}", self.ups_name, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn serve_once(reply: &'static str) -> (u16, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut stream = BufStream::new(socket);
            let mut request = String::new();
            stream.read_line(&mut request).await.unwrap();
            stream.write_all(reply.as_bytes()).await.unwrap();
            stream.flush().await.unwrap();
            let mut rest = String::new();
            let _ = stream.read_line(&mut rest).await;
            request
        });
        (port, server)
    }

    #[test]
    fn test_parse_var_line() {
        assert_eq!(
            parse_var_line(r#"VAR ups battery.charge "100""#, "ups"),
            Some(("battery.charge".into(), "100".into()))
        );
        assert_eq!(
            parse_var_line(r#"VAR ups ups.mfr "A \"quoted\" \\ name""#, "ups"),
            Some(("ups.mfr".into(), r#"A "quoted" \ name"#.into()))
        );
        assert_eq!(parse_var_line(r#"VAR other battery.charge "1""#, "ups"), None);
        assert_eq!(parse_var_line(r#"VAR ups battery.charge 100"#, "ups"), None);
        assert_eq!(parse_var_line(r#"VAR ups battery.charge "unterminated"#, "ups"), None);
        assert_eq!(parse_var_line("BEGIN LIST VAR ups", "ups"), None);
    }

    #[test]
    fn test_host_suffix_is_stripped() {
        let source = NutSource::new("nut", DEFAULT_NUT_PORT, "apc_bx@localhost");
        assert_eq!(source.ups_name(), "apc_bx");
        assert_eq!(source.describe(), "apc_bx@nut:3493");
        assert!(!source.is_connected());
    }

    #[tokio::test]
    async fn test_fetch_all_against_fake_upsd() {
        let (port, server) = serve_once(
            "BEGIN LIST VAR apc\nVAR apc battery.charge \"100\"\nVAR apc ups.status \"OL CHRG\"\nEND LIST VAR apc\n",
        )
        .await;

        let mut source = NutSource::new("127.0.0.1", port, "apc@localhost");
        source.connect().await.unwrap();
        assert!(source.is_connected());

        let vars = source.fetch_all().await.unwrap();
        assert_eq!(vars.len(), 2);
        assert_eq!(vars["battery.charge"], "100");
        assert_eq!(vars["ups.status"], "OL CHRG");

        source.disconnect().await;
        assert!(!source.is_connected());
        assert_eq!(server.await.unwrap(), "LIST VAR apc\n");
    }

    #[tokio::test]
    async fn test_server_error_drops_session() {
        let (port, _server) = serve_once("ERR UNKNOWN-UPS\n").await;
        let mut source = NutSource::new("127.0.0.1", port, "missing");
        source.connect().await.unwrap();

        let err = source.fetch_all().await.unwrap_err();
        assert!(matches!(err, SourceError::Protocol(_)));
        assert!(!source.is_connected());
    }

    #[tokio::test]
    async fn test_connect_refused_leaves_no_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut source = NutSource::new("127.0.0.1", port, "ups").with_timeout(Duration::from_secs(2));
        assert!(source.connect().await.is_err());
        assert!(!source.is_connected());
        assert!(matches!(source.fetch_all().await, Err(SourceError::NotConnected)));
    }
}
