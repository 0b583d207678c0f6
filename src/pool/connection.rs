use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, error};

use crate::discovery::ConnectOptions;
use crate::protocol::handshake::NATIVE_PASSWORD_PLUGIN;
use crate::protocol::packet::COM_QUIT;
use crate::protocol::resultset::{
    parse_column_count, parse_column_name, parse_text_row, MAX_PREALLOCATED_COLUMNS,
};
use crate::protocol::{
    capabilities, scramble_native_password, HandshakeResponse, Packet, PacketCodec, Row,
    ServerError, ServerGreeting,
};

/// A monitoring connection to one MySQL data source
///
/// Only the text protocol is spoken: the probes are plain `SELECT`s against
/// `information_schema` and `performance_schema`.
pub struct BackendConnection {
    framed: Framed<TcpStream, PacketCodec>,
    created_at: Instant,
    closed: bool,
}

impl BackendConnection {
    /// Connect and authenticate with mysql_native_password
    pub async fn connect(options: &ConnectOptions) -> Result<Self, ConnectionError> {
        let addr = options.addr();
        debug!(addr = %addr, "Connecting to data source");

        let stream = TcpStream::connect(&addr).await.map_err(|e| {
            debug!(addr = %addr, error = %e, "Failed to connect to data source");
            ConnectionError::Connect(e.to_string())
        })?;
        stream.set_nodelay(true).ok();

        let mut framed = Framed::new(stream, PacketCodec);

        let greeting_packet = framed
            .next()
            .await
            .ok_or(ConnectionError::Disconnected)?
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if greeting_packet.is_err() {
            return Err(server_error(&greeting_packet));
        }

        let greeting = ServerGreeting::parse(&greeting_packet.payload)
            .ok_or_else(|| ConnectionError::Protocol("Invalid server greeting".into()))?;

        let mut caps = capabilities::MONITOR_CAPABILITIES & greeting.capability_flags;
        if options.database.is_none() {
            caps &= !capabilities::CLIENT_CONNECT_WITH_DB;
        }

        let response = HandshakeResponse {
            capability_flags: caps,
            max_packet_size: 16 * 1024 * 1024,
            character_set: 0x21, // utf8_general_ci
            username: options.user.clone(),
            auth_response: scramble_native_password(&options.password, &greeting.scramble),
            database: options.database.clone(),
        };

        framed
            .send(response.encode(greeting_packet.sequence_id.wrapping_add(1)))
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        let mut reply = framed
            .next()
            .await
            .ok_or(ConnectionError::Disconnected)?
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        // Auth switch request: 0xFE, plugin name, new scramble
        if reply.payload.first() == Some(&0xFE) && reply.payload.len() > 1 {
            let body = &reply.payload[1..];
            let nul = body.iter().position(|&b| b == 0).unwrap_or(body.len());
            let plugin = String::from_utf8_lossy(&body[..nul]).into_owned();
            if plugin != NATIVE_PASSWORD_PLUGIN {
                return Err(ConnectionError::Auth(format!(
                    "Unsupported authentication plugin `{}`",
                    plugin
                )));
            }
            let scramble = body
                .get(nul + 1..)
                .map(|s| s.strip_suffix(&[0]).unwrap_or(s))
                .unwrap_or_default();
            let auth = scramble_native_password(&options.password, scramble);
            framed
                .send(Packet::new(reply.sequence_id.wrapping_add(1), auth))
                .await
                .map_err(|e| ConnectionError::Io(e.to_string()))?;
            reply = framed
                .next()
                .await
                .ok_or(ConnectionError::Disconnected)?
                .map_err(|e| ConnectionError::Io(e.to_string()))?;
        }

        if reply.is_err() {
            let err = ServerError::parse(&reply.payload).unwrap_or(ServerError {
                code: 1045,
                sql_state: "28000".to_string(),
                message: "Access denied".to_string(),
            });
            error!(
                addr = %addr,
                error_code = err.code,
                error_message = %err.message,
                "Data source authentication failed"
            );
            return Err(ConnectionError::Server(err));
        }

        if !reply.is_ok() {
            return Err(ConnectionError::Protocol(
                "Expected OK packet after authentication".into(),
            ));
        }

        debug!(addr = %addr, server_version = %greeting.server_version, "Authenticated");

        Ok(Self {
            framed,
            created_at: Instant::now(),
            closed: false,
        })
    }

    /// Run a text-protocol statement and collect every row
    ///
    /// The connection counts as unusable from the moment the statement is sent
    /// until its reply has been read to the end. A caller that drops this future
    /// early (a probe timeout) therefore leaves a connection that will not be
    /// reused, instead of one whose next read returns this statement's rows.
    pub async fn query(&mut self, sql: &str) -> Result<Vec<Row>, ConnectionError> {
        self.closed = true;
        self.send(Packet::query(sql)).await?;

        let result = self.read_result().await;
        // ERR packets end the reply cleanly; protocol errors leave us mid-stream
        if matches!(result, Ok(_) | Err(ConnectionError::Server(_))) {
            self.closed = false;
        }
        result
    }

    async fn read_result(&mut self) -> Result<Vec<Row>, ConnectionError> {
        let first = self.recv().await?;
        if first.is_err() {
            return Err(server_error(&first));
        }
        if first.is_ok() {
            return Ok(Vec::new());
        }

        let column_count = parse_column_count(&first.payload)
            .filter(|n| *n > 0)
            .ok_or_else(|| ConnectionError::Protocol("Invalid column count".into()))?;

        let mut columns = Vec::with_capacity(column_count.min(MAX_PREALLOCATED_COLUMNS));
        for _ in 0..column_count {
            let definition = self.recv().await?;
            let name = parse_column_name(&definition.payload)
                .ok_or_else(|| ConnectionError::Protocol("Invalid column definition".into()))?;
            columns.push(name);
        }
        let columns: Arc<[String]> = columns.into();

        let eof = self.recv().await?;
        if !eof.is_eof() {
            return Err(ConnectionError::Protocol(
                "Expected EOF after column definitions".into(),
            ));
        }

        let mut rows = Vec::new();
        loop {
            let packet = self.recv().await?;
            if packet.is_eof() {
                break;
            }
            if packet.is_err() {
                return Err(server_error(&packet));
            }
            let values = parse_text_row(&packet.payload, column_count)
                .ok_or_else(|| ConnectionError::Protocol("Truncated row".into()))?;
            rows.push(Row::new(columns.clone(), values));
        }
        Ok(rows)
    }

    /// Send COM_QUIT; errors are irrelevant since the socket is dropped anyway
    pub async fn close(mut self) {
        let _ = self.framed.send(Packet::new(0, vec![COM_QUIT])).await;
        self.closed = true;
    }

    /// Check if connection has exceeded max age
    pub fn is_expired(&self, max_age: Duration) -> bool {
        self.created_at.elapsed() > max_age
    }

    pub fn is_usable(&self) -> bool {
        !self.closed
    }

    async fn send(&mut self, packet: Packet) -> Result<(), ConnectionError> {
        self.framed.send(packet).await.map_err(|e| {
            self.closed = true;
            ConnectionError::Io(e.to_string())
        })
    }

    async fn recv(&mut self) -> Result<Packet, ConnectionError> {
        match self.framed.next().await {
            Some(Ok(packet)) => Ok(packet),
            Some(Err(e)) => {
                self.closed = true;
                Err(ConnectionError::Io(e.to_string()))
            }
            None => {
                self.closed = true;
                Err(ConnectionError::Disconnected)
            }
        }
    }
}

fn server_error(packet: &Packet) -> ConnectionError {
    ConnectionError::Server(ServerError::parse(&packet.payload).unwrap_or(ServerError {
        code: 0,
        sql_state: "HY000".to_string(),
        message: "Unparseable error packet".to_string(),
    }))
}

/// Connection errors
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Server error {}: {}", .0.code, .0.message)]
    Server(ServerError),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection disconnected")]
    Disconnected,
}

impl ConnectionError {
    /// Transport-level failure: the cached connection must be discarded
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Io(_) | Self::Disconnected | Self::Timeout(_)
        )
    }
}
