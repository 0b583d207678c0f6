//! In-process MySQL server for wire-level tests
//!
//! Accepts any credentials and answers every `COM_QUERY` with a one-column,
//! one-row result set chosen by the test.

use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use crate::discovery::ConnectOptions;
use crate::protocol::capabilities::MONITOR_CAPABILITIES;
use crate::protocol::packet::COM_QUIT;
use crate::protocol::{Packet, PacketCodec};

/// How the server answers one statement
pub enum Reply {
    /// A single `VALUE` column holding this string, sent after `delay`
    Value { delay: Duration, value: String },
    /// A column definition followed by a row where EOF belongs
    Malformed,
}

impl Reply {
    pub fn value(value: &str) -> Self {
        Self::Value {
            delay: Duration::ZERO,
            value: value.to_string(),
        }
    }

    pub fn delayed(delay: Duration, value: &str) -> Self {
        Self::Value {
            delay,
            value: value.to_string(),
        }
    }
}

/// Start a server on an ephemeral port; `answer` maps each statement to a reply
pub async fn spawn_server<F>(answer: F) -> ConnectOptions
where
    F: Fn(&str) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let answer = Arc::new(answer);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let answer = answer.clone();
            tokio::spawn(async move { serve(stream, answer.as_ref()).await });
        }
    });

    ConnectOptions {
        host: "127.0.0.1".to_string(),
        port,
        user: "monitor".to_string(),
        password: "secret".to_string(),
        database: None,
    }
}

async fn serve(stream: TcpStream, answer: &(dyn Fn(&str) -> Reply + Send + Sync)) {
    let mut framed = Framed::new(stream, PacketCodec);
    if framed.send(Packet::new(0, greeting())).await.is_err() {
        return;
    }
    // Handshake response; any credentials are accepted
    if !matches!(framed.next().await, Some(Ok(_))) {
        return;
    }
    if framed.send(Packet::new(2, ok())).await.is_err() {
        return;
    }

    while let Some(Ok(packet)) = framed.next().await {
        if packet.payload.first() == Some(&COM_QUIT) {
            return;
        }
        let sql = String::from_utf8_lossy(&packet.payload[1..]).into_owned();
        let packets = match answer(&sql) {
            Reply::Value { delay, value } => {
                tokio::time::sleep(delay).await;
                vec![vec![1], column("VALUE"), eof(), lenenc(&value), eof()]
            }
            Reply::Malformed => vec![vec![1], column("VALUE"), lenenc("garbage")],
        };
        for (seq, payload) in packets.into_iter().enumerate() {
            if framed.send(Packet::new(seq as u8 + 1, payload)).await.is_err() {
                return;
            }
        }
    }
}

fn greeting() -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u8(10);
    buf.extend_from_slice(b"8.0.33\0");
    buf.put_u32_le(7);
    buf.extend_from_slice(b"abcdefgh");
    buf.put_u8(0);
    buf.put_u16_le((MONITOR_CAPABILITIES & 0xFFFF) as u16);
    buf.put_u8(0x21);
    buf.put_u16_le(0x0002);
    buf.put_u16_le((MONITOR_CAPABILITIES >> 16) as u16);
    buf.put_u8(21);
    buf.extend_from_slice(&[0u8; 10]);
    buf.extend_from_slice(b"ijklmnopqrst\0");
    buf.extend_from_slice(b"mysql_native_password\0");
    buf.to_vec()
}

fn ok() -> Vec<u8> {
    vec![0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00]
}

fn eof() -> Vec<u8> {
    vec![0xFE, 0x00, 0x00, 0x02, 0x00]
}

fn lenenc(s: &str) -> Vec<u8> {
    let mut out = vec![s.len() as u8];
    out.extend_from_slice(s.as_bytes());
    out
}

fn column(name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for part in ["def", "", "", "", name, name] {
        out.extend(lenenc(part));
    }
    out.extend_from_slice(&[0x0c, 0x21, 0x00, 0xFF, 0, 0, 0, 0xFD, 0, 0, 0, 0, 0]);
    out
}
