use crate::{RegisterClass, RegisterTransport, Result, TransportError, Word, MAX_READ_WORDS};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

const FC_WRITE_SINGLE: u8 = 0x06;
const FC_WRITE_MULTIPLE: u8 = 0x10;
const MBAP_LEN: usize = 7;
const MAX_WRITE_WORDS: usize = 123;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    3000
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: default_port(),
            unit_id: default_unit_id(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// A decoded response PDU.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Response {
    Words(Vec<Word>),
    Written { address: u16, quantity: u16 },
}

/// Register transport over a Modbus TCP session.
pub struct ModbusTcpTransport {
    cfg: TcpConfig,
    stream: Option<TcpStream>,
    transaction: u16,
}

impl ModbusTcpTransport {
    pub fn new(cfg: TcpConfig) -> Self {
        Self {
            cfg,
            stream: None,
            transaction: 0,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.cfg.timeout_ms)
    }

    fn next_transaction(&mut self) -> u16 {
        self.transaction = self.transaction.wrapping_add(1);
        self.transaction
    }

    async fn exchange(&mut self, frame: Vec<u8>, tid: u16) -> Result<Response> {
        let timeout = self.timeout();
        let unit = self.cfg.unit_id;
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let result = tokio::time::timeout(timeout, async {
            stream
                .write_all(&frame)
                .await
                .map_err(|e| TransportError::Io(e.to_string()))?;
            let mut header = [0u8; MBAP_LEN];
            stream
                .read_exact(&mut header)
                .await
                .map_err(|e| TransportError::Io(e.to_string()))?;
            let len = u16::from_be_bytes([header[4], header[5]]) as usize;
            if len < 2 {
                return Err(TransportError::InvalidFrame("length field"));
            }
            let mut body = vec![0u8; len - 1];
            stream
                .read_exact(&mut body)
                .await
                .map_err(|e| TransportError::Io(e.to_string()))?;
            let mut full = Vec::with_capacity(MBAP_LEN + body.len());
            full.extend_from_slice(&header);
            full.extend_from_slice(&body);
            Ok(full)
        })
        .await
        .map_err(|_| TransportError::Timeout)
        .and_then(|r| r)
        .and_then(|raw| parse_response(&raw, tid, unit));

        if let Err(e) = &result {
            if e.is_link_fault() {
                warn!(endpoint = %self.endpoint(), error = %e, "dropping modbus session");
                self.stream = None;
            }
        }
        result
    }
}

#[async_trait]
impl RegisterTransport for ModbusTcpTransport {
    fn endpoint(&self) -> String {
        format!("{}:{}#{}", self.cfg.host, self.cfg.port, self.cfg.unit_id)
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let addr = format!("{}:{}", self.cfg.host, self.cfg.port);
        let stream = tokio::time::timeout(self.timeout(), TcpStream::connect(&addr))
            .await
            .map_err(|_| TransportError::Connect(format!("timed out connecting to {addr}")))?
            .map_err(|e| TransportError::Connect(format!("unable to connect to {addr}: {e}")))?;
        let _ = stream.set_nodelay(true);
        debug!(endpoint = %self.endpoint(), "modbus session open");
        self.stream = Some(stream);
        Ok(())
    }

    async fn read_words(
        &mut self,
        class: RegisterClass,
        address: u16,
        count: u16,
    ) -> Result<Vec<Word>> {
        let tid = self.next_transaction();
        let frame = encode_read_request(tid, self.cfg.unit_id, class, address, count)?;
        match self.exchange(frame, tid).await? {
            Response::Words(words) if words.len() == count as usize => Ok(words),
            Response::Words(_) => Err(TransportError::InvalidFrame("word count mismatch")),
            Response::Written { .. } => Err(TransportError::InvalidFrame("unexpected function")),
        }
    }

    async fn write_word(&mut self, address: u16, value: Word) -> Result<()> {
        let tid = self.next_transaction();
        let frame = encode_write_single(tid, self.cfg.unit_id, address, value);
        match self.exchange(frame, tid).await? {
            Response::Written { address: a, .. } if a == address => Ok(()),
            _ => Err(TransportError::InvalidFrame("write echo mismatch")),
        }
    }

    async fn write_words(&mut self, address: u16, values: &[Word]) -> Result<()> {
        if let [single] = values {
            return self.write_word(address, *single).await;
        }
        let tid = self.next_transaction();
        let frame = encode_write_multiple(tid, self.cfg.unit_id, address, values)?;
        match self.exchange(frame, tid).await? {
            Response::Written {
                address: a,
                quantity,
            } if a == address && quantity as usize == values.len() => Ok(()),
            _ => Err(TransportError::InvalidFrame("write echo mismatch")),
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            debug!(endpoint = %self.endpoint(), "modbus session closed");
        }
    }
}

fn frame(tid: u16, unit: u8, pdu: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MBAP_LEN + pdu.len());
    out.extend_from_slice(&tid.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
    out.push(unit);
    out.extend_from_slice(pdu);
    out
}

pub fn encode_read_request(
    tid: u16,
    unit: u8,
    class: RegisterClass,
    address: u16,
    count: u16,
) -> Result<Vec<u8>> {
    if count == 0 || count > MAX_READ_WORDS {
        return Err(TransportError::InvalidFrame("read quantity"));
    }
    let mut pdu = [0u8; 5];
    pdu[0] = class.read_function();
    pdu[1..3].copy_from_slice(&address.to_be_bytes());
    pdu[3..5].copy_from_slice(&count.to_be_bytes());
    Ok(frame(tid, unit, &pdu))
}

pub fn encode_write_single(tid: u16, unit: u8, address: u16, value: Word) -> Vec<u8> {
    let mut pdu = [0u8; 5];
    pdu[0] = FC_WRITE_SINGLE;
    pdu[1..3].copy_from_slice(&address.to_be_bytes());
    pdu[3..5].copy_from_slice(&value.to_be_bytes());
    frame(tid, unit, &pdu)
}

pub fn encode_write_multiple(tid: u16, unit: u8, address: u16, values: &[Word]) -> Result<Vec<u8>> {
    if values.is_empty() || values.len() > MAX_WRITE_WORDS {
        return Err(TransportError::InvalidFrame("write quantity"));
    }
    let mut pdu = Vec::with_capacity(6 + values.len() * 2);
    pdu.push(FC_WRITE_MULTIPLE);
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(&(values.len() as u16).to_be_bytes());
    pdu.push((values.len() * 2) as u8);
    for w in values {
        pdu.extend_from_slice(&w.to_be_bytes());
    }
    Ok(frame(tid, unit, &pdu))
}

/// Parse a complete response frame (MBAP header included).
pub fn parse_response(raw: &[u8], tid: u16, unit: u8) -> Result<Response> {
    if raw.len() < MBAP_LEN + 1 {
        return Err(TransportError::InvalidFrame("short frame"));
    }
    if u16::from_be_bytes([raw[0], raw[1]]) != tid {
        return Err(TransportError::InvalidFrame("transaction id"));
    }
    if raw[2] != 0 || raw[3] != 0 {
        return Err(TransportError::InvalidFrame("protocol id"));
    }
    if raw[6] != unit {
        return Err(TransportError::InvalidFrame("unit id"));
    }
    let pdu = &raw[MBAP_LEN..];
    let function = pdu[0];
    if function & 0x80 != 0 {
        let code = *pdu.get(1).ok_or(TransportError::InvalidFrame("exception code"))?;
        return Err(TransportError::Exception {
            function: function & 0x7F,
            code,
        });
    }
    match function {
        0x03 | 0x04 => {
            let n = *pdu.get(1).ok_or(TransportError::InvalidFrame("byte count"))? as usize;
            let data = pdu
                .get(2..2 + n)
                .ok_or(TransportError::InvalidFrame("short data"))?;
            if n % 2 != 0 {
                return Err(TransportError::InvalidFrame("odd byte count"));
            }
            Ok(Response::Words(
                data.chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect(),
            ))
        }
        FC_WRITE_SINGLE | FC_WRITE_MULTIPLE => {
            let body = pdu
                .get(1..5)
                .ok_or(TransportError::InvalidFrame("short write echo"))?;
            let address = u16::from_be_bytes([body[0], body[1]]);
            let quantity = if function == FC_WRITE_SINGLE {
                1
            } else {
                u16::from_be_bytes([body[2], body[3]])
            };
            Ok(Response::Written { address, quantity })
        }
        _ => Err(TransportError::InvalidFrame("unexpected function")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_request_layout() -> anyhow::Result<()> {
        let f = encode_read_request(0x0102, 1, RegisterClass::Input, 0x0010, 2)?;
        assert_eq!(
            f,
            vec![0x01, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x04, 0x00, 0x10, 0x00, 0x02]
        );
        assert!(encode_read_request(1, 1, RegisterClass::Holding, 0, 0).is_err());
        assert!(encode_read_request(1, 1, RegisterClass::Holding, 0, 126).is_err());
        Ok(())
    }

    #[test]
    fn write_multiple_layout() -> anyhow::Result<()> {
        let f = encode_write_multiple(7, 3, 0x0100, &[0x4120, 0x0000])?;
        assert_eq!(&f[..7], &[0x00, 0x07, 0x00, 0x00, 0x00, 0x0B, 0x03]);
        assert_eq!(&f[7..], &[0x10, 0x01, 0x00, 0x00, 0x02, 0x04, 0x41, 0x20, 0x00, 0x00]);
        Ok(())
    }

    #[test]
    fn parses_read_response() -> anyhow::Result<()> {
        let raw = [0x00, 0x05, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0xFF, 0x9C, 0x00, 0x0A];
        assert_eq!(
            parse_response(&raw, 5, 1)?,
            Response::Words(vec![0xFF9C, 0x000A])
        );
        Ok(())
    }

    #[test]
    fn parses_write_echo() -> anyhow::Result<()> {
        let single = encode_write_single(9, 1, 7, 2);
        assert_eq!(
            parse_response(&single, 9, 1)?,
            Response::Written {
                address: 7,
                quantity: 1
            }
        );
        Ok(())
    }

    #[test]
    fn exception_and_mismatches() {
        let raw = [0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02];
        assert_eq!(
            parse_response(&raw, 1, 1),
            Err(TransportError::Exception {
                function: 0x03,
                code: 2
            })
        );
        assert_eq!(
            parse_response(&raw, 2, 1),
            Err(TransportError::InvalidFrame("transaction id"))
        );
        assert_eq!(
            parse_response(&raw, 1, 9),
            Err(TransportError::InvalidFrame("unit id"))
        );
        assert!(parse_response(&raw[..5], 1, 1).is_err());
    }
}
