use std::time::Instant;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::database::models::Monitor;
use crate::monitoring::checker::{CheckError, Checker, required};
use crate::monitoring::types::{Heartbeat, MonitorStatus};

pub const SMTP_OK_MESSAGE: &str = "SMTP connection verifies successfully";

const DEFAULT_PORT: u16 = 25;

/// SMTP reachability checker: greeting, EHLO, QUIT.
pub struct SmtpChecker;

/// Reads one possibly multi-line reply, returns the code and the text lines.
async fn read_reply<R>(reader: &mut R) -> Result<(u16, Vec<String>), String>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line).await.map_err(|error| error.to_string())?;
        if read == 0 {
            return Err("Connection closed by server".into());
        }

        let line = line.trim_end();
        let code = line
            .get(..3)
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| format!("Malformed SMTP reply: {line}"))?;
        let last = line.as_bytes().get(3) != Some(&b'-');
        lines.push(line.get(4..).unwrap_or_default().to_string());

        if last {
            return Ok((code, lines));
        }
    }
}

async fn expect_reply<R>(reader: &mut R, expected: u16, stage: &str) -> Result<Vec<String>, String>
where
    R: AsyncBufRead + Unpin,
{
    let (code, lines) = read_reply(reader).await?;
    if code == expected {
        Ok(lines)
    } else {
        Err(format!("Unexpected reply to {stage}: {code} {}", lines.join(" ")))
    }
}

/// Runs the dialogue over an established stream
async fn verify<S>(stream: S, require_starttls: bool) -> Result<(), String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    expect_reply(&mut reader, 220, "greeting").await?;

    write_half.write_all(b"EHLO vigil\r\n").await.map_err(|error| error.to_string())?;
    let capabilities = expect_reply(&mut reader, 250, "EHLO").await?;

    if require_starttls
        && !capabilities.iter().any(|line| line.trim().eq_ignore_ascii_case("STARTTLS"))
    {
        return Err("Server does not advertise STARTTLS".into());
    }

    write_half.write_all(b"QUIT\r\n").await.map_err(|error| error.to_string())?;
    // Some servers drop the connection without answering QUIT
    let _ = read_reply(&mut reader).await;
    Ok(())
}

#[async_trait::async_trait]
impl Checker for SmtpChecker {
    async fn check(&self, monitor: &Monitor, heartbeat: &mut Heartbeat) -> Result<(), CheckError> {
        let hostname = required(monitor.hostname.as_deref(), "hostname")?;
        let port = monitor.port.unwrap_or(DEFAULT_PORT);
        let require_starttls = match monitor.smtp_security.as_deref().unwrap_or("nostarttls") {
            "secure" => {
                return Err(CheckError::Config("SMTPS (implicit TLS) is not supported".into()));
            }
            "starttls" => true,
            _ => false,
        };

        let start = Instant::now();
        let stream = TcpStream::connect((hostname, port))
            .await
            .map_err(|error| CheckError::Network(format!("Connection failed: {error}")))?;

        verify(stream, require_starttls)
            .await
            .map_err(|error| CheckError::Network(format!("SMTP connection doesn't verify: {error}")))?;

        heartbeat.ping = Some(start.elapsed().as_millis() as u64);
        heartbeat.status = MonitorStatus::Up;
        heartbeat.msg = SMTP_OK_MESSAGE.into();
        Ok(())
    }
}
