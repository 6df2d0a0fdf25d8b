//! One SMTP submission session.
//!
//! Generic over the stream so tests can drive it through an in-memory pipe.

use std::io;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, error, info, warn};

use crate::auth::{self, AuthData, AuthMechanism, AuthOutcome, CramChallenge, CredentialValidator};
use crate::pipeline::{DeliveryPipeline, InboundMessage};

/// Longest command line accepted, terminator included.
const MAX_COMMAND_LINE: usize = 4096;

/// Read granularity inside DATA. Longer lines arrive in pieces.
const DATA_READ_LIMIT: usize = 64 * 1024;

/// Base64 of `Username:` and `Password:`.
const LOGIN_USERNAME_PROMPT: &str = "VXNlcm5hbWU6";
const LOGIN_PASSWORD_PROMPT: &str = "UGFzc3dvcmQ6";

/// Everything a session needs from the server, shared across sessions.
pub(crate) struct SessionContext {
    pub server_name: String,
    pub pipeline: Arc<DeliveryPipeline>,
    pub validator: Arc<dyn CredentialValidator>,
    pub auth_required: bool,
    pub max_message_size: usize,
}

#[derive(Debug, Default)]
struct Transaction {
    mail_from: Option<String>,
    rcpt_tos: Vec<String>,
}

struct Session<R, W> {
    reader: BufReader<R>,
    writer: BufWriter<W>,
    ctx: Arc<SessionContext>,
    greeted: bool,
    authenticated: bool,
    tx: Transaction,
}

/// Run a session until QUIT or until the client goes away.
pub(crate) async fn run<S>(stream: S, ctx: Arc<SessionContext>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut session = Session {
        reader: BufReader::new(read_half),
        writer: BufWriter::new(write_half),
        ctx,
        greeted: false,
        authenticated: false,
        tx: Transaction::default(),
    };
    session.serve().await
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    async fn serve(&mut self) -> io::Result<()> {
        let greeting = format!("220 {} ESMTP graph-relay ready", self.ctx.server_name);
        self.reply(&greeting).await?;

        loop {
            let Some(raw) = self.read_piece(MAX_COMMAND_LINE).await? else {
                debug!("Client closed the connection");
                return Ok(());
            };
            if !raw.ends_with(b"\n") && raw.len() == MAX_COMMAND_LINE {
                self.discard_rest_of_line().await?;
                self.reply("500 5.5.2 Line too long").await?;
                continue;
            }

            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '\n']);
            let (verb, arg) = split_command(line);

            match verb.as_str() {
                "EHLO" => self.ehlo(arg).await?,
                "HELO" => self.helo(arg).await?,
                "AUTH" => self.auth(arg).await?,
                "MAIL" => self.mail(arg).await?,
                "RCPT" => self.rcpt(arg).await?,
                "DATA" => {
                    if !self.data().await? {
                        return Ok(());
                    }
                }
                "RSET" => {
                    self.tx = Transaction::default();
                    self.reply("250 2.0.0 OK").await?;
                }
                "NOOP" => self.reply("250 2.0.0 OK").await?,
                "QUIT" => {
                    self.reply("221 2.0.0 Bye").await?;
                    return Ok(());
                }
                "STARTTLS" => self.reply("454 4.7.0 TLS not available").await?,
                _ => {
                    debug!(command = %verb, "Unrecognized command");
                    self.reply("500 5.5.2 Command not recognized").await?;
                }
            }
        }
    }

    async fn ehlo(&mut self, domain: &str) -> io::Result<()> {
        if domain.is_empty() {
            return self.reply("501 5.5.4 EHLO requires a domain").await;
        }
        self.greeted = true;
        self.tx = Transaction::default();
        debug!(client = domain, "EHLO");

        let mechanisms = self
            .ctx
            .validator
            .mechanisms()
            .iter()
            .map(AuthMechanism::name)
            .collect::<Vec<_>>()
            .join(" ");
        let lines = [
            format!("250-{} greets {}", self.ctx.server_name, domain),
            format!("250-SIZE {}", self.ctx.max_message_size),
            format!("250-AUTH {mechanisms}"),
            "250 8BITMIME".to_string(),
        ];
        for line in &lines {
            self.write_line(line).await?;
        }
        self.writer.flush().await
    }

    async fn helo(&mut self, domain: &str) -> io::Result<()> {
        if domain.is_empty() {
            return self.reply("501 5.5.4 HELO requires a domain").await;
        }
        self.greeted = true;
        self.tx = Transaction::default();
        let line = format!("250 {}", self.ctx.server_name);
        self.reply(&line).await
    }

    // ── AUTH ────────────────────────────────────────────────────────

    async fn auth(&mut self, arg: &str) -> io::Result<()> {
        if !self.greeted {
            return self.reply("503 5.5.1 Send EHLO first").await;
        }
        if self.authenticated {
            return self.reply("503 5.5.1 Already authenticated").await;
        }
        if self.tx.mail_from.is_some() {
            return self.reply("503 5.5.1 AUTH not allowed during a mail transaction").await;
        }

        let (name, initial) = match arg.split_once(char::is_whitespace) {
            Some((name, initial)) => (name, Some(initial.trim())),
            None => (arg, None),
        };
        let mechanism = AuthMechanism::from_name(name)
            .filter(|m| self.ctx.validator.mechanisms().contains(m));
        let Some(mechanism) = mechanism else {
            return self.reply(AuthOutcome::MechanismNotSupported.reply()).await;
        };

        let outcome = match mechanism {
            AuthMechanism::Plain => {
                let blob = match initial {
                    Some(initial) => self.decode_answer(initial).await?,
                    None => self.prompt("").await?,
                };
                let Some(blob) = blob else { return Ok(()) };
                let data = auth::split_plain(&blob);
                self.validate(move |v| v.validate_login(AuthMechanism::Plain, &data))
                    .await
            }
            AuthMechanism::Login => {
                let login = match initial {
                    Some(initial) => self.decode_answer(initial).await?,
                    None => self.prompt(LOGIN_USERNAME_PROMPT).await?,
                };
                let Some(login) = login else { return Ok(()) };
                let Some(password) = self.prompt(LOGIN_PASSWORD_PROMPT).await? else {
                    return Ok(());
                };
                let data = AuthData::LoginPassword { login, password };
                self.validate(move |v| v.validate_login(AuthMechanism::Login, &data))
                    .await
            }
            AuthMechanism::CramMd5 => {
                let challenge = CramChallenge::generate(&self.ctx.server_name);
                let Some(response) = self.prompt(&challenge.encoded()).await? else {
                    return Ok(());
                };
                let response = String::from_utf8_lossy(&response).into_owned();
                self.validate(move |v| v.validate_cram(&challenge, &response))
                    .await
            }
        };

        if outcome.is_authorized() {
            self.authenticated = true;
        }
        info!(mechanism = %mechanism, outcome = ?outcome, "AUTH finished");
        self.reply(outcome.reply()).await
    }

    /// Send a 334 continuation and read the answer. `None` means the
    /// exchange was cancelled or undecodable and the reply is already sent.
    async fn prompt(&mut self, challenge: &str) -> io::Result<Option<Vec<u8>>> {
        let line = format!("334 {challenge}");
        self.reply(&line).await?;

        let Some(raw) = self.read_piece(MAX_COMMAND_LINE).await? else {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "client closed during AUTH",
            ));
        };
        let answer = String::from_utf8_lossy(&raw);
        let answer = answer.trim();
        if answer == "*" {
            self.reply("501 5.7.0 Authentication cancelled").await?;
            return Ok(None);
        }
        self.decode_answer(answer).await
    }

    async fn decode_answer(&mut self, encoded: &str) -> io::Result<Option<Vec<u8>>> {
        if !self.ctx.validator.decodes_credentials() {
            return Ok(Some(encoded.as_bytes().to_vec()));
        }
        // "=" stands for an empty initial response.
        if encoded == "=" {
            return Ok(Some(Vec::new()));
        }
        match STANDARD.decode(encoded) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) => {
                debug!(error = %e, "AUTH response is not base64");
                self.reply("501 5.5.2 Cannot decode response").await?;
                Ok(None)
            }
        }
    }

    /// Run the validator on the blocking pool.
    async fn validate<F>(&self, check: F) -> AuthOutcome
    where
        F: FnOnce(&dyn CredentialValidator) -> AuthOutcome + Send + 'static,
    {
        let validator = Arc::clone(&self.ctx.validator);
        match tokio::task::spawn_blocking(move || check(validator.as_ref())).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Credential validation task failed");
                AuthOutcome::InvalidCredentials
            }
        }
    }

    // ── Envelope ────────────────────────────────────────────────────

    async fn mail(&mut self, arg: &str) -> io::Result<()> {
        if !self.greeted {
            return self.reply("503 5.5.1 Send EHLO/HELO first").await;
        }
        if self.ctx.auth_required && !self.authenticated {
            return self.reply("530 5.7.0 Authentication required").await;
        }
        if self.tx.mail_from.is_some() {
            return self.reply("503 5.5.1 Sender already specified").await;
        }
        let Some(rest) = strip_prefix_ci(arg, "FROM:") else {
            return self.reply("501 5.5.4 Syntax: MAIL FROM:<address>").await;
        };
        let Some((address, params)) = parse_path(rest) else {
            return self.reply("501 5.5.4 Syntax: MAIL FROM:<address>").await;
        };
        if address.is_empty() {
            return self.reply("501 5.1.7 Sender address required").await;
        }
        if declared_size(params).is_some_and(|size| size > self.ctx.max_message_size) {
            return self
                .reply("552 5.3.4 Message size exceeds fixed maximum message size")
                .await;
        }

        debug!(from = %address, "MAIL FROM");
        self.tx.mail_from = Some(address);
        self.reply("250 2.1.0 OK").await
    }

    async fn rcpt(&mut self, arg: &str) -> io::Result<()> {
        if self.tx.mail_from.is_none() {
            return self.reply("503 5.5.1 Need MAIL command").await;
        }
        let Some((address, _)) = strip_prefix_ci(arg, "TO:").and_then(parse_path) else {
            return self.reply("501 5.5.4 Syntax: RCPT TO:<address>").await;
        };
        if address.is_empty() {
            return self.reply("501 5.1.3 Recipient address required").await;
        }

        debug!(to = %address, "RCPT TO");
        self.tx.rcpt_tos.push(address);
        self.reply("250 2.1.5 OK").await
    }

    /// Returns `false` when the client disconnected mid-message.
    async fn data(&mut self) -> io::Result<bool> {
        if self.tx.mail_from.is_none() {
            self.reply("503 5.5.1 Need MAIL command").await?;
            return Ok(true);
        }
        if self.tx.rcpt_tos.is_empty() {
            self.reply("503 5.5.1 Need RCPT command").await?;
            return Ok(true);
        }
        self.reply("354 End data with <CR><LF>.<CR><LF>").await?;

        let limit = self.ctx.max_message_size;
        let mut body = Vec::new();
        let mut oversized = false;
        let mut line_start = true;
        loop {
            let Some(piece) = self.read_piece(DATA_READ_LIMIT).await? else {
                warn!("Client closed the connection during DATA");
                return Ok(false);
            };
            if line_start && (piece == b".\r\n" || piece == b".\n") {
                break;
            }
            let content = match piece.strip_prefix(b".") {
                Some(unstuffed) if line_start => unstuffed,
                _ => &piece[..],
            };
            line_start = piece.ends_with(b"\n");

            if oversized {
                continue;
            }
            if body.len() + content.len() > limit {
                oversized = true;
                body = Vec::new();
                continue;
            }
            body.extend_from_slice(content);
        }

        let tx = std::mem::take(&mut self.tx);
        if oversized {
            warn!(limit, "Message exceeds the size limit");
            self.reply("552 5.3.4 Message size exceeds fixed maximum message size")
                .await?;
            return Ok(true);
        }

        let inbound = InboundMessage {
            raw: body,
            mail_from: tx.mail_from.unwrap_or_default(),
            rcpt_tos: tx.rcpt_tos,
        };
        let status = self.ctx.pipeline.handle(inbound).await;
        self.reply(&status.to_string()).await?;
        Ok(true)
    }

    // ── I/O ─────────────────────────────────────────────────────────

    /// Read up to `limit` bytes through the next `\n`. `None` at EOF.
    async fn read_piece(&mut self, limit: usize) -> io::Result<Option<Vec<u8>>> {
        let mut buf = Vec::new();
        let n = (&mut self.reader)
            .take(limit as u64)
            .read_until(b'\n', &mut buf)
            .await?;
        Ok((n > 0).then_some(buf))
    }

    async fn discard_rest_of_line(&mut self) -> io::Result<()> {
        while let Some(piece) = self.read_piece(MAX_COMMAND_LINE).await? {
            if piece.ends_with(b"\n") {
                break;
            }
        }
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await
    }

    async fn reply(&mut self, line: &str) -> io::Result<()> {
        self.write_line(line).await?;
        self.writer.flush().await
    }
}

/// Upper-cased verb and the trimmed rest of the line.
fn split_command(line: &str) -> (String, &str) {
    let line = line.trim_start();
    match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb.to_ascii_uppercase(), rest.trim()),
        None => (line.to_ascii_uppercase(), ""),
    }
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| s[prefix.len()..].trim_start())
}

/// Split `<address> params` (angle brackets optional) into the address and
/// the parameter string.
fn parse_path(s: &str) -> Option<(String, &str)> {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix('<') {
        let (address, params) = rest.split_once('>')?;
        return Some((address.trim().to_string(), params.trim()));
    }
    if s.is_empty() {
        return None;
    }
    Some(match s.split_once(char::is_whitespace) {
        Some((address, params)) => (address.to_string(), params.trim()),
        None => (s.to_string(), ""),
    })
}

/// Value of a `SIZE=` MAIL parameter.
fn declared_size(params: &str) -> Option<usize> {
    params.split_whitespace().find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.eq_ignore_ascii_case("SIZE")
            .then(|| value.parse().ok())
            .flatten()
    })
}
