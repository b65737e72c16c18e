//! Scripted in-memory PostgreSQL backend.
//!
//! `MockServer` implements `Read + Write`, so a `Connection<MockServer>` runs
//! the real engine against it. It answers the startup packet for the chosen
//! auth mode, tracks transaction status for BEGIN/COMMIT/ROLLBACK the way a
//! server does, replies to every other query from a script, and records
//! everything the client sends.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const SCRAM_SALT: &[u8] = b"mock-salt-16byte";
pub const SCRAM_ITERATIONS: u32 = 1024;

#[derive(Debug, Clone)]
pub enum AuthMode {
    Trust,
    Cleartext(String),
    Md5(String),
    Scram(String),
    /// SCRAM whose server nonce does not extend the client nonce.
    ScramBadNonce,
    /// SCRAM whose final message carries a wrong server signature.
    ScramBadSignature(String),
    /// An authentication code the client does not implement.
    Unsupported(i32),
}

/// One scripted answer to a non-transaction-control query.
#[derive(Debug, Clone)]
pub enum Reply {
    Command(String),
    Rows {
        columns: Vec<Column>,
        rows: Vec<Vec<Option<Vec<u8>>>>,
        tag: String,
    },
    Error {
        code: String,
        message: String,
    },
    Fatal {
        code: String,
        message: String,
    },
    Notice(String),
    CopyIn,
    CopyOut(Vec<Vec<u8>>),
    /// Several results in one round, as a multi-statement query produces.
    Many(Vec<Reply>),
    /// One message with an arbitrary tag and payload.
    Frame { tag: u8, body: Vec<u8> },
    /// Raw bytes, written without framing.
    Bytes(Vec<u8>),
    /// Close the socket without answering.
    Hangup,
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub type_oid: u32,
    pub type_len: i16,
    pub type_modifier: i32,
}

impl Column {
    pub fn new(name: &str, type_oid: u32) -> Self {
        Self {
            name: name.to_string(),
            type_oid,
            type_len: -1,
            type_modifier: -1,
        }
    }

    pub fn with_modifier(mut self, type_len: i16, type_modifier: i32) -> Self {
        self.type_len = type_len;
        self.type_modifier = type_modifier;
        self
    }
}

impl Reply {
    pub fn command(tag: &str) -> Self {
        Reply::Command(tag.to_string())
    }

    pub fn error(code: &str, message: &str) -> Self {
        Reply::Error {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    pub fn fatal(code: &str, message: &str) -> Self {
        Reply::Fatal {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    /// Text rows; `None` is SQL NULL.
    pub fn rows(columns: Vec<Column>, rows: &[&[Option<&str>]]) -> Self {
        let tag = format!("SELECT {}", rows.len());
        Reply::Rows {
            columns,
            rows: rows
                .iter()
                .map(|row| row.iter().map(|v| v.map(|s| s.as_bytes().to_vec())).collect())
                .collect(),
            tag,
        }
    }
}

/// A tagged frontend message as it arrived; the startup packet has tag 0.
#[derive(Debug, Clone)]
pub struct Frame {
    pub tag: u8,
    pub body: Vec<u8>,
}

#[derive(Debug, Default)]
struct ScramState {
    client_first_bare: String,
    server_first: String,
    combined_nonce: String,
}

#[derive(Debug)]
struct State {
    auth: AuthMode,
    server_encoding: String,
    status: u8,
    started: bool,
    scram: Option<ScramState>,
    copying_in: bool,
    script: VecDeque<Reply>,
    input: Vec<u8>,
    output: VecDeque<u8>,
    hung_up: bool,

    frames: Vec<Frame>,
    writes: Vec<Vec<u8>>,
    queries: Vec<String>,
    copy_data: Vec<u8>,
    copy_chunks: Vec<usize>,
    startup_params: Vec<(String, String)>,
}

/// Scripted backend. Clones share state, so a test can keep a handle while
/// the connection owns the other.
#[derive(Debug, Clone)]
pub struct MockServer {
    state: Rc<RefCell<State>>,
}

impl MockServer {
    pub fn new(auth: AuthMode) -> Self {
        Self::with_encoding(auth, "UTF8")
    }

    pub fn with_encoding(auth: AuthMode, server_encoding: &str) -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                auth,
                server_encoding: server_encoding.to_string(),
                status: b'I',
                started: false,
                scram: None,
                copying_in: false,
                script: VecDeque::new(),
                input: Vec::new(),
                output: VecDeque::new(),
                hung_up: false,
                frames: Vec::new(),
                writes: Vec::new(),
                queries: Vec::new(),
                copy_data: Vec::new(),
                copy_chunks: Vec::new(),
                startup_params: Vec::new(),
            })),
        }
    }

    pub fn trust() -> Self {
        Self::new(AuthMode::Trust)
    }

    /// Queue the reply for the next non-transaction-control query.
    pub fn script(&self, reply: Reply) {
        self.state.borrow_mut().script.push_back(reply);
    }

    /// Every query text received, in order.
    pub fn queries(&self) -> Vec<String> {
        self.state.borrow().queries.clone()
    }

    /// Queries received after the first `skip`.
    pub fn queries_since(&self, skip: usize) -> Vec<String> {
        self.state.borrow().queries[skip..].to_vec()
    }

    /// Tags of every frontend message received.
    pub fn tags(&self) -> Vec<u8> {
        self.state.borrow().frames.iter().map(|f| f.tag).collect()
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.state.borrow().frames.clone()
    }

    /// The raw buffers passed to each `write` call.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.borrow().writes.clone()
    }

    pub fn copy_data(&self) -> Vec<u8> {
        self.state.borrow().copy_data.clone()
    }

    pub fn copy_chunks(&self) -> Vec<usize> {
        self.state.borrow().copy_chunks.clone()
    }

    pub fn startup_params(&self) -> Vec<(String, String)> {
        self.state.borrow().startup_params.clone()
    }

    pub fn terminated(&self) -> bool {
        self.tags().last() == Some(&b'X')
    }
}

impl Read for MockServer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        let n = buf.len().min(state.output.len());
        for slot in buf.iter_mut().take(n) {
            *slot = state.output.pop_front().unwrap_or_default();
        }
        Ok(n)
    }
}

impl Write for MockServer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        if state.hung_up {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"));
        }
        state.writes.push(buf.to_vec());
        state.input.extend_from_slice(buf);
        state.process();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn be_i32(data: &[u8]) -> i32 {
    i32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

fn cstrings(body: &[u8]) -> Vec<String> {
    body.split(|&b| b == 0)
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn salted_password(password: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), SCRAM_SALT, SCRAM_ITERATIONS, &mut out);
    out
}

impl State {
    fn process(&mut self) {
        loop {
            if !self.started {
                if self.input.len() < 4 {
                    return;
                }
                let len = be_i32(&self.input) as usize;
                if self.input.len() < len {
                    return;
                }
                let packet: Vec<u8> = self.input.drain(..len).collect();
                self.frames.push(Frame {
                    tag: 0,
                    body: packet[4..].to_vec(),
                });
                self.started = true;
                self.on_startup(&packet[8..]);
            } else {
                if self.input.len() < 5 {
                    return;
                }
                let len = be_i32(&self.input[1..]) as usize;
                if self.input.len() < len + 1 {
                    return;
                }
                let frame: Vec<u8> = self.input.drain(..=len).collect();
                let tag = frame[0];
                let body = frame[5..].to_vec();
                self.frames.push(Frame {
                    tag,
                    body: body.clone(),
                });
                self.on_message(tag, &body);
            }
        }
    }

    // ==================== Server → client ====================

    fn send(&mut self, tag: u8, body: &[u8]) {
        self.output.push_back(tag);
        self.output
            .extend(((body.len() + 4) as i32).to_be_bytes().iter().copied());
        self.output.extend(body.iter().copied());
    }

    fn send_auth(&mut self, code: i32, data: &[u8]) {
        let mut body = code.to_be_bytes().to_vec();
        body.extend_from_slice(data);
        self.send(b'R', &body);
    }

    fn send_error(&mut self, tag: u8, severity: &str, code: &str, message: &str) {
        let mut body = Vec::new();
        for (field, value) in [(b'S', severity), (b'V', severity), (b'C', code), (b'M', message)] {
            body.push(field);
            body.extend_from_slice(value.as_bytes());
            body.push(0);
        }
        body.push(0);
        self.send(tag, &body);
    }

    fn send_parameter(&mut self, name: &str, value: &str) {
        let mut body = Vec::new();
        body.extend_from_slice(name.as_bytes());
        body.push(0);
        body.extend_from_slice(value.as_bytes());
        body.push(0);
        self.send(b'S', &body);
    }

    fn send_complete(&mut self, tag: &str) {
        let mut body = tag.as_bytes().to_vec();
        body.push(0);
        self.send(b'C', &body);
    }

    fn send_ready(&mut self) {
        let status = self.status;
        self.send(b'Z', &[status]);
    }

    fn fail_statement(&mut self, code: &str, message: &str) {
        self.send_error(b'E', "ERROR", code, message);
        if self.status == b'T' {
            self.status = b'E';
        }
    }

    fn finish_login(&mut self) {
        self.send_auth(0, &[]);
        let encoding = self.server_encoding.clone();
        self.send_parameter("server_version", "16.2");
        self.send_parameter("server_encoding", &encoding);
        self.send_parameter("client_encoding", &encoding);
        self.send(b'K', &[0, 0, 0x30, 0x39, 0x0A, 0x0B, 0x0C, 0x0D]);
        self.send_ready();
    }

    fn reject_login(&mut self) {
        self.send_error(
            b'E',
            "FATAL",
            "28P01",
            "password authentication failed for user \"mock\"",
        );
        self.hung_up = true;
    }

    // ==================== Client → server ====================

    fn on_startup(&mut self, body: &[u8]) {
        let strings = cstrings(body);
        self.startup_params = strings
            .chunks(2)
            .filter(|pair| pair.len() == 2 && !pair[0].is_empty())
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();

        match self.auth.clone() {
            AuthMode::Trust => self.finish_login(),
            AuthMode::Cleartext(_) => self.send_auth(3, &[]),
            AuthMode::Md5(_) => self.send_auth(5, &[7, 8, 9, 10]),
            AuthMode::Scram(_) | AuthMode::ScramBadNonce | AuthMode::ScramBadSignature(_) => {
                self.send_auth(10, b"SCRAM-SHA-256-PLUS\0SCRAM-SHA-256\0\0");
            }
            AuthMode::Unsupported(code) => self.send_auth(code, &[]),
        }
    }

    fn on_message(&mut self, tag: u8, body: &[u8]) {
        match tag {
            b'p' => self.on_password(body),
            b'Q' => {
                let text = cstrings(body).remove(0);
                self.queries.push(text.clone());
                self.on_query(&text);
            }
            b'd' => {
                self.copy_chunks.push(body.len());
                self.copy_data.extend_from_slice(body);
            }
            b'c' => {
                self.copying_in = false;
                let lines = self.copy_data.iter().filter(|&&b| b == b'\n').count();
                self.send_complete(&format!("COPY {}", lines));
                self.send_ready();
            }
            b'f' => {
                self.copying_in = false;
                let reason = cstrings(body).remove(0);
                self.fail_statement("57014", &format!("COPY from stdin failed: {}", reason));
                self.send_ready();
            }
            // Flush and Terminate need no answer.
            _ => {}
        }
    }

    fn on_password(&mut self, body: &[u8]) {
        match self.auth.clone() {
            AuthMode::Cleartext(password) => {
                if cstrings(body)[0] == password {
                    self.finish_login();
                } else {
                    self.reject_login();
                }
            }
            AuthMode::Md5(password) => {
                let user = self
                    .startup_params
                    .iter()
                    .find(|(k, _)| k == "user")
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default();
                let expected = micropg::auth::md5_password(&user, &password, [7, 8, 9, 10]);
                if cstrings(body)[0] == expected {
                    self.finish_login();
                } else {
                    self.reject_login();
                }
            }
            AuthMode::Scram(password) => self.on_scram(body, &password, false),
            AuthMode::ScramBadSignature(password) => self.on_scram(body, &password, true),
            AuthMode::ScramBadNonce => self.on_scram(body, "", false),
            AuthMode::Trust | AuthMode::Unsupported(_) => {}
        }
    }

    fn on_scram(&mut self, body: &[u8], password: &str, bad_signature: bool) {
        let Some(scram) = self.scram.take() else {
            // SASLInitialResponse: mechanism, length, client-first.
            let mechanism_end = body.iter().position(|&b| b == 0).unwrap_or(0);
            assert_eq!(&body[..mechanism_end], b"SCRAM-SHA-256");
            let data = &body[mechanism_end + 5..];
            let client_first = String::from_utf8_lossy(data).into_owned();
            let bare = client_first
                .strip_prefix("n,,")
                .expect("gs2 header")
                .to_string();
            let client_nonce = bare.split_once(",r=").map(|(_, n)| n).unwrap_or("");

            let combined_nonce = if matches!(self.auth, AuthMode::ScramBadNonce) {
                "0123456789abcdefghijklmnopqrstuv".to_string()
            } else {
                format!("{}srvNonce42", client_nonce)
            };
            let server_first = format!(
                "r={},s={},i={}",
                combined_nonce,
                BASE64.encode(SCRAM_SALT),
                SCRAM_ITERATIONS
            );
            self.send_auth(11, server_first.as_bytes());
            self.scram = Some(ScramState {
                client_first_bare: bare,
                server_first,
                combined_nonce,
            });
            return;
        };

        // SASLResponse: client-final.
        let client_final = String::from_utf8_lossy(body).into_owned();
        let Some((without_proof, proof)) = client_final.rsplit_once(",p=") else {
            self.reject_login();
            return;
        };
        if without_proof != format!("c=biws,r={}", scram.combined_nonce) {
            self.reject_login();
            return;
        }

        let salted = salted_password(password);
        let client_key = hmac(&salted, b"Client Key");
        let stored_key: [u8; 32] = Sha256::digest(client_key).into();
        let auth_message = format!(
            "{},{},{}",
            scram.client_first_bare, scram.server_first, without_proof
        );
        let client_signature = hmac(&stored_key, auth_message.as_bytes());
        let proof = BASE64.decode(proof).unwrap_or_default();
        if proof.len() != 32 {
            self.reject_login();
            return;
        }
        let recovered: Vec<u8> = proof
            .iter()
            .zip(client_signature.iter())
            .map(|(a, b)| a ^ b)
            .collect();
        if Sha256::digest(&recovered).as_slice() != stored_key.as_slice() {
            self.reject_login();
            return;
        }

        let server_key = hmac(&salted, b"Server Key");
        let mut signature = hmac(&server_key, auth_message.as_bytes());
        if bad_signature {
            signature[0] ^= 0xFF;
        }
        self.send_auth(12, format!("v={}", BASE64.encode(signature)).as_bytes());
        self.finish_login();
    }

    fn on_query(&mut self, text: &str) {
        match text {
            "BEGIN" => {
                if self.status == b'E' {
                    self.send_error(
                        b'E',
                        "ERROR",
                        "25P02",
                        "current transaction is aborted, commands ignored until end of transaction block",
                    );
                } else {
                    self.status = b'T';
                    self.send_complete("BEGIN");
                }
                self.send_ready();
                return;
            }
            "COMMIT" => {
                let tag = if self.status == b'E' { "ROLLBACK" } else { "COMMIT" };
                self.status = b'I';
                self.send_complete(tag);
                self.send_ready();
                return;
            }
            "ROLLBACK" => {
                self.status = b'I';
                self.send_complete("ROLLBACK");
                self.send_ready();
                return;
            }
            _ => {}
        }

        if self.status == b'E' {
            self.send_error(
                b'E',
                "ERROR",
                "25P02",
                "current transaction is aborted, commands ignored until end of transaction block",
            );
            self.send_ready();
            return;
        }

        let reply = self.script.pop_front().unwrap_or_else(|| {
            let word = text.split_whitespace().next().unwrap_or("").to_uppercase();
            Reply::Command(word)
        });

        if self.emit(reply, text) {
            self.send_ready();
        }
    }

    /// Send one reply's messages; `false` when the round must not end with
    /// ReadyForQuery.
    fn emit(&mut self, reply: Reply, text: &str) -> bool {
        match reply {
            Reply::Command(tag) => self.send_complete(&tag),
            Reply::Rows { columns, rows, tag } => {
                let mut body = (columns.len() as i16).to_be_bytes().to_vec();
                for column in &columns {
                    body.extend_from_slice(column.name.as_bytes());
                    body.push(0);
                    body.extend_from_slice(&0i32.to_be_bytes());
                    body.extend_from_slice(&0i16.to_be_bytes());
                    body.extend_from_slice(&column.type_oid.to_be_bytes());
                    body.extend_from_slice(&column.type_len.to_be_bytes());
                    body.extend_from_slice(&column.type_modifier.to_be_bytes());
                    body.extend_from_slice(&0i16.to_be_bytes());
                }
                self.send(b'T', &body);

                for row in &rows {
                    let mut body = (row.len() as i16).to_be_bytes().to_vec();
                    for value in row {
                        match value {
                            Some(data) => {
                                body.extend_from_slice(&(data.len() as i32).to_be_bytes());
                                body.extend_from_slice(data);
                            }
                            None => body.extend_from_slice(&(-1i32).to_be_bytes()),
                        }
                    }
                    self.send(b'D', &body);
                }
                self.send_complete(&tag);
            }
            Reply::Error { code, message } => self.fail_statement(&code, &message),
            Reply::Fatal { code, message } => {
                self.send_error(b'E', "FATAL", &code, &message);
                self.hung_up = true;
                return false;
            }
            Reply::Notice(message) => {
                self.send_error(b'N', "NOTICE", "00000", &message);
                let word = text.split_whitespace().next().unwrap_or("").to_uppercase();
                self.send_complete(&word);
            }
            Reply::CopyIn => {
                self.copying_in = true;
                self.send(b'G', &[0, 0, 0]);
                return false;
            }
            Reply::CopyOut(chunks) => {
                self.send(b'H', &[0, 0, 0]);
                for chunk in &chunks {
                    self.send(b'd', chunk);
                }
                self.send(b'c', &[]);
                self.send_complete(&format!("COPY {}", chunks.len()));
            }
            Reply::Many(replies) => {
                for reply in replies {
                    if !self.emit(reply, text) {
                        return false;
                    }
                }
            }
            Reply::Frame { tag, body } => self.send(tag, &body),
            Reply::Bytes(bytes) => self.output.extend(bytes),
            Reply::Hangup => {
                self.hung_up = true;
                return false;
            }
        }
        true
    }
}
