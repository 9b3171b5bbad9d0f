use std::io::Write;

use base64::display::Base64Display;
use base64::engine::general_purpose::STANDARD;

use crate::addr::Address;
use crate::parse::ParseError;
use crate::proxy::Credentials;
use crate::Result;

/// `CONNECT host:port HTTP/1.1` plus `Host` and optional basic proxy auth.
pub fn connect_request(target: &Address, credentials: Option<&Credentials>) -> Result<Vec<u8>> {
    let mut request = Vec::new();
    write!(request, "CONNECT {target} HTTP/1.1\r\n")?;
    write!(request, "Host: {target}\r\n")?;
    if let Some(c) = credentials {
        write!(request, "Proxy-Authorization: {}\r\n", auth_header_value(c))?;
    }
    request.extend_from_slice(b"\r\n");
    Ok(request)
}

pub fn auth_header_value(c: &Credentials) -> String {
    let credentials = format!("{}:{}", c.username, c.password);
    format!(
        "Basic {}",
        Base64Display::new(credentials.as_bytes(), &STANDARD)
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub phrase: String,
    headers: Vec<(String, String)>,
}

impl Response {
    pub fn get_header(&self, n: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(n))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_length(&self) -> Option<usize> {
        self.get_header("content-length").and_then(|v| v.parse().ok())
    }

    pub fn is_chunked(&self) -> bool {
        self.get_header("transfer-encoding")
            .map(|v| v.eq_ignore_ascii_case("chunked"))
            .unwrap_or(false)
    }

    /// The reason given to the caller when the proxy refuses the tunnel.
    pub fn reject_reason(&self) -> String {
        if self.phrase.is_empty() {
            format!("status {}", self.status)
        } else {
            self.phrase.clone()
        }
    }

    /// Parses up to the end of the header block. `Ok(None)` until the
    /// terminating CRLF-CRLF arrives; body bytes are not consumed.
    pub fn parse(buf: &[u8]) -> std::result::Result<Option<(usize, Self)>, ParseError> {
        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut res = httparse::Response::new(&mut headers);
        match res.parse(buf) {
            Ok(httparse::Status::Complete(offset)) => {
                let status = res
                    .code
                    .ok_or_else(|| ParseError::unexpected("status line", "no code", "a status code"))?;
                let phrase = res.reason.unwrap_or_default().to_string();
                let headers = res
                    .headers
                    .iter()
                    .map(|hdr| {
                        (
                            hdr.name.to_string(),
                            String::from_utf8_lossy(hdr.value).to_string(),
                        )
                    })
                    .collect();

                Ok(Some((
                    offset,
                    Self {
                        status,
                        phrase,
                        headers,
                    },
                )))
            }
            Ok(httparse::Status::Partial) => Ok(None),
            Err(e) => Err(ParseError::unexpected(
                "http response",
                e.to_string(),
                "a well-formed status line and headers",
            )),
        }
    }
}
